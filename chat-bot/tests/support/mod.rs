//! Scripted in-memory transport that records every socket operation.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chat_bot::transport::{
    Connector, FeedConnector, FeedSource, RequestConnection, TransportError,
};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a scripted connection answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Never answers.
    Silent,
    Fail,
}

impl Reply {
    pub fn text(body: &str) -> Self {
        Self::Text(body.to_string())
    }
}

/// Behavior of one connect attempt.
#[derive(Debug, Clone)]
pub enum Script {
    Refuse,
    Accept(Vec<Reply>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Wire {
    Connect { conn: usize },
    Refused,
    Send { conn: usize, service: String, data: Value },
    Recv { conn: usize },
    /// A send issued while the previous request was still unanswered.
    LockStepViolation { conn: usize },
    Close { conn: usize },
}

#[derive(Default)]
struct Shared {
    scripts: VecDeque<Script>,
    wire: Vec<Wire>,
    connect_times: Vec<Instant>,
    send_times: Vec<Instant>,
    next_conn: usize,
}

/// Hands out scripted connections in order. Once the scripts run out it
/// cancels `done` and refuses every further connect.
#[derive(Clone)]
pub struct ScriptedConnector {
    shared: Arc<Mutex<Shared>>,
    done: CancellationToken,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Script>, done: CancellationToken) -> Self {
        let shared = Shared {
            scripts: scripts.into(),
            ..Shared::default()
        };
        Self {
            shared: Arc::new(Mutex::new(shared)),
            done,
        }
    }

    pub fn wire(&self) -> Vec<Wire> {
        self.shared.lock().expect("lock").wire.clone()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.shared.lock().expect("lock").connect_times.clone()
    }

    /// `(service, instant)` of every request, in send order.
    pub fn send_times(&self) -> Vec<(String, Instant)> {
        let shared = self.shared.lock().expect("lock");
        let services = shared.wire.iter().filter_map(|event| match event {
            Wire::Send { service, .. } => Some(service.clone()),
            _ => None,
        });
        services.zip(shared.send_times.iter().copied()).collect()
    }

    /// `(service, data)` of every request, in send order.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.wire()
            .into_iter()
            .filter_map(|event| match event {
                Wire::Send { service, data, .. } => Some((service, data)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    fn endpoint(&self) -> &str {
        "scripted://broker"
    }

    async fn connect(&self) -> Result<ScriptedConnection, TransportError> {
        let mut shared = self.shared.lock().expect("lock");
        let refused = || TransportError::Connect {
            endpoint: "scripted://broker".into(),
            reason: "connection refused".into(),
        };

        let Some(script) = shared.scripts.pop_front() else {
            self.done.cancel();
            shared.wire.push(Wire::Refused);
            return Err(refused());
        };

        match script {
            Script::Refuse => {
                shared.wire.push(Wire::Refused);
                Err(refused())
            }
            Script::Accept(replies) => {
                shared.next_conn += 1;
                let conn = shared.next_conn;
                shared.wire.push(Wire::Connect { conn });
                shared.connect_times.push(Instant::now());
                Ok(ScriptedConnection {
                    conn,
                    replies: replies.into(),
                    awaiting_reply: false,
                    shared: Arc::clone(&self.shared),
                })
            }
        }
    }
}

pub struct ScriptedConnection {
    conn: usize,
    replies: VecDeque<Reply>,
    awaiting_reply: bool,
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedConnection {
    fn record(&self, event: Wire) {
        self.shared.lock().expect("lock").wire.push(event);
    }
}

#[async_trait]
impl RequestConnection for ScriptedConnection {
    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        if self.awaiting_reply {
            self.record(Wire::LockStepViolation { conn: self.conn });
        }
        let request: Value = serde_json::from_str(&payload).expect("request is json");
        let service = request["service"].as_str().expect("service tag").to_string();
        self.record(Wire::Send {
            conn: self.conn,
            service,
            data: request["data"].clone(),
        });
        self.shared.lock().expect("lock").send_times.push(Instant::now());
        self.awaiting_reply = true;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, TransportError> {
        match self.replies.pop_front().unwrap_or(Reply::Silent) {
            Reply::Text(body) => {
                self.awaiting_reply = false;
                self.record(Wire::Recv { conn: self.conn });
                Ok(body)
            }
            Reply::Fail => Err(TransportError::Recv("scripted failure".into())),
            Reply::Silent => std::future::pending().await,
        }
    }

    async fn close(self) {
        self.record(Wire::Close { conn: self.conn });
    }
}

/// What one `recv` on a scripted feed yields.
#[derive(Debug, Clone)]
pub enum Frame {
    Parts(Vec<&'static str>),
    Fail,
}

/// Feed connector that refuses `refusals` times, then hands out one feed
/// per session. A session that runs out of frames goes silent; the last one
/// also cancels `done`. Subscribing past the last session cancels `done` and
/// fails.
pub struct ScriptedFeedConnector {
    refusals: Mutex<usize>,
    sessions: Mutex<VecDeque<Vec<Frame>>>,
    done: CancellationToken,
    subscriptions: Arc<Mutex<usize>>,
    closes: Arc<Mutex<usize>>,
}

impl ScriptedFeedConnector {
    pub fn new(refusals: usize, frames: Vec<Frame>, done: CancellationToken) -> Self {
        Self::with_sessions(refusals, vec![frames], done)
    }

    pub fn with_sessions(
        refusals: usize,
        sessions: Vec<Vec<Frame>>,
        done: CancellationToken,
    ) -> Self {
        Self {
            refusals: Mutex::new(refusals),
            sessions: Mutex::new(sessions.into()),
            done,
            subscriptions: Arc::new(Mutex::new(0)),
            closes: Arc::new(Mutex::new(0)),
        }
    }

    pub fn subscriptions(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.subscriptions)
    }

    pub fn closes(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.closes)
    }
}

#[async_trait]
impl FeedConnector for ScriptedFeedConnector {
    type Feed = ScriptedFeed;

    fn endpoint(&self) -> &str {
        "scripted://feed"
    }

    async fn subscribe(&self) -> Result<ScriptedFeed, TransportError> {
        let refused = || TransportError::Connect {
            endpoint: "scripted://feed".into(),
            reason: "connection refused".into(),
        };

        let mut refusals = self.refusals.lock().expect("lock");
        if *refusals > 0 {
            *refusals -= 1;
            return Err(refused());
        }

        let mut sessions = self.sessions.lock().expect("lock");
        let Some(frames) = sessions.pop_front() else {
            self.done.cancel();
            return Err(refused());
        };
        *self.subscriptions.lock().expect("lock") += 1;
        Ok(ScriptedFeed {
            frames: frames.into(),
            last: sessions.is_empty(),
            done: self.done.clone(),
            closes: Arc::clone(&self.closes),
        })
    }
}

pub struct ScriptedFeed {
    frames: VecDeque<Frame>,
    last: bool,
    done: CancellationToken,
    closes: Arc<Mutex<usize>>,
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError> {
        match self.frames.pop_front() {
            Some(Frame::Parts(parts)) => Ok(parts
                .into_iter()
                .map(|part| Bytes::from_static(part.as_bytes()))
                .collect()),
            Some(Frame::Fail) => Err(TransportError::Recv("scripted failure".into())),
            None => {
                if self.last {
                    self.done.cancel();
                }
                std::future::pending().await
            }
        }
    }

    async fn close(self) {
        *self.closes.lock().expect("lock") += 1;
    }
}
