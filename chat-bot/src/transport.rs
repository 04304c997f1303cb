//! Socket seam between the bot loops and ZeroMQ.
//!
//! The request cycle only sees [`Connector`] and [`RequestConnection`]; the
//! feed listener only sees [`FeedConnector`] and [`FeedSource`]. Tests swap
//! in scripted implementations, production uses the `zeromq` sockets below.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("failed to subscribe: {0}")]
    Subscribe(String),
    #[error("failed to send: {0}")]
    Send(String),
    #[error("failed to receive: {0}")]
    Recv(String),
    #[error("reply is not valid UTF-8")]
    Encoding,
}

/// Opens fresh request/reply connections to the broker.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: RequestConnection;

    fn endpoint(&self) -> &str;

    async fn connect(&self) -> Result<Self::Connection, TransportError>;
}

/// A lock-step request/reply connection. Callers must not `send` again
/// before the previous `recv` has completed.
#[async_trait]
pub trait RequestConnection: Send {
    async fn send(&mut self, payload: String) -> Result<(), TransportError>;

    async fn recv(&mut self) -> Result<String, TransportError>;

    async fn close(self);
}

/// Opens subscriptions to the broadcast feed.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    type Feed: FeedSource;

    fn endpoint(&self) -> &str;

    async fn subscribe(&self) -> Result<Self::Feed, TransportError>;
}

#[async_trait]
pub trait FeedSource: Send {
    /// Next multi-part message, one `Bytes` per frame.
    async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError>;

    async fn close(self);
}

#[derive(Debug, Clone)]
pub struct ZmqConnector {
    endpoint: String,
}

impl ZmqConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Connector for ZmqConnector {
    type Connection = ZmqRequestConnection;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<ZmqRequestConnection, TransportError> {
        let mut socket = ReqSocket::new();
        socket
            .connect(&self.endpoint)
            .await
            .map_err(|err| TransportError::Connect {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            })?;
        debug!(endpoint = %self.endpoint, "request socket connected");
        Ok(ZmqRequestConnection { socket })
    }
}

pub struct ZmqRequestConnection {
    socket: ReqSocket,
}

#[async_trait]
impl RequestConnection for ZmqRequestConnection {
    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        self.socket
            .send(ZmqMessage::from(payload))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn recv(&mut self) -> Result<String, TransportError> {
        let reply = self
            .socket
            .recv()
            .await
            .map_err(|err| TransportError::Recv(err.to_string()))?;
        let body: Vec<u8> = reply
            .into_vec()
            .iter()
            .flat_map(|frame| frame.iter().copied())
            .collect();
        String::from_utf8(body).map_err(|_| TransportError::Encoding)
    }

    async fn close(self) {
        for error in self.socket.close().await {
            warn!(%error, "error while closing request socket");
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZmqFeedConnector {
    endpoint: String,
}

impl ZmqFeedConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl FeedConnector for ZmqFeedConnector {
    type Feed = ZmqFeed;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn subscribe(&self) -> Result<ZmqFeed, TransportError> {
        let mut socket = SubSocket::new();
        socket
            .connect(&self.endpoint)
            .await
            .map_err(|err| TransportError::Connect {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            })?;
        // Empty prefix matches every topic.
        socket
            .subscribe("")
            .await
            .map_err(|err| TransportError::Subscribe(err.to_string()))?;
        Ok(ZmqFeed { socket })
    }
}

pub struct ZmqFeed {
    socket: SubSocket,
}

#[async_trait]
impl FeedSource for ZmqFeed {
    async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError> {
        self.socket
            .recv()
            .await
            .map(ZmqMessage::into_vec)
            .map_err(|err| TransportError::Recv(err.to_string()))
    }

    async fn close(self) {
        for error in self.socket.close().await {
            warn!(%error, "error while closing feed socket");
        }
    }
}
