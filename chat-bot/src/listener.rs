//! Read-only observer of the broadcast feed.
//!
//! The listener subscribes to every topic and logs each `[topic, payload]`
//! pair it sees. It never sends anything and shares nothing with the request
//! cycle except the shutdown token.
//!
//! A feed that stays silent for the configured idle window is closed and
//! subscribed again through the same backoff loop used at startup, which is
//! how the listener finds a publisher that restarted under it.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BackoffPolicy;
use crate::message::BroadcastEvent;
use crate::shutdown::sleep_or_cancel;
use crate::transport::{FeedConnector, FeedSource};

/// Why a subscription stopped being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedEnd {
    Shutdown,
    Idle,
}

pub struct BroadcastListener<F> {
    connector: F,
    backoff: BackoffPolicy,
    idle: Duration,
    shutdown: CancellationToken,
    tap: Option<mpsc::UnboundedSender<BroadcastEvent>>,
}

impl<F> BroadcastListener<F>
where
    F: FeedConnector + 'static,
    F::Feed: 'static,
{
    pub fn new(
        connector: F,
        backoff: BackoffPolicy,
        idle: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connector,
            backoff,
            idle,
            shutdown,
            tap: None,
        }
    }

    /// Forwards a copy of every logged event to `tap`. Used by tests to
    /// observe the feed without a log subscriber.
    #[doc(hidden)]
    pub fn with_tap(mut self, tap: mpsc::UnboundedSender<BroadcastEvent>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        while let Some(mut feed) = self.subscribe().await {
            info!(endpoint = self.connector.endpoint(), "listening to broadcast feed");
            let end = self.listen(&mut feed).await;
            feed.close().await;

            if end == FeedEnd::Shutdown {
                break;
            }
            info!(idle = ?self.idle, "broadcast feed silent, subscribing again");
        }

        info!("feed listener stopped");
    }

    async fn subscribe(&self) -> Option<F::Feed> {
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                result = self.connector.subscribe() => result,
            };

            match result {
                Ok(feed) => return Some(feed),
                Err(error) => {
                    let delay = self.backoff.next(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        endpoint = self.connector.endpoint(),
                        %error,
                        ?delay,
                        "feed subscription failed"
                    );
                    if !sleep_or_cancel(&self.shutdown, delay).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn listen(&self, feed: &mut F::Feed) -> FeedEnd {
        // Consecutive receive errors; only the first of a streak is a warning.
        let mut failures: u64 = 0;
        let idle = sleep(self.idle);
        tokio::pin!(idle);

        loop {
            let received = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return FeedEnd::Shutdown,
                received = feed.recv() => received,
                _ = &mut idle => return FeedEnd::Idle,
            };

            match received {
                Ok(parts) => {
                    idle.as_mut().reset(Instant::now() + self.idle);
                    if failures > 0 {
                        debug!(failures, "feed receive recovered");
                        failures = 0;
                    }
                    self.observe(&parts);
                }
                Err(error) => {
                    if failures == 0 {
                        warn!(%error, "feed receive failed, retrying");
                    } else {
                        debug!(%error, failures, "feed receive failed again");
                    }
                    failures += 1;
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    fn observe(&self, parts: &[Bytes]) {
        let Some(event) = BroadcastEvent::from_parts(parts) else {
            return;
        };

        info!(
            target: "chat_bot::feed",
            topic = %event.topic,
            content = %event.content,
            "broadcast received"
        );
        if let Some(tap) = &self.tap {
            let _ = tap.send(event);
        }
    }
}
