//! The broker-facing request cycle.
//!
//! Each cycle opens a fresh connection, lists channels, creates the default
//! channel when there are none, and otherwise publishes a short burst into a
//! randomly chosen channel. Every request waits at most
//! [`BotConfig::reply_timeout`] for its reply. A missing reply means the broker
//! is gone or changing leader, so the connection is dropped and a new one is
//! opened on the next cycle; a lock-step socket cannot retry a request that
//! is still in flight.

use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BotConfig, BotIdentity, DEFAULT_CHANNEL_TITLE};
use crate::message::{
    ChannelDirectory, ChannelTarget, NewChannel, OutboundMessage, ServiceRequest,
};
use crate::shutdown::sleep_or_cancel;
use crate::transport::{Connector, RequestConnection, TransportError};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("shutdown requested")]
    Cancelled,
}

/// How a single cycle ended. Decides how long to wait before the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Connect failed or the channel listing got no reply.
    Unreachable,
    /// The default channel was created; it is used from the next cycle on.
    ChannelCreated,
    /// The broker listed no channels and then did not answer `addChannel`.
    ChannelCreateTimedOut,
    Published { channel: String, sent: usize },
    /// A publish went unanswered; `sent` counts the acknowledged ones.
    BurstAborted { channel: String, sent: usize },
    Cancelled,
}

/// Sends one request and waits for its reply, bounded by `deadline`.
///
/// On `Err` the connection may still have a request in flight and must not
/// be reused.
pub async fn exchange<C>(
    connection: &mut C,
    request: &ServiceRequest,
    deadline: Duration,
    shutdown: &CancellationToken,
) -> Result<String, ExchangeError>
where
    C: RequestConnection,
{
    let payload = request.to_json()?;
    let round_trip = async {
        connection.send(payload).await?;
        connection.recv().await.map_err(ExchangeError::from)
    };

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(ExchangeError::Cancelled),
        result = timeout(deadline, round_trip) => match result {
            Ok(reply) => reply,
            Err(_) => Err(ExchangeError::Timeout(deadline)),
        },
    }
}

pub struct RequestCycle<C> {
    connector: C,
    config: BotConfig,
    identity: BotIdentity,
    shutdown: CancellationToken,
}

impl<C: Connector> RequestCycle<C> {
    pub fn new(
        connector: C,
        config: BotConfig,
        identity: BotIdentity,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connector,
            config,
            identity,
            shutdown,
        }
    }

    /// Runs cycles until the shutdown token is cancelled.
    pub async fn run(self) {
        let mut failures: u32 = 0;

        loop {
            let outcome = self.run_once().await;
            let pause = match &outcome {
                CycleOutcome::Cancelled => break,
                CycleOutcome::Unreachable => {
                    let delay = self.config.backoff.next(failures);
                    failures = failures.saturating_add(1);
                    info!(?delay, attempt = failures, "backing off before reconnecting");
                    delay
                }
                CycleOutcome::ChannelCreated | CycleOutcome::ChannelCreateTimedOut => {
                    failures = 0;
                    Duration::ZERO
                }
                CycleOutcome::Published { .. } | CycleOutcome::BurstAborted { .. } => {
                    failures = 0;
                    let delay = self.config.random_cycle_pause();
                    info!(?delay, "waiting for the next cycle");
                    delay
                }
            };

            if !sleep_or_cancel(&self.shutdown, pause).await {
                break;
            }
        }

        info!("request cycle stopped");
    }

    /// One full cycle on a fresh connection. The connection is closed before
    /// this returns, whatever the outcome.
    pub async fn run_once(&self) -> CycleOutcome {
        let mut connection = match self.connect().await {
            Ok(connection) => connection,
            Err(ExchangeError::Cancelled) => return CycleOutcome::Cancelled,
            Err(error) => {
                warn!(endpoint = self.connector.endpoint(), %error, "broker unreachable");
                return CycleOutcome::Unreachable;
            }
        };

        let outcome = self.drive(&mut connection).await;
        connection.close().await;
        debug!(?outcome, "connection closed");
        outcome
    }

    async fn connect(&self) -> Result<C::Connection, ExchangeError> {
        let deadline = self.config.reply_timeout;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ExchangeError::Cancelled),
            result = timeout(deadline, self.connector.connect()) => match result {
                Ok(connection) => connection.map_err(ExchangeError::from),
                Err(_) => Err(ExchangeError::Timeout(deadline)),
            },
        }
    }

    async fn drive(&self, connection: &mut C::Connection) -> CycleOutcome {
        info!("requesting channel list");
        let reply = match self
            .request(connection, &ServiceRequest::list_channels())
            .await
        {
            Ok(reply) => reply,
            Err(ExchangeError::Cancelled) => return CycleOutcome::Cancelled,
            Err(error) => {
                warn!(%error, "channel listing unanswered, broker down or changing leader");
                return CycleOutcome::Unreachable;
            }
        };

        let directory = ChannelDirectory::parse(&reply);
        match self.pick_target(&directory) {
            Some(target) => {
                info!(
                    channel = %target.name,
                    key = %target.key,
                    available = directory.len(),
                    "channel chosen"
                );
                self.publish_burst(connection, target).await
            }
            None => self.create_default_channel(connection).await,
        }
    }

    fn pick_target(&self, directory: &ChannelDirectory) -> Option<ChannelTarget> {
        directory.choose(&mut rand::thread_rng())
    }

    async fn create_default_channel(&self, connection: &mut C::Connection) -> CycleOutcome {
        info!(title = DEFAULT_CHANNEL_TITLE, "no channels found, creating the default one");
        let request = ServiceRequest::AddChannel(NewChannel::default_for(&self.identity));

        match self.request(connection, &request).await {
            Ok(reply) => {
                info!(title = DEFAULT_CHANNEL_TITLE, %reply, "default channel created");
                CycleOutcome::ChannelCreated
            }
            Err(ExchangeError::Cancelled) => CycleOutcome::Cancelled,
            Err(error) => {
                warn!(%error, "channel creation unanswered, reconnecting");
                CycleOutcome::ChannelCreateTimedOut
            }
        }
    }

    async fn publish_burst(
        &self,
        connection: &mut C::Connection,
        target: ChannelTarget,
    ) -> CycleOutcome {
        let total = self.config.burst_size;
        let mut sent = 0;

        for index in 1..=total {
            let text = format!(
                "hello from {}! message {index}/{total}",
                self.identity.user_name()
            );
            let message = OutboundMessage::new(&target.name, text, &self.identity);

            match self
                .request(connection, &ServiceRequest::Publish(message))
                .await
            {
                Ok(reply) => {
                    sent += 1;
                    info!(channel = %target.name, %reply, "message {index}/{total} published");
                }
                Err(ExchangeError::Cancelled) => return CycleOutcome::Cancelled,
                Err(error) => {
                    warn!(
                        channel = %target.name,
                        sent,
                        %error,
                        "publish unanswered, aborting burst"
                    );
                    return CycleOutcome::BurstAborted {
                        channel: target.name,
                        sent,
                    };
                }
            }

            if index < total
                && !sleep_or_cancel(&self.shutdown, self.config.random_publish_pause()).await
            {
                return CycleOutcome::Cancelled;
            }
        }

        info!(channel = %target.name, sent, "burst complete");
        CycleOutcome::Published {
            channel: target.name,
            sent,
        }
    }

    async fn request(
        &self,
        connection: &mut C::Connection,
        request: &ServiceRequest,
    ) -> Result<String, ExchangeError> {
        debug!(service = request.service(), "sending request");
        exchange(connection, request, self.config.reply_timeout, &self.shutdown).await
    }
}
