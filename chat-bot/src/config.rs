//! Runtime configuration shared by the request cycle and the feed listener.
//!
//! [`BotConfig`] carries the connection targets and every timing policy the
//! bot uses. [`BotIdentity`] is the user name the bot publishes under; it is
//! computed once at startup and handed to whoever needs it.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Title of the channel created when the broker reports no channels at all.
pub const DEFAULT_CHANNEL_TITLE: &str = "geral";

pub const DEFAULT_BROKER_ENDPOINT: &str = "tcp://broker:5555";
pub const DEFAULT_FEED_ENDPOINT: &str = "tcp://proxy:5557";

/// Name the bot publishes under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    user_name: String,
}

impl BotIdentity {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
        }
    }

    /// Builds a `bot-rs-N` identity with a random suffix in `0..1000`.
    pub fn random() -> Self {
        let suffix = rand::thread_rng().gen_range(0..1000);
        Self::new(format!("bot-rs-{suffix}"))
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }
}

/// Delay policy applied between attempts against an unreachable peer.
///
/// The delay for attempt `n` (0-indexed) is `first × factor^n`, clamped to
/// `max`. With `factor = 1.0` every attempt waits `first`, which is the
/// default. Attempts are never capped, only the delay is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_secs(5),
            max: Duration::from_secs(60),
            factor: 1.0,
        }
    }
}

impl BackoffPolicy {
    pub fn next(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exponent);

        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("reply timeout must be greater than zero")]
    ZeroReplyTimeout,
    #[error("burst size must be at least 1")]
    ZeroBurstSize,
    #[error("backoff factor must be a finite number >= 1.0, got {0}")]
    InvalidBackoffFactor(f64),
    #[error("feed idle window must be greater than zero")]
    ZeroFeedIdle,
    #[error("endpoint for {0} must not be empty")]
    EmptyEndpoint(&'static str),
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Request/reply endpoint of the broker.
    pub broker_endpoint: String,
    /// Fan-out endpoint carrying every published message.
    pub feed_endpoint: String,
    /// Longest wait for a single reply (also bounds connect and send).
    pub reply_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Number of publish requests per cycle.
    pub burst_size: usize,
    /// Pause between two publishes of the same burst.
    pub publish_pause: RangeInclusive<Duration>,
    /// Pause between the end of a burst and the next cycle.
    pub cycle_pause: RangeInclusive<Duration>,
    /// A feed silent for this long is dropped and subscribed again. The
    /// socket never reports a vanished publisher, so silence is the only
    /// signal that one restarted.
    pub feed_idle: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            broker_endpoint: DEFAULT_BROKER_ENDPOINT.to_string(),
            feed_endpoint: DEFAULT_FEED_ENDPOINT.to_string(),
            reply_timeout: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
            burst_size: 5,
            publish_pause: Duration::from_secs(1)..=Duration::from_secs(3),
            cycle_pause: Duration::from_secs(10)..=Duration::from_secs(20),
            feed_idle: Duration::from_secs(60),
        }
    }
}

impl BotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint("broker"));
        }
        if self.feed_endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint("feed"));
        }
        if self.reply_timeout.is_zero() {
            return Err(ConfigError::ZeroReplyTimeout);
        }
        if self.burst_size == 0 {
            return Err(ConfigError::ZeroBurstSize);
        }
        if self.feed_idle.is_zero() {
            return Err(ConfigError::ZeroFeedIdle);
        }
        let factor = self.backoff.factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(ConfigError::InvalidBackoffFactor(factor));
        }
        Ok(())
    }

    pub fn random_publish_pause(&self) -> Duration {
        sample(&self.publish_pause)
    }

    pub fn random_cycle_pause(&self) -> Duration {
        sample(&self.cycle_pause)
    }
}

fn sample(range: &RangeInclusive<Duration>) -> Duration {
    // gen_range panics on an empty range.
    if range.is_empty() {
        return *range.start();
    }
    rand::thread_rng().gen_range(range.clone())
}
