use std::time::Duration;

use clap::Parser;

use crate::config::{
    BackoffPolicy, BotConfig, BotIdentity, ConfigError, DEFAULT_BROKER_ENDPOINT,
    DEFAULT_FEED_ENDPOINT,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Request/reply endpoint of the broker.
    #[arg(long, env = "CHAT_BOT_BROKER", default_value = DEFAULT_BROKER_ENDPOINT)]
    pub broker: String,

    /// Broadcast feed endpoint to observe.
    #[arg(long, env = "CHAT_BOT_FEED", default_value = DEFAULT_FEED_ENDPOINT)]
    pub feed: String,

    /// User name to publish as. Defaults to a random `bot-rs-N`.
    #[arg(long, env = "CHAT_BOT_USER")]
    pub user: Option<String>,

    /// Seconds to wait for each broker reply before reconnecting.
    #[arg(long, env = "CHAT_BOT_REPLY_TIMEOUT_SECS", default_value_t = 5)]
    pub reply_timeout_secs: u64,

    /// Seconds to wait before reconnecting to an unreachable broker.
    #[arg(long, env = "CHAT_BOT_RETRY_BACKOFF_SECS", default_value_t = 5)]
    pub retry_backoff_secs: u64,

    /// Upper bound for the reconnect delay when it grows.
    #[arg(long, env = "CHAT_BOT_MAX_BACKOFF_SECS", default_value_t = 60)]
    pub max_backoff_secs: u64,

    /// Growth factor of the reconnect delay. 1.0 keeps it constant.
    #[arg(long, env = "CHAT_BOT_BACKOFF_FACTOR", default_value_t = 1.0)]
    pub backoff_factor: f64,

    /// Messages published per cycle.
    #[arg(long, env = "CHAT_BOT_BURST_SIZE", default_value_t = 5)]
    pub burst_size: usize,

    /// Seconds of feed silence after which the listener subscribes again.
    #[arg(long, env = "CHAT_BOT_FEED_IDLE_SECS", default_value_t = 60)]
    pub feed_idle_secs: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "CHAT_BOT_LOG_JSON")]
    pub log_json: bool,

    /// Do not observe the broadcast feed.
    #[arg(long, env = "CHAT_BOT_NO_LISTENER")]
    pub no_listener: bool,
}

impl Cli {
    pub fn identity(&self) -> BotIdentity {
        match &self.user {
            Some(user) if !user.trim().is_empty() => BotIdentity::new(user.trim()),
            _ => BotIdentity::random(),
        }
    }

    pub fn config(&self) -> Result<BotConfig, ConfigError> {
        let config = BotConfig {
            broker_endpoint: self.broker.clone(),
            feed_endpoint: self.feed.clone(),
            reply_timeout: Duration::from_secs(self.reply_timeout_secs),
            backoff: BackoffPolicy {
                first: Duration::from_secs(self.retry_backoff_secs),
                max: Duration::from_secs(self.max_backoff_secs),
                factor: self.backoff_factor,
            },
            burst_size: self.burst_size,
            feed_idle: Duration::from_secs(self.feed_idle_secs),
            ..BotConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
