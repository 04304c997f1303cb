//! JSON payloads exchanged with the broker and frames read from the feed.
//!
//! Requests are tagged by `service` with their arguments under `data`, which
//! is the envelope the broker dispatches on:
//!
//! ```json
//! {"service": "publish", "data": {"channel": "geral", "message": "hi", "user": "bot-rs-7", "timestamp": "..."}}
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use rand::{Rng, seq::IteratorRandom};
use serde::{Deserialize, Serialize};

use crate::config::{BotIdentity, DEFAULT_CHANNEL_TITLE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "service", content = "data", rename_all = "camelCase")]
pub enum ServiceRequest {
    ListChannels {},
    AddChannel(NewChannel),
    Publish(OutboundMessage),
}

impl ServiceRequest {
    pub fn list_channels() -> Self {
        Self::ListChannels {}
    }

    pub fn service(&self) -> &'static str {
        match self {
            Self::ListChannels {} => "listChannels",
            Self::AddChannel(_) => "addChannel",
            Self::Publish(_) => "publish",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewChannel {
    pub user: String,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "desc")]
    pub description: String,
}

impl NewChannel {
    /// The channel the bot creates when the broker has none.
    pub fn default_for(identity: &BotIdentity) -> Self {
        Self {
            user: identity.user_name().to_string(),
            title: DEFAULT_CHANNEL_TITLE.to_string(),
            description: format!("default channel opened by {}", identity.user_name()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    #[serde(rename = "titulo", default)]
    pub title: String,
    #[serde(rename = "desc", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Channel listing as returned by the broker, keyed by broker-assigned id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ChannelDirectory(HashMap<String, ChannelInfo>);

impl ChannelDirectory {
    /// Parses a `listChannels` reply. Anything that is not a JSON object of
    /// channel entries yields an empty directory.
    pub fn parse(reply: &str) -> Self {
        serde_json::from_str(reply).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Picks one entry uniformly at random.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ChannelTarget> {
        let (key, info) = self.0.iter().choose(rng)?;
        let name = if info.title.trim().is_empty() {
            key.clone()
        } else {
            info.title.clone()
        };
        Some(ChannelTarget {
            key: key.clone(),
            name,
        })
    }
}

/// Channel picked for a publish burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub key: String,
    /// Name used in `publish` requests: the title, or the key when untitled.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: String,
    pub message: String,
    pub user: String,
    pub timestamp: String,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        message: impl Into<String>,
        identity: &BotIdentity,
    ) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
            user: identity.user_name().to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// One message observed on the broadcast feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEvent {
    pub topic: String,
    pub content: String,
}

impl BroadcastEvent {
    /// Reads `[topic, payload, ...]`; frames past the second are ignored.
    pub fn from_parts(parts: &[Bytes]) -> Option<Self> {
        match parts {
            [topic, content, ..] => Some(Self {
                topic: String::from_utf8_lossy(topic).into_owned(),
                content: String::from_utf8_lossy(content).into_owned(),
            }),
            _ => None,
        }
    }
}
