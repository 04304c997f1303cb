//! Chat bot that keeps a channel busy through a request/reply broker.
//!
//! Two loops run side by side and share nothing but a shutdown token:
//!
//! - [`cycle`] drives the broker: list channels, create the default one when
//!   none exist, then publish a short burst into a random channel. A reply
//!   that does not arrive in time drops the connection and starts over.
//! - [`listener`] subscribes to the broadcast feed and logs every message it
//!   sees.
//!
//! The remaining modules support them:
//!
//! - [`cli`] parses flags and environment into a [`config::BotConfig`].
//! - [`config`] holds timing policies and the bot identity.
//! - [`message`] defines the JSON requests and the feed frames.
//! - [`transport`] is the socket seam, with ZeroMQ implementations.
//! - [`shutdown`] handles OS signals and interruptible sleeps.

pub mod cli;
pub mod config;
pub mod cycle;
pub mod listener;
pub mod message;
pub mod shutdown;
pub mod transport;
