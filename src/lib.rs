//! # Scribe gateway
//!
//! `scribe_gateway` is the family-scoped messaging gateway between a single
//! shared MQTT broker and many independent households. It enforces per-family
//! topic isolation and device admission, tracks device presence from retained
//! status messages, and correlates each dispatched question with exactly one
//! answer.
//!
//! ## Core Modules
//!
//! - `broker`: topic layout, message envelopes and the MQTT connection.
//! - `client`: broker sessions and a simulated device.
//! - `config`: loading and merging settings.
//! - `correlation`: pending exchanges, answers, expiry and cancellation.
//! - `family`: credentials, allow-lists and authorization.
//! - `gateway`: the composition root and inbound dispatch path.
//! - `persistence`: the family/answer store backed by `sled`.
//! - `presence`: the device presence state machine and cache.
//! - `transport`: the WebSocket management surface.
//! - `utils`: error type and logging.

pub mod broker;
pub mod client;
pub mod config;
pub mod correlation;
pub mod family;
pub mod gateway;
pub mod persistence;
pub mod presence;
pub mod transport;
pub mod utils;
