//! Clients of the shared broker as the gateway sees them.
//!
//! `session` tracks connections the gateway has admitted; `simulator` is a
//! small device implementation used by the `device` CLI command for smoke
//! tests against a real broker.

pub mod session;
pub mod simulator;

pub use session::{Session, SessionTable};

#[cfg(test)]
mod tests;
