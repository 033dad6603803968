//! The management control surface.
//!
//! The gateway's management operations are exposed over WebSocket as JSON
//! requests tagged by `type`. `message` defines the protocol, `handler`
//! maps requests onto the gateway and `websocket` runs the server.

pub mod handler;
pub mod message;
pub mod websocket;

pub use handler::{Followup, handle_request};
pub use message::{ControlRequest, ControlResponse};
pub use websocket::start_control_server;
