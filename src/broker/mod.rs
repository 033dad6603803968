pub mod adapter;
pub mod message;
pub mod topic;
pub mod transport;

pub use adapter::{MqttAdapter, MqttLoop, backoff_delay, connect};
pub use message::{Direction, Envelope, Qos, RawMessage};
pub use topic::{ParsedTopic, Route, TopicLayout};
pub use transport::{EvictionTarget, MemoryTransport, Transport, TransportCommand};

#[cfg(test)]
mod tests;
