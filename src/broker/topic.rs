//! Topic layout
//!
//! Every family lives under its own prefix `{root}/{namespace}`:
//!
//! ```text
//! {prefix}/clients/{device_id}/status
//! {prefix}/families/{family_id}/questions
//! {prefix}/families/{family_id}/answers
//! {prefix}/families/{family_id}/notifications
//! {prefix}/families/{family_id}/request
//! {prefix}/families/{family_id}/devices/{device_id}/{channel...}
//! ```
//!
//! The gateway subscribes once with `+` in the namespace position and
//! recovers the family from the prefix after receipt.

/// Where an inbound topic points, relative to its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ClientStatus { device_id: String },
    Questions { family_id: String },
    Answers { family_id: String },
    Notifications { family_id: String },
    Request { family_id: String },
    DeviceDirected {
        family_id: String,
        device_id: String,
        channel: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub prefix: String,
    pub route: Route,
}

#[derive(Debug, Clone)]
pub struct TopicLayout {
    root: String,
}

impl TopicLayout {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Wildcard filters the gateway needs on its single connection.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            format!("{}/+/clients/+/status", self.root),
            format!("{}/+/families/+/answers", self.root),
            format!("{}/+/families/+/notifications", self.root),
            format!("{}/+/families/+/request", self.root),
        ]
    }

    /// Retained liveness topic of the gateway itself.
    pub fn gateway_status(&self) -> String {
        format!("{}/gateway/status", self.root)
    }

    pub fn parse(&self, topic: &str) -> Option<ParsedTopic> {
        let rest = topic.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts
            .iter()
            .any(|p| p.is_empty() || p.contains(['+', '#']))
        {
            return None;
        }

        let (namespace, tail) = parts.split_first()?;
        let prefix = format!("{}/{}", self.root, namespace);

        let route = match tail {
            ["clients", device_id, "status"] => Route::ClientStatus {
                device_id: device_id.to_string(),
            },
            ["families", family_id, "questions"] => Route::Questions {
                family_id: family_id.to_string(),
            },
            ["families", family_id, "answers"] => Route::Answers {
                family_id: family_id.to_string(),
            },
            ["families", family_id, "notifications"] => Route::Notifications {
                family_id: family_id.to_string(),
            },
            ["families", family_id, "request"] => Route::Request {
                family_id: family_id.to_string(),
            },
            ["families", family_id, "devices", device_id, channel @ ..] if !channel.is_empty() => {
                Route::DeviceDirected {
                    family_id: family_id.to_string(),
                    device_id: device_id.to_string(),
                    channel: channel.join("/"),
                }
            }
            _ => return None,
        };

        Some(ParsedTopic { prefix, route })
    }
}

pub fn status_topic(prefix: &str, device_id: &str) -> String {
    format!("{prefix}/clients/{device_id}/status")
}

pub fn questions_topic(prefix: &str, family_id: &str) -> String {
    format!("{prefix}/families/{family_id}/questions")
}

pub fn answers_topic(prefix: &str, family_id: &str) -> String {
    format!("{prefix}/families/{family_id}/answers")
}

pub fn notifications_topic(prefix: &str, family_id: &str) -> String {
    format!("{prefix}/families/{family_id}/notifications")
}

pub fn request_topic(prefix: &str, family_id: &str) -> String {
    format!("{prefix}/families/{family_id}/request")
}

pub fn device_topic(prefix: &str, family_id: &str, device_id: &str, channel: &str) -> String {
    format!("{prefix}/families/{family_id}/devices/{device_id}/{channel}")
}

/// MQTT filter matching with `+` (one level) and `#` (remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
