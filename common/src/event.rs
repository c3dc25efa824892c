use std::fmt;

use serde::{Deserialize, Serialize};

pub const PAYLOAD_ON: &str = "1";
pub const PAYLOAD_OFF: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Subscribe { topic: String, qos: QoS },
    MessageReceived { topic: String, payload: String },
    MessageSend { topic: String, payload: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Subscribe,
    MessageReceived,
    MessageSend,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::MessageReceived => "message_received",
            Self::MessageSend => "message_send",
        }
    }
}

impl Event {
    pub fn subscribe(topic: impl Into<String>, qos: QoS) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            qos,
        }
    }

    pub fn received(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::MessageReceived {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn send(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::MessageSend {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Subscribe { .. } => EventKind::Subscribe,
            Self::MessageReceived { .. } => EventKind::MessageReceived,
            Self::MessageSend { .. } => EventKind::MessageSend,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            Self::Subscribe { topic, .. }
            | Self::MessageReceived { topic, .. }
            | Self::MessageSend { topic, .. } => topic,
        }
    }

    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Subscribe { .. } => None,
            Self::MessageReceived { payload, .. } | Self::MessageSend { payload, .. } => {
                Some(payload)
            }
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe { topic, qos } => {
                write!(f, "Subscribe[{topic} qos={}]", qos.as_u8())
            }
            Self::MessageReceived { topic, payload } => {
                write!(f, "MessageReceived[{topic} \"{payload}\"]")
            }
            Self::MessageSend { topic, payload } => {
                write!(f, "MessageSend[{topic} \"{payload}\"]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_accessors_follow_variant() {
        let event = Event::received("sensors/floor", "21.5");
        assert_eq!(event.kind(), EventKind::MessageReceived);
        assert_eq!(event.topic(), "sensors/floor");
        assert_eq!(event.payload(), Some("21.5"));

        let event = Event::subscribe("sensors/floor", QoS::AtLeastOnce);
        assert_eq!(event.kind(), EventKind::Subscribe);
        assert_eq!(event.payload(), None);
    }

    #[test]
    fn display_names_topic_and_payload() {
        let event = Event::send("relays/k3/on", PAYLOAD_ON);
        assert_eq!(event.to_string(), "MessageSend[relays/k3/on \"1\"]");
    }
}
