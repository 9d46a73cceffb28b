//! Core types — wire frames, inbound messages, agent state.

use serde::{Deserialize, Serialize};

/// Topic every resident joins at startup.
pub const TOWN_HALL: &str = "town_hall";

// ── Agent state ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Unconnected,
    Connected,
    /// Terminal. There is no transition back to `Connected`.
    Closed,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Unconnected => write!(f, "unconnected"),
            AgentState::Connected => write!(f, "connected"),
            AgentState::Closed => write!(f, "closed"),
        }
    }
}

// ── Payload ──

/// Body of a published message. Extra keys set by other publishers are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub content: String,
    /// Empty when the publisher did not name itself.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Payload {
    pub fn new(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: sender.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Read whatever a publisher put on the wire. The broker forwards payloads
    /// untouched, so `content` may be missing or not a string, and a bare
    /// value stands in for `content`.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(mut map) => Self {
                content: map.remove("content").map(text_of).unwrap_or_default(),
                sender: map.remove("sender").map(text_of).unwrap_or_default(),
                extra: map,
            },
            other => Self {
                content: text_of(other),
                sender: String::new(),
                extra: serde_json::Map::new(),
            },
        }
    }
}

fn text_of(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn any_payload<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Payload::from_value)
}

// ── Inbound ──

/// An application message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub topic: String,
    #[serde(deserialize_with = "any_payload")]
    pub payload: Payload,
    /// Broker-assigned id of the publishing connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Broker receive time, epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl InboundMessage {
    /// The publisher's own name, else the broker's id for its connection.
    pub fn origin(&self) -> &str {
        if !self.payload.sender.is_empty() {
            return &self.payload.sender;
        }
        self.sender.as_deref().unwrap_or("")
    }
}

/// Every frame the broker may push to a client, keyed on `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Message(InboundMessage),
    /// Welcome notices, subscribe acks, state dumps.
    System {
        #[serde(default)]
        payload: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

// ── Outbound ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Subscribe { topic: String },
    Publish { topic: String, payload: Payload },
}

impl OutboundFrame {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        OutboundFrame::Subscribe {
            topic: topic.into(),
        }
    }

    pub fn publish(
        topic: impl Into<String>,
        content: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        OutboundFrame::Publish {
            topic: topic.into(),
            payload: Payload::new(content, sender),
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            OutboundFrame::Subscribe { topic } | OutboundFrame::Publish { topic, .. } => topic,
        }
    }
}

// ── Events (broadcast from an Agent to its supervisor) ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub agent: String,
    pub state: AgentState,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicData {
    pub agent: String,
    pub topic: String,
}

/// One message in or out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeData {
    pub agent: String,
    pub topic: String,
    pub sender: String,
    pub content: String,
    pub timestamp: String,
}

/// The broker connection ended without being asked to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectData {
    pub agent: String,
    pub reason: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureData {
    pub agent: String,
    pub topic: String,
    pub error: String,
    pub timestamp: String,
}

// ── Resident info (for listing) ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidentInfo {
    pub name: String,
    pub state: AgentState,
    pub subscriptions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_frame_wire_shape() {
        let frame = OutboundFrame::subscribe("town_hall");
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "subscribe", "topic": "town_hall"})
        );
    }

    #[test]
    fn test_publish_frame_wire_shape() {
        let frame = OutboundFrame::publish("town_hall", "Hello Bob!", "Alice");
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "publish",
                "topic": "town_hall",
                "payload": {"content": "Hello Bob!", "sender": "Alice"}
            })
        );
    }

    #[test]
    fn test_decode_broker_message_with_envelope() {
        let raw = r#"{"type":"message","topic":"garden","payload":{"content":"Hi","sender":"Bob","mood":"sunny"},"sender":"x7f2","timestamp":1700000000000}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        match frame {
            InboundFrame::Message(msg) => {
                assert_eq!(msg.topic, "garden");
                assert_eq!(msg.payload.content, "Hi");
                assert_eq!(msg.payload.sender, "Bob");
                assert_eq!(msg.payload.extra["mood"], "sunny");
                assert_eq!(msg.sender.as_deref(), Some("x7f2"));
                assert_eq!(msg.timestamp, Some(1_700_000_000_000));
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_decodes_as_other() {
        let frame: InboundFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame, InboundFrame::Other);
    }

    #[test]
    fn test_system_frame_keeps_payload() {
        let raw = r#"{"type":"system","payload":{"status":"subscribed","topic":"garden"}}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame,
            InboundFrame::System {
                payload: json!({"status": "subscribed", "topic": "garden"})
            }
        );
    }

    #[test]
    fn test_payload_without_sender_is_accepted() {
        let raw = r#"{"type":"message","topic":"town_hall","payload":{"content":"message content was empty"},"sender":"k3j9","timestamp":1}"#;
        let InboundFrame::Message(msg) = serde_json::from_str(raw).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(msg.payload.content, "message content was empty");
        assert_eq!(msg.payload.sender, "");
        assert_eq!(
            serde_json::to_value(&msg.payload).unwrap(),
            json!({"content": "message content was empty"})
        );
    }

    #[test]
    fn test_origin_falls_back_to_connection_id() {
        let mut msg = InboundMessage {
            topic: "garden".into(),
            payload: Payload::new("Hi", "Bob"),
            sender: Some("k3j9".into()),
            timestamp: None,
        };
        assert_eq!(msg.origin(), "Bob");
        msg.payload.sender.clear();
        assert_eq!(msg.origin(), "k3j9");
        msg.sender = None;
        assert_eq!(msg.origin(), "");
    }

    #[test]
    fn test_bare_and_odd_payloads_become_content() {
        assert_eq!(
            Payload::from_value(json!("plain string")),
            Payload::new("plain string", "")
        );

        let odd = Payload::from_value(json!({"content": 42, "sender": "Bob", "mood": "sunny"}));
        assert_eq!(odd.content, "42");
        assert_eq!(odd.sender, "Bob");
        assert_eq!(odd.extra["mood"], "sunny");

        assert_eq!(Payload::from_value(json!({"status": "ok"})).content, "");
    }

    #[test]
    fn test_message_without_payload_is_rejected() {
        let result = serde_json::from_str::<InboundFrame>(r#"{"type":"message","topic":"x"}"#);
        assert!(result.is_err());
    }
}
