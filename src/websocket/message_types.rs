use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw wire envelope; every inbound frame is `{"type": ..., "payload": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Inbound events from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum WsInboundEvent {
    MarkMessagesAsSeen {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    Text {
        text: String,
        sender_id: Uuid,
        recipient_id: Uuid,
        conversation_id: Uuid,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkSeenPayload {
    conversation_id: Uuid,
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextPayload {
    text: String,
    sender_id: Uuid,
    recipient_id: Uuid,
    conversation_id: Uuid,
}

/// Parse one inbound frame.
///
/// Returns `Ok(None)` for unknown `type` tags (ignored, never fatal) and
/// `Err` for malformed JSON or a payload that does not match its tag.
pub fn parse_inbound(raw: &str) -> Result<Option<WsInboundEvent>, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    match envelope.kind.as_str() {
        "MARK_MESSAGES_AS_SEEN" => {
            let p: MarkSeenPayload = serde_json::from_value(envelope.payload)?;
            Ok(Some(WsInboundEvent::MarkMessagesAsSeen {
                conversation_id: p.conversation_id,
                user_id: p.user_id,
            }))
        }
        "TEXT" => {
            let p: TextPayload = serde_json::from_value(envelope.payload)?;
            Ok(Some(WsInboundEvent::Text {
                text: p.text,
                sender_id: p.sender_id,
                recipient_id: p.recipient_id,
                conversation_id: p.conversation_id,
            }))
        }
        _ => Ok(None),
    }
}

/// Outbound events from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    #[serde(rename = "ONLINE_USERS")]
    OnlineUsers { users: Vec<Uuid> },

    #[serde(rename = "NEW_MESSAGE")]
    NewMessage { message: NewMessagePayload },

    #[serde(rename = "MESSAGES_SEEN", rename_all = "camelCase")]
    MessagesSeen { conversation_id: Uuid },

    #[serde(rename = "TEXT")]
    Text { payload: TextEventPayload },

    #[serde(rename = "ERROR")]
    Error { error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub id: Uuid,
    pub text: String,
    pub sender_id: Option<Uuid>,
    pub conversation_id: Uuid,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEventPayload {
    pub text: String,
    pub sender_id: Uuid,
    pub conversation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl WsOutboundEvent {
    /// Serialize for the wire. These shapes cannot fail to serialize; an
    /// error here is a programming bug, so it is logged and dropped.
    pub fn to_frame(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_mark_messages_as_seen() {
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let raw = json!({
            "type": "MARK_MESSAGES_AS_SEEN",
            "payload": {"conversationId": conversation_id, "userId": user_id}
        })
        .to_string();

        let evt = parse_inbound(&raw).unwrap().unwrap();
        assert_eq!(
            evt,
            WsInboundEvent::MarkMessagesAsSeen {
                conversation_id,
                user_id
            }
        );
    }

    #[test]
    fn parses_text() {
        let sender_id = Uuid::new_v4();
        let recipient_id = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let raw = json!({
            "type": "TEXT",
            "payload": {
                "text": "hello",
                "senderId": sender_id,
                "recipientId": recipient_id,
                "conversationId": conversation_id
            }
        })
        .to_string();

        let evt = parse_inbound(&raw).unwrap().unwrap();
        assert_eq!(
            evt,
            WsInboundEvent::Text {
                text: "hello".into(),
                sender_id,
                recipient_id,
                conversation_id
            }
        );
    }

    #[test]
    fn unknown_type_is_ignored_not_fatal() {
        let raw = json!({"type": "TYPING", "payload": {"whatever": 1}}).to_string();
        assert!(parse_inbound(&raw).unwrap().is_none());
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(parse_inbound("not json").is_err());
        // Known tag with a payload that does not match it.
        let raw = json!({"type": "TEXT", "payload": {"text": 42}}).to_string();
        assert!(parse_inbound(&raw).is_err());
    }

    #[test]
    fn online_users_wire_shape() {
        let user = Uuid::new_v4();
        let frame = WsOutboundEvent::OnlineUsers { users: vec![user] }
            .to_frame()
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "ONLINE_USERS");
        assert_eq!(v["users"][0], json!(user));
    }

    #[test]
    fn messages_seen_wire_shape() {
        let conversation_id = Uuid::new_v4();
        let frame = WsOutboundEvent::MessagesSeen { conversation_id }
            .to_frame()
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "MESSAGES_SEEN");
        assert_eq!(v["conversationId"], json!(conversation_id));
    }

    #[test]
    fn text_event_nests_its_payload() {
        let sender_id = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let frame = WsOutboundEvent::Text {
            payload: TextEventPayload {
                text: "hey".into(),
                sender_id,
                conversation_id,
                created_at: Utc::now(),
            },
        }
        .to_frame()
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "TEXT");
        assert_eq!(v["payload"]["text"], "hey");
        assert_eq!(v["payload"]["senderId"], json!(sender_id));
        assert!(v["payload"]["createdAt"].is_string());
    }

    #[test]
    fn new_message_wire_shape() {
        let id = Uuid::new_v4();
        let sender_id = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let frame = WsOutboundEvent::NewMessage {
            message: NewMessagePayload {
                id,
                text: "hi".into(),
                sender_id: Some(sender_id),
                conversation_id,
                seen: false,
                created_at: Utc::now(),
            },
        }
        .to_frame()
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "NEW_MESSAGE");
        assert_eq!(v["message"]["id"], json!(id));
        assert_eq!(v["message"]["conversationId"], json!(conversation_id));
        assert_eq!(v["message"]["seen"], false);
    }
}
