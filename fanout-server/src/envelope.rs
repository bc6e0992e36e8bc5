//! Wire envelopes.
//!
//! Clients send [`Inbound`] messages and receive [`Outbound`] ones, each a
//! JSON object discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::SessionId;

/// Recipient id stamped on chat messages that are broadcast.
pub const BROADCAST_RECIPIENT: &str = "all";

const ADMIN_FALLBACK_ID: &str = "Admin";

/// Messages a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Inbound {
    Join {
        user_id: Option<String>,
    },
    Chat {
        #[serde(default)]
        content: String,
        recipient_id: Option<String>,
    },
    Leave,
    Ping,
}

impl Inbound {
    /// Discriminants accepted from clients.
    pub const KINDS: &'static [&'static str] = &["JOIN", "CHAT", "LEAVE", "PING"];
}

/// Messages the server sends.
///
/// Every variant except the connection handshake and `JoinAck` carries a
/// server-side `timestamp` in epoch milliseconds, stamped at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Outbound {
    System {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_admin: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Join {
        user_id: String,
        message: String,
        is_admin: bool,
        timestamp: i64,
    },
    JoinAck {
        message: String,
        active_users: Vec<String>,
        is_admin: bool,
    },
    Leave {
        user_id: String,
        message: String,
        timestamp: i64,
    },
    Chat {
        id: String,
        sender_id: String,
        recipient_id: String,
        content: String,
        is_admin: bool,
        timestamp: i64,
    },
    PrivateMessage {
        id: String,
        sender_id: String,
        recipient_id: String,
        content: String,
        #[serde(rename = "isAdminDM")]
        is_admin_dm: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_sent: Option<bool>,
        timestamp: i64,
    },
    Error {
        message: String,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
}

impl Outbound {
    /// First frame on every connection; no timestamp.
    pub fn welcome(session: SessionId) -> Self {
        Outbound::System {
            message: "Connected to WebSocket server".to_string(),
            is_admin: None,
            session_id: Some(session.to_string()),
            timestamp: None,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Outbound::System {
            message: message.into(),
            is_admin: None,
            session_id: None,
            timestamp: Some(now_millis()),
        }
    }

    pub fn system_with_admin(message: impl Into<String>, is_admin: bool) -> Self {
        Outbound::System {
            message: message.into(),
            is_admin: Some(is_admin),
            session_id: None,
            timestamp: Some(now_millis()),
        }
    }

    pub fn join_notice(user_id: &str, is_admin: bool) -> Self {
        Outbound::Join {
            user_id: user_id.to_string(),
            message: format!("{user_id} has joined the chat"),
            is_admin,
            timestamp: now_millis(),
        }
    }

    pub fn join_ack(active_users: Vec<String>, is_admin: bool) -> Self {
        Outbound::JoinAck {
            message: "Successfully joined the chat".to_string(),
            active_users,
            is_admin,
        }
    }

    pub fn leave_notice(user_id: &str) -> Self {
        Outbound::Leave {
            user_id: user_id.to_string(),
            message: format!("{user_id} has left the chat"),
            timestamp: now_millis(),
        }
    }

    pub fn disconnect_notice(user_id: &str) -> Self {
        Outbound::Leave {
            user_id: user_id.to_string(),
            message: format!("{user_id} has disconnected"),
            timestamp: now_millis(),
        }
    }

    /// Chat message with a fresh id. `recipient_id` of `None` means broadcast.
    pub fn chat(sender_id: &str, content: &str, recipient_id: Option<&str>, is_admin: bool) -> Self {
        Outbound::Chat {
            id: next_message_id(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.unwrap_or(BROADCAST_RECIPIENT).to_string(),
            content: content.to_string(),
            is_admin,
            timestamp: now_millis(),
        }
    }

    /// Direct message to the admin. `sent` marks the copy echoed back to the sender.
    pub fn admin_dm(sender_id: &str, admin_id: Option<&str>, content: &str, sent: bool) -> Self {
        Outbound::PrivateMessage {
            id: next_message_id(),
            sender_id: sender_id.to_string(),
            recipient_id: admin_id.unwrap_or(ADMIN_FALLBACK_ID).to_string(),
            content: content.to_string(),
            is_admin_dm: true,
            is_sent: sent.then_some(true),
            timestamp: now_millis(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Error {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    pub fn pong() -> Self {
        Outbound::Pong {
            timestamp: now_millis(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing message type")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("invalid {kind} message: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes one inbound frame, rejecting anything that is not a known client message.
pub fn decode_inbound(payload: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(payload)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !Inbound::KINDS.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidFields { kind, source })
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn next_message_id() -> String {
    nanoid::nanoid!()
}

/// Returns the remainder of `text` after `prefix`, compared ASCII case-insensitively.
pub fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_known_client_messages() {
        let join = decode_inbound(r#"{"type":"JOIN","userId":"alice"}"#).expect("join");
        assert_eq!(
            join,
            Inbound::Join {
                user_id: Some("alice".into())
            }
        );

        let chat = decode_inbound(r#"{"type":"CHAT","content":"hi","recipientId":"bob"}"#)
            .expect("chat");
        assert_eq!(
            chat,
            Inbound::Chat {
                content: "hi".into(),
                recipient_id: Some("bob".into())
            }
        );

        let leave = decode_inbound(r#"{"type":"LEAVE","extra":1}"#).expect("leave");
        assert_eq!(leave, Inbound::Leave);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        assert_eq!(
            decode_inbound(r#"{"type":"JOIN"}"#).expect("join"),
            Inbound::Join { user_id: None }
        );
        assert_eq!(
            decode_inbound(r#"{"type":"CHAT"}"#).expect("chat"),
            Inbound::Chat {
                content: String::new(),
                recipient_id: None
            }
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(
            decode_inbound("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_inbound(r#"{"content":"hi"}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            decode_inbound(r#"{"type":42}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            decode_inbound(r#"{"type":"JOIN_ACK"}"#),
            Err(ProtocolError::UnknownType(kind)) if kind == "JOIN_ACK"
        ));
        assert!(matches!(
            decode_inbound(r#"{"type":"CHAT","content":7}"#),
            Err(ProtocolError::InvalidFields { kind, .. }) if kind == "CHAT"
        ));
    }

    #[test]
    fn handshake_and_join_ack_carry_no_timestamp() {
        let welcome = serde_json::to_value(Outbound::welcome(SessionId::new(7))).expect("encode");
        assert_eq!(
            welcome,
            json!({
                "type": "SYSTEM",
                "message": "Connected to WebSocket server",
                "sessionId": "7"
            })
        );

        let ack = serde_json::to_value(Outbound::join_ack(vec!["alice".into()], true))
            .expect("encode");
        assert_eq!(
            ack,
            json!({
                "type": "JOIN_ACK",
                "message": "Successfully joined the chat",
                "activeUsers": ["alice"],
                "isAdmin": true
            })
        );
    }

    #[test]
    fn private_message_uses_wire_field_names() {
        let sent = serde_json::to_value(Outbound::admin_dm("bob", Some("alice"), "hello", true))
            .expect("encode");
        assert_eq!(sent["type"], "PRIVATE_MESSAGE");
        assert_eq!(sent["senderId"], "bob");
        assert_eq!(sent["recipientId"], "alice");
        assert_eq!(sent["isAdminDM"], true);
        assert_eq!(sent["isSent"], true);
        assert!(sent["timestamp"].is_i64());

        let delivered = serde_json::to_value(Outbound::admin_dm("bob", None, "hello", false))
            .expect("encode");
        assert_eq!(delivered["recipientId"], "Admin");
        assert!(delivered.get("isSent").is_none());
    }

    #[test]
    fn strips_prefix_without_slicing_inside_a_char() {
        assert_eq!(strip_prefix_ignore_case("@SERVER x", "@server"), Some(" x"));
        assert_eq!(
            strip_prefix_ignore_case("@ServerAdmin hi", "@serveradmin"),
            Some(" hi")
        );
        assert_eq!(strip_prefix_ignore_case("@serveé", "@server"), None);
        assert_eq!(strip_prefix_ignore_case("short", "@server"), None);
    }

    #[test]
    fn chat_ids_are_unique_and_broadcast_targets_all() {
        let first = Outbound::chat("alice", "hi", None, false);
        let second = Outbound::chat("alice", "hi", Some("bob"), true);
        match (first, second) {
            (
                Outbound::Chat {
                    id: a,
                    recipient_id: to_a,
                    ..
                },
                Outbound::Chat {
                    id: b,
                    recipient_id: to_b,
                    is_admin,
                    ..
                },
            ) => {
                assert_ne!(a, b);
                assert_eq!(to_a, BROADCAST_RECIPIENT);
                assert_eq!(to_b, "bob");
                assert!(is_admin);
            }
            other => panic!("unexpected envelopes: {other:?}"),
        }
    }
}
