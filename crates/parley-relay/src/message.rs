//! Message envelopes.
//!
//! The relay reads exactly two fields of an inbound message, `type` and
//! `target`, and writes exactly one, `from`. Everything else is passed
//! through untouched. Relay-generated messages (`welcome`, `error`) are
//! built here too.

use serde_json::{json, Map, Value};

use crate::{Identity, RelayError};

/// Field naming the message kind.
pub const FIELD_TYPE: &str = "type";
/// Field naming the destination identity.
pub const FIELD_TARGET: &str = "target";
/// Field the relay stamps with the sender's identity.
pub const FIELD_FROM: &str = "from";

/// Kind of the greeting sent after registration.
pub const KIND_WELCOME: &str = "welcome";
/// Kind of relay-generated error notices.
pub const KIND_ERROR: &str = "error";

/// A structurally decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Decode a text frame into an envelope.
    ///
    /// The text must be a JSON object; any other JSON value is a decode
    /// failure, as is invalid JSON.
    pub fn decode(text: &str) -> Result<Self, RelayError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(RelayError::decode(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// The `type` field, if it is a string.
    pub fn kind(&self) -> Option<&str> {
        self.fields.get(FIELD_TYPE).and_then(Value::as_str)
    }

    /// The `target` field, if it is a non-empty string.
    ///
    /// A missing, empty, or non-string target all mean "no target".
    pub fn target(&self) -> Option<&str> {
        self.fields
            .get(FIELD_TARGET)
            .and_then(Value::as_str)
            .filter(|target| !target.is_empty())
    }

    /// How the `target` field is named back to the sender.
    ///
    /// Strings are echoed as-is, other JSON values in their JSON form. A
    /// missing or `null` target is the empty string.
    pub fn target_label(&self) -> String {
        match self.fields.get(FIELD_TARGET) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(target)) => target.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Set `from` to the sender, overwriting any client-supplied value.
    pub fn stamp_sender(&mut self, sender: &Identity) {
        self.fields
            .insert(FIELD_FROM.to_string(), Value::String(sender.to_string()));
    }

    /// Borrow the raw fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume the envelope into a JSON value for forwarding.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Messages originated by the relay itself.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// Greeting sent once, right after registration
    Welcome {
        user_id: Identity,
        online_users: Vec<Identity>,
    },
    /// Per-message error notice sent back to the originating client
    Error { message: String },
}

impl RelayMessage {
    /// Build the welcome greeting for a freshly registered identity.
    pub fn welcome(user_id: Identity, online_users: Vec<Identity>) -> Self {
        Self::Welcome {
            user_id,
            online_users,
        }
    }

    /// Build the notice for a target that is not registered.
    pub fn not_online(target: &str) -> Self {
        Self::Error {
            message: format!("User '{}' is not online", target),
        }
    }

    /// Build the notice for an inbound frame that failed to decode.
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::Error {
            message: format!("Malformed message: {}", reason),
        }
    }

    /// The `type` tag this message carries on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => KIND_WELCOME,
            Self::Error { .. } => KIND_ERROR,
        }
    }

    /// Render the wire representation.
    pub fn into_value(self) -> Value {
        match self {
            Self::Welcome {
                user_id,
                online_users,
            } => json!({
                FIELD_TYPE: KIND_WELCOME,
                "user_id": user_id,
                "message": format!("Welcome {}!", user_id),
                "online_users": online_users,
            }),
            Self::Error { message } => json!({
                FIELD_TYPE: KIND_ERROR,
                "message": message,
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    #[test]
    fn test_decode_object() {
        let envelope = Envelope::decode(r#"{"type":"offer","target":"bob","sdp":"X"}"#).unwrap();
        assert_eq!(envelope.kind(), Some("offer"));
        assert_eq!(envelope.target(), Some("bob"));
        assert_eq!(envelope.fields()["sdp"], "X");
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = Envelope::decode("{\"type\": ").unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        for text in ["[]", "42", "\"offer\"", "null", "true"] {
            let err = Envelope::decode(text).unwrap_err();
            assert!(
                err.to_string().contains("expected a JSON object"),
                "unexpected error for {}: {}",
                text,
                err
            );
        }
    }

    #[test]
    fn test_target_absent_variants() {
        for text in [
            r#"{"type":"offer"}"#,
            r#"{"type":"offer","target":""}"#,
            r#"{"type":"offer","target":null}"#,
            r#"{"type":"offer","target":7}"#,
        ] {
            let envelope = Envelope::decode(text).unwrap();
            assert_eq!(envelope.target(), None, "for {}", text);
        }
    }

    #[test]
    fn test_target_label_names_what_was_sent() {
        for (text, label) in [
            (r#"{"type":"offer","target":"carol"}"#, "carol"),
            (r#"{"type":"offer","target":""}"#, ""),
            (r#"{"type":"offer","target":7}"#, "7"),
            (r#"{"type":"offer","target":true}"#, "true"),
            (r#"{"type":"offer","target":["bob"]}"#, r#"["bob"]"#),
            (r#"{"type":"offer","target":null}"#, ""),
            (r#"{"type":"offer"}"#, ""),
        ] {
            let envelope = Envelope::decode(text).unwrap();
            assert_eq!(envelope.target_label(), label, "for {}", text);
        }
    }

    #[test]
    fn test_kind_is_optional() {
        let envelope = Envelope::decode(r#"{"target":"bob"}"#).unwrap();
        assert_eq!(envelope.kind(), None);
        assert_eq!(envelope.target(), Some("bob"));
    }

    #[test]
    fn test_stamp_sender_preserves_other_fields() {
        let mut envelope = Envelope::decode(
            r#"{"type":"ice-candidate","target":"bob","candidate":{"sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        envelope.stamp_sender(&id("alice"));

        assert_eq!(
            envelope.into_value(),
            json!({
                "type": "ice-candidate",
                "target": "bob",
                "candidate": {"sdpMid": "0", "sdpMLineIndex": 0},
                "from": "alice",
            })
        );
    }

    #[test]
    fn test_stamp_sender_overwrites_spoofed_from() {
        let mut envelope =
            Envelope::decode(r#"{"type":"answer","target":"alice","from":"mallory"}"#).unwrap();
        envelope.stamp_sender(&id("bob"));
        assert_eq!(envelope.fields()[FIELD_FROM], "bob");
    }

    #[test]
    fn test_welcome_wire_shape() {
        let welcome = RelayMessage::welcome(id("alice"), vec![id("alice"), id("bob")]);
        assert_eq!(welcome.kind(), KIND_WELCOME);
        assert_eq!(
            welcome.into_value(),
            json!({
                "type": "welcome",
                "user_id": "alice",
                "message": "Welcome alice!",
                "online_users": ["alice", "bob"],
            })
        );
    }

    #[test]
    fn test_not_online_wire_shape() {
        let notice = RelayMessage::not_online("carol");
        assert_eq!(notice.kind(), KIND_ERROR);
        assert_eq!(
            notice.into_value(),
            json!({"type": "error", "message": "User 'carol' is not online"})
        );

        let notice = RelayMessage::not_online("7");
        assert_eq!(notice.into_value()["message"], "User '7' is not online");
    }

    #[test]
    fn test_malformed_notice() {
        let notice = RelayMessage::malformed("expected a JSON object, got an array");
        assert_eq!(
            notice.into_value()["message"],
            "Malformed message: expected a JSON object, got an array"
        );
    }
}
