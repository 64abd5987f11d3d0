// chat-protocol: Chat relay wire types and serialization.
//
// Every frame on the client socket and every payload on the broker topic is a
// single JSON object with the fields `type`, `sender`, `msg`, `createdAt`
// (integer seconds since the epoch) and an optional `channel`.  The field
// names are frozen: browser clients depend on them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use serde_json::json;

/// Reserved sender for every server-generated message.
pub const SERVER_SENDER: &str = "SERVER";

/// The single broadcast topic used when no other topic is configured.
pub const DEFAULT_TOPIC: &str = "general";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a payload could not be turned into a [`ChatMessage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMessage {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown message type `{0}`")]
    UnknownKind(String),
    #[error("createdAt out of range: {0}")]
    InvalidTimestamp(i64),
    #[error("{kind} messages must be sent by SERVER, got `{sender}`")]
    ReservedKind { kind: MessageKind, sender: String },
}

// ---------------------------------------------------------------------------
// Message kind
// ---------------------------------------------------------------------------

/// Discriminator carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Ordinary chat text, broadcast to the topic.
    Plain,
    /// Server -> client only: tells a freshly connected client its own id.
    IdentityAnnouncement,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Plain => "message",
            MessageKind::IdentityAnnouncement => "internal_user_id",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = MalformedMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(MessageKind::Plain),
            "internal_user_id" => Ok(MessageKind::IdentityAnnouncement),
            other => Err(MalformedMessage::UnknownKind(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// The unit of communication between clients, the relay and the broker.
///
/// Fields are only reachable through accessors: `created_at` is fixed when the
/// message is built, and identity announcements always carry
/// [`SERVER_SENDER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    kind: MessageKind,
    sender: String,
    body: String,
    created_at: DateTime<Utc>,
    topic: Option<String>,
}

impl ChatMessage {
    pub fn builder() -> ChatMessageBuilder {
        ChatMessageBuilder::default()
    }

    /// Chat text from `sender`, stamped now.
    pub fn plain(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self::stamped(MessageKind::Plain, sender.into(), body.into())
    }

    /// First frame a client receives: its own session id in `msg`.
    pub fn identity_announcement(session_id: &str) -> Self {
        Self::stamped(
            MessageKind::IdentityAnnouncement,
            SERVER_SENDER.to_owned(),
            session_id.to_owned(),
        )
    }

    /// Join announcement published to the topic.
    pub fn connected(session_id: &str) -> Self {
        Self::stamped(
            MessageKind::Plain,
            SERVER_SENDER.to_owned(),
            format!("{session_id} connected"),
        )
    }

    /// Leave announcement published to the topic.
    pub fn disconnected(session_id: &str) -> Self {
        Self::stamped(
            MessageKind::Plain,
            SERVER_SENDER.to_owned(),
            format!("{session_id} disconnected"),
        )
    }

    fn stamped(kind: MessageKind, sender: String, body: String) -> Self {
        Self {
            kind,
            sender,
            body,
            created_at: now_seconds(),
            topic: None,
        }
    }

    /// Same message scoped to `topic`; `created_at` is carried over untouched.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn is_from_server(&self) -> bool {
        self.sender == SERVER_SENDER
    }

    /// Serialize to the wire form.  `channel` is omitted when unset.
    pub fn encode(&self) -> String {
        let mut obj = json!({
            "type": self.kind.as_str(),
            "sender": self.sender,
            "msg": self.body,
            "createdAt": self.created_at.timestamp(),
        });
        if let Some(topic) = &self.topic {
            obj["channel"] = json!(topic);
        }
        obj.to_string()
    }

    /// Strict decode: `type`, `sender` and `msg` are required.
    pub fn decode(text: &str) -> Result<Self, MalformedMessage> {
        let raw = RawMessage::parse(text)?;
        raw.into_builder()?.build()
    }

    /// Decode a frame received from a client socket.
    ///
    /// Clients cannot choose their sender: plain messages are attributed to
    /// `session_id`, identity announcements to [`SERVER_SENDER`].  Whatever the
    /// client put in `sender` is discarded, so the field may be omitted.
    pub fn decode_from_client(text: &str, session_id: &str) -> Result<Self, MalformedMessage> {
        let mut raw = RawMessage::parse(text)?;
        let kind: MessageKind = raw
            .kind
            .as_deref()
            .ok_or(MalformedMessage::MissingField("type"))?
            .parse()?;
        raw.sender = Some(match kind {
            MessageKind::Plain => session_id.to_owned(),
            MessageKind::IdentityAnnouncement => SERVER_SENDER.to_owned(),
        });
        raw.into_builder()?.build()
    }
}

fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Typed construction with validation of required fields.
///
/// `kind` is kept textual until [`build`](Self::build) so that payloads naming
/// an unknown type are rejected with [`MalformedMessage::UnknownKind`].
#[derive(Debug, Clone, Default)]
pub struct ChatMessageBuilder {
    kind: Option<String>,
    sender: Option<String>,
    body: Option<String>,
    created_at: Option<i64>,
    topic: Option<String>,
}

impl ChatMessageBuilder {
    #[must_use]
    pub fn kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind.as_str().to_owned());
        self
    }

    #[must_use]
    pub fn kind_name(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at.timestamp());
        self
    }

    #[must_use]
    pub fn created_at_secs(mut self, secs: i64) -> Self {
        self.created_at = Some(secs);
        self
    }

    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn build(self) -> Result<ChatMessage, MalformedMessage> {
        let kind: MessageKind = self
            .kind
            .ok_or(MalformedMessage::MissingField("type"))?
            .parse()?;
        let sender = self.sender.ok_or(MalformedMessage::MissingField("sender"))?;
        let body = self.body.ok_or(MalformedMessage::MissingField("msg"))?;
        if kind == MessageKind::IdentityAnnouncement && sender != SERVER_SENDER {
            return Err(MalformedMessage::ReservedKind { kind, sender });
        }
        let created_at = match self.created_at {
            Some(secs) => DateTime::from_timestamp(secs, 0)
                .ok_or(MalformedMessage::InvalidTimestamp(secs))?,
            None => now_seconds(),
        };
        Ok(ChatMessage {
            kind,
            sender,
            body,
            created_at,
            topic: self.topic,
        })
    }
}

// ---------------------------------------------------------------------------
// Raw wire form
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    sender: Option<String>,
    msg: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<i64>,
    channel: Option<String>,
}

impl RawMessage {
    /// Only a JSON object is accepted; derived `Deserialize` would otherwise
    /// also take a positional array.
    fn parse(text: &str) -> Result<Self, MalformedMessage> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| MalformedMessage::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(MalformedMessage::InvalidJson(
                "expected a JSON object".to_owned(),
            ));
        }
        serde_json::from_value(value).map_err(|e| MalformedMessage::InvalidJson(e.to_string()))
    }

    fn into_builder(self) -> Result<ChatMessageBuilder, MalformedMessage> {
        let kind = self.kind.ok_or(MalformedMessage::MissingField("type"))?;
        let mut builder = ChatMessage::builder().kind_name(kind);
        if let Some(sender) = self.sender {
            builder = builder.sender(sender);
        }
        if let Some(msg) = self.msg {
            builder = builder.body(msg);
        }
        if let Some(secs) = self.created_at {
            builder = builder.created_at_secs(secs);
        }
        if let Some(channel) = self.channel {
            builder = builder.topic(channel);
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_announcement_is_sent_by_server() {
        let msg = ChatMessage::identity_announcement("abc");
        assert_eq!(msg.kind(), MessageKind::IdentityAnnouncement);
        assert_eq!(msg.sender(), SERVER_SENDER);
        assert_eq!(msg.body(), "abc");
        assert_eq!(msg.topic(), None);
    }

    #[test]
    fn join_and_leave_announcements_use_fixed_wording() {
        assert_eq!(ChatMessage::connected("u1").body(), "u1 connected");
        assert_eq!(ChatMessage::disconnected("u1").body(), "u1 disconnected");
        assert!(ChatMessage::connected("u1").is_from_server());
        assert_eq!(ChatMessage::connected("u1").kind(), MessageKind::Plain);
    }

    #[test]
    fn created_at_has_second_resolution() {
        let msg = ChatMessage::plain("u1", "hi");
        assert_eq!(msg.created_at().timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn with_topic_keeps_created_at() {
        let msg = ChatMessage::builder()
            .kind(MessageKind::Plain)
            .sender("u1")
            .body("hi")
            .created_at_secs(1_700_000_000)
            .build()
            .unwrap();
        let scoped = msg.clone().with_topic("general");
        assert_eq!(scoped.created_at(), msg.created_at());
        assert_eq!(scoped.topic(), Some("general"));
    }

    #[test]
    fn encode_uses_frozen_field_names() {
        let msg = ChatMessage::builder()
            .kind(MessageKind::Plain)
            .sender("u1")
            .body("hi")
            .created_at_secs(1_700_000_000)
            .topic("general")
            .build()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "sender": "u1",
                "msg": "hi",
                "createdAt": 1_700_000_000,
                "channel": "general",
            })
        );
    }

    #[test]
    fn encode_omits_absent_channel() {
        let value: serde_json::Value =
            serde_json::from_str(&ChatMessage::identity_announcement("x").encode()).unwrap();
        assert!(value.get("channel").is_none());
        assert_eq!(value["type"], "internal_user_id");
    }

    #[test]
    fn builder_rejects_missing_fields_in_order() {
        assert_eq!(
            ChatMessage::builder().build(),
            Err(MalformedMessage::MissingField("type"))
        );
        assert_eq!(
            ChatMessage::builder().kind(MessageKind::Plain).build(),
            Err(MalformedMessage::MissingField("sender"))
        );
        assert_eq!(
            ChatMessage::builder()
                .kind(MessageKind::Plain)
                .sender("u1")
                .build(),
            Err(MalformedMessage::MissingField("msg"))
        );
    }

    #[test]
    fn builder_rejects_unknown_kind() {
        let err = ChatMessage::builder()
            .kind_name("shout")
            .sender("u1")
            .body("hi")
            .build()
            .unwrap_err();
        assert_eq!(err, MalformedMessage::UnknownKind("shout".to_owned()));
    }

    #[test]
    fn builder_rejects_identity_announcement_from_client() {
        let err = ChatMessage::builder()
            .kind(MessageKind::IdentityAnnouncement)
            .sender("u1")
            .body("spoof")
            .build()
            .unwrap_err();
        assert!(matches!(err, MalformedMessage::ReservedKind { .. }));
    }

    #[test]
    fn builder_rejects_out_of_range_timestamp() {
        let err = ChatMessage::builder()
            .kind(MessageKind::Plain)
            .sender("u1")
            .body("hi")
            .created_at_secs(i64::MAX)
            .build()
            .unwrap_err();
        assert_eq!(err, MalformedMessage::InvalidTimestamp(i64::MAX));
    }

    #[test]
    fn kind_parses_wire_names() {
        assert_eq!("message".parse::<MessageKind>(), Ok(MessageKind::Plain));
        assert_eq!(
            "internal_user_id".parse::<MessageKind>(),
            Ok(MessageKind::IdentityAnnouncement)
        );
        assert!("MESSAGE".parse::<MessageKind>().is_err());
    }
}
