//! Stream Messages
//!
//! Inbound frames are text. A frame that parses as a JSON object is treated
//! as structured: its `type`, `data` and `timestamp` fields are used as-is.
//! Anything else (plain log lines, JSON scalars, truncated JSON) is wrapped
//! into a generic message tagged [`DEFAULT_MESSAGE_TYPE`] whose payload is
//! the raw frame text. Frames are never dropped.
//!
//! Outbound control frames understood by the log server are modelled by
//! [`ControlMessage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag given to frames that carry no structured `type`
pub const DEFAULT_MESSAGE_TYPE: &str = "message";

/// A single unit of data delivered from a stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Free-form type tag (`log`, `build_status`, ... or `message`)
    #[serde(rename = "type")]
    pub message_type: String,

    /// Payload: the frame's `data` field, the whole object when there is
    /// no `data` field, or the raw text for unstructured frames
    pub data: Value,

    /// Sender-supplied timestamp, verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    /// When the frame was received locally
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Build a message from a raw inbound frame, stamped with the current time
    #[must_use]
    pub fn from_frame(raw: &str) -> Self {
        Self::from_frame_at(raw, Utc::now())
    }

    /// Build a message from a raw inbound frame with an explicit receipt time
    #[must_use]
    pub fn from_frame_at(raw: &str, received_at: DateTime<Utc>) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(mut fields)) => {
                let message_type = match fields.get("type") {
                    Some(Value::String(tag)) => tag.clone(),
                    _ => DEFAULT_MESSAGE_TYPE.to_string(),
                };
                let timestamp = fields.get("timestamp").cloned();
                let data = match fields.remove("data") {
                    Some(data) => data,
                    None => Value::Object(fields),
                };

                Self {
                    message_type,
                    data,
                    timestamp,
                    received_at,
                }
            }
            _ => {
                tracing::trace!(len = raw.len(), "Unstructured frame, wrapping as text");
                Self::text_at(raw, received_at)
            }
        }
    }

    /// Wrap raw text as a generic message
    #[must_use]
    pub fn text_at(raw: &str, received_at: DateTime<Utc>) -> Self {
        Self {
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            data: Value::String(raw.to_string()),
            timestamp: None,
            received_at,
        }
    }

    /// Classify the type tag
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        MessageKind::from_tag(&self.message_type)
    }

    /// The payload as text, when it is a string
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.data.as_str()
    }

    /// Best-effort human-readable line for this message
    ///
    /// Log frames from the server carry the line under `message`; build and
    /// error frames usually do too. Falls back to compact JSON.
    #[must_use]
    pub fn display_line(&self) -> String {
        if let Some(text) = self.text() {
            return text.to_string();
        }
        if let Some(line) = self.data.get("message").and_then(Value::as_str) {
            return line.to_string();
        }
        self.data.to_string()
    }
}

/// Known message types emitted by the log server
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Unstructured or untagged frame
    Generic,
    /// One container log line
    Log,
    /// Build progress update
    BuildStatus,
    /// Docker system information snapshot
    SystemStatus,
    /// Acknowledgement of a `subscribe` request
    SubscriptionConfirmed,
    /// Acknowledgement of an `unsubscribe` request
    UnsubscriptionConfirmed,
    /// Reply to a `ping`
    Pong,
    /// Reply to `get_status`
    Status,
    /// Server-side error report
    Error,
    /// Any other tag
    Other(String),
}

impl MessageKind {
    /// Classify a type tag
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            DEFAULT_MESSAGE_TYPE => Self::Generic,
            "log" => Self::Log,
            "build_status" => Self::BuildStatus,
            "system_status" => Self::SystemStatus,
            "subscription_confirmed" => Self::SubscriptionConfirmed,
            "unsubscription_confirmed" => Self::UnsubscriptionConfirmed,
            "pong" => Self::Pong,
            "status" => Self::Status,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this message is protocol chatter rather than stream content
    ///
    /// `status` replies answer an explicit request and are not chatter.
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionConfirmed | Self::UnsubscriptionConfirmed | Self::Pong
        )
    }
}

/// Control frames the client may send to the log server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Join a broadcast channel (e.g. `container_events`)
    Subscribe {
        /// Channel name
        channel: String,
    },
    /// Leave a broadcast channel
    Unsubscribe {
        /// Channel name
        channel: String,
    },
    /// Liveness probe; answered with `pong`
    Ping,
    /// Ask for connection id and subscribed channels
    GetStatus,
}

impl ControlMessage {
    /// Serialize to the text frame sent on the wire
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
