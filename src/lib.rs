//! Gembot: a Slack mention bot that answers with Gemini, full thread context
//! and attached images included.

pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod gemini;
pub mod handler;
pub mod slack;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Inbound mention notification, as relayed by the platform directly
/// (Socket Mode) or via a queue message body (receiver/processor pair).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionEvent {
    pub channel: String,
    pub user: String,
    pub text: String,
    pub ts: String,
    /// Absent when the mention itself roots a new thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

impl MentionEvent {
    /// Timestamp identifying the thread this mention belongs to.
    pub fn thread_root(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

/// Who authored a conversation message, from the model's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Bot,
}

/// One unit of thread history, immutable once built and scoped to a single
/// request.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: Role,
    pub display_name: String,
    pub text: String,
    pub images: Vec<AttachedImage>,
}

/// Reference to an image attachment. Every `Remote` reference is resolved to
/// `Inline` before the content sequence is handed to the generation client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachedImage {
    Remote { url: String, mime_type: String },
    Inline { data: String, mime_type: String },
}

/// The atomic item of model input: a labelled text body, or one inline
/// base64-encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUnit {
    Text(String),
    InlineImage { data: String, mime_type: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_root_prefers_thread_ts() {
        let event = MentionEvent {
            channel: "C1".into(),
            user: "U1".into(),
            text: "hello".into(),
            ts: "2.0".into(),
            thread_ts: Some("1.0".into()),
        };
        assert_eq!(event.thread_root(), "1.0");
    }

    #[test]
    fn thread_root_falls_back_to_ts() {
        let event = MentionEvent {
            channel: "C1".into(),
            user: "U1".into(),
            text: "hello".into(),
            ts: "2.0".into(),
            thread_ts: None,
        };
        assert_eq!(event.thread_root(), "2.0");
    }

    #[test]
    fn mention_event_round_trips_through_json() {
        let event = MentionEvent {
            channel: "C1".into(),
            user: "U1".into(),
            text: "<@UBOT> hi".into(),
            ts: "1717171717.000100".into(),
            thread_ts: None,
        };
        let encoded = serde_json::to_string(&event).expect("serializes");
        assert!(!encoded.contains("thread_ts"));
        let decoded: MentionEvent = serde_json::from_str(&encoded).expect("deserializes");
        assert_eq!(decoded.channel, "C1");
        assert_eq!(decoded.thread_ts, None);
    }
}
