//! Fast-ack Slack Events API receiver: verify the request signature, answer
//! the URL-verification challenge, and enqueue `app_mention` events.
//!
//! The ack must beat Slack's retry timer; generation happens in the
//! processor once the queue delivers the event there.

use crate::MentionEvent;
use crate::delivery::queue::TaskQueue;
use crate::delivery::signature;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;

pub struct ReceiverState<Q> {
    pub signing_secret: String,
    pub queue: Q,
}

pub fn router<Q: TaskQueue + 'static>(state: Arc<ReceiverState<Q>>) -> Router {
    Router::new()
        .route("/slack/events", post(handle_events::<Q>))
        .with_state(state)
}

async fn handle_events<Q: TaskQueue + 'static>(
    State(state): State<Arc<ReceiverState<Q>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let timestamp = header_str(&headers, "x-slack-request-timestamp");
    let provided = header_str(&headers, "x-slack-signature");
    let body_str = std::str::from_utf8(&body).unwrap_or("");

    if !signature::verify(
        &state.signing_secret,
        timestamp,
        body_str,
        provided,
        signature::unix_now(),
    ) {
        tracing::warn!("rejected slack event: bad signature or stale timestamp");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(%error, "slack event body is not valid JSON");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    // URL verification challenge handshake.
    if payload["type"] == "url_verification" {
        let challenge = payload["challenge"].as_str().unwrap_or("").to_string();
        return Json(serde_json::json!({ "challenge": challenge })).into_response();
    }

    if payload["type"] == "event_callback" {
        if let Some(event) = extract_mention(&payload["event"]) {
            if let Err(error) = state.queue.enqueue(&event).await {
                tracing::error!(%error, "failed to enqueue mention event");
                // Non-2xx so Slack redelivers instead of dropping the event.
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            tracing::info!(channel = %event.channel, ts = %event.ts, "mention event accepted");
        }
    }

    StatusCode::OK.into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// Pull a [`MentionEvent`] out of an `app_mention` event callback. Edits and
/// deletes carry a `subtype` and are ignored, as are authorless events.
fn extract_mention(event: &Value) -> Option<MentionEvent> {
    if event["type"].as_str() != Some("app_mention") {
        return None;
    }
    if event["subtype"].is_string() {
        return None;
    }
    let user = event["user"].as_str()?;
    let channel = event["channel"].as_str()?;
    let ts = event["ts"].as_str()?;
    Some(MentionEvent {
        channel: channel.to_string(),
        user: user.to_string(),
        text: event["text"].as_str().unwrap_or_default().to_string(),
        ts: ts.to_string(),
        thread_ts: event["thread_ts"].as_str().map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_a_threaded_mention() {
        let event = json!({
            "type": "app_mention",
            "user": "U1",
            "channel": "C1",
            "text": "<@UBOT> what is this?",
            "ts": "2.0",
            "thread_ts": "1.0"
        });
        let mention = extract_mention(&event).expect("mention extracted");
        assert_eq!(mention.channel, "C1");
        assert_eq!(mention.user, "U1");
        assert_eq!(mention.ts, "2.0");
        assert_eq!(mention.thread_ts.as_deref(), Some("1.0"));
    }

    #[test]
    fn mention_without_thread_ts_roots_its_own_thread() {
        let event = json!({
            "type": "app_mention",
            "user": "U1",
            "channel": "C1",
            "text": "<@UBOT> hi",
            "ts": "3.0"
        });
        let mention = extract_mention(&event).expect("mention extracted");
        assert_eq!(mention.thread_ts, None);
        assert_eq!(mention.thread_root(), "3.0");
    }

    #[test]
    fn other_event_types_are_ignored() {
        let event = json!({
            "type": "reaction_added",
            "user": "U1",
            "channel": "C1",
            "ts": "3.0"
        });
        assert!(extract_mention(&event).is_none());
    }

    #[test]
    fn subtyped_events_are_ignored() {
        let event = json!({
            "type": "app_mention",
            "subtype": "message_changed",
            "user": "U1",
            "channel": "C1",
            "ts": "3.0"
        });
        assert!(extract_mention(&event).is_none());
    }

    #[test]
    fn authorless_events_are_ignored() {
        let event = json!({
            "type": "app_mention",
            "channel": "C1",
            "ts": "3.0"
        });
        assert!(extract_mention(&event).is_none());
    }
}
