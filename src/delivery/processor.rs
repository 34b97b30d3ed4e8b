//! Queue-consumer side of the split deployment: one POSTed task per mention
//! event, processed within the queue's execution budget.

use crate::MentionEvent;
use crate::gemini::Generator;
use crate::handler::MentionHandler;
use crate::slack::ThreadPlatform;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;

pub fn router<P, G>(handler: Arc<MentionHandler<P, G>>) -> Router
where
    P: ThreadPlatform + 'static,
    G: Generator + 'static,
{
    Router::new()
        .route("/tasks/mention", post(handle_task::<P, G>))
        .with_state(handler)
}

async fn handle_task<P, G>(
    State(handler): State<Arc<MentionHandler<P, G>>>,
    Json(event): Json<MentionEvent>,
) -> Response
where
    P: ThreadPlatform + 'static,
    G: Generator + 'static,
{
    match handler.handle(&event).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        // Non-2xx hands the event back to the queue's redelivery policy. The
        // thread has already received its error notice by this point.
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
    }
}
