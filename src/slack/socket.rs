//! Socket Mode listener: turns Slack `app_mention` push events into
//! [`MentionEvent`]s on an mpsc channel.

use crate::MentionEvent;

use anyhow::Context as _;
use slack_morphism::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;

/// State shared with socket mode callbacks via `SlackClientEventsUserState`.
struct SocketState {
    mention_tx: mpsc::Sender<MentionEvent>,
    bot_user_id: String,
}

/// Handle for stopping the listener. Dropping it does not stop anything;
/// call [`SocketHandle::shutdown`] for a clean stop.
pub struct SocketHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SocketHandle {
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Connect to Slack over Socket Mode and stream mention events.
pub async fn start(
    app_token: &str,
    bot_user_id: &str,
) -> crate::Result<(mpsc::Receiver<MentionEvent>, SocketHandle)> {
    let (mention_tx, mention_rx) = mpsc::channel(256);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let state = Arc::new(SocketState {
        mention_tx,
        bot_user_id: bot_user_id.to_string(),
    });

    let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

    // The socket mode listener owns its own client: it manages a persistent
    // WebSocket connection for the lifetime of the process.
    let listener_client = Arc::new(SlackClient::new(
        SlackClientHyperConnector::new()
            .context("failed to create slack socket mode connector")?,
    ));

    let listener_environment = Arc::new(
        SlackClientEventsListenerEnvironment::new(listener_client)
            .with_error_handler(socket_error_handler)
            .with_user_state(state),
    );

    let listener = SlackClientSocketModeListener::new(
        &SlackClientSocketModeConfig::new(),
        listener_environment,
        callbacks,
    );

    let app_token = SlackApiToken::new(SlackApiTokenValue(app_token.to_string()));

    tokio::spawn(async move {
        if let Err(error) = listener.listen_for(&app_token).await {
            tracing::error!(%error, "failed to start slack socket mode listener");
            return;
        }

        tracing::info!("slack socket mode connected");

        tokio::select! {
            exit_code = listener.serve() => {
                tracing::info!(exit_code, "slack socket mode listener stopped");
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("slack socket mode shutting down");
                listener.shutdown().await;
            }
        }
    });

    Ok((mention_rx, SocketHandle { shutdown_tx }))
}

async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> UserCallbackResult<()> {
    let SlackEventCallbackBody::AppMention(mention) = event.event else {
        return Ok(());
    };

    let state_guard = states.read().await;
    let state = state_guard
        .get_user_state::<Arc<SocketState>>()
        .expect("SocketState must be in user_state");

    let user = mention.user.0.clone();
    if user == state.bot_user_id {
        return Ok(()); // ignore self
    }

    let event = MentionEvent {
        channel: mention.channel.0.clone(),
        user,
        text: mention.content.text.clone().unwrap_or_default(),
        ts: mention.origin.ts.0.clone(),
        thread_ts: mention.origin.thread_ts.as_ref().map(|t| t.0.clone()),
    };

    tracing::debug!(channel = %event.channel, user = %event.user, "received app_mention");

    if let Err(error) = state.mention_tx.send(event).await {
        tracing::warn!(%error, "failed to forward mention event");
    }

    Ok(())
}

fn socket_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    tracing::warn!(error = %err, "slack socket mode error");
    HttpStatusCode::OK
}
