//! Slack Web API client backed by slack-morphism.
//!
//! REST calls run through a bounded retry loop with capped, jittered
//! exponential backoff. Per-user lookups are the exception: a failed
//! `users.info` is swallowed so one odd account never sinks a request.

use crate::error::PlatformError;
use crate::slack::{RawFile, RawMessage, ThreadPlatform};

use anyhow::Context as _;
use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Max attempts for one Slack Web API call.
const API_MAX_ATTEMPTS: u32 = 3;
/// Max attempts for the startup `auth.test` identity resolution.
const INIT_MAX_ATTEMPTS: u32 = 5;
/// Base delay for exponential backoff between attempts.
const RETRY_BASE_DELAY_MS: u64 = 250;
/// Cap on any single backoff delay.
const RETRY_MAX_DELAY_MS: u64 = 4_000;
/// One page covers any realistic mention thread; Slack caps page size at 1000.
const THREAD_FETCH_LIMIT: u16 = 200;

/// Slack platform client.
pub struct SlackThreadClient {
    /// Shared HTTP client, constructed once and reused across all API calls.
    /// Holds a hyper connection pool internally; allocating one per call
    /// would discard that pool on every request.
    client: Arc<SlackHyperClient>,
    /// Pre-built API token wrapping `bot_token`. Created once alongside `client`.
    token: SlackApiToken,
    bot_token: String,
    /// Authenticated file downloads go through reqwest; slack-morphism has
    /// no raw-bytes fetch.
    http: reqwest::Client,
    /// The bot's own user id, resolved once via `auth.test`.
    bot_user_id: OnceCell<String>,
}

impl SlackThreadClient {
    pub fn new(bot_token: impl Into<String>) -> anyhow::Result<Self> {
        let bot_token = bot_token.into();
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("failed to create slack HTTP connector")?,
        ));
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.clone()));
        Ok(Self {
            client,
            token,
            bot_token,
            http: reqwest::Client::new(),
            bot_user_id: OnceCell::new(),
        })
    }

    /// Open a session against the cached client using the cached bot token.
    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }

    /// Resolve and cache the bot's own user id. Must complete before any
    /// mention is processed. The OnceCell makes the first load single-flight;
    /// every later call is a cheap cache hit.
    pub async fn initialize(&self) -> Result<(), PlatformError> {
        self.bot_user_id
            .get_or_try_init(|| async {
                let client = self.client.clone();
                let bot_token = self.bot_token.clone();
                let response = with_retries(
                    "auth.test",
                    INIT_MAX_ATTEMPTS,
                    is_retriable_slack_error,
                    move || {
                        let client = client.clone();
                        let bot_token = bot_token.clone();
                        async move {
                            let token = SlackApiToken::new(SlackApiTokenValue(bot_token));
                            let session = client.open_session(&token);
                            session.auth_test().await
                        }
                    },
                )
                .await?;
                let bot_user_id = response.user_id.0;
                tracing::info!(bot_user_id = %bot_user_id, "slack bot identity resolved");
                Ok::<_, PlatformError>(bot_user_id)
            })
            .await?;
        Ok(())
    }
}

impl ThreadPlatform for SlackThreadClient {
    fn bot_user_id(&self) -> Result<&str, PlatformError> {
        self.bot_user_id
            .get()
            .map(String::as_str)
            .ok_or(PlatformError::NotInitialized)
    }

    async fn fetch_thread(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<RawMessage>, PlatformError> {
        let client = self.client.clone();
        let bot_token = self.bot_token.clone();
        let channel_id = SlackChannelId(channel.to_string());
        let ts = SlackTs(thread_ts.to_string());

        let response = with_retries(
            "conversations.replies",
            API_MAX_ATTEMPTS,
            is_retriable_slack_error,
            move || {
                let client = client.clone();
                let bot_token = bot_token.clone();
                let request =
                    SlackApiConversationsRepliesRequest::new(channel_id.clone(), ts.clone())
                        .with_limit(THREAD_FETCH_LIMIT);
                async move {
                    let token = SlackApiToken::new(SlackApiTokenValue(bot_token));
                    let session = client.open_session(&token);
                    session.conversations_replies(&request).await
                }
            },
        )
        .await?;

        // conversations.replies returns the root first, oldest to newest.
        let messages: Vec<RawMessage> = response
            .messages
            .into_iter()
            .map(raw_message_from_history)
            .collect();
        tracing::debug!(channel, thread_ts, count = messages.len(), "fetched thread history");
        Ok(messages)
    }

    async fn resolve_user_names(&self, user_ids: &[String]) -> HashMap<String, String> {
        let lookups = user_ids.iter().map(|user_id| async move {
            let session = self.session();
            let request = SlackApiUsersInfoRequest::new(SlackUserId(user_id.clone()));
            match session.users_info(&request).await {
                Ok(info) => Some((user_id.clone(), display_name_for(&info.user, user_id))),
                Err(error) => {
                    tracing::warn!(
                        user_id = %user_id,
                        %error,
                        "users.info lookup failed, falling back to raw id"
                    );
                    None
                }
            }
        });
        futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn fetch_image_bytes(&self, url: &str) -> Result<Vec<u8>, PlatformError> {
        let response = self.http.get(url).bearer_auth(&self.bot_token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::ImageStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn post_reply(
        &self,
        channel: &str,
        text: &str,
        thread_ts: &str,
    ) -> Result<(), PlatformError> {
        let client = self.client.clone();
        let bot_token = self.bot_token.clone();
        let channel_id = SlackChannelId(channel.to_string());
        let ts = SlackTs(thread_ts.to_string());
        let text = text.to_string();

        with_retries(
            "chat.postMessage",
            API_MAX_ATTEMPTS,
            is_retriable_slack_error,
            move || {
                let client = client.clone();
                let bot_token = bot_token.clone();
                let request = SlackApiChatPostMessageRequest::new(
                    channel_id.clone(),
                    SlackMessageContent::new().with_text(text.clone()),
                )
                .opt_thread_ts(Some(ts.clone()));
                async move {
                    let token = SlackApiToken::new(SlackApiTokenValue(bot_token));
                    let session = client.open_session(&token);
                    session.chat_post_message(&request).await
                }
            },
        )
        .await?;
        tracing::info!(channel, thread_ts, "posted reply");
        Ok(())
    }
}

fn raw_message_from_history(message: SlackHistoryMessage) -> RawMessage {
    let files = message
        .content
        .files
        .as_ref()
        .map(|files| {
            files
                .iter()
                .filter_map(|file| {
                    let url = file.url_private.as_ref()?;
                    Some(RawFile {
                        name: file.name.clone(),
                        mime_type: file.mimetype.as_ref().map(|m| m.0.clone()).unwrap_or_default(),
                        url: url.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    RawMessage {
        user: message.sender.user.as_ref().map(|u| u.0.clone()),
        text: message.content.text.clone().unwrap_or_default(),
        ts: message.origin.ts.0.clone(),
        files,
    }
}

fn display_name_for(user: &SlackUser, user_id: &str) -> String {
    pick_display_name(
        user.profile.as_ref().and_then(|p| p.display_name.clone()),
        user.profile.as_ref().and_then(|p| p.real_name.clone()),
        user.name.clone(),
        user_id,
    )
}

/// Prefer the profile display name, then the real name, then the account
/// name, then the raw user id.
fn pick_display_name(
    display: Option<String>,
    real: Option<String>,
    account: Option<String>,
    user_id: &str,
) -> String {
    display
        .filter(|name| !name.trim().is_empty())
        .or_else(|| real.filter(|name| !name.trim().is_empty()))
        .or_else(|| account.filter(|name| !name.trim().is_empty()))
        .unwrap_or_else(|| user_id.to_string())
}

/// Run a platform call with bounded retries and capped, jittered exponential
/// backoff. `retriable` decides which errors are worth another attempt; the
/// rest surface immediately.
async fn with_retries<T, E, F, Fut>(
    method: &'static str,
    max_attempts: u32,
    retriable: fn(&E) -> bool,
    mut call: F,
) -> Result<T, PlatformError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if !retriable(&error) {
                    return Err(PlatformError::Api {
                        method,
                        message: error.to_string(),
                    });
                }
                if attempt >= max_attempts {
                    return Err(PlatformError::RetriesExhausted {
                        method,
                        attempts: attempt,
                        message: error.to_string(),
                    });
                }
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    method,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "slack call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Exponential backoff with a cap and uniform jitter, so concurrent requests
/// don't hit the API in lockstep after an outage.
fn backoff_delay(attempt: u32) -> Duration {
    use rand::Rng as _;
    let exp = RETRY_BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(RETRY_MAX_DELAY_MS);
    let jitter = rand::rng().random_range(0..=RETRY_BASE_DELAY_MS);
    Duration::from_millis(capped + jitter)
}

/// Slack Web API errors (`ok: false`) are terminal except for rate limiting;
/// transport-level failures are assumed transient.
fn is_retriable_slack_error(error: &SlackClientError) -> bool {
    match error {
        SlackClientError::ApiError(api) => api.to_string().contains("ratelimited"),
        _ => true,
    }
}
