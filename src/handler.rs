//! Per-mention orchestration: fetch thread → assemble content → generate →
//! post reply.

use crate::MentionEvent;
use crate::context;
use crate::error::{Error, Result};
use crate::gemini::Generator;
use crate::slack::{RawMessage, ThreadPlatform};

use std::collections::HashSet;
use std::sync::Arc;

/// Orchestrates one mention event end to end. Stateless between events, so a
/// single instance serves any number of concurrent mentions.
pub struct MentionHandler<P, G> {
    platform: Arc<P>,
    generator: Arc<G>,
}

impl<P: ThreadPlatform, G: Generator> MentionHandler<P, G> {
    pub fn new(platform: Arc<P>, generator: Arc<G>) -> Self {
        Self {
            platform,
            generator,
        }
    }

    /// Handle one mention event. On failure a best-effort error notice is
    /// posted into the same thread, and the original error is still returned
    /// so the caller's redelivery policy can act on it. Redelivered events
    /// are processed again from scratch and may post a duplicate reply;
    /// there is no dedup by event id.
    pub async fn handle(&self, event: &MentionEvent) -> Result<()> {
        let thread_ts = event.thread_root();
        match self.respond(event, thread_ts).await {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::error!(
                    channel = %event.channel,
                    thread_ts,
                    %error,
                    "mention handling failed"
                );
                let notice = format!("Sorry, I couldn't put a reply together: {error}");
                if let Err(notice_error) = self
                    .platform
                    .post_reply(&event.channel, &notice, thread_ts)
                    .await
                {
                    tracing::error!(%notice_error, "failed to post error notice, giving up");
                }
                Err(error)
            }
        }
    }

    async fn respond(&self, event: &MentionEvent, thread_ts: &str) -> Result<()> {
        let mut messages = self
            .platform
            .fetch_thread(&event.channel, thread_ts)
            .await
            .map_err(Error::from)?;
        if messages.is_empty() {
            // The platform reported an empty thread; answer the mention text
            // itself rather than sending the model an empty prompt.
            tracing::warn!(
                channel = %event.channel,
                thread_ts,
                "thread fetch returned no messages, using mention text"
            );
            messages.push(RawMessage {
                user: Some(event.user.clone()),
                text: event.text.clone(),
                ts: event.ts.clone(),
                files: Vec::new(),
            });
        }

        let bot_user_id = self.platform.bot_user_id()?.to_string();

        let author_ids = unique_author_ids(&messages, &bot_user_id);
        let names = self.platform.resolve_user_names(&author_ids).await;

        let conversation = context::conversation_from_thread(&messages, &bot_user_id, &names);
        let conversation = context::resolve_images(self.platform.as_ref(), conversation).await;
        let units = context::content_sequence(&conversation);

        tracing::debug!(
            messages = messages.len(),
            units = units.len(),
            "content sequence assembled"
        );

        let reply = self.generator.generate(&units).await.map_err(Error::from)?;
        let reply = if reply.trim().is_empty() {
            // A valid empty model reply still produces a visible message.
            "(The model returned an empty reply.)".to_string()
        } else {
            reply
        };

        self.platform
            .post_reply(&event.channel, &reply, thread_ts)
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

/// Distinct human author ids, in first-seen order. The bot's own id is
/// excluded; its label is fixed and never looked up.
fn unique_author_ids(messages: &[RawMessage], bot_user_id: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    messages
        .iter()
        .filter_map(|message| message.user.clone())
        .filter(|user| user != bot_user_id)
        .filter(|user| seen.insert(user.clone()))
        .collect()
}
