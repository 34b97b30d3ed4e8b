//! Thread-to-prompt assembly: raw Slack messages become an ordered sequence
//! of role-tagged content units.
//!
//! There is one path for every thread; text-only threads simply produce
//! zero image units.

use crate::slack::{RawMessage, ThreadPlatform};
use crate::{AttachedImage, ContentUnit, ConversationMessage, Role};

use base64::Engine as _;
use std::collections::HashMap;

/// Fixed author label for the bot's own prior replies.
pub const BOT_LABEL: &str = "Assistant";

/// Placeholder label for messages with no resolvable author.
const UNKNOWN_AUTHOR: &str = "unknown";

/// Translate raw thread messages into conversation messages: derive each
/// author's role by comparing against the bot's own id, resolve a label,
/// strip self-mention markup, and keep only image attachments.
pub fn conversation_from_thread(
    messages: &[RawMessage],
    bot_user_id: &str,
    names: &HashMap<String, String>,
) -> Vec<ConversationMessage> {
    messages
        .iter()
        .map(|message| {
            let role = match &message.user {
                Some(user) if user == bot_user_id => Role::Bot,
                _ => Role::Human,
            };
            let display_name = match (&role, &message.user) {
                (Role::Bot, _) => BOT_LABEL.to_string(),
                (Role::Human, Some(user)) => {
                    names.get(user).cloned().unwrap_or_else(|| user.clone())
                }
                (Role::Human, None) => UNKNOWN_AUTHOR.to_string(),
            };
            let images = message
                .files
                .iter()
                .filter(|file| is_image_mime(&file.mime_type))
                .map(|file| AttachedImage::Remote {
                    url: file.url.clone(),
                    mime_type: file.mime_type.clone(),
                })
                .collect();
            ConversationMessage {
                role,
                display_name,
                text: strip_bot_mention(&message.text, bot_user_id),
                images,
            }
        })
        .collect()
}

/// Fetch every remote image reference and replace it with an inline base64
/// payload. A failed fetch drops that image only; the rest of the request
/// proceeds. Fetches within one message run concurrently.
pub async fn resolve_images<P: ThreadPlatform>(
    platform: &P,
    messages: Vec<ConversationMessage>,
) -> Vec<ConversationMessage> {
    let mut resolved = Vec::with_capacity(messages.len());
    for mut message in messages {
        let fetches = message
            .images
            .into_iter()
            .map(|image| resolve_image(platform, image));
        message.images = futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect();
        resolved.push(message);
    }
    resolved
}

async fn resolve_image<P: ThreadPlatform>(
    platform: &P,
    image: AttachedImage,
) -> Option<AttachedImage> {
    match image {
        AttachedImage::Inline { .. } => Some(image),
        AttachedImage::Remote { url, mime_type } => {
            match platform.fetch_image_bytes(&url).await {
                Ok(bytes) => Some(AttachedImage::Inline {
                    data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                    mime_type,
                }),
                Err(error) => {
                    tracing::warn!(url = %url, %error, "image fetch failed, dropping attachment");
                    None
                }
            }
        }
    }
}

/// One text unit per message, immediately followed by that message's image
/// units, in thread order. The model relies on this positional structure to
/// resolve references like "the receipt above".
pub fn content_sequence(messages: &[ConversationMessage]) -> Vec<ContentUnit> {
    let mut units = Vec::new();
    for message in messages {
        units.push(ContentUnit::Text(format!(
            "{}: {}",
            message.display_name, message.text
        )));
        for image in &message.images {
            match image {
                AttachedImage::Inline { data, mime_type } => units.push(ContentUnit::InlineImage {
                    data: data.clone(),
                    mime_type: mime_type.clone(),
                }),
                AttachedImage::Remote { url, .. } => {
                    // Unresolved references never reach the model.
                    tracing::debug!(url = %url, "skipping unresolved image reference");
                }
            }
        }
    }
    units
}

fn is_image_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// Remove any `<@BOT_USER_ID>` mention from text and trim whitespace.
fn strip_bot_mention(text: &str, bot_user_id: &str) -> String {
    text.replace(&format!("<@{}>", bot_user_id), "")
        .trim()
        .to_string()
}
