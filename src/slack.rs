//! Slack platform layer: thread history, identities, image downloads and
//! threaded replies, plus the Socket Mode listener.

pub mod client;
pub mod socket;

use crate::error::PlatformError;
use std::collections::HashMap;

/// One raw message out of a thread, as the platform reports it.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Author user id. Absent for system messages.
    pub user: Option<String>,
    pub text: String,
    pub ts: String,
    pub files: Vec<RawFile>,
}

/// A file reference attached to a raw message.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: Option<String>,
    pub mime_type: String,
    /// Authenticated `url_private` download URL.
    pub url: String,
}

/// Surface the mention pipeline needs from the messaging platform.
pub trait ThreadPlatform: Send + Sync {
    /// The bot's own user id. Available once `initialize()` has completed.
    fn bot_user_id(&self) -> Result<&str, PlatformError>;

    /// Every message in the thread including the root, in chronological
    /// order. An empty thread is an empty list, not an error.
    fn fetch_thread(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> impl std::future::Future<Output = Result<Vec<RawMessage>, PlatformError>> + Send;

    /// Batch-resolve display names. Ids that fail to resolve are simply
    /// absent from the result; the caller falls back to the raw id.
    fn resolve_user_names(
        &self,
        user_ids: &[String],
    ) -> impl std::future::Future<Output = HashMap<String, String>> + Send;

    /// Authenticated fetch of an image attachment. Non-2xx is an error.
    fn fetch_image_bytes(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, PlatformError>> + Send;

    /// Post text into the given thread.
    fn post_reply(
        &self,
        channel: &str,
        text: &str,
        thread_ts: &str,
    ) -> impl std::future::Future<Output = Result<(), PlatformError>> + Send;
}
