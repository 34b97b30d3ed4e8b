//! Task queue seam between the receiver and the processor.

use crate::MentionEvent;

use anyhow::Context as _;

/// Hand a mention event to the queueing layer for asynchronous processing.
pub trait TaskQueue: Send + Sync {
    fn enqueue(
        &self,
        event: &MentionEvent,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// Push-queue implementation: POSTs the event to the processor's task
/// endpoint. In deployment a managed queue sits between the two and owns
/// redelivery; locally this can point straight at the processor.
pub struct HttpTaskQueue {
    http: reqwest::Client,
    target_url: String,
}

impl HttpTaskQueue {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            target_url: target_url.into(),
        }
    }
}

impl TaskQueue for HttpTaskQueue {
    async fn enqueue(&self, event: &MentionEvent) -> anyhow::Result<()> {
        let response = self
            .http
            .post(&self.target_url)
            .json(event)
            .send()
            .await
            .context("failed to reach task queue target")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("task queue target answered HTTP {status}");
        }
        tracing::debug!(channel = %event.channel, ts = %event.ts, "mention event enqueued");
        Ok(())
    }
}
