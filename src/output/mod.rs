//! Output adapter contracts (C13). The core depends only on these traits —
//! no Bot API or Telegraph API wire format is implemented here, mirroring
//! the capability-interface shape used for Source Adapters (C6), applied
//! symmetrically to the emission side.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct DigestMessage {
    pub category: String,
    pub text: String,
}

/// Accepts a digest message bound for Telegram. Implementations are
/// responsible for the 4096-char split and rate-limit backoff described in
/// the output contract; this trait only carries the logical send.
#[async_trait]
pub trait DigestSink: Send + Sync {
    async fn send_digest(&self, message: &DigestMessage) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct PageBlock {
    pub heading: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub title: String,
    pub blocks: Vec<PageBlock>,
}

/// Accepts a long-form page bound for Telegraph-like publishing. Returns
/// the canonical published URL.
#[async_trait]
pub trait PageSink: Send + Sync {
    async fn publish_page(&self, page: &Page) -> anyhow::Result<String>;
}

/// Records everything it would have sent instead of performing I/O — used
/// by orchestrator tests and by deployments that haven't configured real
/// output credentials yet.
#[derive(Default)]
pub struct RecordingSink {
    pub digests: tokio::sync::Mutex<Vec<DigestMessage>>,
    pub pages: tokio::sync::Mutex<Vec<Page>>,
}

#[async_trait]
impl DigestSink for RecordingSink {
    async fn send_digest(&self, message: &DigestMessage) -> anyhow::Result<()> {
        self.digests.lock().await.push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl PageSink for RecordingSink {
    async fn publish_page(&self, page: &Page) -> anyhow::Result<String> {
        let mut pages = self.pages.lock().await;
        let url = format!("https://telegra.ph/recorded-{}", pages.len());
        pages.push(page.clone());
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sink_stores_digests_and_pages() {
        let sink = RecordingSink::default();
        sink.send_digest(&DigestMessage { category: "tech".to_string(), text: "hello".to_string() })
            .await
            .unwrap();
        let url = sink
            .publish_page(&Page { title: "Daily".to_string(), blocks: vec![] })
            .await
            .unwrap();
        assert_eq!(sink.digests.lock().await.len(), 1);
        assert!(url.starts_with("https://telegra.ph/"));
    }
}
