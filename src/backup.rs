//! Best-effort backup trigger fired after a cleanup run

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Fire-and-forget backup hook. Callers log failures and never propagate
/// them; a cleanup run succeeds independently of its backup.
#[async_trait]
pub trait BackupTrigger: Send + Sync {
    async fn backup(&self) -> anyhow::Result<()>;
}

/// Triggers a backup by POSTing to a configured webhook, typically the
/// upload endpoint of an external backup service.
pub struct WebhookBackup {
    client: reqwest::Client,
    url: String,
}

impl WebhookBackup {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl BackupTrigger for WebhookBackup {
    async fn backup(&self) -> anyhow::Result<()> {
        info!(url = %self.url, "Requesting backup");

        let response = self.client.post(&self.url).send().await?;
        response.error_for_status()?;

        info!("Backup request accepted");
        Ok(())
    }
}
