//! Webhook delivery: POSTs the finished report to the job's webhook URL.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use vulndash_core::{CompletionHook, Report, ScanJob, VulnError};

#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vulndash/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Deliver `report` and return the response status code.
    pub async fn deliver(&self, url: &str, report: &Report) -> Result<u16, VulnError> {
        let response = self
            .client
            .post(url)
            .json(report)
            .send()
            .await
            .map_err(|e| VulnError::Backend(format!("webhook delivery to {url} failed: {e}")))?;
        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl CompletionHook for WebhookNotifier {
    async fn on_complete(&self, job: &ScanJob, report: &Report) -> Result<(), VulnError> {
        let Some(url) = job.webhook.as_deref() else {
            return Ok(());
        };

        debug!(job_id = %job.id, %url, "delivering webhook");
        let status = self.deliver(url, report).await?;
        if !(200..300).contains(&status) {
            return Err(VulnError::Backend(format!(
                "webhook {url} responded with status {status}"
            )));
        }

        info!(job_id = %job.id, status, "webhook delivered");
        Ok(())
    }
}
