//! HTTP webhook delivery of ledger events.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use custos_core::error::{NotifyError, NotifyResult};
use custos_core::models::Tenant;
use custos_core::ports::{NotifyEvent, Notifier};
use custos_core::retry::RetryPolicy;

/// Configuration for webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry budget for one batch. Only unreachable callbacks and
    /// 429/5xx answers are retried.
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryPolicy {
                max_attempts: 3,
                ..Default::default()
            },
            user_agent: concat!("custos/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Body POSTed to the tenant callback.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    tenant_id: &'a str,
    events: &'a [NotifyEvent],
}

/// Notifier adapter POSTing JSON batches to `tenant.notify_url`.
pub struct WebhookNotifier {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> NotifyResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| NotifyError::Payload(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            retry: config.retry,
        })
    }

    async fn post(&self, url: &str, body: &[u8]) -> NotifyResult<()> {
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| NotifyError::Unreachable {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

fn encode_payload(tenant: &Tenant, events: &[NotifyEvent]) -> NotifyResult<Vec<u8>> {
    serde_json::to_vec(&WebhookPayload {
        tenant_id: tenant.id.as_str(),
        events,
    })
    .map_err(|e| NotifyError::Payload(e.to_string()))
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip_all, fields(tenant = %tenant.id, count = events.len()))]
    async fn notify(&self, tenant: &Tenant, events: &[NotifyEvent]) -> NotifyResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let body = encode_payload(tenant, events)?;
        let url = tenant.notify_url.as_str();
        let body = body.as_slice();

        self.retry
            .run("webhook", || self.post(url, body))
            .await
            .map_err(|failure| failure.error)?;

        debug!("Callback acknowledged");
        Ok(())
    }
}
