//! Email relay client

use super::{post_json, DeliveryStatus, FormSummary, PdfAttachment, RetryPolicy};
use serde::Serialize;

/// Relay endpoint path, appended to the configured API base
pub const SEND_PATH: &str = "/api/send-w9-email";

/// Body posted to the relay
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    pub submitter_name: String,
    pub form_data: FormSummary,
    pub pdf: PdfAttachment,
}

/// Posts completed forms to an HTTP email relay
pub struct EmailRelay {
    client: reqwest::Client,
    endpoint: Option<String>,
    retry: RetryPolicy,
}

impl EmailRelay {
    pub fn new(client: reqwest::Client, api_url: Option<String>, retry: RetryPolicy) -> Self {
        let endpoint = api_url
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty())
            .map(|base| format!("{}{}", base, SEND_PATH));
        Self {
            client,
            endpoint,
            retry,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub async fn send(&self, request: &EmailRequest) -> DeliveryStatus {
        let Some(endpoint) = &self.endpoint else {
            tracing::warn!("Email relay URL not configured, skipping email");
            return DeliveryStatus::skipped("email relay not configured");
        };

        let status = post_json(&self.client, endpoint, request, self.retry).await;
        match &status {
            DeliveryStatus::Delivered { attempts } => {
                tracing::info!(attempts, file = %request.pdf.filename, "W-9 email sent");
            }
            DeliveryStatus::Failed { reason, attempts } => {
                tracing::warn!(attempts, %reason, "W-9 email failed");
            }
            DeliveryStatus::Skipped { .. } => {}
        }
        status
    }
}
