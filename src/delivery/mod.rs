//! Delivery adapters for completed forms
//!
//! Three thin HTTP clients: the email relay, the lifecycle webhook and the
//! investor link generator. Configuration is handed to each adapter when it
//! is built; nothing reads the environment from here.

pub mod email;
pub mod link;
pub mod webhook;

pub use email::{EmailRelay, EmailRequest};
pub use link::{GeneratedLink, LinkGenerator};
pub use webhook::{Progress, Source, WebhookEvent, WebhookNotifier, WebhookPayload};

use crate::error::{Error, Result};
use crate::form::FormRecord;
use base64::Engine;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Record keys never sent to a delivery target
pub const PII_KEYS: [&str; 4] = ["ssn", "ein", "iraEin", "signature"];

/// Record keys renamed to the names the email relay and webhook consumers read
const WIRE_KEYS: [(&str, &str); 2] = [("personalName", "name"), ("entityName", "businessName")];

/// Form contents with TINs and the signature removed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormSummary(serde_json::Map<String, serde_json::Value>);

impl FormSummary {
    pub fn from_record(record: &FormRecord) -> Result<Self> {
        let mut map = match serde_json::to_value(record)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for key in PII_KEYS {
            map.remove(key);
        }
        for (field, wire) in WIRE_KEYS {
            if let Some(value) = map.remove(field) {
                map.insert(wire.to_string(), value);
            }
        }
        map.retain(|_, v| !v.is_null() && v.as_str() != Some(""));
        Ok(Self(map))
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// Filled PDF as sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PdfAttachment {
    pub base64: String,
    pub filename: String,
}

impl PdfAttachment {
    pub fn new(bytes: &[u8], filename: impl Into<String>) -> Self {
        Self {
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            filename: filename.into(),
        }
    }
}

/// Investor a tracked form link was issued for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Investor {
    pub email: String,
    pub name: String,
}

/// Which adapters a completed form goes to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPolicy {
    Email,
    Webhook,
    #[default]
    Both,
}

impl DeliveryPolicy {
    pub fn includes_email(&self) -> bool {
        matches!(self, DeliveryPolicy::Email | DeliveryPolicy::Both)
    }

    pub fn includes_webhook(&self) -> bool {
        matches!(self, DeliveryPolicy::Webhook | DeliveryPolicy::Both)
    }
}

impl FromStr for DeliveryPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(DeliveryPolicy::Email),
            "webhook" => Ok(DeliveryPolicy::Webhook),
            "both" => Ok(DeliveryPolicy::Both),
            other => Err(Error::InvalidInput {
                reason: format!("unknown delivery policy '{}'", other),
            }),
        }
    }
}

/// Outcome of one adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered { attempts: u32 },
    Skipped { reason: String },
    Failed { attempts: u32, reason: String },
}

impl DeliveryStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        DeliveryStatus::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered { .. })
    }
}

/// Per-adapter outcome of delivering one completed form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub email: DeliveryStatus,
    pub webhook: DeliveryStatus,
}

impl DeliveryReport {
    pub fn any_delivered(&self) -> bool {
        self.email.is_delivered() || self.webhook.is_delivered()
    }
}

/// Adapter settings, built from server configuration
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub api_url: Option<String>,
    pub webhook_url: Option<String>,
    pub form_base_url: String,
    pub anonymous_recipient: Option<String>,
    pub policy: DeliveryPolicy,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            webhook_url: None,
            form_base_url: link::DEFAULT_FORM_BASE_URL.to_string(),
            anonymous_recipient: None,
            policy: DeliveryPolicy::Both,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// The three adapters plus the policy that picks between them
pub struct Delivery {
    pub email: EmailRelay,
    pub webhook: WebhookNotifier,
    pub links: LinkGenerator,
    policy: DeliveryPolicy,
}

impl Delivery {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::HttpRequest)?;
        let retry = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff,
        };
        let links = LinkGenerator::new(&config.form_base_url)?;

        Ok(Self {
            email: EmailRelay::new(client.clone(), config.api_url.clone(), retry),
            webhook: WebhookNotifier::new(
                client,
                config.webhook_url.clone(),
                config.anonymous_recipient.clone(),
                links.clone(),
                retry,
            ),
            links,
            policy: config.policy,
        })
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    /// Send a completed form to every adapter the policy selects.
    ///
    /// `investor` is `Some` for forms opened through a tracked link.
    pub async fn deliver_completed(
        &self,
        investor: Option<&Investor>,
        submitter_name: &str,
        summary: &FormSummary,
        pdf: &PdfAttachment,
    ) -> DeliveryReport {
        let email = async {
            if !self.policy.includes_email() {
                return DeliveryStatus::skipped("excluded by delivery policy");
            }
            self.email
                .send(&EmailRequest {
                    submitter_name: submitter_name.to_string(),
                    form_data: summary.clone(),
                    pdf: pdf.clone(),
                })
                .await
        };
        let webhook = async {
            if !self.policy.includes_webhook() {
                return DeliveryStatus::skipped("excluded by delivery policy");
            }
            let payload = self
                .webhook
                .payload(WebhookEvent::Completed, investor, submitter_name)
                .with_form_data(summary.clone())
                .with_pdf(pdf.clone());
            self.webhook.send(&payload).await
        };

        let (email, webhook) = tokio::join!(email, webhook);
        tracing::info!(email = ?email, webhook = ?webhook, "Delivered completed W-9");
        DeliveryReport { email, webhook }
    }
}

/// Retry settings shared by the HTTP adapters
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// POST a JSON body, retrying connection failures, 429 and 5xx with
/// exponential backoff. Other 4xx responses fail at once.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
    retry: RetryPolicy,
) -> DeliveryStatus {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let reason = match client.post(url).json(body).send().await {
            Ok(response) if response.status().is_success() => {
                return DeliveryStatus::Delivered { attempts: attempt };
            }
            Ok(response) => {
                let status = response.status();
                let retryable = status.is_server_error() || status.as_u16() == 429;
                if !retryable {
                    return DeliveryStatus::Failed {
                        attempts: attempt,
                        reason: format!("target responded with {}", status),
                    };
                }
                format!("target responded with {}", status)
            }
            Err(e) => format!("request failed: {}", e),
        };

        if attempt >= retry.max_attempts {
            return DeliveryStatus::Failed {
                attempts: attempt,
                reason,
            };
        }
        tracing::warn!(attempt, %reason, "Delivery attempt failed, retrying");
        tokio::time::sleep(retry.backoff * 2u32.saturating_pow(attempt - 1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{AccountType, Signature};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_summary_strips_tins_and_signature() {
        let record = FormRecord {
            account_type: Some(AccountType::Ira),
            personal_name: "Pat Doe".to_string(),
            ssn: "123-45-6789".to_string(),
            ein: "12-3456789".to_string(),
            ira_ein: "55-1234567".to_string(),
            signature: Some(Signature::Typed("Pat Doe".to_string())),
            ..FormRecord::default()
        };
        let summary = FormSummary::from_record(&record).unwrap();
        for key in PII_KEYS {
            assert!(!summary.contains_key(key), "{} leaked", key);
        }
        assert_eq!(summary.get("name").unwrap(), "Pat Doe");
        assert!(!summary.contains_key("personalName"));
        assert_eq!(summary.get("accountType").unwrap(), "ira");

        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("6789"));
        assert!(!json.contains("1234567"));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("EMAIL".parse::<DeliveryPolicy>().unwrap(), DeliveryPolicy::Email);
        assert_eq!(" both ".parse::<DeliveryPolicy>().unwrap(), DeliveryPolicy::Both);
        assert!("fax".parse::<DeliveryPolicy>().is_err());
        assert!(!DeliveryPolicy::Webhook.includes_email());
        assert!(DeliveryPolicy::Both.includes_webhook());
    }

    #[test]
    fn test_attachment_is_base64() {
        let pdf = PdfAttachment::new(b"%PDF", "W9_2024-01-01.pdf");
        assert_eq!(pdf.base64, "JVBERg==");
    }

    #[tokio::test]
    async fn test_unconfigured_adapters_are_skipped() {
        let delivery = Delivery::new(&DeliveryConfig::default()).unwrap();
        let report = delivery
            .deliver_completed(
                None,
                "Pat Doe",
                &FormSummary::default(),
                &PdfAttachment::new(b"%PDF", "W9.pdf"),
            )
            .await;
        assert!(matches!(report.email, DeliveryStatus::Skipped { .. }));
        assert!(matches!(report.webhook, DeliveryStatus::Skipped { .. }));
        assert!(!report.any_delivered());
    }
}
