//! Form lifecycle webhook

use super::link::LinkGenerator;
use super::{post_json, DeliveryStatus, FormSummary, Investor, PdfAttachment, RetryPolicy};
use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};

/// Lifecycle event reported to the webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, JsonSchema)]
pub enum WebhookEvent {
    #[serde(rename = "form.opened")]
    Opened,
    #[serde(rename = "form.started")]
    Started,
    #[serde(rename = "form.progress")]
    Progress,
    #[serde(rename = "form.completed")]
    Completed,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::Opened => "form.opened",
            WebhookEvent::Started => "form.started",
            WebhookEvent::Progress => "form.progress",
            WebhookEvent::Completed => "form.completed",
        }
    }
}

impl Serialize for WebhookEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Whether the form was opened through an investor link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Tracked,
    Anonymous,
}

/// Wizard position for `form.progress`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_step: u32,
    pub total_steps: u32,
    pub step_name: String,
    pub percent_complete: u32,
}

impl Progress {
    pub fn new(current_step: u32, total_steps: u32, step_name: impl Into<String>) -> Self {
        let percent_complete = if total_steps == 0 {
            0
        } else {
            let ratio = f64::from(current_step.min(total_steps)) / f64::from(total_steps);
            (ratio * 100.0).round() as u32
        };
        Self {
            current_step,
            total_steps,
            step_name: step_name.into(),
            percent_complete,
        }
    }
}

/// JSON body posted for every lifecycle event.
///
/// Never carries TINs or the signature: form data goes in as a
/// [`FormSummary`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub timestamp: String,
    pub source: Source,
    pub investor: Investor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_to: Option<String>,
    pub form_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_data: Option<FormSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf: Option<PdfAttachment>,
}

impl WebhookPayload {
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_form_data(mut self, form_data: FormSummary) -> Self {
        self.form_data = Some(form_data);
        self
    }

    pub fn with_pdf(mut self, pdf: PdfAttachment) -> Self {
        self.pdf = Some(pdf);
        self
    }

    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.timestamp = when.to_rfc3339_opts(SecondsFormat::Millis, true);
        self
    }
}

/// Posts lifecycle events to the configured webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
    anonymous_recipient: Option<String>,
    links: LinkGenerator,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(
        client: reqwest::Client,
        url: Option<String>,
        anonymous_recipient: Option<String>,
        links: LinkGenerator,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            url: url.filter(|u| !u.trim().is_empty()),
            anonymous_recipient: anonymous_recipient.filter(|r| !r.trim().is_empty()),
            links,
            retry,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Payload skeleton for `event`.
    ///
    /// With an investor the payload is `tracked` and carries that investor's
    /// form link. Without one it is `anonymous`: the investor is the submitter
    /// as far as known, the link is empty and `sendTo` names the operator's
    /// fallback recipient.
    pub fn payload(
        &self,
        event: WebhookEvent,
        investor: Option<&Investor>,
        submitter_name: &str,
    ) -> WebhookPayload {
        let (source, investor, form_link, send_to) = match investor {
            Some(investor) => (
                Source::Tracked,
                investor.clone(),
                self.links.link_for(investor),
                None,
            ),
            None => (
                Source::Anonymous,
                Investor {
                    email: String::new(),
                    name: submitter_name.trim().to_string(),
                },
                String::new(),
                self.anonymous_recipient.clone(),
            ),
        };

        WebhookPayload {
            event,
            timestamp: String::new(),
            source,
            investor,
            send_to,
            form_link,
            progress: None,
            form_data: None,
            pdf: None,
        }
        .at(Utc::now())
    }

    pub fn opened(&self, investor: Option<&Investor>) -> WebhookPayload {
        self.payload(WebhookEvent::Opened, investor, "")
    }

    pub fn started(&self, investor: Option<&Investor>) -> WebhookPayload {
        self.payload(WebhookEvent::Started, investor, "")
    }

    pub fn progress(&self, investor: Option<&Investor>, progress: Progress) -> WebhookPayload {
        self.payload(WebhookEvent::Progress, investor, "")
            .with_progress(progress)
    }

    pub async fn send(&self, payload: &WebhookPayload) -> DeliveryStatus {
        let Some(url) = &self.url else {
            tracing::warn!(event = payload.event.as_str(), "Webhook URL not configured, skipping");
            return DeliveryStatus::skipped("webhook not configured");
        };

        let status = post_json(&self.client, url, payload, self.retry).await;
        match &status {
            DeliveryStatus::Delivered { attempts } => {
                tracing::info!(event = payload.event.as_str(), attempts, "Webhook sent");
            }
            DeliveryStatus::Failed { reason, attempts } => {
                tracing::warn!(event = payload.event.as_str(), attempts, %reason, "Webhook failed");
            }
            DeliveryStatus::Skipped { .. } => {}
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::link::DEFAULT_FORM_BASE_URL;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn notifier(anonymous_recipient: Option<&str>) -> WebhookNotifier {
        WebhookNotifier::new(
            reqwest::Client::new(),
            None,
            anonymous_recipient.map(str::to_string),
            LinkGenerator::new(DEFAULT_FORM_BASE_URL).unwrap(),
            RetryPolicy {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
            },
        )
    }

    fn investor() -> Investor {
        Investor {
            email: "pat@example.com".to_string(),
            name: "Pat Doe".to_string(),
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(
            serde_json::to_value(WebhookEvent::Completed).unwrap(),
            "form.completed"
        );
        let e: WebhookEvent = serde_json::from_str(r#""form.progress""#).unwrap();
        assert_eq!(e, WebhookEvent::Progress);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(Progress::new(2, 3, "Address").percent_complete, 67);
        assert_eq!(Progress::new(1, 0, "x").percent_complete, 0);
        assert_eq!(Progress::new(9, 4, "x").percent_complete, 100);
    }

    #[test]
    fn test_tracked_payload() {
        let n = notifier(Some("ops@example.com"));
        let inv = investor();
        let json = serde_json::to_value(n.opened(Some(&inv))).unwrap();
        assert_eq!(json["event"], "form.opened");
        assert_eq!(json["source"], "tracked");
        assert_eq!(json["investor"]["email"], "pat@example.com");
        assert!(json["formLink"]
            .as_str()
            .unwrap()
            .contains("email=pat%40example.com"));
        assert!(json.get("sendTo").is_none());
        assert!(json.get("progress").is_none());
        assert!(json.get("pdf").is_none());
    }

    #[test]
    fn test_anonymous_payload() {
        let n = notifier(Some("ops@example.com"));
        let json = serde_json::to_value(n.payload(WebhookEvent::Completed, None, " Sam Roe ")).unwrap();
        assert_eq!(json["source"], "anonymous");
        assert_eq!(json["formLink"], "");
        assert_eq!(json["sendTo"], "ops@example.com");
        assert_eq!(json["investor"]["name"], "Sam Roe");
    }

    #[test]
    fn test_progress_payload() {
        let n = notifier(None);
        let json =
            serde_json::to_value(n.progress(None, Progress::new(1, 4, "Account Type"))).unwrap();
        assert_eq!(json["progress"]["currentStep"], 1);
        assert_eq!(json["progress"]["percentComplete"], 25);
        assert_eq!(json["progress"]["stepName"], "Account Type");
    }

    #[test]
    fn test_timestamp_is_iso() {
        let when = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = notifier(None).started(None).at(when);
        assert_eq!(payload.timestamp, "2024-05-01T12:00:00.000Z");
    }

    #[tokio::test]
    async fn test_unconfigured_webhook_is_skipped() {
        let n = notifier(None);
        let status = n.send(&n.opened(None)).await;
        assert!(matches!(status, DeliveryStatus::Skipped { .. }));
    }
}
