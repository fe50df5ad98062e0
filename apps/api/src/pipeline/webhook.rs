use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineEvent {
    #[serde(rename = "pipeline.completed")]
    Completed,
    #[serde(rename = "pipeline.failed")]
    Failed,
}

/// Best-effort POST of pipeline outcomes. Delivery failures are logged, never
/// surfaced to the run.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Option<String>,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, secret: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?,
            url: url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()),
            secret,
        })
    }

    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            url: None,
            secret: None,
        }
    }

    /// `payload` fields are merged next to `event` and `sentAt`.
    pub async fn notify(&self, event: PipelineEvent, payload: Value) {
        let Some(url) = &self.url else {
            return;
        };

        let mut body = json!({ "event": event, "sentAt": Utc::now().to_rfc3339() });
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), payload) {
            body.extend(extra);
        }

        let mut request = self.http.post(url).json(&body);
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(?event, "Pipeline webhook delivered");
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                warn!(status, body = %text, "Pipeline webhook POST failed");
            }
            Err(err) => warn!(error = %err, "Pipeline webhook POST failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_event_with_bearer_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_partial_json(json!({ "event": "pipeline.completed", "jobsProcessed": 3 })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier =
            WebhookNotifier::new(Some(format!("{}/hook", server.uri())), Some("s3cret".into())).unwrap();
        notifier
            .notify(PipelineEvent::Completed, json!({ "jobsProcessed": 3 }))
            .await;
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Some(server.uri()), None).unwrap();
        notifier.notify(PipelineEvent::Failed, json!({ "error": "boom" })).await;
    }

    #[tokio::test]
    async fn test_blank_url_disables_notifications() {
        let notifier = WebhookNotifier::new(Some("  ".into()), None).unwrap();
        assert!(notifier.url.is_none());
        notifier.notify(PipelineEvent::Completed, json!({})).await;
    }
}
