use crate::config::MailConfig;
use crate::error::MailError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SEND_MESSAGE_EP: &str = "/api/v1/send/message";

/// What the mail API said about one send attempt. A non-2xx response is
/// folded into `status` rather than raised, so the reconciler can record
/// it on the notification and keep going.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub status: String,
    pub message_id: Option<String>,
}

impl SendOutcome {
    pub fn delivered(&self) -> bool {
        self.status == "success"
    }
}

/// Contract with the outbound mail API.
#[async_trait]
pub trait MailApi: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str)
    -> Result<SendOutcome, MailError>;
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: Vec<&'a str>,
    html_body: &'a str,
    from: &'a str,
    subject: &'a str,
    reply_to: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    status: String,
    #[serde(default)]
    data: Option<SendResponseData>,
}

#[derive(Debug, Deserialize)]
struct SendResponseData {
    message_id: String,
}

/// Postal-style HTTP mail client. Non-production runs redirect every
/// message to the configured staging recipient so real owners are never
/// mailed from a test environment.
pub struct PostalMailer {
    base_url: String,
    api_key: String,
    from_address: String,
    reply_to: String,
    redirect_to: Option<String>,
    client: Client,
}

impl PostalMailer {
    pub fn new(config: &MailConfig, production: bool) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            from_address: config.from_address.clone(),
            reply_to: config.reply_to.clone(),
            redirect_to: (!production).then(|| config.staging_recipient.clone()),
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl MailApi for PostalMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<SendOutcome, MailError> {
        if to.is_empty() {
            return Err(MailError::NoRecipient);
        }
        if html_body.is_empty() {
            return Err(MailError::EmptyBody);
        }

        let recipient = self.redirect_to.as_deref().unwrap_or(to);
        let payload = SendRequest {
            to: vec![recipient],
            html_body,
            from: &self.from_address,
            subject,
            reply_to: &self.reply_to,
        };

        let response = self
            .client
            .post(format!("{}{SEND_MESSAGE_EP}", self.base_url))
            .header("X-Server-API-Key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(SendOutcome {
                status: format!(
                    "{},{},{}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown"),
                    body
                ),
                message_id: None,
            });
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(SendOutcome {
            message_id: parsed.data.map(|d| d.message_id),
            status: parsed.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mail_config(base_url: &str) -> MailConfig {
        MailConfig {
            base_url: base_url.to_string(),
            api_key: "mail-key".into(),
            from_address: "warden@example.org".into(),
            reply_to: "help@example.org".into(),
            staging_recipient: "dev@example.org".into(),
            ..MailConfig::default()
        }
    }

    #[tokio::test]
    async fn successful_send_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/send/message"))
            .and(header("X-Server-API-Key", "mail-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"message_id": "msg-42"}
            })))
            .mount(&server)
            .await;

        let mailer = PostalMailer::new(&mail_config(&server.uri()), true);
        let outcome = mailer
            .send("alice@example.org", "subject", "<p>hi</p>")
            .await
            .unwrap();
        assert!(outcome.delivered());
        assert_eq!(outcome.message_id.as_deref(), Some("msg-42"));
    }

    #[tokio::test]
    async fn rejected_send_folds_status_into_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/send/message"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid recipient"))
            .mount(&server)
            .await;

        let mailer = PostalMailer::new(&mail_config(&server.uri()), true);
        let outcome = mailer
            .send("alice@example.org", "subject", "<p>hi</p>")
            .await
            .unwrap();
        assert!(!outcome.delivered());
        assert!(outcome.status.starts_with("422,"));
        assert!(outcome.status.contains("invalid recipient"));
        assert!(outcome.message_id.is_none());
    }

    #[tokio::test]
    async fn staging_run_redirects_recipient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/send/message"))
            .and(body_partial_json(serde_json::json!({"to": ["dev@example.org"]})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "success"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mailer = PostalMailer::new(&mail_config(&server.uri()), false);
        let outcome = mailer
            .send("alice@example.org", "subject", "<p>hi</p>")
            .await
            .unwrap();
        assert!(outcome.delivered());
        assert!(outcome.message_id.is_none());
    }

    #[tokio::test]
    async fn empty_recipient_is_rejected_before_any_request() {
        let mailer = PostalMailer::new(&mail_config("http://127.0.0.1:9"), true);
        assert!(matches!(
            mailer.send("", "subject", "<p>hi</p>").await,
            Err(MailError::NoRecipient)
        ));
    }

    #[tokio::test]
    async fn empty_body_is_rejected_before_any_request() {
        let mailer = PostalMailer::new(&mail_config("http://127.0.0.1:9"), true);
        assert!(matches!(
            mailer.send("a@example.org", "subject", "").await,
            Err(MailError::EmptyBody)
        ));
    }
}
