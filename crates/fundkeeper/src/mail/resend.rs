use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MailError, MailTransport, MessageId, OutgoingMail};
use crate::config::MailConfig;

const RESEND_SEND_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
struct ResendSendBody<'a> {
    from: String,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendSendResponse {
    #[serde(default)]
    id: Option<String>,
}

pub struct ResendTransport {
    http: Client,
    api_key: String,
}

impl ResendTransport {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let api_key = config
            .resend_api_key
            .clone()
            .ok_or_else(|| MailError::NotConfigured("RESEND_API_KEY is required".to_string()))?;
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("fundkeeper/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, api_key })
    }
}

#[async_trait]
impl MailTransport for ResendTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<MessageId, MailError> {
        let body = ResendSendBody {
            from: mail.from.formatted(),
            to: vec![mail.to.email.as_str()],
            subject: &mail.subject,
            html: &mail.html,
        };

        let resp = self
            .http
            .post(RESEND_SEND_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ResendSendResponse = resp.json().await?;
        let id = parsed.id.unwrap_or_default();
        debug!(message_id = %id, "Resend accepted message");
        Ok(MessageId(id))
    }

    fn name(&self) -> &'static str {
        "resend"
    }
}
