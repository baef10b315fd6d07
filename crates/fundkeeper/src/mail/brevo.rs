use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MailError, MailTransport, MessageId, OutgoingMail};
use crate::config::MailConfig;

const BREVO_SEND_URL: &str = "https://api.brevo.com/v3/smtp/email";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoEmailAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoSendEmailBody<'a> {
    sender: BrevoEmailAddress<'a>,
    to: Vec<BrevoEmailAddress<'a>>,
    subject: &'a str,
    html_content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrevoSendEmailResponse {
    #[serde(default)]
    message_id: Option<String>,
}

pub struct BrevoTransport {
    http: Client,
    api_key: String,
}

impl BrevoTransport {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let api_key = config
            .brevo_api_key
            .clone()
            .ok_or_else(|| MailError::NotConfigured("BREVO_API_KEY is required".to_string()))?;
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("fundkeeper/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, api_key })
    }
}

#[async_trait]
impl MailTransport for BrevoTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<MessageId, MailError> {
        let body = BrevoSendEmailBody {
            sender: BrevoEmailAddress {
                email: &mail.from.email,
                name: mail.from.name.as_deref(),
            },
            to: vec![BrevoEmailAddress {
                email: &mail.to.email,
                name: mail.to.name.as_deref(),
            }],
            subject: &mail.subject,
            html_content: &mail.html,
        };

        let resp = self
            .http
            .post(BREVO_SEND_URL)
            .header("api-key", &self.api_key)
            .header("Accept", "application/json")
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

        let parsed: BrevoSendEmailResponse = resp.json().await?;
        let id = parsed.message_id.unwrap_or_default();
        debug!(message_id = %id, "Brevo accepted message");
        Ok(MessageId(id))
    }

    fn name(&self) -> &'static str {
        "brevo"
    }
}
