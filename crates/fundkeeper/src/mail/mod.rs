//! Mail transports and the template catalogue.

mod brevo;
mod resend;
pub mod templates;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{MailConfig, MailProvider};

pub use brevo::BrevoTransport;
pub use resend::ResendTransport;
pub use templates::{RenderedMail, TemplateCatalogue, TemplateKey};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail is disabled")]
    Disabled,

    #[error("mail transport not configured: {0}")]
    NotConfigured(String),

    #[error("mail request failed: {0}")]
    Transport(String),

    #[error("mail provider returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("template error: {0}")]
    Template(String),
}

impl From<reqwest::Error> for MailError {
    fn from(e: reqwest::Error) -> Self {
        MailError::Transport(e.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mailbox {
    pub email: String,
    pub name: Option<String>,
}

impl Mailbox {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn named(email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            email: email.into(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }

    /// `Name <email>` or just `email`.
    pub fn formatted(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} <{}>", self.email),
            None => self.email.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub html: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageId(pub String);

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<MessageId, MailError>;

    fn name(&self) -> &'static str;
}

/// Used when mail is switched off or no provider is configured.
#[derive(Debug, Default)]
pub struct DisabledTransport;

#[async_trait]
impl MailTransport for DisabledTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<MessageId, MailError> {
        info!(subject = %mail.subject, "Mail disabled, skipping send");
        Err(MailError::Disabled)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Try `primary`; once it has failed, use `secondary` for the rest of the process.
pub struct FallbackTransport {
    primary: Arc<dyn MailTransport>,
    secondary: Arc<dyn MailTransport>,
    primary_disabled: AtomicBool,
}

impl FallbackTransport {
    pub fn new(primary: Arc<dyn MailTransport>, secondary: Arc<dyn MailTransport>) -> Self {
        Self {
            primary,
            secondary,
            primary_disabled: AtomicBool::new(false),
        }
    }

    pub fn primary_disabled(&self) -> bool {
        self.primary_disabled.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MailTransport for FallbackTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<MessageId, MailError> {
        if !self.primary_disabled() {
            match self.primary.send(mail).await {
                Ok(id) => return Ok(id),
                Err(e) => {
                    if !self.primary_disabled.swap(true, Ordering::AcqRel) {
                        warn!(
                            primary = self.primary.name(),
                            secondary = self.secondary.name(),
                            error = %e,
                            "Primary mail transport failed, switching to secondary"
                        );
                    }
                }
            }
        }
        self.secondary.send(mail).await
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

/// Pick the transport described by `config`.
pub fn transport_from_config(config: &MailConfig) -> Result<Arc<dyn MailTransport>, MailError> {
    if !config.enabled {
        info!("Mail disabled by configuration");
        return Ok(Arc::new(DisabledTransport));
    }

    let brevo = || BrevoTransport::new(config).map(|t| Arc::new(t) as Arc<dyn MailTransport>);
    let resend = || ResendTransport::new(config).map(|t| Arc::new(t) as Arc<dyn MailTransport>);

    let transport: Arc<dyn MailTransport> = match config.provider {
        MailProvider::Brevo => brevo()?,
        MailProvider::Resend => resend()?,
        MailProvider::Auto => match (config.brevo_configured(), config.resend_configured()) {
            (true, true) => Arc::new(FallbackTransport::new(brevo()?, resend()?)),
            (true, false) => brevo()?,
            (false, true) => resend()?,
            (false, false) => {
                warn!("No mail provider configured, mail will be skipped");
                Arc::new(DisabledTransport)
            }
        },
    };
    info!(transport = transport.name(), "Mail transport ready");
    Ok(transport)
}
