//! Best-effort notification fan-out.
//!
//! Callers hand a [`Notification`] to [`NotificationDispatcher::notify`] after
//! their own work has committed. Delivery happens on a background worker; its
//! outcome is visible only through logs and metrics, never to the caller.

use std::{collections::HashSet, sync::Arc};

use entity::member;
use futures::{future::BoxFuture, stream, StreamExt};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::config::{MailConfig, NotificationConfig};
use crate::error::Result;
use crate::mail::{
    templates::TemplateData, MailError, MailTransport, Mailbox, OutgoingMail, TemplateCatalogue, TemplateKey,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn named(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    Addresses(Vec<Recipient>),
    /// Every member with an email address, each addressed by name.
    AllMembers,
}

#[derive(Clone, Debug)]
pub struct Notification {
    /// Short label for logs, e.g. `cause.created:7`.
    pub event: String,
    pub audience: Audience,
    pub template: TemplateKey,
    pub data: TemplateData,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Builds a notification on the worker. `Ok(None)` means there is nothing to send.
pub type Composer = BoxFuture<'static, Result<Option<Notification>>>;

enum Command {
    Deliver(Notification),
    Compose { event: String, compose: Composer },
    Flush(oneshot::Sender<()>),
}

/// Trim addresses, drop blanks and drop case-insensitive duplicates, keeping
/// the first occurrence.
pub fn normalize_recipients(recipients: Vec<Recipient>) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    recipients
        .into_iter()
        .filter_map(|r| {
            let address = r.address.trim().to_string();
            if address.is_empty() || !seen.insert(address.to_lowercase()) {
                return None;
            }
            Some(Recipient {
                address,
                name: r.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            })
        })
        .collect()
}

/// Renders and sends notifications. Shared by the worker's delivery tasks.
pub struct Deliverer {
    db: DatabaseConnection,
    transport: Arc<dyn MailTransport>,
    catalogue: TemplateCatalogue,
    from: Option<Mailbox>,
    concurrency: usize,
}

impl Deliverer {
    pub fn new(
        db: DatabaseConnection,
        transport: Arc<dyn MailTransport>,
        catalogue: TemplateCatalogue,
        mail: &MailConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            transport,
            catalogue,
            from: mail.from.clone().map(|email| Mailbox::named(email, mail.from_name.clone())),
            concurrency: concurrency.max(1),
        }
    }

    async fn resolve(&self, audience: Audience) -> Result<Vec<Recipient>> {
        let recipients = match audience {
            Audience::Addresses(list) => list,
            Audience::AllMembers => member::Entity::find()
                .filter(member::Column::Email.is_not_null())
                .order_by_asc(member::Column::Id)
                .all(&self.db)
                .await?
                .into_iter()
                .filter_map(|m| m.email.map(|email| Recipient::named(email, m.name)))
                .collect(),
        };
        Ok(normalize_recipients(recipients))
    }

    /// Deliver one notification to each recipient independently.
    pub async fn deliver(&self, notification: Notification) -> DeliveryReport {
        let Notification {
            event,
            audience,
            template,
            data,
        } = notification;

        let recipients = match self.resolve(audience).await {
            Ok(r) => r,
            Err(e) => {
                metrics::counter!("notifications_failed_total", "template" => template.as_str()).increment(1);
                error!(%event, %template, error = %e, "Failed to resolve notification recipients");
                return DeliveryReport {
                    failed: 1,
                    ..Default::default()
                };
            }
        };
        if recipients.is_empty() {
            debug!(%event, %template, "Notification has no recipients");
            return DeliveryReport::default();
        }

        let outcomes: Vec<std::result::Result<(), MailError>> = stream::iter(recipients)
            .map(|recipient| self.send_one(template, &data, recipient))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = DeliveryReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(MailError::Disabled) => report.skipped += 1,
                Err(_) => report.failed += 1,
            }
        }
        info!(
            %event,
            %template,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "Notification processed"
        );
        report
    }

    async fn send_one(&self, template: TemplateKey, data: &TemplateData, recipient: Recipient) -> std::result::Result<(), MailError> {
        let Some(from) = self.from.clone() else {
            metrics::counter!("notifications_skipped_total", "template" => template.as_str()).increment(1);
            return Err(MailError::Disabled);
        };

        let mut data = data.clone();
        if let Some(name) = &recipient.name {
            data.entry("memberName".to_string()).or_insert_with(|| name.clone());
        }
        let rendered = self.catalogue.render(template, &data);
        let mail = OutgoingMail {
            from,
            to: Mailbox::named(recipient.address.clone(), recipient.name.clone()),
            subject: rendered.subject,
            html: rendered.html,
        };

        match self.transport.send(&mail).await {
            Ok(id) => {
                metrics::counter!("notifications_delivered_total", "template" => template.as_str()).increment(1);
                debug!(%template, to = %recipient.address, message_id = %id.0, "Notification sent");
                Ok(())
            }
            Err(MailError::Disabled) => {
                metrics::counter!("notifications_skipped_total", "template" => template.as_str()).increment(1);
                Err(MailError::Disabled)
            }
            Err(e) => {
                metrics::counter!("notifications_failed_total", "template" => template.as_str()).increment(1);
                warn!(%template, to = %recipient.address, transport = self.transport.name(), error = %e, "Notification send failed");
                Err(e)
            }
        }
    }
}

/// Cheap-to-clone handle onto the background delivery worker.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Command>,
}

impl NotificationDispatcher {
    /// Start the worker. It exits once every handle is dropped and in-flight
    /// deliveries have finished.
    pub fn spawn(deliverer: Deliverer, config: &NotificationConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = tokio::spawn(run_worker(Arc::new(deliverer), rx));
        (Self { tx }, handle)
    }

    /// Queue a notification. Never blocks and never fails; a full or closed
    /// queue drops the notification with a warning.
    pub fn notify(&self, notification: Notification) {
        let event = notification.event.clone();
        self.enqueue(Command::Deliver(notification), &event);
    }

    /// Queue a notification whose content still has to be looked up. The
    /// lookup runs on the worker, so the caller only pays for the enqueue.
    pub fn notify_with(&self, event: impl Into<String>, compose: Composer) {
        let event = event.into();
        self.enqueue(
            Command::Compose {
                event: event.clone(),
                compose,
            },
            &event,
        );
    }

    fn enqueue(&self, command: Command, event: &str) {
        match self.tx.try_send(command) {
            Ok(()) => debug!(%event, "Notification queued"),
            Err(TrySendError::Full(_)) => {
                metrics::counter!("notifications_dropped_total", "reason" => "full").increment(1);
                warn!(%event, "Notification queue full, dropping");
            }
            Err(TrySendError::Closed(_)) => {
                metrics::counter!("notifications_dropped_total", "reason" => "closed").increment(1);
                warn!(%event, "Notification worker stopped, dropping");
            }
        }
    }

    /// Wait until everything queued before this call has been processed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).await.is_err() {
            return;
        }
        let _ = done.await;
    }
}

async fn run_worker(deliverer: Arc<Deliverer>, mut rx: mpsc::Receiver<Command>) {
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Deliver(notification)) => {
                    let deliverer = deliverer.clone();
                    in_flight.spawn(async move { deliverer.deliver(notification).await });
                }
                Some(Command::Compose { event, compose }) => {
                    let deliverer = deliverer.clone();
                    in_flight.spawn(async move { compose_and_deliver(&deliverer, event, compose).await });
                }
                Some(Command::Flush(ack)) => {
                    while let Some(joined) = in_flight.join_next().await {
                        observe(joined);
                    }
                    let _ = ack.send(());
                }
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => observe(joined),
        }
    }
    while let Some(joined) = in_flight.join_next().await {
        observe(joined);
    }
    info!("Notification worker stopped");
}

async fn compose_and_deliver(deliverer: &Deliverer, event: String, compose: Composer) -> DeliveryReport {
    match compose.await {
        Ok(Some(notification)) => deliverer.deliver(notification).await,
        Ok(None) => {
            debug!(%event, "Nothing to notify");
            DeliveryReport::default()
        }
        Err(e) => {
            metrics::counter!("notifications_failed_total", "template" => "unknown").increment(1);
            warn!(%event, error = %e, "Could not build notification");
            DeliveryReport {
                failed: 1,
                ..Default::default()
            }
        }
    }
}

fn observe(joined: std::result::Result<DeliveryReport, tokio::task::JoinError>) {
    if let Err(e) = joined {
        metrics::counter!("notifications_failed_total", "template" => "unknown").increment(1);
        error!(error = %e, "Notification delivery task panicked");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn recipients_are_trimmed_and_deduplicated() {
        let list = normalize_recipients(vec![
            Recipient::new(" a@example.org "),
            Recipient::new(""),
            Recipient::new("   "),
            Recipient::named("A@example.org", "Dup"),
            Recipient::named("b@example.org", "  "),
        ]);
        assert_eq!(
            list,
            vec![
                Recipient::new("a@example.org"),
                Recipient {
                    address: "b@example.org".into(),
                    name: None
                },
            ]
        );
    }
}
