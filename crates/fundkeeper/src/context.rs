//! Process-wide handles, built once at startup and borrowed by every service.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::info;

use crate::attachments::{AttachmentSaga, UploadLimits};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageBackend};
use crate::credentials::CredentialTransaction;
use crate::db;
use crate::error::{Error, Result};
use crate::funds::FundService;
use crate::mail::{transport_from_config, MailTransport, TemplateCatalogue};
use crate::members::MemberService;
use crate::notify::{Deliverer, NotificationDispatcher};
use crate::storage::{DriveObjectStore, MemoryObjectStore, ObjectStore};
use crate::sweep::OrphanSweeper;
use crate::tokens::SecretTokenStore;

pub struct AppContext {
    pub config: Config,
    pub db: DatabaseConnection,
    pub store: Arc<dyn ObjectStore>,
    pub transport: Arc<dyn MailTransport>,
    pub clock: Arc<dyn Clock>,
    pub dispatcher: NotificationDispatcher,
    pub tokens: SecretTokenStore,
    pub credentials: CredentialTransaction,
    pub attachments: AttachmentSaga,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AppContext {
    /// Connect to everything `config` describes.
    pub async fn from_config(config: Config) -> Result<Arc<Self>> {
        let db = db::connect(&config.database).await?;
        Self::builder(config, db).build().await
    }

    pub fn builder(config: Config, db: DatabaseConnection) -> AppContextBuilder {
        AppContextBuilder {
            config,
            db,
            store: None,
            transport: None,
            clock: None,
            catalogue: None,
        }
    }

    pub fn members(&self) -> MemberService<'_> {
        MemberService::new(self)
    }

    pub fn funds(&self) -> FundService<'_> {
        FundService::new(self)
    }

    pub fn sweeper(&self) -> OrphanSweeper {
        OrphanSweeper::new(self.db.clone(), self.store.clone(), self.clock.clone(), self.config.sweep.grace)
    }

    /// Wait for queued notifications to be processed.
    pub async fn flush_notifications(&self) {
        self.dispatcher.flush().await;
    }

    /// Drain the notification queue and stop the worker.
    pub async fn shutdown(&self) {
        self.flush_notifications().await;
        if let Some(handle) = self.worker.lock().await.take() {
            handle.abort();
        }
        info!("Application context shut down");
    }
}

pub struct AppContextBuilder {
    config: Config,
    db: DatabaseConnection,
    store: Option<Arc<dyn ObjectStore>>,
    transport: Option<Arc<dyn MailTransport>>,
    clock: Option<Arc<dyn Clock>>,
    catalogue: Option<TemplateCatalogue>,
}

impl AppContextBuilder {
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn mail_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn templates(mut self, catalogue: TemplateCatalogue) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    /// Must be called inside a Tokio runtime; it starts the notification worker.
    pub async fn build(self) -> Result<Arc<AppContext>> {
        let config = self.config;
        if config.tokens.password_hash_iterations == 0 {
            return Err(Error::validation("PASSWORD_HASH_ITERATIONS must be positive"));
        }
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let store: Arc<dyn ObjectStore> = match self.store {
            Some(store) => store,
            None => match config.storage.backend {
                StorageBackend::Drive => Arc::new(DriveObjectStore::new(&config.storage)?),
                StorageBackend::Memory => Arc::new(MemoryObjectStore::new(clock.clone())),
            },
        };

        let transport = match self.transport {
            Some(t) => t,
            None => transport_from_config(&config.mail)?,
        };
        let catalogue = match self.catalogue {
            Some(c) => c,
            None => TemplateCatalogue::load(config.mail.templates_path.as_deref(), config.mail.layout_path.as_deref())?,
        };
        config.log_mail_summary();

        let deliverer = Deliverer::new(
            self.db.clone(),
            transport.clone(),
            catalogue,
            &config.mail,
            config.notifications.concurrency,
        );
        let (dispatcher, worker) = NotificationDispatcher::spawn(deliverer, &config.notifications);

        let ctx = AppContext {
            tokens: SecretTokenStore::new(self.db.clone(), clock.clone()),
            credentials: CredentialTransaction::new(
                self.db.clone(),
                clock.clone(),
                config.tokens.password_hash_iterations,
            ),
            attachments: AttachmentSaga::new(
                self.db.clone(),
                store.clone(),
                clock.clone(),
                UploadLimits::from(&config.storage),
            ),
            db: self.db,
            store,
            transport,
            clock,
            dispatcher,
            config,
            worker: Mutex::new(Some(worker)),
        };
        info!("Application context ready");
        Ok(Arc::new(ctx))
    }
}
