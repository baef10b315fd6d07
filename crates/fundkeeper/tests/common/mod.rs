#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use entity::{cause, member};
use fundkeeper::{
    attachments::UploadFile,
    clock::ManualClock,
    config::Config,
    crypto::hash_password,
    mail::{MailError, MailTransport, MessageId, OutgoingMail},
    storage::{Folder, ListedObject, MemoryObjectStore, ObjectStore, StorageError, StoredObject},
    AppContext,
};
use migration::{Migrator, MigratorTrait};
use regex::Regex;
use sea_orm::{ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Set};

pub const START: i64 = 1_700_000_000;
pub const PASSWORD: &str = "original-password";

/// Memory store with switchable failures.
pub struct FlakyObjectStore {
    pub inner: MemoryObjectStore,
    uploads: AtomicUsize,
    fail_uploads: Mutex<HashSet<usize>>,
    fail_deletes: AtomicBool,
}

impl FlakyObjectStore {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: MemoryObjectStore::new(clock),
            uploads: AtomicUsize::new(0),
            fail_uploads: Mutex::new(HashSet::new()),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Make the n-th upload call (1-based, counted from now on) fail.
    pub fn fail_upload_call(&self, n: usize) {
        let base = self.uploads.load(Ordering::SeqCst);
        self.fail_uploads.lock().unwrap().insert(base + n);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn upload(
        &self,
        folder: Folder,
        bytes: Vec<u8>,
        mime_type: &str,
        name: &str,
    ) -> Result<StoredObject, StorageError> {
        let call = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_uploads.lock().unwrap().contains(&call) {
            return Err(StorageError::Status {
                status: 503,
                body: "upload refused".into(),
            });
        }
        self.inner.upload(folder, bytes, mime_type, name).await
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Timeout);
        }
        self.inner.delete(id).await
    }

    async fn list(&self, folder: Folder) -> Result<Vec<ListedObject>, StorageError> {
        self.inner.list(folder).await
    }

    fn id_from_url(&self, url: &str) -> Option<String> {
        self.inner.id_from_url(url)
    }
}

/// Mail transport that records every message and can refuse chosen addresses.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMail>>,
    attempts: AtomicUsize,
    refuse: Mutex<HashSet<String>>,
    refuse_all: AtomicBool,
}

impl RecordingTransport {
    pub fn refuse(&self, address: &str) {
        self.refuse.lock().unwrap().insert(address.to_string());
    }

    pub fn refuse_all(&self) {
        self.refuse_all.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<OutgoingMail> {
        self.sent().into_iter().filter(|m| m.to.email == address).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<MessageId, MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse_all.load(Ordering::SeqCst) || self.refuse.lock().unwrap().contains(&mail.to.email) {
            return Err(MailError::Rejected {
                status: 550,
                body: "mailbox unavailable".into(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(mail.clone());
        Ok(MessageId(format!("msg-{}", sent.len())))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub struct Harness {
    pub ctx: Arc<AppContext>,
    pub db: DatabaseConnection,
    pub store: Arc<FlakyObjectStore>,
    pub mail: Arc<RecordingTransport>,
    pub clock: Arc<ManualClock>,
}

pub async fn test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // One connection: every in-memory connection would be its own database.
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(tweak: impl FnOnce(&mut Config)) -> Harness {
    let mut config = Config::for_tests("sqlite::memory:");
    tweak(&mut config);

    let db = test_db().await;
    let clock = ManualClock::new(START);
    let store = Arc::new(FlakyObjectStore::new(clock.clone()));
    let mail = Arc::new(RecordingTransport::default());

    let ctx = AppContext::builder(config, db.clone())
        .object_store(store.clone())
        .mail_transport(mail.clone())
        .clock(clock.clone())
        .build()
        .await
        .unwrap();

    Harness {
        ctx,
        db,
        store,
        mail,
        clock,
    }
}

impl Harness {
    pub async fn member(&self, name: &str, email: Option<&str>) -> member::Model {
        member::ActiveModel {
            name: Set(name.to_string()),
            email: Set(email.map(str::to_string)),
            phone: Set(None),
            password_hash: Set(hash_password(PASSWORD, 1_000).unwrap()),
            is_admin: Set(false),
            email_verified: Set(true),
            email_verified_at: Set(Some(START)),
            joined_at: Set(START),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .unwrap()
    }

    pub async fn cause_with_id(&self, id: i32, title: &str, amount_cents: Option<i64>) -> cause::Model {
        cause::ActiveModel {
            id: Set(id),
            title: Set(title.to_string()),
            description: Set(None),
            amount_cents: Set(amount_cents),
            created_at: Set(START),
        }
        .insert(&self.db)
        .await
        .unwrap()
    }

    pub async fn exec(&self, sql: &str) {
        self.db.execute_unprepared(sql).await.unwrap();
    }

    pub async fn count(&self, sql: &str) -> i64 {
        let row = self
            .db
            .query_one(sea_orm::Statement::from_string(self.db.get_database_backend(), sql.to_string()))
            .await
            .unwrap()
            .unwrap();
        row.try_get_by_index::<i64>(0).unwrap()
    }

    pub async fn flush(&self) {
        self.ctx.flush_notifications().await;
    }
}

pub fn png(name: &str) -> UploadFile {
    UploadFile {
        original_name: name.to_string(),
        mime_type: "image/png".to_string(),
        bytes: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
    }
}

/// Pull the 64-hex-digit token out of a link in a mail body.
pub fn token_in(mail: &OutgoingMail) -> String {
    let re = Regex::new(r"token=([0-9a-f]{64})").unwrap();
    re.captures(&mail.html).unwrap()[1].to_string()
}
