use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;

use super::{Folder, ListedObject, ObjectStore, StorageError, StoredObject};
use crate::clock::{Clock, SystemClock};

const URL_PREFIX: &str = "memory://objects/";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryObject {
    pub folder: Folder,
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub created_at: i64,
}

/// Process-local object store for development runs and tests.
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryObjectStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, MemoryObject>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn url_for(id: &str) -> String {
        format!("{URL_PREFIX}{id}")
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<MemoryObject> {
        self.objects().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Place an object directly, bypassing `upload`. Handy for seeding orphans.
    pub fn insert_raw(&self, id: &str, object: MemoryObject) {
        self.objects().insert(id.to_string(), object);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        folder: Folder,
        bytes: Vec<u8>,
        mime_type: &str,
        name: &str,
    ) -> Result<StoredObject, StorageError> {
        let id = format!("obj{:06}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.objects().insert(
            id.clone(),
            MemoryObject {
                folder,
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                bytes,
                created_at: self.clock.now(),
            },
        );
        Ok(StoredObject {
            public_url: Self::url_for(&id),
            id,
        })
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.objects().remove(id);
        Ok(())
    }

    async fn list(&self, folder: Folder) -> Result<Vec<ListedObject>, StorageError> {
        Ok(self
            .objects()
            .iter()
            .filter(|(_, o)| o.folder == folder)
            .map(|(id, o)| ListedObject {
                id: id.clone(),
                name: o.name.clone(),
                created_at: o.created_at,
            })
            .collect())
    }

    fn id_from_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(URL_PREFIX)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}
