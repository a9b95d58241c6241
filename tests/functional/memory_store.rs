//! In-memory identity store with create-if-absent semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use autoops_webhook::Result;
use autoops_webhook::identity::{CreateOutcome, IdentityRecord, IdentityStore};
use tokio::sync::{Barrier, Mutex};

/// [`IdentityStore`] over a shared map, counting calls for assertions
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<(String, String), IdentityRecord>>>,
    gets: Arc<AtomicUsize>,
    creates: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a record, bypassing create-if-absent
    pub async fn insert(&self, namespace: &str, name: &str, record: IdentityRecord) {
        self.records
            .lock()
            .await
            .insert((namespace.to_string(), name.to_string()), record);
    }

    pub async fn stored(&self, namespace: &str, name: &str) -> Option<IdentityRecord> {
        self.records
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<IdentityRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.stored(namespace, name).await)
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        record: &IdentityRecord,
    ) -> Result<CreateOutcome> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().await;
        let key = (namespace.to_string(), name.to_string());
        if records.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        records.insert(key, record.clone());
        Ok(CreateOutcome::Created(record.clone()))
    }
}

/// Store simulating simultaneous starts.
///
/// The first `callers` reads miss, and every create waits until all callers
/// have reached it, so each caller mints and attempts a create.
#[derive(Clone)]
pub struct RacingStore {
    pub inner: MemoryStore,
    misses: Arc<AtomicUsize>,
    barrier: Arc<Barrier>,
}

impl RacingStore {
    pub fn new(callers: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            misses: Arc::new(AtomicUsize::new(callers)),
            barrier: Arc::new(Barrier::new(callers)),
        }
    }
}

#[async_trait]
impl IdentityStore for RacingStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<IdentityRecord>> {
        let miss = self
            .misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if miss {
            return Ok(None);
        }
        self.inner.get(namespace, name).await
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        record: &IdentityRecord,
    ) -> Result<CreateOutcome> {
        self.barrier.wait().await;
        self.inner.create(namespace, name, record).await
    }
}
