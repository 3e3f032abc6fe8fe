//! In-process [`Store`] for exercising reconciliation without a server.

use crate::store::{SecretData, Store};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A call observed by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Read(String),
    Write(String, SecretData),
    Put(String, String, SecretData),
    Get(String, String),
}

impl StoreCall {
    /// The logical path (or `mount/key`) the call addressed.
    pub fn path(&self) -> String {
        match self {
            StoreCall::Read(path) | StoreCall::Write(path, _) => path.clone(),
            StoreCall::Put(mount, key, _) | StoreCall::Get(mount, key) => {
                format!("{}/{}", mount, key)
            }
        }
    }

    /// Whether the call can change backend state.
    pub fn is_mutation(&self) -> bool {
        matches!(self, StoreCall::Write(..) | StoreCall::Put(..))
    }
}

/// In-process store.
///
/// Logical reads and writes answer from preloaded responses; KV entries live in
/// a map. Every call is recorded, and individual paths can be made to fail,
/// which makes it suitable for exercising reconciliation without a server.
#[derive(Default)]
pub struct MemoryStore {
    reads: Mutex<HashMap<String, SecretData>>,
    writes: Mutex<HashMap<String, SecretData>>,
    kv: Mutex<HashMap<(String, String), SecretData>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<StoreCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload the response for a logical read.
    pub fn with_read(self, path: &str, data: SecretData) -> Self {
        lock(&self.reads).insert(path.to_string(), data);
        self
    }

    /// Preload the response for a logical write.
    pub fn with_write_response(self, path: &str, data: SecretData) -> Self {
        lock(&self.writes).insert(path.to_string(), data);
        self
    }

    /// Preload a KV entry.
    pub fn with_kv(self, mount: &str, key: &str, data: SecretData) -> Self {
        lock(&self.kv).insert((mount.to_string(), key.to_string()), data);
        self
    }

    /// Make every call addressing `path` fail.
    pub fn fail_on(self, path: &str) -> Self {
        lock(&self.failing).insert(path.to_string());
        self
    }

    /// Calls observed so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Number of observed calls that could change backend state.
    pub fn mutation_count(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.is_mutation()).count()
    }

    /// Current KV entry, if any.
    pub fn kv_entry(&self, mount: &str, key: &str) -> Option<SecretData> {
        lock(&self.kv)
            .get(&(mount.to_string(), key.to_string()))
            .cloned()
    }

    fn record(&self, call: StoreCall) -> Result<()> {
        let path = call.path();
        debug!(path = %path, "memory store call");
        lock(&self.calls).push(call);
        if lock(&self.failing).contains(&path) {
            return Err(anyhow!("request failed: 503 Service Unavailable ({})", path));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<SecretData>> {
        self.record(StoreCall::Read(path.to_string()))?;
        Ok(lock(&self.reads).get(path).cloned())
    }

    async fn write(&self, path: &str, data: SecretData) -> Result<Option<SecretData>> {
        self.record(StoreCall::Write(path.to_string(), data))?;
        Ok(lock(&self.writes).get(path).cloned())
    }

    async fn put(&self, kv_mount: &str, key: &str, data: SecretData) -> Result<()> {
        self.record(StoreCall::Put(
            kv_mount.to_string(),
            key.to_string(),
            data.clone(),
        ))?;
        lock(&self.kv).insert((kv_mount.to_string(), key.to_string()), data);
        Ok(())
    }

    async fn get(&self, kv_mount: &str, key: &str) -> Result<Option<SecretData>> {
        self.record(StoreCall::Get(kv_mount.to_string(), key.to_string()))?;
        Ok(self.kv_entry(kv_mount, key))
    }
}
