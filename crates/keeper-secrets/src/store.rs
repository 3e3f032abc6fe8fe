//! Store trait.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Key/value payload exchanged with the backend.
pub type SecretData = Map<String, Value>;

/// Access to a PKI/KV secrets backend.
///
/// A missing value is `Ok(None)`; `Err` always means the backend could not be
/// asked (transport, auth, server error).
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a logical path (e.g. `pki/cert/ca_chain`).
    async fn read(&self, path: &str) -> Result<Option<SecretData>>;

    /// Write to a logical path and return the response data, if any.
    async fn write(&self, path: &str, data: SecretData) -> Result<Option<SecretData>>;

    /// Store an entry in a KV v2 engine.
    async fn put(&self, kv_mount: &str, key: &str, data: SecretData) -> Result<()>;

    /// Fetch an entry from a KV v2 engine.
    async fn get(&self, kv_mount: &str, key: &str) -> Result<Option<SecretData>>;
}

/// Extract a string field from a response map.
pub fn string_field(data: &SecretData, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}
