//! KV v2 secrets engine helpers.

use crate::store::SecretData;
use serde::Deserialize;
use serde_json::Value;

/// Path and payload handling for one KV v2 mount.
///
/// Reads and writes go through `<mount>/data/<key>`; the entry itself is
/// wrapped in a `data` object on the wire.
pub struct KvClient {
    /// Mount point of the engine (e.g., "secret" or "clusters/kv").
    mount: String,
}

/// KV v2 read response body.
#[derive(Debug, Deserialize)]
pub struct KvData {
    #[serde(default)]
    pub data: Option<SecretData>,
    #[serde(default)]
    pub metadata: Option<KvMetadata>,
}

/// KV v2 entry metadata.
#[derive(Debug, Deserialize)]
pub struct KvMetadata {
    #[serde(default)]
    pub created_time: String,
    #[serde(default)]
    pub deletion_time: String,
    #[serde(default)]
    pub destroyed: bool,
    #[serde(default)]
    pub version: u64,
}

impl KvMetadata {
    /// Whether the latest version was soft-deleted or destroyed.
    pub fn is_deleted(&self) -> bool {
        self.destroyed || !self.deletion_time.is_empty()
    }
}

impl KvClient {
    /// Create a helper for the given mount.
    pub fn new(mount: &str) -> Self {
        Self {
            mount: mount.trim_matches('/').to_string(),
        }
    }

    /// Get the API path for an entry.
    pub fn data_path(&self, key: &str) -> String {
        format!("{}/data/{}", self.mount, key.trim_matches('/'))
    }

    /// Wrap entry fields into a write body.
    pub fn entry_body(data: SecretData) -> SecretData {
        let mut body = SecretData::new();
        body.insert("data".to_string(), Value::Object(data));
        body
    }

    /// Extract the entry fields from a read response.
    ///
    /// A deleted latest version reads as absent.
    pub fn parse_entry(response: SecretData) -> Option<SecretData> {
        let parsed: KvData = serde_json::from_value(Value::Object(response)).ok()?;
        if parsed.metadata.as_ref().is_some_and(KvMetadata::is_deleted) {
            return None;
        }
        parsed.data
    }

    /// Get the mount point.
    pub fn mount(&self) -> &str {
        &self.mount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> SecretData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_data_path() {
        let kv = KvClient::new("secret");
        assert_eq!(kv.data_path("web-ca"), "secret/data/web-ca");
    }

    #[test]
    fn test_data_path_nested_mount() {
        let kv = KvClient::new("/clusters/kv/");
        assert_eq!(kv.data_path("svc-secret"), "clusters/kv/data/svc-secret");
    }

    #[test]
    fn test_entry_body_wraps_data() {
        let body = KvClient::entry_body(map(json!({"private": "key"})));
        assert_eq!(json!(body), json!({"data": {"private": "key"}}));
    }

    #[test]
    fn test_parse_entry() {
        let response = map(json!({
            "data": {
                "certificate": "cert-pem",
                "private_key": "key-pem"
            },
            "metadata": {
                "created_time": "2024-01-15T00:00:00Z",
                "deletion_time": "",
                "destroyed": false,
                "version": 1
            }
        }));

        let entry = KvClient::parse_entry(response).unwrap();
        assert_eq!(entry.get("certificate"), Some(&json!("cert-pem")));
        assert_eq!(entry.get("private_key"), Some(&json!("key-pem")));
    }

    #[test]
    fn test_parse_entry_deleted_version() {
        let response = map(json!({
            "data": null,
            "metadata": {
                "created_time": "2024-01-15T00:00:00Z",
                "deletion_time": "2024-02-01T00:00:00Z",
                "destroyed": false,
                "version": 2
            }
        }));

        assert!(KvClient::parse_entry(response).is_none());
    }
}
