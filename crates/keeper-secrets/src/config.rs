//! Configuration structures for an issuer's backend connection.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// OpenBao/Vault connection configuration for one named issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenBaoConfig {
    /// Server address (e.g., "https://vault.internal:8200").
    pub address: String,

    /// Optional CA bundle (PEM file) used to verify the server certificate.
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,

    /// Skip server certificate verification entirely.
    #[serde(default)]
    pub tls_insecure: bool,

    /// Per-request timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum attempts for a request that failed with a transient error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Authentication settings.
    pub auth: AuthConfig,

    /// KV v2 engine used for shared CA material, key pairs and secrets.
    #[serde(default)]
    pub kv: KvConfig,
}

impl Default for OpenBaoConfig {
    fn default() -> Self {
        Self {
            address: "https://vault.internal:8200".to_string(),
            ca_bundle: None,
            tls_insecure: false,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            auth: AuthConfig::default(),
            kv: KvConfig::default(),
        }
    }
}

/// Authentication settings: a bootstrap credential plus the AppRole to log in with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub app_role: AppRoleConfig,
}

/// Bootstrap credential used to fetch the AppRole role_id and secret_id.
///
/// An inline `token` wins over `file`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// AppRole settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRoleConfig {
    /// Role name under the AppRole mount.
    pub name: String,

    /// AppRole auth mount path (default: "approle").
    #[serde(default = "default_approle_path")]
    pub path: String,

    /// Local cache for the role_id.
    pub role_id_local_path: PathBuf,

    /// Local cache for the secret_id.
    pub secret_id_local_path: PathBuf,
}

impl Default for AppRoleConfig {
    fn default() -> Self {
        Self {
            name: "key-keeper".to_string(),
            path: default_approle_path(),
            role_id_local_path: PathBuf::from("/var/lib/key-keeper/role-id"),
            secret_id_local_path: PathBuf::from("/var/lib/key-keeper/secret-id"),
        }
    }
}

/// KV v2 engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Mount path of the KV v2 engine.
    #[serde(default = "default_kv_path")]
    pub path: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            path: default_kv_path(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retries() -> u32 {
    3
}

fn default_approle_path() -> String {
    "approle".to_string()
}

fn default_kv_path() -> String {
    "secret".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_openbao_config() {
        let config = OpenBaoConfig::default();
        assert_eq!(config.auth.app_role.path, "approle");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.kv.path, "secret");
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = serde_json::json!({
            "address": "https://vault.example.com:8200",
            "timeout": "10s",
            "auth": {
                "bootstrap": { "file": "/etc/key-keeper/bootstrap-token" },
                "appRole": {
                    "name": "node",
                    "path": "approle-nodes",
                    "roleIdLocalPath": "/var/lib/key-keeper/role-id",
                    "secretIdLocalPath": "/var/lib/key-keeper/secret-id"
                }
            },
            "kv": { "path": "clusters/kv" }
        });

        let parsed: OpenBaoConfig = serde_json::from_value(json).unwrap();

        assert_eq!(parsed.address, "https://vault.example.com:8200");
        assert_eq!(parsed.timeout, Duration::from_secs(10));
        assert_eq!(parsed.max_retries, 3);
        assert_eq!(parsed.auth.app_role.name, "node");
        assert_eq!(parsed.auth.app_role.path, "approle-nodes");
        assert_eq!(
            parsed.auth.bootstrap.file,
            Some(PathBuf::from("/etc/key-keeper/bootstrap-token"))
        );
        assert!(parsed.auth.bootstrap.token.is_none());
        assert_eq!(parsed.kv.path, "clusters/kv");
    }
}
