//! PKI secrets engine paths and payloads.

use crate::store::SecretData;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Paths into one PKI mount (e.g., "pki" or "clusters/web/pki").
#[derive(Debug, Clone)]
pub struct PkiClient {
    mount: String,
}

/// Where a generated CA private key ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExport {
    /// The key never leaves the engine.
    Internal,
    /// The key is returned in the response.
    Exported,
}

impl KeyExport {
    pub fn from_exported(exported: bool) -> Self {
        if exported {
            KeyExport::Exported
        } else {
            KeyExport::Internal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyExport::Internal => "internal",
            KeyExport::Exported => "exported",
        }
    }
}

impl PkiClient {
    /// Create a path helper for the given mount.
    pub fn new(mount: &str) -> Self {
        Self {
            mount: mount.trim_matches('/').to_string(),
        }
    }

    /// Get the API path for the CA chain of an intermediate mount.
    pub fn ca_chain_path(&self) -> String {
        format!("{}/cert/ca_chain", self.mount)
    }

    /// Get the API path for the CA certificate.
    pub fn ca_path(&self) -> String {
        format!("{}/cert/ca", self.mount)
    }

    /// Get the API path for generating a self-signed root.
    pub fn generate_root_path(&self, export: KeyExport) -> String {
        format!("{}/root/generate/{}", self.mount, export.as_str())
    }

    /// Get the API path for generating an intermediate CSR.
    pub fn generate_intermediate_path(&self, export: KeyExport) -> String {
        format!("{}/intermediate/generate/{}", self.mount, export.as_str())
    }

    /// Get the API path for signing an intermediate CSR with this mount's root.
    pub fn sign_intermediate_path(&self) -> String {
        format!("{}/root/sign-intermediate", self.mount)
    }

    /// Get the API path for installing a signed intermediate certificate.
    pub fn set_signed_path(&self) -> String {
        format!("{}/intermediate/set-signed", self.mount)
    }

    /// Get the API path for signing a leaf CSR.
    pub fn sign_path(&self, role: &str) -> String {
        format!("{}/sign/{}", self.mount, role)
    }

    /// Get the API path for issuing a leaf certificate with a server-side key.
    pub fn issue_path(&self, role: &str) -> String {
        format!("{}/issue/{}", self.mount, role)
    }

    /// Get the mount point.
    pub fn mount(&self) -> &str {
        &self.mount
    }
}

/// CA generation request (root or intermediate).
#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    pub common_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// Request to sign an intermediate CSR with a root.
#[derive(Debug, Serialize)]
pub struct SignIntermediateRequest {
    pub csr: String,
    pub format: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

impl SignIntermediateRequest {
    pub fn new(csr: String, ttl: Option<String>) -> Self {
        Self {
            csr,
            format: "pem_bundle".to_string(),
            ttl,
        }
    }
}

/// Request to install a signed intermediate certificate.
#[derive(Debug, Serialize)]
pub struct SetSignedRequest {
    pub certificate: String,
}

/// Request to sign a locally built leaf CSR.
#[derive(Debug, Serialize)]
pub struct SignRequest {
    pub csr: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// Request to issue a leaf certificate with a server-generated key.
#[derive(Debug, Serialize)]
pub struct IssueRequest {
    /// Common name for the certificate.
    pub common_name: String,

    /// Alternative names, comma separated.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alt_names: String,

    /// IP SANs, comma separated.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip_sans: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

impl IssueRequest {
    pub fn new(common_name: &str, alt_names: &[String], ip_sans: &[String], ttl: Option<String>) -> Self {
        Self {
            common_name: common_name.to_string(),
            alt_names: alt_names.join(","),
            ip_sans: ip_sans.join(","),
            ttl,
        }
    }
}

/// CSR returned by intermediate generation.
#[derive(Debug, Deserialize)]
pub struct GeneratedCsr {
    pub csr: String,

    /// Present only for exported keys.
    #[serde(default)]
    pub private_key: Option<String>,
}

/// A certificate returned by root generation, signing or issuance.
#[derive(Debug, Clone, Deserialize)]
pub struct CertificateBundle {
    /// The certificate in PEM format.
    pub certificate: String,

    /// The private key in PEM format, when the engine generated it.
    #[serde(default)]
    pub private_key: Option<String>,

    /// The issuing CA certificate in PEM format.
    #[serde(default)]
    pub issuing_ca: Option<String>,

    /// The full CA chain in PEM format.
    #[serde(default)]
    pub ca_chain: Vec<String>,

    #[serde(default)]
    pub serial_number: Option<String>,
}

/// Serialize a request into a write payload.
pub fn to_data<T: Serialize>(request: &T) -> Result<SecretData> {
    match serde_json::to_value(request).context("failed to serialize PKI request")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("PKI request serialized to non-object: {}", other),
    }
}

/// Deserialize a response payload.
pub fn from_data<T: DeserializeOwned>(data: SecretData) -> Result<T> {
    serde_json::from_value(Value::Object(data)).context("failed to parse PKI response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths() {
        let pki = PkiClient::new("clusters/web/pki/");
        assert_eq!(pki.ca_chain_path(), "clusters/web/pki/cert/ca_chain");
        assert_eq!(pki.ca_path(), "clusters/web/pki/cert/ca");
        assert_eq!(
            pki.generate_root_path(KeyExport::Internal),
            "clusters/web/pki/root/generate/internal"
        );
        assert_eq!(
            pki.generate_intermediate_path(KeyExport::Exported),
            "clusters/web/pki/intermediate/generate/exported"
        );
        assert_eq!(pki.sign_intermediate_path(), "clusters/web/pki/root/sign-intermediate");
        assert_eq!(pki.set_signed_path(), "clusters/web/pki/intermediate/set-signed");
        assert_eq!(pki.sign_path("web"), "clusters/web/pki/sign/web");
        assert_eq!(pki.issue_path("web"), "clusters/web/pki/issue/web");
    }

    #[test]
    fn test_issue_request_joins_names() {
        let req = IssueRequest::new(
            "web.example.com",
            &["web.example.com".to_string(), "api.example.com".to_string()],
            &["10.0.0.5".to_string()],
            Some("720h".to_string()),
        );
        let data = to_data(&req).unwrap();

        assert_eq!(data["alt_names"], json!("web.example.com,api.example.com"));
        assert_eq!(data["ip_sans"], json!("10.0.0.5"));
        assert_eq!(data["ttl"], json!("720h"));
    }

    #[test]
    fn test_issue_request_omits_empty_fields() {
        let req = IssueRequest::new("web.example.com", &[], &[], None);
        let data = to_data(&req).unwrap();

        assert!(!data.contains_key("alt_names"));
        assert!(!data.contains_key("ip_sans"));
        assert!(!data.contains_key("ttl"));
    }

    #[test]
    fn test_sign_intermediate_uses_pem_bundle() {
        let req = SignIntermediateRequest::new("csr-pem".to_string(), Some("8760h".to_string()));
        let data = to_data(&req).unwrap();
        assert_eq!(data["format"], json!("pem_bundle"));
        assert_eq!(data["csr"], json!("csr-pem"));
    }

    #[test]
    fn test_parse_generated_csr() {
        let data = json!({"csr": "csr-pem", "private_key": "key-pem", "key_type": "rsa"});
        let parsed: GeneratedCsr = from_data(data.as_object().cloned().unwrap()).unwrap();
        assert_eq!(parsed.csr, "csr-pem");
        assert_eq!(parsed.private_key.as_deref(), Some("key-pem"));
    }
}
