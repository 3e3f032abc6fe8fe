//! OpenBao/Vault client integration.
//!
//! This module provides the [`Store`] implementation backed by OpenBao (or
//! HashiCorp Vault). It supports:
//! - AppRole authentication bootstrapped from a one-time token
//! - KV v2 secrets engine for shared CA material, key pairs and secrets
//! - PKI secrets engine for CA setup and certificate signing

mod auth;
mod client;
mod kv;
mod pki;

pub use auth::{renewal_delay, spawn_token_renewal, AppRoleAuth, AppRoleCredentials, TokenRenewer};
pub use client::{ApiResponse, AuthInfo, OpenBaoClient, StatusError};
pub use kv::{KvClient, KvData, KvMetadata};
pub use pki::{
    from_data, to_data, CertificateBundle, GenerateRequest, GeneratedCsr, IssueRequest, KeyExport,
    PkiClient, SetSignedRequest, SignIntermediateRequest, SignRequest,
};

use crate::store::{SecretData, Store};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
impl Store for OpenBaoClient {
    async fn read(&self, path: &str) -> Result<Option<SecretData>> {
        debug!(issuer = %self.issuer(), path = %path, "read");
        self.get_data::<SecretData>(path).await
    }

    async fn write(&self, path: &str, data: SecretData) -> Result<Option<SecretData>> {
        debug!(issuer = %self.issuer(), path = %path, "write");
        self.post_data::<_, SecretData>(path, &data).await
    }

    async fn put(&self, kv_mount: &str, key: &str, data: SecretData) -> Result<()> {
        let path = KvClient::new(kv_mount).data_path(key);
        debug!(issuer = %self.issuer(), path = %path, "kv put");
        self.post_data::<_, serde_json::Value>(&path, &KvClient::entry_body(data))
            .await?;
        Ok(())
    }

    async fn get(&self, kv_mount: &str, key: &str) -> Result<Option<SecretData>> {
        let path = KvClient::new(kv_mount).data_path(key);
        debug!(issuer = %self.issuer(), path = %path, "kv get");
        let response = self.get_data::<SecretData>(&path).await?;
        Ok(response.and_then(KvClient::parse_entry))
    }
}
