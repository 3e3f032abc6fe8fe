//! Secrets backend access for key-keeper.
//!
//! This crate provides the [`Store`] abstraction that reconciliation runs
//! against, plus its OpenBao/Vault implementation:
//! - AppRole authentication bootstrapped from a one-time token, with the
//!   role_id and secret_id cached on local disk
//! - Token renewal at half the token TTL
//! - Logical reads/writes for the PKI engine and KV v2 get/put
//!
//! The `testing` feature adds `MemoryStore`, a recording in-process store.
//!
//! # Example
//!
//! ```no_run
//! use key_keeper_secrets::{OpenBaoClient, OpenBaoConfig, Store};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = OpenBaoConfig {
//!     address: "https://openbao.internal:8200".to_string(),
//!     ..Default::default()
//! };
//!
//! let store = OpenBaoClient::connect("vault-main", &config).await?;
//! let chain = store.read("pki/cert/ca_chain").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod openbao;
pub mod store;

// Re-exports for convenience
pub use config::{AppRoleConfig, AuthConfig, BootstrapConfig, KvConfig, OpenBaoConfig};
pub use openbao::OpenBaoClient;
pub use store::{string_field, SecretData, Store};

#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryStore, StoreCall};
