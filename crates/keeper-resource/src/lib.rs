//! Resource declarations and their reconciliation.
//!
//! An [`Issuer`] owns the certificates, key pairs and secrets declared for one
//! backend connection and reconciles them against a [`key_keeper_secrets::Store`]:
//! - Root and intermediate CAs are read, and generated when allowed
//! - Leaf certificates are renewed before they expire, via a local CSR or
//!   server-side issuance
//! - Key pairs and opaque secrets are copied from KV to local files
//!
//! Local files are only rewritten when their content changes, and trigger
//! commands run after each change.

pub mod ca;
pub mod certificate;
pub mod context;
pub mod csr;
pub mod declaration;
pub mod expiry;
pub mod issuer;
pub mod key;
pub mod outcome;
pub mod san;
pub mod secret;
pub mod storage;
pub mod trigger;

// Re-exports for convenience
pub use declaration::{
    CaSpec, Certificate, CertificateRole, CertificateSpec, IpAddresses, IssueStrategy, IssuerRef,
    Key, PrivateKeySpec, Resources, Secret, Subject, VaultPaths,
};
pub use issuer::Issuer;
pub use outcome::{Outcome, PassSummary, ResourceKind, UnitReport};
pub use trigger::TriggerReport;
