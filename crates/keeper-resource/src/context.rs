use key_keeper_secrets::Store;
use std::sync::Arc;

/// What every reconciliation unit of one issuer shares.
#[derive(Clone)]
pub struct UnitContext {
    /// Issuer name, for logging.
    pub issuer: String,
    pub store: Arc<dyn Store>,
    /// KV v2 mount holding shared CA material, key pairs and secrets.
    pub kv_mount: String,
    /// Substituted for `$HOSTNAME`.
    pub hostname: String,
}
