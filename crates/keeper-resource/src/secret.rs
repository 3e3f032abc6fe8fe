//! Opaque secret reconciliation.

use crate::context::UnitContext;
use crate::declaration::Secret;
use crate::outcome::{Outcome, ResourceKind, UnitReport};
use crate::storage::{write_file, PRIVATE_MODE};
use key_keeper_secrets::string_field;
use tracing::{debug, error, warn};

/// Copy one field of a KV entry to a file.
///
/// The file is rewritten on every pass.
pub async fn reconcile_secret(ctx: &UnitContext, secret: &Secret) -> UnitReport {
    let report = |outcome| UnitReport::new(ResourceKind::Secret, &secret.name, outcome);

    let entry = match ctx.store.get(&ctx.kv_mount, &secret.name).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            warn!(issuer = %ctx.issuer, name = %secret.name, "secret not found");
            return report(Outcome::Skipped);
        }
        Err(e) => {
            warn!(issuer = %ctx.issuer, name = %secret.name, error = %format!("{:#}", e), "get secret");
            return report(Outcome::Failed);
        }
    };

    let Some(value) = string_field(&entry, &secret.key) else {
        warn!(issuer = %ctx.issuer, name = %secret.name, key = %secret.key, "secret has no such key");
        return report(Outcome::Skipped);
    };

    if let Err(e) = write_file(&secret.host_path, value.as_bytes(), PRIVATE_MODE).await {
        error!(issuer = %ctx.issuer, name = %secret.name, path = ?secret.host_path, error = %format!("{:#}", e), "store secret");
        return report(Outcome::Failed);
    }
    debug!(issuer = %ctx.issuer, name = %secret.name, path = ?secret.host_path, "secret stored");
    report(Outcome::Stored)
}
