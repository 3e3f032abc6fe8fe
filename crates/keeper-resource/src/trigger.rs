//! Post-update commands.

use anyhow::{anyhow, bail, Result};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info};

/// Longest a single trigger may run before it is killed and counted as
/// failed.
pub const TRIGGER_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of running a resource's triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Run every command in order. A failing command is logged and does not stop
/// the ones after it.
pub async fn run_triggers(name: &str, commands: &[String]) -> TriggerReport {
    run_triggers_within(name, commands, TRIGGER_TIMEOUT).await
}

/// [`run_triggers`] with an explicit per-command time limit.
pub async fn run_triggers_within(name: &str, commands: &[String], limit: Duration) -> TriggerReport {
    let mut report = TriggerReport::default();
    for command in commands {
        let result = match timeout(limit, run(command)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("timed out after {:?}", limit)),
        };
        match result {
            Ok(()) => {
                info!(name = %name, command = %command, "trigger executed");
                report.succeeded += 1;
            }
            Err(e) => {
                error!(name = %name, command = %command, error = %e, "certificate trigger");
                report.failed += 1;
            }
        }
    }
    report
}

async fn run(command: &str) -> Result<()> {
    let mut argv = command.split_whitespace();
    let program = argv.next().ok_or_else(|| anyhow!("empty command"))?;
    let status = Command::new(program)
        .args(argv)
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| anyhow!("spawn {}: {}", program, e))?;
    if !status.success() {
        bail!("exited with {}", status);
    }
    Ok(())
}
