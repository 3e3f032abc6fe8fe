//! Per-unit results of a reconciliation pass.

use crate::trigger::TriggerReport;
use std::fmt;

/// Kind of reconciled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    RootCa,
    IntermediateCa,
    Certificate,
    Key,
    Secret,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::RootCa => "root_ca",
            ResourceKind::IntermediateCa => "intermediate_ca",
            ResourceKind::Certificate => "certificate",
            ResourceKind::Key => "key",
            ResourceKind::Secret => "secret",
        }
    }
}

/// What a reconciliation unit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Valid material, nothing written.
    Unchanged,
    /// Existing material written locally without new issuance.
    Stored,
    /// New material issued and stored.
    Issued,
    /// Nothing to do this pass (e.g. a read-only CA that does not exist yet).
    Skipped,
    /// The unit failed; the error was logged.
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Unchanged => "unchanged",
            Outcome::Stored => "stored",
            Outcome::Issued => "issued",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one reconciliation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: Outcome,
    pub triggers: TriggerReport,
}

impl UnitReport {
    pub fn new(kind: ResourceKind, name: &str, outcome: Outcome) -> Self {
        Self {
            kind,
            name: name.to_string(),
            outcome,
            triggers: TriggerReport::default(),
        }
    }

    pub fn with_triggers(mut self, triggers: TriggerReport) -> Self {
        self.triggers = triggers;
        self
    }
}

/// Everything one `check_resource` pass did.
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub reports: Vec<UnitReport>,
}

impl PassSummary {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.reports.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn outcome_of(&self, name: &str) -> Option<Outcome> {
        self.reports.iter().find(|r| r.name == name).map(|r| r.outcome)
    }

    pub fn triggers(&self) -> TriggerReport {
        self.reports.iter().fold(TriggerReport::default(), |acc, r| TriggerReport {
            succeeded: acc.succeeded + r.triggers.succeeded,
            failed: acc.failed + r.triggers.failed,
        })
    }

    pub fn merge(&mut self, other: PassSummary) {
        self.reports.extend(other.reports);
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unchanged={} stored={} issued={} skipped={} failed={}",
            self.count(Outcome::Unchanged),
            self.count(Outcome::Stored),
            self.count(Outcome::Issued),
            self.count(Outcome::Skipped),
            self.count(Outcome::Failed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_summary_counts() {
        let summary = PassSummary {
            reports: vec![
                UnitReport::new(ResourceKind::Certificate, "web", Outcome::Issued)
                    .with_triggers(TriggerReport { succeeded: 1, failed: 1 }),
                UnitReport::new(ResourceKind::Secret, "token", Outcome::Stored),
                UnitReport::new(ResourceKind::IntermediateCa, "ica", Outcome::Failed),
            ],
        };

        assert_eq!(summary.count(Outcome::Issued), 1);
        assert_eq!(summary.count(Outcome::Unchanged), 0);
        assert_eq!(summary.outcome_of("ica"), Some(Outcome::Failed));
        assert_eq!(summary.triggers(), TriggerReport { succeeded: 1, failed: 1 });
        assert_eq!(
            summary.to_string(),
            "unchanged=0 stored=1 issued=1 skipped=0 failed=1"
        );
    }
}
