// Write-ahead progress and operation receipts.
//
// A provisioning write touches up to three state surfaces (config file,
// embedded store, running proxy). Instead of a single boolean, the
// furthest stage reached is tracked and reported so operators can
// resume or manually reconcile after a partial failure.

use chrono::{DateTime, Utc};
use serde_json::Value;
use strum::Display;
use uuid::Uuid;

use crate::model::profile::ServerProfile;

/// The furthest point a multi-surface write has reached, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum WriteStage {
    /// Nothing has been written yet.
    Pending,
    /// The live config file carries the mutation.
    FileWritten,
    /// The panel's embedded store carries the mutation (the surface the
    /// panel rehydrates from on restart).
    StoreWritten,
    /// A service restart was triggered.
    RestartTriggered,
    /// A post-restart read confirmed the mutation.
    Verified,
}

/// Consistency verdict of one completed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProvisionOutcome {
    /// The mutation was written and confirmed present after restart.
    Verified,
    /// The mutation was written but the confirmation read did not (yet)
    /// reflect it -- eventual convergence applies.
    WrittenNotVerified,
    /// One backend surface was updated while a sibling was not.
    PartialWrite,
    Failed,
}

/// What a backend reports after attempting a write.
#[derive(Debug, Clone)]
pub struct WriteReport {
    /// Furthest stage reached.
    pub stage: WriteStage,
    /// A sibling surface failed while another was already updated.
    pub partial: bool,
    /// The write was a no-op (client already present / already absent).
    pub unchanged: bool,
    /// A restart was successfully triggered.
    pub restarted: bool,
    /// Full configuration snapshot, when one could be captured.
    pub snapshot: Option<Value>,
}

impl WriteReport {
    pub fn outcome(&self) -> ProvisionOutcome {
        if self.partial {
            ProvisionOutcome::PartialWrite
        } else {
            match self.stage {
                WriteStage::Verified => ProvisionOutcome::Verified,
                WriteStage::Pending => ProvisionOutcome::Failed,
                _ => ProvisionOutcome::WrittenNotVerified,
            }
        }
    }
}

/// The result handed back to the caller of a successful upsert.
#[derive(Debug, Clone)]
pub struct ProvisionReceipt {
    pub client_id: Uuid,
    pub email: String,
    /// The connection URI issued for this client.
    pub uri: String,
    pub outcome: ProvisionOutcome,
    pub stage: WriteStage,
    pub restarted: bool,
    /// The profile the URI was encoded from, after enrichment.
    pub profile: ServerProfile,
    pub snapshot: Option<Value>,
    pub issued_at: DateTime<Utc>,
}

/// The result of a successful removal.
#[derive(Debug, Clone)]
pub struct RemovalReceipt {
    pub client_id: Uuid,
    pub outcome: ProvisionOutcome,
    pub stage: WriteStage,
    /// `false` when the id was already absent everywhere.
    pub was_present: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(stage: WriteStage, partial: bool) -> WriteReport {
        WriteReport {
            stage,
            partial,
            unchanged: false,
            restarted: false,
            snapshot: None,
        }
    }

    #[test]
    fn partial_flag_dominates_the_outcome() {
        assert_eq!(
            report(WriteStage::Verified, true).outcome(),
            ProvisionOutcome::PartialWrite
        );
    }

    #[test]
    fn stages_map_to_outcomes() {
        assert_eq!(
            report(WriteStage::Verified, false).outcome(),
            ProvisionOutcome::Verified
        );
        assert_eq!(
            report(WriteStage::RestartTriggered, false).outcome(),
            ProvisionOutcome::WrittenNotVerified
        );
        assert_eq!(
            report(WriteStage::Pending, false).outcome(),
            ProvisionOutcome::Failed
        );
    }

    #[test]
    fn stages_are_ordered() {
        assert!(WriteStage::Pending < WriteStage::FileWritten);
        assert!(WriteStage::StoreWritten < WriteStage::RestartTriggered);
        assert!(WriteStage::RestartTriggered < WriteStage::Verified);
    }
}
