//! Leader-only operation gate.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{CoordinationError, CoordinationResult};

/// Proof that a patch was authorized while this instance led.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchAuthorization {
    /// Authorized patch.
    pub patch_id: String,
    /// Leader that authorized it.
    pub holder: String,
    /// When it was authorized.
    pub authorized_at: DateTime<Utc>,
}

/// Allows privileged operations only while the owning coordinator leads.
///
/// Cheap to clone; every clone observes the same leadership channel.
#[derive(Debug, Clone)]
pub struct PatchGate {
    leader: watch::Receiver<bool>,
    holder: String,
}

impl PatchGate {
    pub(crate) fn new(leader: watch::Receiver<bool>, holder: String) -> Self {
        Self { leader, holder }
    }

    /// Whether the gate is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.leader.borrow()
    }

    /// Authorize applying `patch_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::NotLeader`] unless this instance leads.
    pub fn authorize(&self, patch_id: &str) -> CoordinationResult<PatchAuthorization> {
        if !self.is_open() {
            warn!(patch_id, holder = %self.holder, "Refusing patch: not the leader");
            return Err(CoordinationError::NotLeader {
                operation: format!("patch {patch_id}"),
            });
        }
        info!(patch_id, holder = %self.holder, "Authorized patch");
        Ok(PatchAuthorization {
            patch_id: patch_id.to_string(),
            holder: self.holder.clone(),
            authorized_at: Utc::now(),
        })
    }
}
