// ============================================================================
// Record Lifecycle
// ============================================================================
//
// State pattern for one record:
//
//   Empty ──fetch──> Loading ──push──> Clean
//                                        │
//            ┌───────── local write ─────┤
//            v                           │
//   Updated(Uncommitted) ──commit──> Updated(InFlight) ──ack──> Clean
//            ^                           │
//            └──── transport failure ────┤
//                                        └─ rejection ─> Updated(Invalid)
//
//   Created(..) follows the same phases and ends in Clean with a server id.
//   Deleted(..) ends in DeletedSaved, which is terminal.
//
// Transitions are pure: each returns the next state or an
// `InvalidTransition` error naming the current state.
//
// ============================================================================

use crate::core::{Result, StoreError};
use crate::transaction::DirtyType;
use std::fmt;

/// Commit phase of a dirty record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyPhase {
    Uncommitted,
    InFlight,
    Invalid,
}

impl DirtyPhase {
    fn name(&self) -> &'static str {
        match self {
            DirtyPhase::Uncommitted => "uncommitted",
            DirtyPhase::InFlight => "inFlight",
            DirtyPhase::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RecordState {
    #[default]
    Empty,
    Loading,
    Clean,
    Created(DirtyPhase),
    Updated(DirtyPhase),
    Deleted(DirtyPhase),
    DeletedSaved,
}

impl RecordState {
    /// Dotted state path, e.g. `loaded.dirty.inFlight`.
    pub fn state_name(&self) -> &'static str {
        use DirtyPhase::*;
        use RecordState::*;
        match self {
            Empty => "empty",
            Loading => "loading",
            Clean => "loaded.clean",
            Updated(Uncommitted) => "loaded.dirty.uncommitted",
            Updated(InFlight) => "loaded.dirty.inFlight",
            Updated(Invalid) => "loaded.dirty.invalid",
            Created(Uncommitted) => "new.uncommitted",
            Created(InFlight) => "new.inFlight",
            Created(Invalid) => "new.invalid",
            Deleted(Uncommitted) => "deleted.uncommitted",
            Deleted(InFlight) => "deleted.inFlight",
            Deleted(Invalid) => "deleted.invalid",
            DeletedSaved => "deleted.saved",
        }
    }

    pub fn phase(&self) -> Option<DirtyPhase> {
        match self {
            RecordState::Created(phase) | RecordState::Updated(phase) | RecordState::Deleted(phase) => {
                Some(*phase)
            }
            _ => None,
        }
    }

    pub fn dirty_type(&self) -> Option<DirtyType> {
        match self {
            RecordState::Created(_) => Some(DirtyType::Created),
            RecordState::Updated(_) => Some(DirtyType::Updated),
            RecordState::Deleted(_) => Some(DirtyType::Deleted),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RecordState::Empty)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, RecordState::Loading)
    }

    /// The record has data (anything past `Loading`).
    pub fn is_loaded(&self) -> bool {
        !matches!(self, RecordState::Empty | RecordState::Loading)
    }

    pub fn is_dirty(&self) -> bool {
        self.phase().is_some()
    }

    pub fn is_new(&self) -> bool {
        matches!(self, RecordState::Created(_))
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, RecordState::Deleted(_) | RecordState::DeletedSaved)
    }

    pub fn is_in_flight(&self) -> bool {
        self.phase() == Some(DirtyPhase::InFlight)
    }

    pub fn is_uncommitted(&self) -> bool {
        self.phase() == Some(DirtyPhase::Uncommitted)
    }

    pub fn is_valid(&self) -> bool {
        self.phase() != Some(DirtyPhase::Invalid)
    }

    fn illegal(&self, operation: &'static str) -> StoreError {
        StoreError::InvalidTransition {
            state: self.state_name(),
            operation,
        }
    }

    fn with_phase(&self, phase: DirtyPhase) -> Self {
        match self {
            RecordState::Created(_) => RecordState::Created(phase),
            RecordState::Updated(_) => RecordState::Updated(phase),
            RecordState::Deleted(_) => RecordState::Deleted(phase),
            other => *other,
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// A fetch was issued for a record without data.
    pub fn loading(self) -> Result<Self> {
        match self {
            RecordState::Empty | RecordState::Loading => Ok(RecordState::Loading),
            _ => Err(self.illegal("load")),
        }
    }

    /// Server data arrived. Dirty records keep their state; only their
    /// canonical layer changes.
    pub fn did_load(self) -> Result<Self> {
        match self {
            RecordState::Empty | RecordState::Loading | RecordState::Clean => Ok(RecordState::Clean),
            RecordState::DeletedSaved => Err(self.illegal("push into")),
            dirty => Ok(dirty),
        }
    }

    pub fn not_found(self) -> Self {
        match self {
            RecordState::Loading => RecordState::Empty,
            other => other,
        }
    }

    /// A local attribute or relationship write.
    pub fn did_set_property(self) -> Result<Self> {
        match self {
            RecordState::Clean => Ok(RecordState::Updated(DirtyPhase::Uncommitted)),
            RecordState::Created(_) | RecordState::Updated(_) => Ok(self),
            _ => Err(self.illegal("set a property on")),
        }
    }

    pub fn will_commit(self) -> Result<Self> {
        match self.phase() {
            Some(DirtyPhase::Uncommitted) => Ok(self.with_phase(DirtyPhase::InFlight)),
            _ => Err(self.illegal("commit")),
        }
    }

    /// The adapter acknowledged the save.
    pub fn did_commit(self) -> Result<Self> {
        match self {
            RecordState::Created(DirtyPhase::InFlight) | RecordState::Updated(DirtyPhase::InFlight) => {
                Ok(RecordState::Clean)
            }
            RecordState::Deleted(DirtyPhase::InFlight) => Ok(RecordState::DeletedSaved),
            _ => Err(self.illegal("acknowledge")),
        }
    }

    pub fn became_invalid(self) -> Result<Self> {
        match self.phase() {
            Some(DirtyPhase::InFlight) | Some(DirtyPhase::Invalid) => {
                Ok(self.with_phase(DirtyPhase::Invalid))
            }
            _ => Err(self.illegal("invalidate")),
        }
    }

    pub fn became_valid(self) -> Self {
        match self.phase() {
            Some(DirtyPhase::Invalid) => self.with_phase(DirtyPhase::Uncommitted),
            _ => self,
        }
    }

    /// Transport failure while in flight.
    pub fn commit_failed(self) -> Result<Self> {
        match self.phase() {
            Some(DirtyPhase::InFlight) => Ok(self.with_phase(DirtyPhase::Uncommitted)),
            _ => Err(self.illegal("fail")),
        }
    }

    /// Local delete. A record that never reached the server goes straight
    /// to `DeletedSaved`.
    pub fn delete(self) -> Result<Self> {
        use DirtyPhase::*;
        match self {
            RecordState::Clean | RecordState::Updated(Uncommitted | Invalid) => {
                Ok(RecordState::Deleted(Uncommitted))
            }
            RecordState::Created(Uncommitted | Invalid) => Ok(RecordState::DeletedSaved),
            RecordState::Deleted(Uncommitted | Invalid) | RecordState::DeletedSaved => Ok(self),
            _ => Err(self.illegal("delete")),
        }
    }

    /// Discard local changes.
    pub fn rollback(self) -> Result<Self> {
        use DirtyPhase::*;
        match self {
            RecordState::Updated(Uncommitted | Invalid) | RecordState::Deleted(Uncommitted | Invalid) => {
                Ok(RecordState::Clean)
            }
            RecordState::Created(Uncommitted | Invalid) => Ok(RecordState::DeletedSaved),
            RecordState::Created(InFlight) | RecordState::Updated(InFlight) | RecordState::Deleted(InFlight) => {
                Err(self.illegal("roll back"))
            }
            other => Ok(other),
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

impl fmt::Display for DirtyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DirtyPhase::*;

    #[test]
    fn test_update_commit_cycle() {
        let state = RecordState::Empty.loading().unwrap().did_load().unwrap();
        assert_eq!(state, RecordState::Clean);

        let state = state.did_set_property().unwrap();
        assert_eq!(state.state_name(), "loaded.dirty.uncommitted");
        assert!(state.is_dirty());

        let state = state.will_commit().unwrap();
        assert!(state.is_in_flight());
        // edits while in flight queue up without changing the phase
        assert_eq!(state.did_set_property().unwrap(), state);

        assert_eq!(state.did_commit().unwrap(), RecordState::Clean);
    }

    #[test]
    fn test_invalid_round_trip() {
        let state = RecordState::Updated(InFlight).became_invalid().unwrap();
        assert_eq!(state.state_name(), "loaded.dirty.invalid");
        assert!(!state.is_valid());
        assert!(state.will_commit().is_err());

        let state = state.became_valid();
        assert_eq!(state, RecordState::Updated(Uncommitted));
    }

    #[test]
    fn test_transport_failure_returns_to_uncommitted() {
        let state = RecordState::Created(InFlight).commit_failed().unwrap();
        assert_eq!(state.state_name(), "new.uncommitted");
    }

    #[test]
    fn test_delete_paths() {
        assert_eq!(RecordState::Clean.delete().unwrap(), RecordState::Deleted(Uncommitted));
        assert_eq!(RecordState::Created(Uncommitted).delete().unwrap(), RecordState::DeletedSaved);
        assert_eq!(
            RecordState::Deleted(InFlight).did_commit().unwrap(),
            RecordState::DeletedSaved
        );

        let err = RecordState::Updated(InFlight).delete().unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition { state: "loaded.dirty.inFlight", operation: "delete" }
        ));
    }

    #[test]
    fn test_deleted_record_rejects_writes() {
        assert!(RecordState::Deleted(Uncommitted).did_set_property().is_err());
        assert!(RecordState::DeletedSaved.did_set_property().is_err());
        assert!(RecordState::Empty.did_set_property().is_err());
    }

    #[test]
    fn test_rollback() {
        assert_eq!(RecordState::Updated(Invalid).rollback().unwrap(), RecordState::Clean);
        assert_eq!(RecordState::Deleted(Uncommitted).rollback().unwrap(), RecordState::Clean);
        assert_eq!(RecordState::Created(Uncommitted).rollback().unwrap(), RecordState::DeletedSaved);
        assert_eq!(RecordState::Clean.rollback().unwrap(), RecordState::Clean);
        assert!(RecordState::Updated(InFlight).rollback().is_err());
    }

    #[test]
    fn test_not_found_only_resets_loading() {
        assert_eq!(RecordState::Loading.not_found(), RecordState::Empty);
        assert_eq!(RecordState::Clean.not_found(), RecordState::Clean);
    }
}
