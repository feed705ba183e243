// ============================================================================
// Relationships Module
// ============================================================================
//
// - state:    per-record canonical/current linkage of one relationship
// - graph:    mutual linkage maintenance across the identity map
// - payloads: inverse reconciliation on payloads before they are pushed
//
// ============================================================================

pub(crate) mod graph;
pub mod payloads;
pub mod state;

pub use payloads::{RelationshipInfo, RelationshipPayloadsManager};
pub use state::{Linkage, RelationshipState, WriteMode};
