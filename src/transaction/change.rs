// ============================================================================
// Dirty Types
// ============================================================================
//
// The kind of pending change a dirty record carries. Commit groups records
// by (model, DirtyType) and picks the matching adapter save method.
//
// ============================================================================

use crate::payload::RequestType;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DirtyType {
    Created,
    Updated,
    Deleted,
}

impl DirtyType {
    /// Request type used to normalize the save acknowledgment
    pub fn request_type(&self) -> RequestType {
        match self {
            DirtyType::Created => RequestType::CreateRecord,
            DirtyType::Updated => RequestType::UpdateRecord,
            DirtyType::Deleted => RequestType::DeleteRecord,
        }
    }

    /// Name of the single-record adapter operation
    pub fn operation(&self) -> &'static str {
        match self {
            DirtyType::Created => "createRecord",
            DirtyType::Updated => "updateRecord",
            DirtyType::Deleted => "deleteRecord",
        }
    }

    /// Name of the batched adapter operation
    pub fn batch_operation(&self) -> &'static str {
        match self {
            DirtyType::Created => "createRecords",
            DirtyType::Updated => "updateRecords",
            DirtyType::Deleted => "deleteRecords",
        }
    }
}

impl fmt::Display for DirtyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirtyType::Created => write!(f, "created"),
            DirtyType::Updated => write!(f, "updated"),
            DirtyType::Deleted => write!(f, "deleted"),
        }
    }
}
