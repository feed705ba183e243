pub mod error;
pub mod types;
pub mod value;

pub use error::{AdapterError, AdapterResult, Result, StoreError, ValidationErrors};
pub use types::ClientId;
pub use value::{Attributes, attributes_from_json, attributes_from_map, attributes_to_json, overlay};
