use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Field-keyed validation messages reported by the backend.
///
/// ```text
/// { "name": ["requires X"], "email": ["is taken", "is too long"] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one message for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Builder form of [`ValidationErrors::add`]
    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(field, message);
        self
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Drop every message for `field`. Returns true if the field had errors.
    pub fn remove(&mut self, field: &str) -> bool {
        self.0.remove(field).is_some()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(", "))?;
        }
        Ok(())
    }
}

impl<K, V> FromIterator<(K, V)> for ValidationErrors
where
    K: Into<String>,
    V: IntoIterator,
    V::Item: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut errors = ValidationErrors::new();
        for (field, messages) in iter {
            let field = field.into();
            for message in messages {
                errors.add(field.clone(), message);
            }
        }
        errors
    }
}

/// Errors reported by an [`Adapter`](crate::adapter::Adapter).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Invalid(ValidationErrors),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Adapter does not implement '{0}'")]
    Unsupported(&'static str),
}

impl AdapterError {
    pub fn is_invalid(&self) -> bool {
        matches!(self, AdapterError::Invalid(_))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Shape violation: {0}")]
    ShapeViolation(String),

    #[error("Misuse: {0}")]
    Misuse(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Cannot {operation} a record in state '{state}'")]
    InvalidTransition {
        state: &'static str,
        operation: &'static str,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Store has been destroyed")]
    StoreDestroyed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Shape violations, misuse and schema errors are programming errors:
    /// they are never caught internally and never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::ShapeViolation(_) | StoreError::Misuse(_) | StoreError::Schema(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled(_))
    }

    /// The adapter error behind this store error, if any
    pub fn adapter_error(&self) -> Option<&AdapterError> {
        match self {
            StoreError::Adapter(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;
