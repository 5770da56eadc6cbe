use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("no storage backend registered for scheme `{0}`")]
    UnknownBackend(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connectivity fault expected to clear up on its own; the only class the
    /// retry layer acts on.
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("incompatible backend version: {0}")]
    BadVersion(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("type conversion error: {0}")]
    TypeConversion(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("batch-bounded deletion is not supported: {0}")]
    BatchUnsupported(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid pagination marker: {0}")]
    InvalidMarker(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }

    /// Errors caused by the caller's input rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidQuery(_)
                | StorageError::InvalidMarker(_)
                | StorageError::InvalidInput(_)
                | StorageError::TypeConversion(_)
        )
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, StorageError::NotImplemented(_))
    }

    pub(crate) fn unsupported_operator(op: impl std::fmt::Display, field: &str) -> Self {
        StorageError::InvalidQuery(format!(
            "operator `{op}` is not supported for field `{field}`"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(StorageError::Transient("reset".into()).is_transient());
        assert!(!StorageError::Backend("boom".into()).is_transient());
        assert!(!StorageError::Configuration("no url".into()).is_transient());
    }

    #[test]
    fn client_errors_are_grouped() {
        assert!(StorageError::InvalidMarker("m".into()).is_client_error());
        assert!(StorageError::unsupported_operator("gt", "start_timestamp").is_client_error());
        assert!(!StorageError::NotImplemented("x".into()).is_client_error());
    }
}
