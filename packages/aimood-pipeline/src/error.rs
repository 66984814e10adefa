use aimood_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Broken invariant: post-sentinel put, surplus task_done, bad limits.
    /// Never caught inside the pipeline.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl PipelineError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation(_))
    }
}

/// Failure returned by a transform call. Always isolated to the item that
/// produced it.
#[derive(Error, Debug)]
pub enum TransformError {
    /// Network / remote service failure
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl TransformError {
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    pub fn unexpected<E: std::fmt::Display>(e: E) -> Self {
        Self::Unexpected(anyhow::anyhow!("{}", e))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TransformError::Transport(_) => ErrorCategory::Transient,
            TransformError::Unexpected(_) => ErrorCategory::Permanent,
        }
    }
}

/// Coarse error class attached to dropped-item log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Remote side failed; a later run may succeed
    Transient,
    /// The transform rejected the item itself
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_error_category() {
        assert_eq!(
            TransformError::transport("connection reset").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            TransformError::unexpected("missing field web_url").category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn test_anyhow_converts_to_unexpected() {
        fn failing() -> std::result::Result<(), TransformError> {
            Err(anyhow::anyhow!("bad payload"))?;
            Ok(())
        }

        let err = failing().unwrap_err();
        assert!(matches!(err, TransformError::Unexpected(_)));
        assert_eq!(err.to_string(), "bad payload");
    }

    #[test]
    fn test_storage_error_converts() {
        let err: PipelineError = StorageError::io("disk full").into();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert!(!err.is_contract_violation());
        assert!(PipelineError::ContractViolation("x".into()).is_contract_violation());
    }
}
