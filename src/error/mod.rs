use thiserror::Error;

/// Errors raised by the trajectory core (graph, estimator, allocator, pruner, monitor).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Caller input out of range or malformed.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// Node id not present in the graph.
    #[error("Unknown node: {node_id}")]
    UnknownNode {
        /// The id that was looked up.
        node_id: String,
    },

    /// Operation not valid in the current state, e.g. pruning an empty graph.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Why the operation was refused.
        message: String,
    },
}

impl CoreError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn unknown_node(node_id: impl Into<String>) -> Self {
        CoreError::UnknownNode {
            node_id: node_id.into(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        CoreError::InvalidState {
            message: message.into(),
        }
    }
}

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Inconsistent configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Which setting was rejected.
        message: String,
    },

    /// Error from the trajectory core.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File read or write failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        AppError::Config {
            message: message.into(),
        }
    }
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::InvalidInput {
            message: "empty vote set".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid input: empty vote set");

        let err = CoreError::UnknownNode {
            node_id: "node-42".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown node: node-42");

        let err = CoreError::InvalidState {
            message: "graph has no root".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid state: graph has no root");
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "low threshold above high threshold".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Configuration error: low threshold above high threshold"
        );
    }

    #[test]
    fn test_core_error_conversion_to_app_error() {
        let core_err = CoreError::unknown_node("missing");
        let app_err: AppError = core_err.into();
        assert!(matches!(app_err, AppError::Core(CoreError::UnknownNode { .. })));
        assert!(app_err.to_string().contains("Unknown node: missing"));
    }

    #[test]
    fn test_json_error_conversion_to_app_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let app_err: AppError = json_err.into();
        assert!(matches!(app_err, AppError::Serialization(_)));
    }

    #[test]
    fn test_io_error_conversion_to_app_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }
}
