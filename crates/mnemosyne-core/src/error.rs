//! Error types for mnemosyne operations.
//!
//! Every fallible operation returns [`MnemosyneResult`]. Errors carry a
//! structured [`ErrorCode`] for programmatic handling and, where it helps,
//! a suggestion for resolving them.

use thiserror::Error;

/// Result type alias for mnemosyne operations.
pub type MnemosyneResult<T> = Result<T, MnemosyneError>;

/// Main error type for all mnemosyne operations.
#[derive(Error, Debug)]
pub enum MnemosyneError {
    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        suggestion: Option<String>,
    },

    /// The named collection does not exist.
    #[error("Collection '{name}' does not exist")]
    CollectionNotFound { name: String },

    /// Vector database operation failed.
    #[error("Vector store error: {message}")]
    VectorStore {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network error.
    #[error("Network error: {message}")]
    Network {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Filter expression could not be parsed.
    #[error("Parse error at offset {offset}: {message}")]
    Parse {
        message: String,
        offset: usize,
        code: ErrorCode,
    },

    /// Provider not supported.
    #[error("Provider not supported: {provider}")]
    UnsupportedProvider { provider: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,
    ValMissingField,
    ValInvalidSchema,
    ValInvalidFilter,
    ValDimensionMismatch,

    // Vector Store (VEC_xxx)
    VecConnectionFailed,
    VecOperationFailed,
    VecCollectionNotFound,

    // Network (NET_xxx)
    NetTimeout,
    NetConnectionFailed,

    // Parse (PARSE_xxx)
    ParseInvalidExpr,
    ParseInvalidResponse,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValMissingField => "VAL_002",
            ErrorCode::ValInvalidSchema => "VAL_003",
            ErrorCode::ValInvalidFilter => "VAL_004",
            ErrorCode::ValDimensionMismatch => "VAL_005",
            ErrorCode::VecConnectionFailed => "VEC_001",
            ErrorCode::VecOperationFailed => "VEC_002",
            ErrorCode::VecCollectionNotFound => "VEC_003",
            ErrorCode::NetTimeout => "NET_001",
            ErrorCode::NetConnectionFailed => "NET_002",
            ErrorCode::ParseInvalidExpr => "PARSE_001",
            ErrorCode::ParseInvalidResponse => "PARSE_002",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl MnemosyneError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            suggestion: None,
        }
    }

    /// Create a validation error with a specific code.
    pub fn validation_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code,
            suggestion: None,
        }
    }

    /// Create a validation error with suggestion.
    pub fn validation_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a schema validation error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::validation_code(ErrorCode::ValInvalidSchema, message)
    }

    /// Reject a filter expression that cannot be used for the operation.
    pub fn invalid_filter(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidFilter,
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a collection-not-found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Create a vector store error.
    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore {
            message: message.into(),
            code: ErrorCode::VecOperationFailed,
            source: None,
        }
    }

    /// Create a vector store connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::VectorStore {
            message: message.into(),
            code: ErrorCode::VecConnectionFailed,
            source: None,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            code: ErrorCode::NetConnectionFailed,
            source: None,
        }
    }

    /// Create a filter expression parse error.
    pub fn parse(message: impl Into<String>, offset: usize) -> Self {
        Self::Parse {
            message: message.into(),
            offset,
            code: ErrorCode::ParseInvalidExpr,
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } => *code,
            Self::CollectionNotFound { .. } => ErrorCode::VecCollectionNotFound,
            Self::VectorStore { code, .. } => *code,
            Self::Network { code, .. } => *code,
            Self::Parse { code, .. } => *code,
            Self::Serialization(_) => ErrorCode::ParseInvalidResponse,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether this error indicates the backend could not be reached.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::VecConnectionFailed | ErrorCode::NetConnectionFailed | ErrorCode::NetTimeout
        )
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Validation { suggestion, .. } => suggestion.as_deref(),
            Self::CollectionNotFound { .. } => {
                Some("Create the collection first or check the collection name")
            }
            Self::VectorStore { .. } => Some("Please check your vector database connection settings"),
            Self::Network { .. } => Some("Please check that the vector database is reachable"),
            Self::Parse { .. } => Some("Please check the filter expression syntax"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = MnemosyneError::validation("Invalid input");
        assert_eq!(err.code(), ErrorCode::ValInvalidInput);
        assert!(err.to_string().contains("Invalid input"));
    }

    #[test]
    fn test_invalid_filter() {
        let err = MnemosyneError::invalid_filter("empty filter", "Use drop_collection");
        assert_eq!(err.code(), ErrorCode::ValInvalidFilter);
        assert_eq!(err.code().as_str(), "VAL_004");
        assert_eq!(err.suggestion(), Some("Use drop_collection"));
    }

    #[test]
    fn test_collection_not_found() {
        let err = MnemosyneError::collection_not_found("memories");
        assert_eq!(err.code(), ErrorCode::VecCollectionNotFound);
        assert_eq!(err.to_string(), "Collection 'memories' does not exist");
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(MnemosyneError::connection("refused").is_connection_error());
        assert!(MnemosyneError::network("timeout").is_connection_error());
        assert!(!MnemosyneError::vector_store("bad").is_connection_error());
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::VecConnectionFailed.as_str(), "VEC_001");
        assert_eq!(ErrorCode::ParseInvalidExpr.as_str(), "PARSE_001");
    }
}
