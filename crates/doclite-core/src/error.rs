//! Error types for the document store.

use thiserror::Error;

/// Result type alias using DocError.
pub type Result<T> = std::result::Result<T, DocError>;

/// Errors that can occur in the document store.
#[derive(Error, Debug)]
pub enum DocError {
    /// Query or update uses an operator the compiler does not support.
    #[error("Unsupported operator {operator} in {node}")]
    UnsupportedOperator { operator: String, node: String },

    /// Query document does not have a compilable shape.
    #[error("Malformed query: {message} in {node}")]
    MalformedQuery { message: String, node: String },

    /// Update document does not have a compilable shape.
    #[error("Malformed update: {message}")]
    MalformedUpdate { message: String },

    /// The same key is targeted by more than one update operator.
    #[error("Conflicting update operators for key: {key}")]
    ConflictingUpdate { key: String },

    /// Operand does not match the operator's expected type.
    #[error("Invalid operand for {operator}: {message}")]
    InvalidOperand { operator: String, message: String },

    /// Collection, field, or index name cannot be quoted safely.
    #[error("Invalid name: {name:?}")]
    InvalidName { name: String },

    /// Identifier collides with an existing document.
    #[error("Duplicate identifier: {id}")]
    DuplicateIdentifier { id: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DocError {
    /// Create an unsupported-operator error carrying the offending subtree.
    pub fn unsupported_operator(operator: impl Into<String>, node: &serde_json::Value) -> Self {
        Self::UnsupportedOperator {
            operator: operator.into(),
            node: node.to_string(),
        }
    }

    /// Create a malformed-query error carrying the offending subtree.
    pub fn malformed_query(message: impl Into<String>, node: &serde_json::Value) -> Self {
        Self::MalformedQuery {
            message: message.into(),
            node: node.to_string(),
        }
    }

    /// Create a malformed-update error.
    pub fn malformed_update(message: impl Into<String>) -> Self {
        Self::MalformedUpdate {
            message: message.into(),
        }
    }

    /// Create an invalid-operand error.
    pub fn invalid_operand(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperand {
            operator: operator.into(),
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the stable kind tag for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedOperator { .. } => "UNSUPPORTED_OPERATOR",
            Self::MalformedQuery { .. } => "MALFORMED_QUERY",
            Self::MalformedUpdate { .. } => "MALFORMED_UPDATE",
            Self::ConflictingUpdate { .. } => "CONFLICTING_UPDATE",
            Self::InvalidOperand { .. } => "INVALID_OPERAND",
            Self::InvalidName { .. } => "INVALID_NAME",
            Self::DuplicateIdentifier { .. } => "DUPLICATE_IDENTIFIER",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
