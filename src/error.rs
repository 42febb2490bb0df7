//! Error types for relkv
//!
//! Every failure inside an operation aborts the enclosing transaction, so the
//! variants below double as the reasons a transaction was rolled back.

use thiserror::Error;

/// The main error type for relkv operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Not Found
    // ==========================================================================
    #[error("No '{entity}' record matches the given selector")]
    RecordNotFound { entity: String },

    #[error("No '{entity}' record found to connect through relation '{relation}'")]
    RelatedRecordNotFound { entity: String, relation: String },

    // ==========================================================================
    // Validation Failures
    // ==========================================================================
    #[error("Foreign key '{field}' on '{entity}' references a missing '{target}' record")]
    ForeignKeyViolation {
        entity: String,
        field: String,
        target: String,
    },

    #[error("Missing required field '{field}' on '{entity}'")]
    MissingRequiredField { entity: String, field: String },

    #[error("Unique constraint on '{entity}' ({}) violated", fields.join(", "))]
    UniqueViolation { entity: String, fields: Vec<String> },

    #[error("Cannot delete '{entity}' record: '{dependent}' records still reference it through '{relation}'")]
    RestrictViolation {
        entity: String,
        dependent: String,
        relation: String,
    },

    #[error("Invalid value for '{entity}.{field}': {reason}")]
    InvalidValue {
        entity: String,
        field: String,
        reason: String,
    },

    #[error("Primary key field '{field}' of '{entity}' cannot be changed")]
    ImmutablePrimaryKey { entity: String, field: String },

    // ==========================================================================
    // Unsupported
    // ==========================================================================
    #[error("'{operation}' is not supported (relation '{relation}' on '{entity}')")]
    UnsupportedOperation {
        operation: &'static str,
        entity: String,
        relation: String,
    },

    // ==========================================================================
    // Store Errors
    // ==========================================================================
    #[error("Table '{table}' is not part of this transaction")]
    TableNotInScope { table: String },

    #[error("Cannot write to '{table}' in a readonly transaction")]
    ReadOnlyTransaction { table: String },

    #[error("Transaction is no longer active")]
    TransactionInactive,

    #[error("Table '{name}' does not exist")]
    TableNotFound { name: String },

    #[error("Index '{index}' does not exist on table '{table}'")]
    IndexNotFound { table: String, index: String },

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    // ==========================================================================
    // Query Errors
    // ==========================================================================
    #[error("Unknown entity '{name}'")]
    UnknownEntity { name: String },

    #[error("Unknown field '{field}' on '{entity}'")]
    UnknownField { entity: String, field: String },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("{0}")]
    Parse(#[from] relql::ParseError),

    // ==========================================================================
    // Schema Errors
    // ==========================================================================
    #[error("Schema error in '{entity}': {message}")]
    Schema { entity: String, message: String },

    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Reserved name '{name}' cannot be used")]
    ReservedName { name: String },
}

/// Result type alias for relkv operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid_query(message: impl Into<String>) -> Self {
        Error::InvalidQuery {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_value(entity: &str, field: &str, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            entity: entity.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Conversions from external error types
// =============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::Storage(err.into())
    }
}

impl From<crate::validation::ValidationError> for Error {
    fn from(err: crate::validation::ValidationError) -> Self {
        use crate::validation::ValidationError;
        match err {
            ValidationError::InvalidIdentifier(value, reason) => Error::InvalidIdentifier {
                kind: "identifier",
                value,
                reason,
            },
            ValidationError::TooLong(value, _max) => Error::InvalidIdentifier {
                kind: "identifier",
                value,
                reason: "exceeds maximum length",
            },
            ValidationError::Empty => Error::InvalidIdentifier {
                kind: "identifier",
                value: String::new(),
                reason: "cannot be empty",
            },
            ValidationError::Reserved(name) => Error::ReservedName { name },
        }
    }
}

// =============================================================================
// Error Display Helpers
// =============================================================================

impl Error {
    /// Returns a user-friendly suggestion for fixing the error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::RecordNotFound { .. } => Some("Check the selector; use the non-throwing variant to get None instead"),
            Error::RelatedRecordNotFound { .. } => Some("Create the related record first, or use a nested `create`"),
            Error::ForeignKeyViolation { .. } => Some("Point the foreign key at an existing record, or connect through the relation"),
            Error::MissingRequiredField { .. } => Some("Add the required field to `data` or declare a default for it"),
            Error::RestrictViolation { .. } => Some("Delete or reassign the dependent records first"),
            Error::ImmutablePrimaryKey { .. } => Some("Create a new record instead of changing the primary key"),
            Error::UnsupportedOperation { .. } => Some("Use `connect` or `create` explicitly"),
            Error::TableNotInScope { .. } => {
                Some("Open the transaction over every table the operation touches, including related entities")
            }
            Error::ReadOnlyTransaction { .. } => Some("Open the transaction in readwrite mode"),
            Error::InvalidIdentifier { .. } => Some("Use only letters, numbers and underscores, starting with a letter"),
            _ => None,
        }
    }

    /// Returns true if retrying with a corrected request can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::RecordNotFound { .. }
                | Error::RelatedRecordNotFound { .. }
                | Error::ForeignKeyViolation { .. }
                | Error::MissingRequiredField { .. }
                | Error::UniqueViolation { .. }
                | Error::RestrictViolation { .. }
                | Error::InvalidValue { .. }
                | Error::UnknownField { .. }
                | Error::InvalidQuery { .. }
                | Error::Parse(_)
        )
    }
}
