//! Identifier validation for relkv
//!
//! Entity names become table names and, in directory-backed stores, file
//! names. Field names share the payload namespace with combinators and
//! `_count`, so those words are reserved.

use thiserror::Error;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid identifier '{0}': {1}")]
    InvalidIdentifier(String, &'static str),

    #[error("Identifier '{0}' is too long (max {1} characters)")]
    TooLong(String, usize),

    #[error("Identifier cannot be empty")]
    Empty,

    #[error("Reserved name: '{0}'")]
    Reserved(String),
}

/// Maximum length for identifiers
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Names that would collide with device files on some filesystems
const RESERVED_TABLE_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul",
    "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8", "com9",
    "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Keys with a fixed meaning inside payloads
const RESERVED_FIELD_NAMES: &[&str] = &["AND", "OR", "NOT", "_count"];

/// Validate an entity (and therefore table) name
///
/// Rules:
/// - Must be 1-128 characters
/// - Only ASCII letters, digits and underscore
/// - Must start with a letter
/// - Cannot be a reserved device name (case-insensitive)
pub fn validate_entity_name(name: &str) -> Result<(), ValidationError> {
    validate_identifier(name)?;
    if RESERVED_TABLE_NAMES.contains(&name.to_lowercase().as_str()) {
        return Err(ValidationError::Reserved(name.to_string()));
    }
    Ok(())
}

/// Validate a field or relation name
pub fn validate_field_name(name: &str) -> Result<(), ValidationError> {
    if RESERVED_FIELD_NAMES.contains(&name) {
        return Err(ValidationError::Reserved(name.to_string()));
    }
    validate_identifier(name)
}

fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong(name.to_string(), MAX_IDENTIFIER_LENGTH));
    }

    for (i, c) in name.chars().enumerate() {
        if i == 0 && !c.is_ascii_alphabetic() {
            return Err(ValidationError::InvalidIdentifier(
                name.to_string(),
                "must start with a letter",
            ));
        }
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(ValidationError::InvalidIdentifier(
                name.to_string(),
                "contains invalid characters (only alphanumeric and underscore allowed)",
            ));
        }
    }

    Ok(())
}
