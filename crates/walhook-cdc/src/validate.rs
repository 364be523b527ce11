//! Identifier validation
//!
//! Slot, publication, schema, and table names are interpolated into
//! replication commands and DDL, so they are validated against the
//! PostgreSQL identifier grammar before use.

use crate::error::{CdcError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// PostgreSQL truncates identifiers at 63 bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]{0,62}$").unwrap());

/// Validate a SQL identifier (slot name, publication name, schema, table).
///
/// Rejects empty strings, leading digits, quoting characters, and anything
/// longer than PostgreSQL's identifier limit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CdcError::config("Identifier cannot be empty"));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CdcError::config(format!(
            "Identifier '{}' too long: {} chars (max {})",
            name,
            name.len(),
            MAX_IDENTIFIER_LENGTH
        )));
    }

    if !IDENTIFIER_REGEX.is_match(name) {
        return Err(CdcError::config(format!(
            "Invalid identifier '{}': must start with a letter or underscore \
             and contain only letters, digits, and underscores",
            name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("walhook_slot").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("t2").is_ok());
    }

    #[test]
    fn test_rejects_injection() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2fast").is_err());
        assert!(validate_identifier("drop table; --").is_err());
        assert!(validate_identifier("pub'lic").is_err());
    }

    #[test]
    fn test_rejects_overlong() {
        let name = "a".repeat(64);
        assert!(validate_identifier(&name).is_err());
        let name = "a".repeat(63);
        assert!(validate_identifier(&name).is_ok());
    }
}
