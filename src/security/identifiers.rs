//! PostgreSQL identifier quoting.
//!
//! Identifiers are wrapped in double quotes, with embedded quotes doubled.

use crate::error::ServerError;

/// Longest identifier PostgreSQL keeps (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Quote a single identifier.
///
/// ```
/// use dbmcp_server::security::quote_identifier;
///
/// assert_eq!(quote_identifier("orders"), "\"orders\"");
/// assert_eq!(quote_identifier("Order \"Lines\""), "\"Order \"\"Lines\"\"\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Reject identifiers that cannot name a relation.
///
/// Quoting already neutralizes every character; this only refuses empty,
/// over-long and NUL-bearing names so the error is reported before the
/// statement reaches the server.
pub fn validate_identifier(identifier: &str) -> Result<(), ServerError> {
    if identifier.trim().is_empty() {
        return Err(ServerError::validation("Identifier cannot be empty"));
    }

    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ServerError::validation(format!(
            "Identifier '{}' exceeds maximum length of {} bytes",
            identifier, MAX_IDENTIFIER_LENGTH
        )));
    }

    if identifier.contains('\0') {
        return Err(ServerError::validation(
            "Identifier contains a NUL character",
        ));
    }

    Ok(())
}

/// Validate and quote an identifier.
pub fn safe_identifier(identifier: &str) -> Result<String, ServerError> {
    validate_identifier(identifier)?;
    Ok(quote_identifier(identifier))
}

/// `"schema"."name"` from separately supplied parts.
pub fn qualified_name(schema: &str, name: &str) -> Result<String, ServerError> {
    Ok(format!("{}.{}", safe_identifier(schema)?, safe_identifier(name)?))
}
