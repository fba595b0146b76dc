//! Identifier handling for SQL text built at runtime.
//!
//! Values are always bound as parameters; only schema and table names
//! are spliced into statement text, and only through this module.

mod identifiers;

pub use identifiers::{
    qualified_name, quote_identifier, safe_identifier, validate_identifier,
    MAX_IDENTIFIER_LENGTH,
};
