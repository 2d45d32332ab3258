//! SQLite dialect implementation.

use ferrite_core::dialect::{Dialect, ParamStyle};

/// SQLite dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn identifier_quote(&self) -> char {
        '"' // SQLite also accepts backticks, but double quotes are standard
    }

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Named('@')
    }

    fn supports_boolean_type(&self) -> bool {
        false // booleans are stored as 0/1 integers
    }

    fn requires_limit_for_offset(&self) -> bool {
        true // OFFSET is only parsed as part of a LIMIT clause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_dialect() {
        let dialect = SqliteDialect::new();
        assert_eq!(dialect.name(), "sqlite");
        assert_eq!(dialect.identifier_quote(), '"');
        assert_eq!(dialect.placeholder("p0", 0), "@p0");
        assert!(!dialect.supports_boolean_type());
        assert!(dialect.requires_limit_for_offset());
    }
}
