//! Provider capability descriptors.
//!
//! Backends differ in identifier quoting, placeholder syntax, type support
//! and function naming. The [`Dialect`] trait is the single surface the
//! rewrite pass and the renderer consult; providers implement it once.

/// Parameter placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// Positional `?` placeholders.
    Positional,
    /// Named placeholders with the given prefix (`@name`, `:name`, `$name`).
    Named(char),
}

/// Capability descriptor for a target backend.
pub trait Dialect {
    /// Returns the name of the dialect.
    fn name(&self) -> &'static str;

    /// Returns the identifier quote character.
    fn identifier_quote(&self) -> char {
        '"'
    }

    /// Returns the placeholder style.
    fn param_style(&self) -> ParamStyle {
        ParamStyle::Positional
    }

    /// Returns whether the backend has a native boolean column type.
    ///
    /// Backends without one get boolean predicates rewritten to `col = 1`.
    fn supports_boolean_type(&self) -> bool {
        true
    }

    /// Returns whether OFFSET is legal without an ORDER BY clause.
    ///
    /// When false, the rewrite pass synthesizes an ordering over the
    /// shaper's key columns so paging stays deterministic.
    fn supports_offset_without_order_by(&self) -> bool {
        true
    }

    /// Returns whether OFFSET is only legal alongside a LIMIT clause.
    ///
    /// When true, the rewrite pass supplies an unlimited LIMIT for
    /// offset-only queries.
    fn requires_limit_for_offset(&self) -> bool {
        false
    }

    /// Returns the backend-specific name for a translated function, or
    /// `None` when the neutral name is used as-is.
    fn function_override(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }

    /// Returns whether the backend can evaluate the named function at all.
    ///
    /// Functions rejected here fall back to client evaluation when they
    /// appear in a scalar projection, and fail translation anywhere else.
    fn supports_function(&self, name: &str) -> bool {
        let _ = name;
        true
    }

    /// Quotes an identifier, doubling embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String {
        let quote = self.identifier_quote();
        let mut quoted = String::with_capacity(name.len() + 2);
        quoted.push(quote);
        for ch in name.chars() {
            if ch == quote {
                quoted.push(quote);
            }
            quoted.push(ch);
        }
        quoted.push(quote);
        quoted
    }

    /// Renders a placeholder for the parameter at `position` (0-based) with
    /// the given stable name.
    fn placeholder(&self, name: &str, position: usize) -> String {
        match self.param_style() {
            ParamStyle::Positional => {
                let _ = (name, position);
                String::from("?")
            }
            ParamStyle::Named(prefix) => format!("{prefix}{name}"),
        }
    }
}

/// A standards-leaning dialect used as the neutral default.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericDialect;

impl GenericDialect {
    /// Creates the generic dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for GenericDialect {
    fn name(&self) -> &'static str {
        "generic"
    }
}
