//! Runtime values carried by constants and parameters.
//!
//! Every value that crosses the engine boundary (query constants, parameter
//! bindings, column values read back from a row) is represented as a
//! [`Value`]. Rendering a `Value` inline escapes it; parameter bindings are
//! the preferred path and never touch the command text.

use core::fmt;

/// A database-level scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Renders the value as an inline SQL literal with proper escaping.
    ///
    /// Used only for constants baked into the command text; parameters are
    /// rendered as placeholders instead.
    #[must_use]
    pub fn render_literal(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Bool(b) => String::from(if *b { "TRUE" } else { "FALSE" }),
            Self::Int(n) => format!("{n}"),
            Self::Float(f) => format!("{f}"),
            Self::Text(s) => {
                // Single quotes are escaped by doubling.
                let escaped = s.replace('\'', "''");
                format!("'{escaped}'")
            }
            Self::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_literal())
    }
}

/// Trait for types convertible into a [`Value`].
pub trait ToValue {
    /// Converts the value.
    fn to_value(self) -> Value;
}

impl ToValue for Value {
    fn to_value(self) -> Value {
        self
    }
}

impl ToValue for bool {
    fn to_value(self) -> Value {
        Value::Bool(self)
    }
}

impl ToValue for i64 {
    fn to_value(self) -> Value {
        Value::Int(self)
    }
}

impl ToValue for i32 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for f64 {
    fn to_value(self) -> Value {
        Value::Float(self)
    }
}

impl ToValue for String {
    fn to_value(self) -> Value {
        Value::Text(self)
    }
}

impl ToValue for &str {
    fn to_value(self) -> Value {
        Value::Text(String::from(self))
    }
}

impl ToValue for Vec<u8> {
    fn to_value(self) -> Value {
        Value::Blob(self)
    }
}

impl ToValue for chrono::NaiveDateTime {
    fn to_value(self) -> Value {
        Value::Text(self.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

impl ToValue for chrono::DateTime<chrono::Utc> {
    fn to_value(self) -> Value {
        Value::Text(self.to_rfc3339())
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_null_and_bool() {
        assert_eq!(Value::Null.render_literal(), "NULL");
        assert_eq!(Value::Bool(true).render_literal(), "TRUE");
        assert_eq!(Value::Bool(false).render_literal(), "FALSE");
    }

    #[test]
    fn test_literal_text_escaping() {
        assert_eq!(
            Value::Text(String::from("O'Brien")).render_literal(),
            "'O''Brien'"
        );
        // Injection attempts stay inside the literal.
        assert_eq!(
            Value::Text(String::from("'; DROP TABLE users; --")).render_literal(),
            "'''; DROP TABLE users; --'"
        );
    }

    #[test]
    fn test_literal_blob() {
        assert_eq!(
            Value::Blob(vec![0xDE, 0xAD]).render_literal(),
            "X'DEAD'"
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(42_i32.to_value(), Value::Int(42));
        assert_eq!("abc".to_value(), Value::Text(String::from("abc")));
        assert_eq!(None::<i64>.to_value(), Value::Null);
        assert_eq!(Some(1.5_f64).to_value(), Value::Float(1.5));
    }
}
