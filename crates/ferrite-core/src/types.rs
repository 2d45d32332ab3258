//! Type descriptors attached to scalar expressions.
//!
//! Every scalar node carries a [`TypeInfo`] so later pipeline stages can
//! decide operator legality and conversions without re-deriving types.

use core::fmt;

/// The storage class of a scalar expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Floating point.
    Float,
    /// Text.
    Text,
    /// Binary blob.
    Blob,
}

impl TypeKind {
    /// Returns the default store type name for this kind.
    #[must_use]
    pub const fn store_name(&self) -> &'static str {
        match self {
            Self::Bool => "BOOLEAN",
            Self::Int => "INTEGER",
            Self::Float => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }

    /// Returns whether the kind is numeric (legal for arithmetic).
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_name())
    }
}

/// Type descriptor for a scalar expression: storage class, store type name
/// and nullability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Storage class.
    pub kind: TypeKind,
    /// Backend type name; defaults to the kind's store name.
    pub store_type: String,
    /// Whether the expression can evaluate to NULL.
    pub nullable: bool,
}

impl TypeInfo {
    /// Creates a non-nullable descriptor with the default store name.
    #[must_use]
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            store_type: String::from(kind.store_name()),
            nullable: false,
        }
    }

    /// Creates a nullable descriptor with the default store name.
    #[must_use]
    pub fn nullable(kind: TypeKind) -> Self {
        Self {
            kind,
            store_type: String::from(kind.store_name()),
            nullable: true,
        }
    }

    /// Overrides the store type name.
    #[must_use]
    pub fn with_store_type(mut self, name: impl Into<String>) -> Self {
        self.store_type = name.into();
        self
    }

    /// Returns a copy of this descriptor with the given nullability.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_names() {
        assert_eq!(TypeKind::Int.store_name(), "INTEGER");
        assert_eq!(TypeKind::Text.store_name(), "TEXT");
    }

    #[test]
    fn test_type_info_builders() {
        let ty = TypeInfo::nullable(TypeKind::Float).with_store_type("DOUBLE");
        assert!(ty.nullable);
        assert_eq!(ty.store_type, "DOUBLE");
        assert!(ty.kind.is_numeric());
    }
}
