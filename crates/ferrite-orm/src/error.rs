//! Error types for the translation pipeline and the materializer.

use ferrite_core::value::Value;
use thiserror::Error;

/// Compile-time translation failures.
///
/// Raised before any backend round-trip; a query that fails translation
/// never renders partial SQL.
#[derive(Debug, Error)]
pub enum TranslationError {
    /// The query references an entity type the mapping model does not know.
    #[error("unknown entity type '{0}'")]
    UnknownEntity(String),

    /// A member access did not resolve against the mapping model.
    #[error("member '{member}' is not mapped on entity '{entity}'")]
    UnmappedMember {
        /// Entity type the member was resolved against.
        entity: String,
        /// The unresolved member name.
        member: String,
    },

    /// The expression uses an operation with no registered translation.
    #[error("no server translation for {0}")]
    UnsupportedOperation(String),

    /// An operator/operand combination with no legal SQL rendering.
    #[error("operator {op} is not legal for operand type {ty}")]
    InvalidOperatorForType {
        /// The operator's SQL spelling.
        op: String,
        /// The offending operand store type.
        ty: String,
    },

    /// Set-operation sides do not produce column-compatible shapes.
    #[error("set operands are not column-compatible: {0}")]
    IncompatibleSetOperands(String),
}

/// Failures raised while consuming a row stream.
///
/// A materialization failure aborts the in-flight result set; identity-map
/// entries committed from earlier rows stay valid.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// A discriminator value not present in the known derived-type set.
    #[error("discriminator value {0} does not map to a known entity type")]
    UnknownDiscriminator(Value),

    /// The row exposes fewer columns than the shaper references.
    #[error("row has {actual} columns but the shaper reads ordinal {ordinal}")]
    ColumnCountMismatch {
        /// The out-of-range ordinal.
        ordinal: usize,
        /// Columns actually present.
        actual: usize,
    },

    /// A column value could not be converted to the expected type.
    #[error("cannot convert column {ordinal} value {value} to {expected}")]
    TypeConversion {
        /// Column ordinal.
        ordinal: usize,
        /// Expected store type.
        expected: String,
        /// The value as rendered literal.
        value: String,
    },

    /// A client-evaluated projection references an unknown function.
    #[error("unknown client function '{0}'")]
    UnknownClientFunction(String),
}

/// Result alias for translation stages.
pub type Result<T, E = TranslationError> = std::result::Result<T, E>;
