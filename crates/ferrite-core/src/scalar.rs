//! Relational scalar expression model.
//!
//! [`ScalarExpr`] is the provider-neutral representation of SQL scalar
//! expressions produced by the translation pipeline. Trees are immutable
//! once built: every rewrite constructs new nodes and shares unchanged
//! subtrees by reference (`Box` clones are shallow copies of shared data).

use crate::shape::SelectShape;
use crate::types::{TypeInfo, TypeKind};
use crate::value::Value;

/// Binary operators legal in scalar expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Logical
    And,
    Or,

    // String
    Concat,
    Like,
}

impl BinaryOp {
    /// Returns the SQL representation of the operator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Concat => "||",
            Self::Like => "LIKE",
        }
    }

    /// Returns the precedence of the operator (higher binds tighter).
    #[must_use]
    pub const fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => 3,
            Self::Like => 4,
            Self::Add | Self::Sub | Self::Concat => 5,
            Self::Mul | Self::Div | Self::Mod => 6,
        }
    }

    /// Returns whether the operator is a comparison producing a boolean.
    #[must_use]
    pub const fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    /// Returns whether the operator is a logical connective.
    #[must_use]
    pub const fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// Unary operators legal in scalar expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation (-).
    Neg,
    /// Logical NOT.
    Not,
    /// IS NULL test (postfix).
    IsNull,
    /// IS NOT NULL test (postfix).
    IsNotNull,
}

impl UnaryOp {
    /// Returns the SQL representation of the operator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "NOT",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Returns whether the operator renders after its operand.
    #[must_use]
    pub const fn is_postfix(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

/// A provider-neutral SQL scalar expression.
///
/// Every node carries a [`TypeInfo`] describing its storage class and
/// nullability; later stages rely on it for operator legality and rewrite
/// decisions.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    /// A column of a named source (table or derived-table alias).
    Column {
        /// Source alias the column belongs to.
        source: String,
        /// Column name.
        name: String,
        /// Type descriptor.
        ty: TypeInfo,
    },

    /// An inline constant.
    Constant {
        /// The literal value.
        value: Value,
        /// Type descriptor.
        ty: TypeInfo,
    },

    /// A named parameter placeholder; the value is late-bound at execution.
    Parameter {
        /// Stable parameter name.
        name: String,
        /// Type descriptor.
        ty: TypeInfo,
    },

    /// A function call.
    Function {
        /// Function name.
        name: String,
        /// Arguments.
        args: Vec<ScalarExpr>,
        /// Result type descriptor.
        ty: TypeInfo,
    },

    /// A unary expression.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<ScalarExpr>,
        /// Result type descriptor.
        ty: TypeInfo,
    },

    /// A binary expression.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<ScalarExpr>,
        /// Right operand.
        right: Box<ScalarExpr>,
        /// Result type descriptor.
        ty: TypeInfo,
    },

    /// A searched CASE expression.
    Case {
        /// WHEN/THEN branches.
        branches: Vec<(ScalarExpr, ScalarExpr)>,
        /// ELSE result.
        else_result: Option<Box<ScalarExpr>>,
        /// Result type descriptor.
        ty: TypeInfo,
    },

    /// A scalar subquery (single column, single row).
    ScalarSubquery {
        /// The subquery.
        shape: Box<SelectShape>,
        /// Result type descriptor.
        ty: TypeInfo,
    },

    /// Raw SQL escape hatch. Quote balance is the writer's responsibility
    /// and is asserted at render time.
    Fragment {
        /// Raw SQL text.
        sql: String,
        /// Result type descriptor.
        ty: TypeInfo,
    },
}

impl ScalarExpr {
    /// Returns the type descriptor of this node.
    #[must_use]
    pub fn ty(&self) -> &TypeInfo {
        match self {
            Self::Column { ty, .. }
            | Self::Constant { ty, .. }
            | Self::Parameter { ty, .. }
            | Self::Function { ty, .. }
            | Self::Unary { ty, .. }
            | Self::Binary { ty, .. }
            | Self::Case { ty, .. }
            | Self::ScalarSubquery { ty, .. }
            | Self::Fragment { ty, .. } => ty,
        }
    }

    /// Creates a column reference.
    #[must_use]
    pub fn column(source: impl Into<String>, name: impl Into<String>, ty: TypeInfo) -> Self {
        Self::Column {
            source: source.into(),
            name: name.into(),
            ty,
        }
    }

    /// Creates an integer constant.
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::Constant {
            value: Value::Int(value),
            ty: TypeInfo::new(TypeKind::Int),
        }
    }

    /// Creates a boolean constant.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::Constant {
            value: Value::Bool(value),
            ty: TypeInfo::new(TypeKind::Bool),
        }
    }

    /// Creates a text constant.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Constant {
            value: Value::Text(value.into()),
            ty: TypeInfo::new(TypeKind::Text),
        }
    }

    /// Creates a binary expression; the result type must be supplied by the
    /// translator, which knows operand nullability.
    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self, ty: TypeInfo) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        }
    }

    /// Combines two boolean expressions with AND.
    #[must_use]
    pub fn and(self, right: Self) -> Self {
        let nullable = self.ty().nullable || right.ty().nullable;
        Self::binary(
            BinaryOp::And,
            self,
            right,
            TypeInfo::new(TypeKind::Bool).with_nullable(nullable),
        )
    }

    /// Combines two boolean expressions with OR.
    #[must_use]
    pub fn or(self, right: Self) -> Self {
        let nullable = self.ty().nullable || right.ty().nullable;
        Self::binary(
            BinaryOp::Or,
            self,
            right,
            TypeInfo::new(TypeKind::Bool).with_nullable(nullable),
        )
    }

    /// Creates an IS NULL test over this expression.
    #[must_use]
    pub fn is_null(self) -> Self {
        Self::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(self),
            ty: TypeInfo::new(TypeKind::Bool),
        }
    }

    /// Creates an IS NOT NULL test over this expression.
    #[must_use]
    pub fn is_not_null(self) -> Self {
        Self::Unary {
            op: UnaryOp::IsNotNull,
            operand: Box::new(self),
            ty: TypeInfo::new(TypeKind::Bool),
        }
    }

    /// Creates a logical NOT over this expression.
    #[must_use]
    pub fn negate(self) -> Self {
        let ty = self.ty().clone();
        Self::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
            ty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_ordering() {
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::And.precedence() > BinaryOp::Or.precedence());
        assert!(BinaryOp::Eq.precedence() > BinaryOp::And.precedence());
    }

    #[test]
    fn test_every_node_carries_a_type() {
        let col = ScalarExpr::column("t0", "age", TypeInfo::new(TypeKind::Int));
        assert_eq!(col.ty().kind, TypeKind::Int);

        let pred = ScalarExpr::binary(
            BinaryOp::Gt,
            col,
            ScalarExpr::int(18),
            TypeInfo::new(TypeKind::Bool),
        );
        assert_eq!(pred.ty().kind, TypeKind::Bool);
        assert!(!pred.ty().nullable);
    }

    #[test]
    fn test_and_propagates_nullability() {
        let a = ScalarExpr::Column {
            source: String::from("t0"),
            name: String::from("flag"),
            ty: TypeInfo::nullable(TypeKind::Bool),
        };
        let b = ScalarExpr::bool(true);
        let conj = a.and(b);
        assert!(conj.ty().nullable);
    }
}
