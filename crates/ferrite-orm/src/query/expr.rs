//! The query-root expression tree.
//!
//! [`QueryExpr`] is the language-level input to the pipeline: a lazy
//! composition of set operators over an entity-set leaf. [`ValueExpr`] is
//! its scalar sub-language. Both are plain data; nothing executes until the
//! tree is compiled.
//!
//! Builder helpers keep construction chainable:
//!
//! ```
//! use ferrite_orm::query::expr::{captured, member, QueryExpr};
//!
//! let query = QueryExpr::entity("Customer")
//!     .filter(member("Name").eq(captured("who", "Alice")))
//!     .order_by(member("Id"))
//!     .take(10);
//! ```

use ferrite_core::scalar::{BinaryOp, UnaryOp};
use ferrite_core::shape::OrderDirection;
use ferrite_core::types::TypeInfo;
use ferrite_core::value::{ToValue, Value};

/// Aggregate functions translatable over a grouped source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    /// COUNT.
    Count,
    /// SUM.
    Sum,
    /// AVG.
    Avg,
    /// MIN.
    Min,
    /// MAX.
    Max,
}

impl AggregateFunc {
    /// Returns the SQL function name.
    #[must_use]
    pub const fn sql_name(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// Set operators over whole queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySetOp {
    /// UNION (distinct).
    Union,
    /// UNION ALL.
    Concat,
    /// INTERSECT.
    Intersect,
    /// EXCEPT.
    Except,
}

/// A scalar sub-expression of a query.
///
/// `Member` and `Captured` are what callers write; `Property`, `Ref` and
/// `Parameter` are their normalized forms and only appear after the
/// normalizer has run.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    /// A member access path: zero or more navigation segments followed by a
    /// property name, or a projected binding name after a projection.
    Member {
        /// Path segments.
        path: Vec<String>,
    },

    /// An inline constant.
    Constant(Value),

    /// A closed-over runtime value; becomes a parameter during
    /// normalization.
    Captured {
        /// Optional stable name; auto-named `p0`, `p1`, ... when absent.
        name: Option<String>,
        /// The captured value.
        value: Value,
    },

    /// Normalized: a validated property access.
    Property {
        /// Entity type the property belongs to.
        entity: String,
        /// Navigation segments walked to reach the entity (empty for the
        /// query root).
        navigations: Vec<String>,
        /// Property name.
        property: String,
        /// Mapped column name.
        column: String,
        /// Column type descriptor.
        ty: TypeInfo,
    },

    /// Normalized: a reference to a named binding of the current shape
    /// (projection member or group key).
    Ref {
        /// Binding name.
        name: String,
        /// Binding type descriptor.
        ty: TypeInfo,
    },

    /// Normalized: a named parameter.
    Parameter {
        /// Stable parameter name.
        name: String,
        /// Parameter type descriptor.
        ty: TypeInfo,
    },

    /// A binary expression.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<ValueExpr>,
        /// Right operand.
        right: Box<ValueExpr>,
    },

    /// A unary expression.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<ValueExpr>,
    },

    /// A scalar function call.
    Call {
        /// Neutral function name (upper-cased).
        function: String,
        /// Arguments.
        args: Vec<ValueExpr>,
    },

    /// An aggregate over the current group.
    Aggregate {
        /// Aggregate function.
        func: AggregateFunc,
        /// Aggregated expression; `None` means `COUNT(*)`.
        arg: Option<Box<ValueExpr>>,
    },
}

impl ValueExpr {
    fn binary(self, op: BinaryOp, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// Equality comparison.
    #[must_use]
    pub fn eq(self, right: Self) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    /// Inequality comparison.
    #[must_use]
    pub fn ne(self, right: Self) -> Self {
        self.binary(BinaryOp::NotEq, right)
    }

    /// Greater-than comparison.
    #[must_use]
    pub fn gt(self, right: Self) -> Self {
        self.binary(BinaryOp::Gt, right)
    }

    /// Greater-than-or-equal comparison.
    #[must_use]
    pub fn gte(self, right: Self) -> Self {
        self.binary(BinaryOp::GtEq, right)
    }

    /// Less-than comparison.
    #[must_use]
    pub fn lt(self, right: Self) -> Self {
        self.binary(BinaryOp::Lt, right)
    }

    /// Less-than-or-equal comparison.
    #[must_use]
    pub fn lte(self, right: Self) -> Self {
        self.binary(BinaryOp::LtEq, right)
    }

    /// Logical AND.
    #[must_use]
    pub fn and(self, right: Self) -> Self {
        self.binary(BinaryOp::And, right)
    }

    /// Logical OR.
    #[must_use]
    pub fn or(self, right: Self) -> Self {
        self.binary(BinaryOp::Or, right)
    }

    /// LIKE pattern match.
    #[must_use]
    pub fn like(self, pattern: Self) -> Self {
        self.binary(BinaryOp::Like, pattern)
    }

    /// Addition.
    #[must_use]
    pub fn add(self, right: Self) -> Self {
        self.binary(BinaryOp::Add, right)
    }

    /// Multiplication.
    #[must_use]
    pub fn mul(self, right: Self) -> Self {
        self.binary(BinaryOp::Mul, right)
    }

    /// Logical NOT.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    /// IS NULL test.
    #[must_use]
    pub fn is_null(self) -> Self {
        Self::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(self),
        }
    }

    /// IS NOT NULL test.
    #[must_use]
    pub fn is_not_null(self) -> Self {
        Self::Unary {
            op: UnaryOp::IsNotNull,
            operand: Box::new(self),
        }
    }
}

/// Creates a member access from a dotted path (`"Orders.Total"`).
#[must_use]
pub fn member(path: &str) -> ValueExpr {
    ValueExpr::Member {
        path: path.split('.').map(String::from).collect(),
    }
}

/// Creates an inline constant.
#[must_use]
pub fn val(value: impl ToValue) -> ValueExpr {
    ValueExpr::Constant(value.to_value())
}

/// Creates a captured runtime value with a stable parameter name.
#[must_use]
pub fn captured(name: &str, value: impl ToValue) -> ValueExpr {
    ValueExpr::Captured {
        name: Some(String::from(name)),
        value: value.to_value(),
    }
}

/// Creates a scalar function call.
#[must_use]
pub fn call(function: &str, args: Vec<ValueExpr>) -> ValueExpr {
    ValueExpr::Call {
        function: function.to_uppercase(),
        args,
    }
}

/// `COUNT(*)` over the current group.
#[must_use]
pub fn count() -> ValueExpr {
    ValueExpr::Aggregate {
        func: AggregateFunc::Count,
        arg: None,
    }
}

/// `SUM(expr)` over the current group.
#[must_use]
pub fn sum(expr: ValueExpr) -> ValueExpr {
    ValueExpr::Aggregate {
        func: AggregateFunc::Sum,
        arg: Some(Box::new(expr)),
    }
}

/// `AVG(expr)` over the current group.
#[must_use]
pub fn avg(expr: ValueExpr) -> ValueExpr {
    ValueExpr::Aggregate {
        func: AggregateFunc::Avg,
        arg: Some(Box::new(expr)),
    }
}

/// `MIN(expr)` over the current group.
#[must_use]
pub fn min(expr: ValueExpr) -> ValueExpr {
    ValueExpr::Aggregate {
        func: AggregateFunc::Min,
        arg: Some(Box::new(expr)),
    }
}

/// `MAX(expr)` over the current group.
#[must_use]
pub fn max(expr: ValueExpr) -> ValueExpr {
    ValueExpr::Aggregate {
        func: AggregateFunc::Max,
        arg: Some(Box::new(expr)),
    }
}

/// A query operator tree over an entity-set leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    /// The entity-set leaf.
    Source {
        /// Entity type name.
        entity: String,
    },

    /// Row filter.
    Filter {
        /// Source query.
        source: Box<QueryExpr>,
        /// Boolean predicate.
        predicate: ValueExpr,
    },

    /// Projection to named bindings.
    Project {
        /// Source query.
        source: Box<QueryExpr>,
        /// `(member name, expression)` bindings in declaration order.
        bindings: Vec<(String, ValueExpr)>,
    },

    /// Navigation-driven join; joined members are addressed through the
    /// navigation segment (`member("Orders.Total")`).
    Join {
        /// Source query.
        source: Box<QueryExpr>,
        /// Navigation name on the current entity.
        navigation: String,
    },

    /// Materializes a collection navigation alongside each parent.
    Include {
        /// Source query.
        source: Box<QueryExpr>,
        /// Collection navigation name.
        navigation: String,
    },

    /// Grouping by named keys.
    GroupBy {
        /// Source query.
        source: Box<QueryExpr>,
        /// `(key name, expression)` pairs.
        keys: Vec<(String, ValueExpr)>,
    },

    /// Ordering entry; `reset` distinguishes `OrderBy` (replaces the list)
    /// from `ThenBy` (appends).
    OrderBy {
        /// Source query.
        source: Box<QueryExpr>,
        /// Ordering expression.
        expr: ValueExpr,
        /// Direction.
        direction: OrderDirection,
        /// Whether this entry resets any prior ordering.
        reset: bool,
    },

    /// Row offset.
    Skip {
        /// Source query.
        source: Box<QueryExpr>,
        /// Offset expression (constant or captured value).
        count: ValueExpr,
    },

    /// Row limit.
    Take {
        /// Source query.
        source: Box<QueryExpr>,
        /// Limit expression (constant or captured value).
        count: ValueExpr,
    },

    /// Duplicate elimination.
    Distinct {
        /// Source query.
        source: Box<QueryExpr>,
    },

    /// Set operation between two queries.
    SetOp {
        /// Operator kind.
        kind: QuerySetOp,
        /// Left operand.
        left: Box<QueryExpr>,
        /// Right operand.
        right: Box<QueryExpr>,
    },
}

impl QueryExpr {
    /// Creates the entity-set leaf for the given entity type.
    #[must_use]
    pub fn entity(name: impl Into<String>) -> Self {
        Self::Source {
            entity: name.into(),
        }
    }

    /// Adds a filter.
    #[must_use]
    pub fn filter(self, predicate: ValueExpr) -> Self {
        Self::Filter {
            source: Box::new(self),
            predicate,
        }
    }

    /// Projects to named bindings.
    #[must_use]
    pub fn project(self, bindings: Vec<(&str, ValueExpr)>) -> Self {
        Self::Project {
            source: Box::new(self),
            bindings: bindings
                .into_iter()
                .map(|(name, expr)| (String::from(name), expr))
                .collect(),
        }
    }

    /// Joins a navigation into the row set.
    #[must_use]
    pub fn join(self, navigation: &str) -> Self {
        Self::Join {
            source: Box::new(self),
            navigation: String::from(navigation),
        }
    }

    /// Includes a collection navigation in materialization.
    #[must_use]
    pub fn include(self, navigation: &str) -> Self {
        Self::Include {
            source: Box::new(self),
            navigation: String::from(navigation),
        }
    }

    /// Groups by the given named keys.
    #[must_use]
    pub fn group_by(self, keys: Vec<(&str, ValueExpr)>) -> Self {
        Self::GroupBy {
            source: Box::new(self),
            keys: keys
                .into_iter()
                .map(|(name, expr)| (String::from(name), expr))
                .collect(),
        }
    }

    /// Orders ascending, replacing any prior ordering.
    #[must_use]
    pub fn order_by(self, expr: ValueExpr) -> Self {
        Self::OrderBy {
            source: Box::new(self),
            expr,
            direction: OrderDirection::Asc,
            reset: true,
        }
    }

    /// Orders descending, replacing any prior ordering.
    #[must_use]
    pub fn order_by_desc(self, expr: ValueExpr) -> Self {
        Self::OrderBy {
            source: Box::new(self),
            expr,
            direction: OrderDirection::Desc,
            reset: true,
        }
    }

    /// Appends a subordinate ascending ordering.
    #[must_use]
    pub fn then_by(self, expr: ValueExpr) -> Self {
        Self::OrderBy {
            source: Box::new(self),
            expr,
            direction: OrderDirection::Asc,
            reset: false,
        }
    }

    /// Appends a subordinate descending ordering.
    #[must_use]
    pub fn then_by_desc(self, expr: ValueExpr) -> Self {
        Self::OrderBy {
            source: Box::new(self),
            expr,
            direction: OrderDirection::Desc,
            reset: false,
        }
    }

    /// Skips the first `count` rows.
    #[must_use]
    pub fn skip(self, count: i64) -> Self {
        Self::Skip {
            source: Box::new(self),
            count: ValueExpr::Constant(Value::Int(count)),
        }
    }

    /// Limits the result to `count` rows.
    #[must_use]
    pub fn take(self, count: i64) -> Self {
        Self::Take {
            source: Box::new(self),
            count: ValueExpr::Constant(Value::Int(count)),
        }
    }

    /// Eliminates duplicate rows.
    #[must_use]
    pub fn distinct(self) -> Self {
        Self::Distinct {
            source: Box::new(self),
        }
    }

    /// UNION with another query.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self::SetOp {
            kind: QuerySetOp::Union,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// UNION ALL with another query.
    #[must_use]
    pub fn concat(self, other: Self) -> Self {
        Self::SetOp {
            kind: QuerySetOp::Concat,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// INTERSECT with another query.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        Self::SetOp {
            kind: QuerySetOp::Intersect,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// EXCEPT with another query.
    #[must_use]
    pub fn except(self, other: Self) -> Self {
        Self::SetOp {
            kind: QuerySetOp::Except,
            left: Box::new(self),
            right: Box::new(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_path_parsing() {
        assert_eq!(
            member("Orders.Total"),
            ValueExpr::Member {
                path: vec![String::from("Orders"), String::from("Total")],
            }
        );
    }

    #[test]
    fn test_chained_predicate() {
        let predicate = member("Age").gt(val(18)).and(member("Name").eq(val("Alice")));
        assert!(matches!(
            predicate,
            ValueExpr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_query_chaining() {
        let query = QueryExpr::entity("Customer")
            .filter(member("Name").is_not_null())
            .order_by(member("Id"))
            .take(5);
        assert!(matches!(query, QueryExpr::Take { .. }));
    }
}
