//! Relational shape model.
//!
//! A [`SelectShape`] is the composed, table-like result of compiling one
//! query: a source tree ([`SourceExpr`]) plus the SELECT-level clauses. The
//! projection list of a shape defines the column set visible to its parent;
//! aliases are unique within one rendered statement's scope.

use crate::scalar::ScalarExpr;
use crate::types::TypeInfo;

/// Join kinds emitted by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// INNER JOIN (required navigations).
    Inner,
    /// LEFT OUTER JOIN (optional navigations).
    LeftOuter,
    /// CROSS JOIN (no predicate).
    Cross,
}

impl JoinKind {
    /// Returns the SQL representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

/// Set operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    /// UNION / UNION ALL.
    Union,
    /// INTERSECT.
    Intersect,
    /// EXCEPT.
    Except,
}

impl SetOpKind {
    /// Returns the SQL keyword.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::Intersect => "INTERSECT",
            Self::Except => "EXCEPT",
        }
    }
}

/// Order direction for an ordering entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order (default).
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl OrderDirection {
    /// Returns the SQL representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// An ORDER BY entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    /// The expression to order by.
    pub expr: ScalarExpr,
    /// The direction.
    pub direction: OrderDirection,
}

impl Ordering {
    /// Creates an ascending ordering.
    #[must_use]
    pub fn asc(expr: ScalarExpr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Asc,
        }
    }

    /// Creates a descending ordering.
    #[must_use]
    pub fn desc(expr: ScalarExpr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Desc,
        }
    }
}

/// A projected column: expression plus the alias it is exposed under.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionColumn {
    /// The projected expression.
    pub expr: ScalarExpr,
    /// The exposed column alias.
    pub alias: String,
}

impl ProjectionColumn {
    /// Creates a projection column.
    #[must_use]
    pub fn new(expr: ScalarExpr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: alias.into(),
        }
    }

    /// Returns the type descriptor of the projected expression.
    #[must_use]
    pub fn ty(&self) -> &TypeInfo {
        self.expr.ty()
    }
}

/// A table-like source in a FROM clause.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceExpr {
    /// A base table.
    Table {
        /// Schema name (optional).
        schema: Option<String>,
        /// Table name.
        name: String,
        /// Alias the source is exposed under.
        alias: String,
    },

    /// A derived table (subquery used as a source).
    Derived {
        /// Alias the source is exposed under.
        alias: String,
        /// The inner select.
        select: Box<SelectShape>,
    },

    /// A binary join of two sources.
    Join {
        /// Join kind.
        kind: JoinKind,
        /// Outer (left) side.
        outer: Box<SourceExpr>,
        /// Inner (right) side.
        inner: Box<SourceExpr>,
        /// Join predicate; `None` only for cross joins.
        predicate: Option<ScalarExpr>,
    },

    /// A set operation between two selects, exposed as a derived source.
    SetOp {
        /// Set operation kind.
        kind: SetOpKind,
        /// Left operand.
        left: Box<SelectShape>,
        /// Right operand.
        right: Box<SelectShape>,
        /// Whether duplicate rows are eliminated (`UNION` vs `UNION ALL`).
        distinct: bool,
        /// Alias the source is exposed under.
        alias: String,
    },
}

impl SourceExpr {
    /// Creates a base-table source.
    #[must_use]
    pub fn table(schema: Option<String>, name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Table {
            schema,
            name: name.into(),
            alias: alias.into(),
        }
    }

    /// Returns the alias this source is exposed under, if it has a single one.
    ///
    /// Joins expose the aliases of both sides and return `None`.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        match self {
            Self::Table { alias, .. } | Self::Derived { alias, .. } | Self::SetOp { alias, .. } => {
                Some(alias)
            }
            Self::Join { .. } => None,
        }
    }
}

/// One SELECT statement under composition.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectShape {
    /// The FROM source.
    pub source: SourceExpr,
    /// Projection list; defines the columns visible to the parent.
    pub projection: Vec<ProjectionColumn>,
    /// WHERE predicate.
    pub predicate: Option<ScalarExpr>,
    /// GROUP BY expressions.
    pub group_by: Vec<ScalarExpr>,
    /// HAVING predicate.
    pub having: Option<ScalarExpr>,
    /// ORDER BY entries.
    pub orderings: Vec<Ordering>,
    /// OFFSET scalar.
    pub offset: Option<ScalarExpr>,
    /// LIMIT scalar.
    pub limit: Option<ScalarExpr>,
    /// Whether duplicate rows are eliminated.
    pub distinct: bool,
}

impl SelectShape {
    /// Creates a select over the given source with an empty clause set.
    #[must_use]
    pub fn new(source: SourceExpr) -> Self {
        Self {
            source,
            projection: Vec::new(),
            predicate: None,
            group_by: Vec::new(),
            having: None,
            orderings: Vec::new(),
            offset: None,
            limit: None,
            distinct: false,
        }
    }

    /// Returns whether the select already applies row-set shaping that
    /// forces composition through a derived table (grouping, distinct or
    /// paging).
    #[must_use]
    pub fn requires_wrap(&self) -> bool {
        !self.group_by.is_empty() || self.distinct || self.offset.is_some() || self.limit.is_some()
    }

    /// Returns the projection ordinal exposed under `alias`, if any.
    #[must_use]
    pub fn ordinal_of(&self, alias: &str) -> Option<usize> {
        self.projection.iter().position(|c| c.alias == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeInfo, TypeKind};

    #[test]
    fn test_join_kind_sql() {
        assert_eq!(JoinKind::Inner.as_str(), "INNER JOIN");
        assert_eq!(JoinKind::LeftOuter.as_str(), "LEFT JOIN");
    }

    #[test]
    fn test_requires_wrap() {
        let mut select = SelectShape::new(SourceExpr::table(None, "customers", "c"));
        assert!(!select.requires_wrap());
        select.limit = Some(ScalarExpr::int(10));
        assert!(select.requires_wrap());
    }

    #[test]
    fn test_ordinal_lookup() {
        let mut select = SelectShape::new(SourceExpr::table(None, "customers", "c"));
        select.projection.push(ProjectionColumn::new(
            ScalarExpr::column("c", "id", TypeInfo::new(TypeKind::Int)),
            "id",
        ));
        select.projection.push(ProjectionColumn::new(
            ScalarExpr::column("c", "name", TypeInfo::new(TypeKind::Text)),
            "name",
        ));
        assert_eq!(select.ordinal_of("name"), Some(1));
        assert_eq!(select.ordinal_of("missing"), None);
    }
}
