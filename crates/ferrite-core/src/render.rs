//! SQL renderer.
//!
//! Walks a final [`SelectShape`] and produces command text plus the ordered
//! parameter slot list. Rendering is deterministic: the same tree with the
//! same dialect always yields byte-identical text and identical parameter
//! order, which compiled-query caches and the test suite both rely on.
//!
//! Parameter values are late-bound: the renderer only records slots in
//! first-appearance order; [`RenderedQuery::bind`] zips them with a
//! [`ParameterBindings`] table at execution time.

use thiserror::Error;

use crate::dialect::{Dialect, ParamStyle};
use crate::scalar::{ScalarExpr, UnaryOp};
use crate::shape::{SelectShape, SourceExpr};
use crate::types::TypeInfo;
use crate::value::Value;

/// Render-time and bind-time errors.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A parameter slot has no value in the binding table.
    #[error("no value bound for parameter '{0}'")]
    UnboundParameter(String),
}

/// A parameter slot in first-appearance order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSlot {
    /// Stable parameter name.
    pub name: String,
    /// Type descriptor recorded at translation time.
    pub ty: TypeInfo,
}

/// A parameter with its late-bound value, ready for the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// Stable parameter name.
    pub name: String,
    /// The bound value.
    pub value: Value,
    /// Backend store type name.
    pub store_type: String,
}

/// The name → value table built during normalization.
///
/// Insertion order is preserved so parameter names stay stable across
/// executions of the same query shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBindings {
    entries: Vec<(String, Value)>,
}

impl ParameterBindings {
    /// Creates an empty binding table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a binding.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Looks up a binding by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a fresh stable name for the next positional parameter.
    #[must_use]
    pub fn next_name(&self) -> String {
        format!("p{}", self.entries.len())
    }
}

/// Rendered command text plus its ordered parameter slots.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    /// The command text.
    pub sql: String,
    /// Parameter slots in first-appearance order.
    pub parameters: Vec<ParameterSlot>,
}

impl RenderedQuery {
    /// Zips the ordered slots with the binding table, producing the final
    /// parameter list handed to the provider.
    pub fn bind(&self, bindings: &ParameterBindings) -> Result<Vec<BoundParameter>, RenderError> {
        self.parameters
            .iter()
            .map(|slot| {
                let value = bindings
                    .get(&slot.name)
                    .ok_or_else(|| RenderError::UnboundParameter(slot.name.clone()))?;
                Ok(BoundParameter {
                    name: slot.name.clone(),
                    value: value.clone(),
                    store_type: slot.ty.store_type.clone(),
                })
            })
            .collect()
    }
}

/// Renders a shape tree to command text with the given dialect.
#[must_use]
pub fn render(select: &SelectShape, dialect: &dyn Dialect) -> RenderedQuery {
    let mut renderer = SqlRenderer::new(dialect);
    renderer.visit_select(select);
    RenderedQuery {
        sql: renderer.sql,
        parameters: renderer.parameters,
    }
}

struct SqlRenderer<'a> {
    dialect: &'a dyn Dialect,
    sql: String,
    parameters: Vec<ParameterSlot>,
}

impl<'a> SqlRenderer<'a> {
    fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            parameters: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    fn visit_select(&mut self, select: &SelectShape) {
        // A select with nothing to project is a programmer error; fail fast
        // instead of emitting malformed SQL.
        assert!(
            !select.projection.is_empty(),
            "select has an empty projection"
        );
        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }

        for (i, column) in select.projection.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.visit_scalar(&column.expr, 0);
            // Plain column references keep their name; everything else is
            // exposed under an explicit alias.
            let implicit = matches!(
                &column.expr,
                ScalarExpr::Column { name, .. } if *name == column.alias
            );
            if !implicit {
                self.push(" AS ");
                let alias = self.quote(&column.alias);
                self.push(&alias);
            }
        }

        self.push(" FROM ");
        self.visit_source(&select.source);

        if let Some(predicate) = &select.predicate {
            self.push(" WHERE ");
            self.visit_scalar(predicate, 0);
        }

        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            for (i, expr) in select.group_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.visit_scalar(expr, 0);
            }
        }

        if let Some(having) = &select.having {
            self.push(" HAVING ");
            self.visit_scalar(having, 0);
        }

        if !select.orderings.is_empty() {
            self.push(" ORDER BY ");
            for (i, ordering) in select.orderings.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.visit_scalar(&ordering.expr, 0);
                self.push(" ");
                self.push(ordering.direction.as_str());
            }
        }

        if let Some(limit) = &select.limit {
            self.push(" LIMIT ");
            self.visit_scalar(limit, 0);
        }

        if let Some(offset) = &select.offset {
            self.push(" OFFSET ");
            self.visit_scalar(offset, 0);
        }
    }

    fn visit_source(&mut self, source: &SourceExpr) {
        match source {
            SourceExpr::Table {
                schema,
                name,
                alias,
            } => {
                if let Some(schema) = schema {
                    let quoted = self.quote(schema);
                    self.push(&quoted);
                    self.push(".");
                }
                let quoted = self.quote(name);
                self.push(&quoted);
                self.push(" AS ");
                let quoted = self.quote(alias);
                self.push(&quoted);
            }
            SourceExpr::Derived { alias, select } => {
                self.push("(");
                self.visit_select(select);
                self.push(") AS ");
                let quoted = self.quote(alias);
                self.push(&quoted);
            }
            SourceExpr::Join {
                kind,
                outer,
                inner,
                predicate,
            } => {
                self.visit_source(outer);
                self.push(" ");
                self.push(kind.as_str());
                self.push(" ");
                self.visit_source(inner);
                if let Some(predicate) = predicate {
                    self.push(" ON ");
                    self.visit_scalar(predicate, 0);
                }
            }
            SourceExpr::SetOp {
                kind,
                left,
                right,
                distinct,
                alias,
            } => {
                self.push("(");
                self.visit_select(left);
                self.push(" ");
                self.push(kind.as_str());
                if !distinct {
                    self.push(" ALL");
                }
                self.push(" ");
                self.visit_select(right);
                self.push(") AS ");
                let quoted = self.quote(alias);
                self.push(&quoted);
            }
        }
    }

    /// Renders a scalar, parenthesizing when the surrounding operator binds
    /// tighter than this node.
    fn visit_scalar(&mut self, expr: &ScalarExpr, parent_precedence: u8) {
        match expr {
            ScalarExpr::Column { source, name, .. } => {
                let source = self.quote(source);
                self.push(&source);
                self.push(".");
                let name = self.quote(name);
                self.push(&name);
            }
            ScalarExpr::Constant { value, .. } => {
                self.push(&value.render_literal());
            }
            ScalarExpr::Parameter { name, ty } => {
                let position = match self.dialect.param_style() {
                    // Positional placeholders repeat per occurrence so the
                    // value list stays aligned with the text.
                    ParamStyle::Positional => {
                        self.parameters.push(ParameterSlot {
                            name: name.clone(),
                            ty: ty.clone(),
                        });
                        self.parameters.len() - 1
                    }
                    ParamStyle::Named(_) => {
                        match self.parameters.iter().position(|s| s.name == *name) {
                            Some(existing) => existing,
                            None => {
                                self.parameters.push(ParameterSlot {
                                    name: name.clone(),
                                    ty: ty.clone(),
                                });
                                self.parameters.len() - 1
                            }
                        }
                    }
                };
                let placeholder = self.dialect.placeholder(name, position);
                self.push(&placeholder);
            }
            ScalarExpr::Function { name, args, .. } => {
                self.push(name);
                self.push("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.visit_scalar(arg, 0);
                }
                self.push(")");
            }
            ScalarExpr::Unary { op, operand, .. } => {
                if op.is_postfix() {
                    self.visit_scalar(operand, u8::MAX);
                    self.push(" ");
                    self.push(op.as_str());
                } else {
                    self.push(op.as_str());
                    if *op == UnaryOp::Not {
                        self.push(" ");
                    }
                    self.visit_scalar(operand, u8::MAX);
                }
            }
            ScalarExpr::Binary {
                op, left, right, ..
            } => {
                let precedence = op.precedence();
                let parens = precedence < parent_precedence;
                if parens {
                    self.push("(");
                }
                self.visit_scalar(left, precedence);
                self.push(" ");
                self.push(op.as_str());
                self.push(" ");
                // Right operands of equal precedence are parenthesized so
                // non-associative operators render unambiguously.
                self.visit_scalar(right, precedence + 1);
                if parens {
                    self.push(")");
                }
            }
            ScalarExpr::Case {
                branches,
                else_result,
                ..
            } => {
                self.push("CASE");
                for (condition, result) in branches {
                    self.push(" WHEN ");
                    self.visit_scalar(condition, 0);
                    self.push(" THEN ");
                    self.visit_scalar(result, 0);
                }
                if let Some(else_result) = else_result {
                    self.push(" ELSE ");
                    self.visit_scalar(else_result, 0);
                }
                self.push(" END");
            }
            ScalarExpr::ScalarSubquery { shape, .. } => {
                self.push("(");
                self.visit_select(shape);
                self.push(")");
            }
            ScalarExpr::Fragment { sql, .. } => {
                // Unbalanced quoting in a fragment is a programmer error;
                // fail fast instead of emitting malformed SQL.
                assert!(
                    sql.matches('\'').count() % 2 == 0,
                    "unbalanced string quoting in SQL fragment: {sql}"
                );
                self.push(sql);
            }
        }
    }
}
