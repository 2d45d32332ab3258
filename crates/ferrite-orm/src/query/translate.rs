//! Scalar translation.
//!
//! Turns normalized [`ValueExpr`] trees into relational [`ScalarExpr`]
//! trees. The translator owns the three-valued-logic decisions: under
//! [`NullSemantics::NullSafe`], equality over nullable operands expands so
//! that two NULLs compare equal and NULL-vs-value inequality holds, matching
//! in-memory comparison semantics. Under [`NullSemantics::Raw`] the operator
//! maps one-to-one and SQL's UNKNOWN propagation applies.

use ferrite_core::scalar::{BinaryOp, ScalarExpr, UnaryOp};
use ferrite_core::types::{TypeInfo, TypeKind};
use ferrite_core::value::Value;

use crate::error::{Result, TranslationError};
use crate::query::expr::{AggregateFunc, ValueExpr};
use crate::query::normalize::{function_result_ty, value_ty};

/// How equality over nullable operands is translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullSemantics {
    /// Operators map one-to-one; NULL comparisons yield UNKNOWN.
    #[default]
    Raw,
    /// Equality expands so NULL == NULL holds and NULL != value holds,
    /// matching in-memory semantics.
    NullSafe,
}

/// Key under which a translation scope exposes a column expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RefKey {
    /// A mapped property, qualified by the navigation path it was reached
    /// through.
    Property {
        navigations: Vec<String>,
        property: String,
    },
    /// A named projection or group-key binding.
    Named(String),
}

/// Maps normalized references onto the column expressions of the select
/// under construction.
#[derive(Debug, Clone, Default)]
pub(crate) struct TranslationScope {
    entries: Vec<(RefKey, ScalarExpr)>,
}

impl TranslationScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: RefKey, expr: ScalarExpr) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = expr;
        } else {
            self.entries.push((key, expr));
        }
    }

    pub fn lookup(&self, key: &RefKey) -> Option<&ScalarExpr> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    /// Rewrites every entry with the given mapping; used when a select is
    /// wrapped and references must retarget the derived alias.
    pub fn map_exprs(&self, f: impl Fn(&ScalarExpr) -> ScalarExpr) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), f(e)))
                .collect(),
        }
    }
}

/// Translates normalized scalar expressions within one scope.
pub(crate) struct ScalarTranslator<'a> {
    pub scope: &'a TranslationScope,
    pub null_semantics: NullSemantics,
    /// Scope for aggregate arguments; `Some` only inside a grouped select.
    pub aggregate_scope: Option<&'a TranslationScope>,
}

impl ScalarTranslator<'_> {
    pub fn translate(&self, expr: &ValueExpr) -> Result<ScalarExpr> {
        match expr {
            ValueExpr::Property {
                entity,
                navigations,
                property,
                ..
            } => {
                let key = RefKey::Property {
                    navigations: navigations.clone(),
                    property: property.clone(),
                };
                self.scope
                    .lookup(&key)
                    .cloned()
                    .ok_or_else(|| TranslationError::UnmappedMember {
                        entity: entity.clone(),
                        member: property.clone(),
                    })
            }

            ValueExpr::Ref { name, .. } => self
                .scope
                .lookup(&RefKey::Named(name.clone()))
                .cloned()
                .ok_or_else(|| TranslationError::UnmappedMember {
                    entity: String::from("<projection>"),
                    member: name.clone(),
                }),

            ValueExpr::Constant(value) => Ok(ScalarExpr::Constant {
                value: value.clone(),
                ty: value_ty(value),
            }),

            ValueExpr::Parameter { name, ty } => Ok(ScalarExpr::Parameter {
                name: name.clone(),
                ty: ty.clone(),
            }),

            ValueExpr::Binary { op, left, right } => self.translate_binary(*op, left, right),

            ValueExpr::Unary { op, operand } => self.translate_unary(*op, operand),

            ValueExpr::Call { function, args } => {
                let ty = function_result_ty(function, args).ok_or_else(|| {
                    TranslationError::UnsupportedOperation(format!("function {function}"))
                })?;
                let args = args
                    .iter()
                    .map(|a| self.translate(a))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ScalarExpr::Function {
                    name: function.clone(),
                    args,
                    ty,
                })
            }

            ValueExpr::Aggregate { func, arg } => self.translate_aggregate(*func, arg.as_deref()),

            ValueExpr::Member { .. } | ValueExpr::Captured { .. } => Err(
                TranslationError::UnsupportedOperation(String::from("unnormalized expression")),
            ),
        }
    }

    fn translate_binary(
        &self,
        op: BinaryOp,
        left: &ValueExpr,
        right: &ValueExpr,
    ) -> Result<ScalarExpr> {
        // Comparisons against a literal NULL become IS NULL tests before
        // operands are translated.
        if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) {
            if let ValueExpr::Constant(Value::Null) = right {
                let operand = self.translate(left)?;
                return Ok(if op == BinaryOp::Eq {
                    operand.is_null()
                } else {
                    operand.is_not_null()
                });
            }
            if let ValueExpr::Constant(Value::Null) = left {
                let operand = self.translate(right)?;
                return Ok(if op == BinaryOp::Eq {
                    operand.is_null()
                } else {
                    operand.is_not_null()
                });
            }
        }

        let lhs = self.translate(left)?;
        let rhs = self.translate(right)?;
        self.check_operand_kinds(op, &lhs, &rhs)?;

        let left_nullable = lhs.ty().nullable;
        let right_nullable = rhs.ty().nullable;

        if self.null_semantics == NullSemantics::NullSafe {
            match op {
                BinaryOp::Eq if left_nullable && right_nullable => {
                    // (a = b) OR (a IS NULL AND b IS NULL)
                    let equal = ScalarExpr::binary(
                        BinaryOp::Eq,
                        lhs.clone(),
                        rhs.clone(),
                        TypeInfo::new(TypeKind::Bool),
                    );
                    let both_null = lhs.is_null().and(rhs.is_null());
                    return Ok(with_ty(equal.or(both_null), TypeInfo::new(TypeKind::Bool)));
                }
                BinaryOp::NotEq if left_nullable || right_nullable => {
                    let unequal = ScalarExpr::binary(
                        BinaryOp::NotEq,
                        lhs.clone(),
                        rhs.clone(),
                        TypeInfo::new(TypeKind::Bool),
                    );
                    let mut expanded = unequal;
                    if left_nullable {
                        expanded = expanded.or(lhs.clone().is_null().and(rhs.clone().is_not_null()));
                    }
                    if right_nullable {
                        expanded = expanded.or(lhs.is_not_null().and(rhs.is_null()));
                    }
                    return Ok(with_ty(expanded, TypeInfo::new(TypeKind::Bool)));
                }
                _ => {}
            }
        }

        let nullable = left_nullable || right_nullable;
        let ty = match op {
            op if op.is_comparison() || op.is_logical() => {
                TypeInfo::new(TypeKind::Bool).with_nullable(nullable)
            }
            BinaryOp::Like => TypeInfo::new(TypeKind::Bool).with_nullable(nullable),
            BinaryOp::Concat => TypeInfo::new(TypeKind::Text).with_nullable(nullable),
            _ => {
                let kind = if lhs.ty().kind == TypeKind::Float || rhs.ty().kind == TypeKind::Float {
                    TypeKind::Float
                } else {
                    TypeKind::Int
                };
                TypeInfo::new(kind).with_nullable(nullable)
            }
        };
        Ok(ScalarExpr::binary(op, lhs, rhs, ty))
    }

    fn translate_unary(&self, op: UnaryOp, operand: &ValueExpr) -> Result<ScalarExpr> {
        let inner = self.translate(operand)?;
        match op {
            UnaryOp::Neg => {
                if !inner.ty().kind.is_numeric() {
                    return Err(TranslationError::InvalidOperatorForType {
                        op: String::from("-"),
                        ty: inner.ty().store_type.clone(),
                    });
                }
                let ty = inner.ty().clone();
                Ok(ScalarExpr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(inner),
                    ty,
                })
            }
            UnaryOp::Not => {
                if inner.ty().kind != TypeKind::Bool {
                    return Err(TranslationError::InvalidOperatorForType {
                        op: String::from("NOT"),
                        ty: inner.ty().store_type.clone(),
                    });
                }
                Ok(inner.negate())
            }
            UnaryOp::IsNull => Ok(inner.is_null()),
            UnaryOp::IsNotNull => Ok(inner.is_not_null()),
        }
    }

    fn translate_aggregate(
        &self,
        func: AggregateFunc,
        arg: Option<&ValueExpr>,
    ) -> Result<ScalarExpr> {
        let Some(aggregate_scope) = self.aggregate_scope else {
            return Err(TranslationError::UnsupportedOperation(String::from(
                "aggregate outside a grouped query",
            )));
        };
        let inner_translator = ScalarTranslator {
            scope: aggregate_scope,
            null_semantics: self.null_semantics,
            aggregate_scope: None,
        };
        let (args, ty) = match (func, arg) {
            (AggregateFunc::Count, None) => (
                vec![ScalarExpr::Fragment {
                    sql: String::from("*"),
                    ty: TypeInfo::new(TypeKind::Int),
                }],
                TypeInfo::new(TypeKind::Int),
            ),
            (AggregateFunc::Count, Some(arg)) => (
                vec![inner_translator.translate(arg)?],
                TypeInfo::new(TypeKind::Int),
            ),
            (AggregateFunc::Avg, Some(arg)) => (
                vec![inner_translator.translate(arg)?],
                TypeInfo::nullable(TypeKind::Float),
            ),
            (_, Some(arg)) => {
                let translated = inner_translator.translate(arg)?;
                let ty = translated.ty().clone().with_nullable(true);
                (vec![translated], ty)
            }
            (_, None) => {
                return Err(TranslationError::UnsupportedOperation(format!(
                    "{} without an argument",
                    func.sql_name()
                )))
            }
        };
        Ok(ScalarExpr::Function {
            name: String::from(func.sql_name()),
            args,
            ty,
        })
    }

    fn check_operand_kinds(
        &self,
        op: BinaryOp,
        left: &ScalarExpr,
        right: &ScalarExpr,
    ) -> Result<()> {
        let reject = |ty: &TypeInfo| TranslationError::InvalidOperatorForType {
            op: String::from(op.as_str()),
            ty: ty.store_type.clone(),
        };
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                for side in [left, right] {
                    if !side.ty().kind.is_numeric() {
                        return Err(reject(side.ty()));
                    }
                }
            }
            BinaryOp::And | BinaryOp::Or => {
                for side in [left, right] {
                    if side.ty().kind != TypeKind::Bool {
                        return Err(reject(side.ty()));
                    }
                }
            }
            BinaryOp::Like | BinaryOp::Concat => {
                for side in [left, right] {
                    if side.ty().kind != TypeKind::Text {
                        return Err(reject(side.ty()));
                    }
                }
            }
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                // Order comparisons have no defined collation over blobs.
                for side in [left, right] {
                    if side.ty().kind == TypeKind::Blob {
                        return Err(reject(side.ty()));
                    }
                }
            }
            BinaryOp::Eq | BinaryOp::NotEq => {}
        }
        Ok(())
    }
}

/// Rebuilds a binary node with an explicit result type.
fn with_ty(expr: ScalarExpr, ty: TypeInfo) -> ScalarExpr {
    match expr {
        ScalarExpr::Binary { op, left, right, .. } => ScalarExpr::Binary { op, left, right, ty },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_core::dialect::GenericDialect;
    use ferrite_core::render::render;
    use ferrite_core::shape::{ProjectionColumn, SelectShape, SourceExpr};

    fn scope_with(name: &str, column: ScalarExpr) -> TranslationScope {
        let mut scope = TranslationScope::new();
        scope.insert(
            RefKey::Property {
                navigations: Vec::new(),
                property: String::from(name),
            },
            column,
        );
        scope
    }

    fn prop(name: &str) -> ValueExpr {
        ValueExpr::Property {
            entity: String::from("Customer"),
            navigations: Vec::new(),
            property: String::from(name),
            column: String::from("city"),
            ty: TypeInfo::nullable(TypeKind::Text),
        }
    }

    fn render_predicate(predicate: ScalarExpr) -> String {
        let mut select = SelectShape::new(SourceExpr::table(None, "customers", "t0"));
        select.projection.push(ProjectionColumn::new(
            ScalarExpr::column("t0", "id", TypeInfo::new(TypeKind::Int)),
            "id",
        ));
        select.predicate = Some(predicate);
        render(&select, &GenericDialect).sql
    }

    #[test]
    fn test_raw_equality_maps_one_to_one() {
        let scope = scope_with(
            "City",
            ScalarExpr::column("t0", "city", TypeInfo::nullable(TypeKind::Text)),
        );
        let translator = ScalarTranslator {
            scope: &scope,
            null_semantics: NullSemantics::Raw,
            aggregate_scope: None,
        };
        let translated = translator
            .translate(&prop("City").eq(ValueExpr::Parameter {
                name: String::from("p0"),
                ty: TypeInfo::nullable(TypeKind::Text),
            }))
            .unwrap();
        let sql = render_predicate(translated);
        assert!(sql.ends_with("WHERE \"t0\".\"city\" = ?"), "got: {sql}");
    }

    #[test]
    fn test_null_safe_equality_expands() {
        let scope = scope_with(
            "City",
            ScalarExpr::column("t0", "city", TypeInfo::nullable(TypeKind::Text)),
        );
        let translator = ScalarTranslator {
            scope: &scope,
            null_semantics: NullSemantics::NullSafe,
            aggregate_scope: None,
        };
        let translated = translator
            .translate(&prop("City").eq(ValueExpr::Parameter {
                name: String::from("p0"),
                ty: TypeInfo::nullable(TypeKind::Text),
            }))
            .unwrap();
        let sql = render_predicate(translated);
        assert!(
            sql.contains("\"t0\".\"city\" = ? OR \"t0\".\"city\" IS NULL AND ? IS NULL"),
            "got: {sql}"
        );
    }

    #[test]
    fn test_literal_null_comparison_becomes_is_null() {
        let scope = scope_with(
            "City",
            ScalarExpr::column("t0", "city", TypeInfo::nullable(TypeKind::Text)),
        );
        let translator = ScalarTranslator {
            scope: &scope,
            null_semantics: NullSemantics::Raw,
            aggregate_scope: None,
        };
        let translated = translator
            .translate(&prop("City").eq(ValueExpr::Constant(Value::Null)))
            .unwrap();
        let sql = render_predicate(translated);
        assert!(sql.ends_with("WHERE \"t0\".\"city\" IS NULL"), "got: {sql}");

        let translated = translator
            .translate(&prop("City").ne(ValueExpr::Constant(Value::Null)))
            .unwrap();
        let sql = render_predicate(translated);
        assert!(sql.ends_with("WHERE \"t0\".\"city\" IS NOT NULL"), "got: {sql}");
    }

    #[test]
    fn test_arithmetic_rejects_text() {
        let scope = scope_with(
            "City",
            ScalarExpr::column("t0", "city", TypeInfo::nullable(TypeKind::Text)),
        );
        let translator = ScalarTranslator {
            scope: &scope,
            null_semantics: NullSemantics::Raw,
            aggregate_scope: None,
        };
        let err = translator
            .translate(&prop("City").add(ValueExpr::Constant(Value::Int(1))))
            .unwrap_err();
        assert!(matches!(
            err,
            TranslationError::InvalidOperatorForType { op, .. } if op == "+"
        ));
    }

    #[test]
    fn test_count_star_renders_as_count_star() {
        let scope = TranslationScope::new();
        let inner = scope_with(
            "Id",
            ScalarExpr::column("d0", "id", TypeInfo::new(TypeKind::Int)),
        );
        let translator = ScalarTranslator {
            scope: &scope,
            null_semantics: NullSemantics::Raw,
            aggregate_scope: Some(&inner),
        };
        let translated = translator
            .translate(&crate::query::expr::count())
            .unwrap();
        let ScalarExpr::Function { name, args, .. } = &translated else {
            panic!("expected function");
        };
        assert_eq!(name, "COUNT");
        assert!(matches!(&args[0], ScalarExpr::Fragment { sql, .. } if sql == "*"));
    }
}
