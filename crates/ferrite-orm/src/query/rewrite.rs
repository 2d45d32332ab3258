//! Provider rewrite pass.
//!
//! Runs after compilation and before rendering. Each rule inspects the
//! compiled shape against the dialect's capability surface and rewrites it
//! into a form the backend accepts. Rules are pure tree-to-tree transforms
//! applied in declaration order; order is part of the contract (the paging
//! rule, for example, must see the projection the client-eval rule may have
//! extended).

use ferrite_core::dialect::Dialect;
use ferrite_core::scalar::{BinaryOp, ScalarExpr, UnaryOp};
use ferrite_core::shape::{Ordering, ProjectionColumn, SelectShape, SourceExpr};
use ferrite_core::shaper::Shaper;
use ferrite_core::types::{TypeInfo, TypeKind};
use ferrite_core::value::Value;

use crate::error::{Result, TranslationError};
use crate::query::compile::CompiledQuery;

type Rule = fn(&mut CompiledQuery, &dyn Dialect) -> Result<()>;

const RULES: &[(&str, Rule)] = &[
    ("function-name-overrides", apply_function_overrides),
    ("boolean-predicate-compat", apply_boolean_compat),
    ("client-eval-fallback", apply_client_eval_fallback),
    ("offset-requires-limit", apply_offset_limit),
    ("paging-requires-order", apply_paging_order),
];

/// Applies every provider rewrite rule to the compiled query.
pub fn apply_provider_rewrites(
    query: &CompiledQuery,
    dialect: &dyn Dialect,
) -> Result<CompiledQuery> {
    let mut query = query.clone();
    for (name, rule) in RULES {
        rule(&mut query, dialect)?;
        tracing::trace!(rule = name, dialect = dialect.name(), "applied rewrite rule");
    }
    Ok(query)
}

/// Renames translated functions to their backend spellings.
fn apply_function_overrides(query: &mut CompiledQuery, dialect: &dyn Dialect) -> Result<()> {
    query.shape = map_select(&query.shape, &|expr| match expr {
        ScalarExpr::Function { name, args, ty } => {
            let name = match dialect.function_override(&name) {
                Some(renamed) => String::from(renamed),
                None => name,
            };
            ScalarExpr::Function { name, args, ty }
        }
        other => other,
    });
    Ok(())
}

/// Rewrites boolean expressions for backends without a native boolean type:
/// bare boolean columns in truth positions become `col = 1` and boolean
/// constants become integers.
fn apply_boolean_compat(query: &mut CompiledQuery, dialect: &dyn Dialect) -> Result<()> {
    if dialect.supports_boolean_type() {
        return Ok(());
    }
    query.shape = bool_fix_select(&query.shape);
    Ok(())
}

fn bool_fix_select(select: &SelectShape) -> SelectShape {
    let mut out = select.clone();
    out.source = bool_fix_source(&select.source);
    out.predicate = select.predicate.as_ref().map(truthify);
    out.having = select.having.as_ref().map(truthify);
    out.projection = select
        .projection
        .iter()
        .map(|c| ProjectionColumn::new(int_booleans(&c.expr), c.alias.clone()))
        .collect();
    out.group_by = select.group_by.iter().map(int_booleans).collect();
    out.orderings = select
        .orderings
        .iter()
        .map(|o| Ordering {
            expr: int_booleans(&o.expr),
            direction: o.direction,
        })
        .collect();
    out
}

fn bool_fix_source(source: &SourceExpr) -> SourceExpr {
    match source {
        SourceExpr::Table { .. } => source.clone(),
        SourceExpr::Derived { alias, select } => SourceExpr::Derived {
            alias: alias.clone(),
            select: Box::new(bool_fix_select(select)),
        },
        SourceExpr::Join {
            kind,
            outer,
            inner,
            predicate,
        } => SourceExpr::Join {
            kind: *kind,
            outer: Box::new(bool_fix_source(outer)),
            inner: Box::new(bool_fix_source(inner)),
            predicate: predicate.as_ref().map(truthify),
        },
        SourceExpr::SetOp {
            kind,
            left,
            right,
            distinct,
            alias,
        } => SourceExpr::SetOp {
            kind: *kind,
            left: Box::new(bool_fix_select(left)),
            right: Box::new(bool_fix_select(right)),
            distinct: *distinct,
            alias: alias.clone(),
        },
    }
}

/// Rewrites an expression sitting in a truth position (WHERE, HAVING, ON,
/// logical operands).
fn truthify(expr: &ScalarExpr) -> ScalarExpr {
    match expr {
        ScalarExpr::Column { ty, .. } if ty.kind == TypeKind::Bool => ScalarExpr::binary(
            BinaryOp::Eq,
            expr.clone(),
            ScalarExpr::int(1),
            TypeInfo::new(TypeKind::Bool).with_nullable(ty.nullable),
        ),
        ScalarExpr::Binary {
            op: op @ (BinaryOp::And | BinaryOp::Or),
            left,
            right,
            ty,
        } => ScalarExpr::Binary {
            op: *op,
            left: Box::new(truthify(left)),
            right: Box::new(truthify(right)),
            ty: ty.clone(),
        },
        ScalarExpr::Unary {
            op: UnaryOp::Not,
            operand,
            ty,
        } => ScalarExpr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(truthify(operand)),
            ty: ty.clone(),
        },
        other => int_booleans(other),
    }
}

/// Replaces boolean constants with 1/0 everywhere below this node.
fn int_booleans(expr: &ScalarExpr) -> ScalarExpr {
    map_scalar(expr.clone(), &|node| match node {
        ScalarExpr::Constant {
            value: Value::Bool(b),
            ty,
        } => ScalarExpr::Constant {
            value: Value::Int(i64::from(b)),
            ty,
        },
        other => other,
    })
}

/// Moves scalar projections over backend-unsupported functions to client
/// evaluation: the arguments are fetched instead and the function is applied
/// during materialization. Unsupported functions anywhere else fail
/// translation.
fn apply_client_eval_fallback(query: &mut CompiledQuery, dialect: &dyn Dialect) -> Result<()> {
    let unsupported_at = |column: &ProjectionColumn| match &column.expr {
        ScalarExpr::Function { name, .. } if !dialect.supports_function(name) => Some(name.clone()),
        _ => None,
    };

    let targets: Vec<(usize, String)> = query
        .shape
        .projection
        .iter()
        .enumerate()
        .filter_map(|(i, c)| unsupported_at(c).map(|name| (i, name)))
        .collect();

    for (ordinal, function) in targets {
        let ScalarExpr::Function { args, ty, .. } = query.shape.projection[ordinal].expr.clone()
        else {
            continue;
        };
        if args.is_empty() {
            return Err(TranslationError::UnsupportedOperation(format!(
                "function {function}"
            )));
        }
        let Some(position) = shaper_scalar_at(&mut query.shaper, ordinal) else {
            return Err(TranslationError::UnsupportedOperation(format!(
                "function {function}"
            )));
        };

        // First argument reuses the original slot; the rest are appended so
        // existing ordinals stay put.
        let mut arg_ordinals = vec![ordinal];
        let alias = query.shape.projection[ordinal].alias.clone();
        let mut args = args.into_iter();
        let first = args.next().unwrap_or_else(|| ScalarExpr::int(0));
        query.shape.projection[ordinal] = ProjectionColumn::new(first, alias);
        for (extra, arg) in args.enumerate() {
            let slot = query.shape.projection.len();
            query
                .shape
                .projection
                .push(ProjectionColumn::new(arg, format!("ce{ordinal}_{extra}")));
            arg_ordinals.push(slot);
        }
        *position = Shaper::ClientEval {
            function,
            arg_ordinals,
            ty,
        };
    }

    // Anything unsupported that survived the projection fallback cannot be
    // finished in-process.
    if let Some(name) = find_unsupported(&query.shape, dialect) {
        return Err(TranslationError::UnsupportedOperation(format!(
            "function {name}"
        )));
    }
    Ok(())
}

/// Finds the shaper member that reads exactly the given projection ordinal.
fn shaper_scalar_at(shaper: &mut Shaper, ordinal: usize) -> Option<&mut Shaper> {
    if matches!(*shaper, Shaper::Scalar { ordinal: o, .. } if o == ordinal) {
        return Some(shaper);
    }
    match shaper {
        Shaper::Composite { bindings } => bindings
            .iter_mut()
            .find_map(|(_, s)| shaper_scalar_at(s, ordinal)),
        _ => None,
    }
}

fn find_unsupported(select: &SelectShape, dialect: &dyn Dialect) -> Option<String> {
    let mut found = None;
    visit_select_scalars(select, &mut |expr| {
        if found.is_none() {
            if let ScalarExpr::Function { name, .. } = expr {
                if !dialect.supports_function(name) {
                    found = Some(name.clone());
                }
            }
        }
    });
    found
}

/// Supplies an unlimited LIMIT for offset-only queries on backends where
/// OFFSET cannot stand alone.
fn apply_offset_limit(query: &mut CompiledQuery, dialect: &dyn Dialect) -> Result<()> {
    if !dialect.requires_limit_for_offset() {
        return Ok(());
    }
    let shape = &mut query.shape;
    if shape.offset.is_some() && shape.limit.is_none() {
        shape.limit = Some(ScalarExpr::int(-1));
    }
    Ok(())
}

/// Synthesizes a deterministic ordering over the shaper's key columns when
/// the backend requires ORDER BY for paging and the query declares none.
fn apply_paging_order(query: &mut CompiledQuery, dialect: &dyn Dialect) -> Result<()> {
    if dialect.supports_offset_without_order_by() {
        return Ok(());
    }
    let shape = &mut query.shape;
    if (shape.offset.is_none() && shape.limit.is_none()) || !shape.orderings.is_empty() {
        return Ok(());
    }
    let ordinals = match &query.shaper {
        Shaper::Entity(entity) => entity.key_ordinals.clone(),
        other => other.referenced_ordinals().into_iter().take(1).collect(),
    };
    for ordinal in ordinals {
        if let Some(column) = shape.projection.get(ordinal) {
            shape.orderings.push(Ordering::asc(column.expr.clone()));
        }
    }
    Ok(())
}

/// Applies `f` bottom-up to every scalar node in the expression.
fn map_scalar(expr: ScalarExpr, f: &impl Fn(ScalarExpr) -> ScalarExpr) -> ScalarExpr {
    let mapped = match expr {
        ScalarExpr::Function { name, args, ty } => ScalarExpr::Function {
            name,
            args: args.into_iter().map(|a| map_scalar(a, f)).collect(),
            ty,
        },
        ScalarExpr::Unary { op, operand, ty } => ScalarExpr::Unary {
            op,
            operand: Box::new(map_scalar(*operand, f)),
            ty,
        },
        ScalarExpr::Binary {
            op,
            left,
            right,
            ty,
        } => ScalarExpr::Binary {
            op,
            left: Box::new(map_scalar(*left, f)),
            right: Box::new(map_scalar(*right, f)),
            ty,
        },
        ScalarExpr::Case {
            branches,
            else_result,
            ty,
        } => ScalarExpr::Case {
            branches: branches
                .into_iter()
                .map(|(c, r)| (map_scalar(c, f), map_scalar(r, f)))
                .collect(),
            else_result: else_result.map(|e| Box::new(map_scalar(*e, f))),
            ty,
        },
        ScalarExpr::ScalarSubquery { shape, ty } => ScalarExpr::ScalarSubquery {
            shape: Box::new(map_select(&shape, f)),
            ty,
        },
        leaf => leaf,
    };
    f(mapped)
}

/// Applies `f` bottom-up to every scalar node in the select, including
/// nested derived tables and set operands.
fn map_select(select: &SelectShape, f: &impl Fn(ScalarExpr) -> ScalarExpr) -> SelectShape {
    let mut out = select.clone();
    out.source = map_source(&select.source, f);
    out.projection = select
        .projection
        .iter()
        .map(|c| ProjectionColumn::new(map_scalar(c.expr.clone(), f), c.alias.clone()))
        .collect();
    out.predicate = select.predicate.clone().map(|p| map_scalar(p, f));
    out.group_by = select
        .group_by
        .iter()
        .map(|g| map_scalar(g.clone(), f))
        .collect();
    out.having = select.having.clone().map(|h| map_scalar(h, f));
    out.orderings = select
        .orderings
        .iter()
        .map(|o| Ordering {
            expr: map_scalar(o.expr.clone(), f),
            direction: o.direction,
        })
        .collect();
    out.offset = select.offset.clone().map(|o| map_scalar(o, f));
    out.limit = select.limit.clone().map(|l| map_scalar(l, f));
    out
}

fn map_source(source: &SourceExpr, f: &impl Fn(ScalarExpr) -> ScalarExpr) -> SourceExpr {
    match source {
        SourceExpr::Table { .. } => source.clone(),
        SourceExpr::Derived { alias, select } => SourceExpr::Derived {
            alias: alias.clone(),
            select: Box::new(map_select(select, f)),
        },
        SourceExpr::Join {
            kind,
            outer,
            inner,
            predicate,
        } => SourceExpr::Join {
            kind: *kind,
            outer: Box::new(map_source(outer, f)),
            inner: Box::new(map_source(inner, f)),
            predicate: predicate.clone().map(|p| map_scalar(p, f)),
        },
        SourceExpr::SetOp {
            kind,
            left,
            right,
            distinct,
            alias,
        } => SourceExpr::SetOp {
            kind: *kind,
            left: Box::new(map_select(left, f)),
            right: Box::new(map_select(right, f)),
            distinct: *distinct,
            alias: alias.clone(),
        },
    }
}

fn visit_select_scalars(select: &SelectShape, f: &mut impl FnMut(&ScalarExpr)) {
    fn visit_scalar(expr: &ScalarExpr, f: &mut impl FnMut(&ScalarExpr)) {
        f(expr);
        match expr {
            ScalarExpr::Function { args, .. } => {
                for arg in args {
                    visit_scalar(arg, f);
                }
            }
            ScalarExpr::Unary { operand, .. } => visit_scalar(operand, f),
            ScalarExpr::Binary { left, right, .. } => {
                visit_scalar(left, f);
                visit_scalar(right, f);
            }
            ScalarExpr::Case {
                branches,
                else_result,
                ..
            } => {
                for (c, r) in branches {
                    visit_scalar(c, f);
                    visit_scalar(r, f);
                }
                if let Some(e) = else_result {
                    visit_scalar(e, f);
                }
            }
            ScalarExpr::ScalarSubquery { shape, .. } => visit_select_scalars(shape, f),
            _ => {}
        }
    }

    fn visit_source(source: &SourceExpr, f: &mut impl FnMut(&ScalarExpr)) {
        match source {
            SourceExpr::Table { .. } => {}
            SourceExpr::Derived { select, .. } => visit_select_scalars(select, f),
            SourceExpr::Join {
                outer,
                inner,
                predicate,
                ..
            } => {
                visit_source(outer, f);
                visit_source(inner, f);
                if let Some(p) = predicate {
                    visit_scalar(p, f);
                }
            }
            SourceExpr::SetOp { left, right, .. } => {
                visit_select_scalars(left, f);
                visit_select_scalars(right, f);
            }
        }
    }

    visit_source(&select.source, f);
    for column in &select.projection {
        visit_scalar(&column.expr, f);
    }
    if let Some(p) = &select.predicate {
        visit_scalar(p, f);
    }
    for g in &select.group_by {
        visit_scalar(g, f);
    }
    if let Some(h) = &select.having {
        visit_scalar(h, f);
    }
    for o in &select.orderings {
        visit_scalar(&o.expr, f);
    }
    if let Some(o) = &select.offset {
        visit_scalar(o, f);
    }
    if let Some(l) = &select.limit {
        visit_scalar(l, f);
    }
}
