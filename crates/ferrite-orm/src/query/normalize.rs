//! Query normalization.
//!
//! The first pipeline stage. Takes the query tree as written and produces a
//! normalized tree in which every member access is resolved against the
//! mapping model, every captured value has become a named parameter in the
//! binding table, and trivially stacked projections are collapsed. Later
//! stages only ever see the normalized forms ([`ValueExpr::Property`],
//! [`ValueExpr::Ref`], [`ValueExpr::Parameter`]).

use ferrite_core::render::ParameterBindings;
use ferrite_core::scalar::{BinaryOp, UnaryOp};
use ferrite_core::types::{TypeInfo, TypeKind};
use ferrite_core::value::Value;

use crate::error::{Result, TranslationError};
use crate::model::MappingModel;
use crate::query::expr::{AggregateFunc, QueryExpr, ValueExpr};

/// A normalized query plus its parameter binding table.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuery {
    /// The normalized tree.
    pub expr: QueryExpr,
    /// Name → value table for captured parameters, in capture order.
    pub bindings: ParameterBindings,
}

/// Normalizes a query tree against the mapping model.
pub fn normalize(query: &QueryExpr, model: &MappingModel) -> Result<NormalizedQuery> {
    let mut normalizer = Normalizer {
        model,
        bindings: ParameterBindings::new(),
    };
    let (expr, _scope) = normalizer.visit(query)?;
    Ok(NormalizedQuery {
        expr,
        bindings: normalizer.bindings,
    })
}

/// Returns the type descriptor of a normalized value expression.
///
/// Only meaningful after normalization; the pre-normalization variants fall
/// back to a nullable text descriptor.
#[must_use]
pub fn ty_of(expr: &ValueExpr) -> TypeInfo {
    match expr {
        ValueExpr::Property { ty, .. }
        | ValueExpr::Ref { ty, .. }
        | ValueExpr::Parameter { ty, .. } => ty.clone(),
        ValueExpr::Constant(value) => value_ty(value),
        ValueExpr::Binary { op, left, right } => {
            let left_ty = ty_of(left);
            let right_ty = ty_of(right);
            let nullable = left_ty.nullable || right_ty.nullable;
            match op {
                BinaryOp::And | BinaryOp::Or | BinaryOp::Like => {
                    TypeInfo::new(TypeKind::Bool).with_nullable(nullable)
                }
                op if op.is_comparison() => TypeInfo::new(TypeKind::Bool).with_nullable(nullable),
                BinaryOp::Concat => TypeInfo::new(TypeKind::Text).with_nullable(nullable),
                _ => {
                    let kind = if left_ty.kind == TypeKind::Float || right_ty.kind == TypeKind::Float
                    {
                        TypeKind::Float
                    } else {
                        TypeKind::Int
                    };
                    TypeInfo::new(kind).with_nullable(nullable)
                }
            }
        }
        ValueExpr::Unary { op, operand } => match op {
            UnaryOp::Neg => ty_of(operand),
            UnaryOp::Not => {
                let nullable = ty_of(operand).nullable;
                TypeInfo::new(TypeKind::Bool).with_nullable(nullable)
            }
            UnaryOp::IsNull | UnaryOp::IsNotNull => TypeInfo::new(TypeKind::Bool),
        },
        ValueExpr::Call { function, args } => {
            function_result_ty(function, args).unwrap_or_else(|| TypeInfo::nullable(TypeKind::Text))
        }
        ValueExpr::Aggregate { func, arg } => match func {
            AggregateFunc::Count => TypeInfo::new(TypeKind::Int),
            _ => arg
                .as_deref()
                .map(ty_of)
                .unwrap_or_else(|| TypeInfo::nullable(TypeKind::Int))
                .with_nullable(true),
        },
        ValueExpr::Member { .. } | ValueExpr::Captured { .. } => TypeInfo::nullable(TypeKind::Text),
    }
}

/// Returns the result type of a registered scalar function, or `None` when
/// the function has no server translation.
pub(crate) fn function_result_ty(name: &str, args: &[ValueExpr]) -> Option<TypeInfo> {
    let any_nullable = args.iter().any(|a| ty_of(a).nullable);
    match name {
        "UPPER" | "LOWER" | "TRIM" | "SUBSTR" => {
            Some(TypeInfo::new(TypeKind::Text).with_nullable(any_nullable))
        }
        "LENGTH" => Some(TypeInfo::new(TypeKind::Int).with_nullable(any_nullable)),
        "ABS" | "ROUND" => args.first().map(ty_of),
        "COALESCE" => {
            let all_nullable = args.iter().all(|a| ty_of(a).nullable);
            args.first().map(|a| ty_of(a).with_nullable(all_nullable))
        }
        _ => None,
    }
}

pub(crate) fn value_ty(value: &Value) -> TypeInfo {
    match value {
        Value::Null => TypeInfo::nullable(TypeKind::Text),
        Value::Bool(_) => TypeInfo::new(TypeKind::Bool),
        Value::Int(_) => TypeInfo::new(TypeKind::Int),
        Value::Float(_) => TypeInfo::new(TypeKind::Float),
        Value::Text(_) => TypeInfo::new(TypeKind::Text),
        Value::Blob(_) => TypeInfo::new(TypeKind::Blob),
    }
}

/// What names the current query position can see.
#[derive(Debug, Clone)]
pub(crate) enum Scope {
    /// An entity row set: the root entity plus any joined navigations.
    Entity {
        entity: String,
        joins: Vec<JoinedNav>,
    },
    /// A projected row set: named bindings.
    Bindings(Vec<(String, TypeInfo)>),
    /// A grouped row set: key names at the surface, the pre-group scope
    /// inside aggregates.
    Group {
        keys: Vec<(String, TypeInfo)>,
        inner: Box<Scope>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct JoinedNav {
    pub navigation: String,
    pub target: String,
    /// Whether joined rows can be absent (left join), forcing nullability
    /// onto every member reached through the navigation.
    pub optional: bool,
}

struct Normalizer<'a> {
    model: &'a MappingModel,
    bindings: ParameterBindings,
}

impl Normalizer<'_> {
    fn visit(&mut self, query: &QueryExpr) -> Result<(QueryExpr, Scope)> {
        match query {
            QueryExpr::Source { entity } => {
                self.model.entity_type(entity)?;
                Ok((
                    query.clone(),
                    Scope::Entity {
                        entity: entity.clone(),
                        joins: Vec::new(),
                    },
                ))
            }

            QueryExpr::Filter { source, predicate } => {
                let (source, scope) = self.visit(source)?;
                let in_group = matches!(scope, Scope::Group { .. });
                let predicate = self.normalize_value(predicate, &scope, in_group)?;
                let ty = ty_of(&predicate);
                if ty.kind != TypeKind::Bool {
                    return Err(TranslationError::InvalidOperatorForType {
                        op: String::from("WHERE"),
                        ty: ty.store_type,
                    });
                }
                Ok((
                    QueryExpr::Filter {
                        source: Box::new(source),
                        predicate,
                    },
                    scope,
                ))
            }

            QueryExpr::Project { source, bindings } => {
                let (source, scope) = self.visit(source)?;
                let in_group = matches!(scope, Scope::Group { .. });
                let mut normalized = Vec::with_capacity(bindings.len());
                for (name, expr) in bindings {
                    let expr = self.normalize_value(expr, &scope, in_group)?;
                    normalized.push((name.clone(), expr));
                }
                let out_scope = Scope::Bindings(
                    normalized
                        .iter()
                        .map(|(name, expr)| (name.clone(), ty_of(expr)))
                        .collect(),
                );
                // Stacked projections collapse into one by inlining the
                // inner bindings at their reference sites.
                if let QueryExpr::Project {
                    source: inner_source,
                    bindings: inner_bindings,
                } = source
                {
                    let collapsed = normalized
                        .into_iter()
                        .map(|(name, expr)| (name, substitute_refs(expr, &inner_bindings)))
                        .collect();
                    return Ok((
                        QueryExpr::Project {
                            source: inner_source,
                            bindings: collapsed,
                        },
                        out_scope,
                    ));
                }
                Ok((
                    QueryExpr::Project {
                        source: Box::new(source),
                        bindings: normalized,
                    },
                    out_scope,
                ))
            }

            QueryExpr::Join { source, navigation } => {
                let (source, scope) = self.visit(source)?;
                let Scope::Entity { entity, mut joins } = scope else {
                    return Err(TranslationError::UnsupportedOperation(String::from(
                        "join after a projection or grouping",
                    )));
                };
                let nav = self.model.resolve_navigation(&entity, navigation)?;
                joins.push(JoinedNav {
                    navigation: navigation.clone(),
                    target: nav.target.clone(),
                    optional: !nav.is_collection && !nav.is_required,
                });
                Ok((
                    QueryExpr::Join {
                        source: Box::new(source),
                        navigation: navigation.clone(),
                    },
                    Scope::Entity { entity, joins },
                ))
            }

            QueryExpr::Include { source, navigation } => {
                let (source, scope) = self.visit(source)?;
                let Scope::Entity { entity, joins } = scope else {
                    return Err(TranslationError::UnsupportedOperation(String::from(
                        "include after a projection or grouping",
                    )));
                };
                let nav = self.model.resolve_navigation(&entity, navigation)?;
                if !nav.is_collection {
                    return Err(TranslationError::UnsupportedOperation(format!(
                        "include of non-collection navigation '{navigation}'"
                    )));
                }
                Ok((
                    QueryExpr::Include {
                        source: Box::new(source),
                        navigation: navigation.clone(),
                    },
                    Scope::Entity { entity, joins },
                ))
            }

            QueryExpr::GroupBy { source, keys } => {
                let (source, scope) = self.visit(source)?;
                let mut normalized = Vec::with_capacity(keys.len());
                for (name, expr) in keys {
                    let expr = self.normalize_value(expr, &scope, false)?;
                    normalized.push((name.clone(), expr));
                }
                let key_scope = normalized
                    .iter()
                    .map(|(name, expr)| (name.clone(), ty_of(expr)))
                    .collect();
                Ok((
                    QueryExpr::GroupBy {
                        source: Box::new(source),
                        keys: normalized,
                    },
                    Scope::Group {
                        keys: key_scope,
                        inner: Box::new(scope),
                    },
                ))
            }

            QueryExpr::OrderBy {
                source,
                expr,
                direction,
                reset,
            } => {
                let (source, scope) = self.visit(source)?;
                let in_group = matches!(scope, Scope::Group { .. });
                let expr = self.normalize_value(expr, &scope, in_group)?;
                Ok((
                    QueryExpr::OrderBy {
                        source: Box::new(source),
                        expr,
                        direction: *direction,
                        reset: *reset,
                    },
                    scope,
                ))
            }

            QueryExpr::Skip { source, count } => {
                let (source, scope) = self.visit(source)?;
                let count = self.normalize_paging(count)?;
                Ok((
                    QueryExpr::Skip {
                        source: Box::new(source),
                        count,
                    },
                    scope,
                ))
            }

            QueryExpr::Take { source, count } => {
                let (source, scope) = self.visit(source)?;
                let count = self.normalize_paging(count)?;
                Ok((
                    QueryExpr::Take {
                        source: Box::new(source),
                        count,
                    },
                    scope,
                ))
            }

            QueryExpr::Distinct { source } => {
                let (source, scope) = self.visit(source)?;
                Ok((
                    QueryExpr::Distinct {
                        source: Box::new(source),
                    },
                    scope,
                ))
            }

            QueryExpr::SetOp { kind, left, right } => {
                let (left, scope) = self.visit(left)?;
                let (right, _right_scope) = self.visit(right)?;
                Ok((
                    QueryExpr::SetOp {
                        kind: *kind,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    scope,
                ))
            }
        }
    }

    /// Paging operands must be integers: constants stay inline, captured
    /// values become parameters.
    fn normalize_paging(&mut self, count: &ValueExpr) -> Result<ValueExpr> {
        let normalized = match count {
            ValueExpr::Captured { name, value } => self.parameterize(name.as_deref(), value),
            other => other.clone(),
        };
        let ty = ty_of(&normalized);
        if ty.kind != TypeKind::Int {
            return Err(TranslationError::InvalidOperatorForType {
                op: String::from("LIMIT/OFFSET"),
                ty: ty.store_type,
            });
        }
        Ok(normalized)
    }

    fn parameterize(&mut self, name: Option<&str>, value: &Value) -> ValueExpr {
        let name = match name {
            Some(name) => String::from(name),
            None => self.bindings.next_name(),
        };
        self.bindings.insert(name.clone(), value.clone());
        ValueExpr::Parameter {
            name,
            ty: value_ty(value),
        }
    }

    fn normalize_value(
        &mut self,
        expr: &ValueExpr,
        scope: &Scope,
        allow_aggregates: bool,
    ) -> Result<ValueExpr> {
        match expr {
            ValueExpr::Member { path } => self.resolve_member(path, scope),

            ValueExpr::Constant(_)
            | ValueExpr::Property { .. }
            | ValueExpr::Ref { .. }
            | ValueExpr::Parameter { .. } => Ok(expr.clone()),

            ValueExpr::Captured { name, value } => Ok(self.parameterize(name.as_deref(), value)),

            ValueExpr::Binary { op, left, right } => Ok(ValueExpr::Binary {
                op: *op,
                left: Box::new(self.normalize_value(left, scope, allow_aggregates)?),
                right: Box::new(self.normalize_value(right, scope, allow_aggregates)?),
            }),

            ValueExpr::Unary { op, operand } => Ok(ValueExpr::Unary {
                op: *op,
                operand: Box::new(self.normalize_value(operand, scope, allow_aggregates)?),
            }),

            ValueExpr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|a| self.normalize_value(a, scope, allow_aggregates))
                    .collect::<Result<Vec<_>>>()?;
                if function_result_ty(function, &args).is_none() {
                    return Err(TranslationError::UnsupportedOperation(format!(
                        "function {function}"
                    )));
                }
                Ok(ValueExpr::Call {
                    function: function.clone(),
                    args,
                })
            }

            ValueExpr::Aggregate { func, arg } => {
                if !allow_aggregates {
                    return Err(TranslationError::UnsupportedOperation(String::from(
                        "aggregate outside a grouped query",
                    )));
                }
                // Aggregate arguments see the pre-group row scope.
                let inner_scope = match scope {
                    Scope::Group { inner, .. } => inner.as_ref(),
                    _ => scope,
                };
                let arg = match arg {
                    Some(arg) => Some(Box::new(self.normalize_value(arg, inner_scope, false)?)),
                    None => None,
                };
                Ok(ValueExpr::Aggregate { func: *func, arg })
            }
        }
    }

    fn resolve_member(&self, path: &[String], scope: &Scope) -> Result<ValueExpr> {
        match scope {
            Scope::Entity { entity, joins } => match path {
                [property] => {
                    let mapping = self.model.resolve_property(entity, property)?;
                    Ok(ValueExpr::Property {
                        entity: entity.clone(),
                        navigations: Vec::new(),
                        property: property.clone(),
                        column: mapping.column.clone(),
                        ty: mapping.ty.clone(),
                    })
                }
                [navigation, property] => {
                    let Some(join) = joins.iter().find(|j| j.navigation == *navigation) else {
                        // Distinguish an unjoined navigation from a typo.
                        return if self.model.resolve_navigation(entity, navigation).is_ok() {
                            Err(TranslationError::UnsupportedOperation(format!(
                                "member access through navigation '{navigation}' without a join"
                            )))
                        } else {
                            Err(TranslationError::UnmappedMember {
                                entity: entity.clone(),
                                member: navigation.clone(),
                            })
                        };
                    };
                    let mapping = self.model.resolve_property(&join.target, property)?;
                    let ty = if join.optional {
                        mapping.ty.clone().with_nullable(true)
                    } else {
                        mapping.ty.clone()
                    };
                    Ok(ValueExpr::Property {
                        entity: join.target.clone(),
                        navigations: vec![navigation.clone()],
                        property: property.clone(),
                        column: mapping.column.clone(),
                        ty,
                    })
                }
                _ => Err(TranslationError::UnsupportedOperation(format!(
                    "navigation path '{}' deeper than one segment",
                    path.join(".")
                ))),
            },

            Scope::Bindings(bindings) => match path {
                [name] => bindings
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(n, ty)| ValueExpr::Ref {
                        name: n.clone(),
                        ty: ty.clone(),
                    })
                    .ok_or_else(|| TranslationError::UnmappedMember {
                        entity: String::from("<projection>"),
                        member: name.clone(),
                    }),
                _ => Err(TranslationError::UnmappedMember {
                    entity: String::from("<projection>"),
                    member: path.join("."),
                }),
            },

            Scope::Group { keys, .. } => match path {
                [name] => keys
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(n, ty)| ValueExpr::Ref {
                        name: n.clone(),
                        ty: ty.clone(),
                    })
                    .ok_or_else(|| TranslationError::UnmappedMember {
                        entity: String::from("<group>"),
                        member: name.clone(),
                    }),
                _ => Err(TranslationError::UnmappedMember {
                    entity: String::from("<group>"),
                    member: path.join("."),
                }),
            },
        }
    }
}

/// Replaces `Ref` nodes with the expression the inner projection bound
/// under that name.
fn substitute_refs(expr: ValueExpr, inner: &[(String, ValueExpr)]) -> ValueExpr {
    match expr {
        ValueExpr::Ref { name, ty } => inner
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, e)| e.clone())
            .unwrap_or(ValueExpr::Ref { name, ty }),
        ValueExpr::Binary { op, left, right } => ValueExpr::Binary {
            op,
            left: Box::new(substitute_refs(*left, inner)),
            right: Box::new(substitute_refs(*right, inner)),
        },
        ValueExpr::Unary { op, operand } => ValueExpr::Unary {
            op,
            operand: Box::new(substitute_refs(*operand, inner)),
        },
        ValueExpr::Call { function, args } => ValueExpr::Call {
            function,
            args: args
                .into_iter()
                .map(|a| substitute_refs(a, inner))
                .collect(),
        },
        ValueExpr::Aggregate { func, arg } => ValueExpr::Aggregate {
            func,
            arg: arg.map(|a| Box::new(substitute_refs(*a, inner))),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, Navigation, PropertyMapping};
    use crate::query::expr::{captured, count, member, val, QueryExpr};

    fn sample_model() -> MappingModel {
        MappingModel::new()
            .entity(
                EntityType::new("Customer", "customers")
                    .property(PropertyMapping::new("Id", "id", TypeInfo::new(TypeKind::Int)))
                    .property(PropertyMapping::new(
                        "Name",
                        "name",
                        TypeInfo::new(TypeKind::Text),
                    ))
                    .key(&["Id"])
                    .navigation(Navigation {
                        name: String::from("Orders"),
                        target: String::from("Order"),
                        foreign_key: vec![String::from("customer_id")],
                        principal_key: vec![String::from("id")],
                        is_collection: true,
                        is_required: true,
                    }),
            )
            .entity(
                EntityType::new("Order", "orders")
                    .property(PropertyMapping::new("Id", "id", TypeInfo::new(TypeKind::Int)))
                    .property(PropertyMapping::new(
                        "CustomerId",
                        "customer_id",
                        TypeInfo::new(TypeKind::Int),
                    ))
                    .property(PropertyMapping::new(
                        "Total",
                        "total",
                        TypeInfo::new(TypeKind::Float),
                    ))
                    .key(&["Id"]),
            )
    }

    #[test]
    fn test_member_resolves_to_property() {
        let query = QueryExpr::entity("Customer").filter(member("Name").eq(val("Alice")));
        let normalized = normalize(&query, &sample_model()).unwrap();
        let QueryExpr::Filter { predicate, .. } = normalized.expr else {
            panic!("expected filter");
        };
        let ValueExpr::Binary { left, .. } = predicate else {
            panic!("expected binary");
        };
        assert!(matches!(
            *left,
            ValueExpr::Property { ref column, .. } if column == "name"
        ));
    }

    #[test]
    fn test_captured_values_become_named_parameters() {
        let query = QueryExpr::entity("Customer")
            .filter(member("Id").gt(captured("min", 3)).and(member("Name").eq(ValueExpr::Captured {
                name: None,
                value: Value::Text(String::from("Alice")),
            })));
        let normalized = normalize(&query, &sample_model()).unwrap();
        assert_eq!(normalized.bindings.get("min"), Some(&Value::Int(3)));
        // The unnamed capture is auto-named after the existing entry.
        assert_eq!(
            normalized.bindings.get("p1"),
            Some(&Value::Text(String::from("Alice")))
        );
    }

    #[test]
    fn test_unmapped_member_fails() {
        let query = QueryExpr::entity("Customer").filter(member("Missing").is_null());
        let err = normalize(&query, &sample_model()).unwrap_err();
        assert!(matches!(err, TranslationError::UnmappedMember { .. }));
    }

    #[test]
    fn test_navigation_member_requires_join() {
        let query = QueryExpr::entity("Customer").filter(member("Orders.Total").gt(val(10.0)));
        let err = normalize(&query, &sample_model()).unwrap_err();
        assert!(matches!(err, TranslationError::UnsupportedOperation(_)));

        let joined = QueryExpr::entity("Customer")
            .join("Orders")
            .filter(member("Orders.Total").gt(val(10.0)));
        assert!(normalize(&joined, &sample_model()).is_ok());
    }

    #[test]
    fn test_unknown_function_fails() {
        let query = QueryExpr::entity("Customer")
            .filter(crate::query::expr::call("SOUNDEX", vec![member("Name")]).eq(val("A123")));
        let err = normalize(&query, &sample_model()).unwrap_err();
        assert!(matches!(
            err,
            TranslationError::UnsupportedOperation(what) if what.contains("SOUNDEX")
        ));
    }

    #[test]
    fn test_aggregate_outside_group_fails() {
        let query = QueryExpr::entity("Customer").filter(count().gt(val(1)));
        let err = normalize(&query, &sample_model()).unwrap_err();
        assert!(matches!(err, TranslationError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_stacked_projections_collapse() {
        let query = QueryExpr::entity("Customer")
            .project(vec![("N", member("Name")), ("I", member("Id"))])
            .project(vec![("Name", member("N"))]);
        let normalized = normalize(&query, &sample_model()).unwrap();
        let QueryExpr::Project { source, bindings } = normalized.expr else {
            panic!("expected project");
        };
        assert!(matches!(*source, QueryExpr::Source { .. }));
        assert_eq!(bindings.len(), 1);
        assert!(matches!(
            bindings[0].1,
            ValueExpr::Property { ref column, .. } if column == "name"
        ));
    }

    #[test]
    fn test_group_keys_enter_scope() {
        let query = QueryExpr::entity("Customer")
            .group_by(vec![("Name", member("Name"))])
            .project(vec![("Name", member("Name")), ("Count", count())]);
        assert!(normalize(&query, &sample_model()).is_ok());
    }
}
