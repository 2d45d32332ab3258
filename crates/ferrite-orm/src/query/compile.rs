//! Query compilation.
//!
//! Visits a normalized query tree bottom-up and composes one
//! [`SelectShape`] plus the [`Shaper`] describing how its rows materialize.
//! Composition follows the wrap-when-necessary rule: operators extend the
//! current select in place until the select already applies row-set shaping
//! (grouping, distinct or paging), at which point it is pushed down as a
//! derived table and composition continues on the outside. Wrapping
//! preserves projection ordinals, so the shaper never needs to be rebuilt.

use ferrite_core::render::ParameterBindings;
use ferrite_core::scalar::{BinaryOp, ScalarExpr};
use ferrite_core::shape::{
    JoinKind, Ordering, ProjectionColumn, SelectShape, SetOpKind, SourceExpr,
};
use ferrite_core::shaper::{CollectionShaper, EntityShaper, Shaper};
use ferrite_core::types::{TypeInfo, TypeKind};

use crate::error::{Result, TranslationError};
use crate::model::{EntityType, MappingModel, Navigation};
use crate::query::expr::{QueryExpr, QuerySetOp, ValueExpr};
use crate::query::normalize::normalize;
use crate::query::translate::{NullSemantics, RefKey, ScalarTranslator, TranslationScope};

/// Compilation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Equality translation mode.
    pub null_semantics: NullSemantics,
}

/// The output of compilation: a renderable shape, the shaper aligned with
/// its projection, and the parameter binding table.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// The composed select.
    pub shape: SelectShape,
    /// Row-to-result description; ordinals index `shape.projection`.
    pub shaper: Shaper,
    /// Captured parameter values in capture order.
    pub bindings: ParameterBindings,
}

/// Compiles a query tree against the mapping model.
pub fn compile(
    query: &QueryExpr,
    model: &MappingModel,
    options: &CompileOptions,
) -> Result<CompiledQuery> {
    let normalized = normalize(query, model)?;
    let mut compiler = Compiler {
        model,
        null_semantics: options.null_semantics,
        table_count: 0,
        derived_count: 0,
    };
    let state = compiler.visit(&normalized.expr)?;
    if state.group.is_some() {
        return Err(TranslationError::UnsupportedOperation(String::from(
            "grouped query without a projection",
        )));
    }
    tracing::debug!(
        parameters = normalized.bindings.len(),
        "compiled query shape"
    );
    Ok(CompiledQuery {
        shape: state.select,
        shaper: state.shaper,
        bindings: normalized.bindings,
    })
}

/// Grouping context carried between GroupBy and the projection that
/// consumes it.
struct GroupState {
    /// Scope aggregate arguments resolve against (the pre-group row scope,
    /// retargeted through the wrap).
    inner_scope: TranslationScope,
}

/// The select under construction plus everything needed to keep extending
/// it.
struct SelectState {
    select: SelectShape,
    scope: TranslationScope,
    shaper: Shaper,
    /// Root entity type while the row set is still entity-shaped.
    entity: Option<String>,
    group: Option<GroupState>,
}

struct Compiler<'a> {
    model: &'a MappingModel,
    null_semantics: NullSemantics,
    table_count: usize,
    derived_count: usize,
}

impl Compiler<'_> {
    fn next_table_alias(&mut self) -> String {
        let alias = format!("t{}", self.table_count);
        self.table_count += 1;
        alias
    }

    fn next_derived_alias(&mut self) -> String {
        let alias = format!("d{}", self.derived_count);
        self.derived_count += 1;
        alias
    }

    fn visit(&mut self, query: &QueryExpr) -> Result<SelectState> {
        match query {
            QueryExpr::Source { entity } => self.visit_source(entity),
            QueryExpr::Filter { source, predicate } => {
                let state = self.visit(source)?;
                self.apply_filter(state, predicate)
            }
            QueryExpr::Project { source, bindings } => {
                let state = self.visit(source)?;
                self.apply_project(state, bindings)
            }
            QueryExpr::Join { source, navigation } => {
                let state = self.visit(source)?;
                self.apply_join(state, navigation)
            }
            QueryExpr::Include { source, navigation } => {
                let state = self.visit(source)?;
                self.apply_include(state, navigation)
            }
            QueryExpr::GroupBy { source, keys } => {
                let state = self.visit(source)?;
                self.apply_group_by(state, keys)
            }
            QueryExpr::OrderBy {
                source,
                expr,
                direction,
                reset,
            } => {
                let state = self.visit(source)?;
                self.apply_order_by(state, expr, *direction, *reset)
            }
            QueryExpr::Skip { source, count } => {
                let state = self.visit(source)?;
                self.apply_skip(state, count)
            }
            QueryExpr::Take { source, count } => {
                let state = self.visit(source)?;
                self.apply_take(state, count)
            }
            QueryExpr::Distinct { source } => {
                let state = self.visit(source)?;
                self.apply_distinct(state)
            }
            QueryExpr::SetOp { kind, left, right } => {
                let left = self.visit(left)?;
                let right = self.visit(right)?;
                self.apply_set_op(*kind, left, right)
            }
        }
    }

    fn visit_source(&mut self, entity_name: &str) -> Result<SelectState> {
        let entity = self.model.entity_type(entity_name)?.clone();
        let alias = self.next_table_alias();
        let mut select = SelectShape::new(SourceExpr::table(
            entity.schema.clone(),
            entity.table.clone(),
            alias.clone(),
        ));

        let mut scope = TranslationScope::new();
        let mut properties = Vec::with_capacity(entity.properties.len());
        for (ordinal, property) in entity.properties.iter().enumerate() {
            let column = ScalarExpr::column(alias.clone(), property.column.clone(), property.ty.clone());
            select
                .projection
                .push(ProjectionColumn::new(column.clone(), property.column.clone()));
            scope.insert(
                RefKey::Property {
                    navigations: Vec::new(),
                    property: property.name.clone(),
                },
                column,
            );
            properties.push((property.name.clone(), ordinal));
        }

        let key_ordinals = entity
            .key
            .iter()
            .filter_map(|name| properties.iter().find(|(n, _)| n == name))
            .map(|(_, o)| *o)
            .collect::<Vec<_>>();

        let discriminator = match &entity.discriminator {
            Some(mapping) => Some(self.discriminator_ordinal(&mut select, &alias, &mapping.column)),
            None => None,
        };

        Ok(SelectState {
            select,
            scope,
            shaper: Shaper::Entity(EntityShaper {
                entity_type: entity.name.clone(),
                key_ordinals,
                properties,
                discriminator,
                collections: Vec::new(),
            }),
            entity: Some(entity.name),
            group: None,
        })
    }

    /// Returns the projection ordinal of the discriminator column, adding it
    /// to the projection when no mapped property already exposes it.
    fn discriminator_ordinal(
        &self,
        select: &mut SelectShape,
        alias: &str,
        column: &str,
    ) -> usize {
        if let Some(ordinal) = select.ordinal_of(column) {
            return ordinal;
        }
        select.projection.push(ProjectionColumn::new(
            ScalarExpr::column(alias, column, TypeInfo::new(TypeKind::Text)),
            column,
        ));
        select.projection.len() - 1
    }

    fn apply_filter(&mut self, mut state: SelectState, predicate: &ValueExpr) -> Result<SelectState> {
        if state.group.is_some() {
            let translated = self.translator(&state).translate(predicate)?;
            state.select.having = Some(match state.select.having.take() {
                Some(existing) => existing.and(translated),
                None => translated,
            });
            return Ok(state);
        }
        if state.select.requires_wrap() {
            state = self.wrap(state);
        }
        let translated = self.translator(&state).translate(predicate)?;
        state.select.predicate = Some(match state.select.predicate.take() {
            Some(existing) => existing.and(translated),
            None => translated,
        });
        Ok(state)
    }

    fn apply_project(
        &mut self,
        mut state: SelectState,
        bindings: &[(String, ValueExpr)],
    ) -> Result<SelectState> {
        let grouped = state.group.is_some();
        if !grouped && state.select.requires_wrap() {
            state = self.wrap(state);
        }

        let mut projection = Vec::with_capacity(bindings.len());
        let mut shaper_bindings = Vec::with_capacity(bindings.len());
        let mut scope = TranslationScope::new();
        for (ordinal, (name, expr)) in bindings.iter().enumerate() {
            let translated = self.translator(&state).translate(expr)?;
            let ty = translated.ty().clone();
            scope.insert(RefKey::Named(name.clone()), translated.clone());
            projection.push(ProjectionColumn::new(translated, name.clone()));
            shaper_bindings.push((name.clone(), Shaper::scalar(ordinal, ty)));
        }

        state.select.projection = projection;
        state.scope = scope;
        state.shaper = Shaper::Composite {
            bindings: shaper_bindings,
        };
        state.entity = None;
        state.group = None;
        Ok(state)
    }

    fn apply_join(&mut self, mut state: SelectState, navigation: &str) -> Result<SelectState> {
        if state.select.requires_wrap() {
            state = self.wrap(state);
        }
        let entity_name = state.entity.clone().ok_or_else(|| {
            TranslationError::UnsupportedOperation(String::from(
                "join after a projection or grouping",
            ))
        })?;
        let parent = self.model.entity_type(&entity_name)?.clone();
        let nav = self.model.resolve_navigation(&entity_name, navigation)?.clone();
        let target = self.model.entity_type(&nav.target)?.clone();

        let kind = if nav.is_collection || nav.is_required {
            JoinKind::Inner
        } else {
            JoinKind::LeftOuter
        };
        let optional = kind == JoinKind::LeftOuter;
        let join_alias = self.next_table_alias();
        let predicate = self.join_predicate(&state, &parent, &nav, &target, &join_alias)?;

        let old_source = std::mem::replace(
            &mut state.select.source,
            SourceExpr::table(None, "placeholder", "placeholder"),
        );
        state.select.source = SourceExpr::Join {
            kind,
            outer: Box::new(old_source),
            inner: Box::new(SourceExpr::table(
                target.schema.clone(),
                target.table.clone(),
                join_alias.clone(),
            )),
            predicate: Some(predicate),
        };

        self.expose_joined_columns(&mut state, navigation, &target, &join_alias, optional);
        Ok(state)
    }

    fn apply_include(&mut self, mut state: SelectState, navigation: &str) -> Result<SelectState> {
        if state.select.requires_wrap() {
            state = self.wrap(state);
        }
        let entity_name = state.entity.clone().ok_or_else(|| {
            TranslationError::UnsupportedOperation(String::from(
                "include after a projection or grouping",
            ))
        })?;
        let parent = self.model.entity_type(&entity_name)?.clone();
        let nav = self.model.resolve_navigation(&entity_name, navigation)?.clone();
        let target = self.model.entity_type(&nav.target)?.clone();

        // Included children join optionally so parents without children
        // still come back; the materializer skips all-NULL child keys.
        let join_alias = self.next_table_alias();
        let predicate = self.join_predicate(&state, &parent, &nav, &target, &join_alias)?;

        let old_source = std::mem::replace(
            &mut state.select.source,
            SourceExpr::table(None, "placeholder", "placeholder"),
        );
        state.select.source = SourceExpr::Join {
            kind: JoinKind::LeftOuter,
            outer: Box::new(old_source),
            inner: Box::new(SourceExpr::table(
                target.schema.clone(),
                target.table.clone(),
                join_alias.clone(),
            )),
            predicate: Some(predicate),
        };

        let first_child_ordinal = state.select.projection.len();
        self.expose_joined_columns(&mut state, navigation, &target, &join_alias, true);

        let child_properties = target
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), first_child_ordinal + i))
            .collect::<Vec<_>>();
        let child_key_ordinals = target
            .key
            .iter()
            .filter_map(|name| child_properties.iter().find(|(n, _)| n == name))
            .map(|(_, o)| *o)
            .collect::<Vec<_>>();

        let Shaper::Entity(root) = &mut state.shaper else {
            return Err(TranslationError::UnsupportedOperation(String::from(
                "include after a projection or grouping",
            )));
        };
        root.collections.push(CollectionShaper {
            navigation: String::from(navigation),
            parent_key_ordinals: root.key_ordinals.clone(),
            element: Box::new(Shaper::Entity(EntityShaper {
                entity_type: target.name.clone(),
                key_ordinals: child_key_ordinals,
                properties: child_properties,
                discriminator: None,
                collections: Vec::new(),
            })),
        });
        Ok(state)
    }

    /// Builds the ON predicate pairing foreign-key columns with principal-key
    /// columns. Parent-side columns are resolved through the current scope so
    /// the predicate survives earlier wraps.
    fn join_predicate(
        &self,
        state: &SelectState,
        parent: &EntityType,
        nav: &Navigation,
        target: &EntityType,
        join_alias: &str,
    ) -> Result<ScalarExpr> {
        let pairs: Vec<(ScalarExpr, ScalarExpr)> = if nav.is_collection {
            // Declaring side is the principal: child rows carry the FK.
            nav.foreign_key
                .iter()
                .zip(&nav.principal_key)
                .map(|(fk, pk)| {
                    let child = self.column_of(target, join_alias, fk)?;
                    let parent_expr = self.scoped_column(state, parent, pk)?;
                    Ok((child, parent_expr))
                })
                .collect::<Result<_>>()?
        } else {
            // Declaring side is the dependent: it carries the FK.
            nav.foreign_key
                .iter()
                .zip(&nav.principal_key)
                .map(|(fk, pk)| {
                    let target_expr = self.column_of(target, join_alias, pk)?;
                    let parent_expr = self.scoped_column(state, parent, fk)?;
                    Ok((target_expr, parent_expr))
                })
                .collect::<Result<_>>()?
        };

        let mut predicate: Option<ScalarExpr> = None;
        for (left, right) in pairs {
            let equal = ScalarExpr::binary(BinaryOp::Eq, left, right, TypeInfo::new(TypeKind::Bool));
            predicate = Some(match predicate {
                Some(existing) => existing.and(equal),
                None => equal,
            });
        }
        predicate.ok_or_else(|| {
            TranslationError::UnsupportedOperation(format!(
                "navigation '{}' declares no key columns",
                nav.name
            ))
        })
    }

    fn column_of(&self, entity: &EntityType, alias: &str, column: &str) -> Result<ScalarExpr> {
        let property = entity.property_by_column(column).ok_or_else(|| {
            TranslationError::UnmappedMember {
                entity: entity.name.clone(),
                member: String::from(column),
            }
        })?;
        Ok(ScalarExpr::column(alias, column, property.ty.clone()))
    }

    /// Resolves a parent-side column through the translation scope, so it
    /// points at the derived alias when the parent select was wrapped.
    fn scoped_column(
        &self,
        state: &SelectState,
        parent: &EntityType,
        column: &str,
    ) -> Result<ScalarExpr> {
        let property = parent.property_by_column(column).ok_or_else(|| {
            TranslationError::UnmappedMember {
                entity: parent.name.clone(),
                member: String::from(column),
            }
        })?;
        state
            .scope
            .lookup(&RefKey::Property {
                navigations: Vec::new(),
                property: property.name.clone(),
            })
            .cloned()
            .ok_or_else(|| TranslationError::UnmappedMember {
                entity: parent.name.clone(),
                member: property.name.clone(),
            })
    }

    /// Adds the target entity's columns to the projection under
    /// navigation-prefixed aliases and exposes them in scope.
    fn expose_joined_columns(
        &self,
        state: &mut SelectState,
        navigation: &str,
        target: &EntityType,
        join_alias: &str,
        optional: bool,
    ) {
        let prefix = navigation.to_lowercase();
        for property in &target.properties {
            let ty = if optional {
                property.ty.clone().with_nullable(true)
            } else {
                property.ty.clone()
            };
            let column = ScalarExpr::column(join_alias, property.column.clone(), ty);
            state.select.projection.push(ProjectionColumn::new(
                column.clone(),
                format!("{prefix}_{}", property.column),
            ));
            state.scope.insert(
                RefKey::Property {
                    navigations: vec![String::from(navigation)],
                    property: property.name.clone(),
                },
                column,
            );
        }
    }

    fn apply_group_by(
        &mut self,
        state: SelectState,
        keys: &[(String, ValueExpr)],
    ) -> Result<SelectState> {
        // Grouping always composes over a derived table: the grouped select
        // owns a fresh projection and must not inherit entity columns.
        let mut state = self.wrap(state);
        let inner_scope = state.scope.clone();

        let mut projection = Vec::with_capacity(keys.len());
        let mut group_by = Vec::with_capacity(keys.len());
        let mut shaper_bindings = Vec::with_capacity(keys.len());
        let mut scope = TranslationScope::new();
        for (ordinal, (name, expr)) in keys.iter().enumerate() {
            let translated = self.translator(&state).translate(expr)?;
            let ty = translated.ty().clone();
            group_by.push(translated.clone());
            scope.insert(RefKey::Named(name.clone()), translated.clone());
            projection.push(ProjectionColumn::new(translated, name.clone()));
            shaper_bindings.push((name.clone(), Shaper::scalar(ordinal, ty)));
        }

        state.select.projection = projection;
        state.select.group_by = group_by;
        state.scope = scope;
        state.shaper = Shaper::Composite {
            bindings: shaper_bindings,
        };
        state.entity = None;
        state.group = Some(GroupState { inner_scope });
        Ok(state)
    }

    fn apply_order_by(
        &mut self,
        mut state: SelectState,
        expr: &ValueExpr,
        direction: ferrite_core::shape::OrderDirection,
        reset: bool,
    ) -> Result<SelectState> {
        if state.group.is_none() && (state.select.offset.is_some() || state.select.limit.is_some())
        {
            state = self.wrap(state);
        }
        let translated = self.translator(&state).translate(expr)?;
        if reset {
            state.select.orderings.clear();
        }
        state.select.orderings.push(Ordering {
            expr: translated,
            direction,
        });
        Ok(state)
    }

    fn apply_skip(&mut self, mut state: SelectState, count: &ValueExpr) -> Result<SelectState> {
        // An offset under an existing limit changes which rows the limit
        // keeps, so the limited select is pushed down first.
        if state.select.offset.is_some() || state.select.limit.is_some() {
            state = self.wrap(state);
        }
        let translated = self.translator(&state).translate(count)?;
        state.select.offset = Some(translated);
        Ok(state)
    }

    fn apply_take(&mut self, mut state: SelectState, count: &ValueExpr) -> Result<SelectState> {
        if state.select.limit.is_some() {
            state = self.wrap(state);
        }
        let translated = self.translator(&state).translate(count)?;
        state.select.limit = Some(translated);
        Ok(state)
    }

    fn apply_distinct(&mut self, mut state: SelectState) -> Result<SelectState> {
        if state.select.offset.is_some() || state.select.limit.is_some() {
            state = self.wrap(state);
        }
        state.select.distinct = true;
        Ok(state)
    }

    fn apply_set_op(
        &mut self,
        kind: QuerySetOp,
        left: SelectState,
        right: SelectState,
    ) -> Result<SelectState> {
        // ORDER BY and paging are not legal on a bare compound operand, so
        // a shaped operand is pushed down as a derived table first.
        let left = if set_operand_needs_wrap(&left.select) {
            self.wrap(left)
        } else {
            left
        };
        let right = if set_operand_needs_wrap(&right.select) {
            self.wrap(right)
        } else {
            right
        };

        let left_proj = &left.select.projection;
        let right_proj = &right.select.projection;
        if left_proj.len() != right_proj.len() {
            return Err(TranslationError::IncompatibleSetOperands(format!(
                "left has {} columns, right has {}",
                left_proj.len(),
                right_proj.len()
            )));
        }
        for (l, r) in left_proj.iter().zip(right_proj) {
            let compatible = l.ty().kind == r.ty().kind
                || (l.ty().kind.is_numeric() && r.ty().kind.is_numeric());
            if !compatible {
                return Err(TranslationError::IncompatibleSetOperands(format!(
                    "column '{}' is {} on the left and {} on the right",
                    l.alias,
                    l.ty().kind,
                    r.ty().kind
                )));
            }
        }

        let (set_kind, distinct) = match kind {
            QuerySetOp::Union => (SetOpKind::Union, true),
            QuerySetOp::Concat => (SetOpKind::Union, false),
            QuerySetOp::Intersect => (SetOpKind::Intersect, true),
            QuerySetOp::Except => (SetOpKind::Except, true),
        };

        let alias = self.next_derived_alias();
        let columns: Vec<(String, TypeInfo)> = left_proj
            .iter()
            .zip(right_proj)
            .map(|(l, r)| {
                let nullable = l.ty().nullable || r.ty().nullable;
                (l.alias.clone(), l.ty().clone().with_nullable(nullable))
            })
            .collect();

        let scope = retarget_scope(&left.scope, &left.select.projection, &alias, &columns);
        let shaper = left.shaper;
        let entity = left.entity;

        let mut select = SelectShape::new(SourceExpr::SetOp {
            kind: set_kind,
            left: Box::new(left.select),
            right: Box::new(right.select),
            distinct,
            alias: alias.clone(),
        });
        for (name, ty) in &columns {
            select.projection.push(ProjectionColumn::new(
                ScalarExpr::column(alias.clone(), name.clone(), ty.clone()),
                name.clone(),
            ));
        }

        Ok(SelectState {
            select,
            scope,
            shaper,
            entity,
            group: None,
        })
    }

    /// Pushes the current select down as a derived table and re-exposes its
    /// projection one level up. Ordinals are preserved, so the shaper stays
    /// valid; the scope is retargeted at the derived alias.
    fn wrap(&mut self, state: SelectState) -> SelectState {
        let alias = self.next_derived_alias();
        let columns: Vec<(String, TypeInfo)> = state
            .select
            .projection
            .iter()
            .map(|c| (c.alias.clone(), c.ty().clone()))
            .collect();
        let scope = retarget_scope(&state.scope, &state.select.projection, &alias, &columns);
        let group = state.group.map(|g| GroupState {
            inner_scope: retarget_scope(
                &g.inner_scope,
                &state.select.projection,
                &alias,
                &columns,
            ),
        });

        let mut outer = SelectShape::new(SourceExpr::Derived {
            alias: alias.clone(),
            select: Box::new(state.select),
        });
        for (name, ty) in &columns {
            outer.projection.push(ProjectionColumn::new(
                ScalarExpr::column(alias.clone(), name.clone(), ty.clone()),
                name.clone(),
            ));
        }

        SelectState {
            select: outer,
            scope,
            shaper: state.shaper,
            entity: state.entity,
            group,
        }
    }

    fn translator<'s>(&self, state: &'s SelectState) -> ScalarTranslator<'s> {
        ScalarTranslator {
            scope: &state.scope,
            null_semantics: self.null_semantics,
            aggregate_scope: state.group.as_ref().map(|g| &g.inner_scope),
        }
    }
}

/// Returns whether a select cannot stand as a compound operand as-is.
fn set_operand_needs_wrap(select: &SelectShape) -> bool {
    !select.orderings.is_empty() || select.offset.is_some() || select.limit.is_some()
}

/// Retargets every scope entry whose expression the projection exposes onto
/// the wrapping alias.
fn retarget_scope(
    scope: &TranslationScope,
    projection: &[ProjectionColumn],
    alias: &str,
    columns: &[(String, TypeInfo)],
) -> TranslationScope {
    scope.map_exprs(|expr| {
        match projection.iter().position(|c| c.expr == *expr) {
            Some(ordinal) => {
                let (name, ty) = &columns[ordinal];
                ScalarExpr::column(alias, name.clone(), ty.clone())
            }
            None => expr.clone(),
        }
    })
}
