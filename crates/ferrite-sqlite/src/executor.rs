//! Query execution against a SQLite pool.

use ferrite_core::render::{render, RenderError, RenderedQuery};
use ferrite_core::value::Value;
use ferrite_orm::error::{MaterializeError, TranslationError};
use ferrite_orm::materialize::{Materialized, Materializer};
use ferrite_orm::model::MappingModel;
use ferrite_orm::query::{apply_provider_rewrites, compile, CompileOptions, CompiledQuery, QueryExpr};
use ferrite_orm::tracking::TrackingScope;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::dialect::SqliteDialect;
use crate::reader::SqliteRowReader;

/// Errors surfaced by query execution.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The query could not be translated.
    #[error(transparent)]
    Translation(#[from] TranslationError),

    /// A row could not be materialized.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    /// A parameter slot had no bound value.
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Result type alias for executor operations.
pub type Result<T> = std::result::Result<T, SqliteError>;

/// Compiles, rewrites and renders a query for SQLite without executing it.
pub fn prepare(
    query: &QueryExpr,
    model: &MappingModel,
    options: &CompileOptions,
) -> Result<(RenderedQuery, CompiledQuery)> {
    let compiled = compile(query, model, options)?;
    let rewritten = apply_provider_rewrites(&compiled, &SqliteDialect)?;
    let rendered = render(&rewritten.shape, &SqliteDialect);
    Ok((rendered, rewritten))
}

/// Executes compiled queries against one SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    /// Creates an executor over the pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Compiles and runs a query, materializing results through the scope.
    pub async fn fetch_all(
        &self,
        query: &QueryExpr,
        model: &MappingModel,
        options: &CompileOptions,
        scope: &mut TrackingScope,
    ) -> Result<Vec<Materialized>> {
        let (rendered, rewritten) = prepare(query, model, options)?;
        let bound = rendered.bind(&rewritten.bindings)?;
        tracing::debug!(sql = %rendered.sql, parameters = bound.len(), "executing query");

        let mut statement = sqlx::query(&rendered.sql);
        for parameter in bound {
            statement = bind_value(statement, parameter.value);
        }
        let rows = statement.fetch_all(&self.pool).await?;
        let readers: Vec<SqliteRowReader> = rows.into_iter().map(SqliteRowReader::new).collect();

        let results = Materializer::new(model).materialize_all(&readers, &rewritten.shaper, scope)?;
        Ok(results)
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<i64>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Blob(b) => query.bind(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_core::types::{TypeInfo, TypeKind};
    use ferrite_orm::model::{EntityType, Navigation, PropertyMapping};
    use ferrite_orm::query::expr::{captured, member};
    use ferrite_orm::query::NullSemantics;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::rc::Rc;

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
                    .property(PropertyMapping::new(
                        "City",
                        "city",
                        TypeInfo::nullable(TypeKind::Text),
                    ))
                    .property(PropertyMapping::new(
                        "Region",
                        "region",
                        TypeInfo::nullable(TypeKind::Text),
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

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, city TEXT, region TEXT);
             CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER NOT NULL, total REAL NOT NULL);
             INSERT INTO customers (id, name, city) VALUES (1, 'Alice', 'Paris'), (2, 'Bob', NULL);
             INSERT INTO orders (id, customer_id, total) VALUES (10, 1, 99.5), (11, 1, 5.0);",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    /// One customer per cell of the null-comparison truth table.
    async fn regions_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, city TEXT, region TEXT);
             INSERT INTO customers (id, name, city, region) VALUES
             (1, 'both-one', '1', '1'),
             (2, 'left-only', '1', NULL),
             (3, 'both-null', NULL, NULL),
             (4, 'right-two', NULL, '2');",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[test]
    fn test_prepare_renders_named_placeholders() {
        let query = QueryExpr::entity("Customer").filter(member("Name").eq(captured("p0", "Alice")));
        let (rendered, _) = prepare(&query, &sample_model(), &CompileOptions::default()).unwrap();
        assert!(rendered.sql.ends_with("WHERE \"t0\".\"name\" = @p0"), "got: {}", rendered.sql);
        assert_eq!(rendered.parameters.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_entities_with_parameter() {
        let pool = seeded_pool().await;
        let executor = SqliteExecutor::new(pool);
        let model = sample_model();
        let mut scope = TrackingScope::new();

        let query = QueryExpr::entity("Customer").filter(member("Name").eq(captured("who", "Alice")));
        let results = executor
            .fetch_all(&query, &model, &CompileOptions::default(), &mut scope)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let alice = results[0].as_entity().unwrap().borrow();
        assert_eq!(alice.get("Name"), Some(&Value::Text(String::from("Alice"))));
        assert_eq!(scope.len(), 1);
    }

    #[tokio::test]
    async fn test_include_materializes_collections() {
        let pool = seeded_pool().await;
        let executor = SqliteExecutor::new(pool);
        let model = sample_model();
        let mut scope = TrackingScope::new();

        let query = QueryExpr::entity("Customer")
            .include("Orders")
            .order_by(member("Id"));
        let results = executor
            .fetch_all(&query, &model, &CompileOptions::default(), &mut scope)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let alice = results[0].as_entity().unwrap().borrow();
        assert_eq!(alice.collections["Orders"].len(), 2);
        // Bob has no orders; the collection is present but empty.
        let bob = results[1].as_entity().unwrap().borrow();
        assert!(bob.collections["Orders"].is_empty());
    }

    #[tokio::test]
    async fn test_same_identity_across_two_queries() {
        let pool = seeded_pool().await;
        let executor = SqliteExecutor::new(pool);
        let model = sample_model();
        let mut scope = TrackingScope::new();

        let query = QueryExpr::entity("Customer").filter(member("Id").eq(captured("id", 1)));
        let first = executor
            .fetch_all(&query, &model, &CompileOptions::default(), &mut scope)
            .await
            .unwrap();
        let second = executor
            .fetch_all(&query, &model, &CompileOptions::default(), &mut scope)
            .await
            .unwrap();

        let a = first[0].as_entity().unwrap();
        let b = second[0].as_entity().unwrap();
        assert!(Rc::ptr_eq(a, b));
    }

    #[tokio::test]
    async fn test_null_safe_equality_truth_table() {
        let pool = regions_pool().await;
        let executor = SqliteExecutor::new(pool);
        let model = sample_model();
        let query = QueryExpr::entity("Customer")
            .filter(member("City").eq(member("Region")))
            .order_by(member("Id"));

        fn ids(results: &[Materialized]) -> Vec<Value> {
            results
                .iter()
                .map(|r| r.as_entity().unwrap().borrow().get("Id").cloned().unwrap())
                .collect()
        }

        // Null-safe: NULL = NULL matches, a single NULL side does not.
        let options = CompileOptions {
            null_semantics: NullSemantics::NullSafe,
        };
        let mut scope = TrackingScope::new();
        let results = executor
            .fetch_all(&query, &model, &options, &mut scope)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec![Value::Int(1), Value::Int(3)]);

        // Raw: NULL comparisons are never true.
        let mut scope = TrackingScope::new();
        let results = executor
            .fetch_all(&query, &model, &CompileOptions::default(), &mut scope)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec![Value::Int(1)]);
    }

    #[tokio::test]
    async fn test_union_with_limited_operand_executes() {
        let pool = seeded_pool().await;
        let executor = SqliteExecutor::new(pool);
        let model = sample_model();
        let mut scope = TrackingScope::new();

        // The limited side must be pushed into a derived table; a bare
        // compound operand cannot carry ORDER BY or LIMIT.
        let query = QueryExpr::entity("Customer")
            .order_by(member("Id"))
            .take(1)
            .union(QueryExpr::entity("Customer"));
        let results = executor
            .fetch_all(&query, &model, &CompileOptions::default(), &mut scope)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let mut names: Vec<String> = results
            .iter()
            .map(|r| match r.as_entity().unwrap().borrow().get("Name") {
                Some(Value::Text(name)) => name.clone(),
                other => panic!("expected a name, got {other:?}"),
            })
            .collect();
        names.sort();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn test_offset_only_query_gets_a_limit() {
        let pool = seeded_pool().await;
        let executor = SqliteExecutor::new(pool);
        let model = sample_model();
        let mut scope = TrackingScope::new();

        let query = QueryExpr::entity("Customer").order_by(member("Id")).skip(1);
        let results = executor
            .fetch_all(&query, &model, &CompileOptions::default(), &mut scope)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let bob = results[0].as_entity().unwrap().borrow();
        assert_eq!(bob.get("Name"), Some(&Value::Text(String::from("Bob"))));
    }
}
