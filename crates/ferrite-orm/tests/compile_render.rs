//! Compilation and rendering behavior over a small customer/order model.

use ferrite_core::dialect::{Dialect, GenericDialect, ParamStyle};
use ferrite_core::render::render;
use ferrite_core::shape::SourceExpr;
use ferrite_core::types::{TypeInfo, TypeKind};
use ferrite_core::value::Value;

use ferrite_orm::model::{EntityType, MappingModel, Navigation, PropertyMapping};
use ferrite_orm::query::expr::{captured, count, member, val, QueryExpr};
use ferrite_orm::query::{compile, CompileOptions, NullSemantics};

struct AtDialect;

impl Dialect for AtDialect {
    fn name(&self) -> &'static str {
        "at"
    }
    fn param_style(&self) -> ParamStyle {
        ParamStyle::Named('@')
    }
}

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

fn options(null_semantics: NullSemantics) -> CompileOptions {
    CompileOptions { null_semantics }
}

#[test]
fn rendering_is_idempotent() {
    let query = QueryExpr::entity("Customer")
        .filter(member("Name").eq(captured("who", "Alice")))
        .order_by(member("Id"))
        .take(5);
    let compiled = compile(&query, &sample_model(), &CompileOptions::default()).unwrap();

    let first = render(&compiled.shape, &GenericDialect);
    let second = render(&compiled.shape, &GenericDialect);
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.parameters, second.parameters);

    let first = render(&compiled.shape, &AtDialect);
    let second = render(&compiled.shape, &AtDialect);
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.parameters, second.parameters);
}

#[test]
fn null_safe_equality_expands_and_raw_does_not() {
    let query =
        QueryExpr::entity("Customer").filter(member("City").eq(member("Region")));

    let raw = compile(&query, &sample_model(), &options(NullSemantics::Raw)).unwrap();
    let raw_sql = render(&raw.shape, &GenericDialect).sql;
    assert!(
        raw_sql.ends_with("WHERE \"t0\".\"city\" = \"t0\".\"region\""),
        "got: {raw_sql}"
    );

    let safe = compile(&query, &sample_model(), &options(NullSemantics::NullSafe)).unwrap();
    let safe_sql = render(&safe.shape, &GenericDialect).sql;
    assert!(
        safe_sql.ends_with(
            "WHERE \"t0\".\"city\" = \"t0\".\"region\" \
             OR \"t0\".\"city\" IS NULL AND \"t0\".\"region\" IS NULL"
        ),
        "got: {safe_sql}"
    );
}

#[test]
fn identity_projection_with_order_stays_a_single_select() {
    let query = QueryExpr::entity("Customer")
        .filter(member("City").is_not_null())
        .project(vec![("Id", member("Id")), ("Name", member("Name"))])
        .order_by(member("Name"));
    let compiled = compile(&query, &sample_model(), &CompileOptions::default()).unwrap();
    assert!(
        matches!(compiled.shape.source, SourceExpr::Table { .. }),
        "expected a flat select over the base table"
    );
    let sql = render(&compiled.shape, &GenericDialect).sql;
    assert_eq!(
        sql,
        "SELECT \"t0\".\"id\" AS \"Id\", \"t0\".\"name\" AS \"Name\" \
         FROM \"customers\" AS \"t0\" WHERE \"t0\".\"city\" IS NOT NULL \
         ORDER BY \"t0\".\"name\" ASC"
    );
}

#[test]
fn aggregate_filter_after_group_by_nests() {
    let query = QueryExpr::entity("Customer")
        .group_by(vec![("City", member("City"))])
        .filter(count().gt(val(1)))
        .project(vec![("City", member("City")), ("Count", count())]);
    let compiled = compile(&query, &sample_model(), &CompileOptions::default()).unwrap();
    assert!(
        matches!(compiled.shape.source, SourceExpr::Derived { .. }),
        "expected the grouped select to compose over a derived table"
    );
    let sql = render(&compiled.shape, &GenericDialect).sql;
    assert!(sql.contains("HAVING COUNT(*) > 1"), "got: {sql}");
}

#[test]
fn customers_with_large_orders_end_to_end_shape() {
    // Customers with at least one order over 100, projected to
    // (Name, OrderCount).
    let query = QueryExpr::entity("Customer")
        .join("Orders")
        .filter(member("Orders.Total").gt(captured("p0", 100)))
        .group_by(vec![("Id", member("Id")), ("Name", member("Name"))])
        .project(vec![("Name", member("Name")), ("OrderCount", count())]);
    let compiled = compile(&query, &sample_model(), &CompileOptions::default()).unwrap();

    // One select over a derived join+group.
    assert!(matches!(compiled.shape.source, SourceExpr::Derived { .. }));
    let rendered = render(&compiled.shape, &AtDialect);
    assert_eq!(
        rendered.sql,
        "SELECT \"d0\".\"name\" AS \"Name\", COUNT(*) AS \"OrderCount\" FROM \
         (SELECT \"t0\".\"id\", \"t0\".\"name\", \"t0\".\"city\", \"t0\".\"region\", \
         \"t1\".\"id\" AS \"orders_id\", \"t1\".\"customer_id\" AS \"orders_customer_id\", \
         \"t1\".\"total\" AS \"orders_total\" FROM \"customers\" AS \"t0\" \
         INNER JOIN \"orders\" AS \"t1\" ON \"t1\".\"customer_id\" = \"t0\".\"id\" \
         WHERE \"t1\".\"total\" > @p0) AS \"d0\" GROUP BY \"d0\".\"id\", \"d0\".\"name\""
    );
    assert_eq!(rendered.parameters.len(), 1);
    assert_eq!(rendered.parameters[0].name, "p0");
    assert_eq!(compiled.bindings.get("p0"), Some(&Value::Int(100)));
}

#[test]
fn parameters_follow_first_appearance_order() {
    let query = QueryExpr::entity("Customer")
        .filter(member("Name").eq(captured("name", "Alice")))
        .filter(member("Id").gt(captured("min", 1)));
    let compiled = compile(&query, &sample_model(), &CompileOptions::default()).unwrap();
    let rendered = render(&compiled.shape, &GenericDialect);
    let bound = rendered.bind(&compiled.bindings).unwrap();
    assert_eq!(bound[0].name, "name");
    assert_eq!(bound[1].name, "min");
}
