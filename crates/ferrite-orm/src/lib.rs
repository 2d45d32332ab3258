//! # ferrite-orm
//!
//! Query translation and change tracking over the `ferrite-core` relational
//! model.
//!
//! The crate has two halves:
//!
//! - **The pipeline** ([`query`]): a [`query::QueryExpr`] tree is normalized
//!   against the [`model::MappingModel`], compiled into a
//!   `ferrite_core::shape::SelectShape` plus a shaper, and rewritten for the
//!   target dialect. Rendering the shape is `ferrite_core`'s job.
//! - **Materialization and tracking** ([`materialize`], [`tracking`]): rows
//!   coming back are rebuilt into entity graphs through a
//!   [`tracking::TrackingScope`], whose identity map guarantees one instance
//!   per `(entity type, key)` within the scope.
//!
//! ```
//! use ferrite_core::dialect::GenericDialect;
//! use ferrite_core::render::render;
//! use ferrite_core::types::{TypeInfo, TypeKind};
//! use ferrite_orm::model::{EntityType, MappingModel, PropertyMapping};
//! use ferrite_orm::query::expr::{captured, member, QueryExpr};
//! use ferrite_orm::query::{compile, CompileOptions};
//!
//! let model = MappingModel::new().entity(
//!     EntityType::new("Customer", "customers")
//!         .property(PropertyMapping::new("Id", "id", TypeInfo::new(TypeKind::Int)))
//!         .property(PropertyMapping::new("Name", "name", TypeInfo::new(TypeKind::Text)))
//!         .key(&["Id"]),
//! );
//!
//! let query = QueryExpr::entity("Customer")
//!     .filter(member("Name").eq(captured("who", "Alice")));
//! let compiled = compile(&query, &model, &CompileOptions::default()).unwrap();
//! let rendered = render(&compiled.shape, &GenericDialect);
//! assert_eq!(
//!     rendered.sql,
//!     "SELECT \"t0\".\"id\", \"t0\".\"name\" FROM \"customers\" AS \"t0\" \
//!      WHERE \"t0\".\"name\" = ?"
//! );
//! ```

pub mod error;
pub mod materialize;
pub mod model;
pub mod query;
pub mod tracking;

pub use error::{MaterializeError, TranslationError};
pub use materialize::{Materialized, Materializer, RowReader, ValueRow};
pub use model::{
    DiscriminatorMapping, EntityType, MappingModel, Navigation, PropertyMapping,
};
pub use query::{
    apply_provider_rewrites, compile, CompileOptions, CompiledQuery, NullSemantics, QueryExpr,
    ValueExpr,
};
pub use tracking::{EntityData, EntityRef, EntityState, KeyValue, TrackedEntry, TrackingScope};
