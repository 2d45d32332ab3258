//! # ferrite-core
//!
//! Provider-neutral relational expression model and SQL renderer.
//!
//! This crate provides the data model the query translation pipeline
//! compiles into and the renderer that turns it into command text:
//! - [`scalar::ScalarExpr`] — SQL scalar expressions, each node carrying a
//!   [`types::TypeInfo`] descriptor
//! - [`shape::SelectShape`] / [`shape::SourceExpr`] — table-like sources and
//!   composed SELECT statements
//! - [`shaper::Shaper`] — the description of how a row maps back to an
//!   entity or value
//! - [`dialect::Dialect`] — backend capability descriptors
//! - [`render`] — deterministic text production with late-bound parameters
//!
//! All trees are immutable once constructed: rewrite passes build new trees
//! and share unchanged subtrees, so compiled shapes can be cached and reused
//! across executions with different parameter values.
//!
//! ```rust
//! use ferrite_core::dialect::GenericDialect;
//! use ferrite_core::render::render;
//! use ferrite_core::scalar::ScalarExpr;
//! use ferrite_core::shape::{ProjectionColumn, SelectShape, SourceExpr};
//! use ferrite_core::types::{TypeInfo, TypeKind};
//!
//! let mut select = SelectShape::new(SourceExpr::table(None, "users", "u"));
//! select.projection.push(ProjectionColumn::new(
//!     ScalarExpr::column("u", "id", TypeInfo::new(TypeKind::Int)),
//!     "id",
//! ));
//! let rendered = render(&select, &GenericDialect);
//! assert_eq!(rendered.sql, "SELECT \"u\".\"id\" FROM \"users\" AS \"u\"");
//! ```

pub mod dialect;
pub mod render;
pub mod scalar;
pub mod shape;
pub mod shaper;
pub mod types;
pub mod value;

pub use dialect::{Dialect, GenericDialect, ParamStyle};
pub use render::{render, BoundParameter, ParameterBindings, RenderedQuery};
pub use scalar::{BinaryOp, ScalarExpr, UnaryOp};
pub use shape::{JoinKind, OrderDirection, Ordering, ProjectionColumn, SelectShape, SetOpKind, SourceExpr};
pub use shaper::{CollectionShaper, EntityShaper, Shaper};
pub use types::{TypeInfo, TypeKind};
pub use value::{ToValue, Value};
