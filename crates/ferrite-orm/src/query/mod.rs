//! The query translation pipeline.
//!
//! Stages run in a fixed order, each consuming the previous stage's output:
//!
//! 1. [`expr`] — the query tree as callers write it
//! 2. [`normalize`] — member resolution and parameterization
//! 3. [`translate`] — scalar translation with explicit null semantics
//! 4. [`compile`] — shape composition under the wrap-when-necessary rule
//! 5. [`rewrite`] — dialect-capability rewrites, applied in rule order
//!
//! Rendering lives in `ferrite_core::render`; it is the only stage that
//! looks at placeholder syntax.

pub mod compile;
pub mod expr;
pub mod normalize;
pub mod rewrite;
pub mod translate;

pub use compile::{compile, CompileOptions, CompiledQuery};
pub use expr::{QueryExpr, QuerySetOp, ValueExpr};
pub use normalize::{normalize, NormalizedQuery};
pub use rewrite::apply_provider_rewrites;
pub use translate::NullSemantics;
