//! # ferrite-sqlite
//!
//! SQLite provider for the `ferrite` query pipeline: the dialect
//! descriptor, row access over `sqlx`, and an async executor.
//!
//! # How SQLite differs from other dialects
//!
//! - **No boolean type**: booleans are stored as 0/1 integers, so the
//!   rewrite pass turns bare boolean predicates into `col = 1` comparisons.
//! - **Named placeholders**: parameters render as `@name`; each distinct
//!   parameter appears once and binds by its first-appearance index.
//! - **OFFSET needs LIMIT**: `OFFSET` is only parsed as part of a `LIMIT`
//!   clause, so offset-only queries are rewritten with `LIMIT -1`.
//! - **[Type affinity]**: columns store any storage class regardless of
//!   declared type, so row values are inspected per cell when read back.
//!
//! [Type affinity]: https://www.sqlite.org/datatype3.html

mod dialect;
pub mod executor;
pub mod reader;

pub use dialect::SqliteDialect;
pub use executor::{prepare, SqliteError, SqliteExecutor};
pub use reader::SqliteRowReader;
