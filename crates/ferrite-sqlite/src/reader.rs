//! Row access over sqlx's SQLite rows.

use ferrite_core::value::Value;
use ferrite_orm::error::MaterializeError;
use ferrite_orm::materialize::RowReader;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, TypeInfo, ValueRef};

/// [`RowReader`] over one fetched SQLite row.
///
/// SQLite stores with type affinity, so the stored class of each value is
/// inspected per cell rather than per column.
pub struct SqliteRowReader {
    row: SqliteRow,
}

impl SqliteRowReader {
    /// Wraps a fetched row.
    #[must_use]
    pub fn new(row: SqliteRow) -> Self {
        Self { row }
    }
}

impl RowReader for SqliteRowReader {
    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn get(&self, ordinal: usize) -> Result<Value, MaterializeError> {
        let raw = self
            .row
            .try_get_raw(ordinal)
            .map_err(|_| MaterializeError::ColumnCountMismatch {
                ordinal,
                actual: self.row.len(),
            })?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let type_name = raw.type_info().name().to_uppercase();
        let decode_error = |e: sqlx::Error| MaterializeError::TypeConversion {
            ordinal,
            expected: type_name.clone(),
            value: e.to_string(),
        };
        match type_name.as_str() {
            "BOOLEAN" => self
                .row
                .try_get::<bool, _>(ordinal)
                .map(Value::Bool)
                .map_err(decode_error),
            "INTEGER" | "INT" => self
                .row
                .try_get::<i64, _>(ordinal)
                .map(Value::Int)
                .map_err(decode_error),
            "REAL" | "NUMERIC" => self
                .row
                .try_get::<f64, _>(ordinal)
                .map(Value::Float)
                .map_err(decode_error),
            "TEXT" | "DATE" | "TIME" | "DATETIME" => self
                .row
                .try_get::<String, _>(ordinal)
                .map(Value::Text)
                .map_err(decode_error),
            "BLOB" => self
                .row
                .try_get::<Vec<u8>, _>(ordinal)
                .map(Value::Blob)
                .map_err(decode_error),
            "NULL" => Ok(Value::Null),
            other => Err(MaterializeError::TypeConversion {
                ordinal,
                expected: String::from(other),
                value: String::from("<unsupported storage class>"),
            }),
        }
    }
}
