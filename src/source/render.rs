//! Column value rendering for streamed rows
//!
//! Converts values of a sqlx `AnyRow` to the text written into a session's
//! result buffer. Dispatch uses the runtime type of each value rather than
//! the declared column type, since expression columns (SQLite in
//! particular) often declare no type at all.

use crate::error::DatabaseError;
use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Render column `ordinal` of `row`, or `None` if the value is NULL
///
/// # Errors
/// Returns `DatabaseError::QueryError` if the value cannot be decoded as
/// its reported type or as any of the fallback types.
pub fn render_value(row: &AnyRow, ordinal: usize) -> Result<Option<String>, DatabaseError> {
    let type_name = {
        let raw = row.try_get_raw(ordinal)?;
        if raw.is_null() {
            return Ok(None);
        }
        raw.type_info().name().to_string()
    };

    let rendered = match type_name.as_str() {
        "BOOLEAN" => Some(row.try_get::<bool, _>(ordinal).map(|v| v.to_string())),
        "SMALLINT" => Some(row.try_get::<i16, _>(ordinal).map(|v| v.to_string())),
        "INTEGER" => Some(row.try_get::<i32, _>(ordinal).map(|v| v.to_string())),
        "BIGINT" => Some(row.try_get::<i64, _>(ordinal).map(|v| v.to_string())),
        "REAL" => Some(row.try_get::<f32, _>(ordinal).map(|v| v.to_string())),
        "DOUBLE" => Some(row.try_get::<f64, _>(ordinal).map(|v| v.to_string())),
        "TEXT" => Some(row.try_get::<String, _>(ordinal)),
        "BLOB" => Some(row.try_get::<Vec<u8>, _>(ordinal).map(|v| hex(&v))),
        _ => None,
    };

    let reason = match rendered {
        Some(Ok(text)) => return Ok(Some(text)),
        Some(Err(e)) => e.to_string(),
        None => "unrecognised value type".to_string(),
    };

    fallback(row, ordinal).map(Some).ok_or_else(|| {
        let name = row
            .columns()
            .get(ordinal)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| ordinal.to_string());
        DatabaseError::QueryError(format!(
            "Failed to extract column '{}' as {}: {}. \
             Consider casting this column in your query: CAST({} AS TEXT)",
            name, type_name, reason, name
        ))
    })
}

/// Try the common representations in turn
fn fallback(row: &AnyRow, ordinal: usize) -> Option<String> {
    if let Ok(v) = row.try_get::<String, _>(ordinal) {
        return Some(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(ordinal) {
        return Some(v.to_string());
    }
    if let Ok(v) = row.try_get::<f64, _>(ordinal) {
        return Some(v.to_string());
    }
    if let Ok(v) = row.try_get::<bool, _>(ordinal) {
        return Some(v.to_string());
    }
    row.try_get::<Vec<u8>, _>(ordinal).ok().map(|v| hex(&v))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::any::AnyPoolOptions;

    async fn fetch_row(sql: &str) -> Result<AnyRow, sqlx::Error> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query(sql).fetch_one(&pool).await
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(hex(&[0xca, 0xfe, 0x01]), "0xcafe01");
        assert_eq!(hex(&[]), "0x");
    }

    #[tokio::test]
    async fn test_renders_scalar_values() {
        let row = fetch_row("SELECT 42 AS n, 'hi' AS s, 1.5 AS f").await;
        assert!(row.is_ok(), "query failed: {:?}", row.err());
        if let Ok(row) = row {
            assert_eq!(render_value(&row, 0).ok().flatten().as_deref(), Some("42"));
            assert_eq!(render_value(&row, 1).ok().flatten().as_deref(), Some("hi"));
            assert_eq!(render_value(&row, 2).ok().flatten().as_deref(), Some("1.5"));
        }
    }

    #[tokio::test]
    async fn test_null_renders_as_none() {
        let row = fetch_row("SELECT NULL AS missing").await;
        assert!(row.is_ok(), "query failed: {:?}", row.err());
        if let Ok(row) = row {
            let value = render_value(&row, 0);
            assert!(matches!(value, Ok(None)), "unexpected: {:?}", value);
        }
    }

    #[tokio::test]
    async fn test_blob_renders_as_hex() {
        let row = fetch_row("SELECT x'CAFE' AS payload").await;
        assert!(row.is_ok(), "query failed: {:?}", row.err());
        if let Ok(row) = row {
            assert_eq!(render_value(&row, 0).ok().flatten().as_deref(), Some("0xcafe"));
        }
    }

    #[tokio::test]
    async fn test_out_of_range_column_is_error() {
        let row = fetch_row("SELECT 1 AS one").await;
        assert!(row.is_ok(), "query failed: {:?}", row.err());
        if let Ok(row) = row {
            assert!(render_value(&row, 5).is_err());
        }
    }
}
