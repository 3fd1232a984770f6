use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::warehouse::{fmt_ts, parse_ts};

pub fn get(
    conn: &Connection,
    source: &str,
    entity: &str,
    key: &str,
) -> Result<Option<DateTime<Utc>>> {
    let raw = conn
        .query_row(
            "SELECT high_watermark FROM ingestion_watermarks
             WHERE source = ?1 AND entity = ?2 AND key = ?3",
            params![source, entity, key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .context("query high watermark")?;
    match raw {
        Some(raw) => Ok(Some(parse_ts(&raw)?)),
        None => Ok(None),
    }
}

pub fn last_success_at(
    conn: &Connection,
    source: &str,
    entity: &str,
    key: &str,
) -> Result<Option<DateTime<Utc>>> {
    let raw = conn
        .query_row(
            "SELECT last_success_at FROM ingestion_watermarks
             WHERE source = ?1 AND entity = ?2 AND key = ?3",
            params![source, entity, key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .context("query last success")?;
    match raw {
        Some(raw) => Ok(Some(parse_ts(&raw)?)),
        None => Ok(None),
    }
}

/// Advances the high watermark for (source, entity, key). Monotonic: when
/// `new_watermark` is not strictly greater than the stored value only the
/// success timestamp is refreshed and `false` is returned. Creates the row
/// on first successful load.
pub fn advance(
    conn: &Connection,
    source: &str,
    entity: &str,
    key: &str,
    new_watermark: DateTime<Utc>,
    success_time: DateTime<Utc>,
) -> Result<bool> {
    let current = get(conn, source, entity, key)?;
    if let Some(current) = current
        && new_watermark <= current
    {
        conn.execute(
            "UPDATE ingestion_watermarks
             SET last_success_at = ?4, updated_at = ?4
             WHERE source = ?1 AND entity = ?2 AND key = ?3",
            params![source, entity, key, fmt_ts(success_time)],
        )
        .context("refresh last success")?;
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO ingestion_watermarks (source, entity, key, last_success_at, high_watermark, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?4)
         ON CONFLICT(source, entity, key) DO UPDATE SET
             last_success_at = excluded.last_success_at,
             high_watermark = excluded.high_watermark,
             updated_at = excluded.updated_at",
        params![source, entity, key, fmt_ts(success_time), fmt_ts(new_watermark)],
    )
    .context("advance watermark")?;
    Ok(true)
}
