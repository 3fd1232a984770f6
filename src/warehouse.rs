use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use rusqlite::{Connection, Transaction};

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .context("set busy timeout")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;

        CREATE TABLE IF NOT EXISTS raw_match_landing (
            landing_id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL,
            source TEXT NOT NULL,
            extracted_at TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            payload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_landing_event ON raw_match_landing(event_id);

        CREATE TABLE IF NOT EXISTS matches (
            event_id INTEGER PRIMARY KEY,
            competition_id INTEGER NOT NULL,
            competition_code TEXT NOT NULL,
            utc_kickoff TEXT NULL,
            status TEXT NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER NULL CHECK (home_goals IS NULL OR home_goals >= 0),
            away_goals INTEGER NULL CHECK (away_goals IS NULL OR away_goals >= 0),
            last_updated TEXT NOT NULL,
            source TEXT NOT NULL,
            extracted_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_competition ON matches(competition_code);
        CREATE INDEX IF NOT EXISTS idx_matches_kickoff ON matches(utc_kickoff);

        CREATE TABLE IF NOT EXISTS team_form (
            event_id INTEGER NOT NULL,
            competition_id INTEGER NOT NULL,
            competition_code TEXT NOT NULL,
            event_timestamp TEXT NOT NULL,
            team_id INTEGER NOT NULL,
            points INTEGER NOT NULL,
            venue TEXT NOT NULL,
            rank INTEGER NOT NULL,
            trailing_form INTEGER NOT NULL,
            prior_form INTEGER NOT NULL,
            PRIMARY KEY (event_id, team_id)
        );

        CREATE TABLE IF NOT EXISTS ingestion_watermarks (
            source TEXT NOT NULL,
            entity TEXT NOT NULL,
            key TEXT NOT NULL,
            last_success_at TEXT NOT NULL,
            high_watermark TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (source, entity, key)
        );

        CREATE TABLE IF NOT EXISTS load_audit (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            flow TEXT NOT NULL,
            task TEXT NOT NULL,
            target_table TEXT NOT NULL,
            rows_inserted INTEGER NOT NULL,
            rows_updated INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            status TEXT NOT NULL,
            message TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Swaps `<table>_next` into place. Must run inside the transaction that
/// populated the staging table so readers never observe a partial rebuild.
pub fn swap_table(tx: &Transaction<'_>, table: &str) -> Result<()> {
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table}; ALTER TABLE {table}_next RENAME TO {table};"
    ))
    .with_context(|| format!("swap table {table}"))?;
    Ok(())
}

/// Uniform storage format for timestamps. Fixed fractional width keeps
/// lexicographic ordering of the stored strings equal to chronological
/// ordering, which the merge and rebuild paths rely on.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("parse stored timestamp {raw:?}"))
}

static ENTITY_LOCKS: Lazy<Mutex<HashSet<(String, String)>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

/// Advisory single-writer lock per (source, entity). Concurrent runs for
/// the same pair fail fast instead of racing the watermark; distinct
/// entities proceed in parallel.
pub struct EntityLock {
    key: (String, String),
}

pub fn lock_entity(source: &str, entity: &str) -> Result<EntityLock> {
    let key = (source.to_string(), entity.to_string());
    let mut held = ENTITY_LOCKS.lock().expect("entity lock registry poisoned");
    if !held.insert(key.clone()) {
        return Err(anyhow!("load already in flight for {source}/{entity}"));
    }
    Ok(EntityLock { key })
}

impl Drop for EntityLock {
    fn drop(&mut self) {
        let mut held = ENTITY_LOCKS.lock().expect("entity lock registry poisoned");
        held.remove(&self.key);
    }
}
