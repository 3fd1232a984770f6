use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::warehouse::{fmt_ts, parse_ts};
use crate::watermark;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Structured content of the audit `message` column. Carries the context
/// needed for manual replay: which (source, entity, key) the run covered,
/// where the watermark ended up, and every row-level error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMessage {
    pub source: String,
    pub entity: String,
    pub key: String,
    pub high_watermark: Option<String>,
    pub rejected: usize,
    pub errors: Vec<String>,
}

impl RunMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub flow: String,
    pub task: String,
    pub target_table: String,
    pub rows_inserted: i64,
    pub rows_updated: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub message: String,
}

/// Appends one immutable audit row; returns the run id.
pub fn record(conn: &Connection, rec: &AuditRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO load_audit (
            flow, task, target_table, rows_inserted, rows_updated,
            started_at, finished_at, status, message
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            rec.flow,
            rec.task,
            rec.target_table,
            rec.rows_inserted,
            rec.rows_updated,
            fmt_ts(rec.started_at),
            fmt_ts(rec.finished_at),
            rec.status.as_str(),
            rec.message,
        ],
    )
    .context("insert audit record")?;
    Ok(conn.last_insert_rowid())
}

#[derive(Debug, Clone)]
pub struct AuditRow {
    pub run_id: i64,
    pub flow: String,
    pub task: String,
    pub target_table: String,
    pub rows_inserted: i64,
    pub rows_updated: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub message: String,
}

pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<AuditRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT run_id, flow, task, target_table, rows_inserted, rows_updated,
                    started_at, finished_at, status, message
             FROM load_audit ORDER BY run_id DESC LIMIT ?1",
        )
        .context("prepare audit query")?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })
        .context("query audit rows")?;

    let mut out = Vec::new();
    for row in rows {
        let (run_id, flow, task, target_table, ins, upd, started, finished, status, message) =
            row.context("decode audit row")?;
        out.push(AuditRow {
            run_id,
            flow,
            task,
            target_table,
            rows_inserted: ins,
            rows_updated: upd,
            started_at: parse_ts(&started)?,
            finished_at: parse_ts(&finished)?,
            status: RunStatus::parse(&status)
                .with_context(|| format!("unknown audit status {status:?}"))?,
            message,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct Drift {
    pub source: String,
    pub entity: String,
    pub key: String,
    pub detail: String,
}

/// Startup reconciliation between the audit log and the watermark store.
/// The watermark is advanced only after records are durably applied, so a
/// non-failed audit row claiming a high watermark the store has not reached
/// means an advance was lost; a watermark with no audited load behind it
/// means writes bypassed the engine.
pub fn reconcile(conn: &Connection) -> Result<Vec<Drift>> {
    let mut latest: std::collections::BTreeMap<(String, String, String), String> =
        std::collections::BTreeMap::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT message FROM load_audit
                 WHERE status IN ('success', 'partial') ORDER BY run_id ASC",
            )
            .context("prepare reconcile scan")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("scan audit messages")?;
        for row in rows {
            let raw = row.context("decode audit message")?;
            let Ok(msg) = serde_json::from_str::<RunMessage>(&raw) else {
                continue;
            };
            let Some(mark) = msg.high_watermark else {
                continue;
            };
            latest.insert((msg.source, msg.entity, msg.key), mark);
        }
    }

    let mut drifts = Vec::new();
    for ((source, entity, key), mark) in &latest {
        let audited = parse_ts(mark)?;
        match watermark::get(conn, source, entity, key)? {
            None => drifts.push(Drift {
                source: source.clone(),
                entity: entity.clone(),
                key: key.clone(),
                detail: format!("audit shows records applied through {mark} but no watermark row"),
            }),
            Some(stored) if stored < audited => drifts.push(Drift {
                source: source.clone(),
                entity: entity.clone(),
                key: key.clone(),
                detail: format!(
                    "watermark {} behind last audited apply {mark}",
                    fmt_ts(stored)
                ),
            }),
            Some(_) => {}
        }
    }

    let mut stmt = conn
        .prepare("SELECT source, entity, key FROM ingestion_watermarks")
        .context("prepare watermark scan")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .context("scan watermarks")?;
    for row in rows {
        let (source, entity, key) = row.context("decode watermark row")?;
        if !latest.contains_key(&(source.clone(), entity.clone(), key.clone())) {
            drifts.push(Drift {
                detail: "watermark exists without any audited load".to_string(),
                source,
                entity,
                key,
            });
        }
    }

    Ok(drifts)
}
