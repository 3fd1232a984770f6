use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use crate::audit::{self, AuditRecord, RunMessage, RunStatus};
use crate::clean::{self, CleanedMatch};
use crate::error::{MergeError, RowRejection};
use crate::feed::{MatchFeed, RawMatch};
use crate::warehouse::{self, fmt_ts};
use crate::watermark;

const TARGET_TABLE: &str = "matches";

#[derive(Debug, Clone)]
pub struct LoadRequest<'a> {
    pub flow: &'a str,
    pub entity: &'a str,
    pub key: &'a str,
    /// Used as the extraction lower bound when no watermark exists yet.
    pub floor: DateTime<Utc>,
    /// Backfills fetch from an explicit point instead of the stored
    /// watermark; the merge stays idempotent either way.
    pub since_override: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct LoadReport {
    pub source: String,
    pub entity: String,
    pub status: RunStatus,
    pub fetched: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub rows_skipped: usize,
    pub rows_rejected: usize,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub errors: Vec<String>,
}

/// One incremental load attempt for (source, entity):
/// read watermark, fetch newer records, append them to the landing buffer,
/// merge into `matches` with last-write-wins on the source's last-updated
/// field, advance the watermark over what was applied, and write exactly
/// one audit row whatever the outcome.
pub fn run_load(
    conn: &mut Connection,
    feed: &dyn MatchFeed,
    req: &LoadRequest<'_>,
) -> Result<LoadReport> {
    let source = feed.source().to_string();
    let _lock = warehouse::lock_entity(&source, req.entity)?;
    let started_at = Utc::now();

    let before = watermark::get(conn, &source, req.entity, req.key)?;
    let since = req.since_override.unwrap_or_else(|| before.unwrap_or(req.floor));

    let records = match feed.fetch(req.entity, since) {
        Ok(records) => records,
        Err(err) => {
            // Transport boundary: abort without touching the watermark;
            // the orchestration layer owns retries.
            let finished_at = Utc::now();
            let errors = vec![err.to_string()];
            let report = LoadReport {
                source: source.clone(),
                entity: req.entity.to_string(),
                status: RunStatus::Failed,
                fetched: 0,
                rows_inserted: 0,
                rows_updated: 0,
                rows_skipped: 0,
                rows_rejected: 0,
                watermark_before: before,
                watermark_after: before,
                started_at,
                finished_at,
                errors,
            };
            audit::record(conn, &audit_record(req, &report))?;
            warn!(source, entity = req.entity, error = %err, "extraction failed");
            return Ok(report);
        }
    };

    let extracted_at = Utc::now();
    land_batch(conn, &source, extracted_at, &records)?;

    // Collapse in-batch duplicates (newest last-updated wins) and clean.
    let mut rejections: Vec<String> = Vec::new();
    let mut by_id: BTreeMap<i64, CleanedMatch> = BTreeMap::new();
    for raw in &records {
        let cleaned = match clean::clean_record(raw, &source, extracted_at) {
            Ok(cleaned) => cleaned,
            Err(rejection) => {
                warn!(%rejection, "rejected during load");
                rejections.push(rejection.to_string());
                continue;
            }
        };
        match by_id.get(&cleaned.event_id) {
            None => {
                by_id.insert(cleaned.event_id, cleaned);
            }
            Some(current) if cleaned.last_updated > current.last_updated => {
                if cleaned.competition_code != current.competition_code {
                    let rejection = RowRejection::Consistency {
                        event_id: cleaned.event_id,
                        reason: format!(
                            "competition changed from {} to {} within one batch",
                            current.competition_code, cleaned.competition_code
                        ),
                    };
                    warn!(%rejection, "rejected during load");
                    rejections.push(rejection.to_string());
                } else {
                    by_id.insert(cleaned.event_id, cleaned);
                }
            }
            Some(_) => {}
        }
    }

    // Ascending last-updated order makes the applied set a prefix, so a
    // mid-merge failure never leaves a gap below the advanced watermark.
    let mut batch: Vec<CleanedMatch> = by_id.into_values().collect();
    batch.sort_by(|a, b| {
        a.last_updated
            .cmp(&b.last_updated)
            .then(a.event_id.cmp(&b.event_id))
    });

    let outcome = apply_sorted(conn, &batch, &mut rejections);

    let finished_at = Utc::now();
    if let Some(new_mark) = outcome.applied_max {
        watermark::advance(conn, &source, req.entity, req.key, new_mark, finished_at)?;
    }
    let after = watermark::get(conn, &source, req.entity, req.key)?;

    let rejected = rejections.len();
    let mut errors = rejections;
    let status = match &outcome.merge_error {
        Some(err) => {
            errors.push(err.to_string());
            RunStatus::Partial
        }
        None => RunStatus::Success,
    };

    let report = LoadReport {
        source: source.clone(),
        entity: req.entity.to_string(),
        status,
        fetched: records.len(),
        rows_inserted: outcome.inserted,
        rows_updated: outcome.updated,
        rows_skipped: outcome.skipped,
        rows_rejected: rejected,
        watermark_before: before,
        watermark_after: after,
        started_at,
        finished_at,
        errors,
    };
    audit::record(conn, &audit_record(req, &report))?;
    info!(
        source,
        entity = req.entity,
        status = report.status.as_str(),
        fetched = report.fetched,
        inserted = report.rows_inserted,
        updated = report.rows_updated,
        skipped = report.rows_skipped,
        rejected = report.rows_rejected,
        "load finished"
    );
    Ok(report)
}

/// Runs one load per request in parallel. Each entity gets its own
/// connection; the per-(source, entity) lock inside `run_load` keeps
/// same-entity runs serialized.
pub fn run_entities(
    db_path: &Path,
    feed: &(dyn MatchFeed + Sync),
    reqs: &[LoadRequest<'_>],
) -> Result<Vec<LoadReport>> {
    reqs.par_iter()
        .map(|req| {
            let mut conn = warehouse::open_db(db_path)?;
            run_load(&mut conn, feed, req)
        })
        .collect()
}

fn audit_record(req: &LoadRequest<'_>, report: &LoadReport) -> AuditRecord {
    let message = RunMessage {
        source: report.source.clone(),
        entity: report.entity.clone(),
        key: req.key.to_string(),
        high_watermark: report.watermark_after.map(fmt_ts),
        rejected: report.rows_rejected,
        errors: report.errors.clone(),
    };
    AuditRecord {
        flow: req.flow.to_string(),
        task: "load_matches".to_string(),
        target_table: TARGET_TABLE.to_string(),
        rows_inserted: report.rows_inserted as i64,
        rows_updated: report.rows_updated as i64,
        started_at: report.started_at,
        finished_at: report.finished_at,
        status: report.status,
        message: message.to_json(),
    }
}

/// Appends the whole extraction to the landing buffer, as received. The
/// buffer is append-only; re-runs grow it and the merge dedups downstream.
fn land_batch(
    conn: &mut Connection,
    source: &str,
    extracted_at: DateTime<Utc>,
    records: &[RawMatch],
) -> Result<()> {
    let tx = conn.transaction().context("begin landing append")?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO raw_match_landing (event_id, source, extracted_at, last_updated, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .context("prepare landing insert")?;
        for raw in records {
            let payload = serde_json::to_string(raw).context("serialize raw record")?;
            stmt.execute(params![
                raw.event_id,
                source,
                fmt_ts(extracted_at),
                fmt_ts(raw.last_updated),
                payload,
            ])
            .context("append landing record")?;
        }
    }
    tx.commit().context("commit landing append")?;
    Ok(())
}

#[derive(Debug, Default)]
struct ApplyOutcome {
    inserted: usize,
    updated: usize,
    skipped: usize,
    /// Max last-updated among records whose content is durably reflected
    /// in `matches` after this run; what the watermark may advance to.
    applied_max: Option<DateTime<Utc>>,
    merge_error: Option<MergeError>,
}

enum Applied {
    Inserted,
    Updated,
    Skipped,
    Rejected(RowRejection),
}

fn apply_sorted(
    conn: &Connection,
    batch: &[CleanedMatch],
    rejections: &mut Vec<String>,
) -> ApplyOutcome {
    let mut out = ApplyOutcome::default();
    let mut applied = 0usize;
    for rec in batch {
        match apply_one(conn, rec) {
            Ok(Applied::Inserted) => {
                out.inserted += 1;
                applied += 1;
                out.applied_max = Some(max_ts(out.applied_max, rec.last_updated));
            }
            Ok(Applied::Updated) => {
                out.updated += 1;
                applied += 1;
                out.applied_max = Some(max_ts(out.applied_max, rec.last_updated));
            }
            Ok(Applied::Skipped) => {
                // A version at least this fresh is already durable, so the
                // watermark may still cover this record.
                out.skipped += 1;
                applied += 1;
                out.applied_max = Some(max_ts(out.applied_max, rec.last_updated));
            }
            Ok(Applied::Rejected(rejection)) => {
                warn!(%rejection, "rejected during merge");
                rejections.push(rejection.to_string());
            }
            Err(err) => {
                out.merge_error = Some(MergeError {
                    applied,
                    total: batch.len(),
                    message: err.to_string(),
                });
                break;
            }
        }
    }
    out
}

fn apply_one(conn: &Connection, rec: &CleanedMatch) -> rusqlite::Result<Applied> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT last_updated, competition_code FROM matches WHERE event_id = ?1",
            params![rec.event_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((current_updated, current_code)) = existing else {
        clean::insert_cleaned(conn, "matches", rec)?;
        return Ok(Applied::Inserted);
    };

    // Last-write-wins on the source's last-updated field, never on
    // extraction time: a stale re-extraction must not clobber a fresher
    // prior write.
    if fmt_ts(rec.last_updated) <= current_updated {
        return Ok(Applied::Skipped);
    }
    if rec.competition_code != current_code {
        return Ok(Applied::Rejected(RowRejection::Consistency {
            event_id: rec.event_id,
            reason: format!(
                "competition changed from {current_code} to {}",
                rec.competition_code
            ),
        }));
    }

    conn.execute(
        "UPDATE matches SET
            competition_id = ?2, competition_code = ?3, utc_kickoff = ?4, status = ?5,
            home_team_id = ?6, away_team_id = ?7, home_team = ?8, away_team = ?9,
            home_goals = ?10, away_goals = ?11, last_updated = ?12, source = ?13,
            extracted_at = ?14
         WHERE event_id = ?1",
        params![
            rec.event_id,
            rec.competition_id,
            rec.competition_code,
            rec.utc_kickoff.map(fmt_ts),
            rec.status.as_str(),
            rec.home_team_id,
            rec.away_team_id,
            rec.home_team,
            rec.away_team,
            rec.home_goals,
            rec.away_goals,
            fmt_ts(rec.last_updated),
            rec.source,
            fmt_ts(rec.extracted_at),
        ],
    )?;
    Ok(Applied::Updated)
}

fn max_ts(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    match current {
        Some(current) if current > candidate => current,
        _ => candidate,
    }
}
