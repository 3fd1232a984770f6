use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::warn;

use crate::error::RowRejection;
use crate::feed::RawMatch;
use crate::warehouse::{fmt_ts, swap_table};

/// Provider match status, normalized. Only terminal statuses feed the
/// form computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Scheduled,
    Timed,
    InPlay,
    Paused,
    Finished,
    Suspended,
    Postponed,
    Cancelled,
    Awarded,
    Unknown,
}

impl MatchStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SCHEDULED" => MatchStatus::Scheduled,
            "TIMED" => MatchStatus::Timed,
            "IN_PLAY" | "LIVE" => MatchStatus::InPlay,
            "PAUSED" => MatchStatus::Paused,
            "FINISHED" => MatchStatus::Finished,
            "SUSPENDED" => MatchStatus::Suspended,
            "POSTPONED" => MatchStatus::Postponed,
            "CANCELLED" => MatchStatus::Cancelled,
            "AWARDED" => MatchStatus::Awarded,
            _ => MatchStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "SCHEDULED",
            MatchStatus::Timed => "TIMED",
            MatchStatus::InPlay => "IN_PLAY",
            MatchStatus::Paused => "PAUSED",
            MatchStatus::Finished => "FINISHED",
            MatchStatus::Suspended => "SUSPENDED",
            MatchStatus::Postponed => "POSTPONED",
            MatchStatus::Cancelled => "CANCELLED",
            MatchStatus::Awarded => "AWARDED",
            MatchStatus::Unknown => "UNKNOWN",
        }
    }

    /// Outcome is final, no further updates expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Finished | MatchStatus::Awarded)
    }
}

/// Typed, validated projection of a landed record. One row per event id in
/// the `matches` table.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedMatch {
    pub event_id: i64,
    pub competition_id: i64,
    pub competition_code: String,
    pub utc_kickoff: Option<DateTime<Utc>>,
    pub status: MatchStatus,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<i64>,
    pub away_goals: Option<i64>,
    pub last_updated: DateTime<Utc>,
    pub source: String,
    pub extracted_at: DateTime<Utc>,
}

/// Projects one raw record into its cleaned form. Identity failures reject
/// the row; optional fields that fail to cast are nulled with a warning.
pub fn clean_record(
    raw: &RawMatch,
    source: &str,
    extracted_at: DateTime<Utc>,
) -> Result<CleanedMatch, RowRejection> {
    if raw.event_id <= 0 {
        return Err(RowRejection::Cast {
            event_id: raw.event_id,
            field: "event_id",
            message: "identity must be a positive integer".to_string(),
        });
    }
    let competition_code = raw.competition_code.trim().to_ascii_uppercase();
    if competition_code.is_empty() {
        return Err(RowRejection::Consistency {
            event_id: raw.event_id,
            reason: "missing competition code".to_string(),
        });
    }
    if raw.home_team_id <= 0 || raw.away_team_id <= 0 {
        return Err(RowRejection::Consistency {
            event_id: raw.event_id,
            reason: format!(
                "unknown team id (home={}, away={})",
                raw.home_team_id, raw.away_team_id
            ),
        });
    }
    if raw.home_team_id == raw.away_team_id {
        return Err(RowRejection::Consistency {
            event_id: raw.event_id,
            reason: format!("team {} on both sides", raw.home_team_id),
        });
    }
    for (goals, side) in [(raw.home_goals, "home"), (raw.away_goals, "away")] {
        if let Some(goals) = goals
            && goals < 0
        {
            return Err(RowRejection::Consistency {
                event_id: raw.event_id,
                reason: format!("negative {side} score {goals}"),
            });
        }
    }

    let utc_kickoff = match raw.utc_kickoff.as_deref() {
        None => None,
        Some(raw_ts) => match DateTime::parse_from_rfc3339(raw_ts) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(err) => {
                warn!(event_id = raw.event_id, raw = raw_ts, %err, "unparseable kickoff, nulled");
                None
            }
        },
    };

    let status = MatchStatus::parse(&raw.status);
    if status == MatchStatus::Unknown {
        warn!(event_id = raw.event_id, raw = %raw.status, "unrecognized match status");
    }

    Ok(CleanedMatch {
        event_id: raw.event_id,
        competition_id: raw.competition_id,
        competition_code,
        utc_kickoff,
        status,
        home_team_id: raw.home_team_id,
        away_team_id: raw.away_team_id,
        home_team: raw.home_team.trim().to_string(),
        away_team: raw.away_team.trim().to_string(),
        home_goals: raw.home_goals,
        away_goals: raw.away_goals,
        last_updated: raw.last_updated,
        source: source.to_string(),
        extracted_at,
    })
}

pub(crate) fn insert_cleaned(
    conn: &Connection,
    table: &str,
    m: &CleanedMatch,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {table} (
                event_id, competition_id, competition_code, utc_kickoff, status,
                home_team_id, away_team_id, home_team, away_team,
                home_goals, away_goals, last_updated, source, extracted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            m.event_id,
            m.competition_id,
            m.competition_code,
            m.utc_kickoff.map(fmt_ts),
            m.status.as_str(),
            m.home_team_id,
            m.away_team_id,
            m.home_team,
            m.away_team,
            m.home_goals,
            m.away_goals,
            fmt_ts(m.last_updated),
            m.source,
            fmt_ts(m.extracted_at),
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub landed: usize,
    pub rows: usize,
    pub rejected: usize,
}

/// Full rebuild of `matches` from the landing buffer. Pure function of the
/// landing content: records replay in ascending (last_updated, extracted_at,
/// landing_id) order through the same last-write-wins rule the incremental
/// merge applies, so both paths converge on identical tables. The result
/// replaces the old table atomically.
pub fn rebuild_matches(conn: &mut Connection) -> Result<RebuildReport> {
    let tx = conn.transaction().context("begin matches rebuild")?;

    let mut landed = 0usize;
    let mut rejected = 0usize;
    let mut winners: BTreeMap<i64, CleanedMatch> = BTreeMap::new();
    {
        let mut stmt = tx
            .prepare(
                "SELECT source, extracted_at, payload FROM raw_match_landing
                 ORDER BY last_updated ASC, extracted_at ASC, landing_id ASC",
            )
            .context("prepare landing scan")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("scan landing buffer")?;

        for row in rows {
            let (source, extracted_at_raw, payload) = row.context("decode landing row")?;
            landed += 1;
            let raw = match serde_json::from_str::<RawMatch>(&payload) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(%err, "undecodable landing payload, skipped");
                    rejected += 1;
                    continue;
                }
            };
            let extracted_at = crate::warehouse::parse_ts(&extracted_at_raw)
                .context("landing extracted_at")?;
            let cleaned = match clean_record(&raw, &source, extracted_at) {
                Ok(cleaned) => cleaned,
                Err(rejection) => {
                    warn!(%rejection, "rejected during rebuild");
                    rejected += 1;
                    continue;
                }
            };
            match winners.get(&cleaned.event_id) {
                None => {
                    winners.insert(cleaned.event_id, cleaned);
                }
                Some(current) => {
                    if cleaned.last_updated <= current.last_updated {
                        continue; // stale or equal re-extraction never clobbers
                    }
                    if cleaned.competition_code != current.competition_code {
                        warn!(
                            event_id = cleaned.event_id,
                            from = %current.competition_code,
                            to = %cleaned.competition_code,
                            "competition reassignment rejected"
                        );
                        rejected += 1;
                        continue;
                    }
                    winners.insert(cleaned.event_id, cleaned);
                }
            }
        }
    }

    tx.execute_batch(
        r#"
        DROP TABLE IF EXISTS matches_next;
        CREATE TABLE matches_next (
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
        "#,
    )
    .context("create matches staging table")?;

    for cleaned in winners.values() {
        insert_cleaned(&tx, "matches_next", cleaned)
            .with_context(|| format!("stage cleaned event {}", cleaned.event_id))?;
    }

    swap_table(&tx, "matches")?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_matches_competition ON matches(competition_code);
         CREATE INDEX IF NOT EXISTS idx_matches_kickoff ON matches(utc_kickoff);",
    )
    .context("recreate matches indexes")?;

    let rows = winners.len();
    tx.commit().context("commit matches rebuild")?;
    Ok(RebuildReport {
        landed,
        rows,
        rejected,
    })
}
