use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::warn;

use crate::warehouse::{fmt_ts, parse_ts, swap_table};

/// Window size for the trailing form sum, current event inclusive.
pub const FORM_WINDOW: usize = 5;

const POINTS_WIN: i64 = 3;
const POINTS_DRAW: i64 = 1;
const POINTS_LOSS: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Home,
    Away,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Home => "home",
            Venue::Away => "away",
        }
    }
}

/// A terminal event with both scores known; the unit the form computation
/// consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEvent {
    pub event_id: i64,
    pub competition_id: i64,
    pub competition_code: String,
    pub kickoff: DateTime<Utc>,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub home_goals: i64,
    pub away_goals: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamFormRow {
    pub event_id: i64,
    pub competition_id: i64,
    pub competition_code: String,
    pub event_timestamp: DateTime<Utc>,
    pub team_id: i64,
    pub points: i64,
    pub venue: Venue,
    pub rank: i64,
    pub trailing_form: i64,
    pub prior_form: i64,
}

/// Derives the full team-form table from scratch. Each event contributes
/// two team-perspective rows; rows are partitioned by (team, competition),
/// totally ordered by (kickoff, event id) so same-timestamp events rank
/// deterministically, and summed over a trailing window of up to
/// `FORM_WINDOW` events. `prior_form` excludes the current event and is 0
/// for the first ranked row of a partition, never null.
pub fn compute_team_form(events: &[ScoredEvent]) -> Vec<TeamFormRow> {
    struct Perspective {
        event_id: i64,
        competition_id: i64,
        kickoff: DateTime<Utc>,
        points: i64,
        venue: Venue,
    }

    let mut partitions: BTreeMap<(i64, String), Vec<Perspective>> = BTreeMap::new();
    for event in events {
        let home_points = points_for(event.home_goals, event.away_goals);
        let away_points = points_for(event.away_goals, event.home_goals);
        for (team_id, points, venue) in [
            (event.home_team_id, home_points, Venue::Home),
            (event.away_team_id, away_points, Venue::Away),
        ] {
            partitions
                .entry((team_id, event.competition_code.clone()))
                .or_default()
                .push(Perspective {
                    event_id: event.event_id,
                    competition_id: event.competition_id,
                    kickoff: event.kickoff,
                    points,
                    venue,
                });
        }
    }

    let mut out = Vec::new();
    for ((team_id, competition_code), mut rows) in partitions {
        rows.sort_by(|a, b| a.kickoff.cmp(&b.kickoff).then(a.event_id.cmp(&b.event_id)));

        let mut points_so_far: Vec<i64> = Vec::with_capacity(rows.len());
        let mut prior_form = 0i64;
        for (idx, row) in rows.into_iter().enumerate() {
            points_so_far.push(row.points);
            let window_start = (idx + 1).saturating_sub(FORM_WINDOW);
            let trailing_form: i64 = points_so_far[window_start..].iter().sum();
            out.push(TeamFormRow {
                event_id: row.event_id,
                competition_id: row.competition_id,
                competition_code: competition_code.clone(),
                event_timestamp: row.kickoff,
                team_id,
                points: row.points,
                venue: row.venue,
                rank: (idx + 1) as i64,
                trailing_form,
                prior_form,
            });
            prior_form += row.points;
        }
    }
    out
}

fn points_for(own_goals: i64, opponent_goals: i64) -> i64 {
    if own_goals > opponent_goals {
        POINTS_WIN
    } else if own_goals == opponent_goals {
        POINTS_DRAW
    } else {
        POINTS_LOSS
    }
}

/// Recomputes the gold `team_form` table from the complete cleaned history
/// and swaps it into place atomically. Full recomputation is deliberate: a
/// late correction to an old event must ripple through every later rank in
/// its partition, which incremental append cannot do.
pub fn rebuild_team_form(conn: &mut Connection) -> Result<usize> {
    let tx = conn.transaction().context("begin team_form rebuild")?;

    let events = {
        let mut stmt = tx
            .prepare(
                "SELECT event_id, competition_id, competition_code, utc_kickoff,
                        home_team_id, away_team_id, home_goals, away_goals
                 FROM matches
                 WHERE status IN ('FINISHED', 'AWARDED')
                   AND utc_kickoff IS NOT NULL
                   AND home_goals IS NOT NULL
                   AND away_goals IS NOT NULL
                 ORDER BY utc_kickoff ASC, event_id ASC",
            )
            .context("prepare terminal matches query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })
            .context("query terminal matches")?;

        let mut events = Vec::new();
        for row in rows {
            let (event_id, competition_id, competition_code, kickoff, home_id, away_id, hg, ag) =
                row.context("decode terminal match")?;
            events.push(ScoredEvent {
                event_id,
                competition_id,
                competition_code,
                kickoff: parse_ts(&kickoff)?,
                home_team_id: home_id,
                away_team_id: away_id,
                home_goals: hg,
                away_goals: ag,
            });
        }
        events
    };

    let excluded: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM matches
             WHERE status IN ('FINISHED', 'AWARDED')
               AND (utc_kickoff IS NULL OR home_goals IS NULL OR away_goals IS NULL)",
            [],
            |row| row.get(0),
        )
        .context("count incomplete terminal matches")?;
    if excluded > 0 {
        warn!(excluded, "terminal matches without kickoff or scores excluded from form");
    }

    let rows = compute_team_form(&events);

    tx.execute_batch(
        r#"
        DROP TABLE IF EXISTS team_form_next;
        CREATE TABLE team_form_next (
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
        "#,
    )
    .context("create team_form staging table")?;

    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO team_form_next (
                    event_id, competition_id, competition_code, event_timestamp,
                    team_id, points, venue, rank, trailing_form, prior_form
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .context("prepare team_form insert")?;
        for row in &rows {
            stmt.execute(params![
                row.event_id,
                row.competition_id,
                row.competition_code,
                fmt_ts(row.event_timestamp),
                row.team_id,
                row.points,
                row.venue.as_str(),
                row.rank,
                row.trailing_form,
                row.prior_form,
            ])
            .context("stage team_form row")?;
        }
    }

    swap_table(&tx, "team_form")?;
    tx.commit().context("commit team_form rebuild")?;
    Ok(rows.len())
}
