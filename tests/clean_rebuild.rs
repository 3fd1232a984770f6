use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use footdata_warehouse::clean;
use footdata_warehouse::config;
use footdata_warehouse::feed::{RawMatch, ScriptedFeed};
use footdata_warehouse::load::{self, LoadRequest};
use footdata_warehouse::warehouse;

fn mem_db() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory sqlite");
    warehouse::init_schema(&conn).expect("schema");
    conn
}

fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 16, 15, minute, 0).unwrap()
}

fn raw(event_id: i64, last_updated: DateTime<Utc>, home_goals: i64) -> RawMatch {
    RawMatch {
        event_id,
        competition_id: 2001,
        competition_code: "CL".to_string(),
        utc_kickoff: Some("2025-09-16T19:00:00Z".to_string()),
        status: "FINISHED".to_string(),
        home_team_id: 100 + event_id,
        away_team_id: 200 + event_id,
        home_team: format!("Home {event_id}"),
        away_team: format!("Away {event_id}"),
        home_goals: Some(home_goals),
        away_goals: Some(1),
        last_updated,
    }
}

fn load_batch(conn: &mut Connection, source: &str, batch: Vec<RawMatch>) {
    let feed = ScriptedFeed::new(source);
    feed.push_batch("matches", batch);
    let report = load::run_load(
        conn,
        &feed,
        &LoadRequest {
            flow: "test_flow",
            entity: "matches",
            key: "k",
            floor: config::epoch(),
            since_override: None,
        },
    )
    .expect("load");
    assert_ne!(report.status.as_str(), "failed");
}

fn dump_matches(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT event_id, competition_code, utc_kickoff, status,
                    home_team_id, away_team_id, home_goals, away_goals, last_updated
             FROM matches ORDER BY event_id",
        )
        .unwrap();
    let rows = stmt
        .query_map([], |row| {
            Ok(format!(
                "{}|{}|{:?}|{}|{}|{}|{:?}|{:?}|{}",
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })
        .unwrap();
    rows.map(|row| row.unwrap()).collect()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count query")
}

#[test]
fn rebuild_agrees_with_incremental_merge() {
    let mut conn = mem_db();
    load_batch(
        &mut conn,
        "rebuild-agree",
        vec![raw(1, ts(1), 2), raw(2, ts(2), 0), raw(3, ts(3), 1)],
    );
    load_batch(
        &mut conn,
        "rebuild-agree",
        vec![raw(2, ts(10), 4), raw(4, ts(11), 2)],
    );

    let merged = dump_matches(&conn);
    assert_eq!(merged.len(), 4);

    let report = clean::rebuild_matches(&mut conn).unwrap();
    assert_eq!(report.landed, 5);
    assert_eq!(report.rows, 4);
    assert_eq!(report.rejected, 0);

    // Replaying the landing buffer lands on the exact same table the
    // incremental merge maintained.
    assert_eq!(dump_matches(&conn), merged);
}

#[test]
fn rebuild_is_deterministic_and_leaves_landing_alone() {
    let mut conn = mem_db();
    load_batch(
        &mut conn,
        "rebuild-det",
        vec![raw(1, ts(1), 2), raw(1, ts(5), 3), raw(2, ts(2), 0)],
    );

    let first = clean::rebuild_matches(&mut conn).unwrap();
    let snapshot = dump_matches(&conn);
    let landed_before = count(&conn, "raw_match_landing");

    let second = clean::rebuild_matches(&mut conn).unwrap();
    assert_eq!(first.rows, second.rows);
    assert_eq!(dump_matches(&conn), snapshot);
    assert_eq!(count(&conn, "raw_match_landing"), landed_before);
}

#[test]
fn rebuild_keeps_newest_version_per_event() {
    let mut conn = mem_db();
    // Versions arrive across separate extractions, freshest first.
    load_batch(&mut conn, "rebuild-lww", vec![raw(9, ts(20), 5)]);
    load_batch(&mut conn, "rebuild-lww", vec![raw(9, ts(10), 0)]);

    clean::rebuild_matches(&mut conn).unwrap();
    let goals: i64 = conn
        .query_row(
            "SELECT home_goals FROM matches WHERE event_id = 9",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(goals, 5);
    assert_eq!(count(&conn, "matches"), 1);
}

#[test]
fn rebuild_rejects_bad_rows_without_aborting() {
    let mut conn = mem_db();
    let mut bad = raw(2, ts(2), 2);
    bad.competition_code = "  ".to_string();
    load_batch(
        &mut conn,
        "rebuild-reject",
        vec![raw(1, ts(1), 2), bad, raw(3, ts(3), 2)],
    );

    let report = clean::rebuild_matches(&mut conn).unwrap();
    assert_eq!(report.landed, 3);
    assert_eq!(report.rows, 2);
    assert_eq!(report.rejected, 1);
}

#[test]
fn rebuild_rejects_competition_reassignment() {
    let mut conn = mem_db();
    load_batch(&mut conn, "rebuild-move", vec![raw(7, ts(1), 2)]);
    let mut moved = raw(7, ts(9), 3);
    moved.competition_code = "PL".to_string();
    load_batch(&mut conn, "rebuild-move", vec![moved]);

    let report = clean::rebuild_matches(&mut conn).unwrap();
    assert_eq!(report.rows, 1);
    assert_eq!(report.rejected, 1);
    let code: String = conn
        .query_row(
            "SELECT competition_code FROM matches WHERE event_id = 7",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(code, "CL");
}
