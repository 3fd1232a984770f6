use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use footdata_warehouse::{warehouse, watermark};

fn mem_db() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory sqlite");
    warehouse::init_schema(&conn).expect("schema");
    conn
}

fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 16, hour, minute, 0).unwrap()
}

#[test]
fn absent_watermark_reads_as_none() {
    let conn = mem_db();
    let mark = watermark::get(&conn, "feed-a", "matches", "k").unwrap();
    assert!(mark.is_none());
    let success = watermark::last_success_at(&conn, "feed-a", "matches", "k").unwrap();
    assert!(success.is_none());
}

#[test]
fn first_advance_creates_the_row() {
    let conn = mem_db();
    let advanced =
        watermark::advance(&conn, "feed-a", "matches", "k", ts(12, 0), ts(13, 0)).unwrap();
    assert!(advanced);
    assert_eq!(
        watermark::get(&conn, "feed-a", "matches", "k").unwrap(),
        Some(ts(12, 0))
    );
    assert_eq!(
        watermark::last_success_at(&conn, "feed-a", "matches", "k").unwrap(),
        Some(ts(13, 0))
    );
}

#[test]
fn stale_advance_refreshes_success_but_not_watermark() {
    let conn = mem_db();
    assert!(watermark::advance(&conn, "feed-a", "matches", "k", ts(12, 0), ts(13, 0)).unwrap());

    // A run that saw nothing newer still counts as a successful run.
    let advanced =
        watermark::advance(&conn, "feed-a", "matches", "k", ts(11, 0), ts(14, 0)).unwrap();
    assert!(!advanced);
    assert_eq!(
        watermark::get(&conn, "feed-a", "matches", "k").unwrap(),
        Some(ts(12, 0))
    );
    assert_eq!(
        watermark::last_success_at(&conn, "feed-a", "matches", "k").unwrap(),
        Some(ts(14, 0))
    );

    // Equal is not strictly greater either.
    let advanced =
        watermark::advance(&conn, "feed-a", "matches", "k", ts(12, 0), ts(15, 0)).unwrap();
    assert!(!advanced);
    assert_eq!(
        watermark::get(&conn, "feed-a", "matches", "k").unwrap(),
        Some(ts(12, 0))
    );
}

#[test]
fn keys_are_independent() {
    let conn = mem_db();
    watermark::advance(&conn, "feed-a", "matches", "competition=CL", ts(12, 0), ts(13, 0)).unwrap();
    watermark::advance(&conn, "feed-a", "matches", "competition=PL", ts(9, 0), ts(13, 0)).unwrap();
    watermark::advance(&conn, "feed-b", "matches", "competition=CL", ts(8, 0), ts(13, 0)).unwrap();

    assert_eq!(
        watermark::get(&conn, "feed-a", "matches", "competition=CL").unwrap(),
        Some(ts(12, 0))
    );
    assert_eq!(
        watermark::get(&conn, "feed-a", "matches", "competition=PL").unwrap(),
        Some(ts(9, 0))
    );
    assert_eq!(
        watermark::get(&conn, "feed-b", "matches", "competition=CL").unwrap(),
        Some(ts(8, 0))
    );
}
