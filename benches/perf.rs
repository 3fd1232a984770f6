use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

use footdata_warehouse::clean::clean_record;
use footdata_warehouse::feed::RawMatch;
use footdata_warehouse::form::{ScoredEvent, compute_team_form};

fn season_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 18, 0, 0).unwrap()
}

/// Synthetic season: `teams` clubs playing round-robin style fixtures with
/// random scores, enough to fill every trailing window many times over.
fn synthetic_season(teams: i64, rounds: i64, seed: u64) -> Vec<ScoredEvent> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut events = Vec::new();
    let mut event_id = 1i64;
    for round in 0..rounds {
        for home in 1..=teams {
            for away in 1..=teams {
                if home == away {
                    continue;
                }
                events.push(ScoredEvent {
                    event_id,
                    competition_id: 2001,
                    competition_code: "PL".to_string(),
                    kickoff: season_start() + Duration::hours(event_id + round * 24),
                    home_team_id: home,
                    away_team_id: away,
                    home_goals: rng.gen_range(0..5),
                    away_goals: rng.gen_range(0..5),
                });
                event_id += 1;
            }
        }
    }
    events
}

fn bench_team_form_small(c: &mut Criterion) {
    let events = synthetic_season(20, 1, 7);
    c.bench_function("team_form_single_season", |b| {
        b.iter(|| {
            let rows = compute_team_form(black_box(&events));
            black_box(rows.len());
        })
    });
}

fn bench_team_form_history(c: &mut Criterion) {
    // Several seasons of history, the realistic rebuild workload.
    let events = synthetic_season(20, 5, 7);
    c.bench_function("team_form_full_history", |b| {
        b.iter(|| {
            let rows = compute_team_form(black_box(&events));
            black_box(rows.len());
        })
    });
}

fn bench_clean_record(c: &mut Criterion) {
    let raw = RawMatch {
        event_id: 497_559,
        competition_id: 2001,
        competition_code: "cl".to_string(),
        utc_kickoff: Some("2025-09-16T19:00:00Z".to_string()),
        status: "FINISHED".to_string(),
        home_team_id: 86,
        away_team_id: 81,
        home_team: "Real Madrid CF".to_string(),
        away_team: "FC Barcelona".to_string(),
        home_goals: Some(2),
        away_goals: Some(1),
        last_updated: Utc.with_ymd_and_hms(2025, 9, 16, 21, 3, 27).unwrap(),
    };
    let extracted_at = Utc.with_ymd_and_hms(2025, 9, 17, 6, 0, 0).unwrap();
    c.bench_function("clean_record", |b| {
        b.iter(|| {
            let cleaned = clean_record(black_box(&raw), "football-data.org", extracted_at).unwrap();
            black_box(cleaned.event_id);
        })
    });
}

criterion_group!(
    perf,
    bench_team_form_small,
    bench_team_form_history,
    bench_clean_record
);
criterion_main!(perf);
