use std::path::PathBuf;

use anyhow::{Result, anyhow};

use footdata_warehouse::audit;
use footdata_warehouse::clean;
use footdata_warehouse::config::Settings;
use footdata_warehouse::form;
use footdata_warehouse::http_feed::FootballDataFeed;
use footdata_warehouse::load::{self, LoadRequest};
use footdata_warehouse::warehouse;

fn main() -> Result<()> {
    let settings = Settings::load();
    let db_path = parse_db_path_arg().unwrap_or_else(|| settings.db_path.clone());
    let mut conn = warehouse::open_db(&db_path)?;

    for drift in audit::reconcile(&conn)? {
        println!(
            "[drift] {}/{} key={}: {}",
            drift.source, drift.entity, drift.key, drift.detail
        );
    }

    let feed = FootballDataFeed::new(&settings);
    let key = settings.watermark_key();
    let report = load::run_load(
        &mut conn,
        &feed,
        &LoadRequest {
            flow: "daily_etl",
            entity: "matches",
            key: &key,
            floor: settings.watermark_floor,
            since_override: None,
        },
    )?;

    let rebuild = clean::rebuild_matches(&mut conn)?;
    let form_rows = form::rebuild_team_form(&mut conn)?;

    println!("Daily ETL complete");
    println!("DB: {}", db_path.display());
    println!("Load status: {}", report.status.as_str());
    println!(
        "Fetched: {} inserted={} updated={} skipped={} rejected={}",
        report.fetched,
        report.rows_inserted,
        report.rows_updated,
        report.rows_skipped,
        report.rows_rejected
    );
    println!(
        "Watermark: {} -> {}",
        fmt_mark(report.watermark_before),
        fmt_mark(report.watermark_after)
    );
    println!(
        "Cleaned: {} rows from {} landed (rejected {})",
        rebuild.rows, rebuild.landed, rebuild.rejected
    );
    println!("Team form rows: {form_rows}");
    if !report.errors.is_empty() {
        println!("  errors: {}", report.errors.len());
        for err in report.errors.iter().take(6) {
            println!("   - {err}");
        }
    }

    if report.status == audit::RunStatus::Failed {
        return Err(anyhow!("load failed; watermark left untouched"));
    }
    Ok(())
}

fn fmt_mark(mark: Option<chrono::DateTime<chrono::Utc>>) -> String {
    mark.map(warehouse::fmt_ts).unwrap_or_else(|| "absent".to_string())
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db"
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}
