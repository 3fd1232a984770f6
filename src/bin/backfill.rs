use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, TimeZone, Utc};

use footdata_warehouse::clean;
use footdata_warehouse::config::Settings;
use footdata_warehouse::form;
use footdata_warehouse::http_feed::FootballDataFeed;
use footdata_warehouse::load::{self, LoadRequest};
use footdata_warehouse::warehouse;

const DEFAULT_SEASON_START: &str = "2025-09-01";

fn main() -> Result<()> {
    let settings = Settings::load();
    let db_path = parse_path_arg("--db").unwrap_or_else(|| settings.db_path.clone());

    let from = parse_date_arg("--from")?
        .unwrap_or_else(|| DEFAULT_SEASON_START.parse().expect("valid default date"));
    let until = parse_date_arg("--to")?;

    let mut conn = warehouse::open_db(&db_path)?;

    let mut feed = FootballDataFeed::new(&settings);
    if let Some(until) = until {
        feed = feed.with_until(until);
    }

    let since = Utc.from_utc_datetime(
        &from
            .and_hms_opt(0, 0, 0)
            .context("construct backfill start")?,
    );
    let key = settings.watermark_key();
    let report = load::run_load(
        &mut conn,
        &feed,
        &LoadRequest {
            flow: "backfill",
            entity: "matches",
            key: &key,
            floor: settings.watermark_floor,
            since_override: Some(since),
        },
    )?;

    let rebuild = clean::rebuild_matches(&mut conn)?;
    let form_rows = form::rebuild_team_form(&mut conn)?;

    println!("Backfill complete");
    println!("DB: {}", db_path.display());
    println!("Range: {from} -> {}", until.map(|d| d.to_string()).unwrap_or_else(|| "now".to_string()));
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
        "Cleaned: {} rows from {} landed (rejected {})",
        rebuild.rows, rebuild.landed, rebuild.rejected
    );
    println!("Team form rows: {form_rows}");

    if report.status == footdata_warehouse::audit::RunStatus::Failed {
        return Err(anyhow!("backfill extraction failed"));
    }
    Ok(())
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let prefix = format!("{flag}=");
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

fn parse_date_arg(flag: &str) -> Result<Option<NaiveDate>> {
    let Some(raw) = parse_path_arg(flag) else {
        return Ok(None);
    };
    let raw = raw.to_string_lossy();
    let date = raw
        .parse::<NaiveDate>()
        .with_context(|| format!("{flag} expects YYYY-MM-DD, got {raw:?}"))?;
    Ok(Some(date))
}
