use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

const DEFAULT_BASE_URL: &str = "https://api.football-data.org/v4";
const DEFAULT_DB_PATH: &str = "warehouse/warehouse.sqlite";

#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub api_token: Option<String>,
    pub db_path: PathBuf,
    pub competitions: Vec<String>,
    /// Lower bound used when no watermark exists yet (first run extracts
    /// full history from this point).
    pub watermark_floor: DateTime<Utc>,
}

impl Settings {
    /// Loads `.env` if present, then reads the environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let base_url = env_trimmed("FOOTBALL_DATA_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_token = env_trimmed("FOOTBALL_DATA_API_KEY");
        let db_path = env_trimmed("WAREHOUSE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let competitions = env_trimmed("FOOTBALL_COMPETITIONS")
            .map(|raw| parse_codes(&raw))
            .unwrap_or_default();
        let watermark_floor = env_trimmed("WATERMARK_FLOOR")
            .and_then(|raw| parse_floor(&raw))
            .unwrap_or_else(epoch);

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            db_path,
            competitions,
            watermark_floor,
        }
    }

    /// Watermark key identifying the slice of the matches entity this
    /// deployment extracts.
    pub fn watermark_key(&self) -> String {
        if self.competitions.is_empty() {
            "competition=ALL;season=ALL".to_string()
        } else {
            format!("competition={};season=ALL", self.competitions.join("+"))
        }
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap()
}

fn env_trimmed(key: &str) -> Option<String> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

fn parse_codes(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in raw.split([',', ';', ' ']) {
        let code = part.trim().to_ascii_uppercase();
        if !code.is_empty() && !out.contains(&code) {
            out.push(code);
        }
    }
    out
}

/// Accepts either a bare date or a full RFC 3339 timestamp.
fn parse_floor(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = raw.parse::<NaiveDate>().ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}
