use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use once_cell::sync::OnceCell;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::warn;

use crate::config::Settings;
use crate::error::FeedError;
use crate::feed::{MatchFeed, RawMatch};

pub const SOURCE_NAME: &str = "football-data.org";

const REQUEST_TIMEOUT_SECS: u64 = 30;
// The provider caps dateFrom..dateTo spans; stay under it.
const MAX_WINDOW_DAYS: i64 = 10;

static CLIENT: OnceCell<Client> = OnceCell::new();

fn http_client() -> Result<&'static Client, FeedError> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| FeedError::Transport {
                provider: SOURCE_NAME.to_string(),
                message: format!("failed to build http client: {err}"),
            })
    })
}

/// Extraction client for the football-data.org v4 `/matches` endpoint.
/// The date range is walked in bounded windows; records at or below the
/// caller's `since` are filtered out so the load engine only sees what the
/// watermark has not covered yet.
pub struct FootballDataFeed {
    base_url: String,
    api_token: Option<String>,
    competitions: Vec<String>,
    until: Option<NaiveDate>,
}

impl FootballDataFeed {
    pub fn new(settings: &Settings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_token: settings.api_token.clone(),
            competitions: settings.competitions.clone(),
            until: None,
        }
    }

    /// Caps the extraction range; backfills use this instead of "now".
    pub fn with_until(mut self, until: NaiveDate) -> Self {
        self.until = Some(until);
        self
    }

    fn fetch_window(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Value>, FeedError> {
        let mut url = format!("{}/matches?dateFrom={from}&dateTo={to}", self.base_url);
        if !self.competitions.is_empty() {
            url.push_str("&competitions=");
            url.push_str(&self.competitions.join(","));
        }

        let client = http_client()?;
        let mut req = client.get(&url).header("Accept", "application/json");
        if let Some(token) = &self.api_token {
            req = req.header("X-Auth-Token", token);
        }

        let resp = req.send().map_err(|err| FeedError::Transport {
            provider: SOURCE_NAME.to_string(),
            message: err.to_string(),
        })?;
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimited {
                provider: SOURCE_NAME.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(FeedError::Transport {
                provider: SOURCE_NAME.to_string(),
                message: format!("http {} from {url}", resp.status()),
            });
        }

        let payload: Value = resp.json().map_err(|err| FeedError::Decode {
            provider: SOURCE_NAME.to_string(),
            message: err.to_string(),
        })?;
        Ok(payload
            .get("matches")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }
}

impl MatchFeed for FootballDataFeed {
    fn source(&self) -> &str {
        SOURCE_NAME
    }

    fn fetch(&self, entity: &str, since: DateTime<Utc>) -> Result<Vec<RawMatch>, FeedError> {
        if entity != "matches" {
            return Err(FeedError::Transport {
                provider: SOURCE_NAME.to_string(),
                message: format!("unsupported entity {entity:?}"),
            });
        }

        let start = since.date_naive();
        let end = self
            .until
            .unwrap_or_else(|| (Utc::now() + ChronoDuration::days(1)).date_naive());

        let mut out = Vec::new();
        for (from, to) in chunk_date_range(start, end, MAX_WINDOW_DAYS) {
            for value in self.fetch_window(from, to)? {
                match parse_api_match(&value) {
                    Some(raw) if raw.last_updated > since => out.push(raw),
                    Some(_) => {} // already below the watermark
                    None => warn!("skipping undecodable match entry"),
                }
            }
        }
        Ok(out)
    }
}

fn chunk_date_range(start: NaiveDate, end: NaiveDate, window_days: i64) -> Vec<(NaiveDate, NaiveDate)> {
    let (mut current, end) = if start <= end { (start, end) } else { (end, start) };
    let mut out = Vec::new();
    while current <= end {
        let chunk_end = (current + ChronoDuration::days(window_days - 1)).min(end);
        out.push((current, chunk_end));
        current = chunk_end + ChronoDuration::days(1);
    }
    out
}

/// Maps one v4 API match object onto the raw record model. Entries missing
/// identity or a last-updated stamp are dropped here; everything else is
/// passed through for the cleaning stage to judge.
fn parse_api_match(v: &Value) -> Option<RawMatch> {
    let event_id = v.get("id")?.as_i64()?;
    let last_updated = v
        .get("lastUpdated")
        .and_then(|x| x.as_str())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))?;

    let competition = v.get("competition");
    let competition_id = competition
        .and_then(|c| c.get("id"))
        .and_then(|x| x.as_i64())
        .unwrap_or_default();
    let competition_code = competition
        .and_then(|c| c.get("code"))
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string();

    let home = v.get("homeTeam");
    let away = v.get("awayTeam");
    let team_id = |side: Option<&Value>| {
        side.and_then(|t| t.get("id"))
            .and_then(|x| x.as_i64())
            .unwrap_or_default()
    };
    let team_name = |side: Option<&Value>| {
        side.and_then(|t| t.get("name"))
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let full_time = v.get("score").and_then(|s| s.get("fullTime"));
    let goals = |side: &str| {
        full_time
            .and_then(|ft| ft.get(side))
            .and_then(|x| x.as_i64())
    };

    Some(RawMatch {
        event_id,
        competition_id,
        competition_code,
        utc_kickoff: v
            .get("utcDate")
            .and_then(|x| x.as_str())
            .map(|s| s.to_string()),
        status: v
            .get("status")
            .and_then(|x| x.as_str())
            .unwrap_or("UNKNOWN")
            .to_string(),
        home_team_id: team_id(home),
        away_team_id: team_id(away),
        home_team: team_name(home),
        away_team: team_name(away),
        home_goals: goals("home"),
        away_goals: goals("away"),
        last_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::{chunk_date_range, parse_api_match};
    use chrono::NaiveDate;

    const MATCH_JSON: &str = r#"{
        "id": 497559,
        "utcDate": "2025-09-16T19:00:00Z",
        "status": "FINISHED",
        "lastUpdated": "2025-09-17T00:20:45Z",
        "competition": {"id": 2001, "code": "CL", "name": "UEFA Champions League"},
        "homeTeam": {"id": 81, "name": "FC Barcelona"},
        "awayTeam": {"id": 86, "name": "Real Madrid CF"},
        "score": {"fullTime": {"home": 2, "away": 1}}
    }"#;

    #[test]
    fn parses_v4_match_entry() {
        let value = serde_json::from_str(MATCH_JSON).unwrap();
        let raw = parse_api_match(&value).expect("entry should parse");
        assert_eq!(raw.event_id, 497559);
        assert_eq!(raw.competition_code, "CL");
        assert_eq!(raw.home_goals, Some(2));
        assert_eq!(raw.away_goals, Some(1));
        assert_eq!(raw.status, "FINISHED");
    }

    #[test]
    fn entry_without_last_updated_is_dropped() {
        let mut value: serde_json::Value = serde_json::from_str(MATCH_JSON).unwrap();
        value.as_object_mut().unwrap().remove("lastUpdated");
        assert!(parse_api_match(&value).is_none());
    }

    #[test]
    fn chunks_cover_range_without_overlap() {
        let start = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 9, 25).unwrap();
        let chunks = chunk_date_range(start, end, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].0, start);
        assert_eq!(chunks[2].1, end);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].1 + chrono::Duration::days(1), pair[1].0);
        }
    }

    #[test]
    fn single_day_range_is_one_chunk() {
        let day = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        assert_eq!(chunk_date_range(day, day, 10), vec![(day, day)]);
    }
}
