use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// One source-native match record as returned by an extraction provider.
/// Identity is the provider's event id; the same id may come back across
/// extractions with different field values (rescheduled or corrected
/// matches), distinguished by `last_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMatch {
    pub event_id: i64,
    pub competition_id: i64,
    pub competition_code: String,
    /// Kickoff as the provider sent it; parsed during cleaning.
    pub utc_kickoff: Option<String>,
    pub status: String,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<i64>,
    pub away_goals: Option<i64>,
    pub last_updated: DateTime<Utc>,
}

/// Extraction collaborator boundary. Implementors return a finite batch of
/// records with last-updated timestamps after `since`; pagination, rate
/// limiting and authentication are their concern.
pub trait MatchFeed {
    fn source(&self) -> &str;
    fn fetch(&self, entity: &str, since: DateTime<Utc>) -> Result<Vec<RawMatch>, FeedError>;
}

type ScriptedStep = Result<Vec<RawMatch>, FeedError>;

/// In-memory feed for tests and dry runs. Batches are queued per entity
/// and handed out in order; an exhausted queue yields empty batches.
pub struct ScriptedFeed {
    source: String,
    steps: Mutex<HashMap<String, VecDeque<ScriptedStep>>>,
    calls: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl ScriptedFeed {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            steps: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_batch(&self, entity: &str, batch: Vec<RawMatch>) {
        self.steps
            .lock()
            .expect("scripted feed poisoned")
            .entry(entity.to_string())
            .or_default()
            .push_back(Ok(batch));
    }

    pub fn push_error(&self, entity: &str, err: FeedError) {
        self.steps
            .lock()
            .expect("scripted feed poisoned")
            .entry(entity.to_string())
            .or_default()
            .push_back(Err(err));
    }

    /// Every (entity, since) pair this feed was asked for, in call order.
    pub fn calls(&self) -> Vec<(String, DateTime<Utc>)> {
        self.calls.lock().expect("scripted feed poisoned").clone()
    }
}

impl MatchFeed for ScriptedFeed {
    fn source(&self) -> &str {
        &self.source
    }

    fn fetch(&self, entity: &str, since: DateTime<Utc>) -> Result<Vec<RawMatch>, FeedError> {
        self.calls
            .lock()
            .expect("scripted feed poisoned")
            .push((entity.to_string(), since));
        let step = self
            .steps
            .lock()
            .expect("scripted feed poisoned")
            .get_mut(entity)
            .and_then(|queue| queue.pop_front());
        step.unwrap_or_else(|| Ok(Vec::new()))
    }
}
