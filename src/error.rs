use thiserror::Error;

/// Failures talking to an extraction provider. Always aborts the current
/// run without touching the watermark; retries belong to the scheduler.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("transport failure from {provider}: {message}")]
    Transport { provider: String, message: String },
    #[error("{provider} rate limit exhausted")]
    RateLimited { provider: String },
    #[error("undecodable payload from {provider}: {message}")]
    Decode { provider: String, message: String },
}

/// Storage write failure partway through applying a fetched batch.
/// Records are applied in ascending last-updated order, so `applied`
/// always describes a prefix of the batch.
#[derive(Debug, Error)]
#[error("merge aborted after {applied} of {total} records: {message}")]
pub struct MergeError {
    pub applied: usize,
    pub total: usize,
    pub message: String,
}

/// Row-scoped rejection during cleaning or merge. Logged and counted,
/// never aborts the run or a rebuild.
#[derive(Debug, Clone, Error)]
pub enum RowRejection {
    #[error("event {event_id}: cannot cast {field}: {message}")]
    Cast {
        event_id: i64,
        field: &'static str,
        message: String,
    },
    #[error("event {event_id}: consistency violation: {reason}")]
    Consistency { event_id: i64, reason: String },
}

impl RowRejection {
    pub fn event_id(&self) -> i64 {
        match self {
            RowRejection::Cast { event_id, .. } => *event_id,
            RowRejection::Consistency { event_id, .. } => *event_id,
        }
    }
}
