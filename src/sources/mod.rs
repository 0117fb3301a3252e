pub mod coingecko;
pub mod owlracle;
pub mod pools;
pub mod rpc;

use async_trait::async_trait;

use crate::services::merge::Snapshot;

/// Produces one dataset per call.
///
/// `fetch` never fails as a whole: an item that could not be read is left in
/// the dataset as a failure marker (no defining value) and the rest are still
/// collected.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    type Snapshot: Snapshot;

    fn name(&self) -> &'static str;
    async fn fetch(&self) -> Self::Snapshot;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out")]
    Timeout,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("rate limited")]
    RateLimit,
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing field {0}")]
    Missing(&'static str),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::Parse(e.to_string())
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

/// Maps non-success statuses onto `SourceError`.
pub(crate) fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(SourceError::RateLimit);
    }
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    Ok(resp)
}

pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SourceError::Network(e.to_string()))
}
