use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Source fetch failed: {0}")]
    SourceFetch(String),
    #[error("Malformed review: {0}")]
    MalformedReview(String),
    #[error("Stored review query failed: {0}")]
    DuplicateQuery(String),
    #[error("Analysis failed: {0}")]
    Analysis(String),
    #[error("Batch write failed after {committed} committed records: {reason}")]
    WriteBatch { committed: usize, reason: String },
}

/// Pipeline stage in which a per-app run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetching,
    Normalizing,
    Deduplicating,
    Analyzing,
    Writing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::Normalizing => "normalizing",
            Stage::Deduplicating => "deduplicating",
            Stage::Analyzing => "analyzing",
            Stage::Writing => "writing",
        };
        f.write_str(name)
    }
}
