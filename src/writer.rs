use log::{debug, info};

use crate::db::ReviewStore;
use crate::error::IngestError;
use crate::models::NormalizedReview;

/// Largest batch the review table takes in one put.
pub const MAX_WRITE_BATCH: usize = 25;

/// Writes `records` in consecutive chunks of at most `batch_size`, one put at a time.
///
/// Chunks written before a failure stay committed; the error reports how many.
/// Records are keyed by hash, so re-running after a failure only overwrites.
pub async fn write_batches(
    records: &[NormalizedReview],
    batch_size: usize,
    store: &dyn ReviewStore,
) -> Result<usize, IngestError> {
    let batch_size = batch_size.clamp(1, MAX_WRITE_BATCH);
    let mut committed = 0usize;
    for (i, chunk) in records.chunks(batch_size).enumerate() {
        store.put_batch(chunk).await.map_err(|e| {
            let cause = match e {
                IngestError::WriteBatch { reason, .. } => reason,
                other => other.to_string(),
            };
            IngestError::WriteBatch { committed, reason: format!("batch {} ({} records): {}", i, chunk.len(), cause) }
        })?;
        committed += chunk.len();
        debug!("wrote batch {} ({} records)", i, chunk.len());
    }
    if committed > 0 {
        info!("wrote {} records in batches of {}", committed, batch_size);
    }
    Ok(committed)
}
