use log::warn;
use std::collections::HashSet;

use crate::models::NormalizedReview;

/// Index of the first fresh review whose hash is already stored.
pub fn find_boundary(fresh: &[NormalizedReview], stored_hashes: &HashSet<String>) -> Option<usize> {
    fresh.iter().position(|r| stored_hashes.contains(&r.review_hash))
}

/// Keeps only the reviews newer than the first already-stored one.
///
/// Relies on `fresh` being newest first: everything after a stored review is older
/// and was ingested by an earlier run, so the whole suffix is dropped unchecked.
pub fn drop_known(mut fresh: Vec<NormalizedReview>, stored_hashes: &HashSet<String>) -> Vec<NormalizedReview> {
    if let Some(boundary) = find_boundary(&fresh, stored_hashes) {
        fresh.truncate(boundary);
    }
    fresh
}

/// Dates are ISO-8601 UTC strings in one fixed format, so they order lexically.
pub fn is_newest_first(records: &[NormalizedReview]) -> bool {
    records.windows(2).all(|w| w[0].date >= w[1].date)
}

/// Restores newest-first order if a source handed back reviews out of order.
/// The sort is stable so reviews sharing a timestamp keep their page order.
pub fn ensure_newest_first(mut records: Vec<NormalizedReview>, app_id_store: &str) -> Vec<NormalizedReview> {
    if !is_newest_first(&records) {
        warn!(
            "{}: {} reviews arrived out of chronological order; re-sorting newest first",
            app_id_store,
            records.len()
        );
        records.sort_by(|a, b| b.date.cmp(&a.date));
    }
    records
}
