use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::IngestError;
use crate::models::{app_id_store, NormalizedReview, RawReview};

/// Hex SHA-256 over review text followed by the store's review id.
pub fn review_hash(text: &str, id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Accepts the date shapes the store feeds emit and returns the instant in UTC.
pub fn parse_review_date(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn to_iso(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds the persisted record for one raw review. Takes the raw review by value and
/// embeds a stripped copy, so the caller's data is never touched.
pub fn normalize(
    raw: RawReview,
    app_id: &str,
    store: &str,
    fallback_version: &str,
) -> Result<NormalizedReview, IngestError> {
    let text = raw
        .text
        .as_deref()
        .ok_or_else(|| IngestError::MalformedReview(format!("review {:?} has no text", raw.id)))?;
    let hash = review_hash(text, raw.id.as_deref().unwrap_or(""));

    let date_str = raw
        .date
        .as_deref()
        .ok_or_else(|| IngestError::MalformedReview(format!("review {:?} has no date", raw.id)))?;
    let date = parse_review_date(date_str).ok_or_else(|| {
        IngestError::MalformedReview(format!("review {:?} has unparseable date {:?}", raw.id, date_str))
    })?;

    let version = match raw.version.as_deref() {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => fallback_version.to_string(),
    };

    Ok(NormalizedReview {
        app_id_store: app_id_store(app_id, store),
        review_hash: hash,
        date: to_iso(&date),
        version,
        review: raw.strip_empty_fields(),
        analysis: None,
    })
}
