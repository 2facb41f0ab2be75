use log::debug;

use crate::models::NormalizedReview;

/// The analysis service rejects documents above this many UTF-8 bytes.
pub const DEFAULT_MAX_TEXT_BYTES: usize = 5000;

/// Drops trailing words until `text` fits in `max_bytes` UTF-8 bytes. A string with
/// no space left to cut at is clipped at the last char boundary within budget.
pub fn truncate_text(text: &str, max_bytes: usize) -> String {
    let mut end = text.len();
    while end > max_bytes {
        end = match text[..end].rfind(' ') {
            Some(idx) => idx,
            None => floor_char_boundary(text, max_bytes),
        };
    }
    text[..end].to_string()
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Returns the records with every review text bounded to `max_bytes`.
pub fn truncate_reviews(records: Vec<NormalizedReview>, max_bytes: usize) -> Vec<NormalizedReview> {
    records
        .into_iter()
        .map(|mut record| {
            if let Some(text) = record.review.text.take() {
                let bounded = truncate_text(&text, max_bytes);
                if bounded.len() != text.len() {
                    debug!(
                        "truncated review {} from {} to {} bytes",
                        record.review_hash,
                        text.len(),
                        bounded.len()
                    );
                }
                record.review.text = Some(bounded);
            }
            record
        })
        .collect()
}
