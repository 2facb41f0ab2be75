use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::error::IngestError;
use crate::models::{NormalizedReview, ReviewAnalysis, Sentiment, SentimentScore};
use crate::truncate::truncate_reviews;

/// Most documents the analysis service takes in one call.
pub const MAX_ANALYSIS_BATCH: usize = 25;

/// Batch sentiment and key-phrase classification, one result per input index.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_batch(&self, texts: &[String], language: &str) -> Result<Vec<ReviewAnalysis>, IngestError>;
}

/// Bounds each review text to `max_text_bytes`, sends the texts in chunks of
/// `batch_size` and returns the records with their analysis attached.
pub async fn enrich(
    records: Vec<NormalizedReview>,
    analyzer: &dyn Analyzer,
    batch_size: usize,
    language: &str,
    max_text_bytes: usize,
) -> Result<Vec<NormalizedReview>, IngestError> {
    let batch_size = batch_size.clamp(1, MAX_ANALYSIS_BATCH);
    let total = records.len();
    let mut remaining = truncate_reviews(records, max_text_bytes).into_iter();
    let mut enriched = Vec::with_capacity(total);

    loop {
        let chunk: Vec<NormalizedReview> = remaining.by_ref().take(batch_size).collect();
        if chunk.is_empty() {
            break;
        }
        let texts: Vec<String> = chunk.iter().map(|r| r.text().to_string()).collect();
        let results = analyzer.analyze_batch(&texts, language).await?;
        if results.len() != chunk.len() {
            return Err(IngestError::Analysis(format!(
                "expected {} results, got {}",
                chunk.len(),
                results.len()
            )));
        }
        enriched.extend(chunk.into_iter().zip(results).map(|(mut record, analysis)| {
            record.analysis = Some(analysis);
            record
        }));
    }

    info!("analyzed {} reviews in batches of {}", enriched.len(), batch_size);
    Ok(enriched)
}

const PROMPT: &str = r#"
You are classifying app store reviews. For every review in the input array return its
overall sentiment and the key phrases it mentions.
Return ONLY a strict JSON array with one object per review, in any order:
[
  {
    "index": number,
    "sentiment": "POSITIVE" | "NEGATIVE" | "NEUTRAL" | "MIXED",
    "scores": {"positive": number, "negative": number, "neutral": number, "mixed": number},
    "key_phrases": [string]
  }
]

Rules:
- index is the review's index in the input array.
- scores are confidences between 0.0 and 1.0.
- key_phrases are short noun phrases copied from the review, at most 10.
"#;

pub struct GeminiAnalyzer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAnalyzer {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The key travels in a header so it never shows up in request errors.
    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze_batch(&self, texts: &[String], language: &str) -> Result<Vec<ReviewAnalysis>, IngestError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let req_body = build_gemini_request(texts, language);
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&req_body)
            .send()
            .await
            .map_err(|e| IngestError::Analysis(format!("gemini request failed: {}", e.without_url())))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!("gemini http {}: {}", status, body.chars().take(200).collect::<String>());
            return Err(IngestError::Analysis(format!("gemini http {}", status)));
        }
        let v: JsonValue = resp
            .json()
            .await
            .map_err(|e| IngestError::Analysis(format!("gemini response not json: {}", e.without_url())))?;
        let text_out = extract_gemini_text(&v)
            .ok_or_else(|| IngestError::Analysis("no_text_candidate".to_string()))?;
        parse_analysis(&text_out, texts.len())
    }
}

fn build_gemini_request(texts: &[String], language: &str) -> JsonValue {
    let reviews: Vec<JsonValue> = texts
        .iter()
        .enumerate()
        .map(|(index, text)| json!({ "index": index, "text": text }))
        .collect();
    let context = format!(
        "Reviews (language={}):\n{}",
        language,
        JsonValue::Array(reviews)
    );
    json!({
        "contents": [{ "parts": [{ "text": PROMPT }, { "text": context }] }],
        "generationConfig": { "responseMimeType": "application/json" }
    })
}

fn extract_gemini_text(v: &JsonValue) -> Option<String> {
    // candidates[0].content.parts[*].text
    let parts = v.get("candidates")?.get(0)?.get("content")?.get("parts")?.as_array()?;
    parts
        .iter()
        .find_map(|p| p.get("text").and_then(|x| x.as_str()))
        .map(str::to_string)
}

#[derive(Deserialize)]
struct AnalysisItem {
    index: usize,
    sentiment: String,
    #[serde(default)]
    scores: SentimentScore,
    #[serde(default)]
    key_phrases: Vec<String>,
}

/// Parses the model's JSON array and orders it by input index. Every index in
/// `0..expected` must be answered exactly once.
fn parse_analysis(text: &str, expected: usize) -> Result<Vec<ReviewAnalysis>, IngestError> {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let items: Vec<AnalysisItem> = serde_json::from_str(trimmed)
        .map_err(|e| IngestError::Analysis(format!("invalid_json: {}", e)))?;

    let mut slots: Vec<Option<ReviewAnalysis>> = vec![None; expected];
    for item in items {
        let sentiment = Sentiment::parse(&item.sentiment).ok_or_else(|| {
            IngestError::Analysis(format!("unknown sentiment {:?} at index {}", item.sentiment, item.index))
        })?;
        let slot = slots
            .get_mut(item.index)
            .ok_or_else(|| IngestError::Analysis(format!("index {} out of range", item.index)))?;
        if slot.is_some() {
            return Err(IngestError::Analysis(format!("index {} answered twice", item.index)));
        }
        *slot = Some(ReviewAnalysis {
            sentiment,
            sentiment_score: item.scores,
            keywords: item.key_phrases,
        });
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or_else(|| IngestError::Analysis(format!("no result for index {}", i))))
        .collect()
}
