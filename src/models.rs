use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

pub const APP_STORE: &str = "App Store";
pub const GOOGLE_PLAY: &str = "Google Play";

/// One configured app within one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTarget {
    pub app_id: String,
    pub store: String,
    #[serde(default)]
    pub name: Option<String>,
}

static APP_ID_RE: OnceLock<Regex> = OnceLock::new();

impl AppTarget {
    pub fn new(app_id: impl Into<String>, store: impl Into<String>) -> Self {
        Self { app_id: app_id.into(), store: store.into(), name: None }
    }

    pub fn app_id_store(&self) -> String {
        app_id_store(&self.app_id, &self.store)
    }

    /// Checks the store against `known_stores` and the id against the allowed charset.
    pub fn check_validity(&self, known_stores: &[&str]) -> Result<(), String> {
        if !known_stores.contains(&self.store.as_str()) {
            return Err(format!("Invalid store {}.", self.store));
        }
        let re = APP_ID_RE.get_or_init(|| Regex::new(r"^[0-9a-zA-Z._]+$").expect("static regex"));
        if !re.is_match(&self.app_id) {
            return Err(format!("Invalid appId {}.", self.app_id));
        }
        Ok(())
    }
}

pub fn app_id_store(app_id: &str, store: &str) -> String {
    format!("{}*{}", app_id, store)
}

/// A review as the store returned it. Fields the pipeline reads are typed, anything
/// else the source sends rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, rename = "userName", skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawReview {
    /// Drops every field holding an empty string, except `text`: it is the hash input,
    /// and an empty body must still hash the same when the stored copy is normalized again.
    pub fn strip_empty_fields(mut self) -> Self {
        for field in [
            &mut self.id,
            &mut self.title,
            &mut self.date,
            &mut self.version,
            &mut self.user_name,
        ] {
            if field.as_deref() == Some("") {
                *field = None;
            }
        }
        self.extra.retain(|_, v| v.as_str() != Some(""));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl Sentiment {
    pub const ALL: [Sentiment; 4] =
        [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral, Sentiment::Mixed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "POSITIVE",
            Sentiment::Negative => "NEGATIVE",
            Sentiment::Neutral => "NEUTRAL",
            Sentiment::Mixed => "MIXED",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "POSITIVE" => Some(Sentiment::Positive),
            "NEGATIVE" => Some(Sentiment::Negative),
            "NEUTRAL" => Some(Sentiment::Neutral),
            "MIXED" => Some(Sentiment::Mixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    #[serde(default)]
    pub positive: f64,
    #[serde(default)]
    pub negative: f64,
    #[serde(default)]
    pub neutral: f64,
    #[serde(default)]
    pub mixed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewAnalysis {
    pub sentiment: Sentiment,
    pub sentiment_score: SentimentScore,
    pub keywords: Vec<String>,
}

/// Canonical, content-addressed review record as it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedReview {
    pub app_id_store: String,
    pub review_hash: String,
    pub date: String,
    pub version: String,
    pub review: RawReview,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ReviewAnalysis>,
}

impl NormalizedReview {
    pub fn text(&self) -> &str {
        self.review.text.as_deref().unwrap_or("")
    }
}
