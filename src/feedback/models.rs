use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// What a feedback prompt was asking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackPurpose {
    PriceAccuracy,
    TimeToSell,
    NegotiationFairness,
    Ghosting,
    UxUsability,
}

/// Where in the sale lifecycle the feedback was collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStage {
    PreListing,
    ActiveListing,
    Sold,
    NotSold,
}

/// How much effort the submission took. Unrecognized values deserialize to
/// `Unknown` so weighting stays total over whatever clients send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackEffort {
    Micro,
    Short,
    Long,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSegment {
    CasualSeller,
    Mover,
    QuickCash,
    Reseller,
    Buyer,
}

/// Raw payload as submitted by a client. Field presence is checked by
/// `orchestrator::validate_feedback` before anything touches storage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RawFeedback {
    #[serde(default)]
    pub listing_id: Option<String>,
    #[serde(default)]
    pub purpose: Option<FeedbackPurpose>,
    #[serde(default)]
    pub stage: Option<TransactionStage>,
    #[serde(default)]
    pub effort: Option<FeedbackEffort>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

/// Aggregate history used to infer a behavioral segment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UserProfile {
    #[serde(default)]
    pub analysis_count: u32,
    #[serde(default)]
    pub avg_item_value: Option<f64>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Prepared, trust-weighted feedback document. Append-only once stored.
/// Serialized field names match the `feedback_events` collection contract.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub listing_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub purpose: FeedbackPurpose,
    pub stage: TransactionStage,
    pub effort: FeedbackEffort,
    pub value: Value,
    pub weight: f64,
    pub segment: UserSegment,
    pub variant: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FeedbackStats {
    pub total_count: usize,
    pub avg_weight: f64,
    pub price_accuracy: Option<f64>,
    pub sold_count: usize,
    pub avg_days_to_sell: Option<f64>,
}

impl FeedbackStats {
    pub fn empty() -> Self {
        Self {
            total_count: 0,
            avg_weight: 0.0,
            price_accuracy: None,
            sold_count: 0,
            avg_days_to_sell: None,
        }
    }
}
