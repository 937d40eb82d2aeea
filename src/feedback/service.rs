//! Storage-backed feedback operations. Primary writes surface failures in
//! the submit outcome; secondary denormalized writes are swallowed.

use crate::feedback::models::{
    FeedbackEvent, FeedbackPurpose, FeedbackStats, RawFeedback, TransactionStage, UserProfile,
};
use crate::feedback::orchestrator::{prepare_feedback, validate_feedback};
use crate::firestore::StoreError;
use crate::models::{SessionContext, round_one, round_two};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;
use tracing::{error, info, warn};

pub trait FeedbackStore {
    async fn insert_feedback(&self, event: &FeedbackEvent) -> Result<String, StoreError>;
    async fn feedback_for_listing(&self, listing_id: &str)
    -> Result<Vec<FeedbackEvent>, StoreError>;
    async fn recent_feedback(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FeedbackEvent>, StoreError>;
    async fn set_listing_stage(
        &self,
        listing_id: &str,
        stage: TransactionStage,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SubmitOutcome {
    pub success: bool,
    pub feedback_id: Option<String>,
    pub weight: Option<f64>,
    pub error: Option<String>,
}

impl SubmitOutcome {
    fn rejected(error: impl ToString) -> Self {
        Self {
            success: false,
            feedback_id: None,
            weight: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct FeedbackService<S> {
    store: S,
}

impl<S: FeedbackStore> FeedbackService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Validate, prepare, persist. When the raw payload carries a stage,
    /// the referenced listing's denormalized stage field is refreshed as
    /// well; that secondary write is best-effort.
    pub async fn submit_feedback(
        &self,
        raw: &RawFeedback,
        session: &SessionContext,
        profile: Option<&UserProfile>,
    ) -> SubmitOutcome {
        if let Err(err) = validate_feedback(raw) {
            return SubmitOutcome::rejected(err);
        }
        let prepared = match prepare_feedback(raw, session, profile) {
            Ok(prepared) => prepared,
            Err(err) => return SubmitOutcome::rejected(err),
        };

        match self.store.insert_feedback(&prepared).await {
            Ok(feedback_id) => {
                if let Some(stage) = raw.stage
                    && let Err(err) = self
                        .store
                        .set_listing_stage(&prepared.listing_id, stage, prepared.created_at)
                        .await
                {
                    warn!(
                        target = "pricelens.feedback",
                        listing_id = %prepared.listing_id,
                        error = %err,
                        "listing_stage_update_failed"
                    );
                }
                info!(
                    target = "pricelens.feedback",
                    feedback_id = %feedback_id,
                    listing_id = %prepared.listing_id,
                    weight = prepared.weight,
                    "feedback_stored"
                );
                SubmitOutcome {
                    success: true,
                    feedback_id: Some(feedback_id),
                    weight: Some(prepared.weight),
                    error: None,
                }
            }
            Err(err) => {
                error!(
                    target = "pricelens.feedback",
                    listing_id = %prepared.listing_id,
                    error = %err,
                    "feedback_write_failed"
                );
                SubmitOutcome::rejected(err)
            }
        }
    }

    /// All feedback for one listing, newest first. Fail-soft: an unreachable
    /// store reads as "no feedback yet".
    pub async fn get_feedback_for_listing(&self, listing_id: &str) -> Vec<FeedbackEvent> {
        match self.store.feedback_for_listing(listing_id).await {
            Ok(events) => events,
            Err(err) => {
                warn!(
                    target = "pricelens.feedback",
                    listing_id,
                    error = %err,
                    "feedback_fetch_failed"
                );
                Vec::new()
            }
        }
    }

    /// Feedback created within the last `days` days, newest first, capped
    /// at `max_results`. Same fail-soft contract as above.
    pub async fn get_recent_feedback(&self, days: i64, max_results: u32) -> Vec<FeedbackEvent> {
        let cutoff = Utc::now() - Duration::days(days.max(0));
        match self.store.recent_feedback(cutoff, max_results).await {
            Ok(events) => events,
            Err(err) => {
                warn!(
                    target = "pricelens.feedback",
                    days,
                    error = %err,
                    "recent_feedback_fetch_failed"
                );
                Vec::new()
            }
        }
    }
}

/// Pure aggregation over a set of feedback events. An empty input yields a
/// zeroed record, never an error.
pub fn calculate_feedback_stats(events: &[FeedbackEvent]) -> FeedbackStats {
    if events.is_empty() {
        return FeedbackStats::empty();
    }

    let total_count = events.len();
    let avg_weight = events.iter().map(|event| event.weight).sum::<f64>() / total_count as f64;

    let accuracy: Vec<&FeedbackEvent> = events
        .iter()
        .filter(|event| event.purpose == FeedbackPurpose::PriceAccuracy)
        .collect();
    let price_accuracy = if accuracy.is_empty() {
        None
    } else {
        let accurate = accuracy
            .iter()
            .filter(|event| event.value == serde_json::Value::Bool(true))
            .count();
        Some(round_one(accurate as f64 / accuracy.len() as f64 * 100.0))
    };

    let sold: Vec<&FeedbackEvent> = events
        .iter()
        .filter(|event| event.stage == TransactionStage::Sold)
        .collect();
    let days: Vec<f64> = sold
        .iter()
        .filter_map(|event| event.value.get("daysToSell").and_then(|v| v.as_f64()))
        .collect();
    let avg_days_to_sell = if days.is_empty() {
        None
    } else {
        Some(round_one(days.iter().sum::<f64>() / days.len() as f64))
    };

    FeedbackStats {
        total_count,
        avg_weight: round_two(avg_weight),
        price_accuracy,
        sold_count: sold.len(),
        avg_days_to_sell,
    }
}
