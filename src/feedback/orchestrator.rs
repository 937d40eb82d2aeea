//! Pure weighting and preparation logic for trust-weighted feedback. No
//! storage access here; everything is a total function over its inputs.

use crate::feedback::models::{
    FeedbackEffort, FeedbackEvent, FeedbackPurpose, RawFeedback, TransactionStage, UserProfile,
    UserSegment,
};
use crate::models::SessionContext;
use chrono::Utc;
use std::collections::HashSet;
use thiserror::Error;

/// Ceiling for any single submission's weight.
pub const MAX_WEIGHT: f64 = 1.5;

/// Extra weight granted to post-transaction feedback.
const SOLD_BOOST: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackValidationError {
    #[error("missing listing id")]
    MissingListingId,
    #[error("missing purpose")]
    MissingPurpose,
    #[error("missing effort level")]
    MissingEffort,
    #[error("missing feedback value")]
    MissingValue,
}

/// Base weight by effort, boosted for post-sale feedback, capped at 1.5.
pub fn calculate_weight(effort: FeedbackEffort, stage: TransactionStage) -> f64 {
    let base = match effort {
        FeedbackEffort::Micro => 0.3,
        FeedbackEffort::Short => 0.7,
        FeedbackEffort::Long => 1.0,
        FeedbackEffort::Unknown => 0.3,
    };
    let boosted = if stage == TransactionStage::Sold {
        base + SOLD_BOOST
    } else {
        base
    };
    boosted.min(MAX_WEIGHT)
}

/// Classify a user from their aggregate history. First matching rule wins;
/// the ordering is part of the contract.
pub fn infer_user_segment(profile: Option<&UserProfile>) -> UserSegment {
    let Some(profile) = profile else {
        return UserSegment::CasualSeller;
    };
    if profile.analysis_count == 0 {
        return UserSegment::CasualSeller;
    }

    let distinct_categories: HashSet<&str> =
        profile.categories.iter().map(String::as_str).collect();

    if profile.analysis_count > 20 && distinct_categories.len() > 5 {
        return UserSegment::Reseller;
    }
    if profile.avg_item_value.is_some_and(|v| v > 200.0) && profile.analysis_count > 5 {
        return UserSegment::Mover;
    }
    if profile.avg_item_value.is_some_and(|v| v < 50.0) && profile.analysis_count > 3 {
        return UserSegment::QuickCash;
    }
    UserSegment::CasualSeller
}

/// Reject payloads missing any required field before a write is attempted.
pub fn validate_feedback(raw: &RawFeedback) -> Result<(), FeedbackValidationError> {
    if raw
        .listing_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .is_none()
    {
        return Err(FeedbackValidationError::MissingListingId);
    }
    if raw.purpose.is_none() {
        return Err(FeedbackValidationError::MissingPurpose);
    }
    if raw.effort.is_none() {
        return Err(FeedbackValidationError::MissingEffort);
    }
    match &raw.value {
        None | Some(serde_json::Value::Null) => Err(FeedbackValidationError::MissingValue),
        Some(_) => Ok(()),
    }
}

/// Turn a validated payload into a storable event: stage defaults to
/// pre-listing, weight and segment are computed, variant defaults to
/// "button", metadata passes through untouched.
pub fn prepare_feedback(
    raw: &RawFeedback,
    session: &SessionContext,
    profile: Option<&UserProfile>,
) -> Result<FeedbackEvent, FeedbackValidationError> {
    validate_feedback(raw)?;
    let (Some(listing_id), Some(purpose), Some(effort), Some(value)) = (
        raw.listing_id.clone(),
        raw.purpose,
        raw.effort,
        raw.value.clone(),
    ) else {
        return Err(FeedbackValidationError::MissingValue);
    };

    let stage = raw.stage.unwrap_or(TransactionStage::PreListing);
    Ok(FeedbackEvent {
        id: None,
        listing_id,
        session_id: session.session_id.clone(),
        user_id: session.user_id.clone(),
        purpose,
        stage,
        effort,
        value,
        weight: calculate_weight(effort, stage),
        segment: infer_user_segment(profile),
        variant: raw.variant.clone().unwrap_or_else(|| "button".into()),
        metadata: raw.metadata.clone().unwrap_or_default(),
        created_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALL_EFFORTS: [FeedbackEffort; 4] = [
        FeedbackEffort::Micro,
        FeedbackEffort::Short,
        FeedbackEffort::Long,
        FeedbackEffort::Unknown,
    ];
    const ALL_STAGES: [TransactionStage; 4] = [
        TransactionStage::PreListing,
        TransactionStage::ActiveListing,
        TransactionStage::Sold,
        TransactionStage::NotSold,
    ];

    fn session() -> SessionContext {
        SessionContext {
            session_id: "sess_1_test".into(),
            user_id: None,
        }
    }

    fn valid_raw() -> RawFeedback {
        RawFeedback {
            listing_id: Some("listing_1".into()),
            purpose: Some(FeedbackPurpose::PriceAccuracy),
            effort: Some(FeedbackEffort::Micro),
            value: Some(json!(true)),
            ..Default::default()
        }
    }

    #[test]
    fn weight_base_values() {
        let stage = TransactionStage::PreListing;
        assert_eq!(calculate_weight(FeedbackEffort::Micro, stage), 0.3);
        assert_eq!(calculate_weight(FeedbackEffort::Short, stage), 0.7);
        assert_eq!(calculate_weight(FeedbackEffort::Long, stage), 1.0);
        assert_eq!(calculate_weight(FeedbackEffort::Unknown, stage), 0.3);
    }

    #[test]
    fn sold_stage_boosts_and_caps() {
        assert_eq!(
            calculate_weight(FeedbackEffort::Micro, TransactionStage::Sold),
            0.8
        );
        // long + sold would be 1.5 exactly, the ceiling
        assert_eq!(
            calculate_weight(FeedbackEffort::Long, TransactionStage::Sold),
            1.5
        );
    }

    #[test]
    fn weight_stays_in_bounds_and_sold_dominates() {
        for effort in ALL_EFFORTS {
            for stage in ALL_STAGES {
                let weight = calculate_weight(effort, stage);
                assert!((0.3..=1.5).contains(&weight), "{weight} out of bounds");
                assert!(
                    calculate_weight(effort, TransactionStage::Sold) >= weight,
                    "sold should never weigh less"
                );
            }
        }
    }

    #[test]
    fn segment_defaults_to_casual() {
        assert_eq!(infer_user_segment(None), UserSegment::CasualSeller);
        assert_eq!(
            infer_user_segment(Some(&UserProfile::default())),
            UserSegment::CasualSeller
        );
    }

    #[test]
    fn segment_rules_in_priority_order() {
        let reseller = UserProfile {
            analysis_count: 21,
            avg_item_value: Some(300.0),
            categories: vec![
                "a".into(),
                "b".into(),
                "c".into(),
                "d".into(),
                "e".into(),
                "f".into(),
            ],
        };
        // would also qualify as mover; reseller rule runs first
        assert_eq!(infer_user_segment(Some(&reseller)), UserSegment::Reseller);

        let mover = UserProfile {
            analysis_count: 6,
            avg_item_value: Some(250.0),
            categories: vec!["furniture".into()],
        };
        assert_eq!(infer_user_segment(Some(&mover)), UserSegment::Mover);

        let quick_cash = UserProfile {
            analysis_count: 4,
            avg_item_value: Some(20.0),
            categories: vec![],
        };
        assert_eq!(infer_user_segment(Some(&quick_cash)), UserSegment::QuickCash);

        let middle = UserProfile {
            analysis_count: 4,
            avg_item_value: Some(100.0),
            categories: vec![],
        };
        assert_eq!(infer_user_segment(Some(&middle)), UserSegment::CasualSeller);
    }

    #[test]
    fn segment_counts_distinct_categories() {
        let repeats = UserProfile {
            analysis_count: 30,
            avg_item_value: Some(10.0),
            categories: vec!["a".into(); 12],
        };
        // 12 entries but one distinct category: not a reseller
        assert_ne!(infer_user_segment(Some(&repeats)), UserSegment::Reseller);
    }

    #[test]
    fn validation_rejects_each_missing_field() {
        let mut missing_listing = valid_raw();
        missing_listing.listing_id = None;
        assert_eq!(
            validate_feedback(&missing_listing),
            Err(FeedbackValidationError::MissingListingId)
        );

        let mut missing_purpose = valid_raw();
        missing_purpose.purpose = None;
        assert_eq!(
            validate_feedback(&missing_purpose),
            Err(FeedbackValidationError::MissingPurpose)
        );

        let mut missing_effort = valid_raw();
        missing_effort.effort = None;
        assert_eq!(
            validate_feedback(&missing_effort),
            Err(FeedbackValidationError::MissingEffort)
        );

        let mut null_value = valid_raw();
        null_value.value = Some(serde_json::Value::Null);
        assert_eq!(
            validate_feedback(&null_value),
            Err(FeedbackValidationError::MissingValue)
        );

        assert!(validate_feedback(&valid_raw()).is_ok());
    }

    #[test]
    fn false_is_a_defined_value() {
        let mut raw = valid_raw();
        raw.value = Some(json!(false));
        assert!(validate_feedback(&raw).is_ok());
    }

    #[test]
    fn prepare_applies_defaults() {
        let raw = valid_raw();
        let event = prepare_feedback(&raw, &session(), None).expect("prepare");
        assert_eq!(event.stage, TransactionStage::PreListing);
        assert_eq!(event.variant, "button");
        assert_eq!(event.segment, UserSegment::CasualSeller);
        assert_eq!(event.weight, 0.3);
        assert_eq!(event.session_id, "sess_1_test");
        assert!(event.user_id.is_none());
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn prepare_passes_through_variant_and_metadata() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("surface".into(), json!("listing_page"));
        let raw = RawFeedback {
            stage: Some(TransactionStage::Sold),
            effort: Some(FeedbackEffort::Long),
            variant: Some("form".into()),
            metadata: Some(metadata.clone()),
            value: Some(json!({"daysToSell": 4})),
            purpose: Some(FeedbackPurpose::TimeToSell),
            listing_id: Some("listing_7".into()),
        };
        let event = prepare_feedback(&raw, &session(), None).expect("prepare");
        assert_eq!(event.variant, "form");
        assert_eq!(event.metadata, metadata);
        assert_eq!(event.weight, 1.5);
        assert_eq!(event.stage, TransactionStage::Sold);
    }

    #[test]
    fn prepare_rejects_invalid_payload() {
        let raw = RawFeedback::default();
        assert!(prepare_feedback(&raw, &session(), None).is_err());
    }
}
