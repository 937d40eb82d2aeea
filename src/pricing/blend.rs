//! Blend an AI price estimate with empirical sold-price statistics into the
//! final recommended range, and render the human-readable insight line.

use crate::location::LocationData;
use crate::pricing::models::{
    ComparableSetSummary, DataFreshness, GeographicScope, PriceDataSource, PriceEstimate,
    PriceRecommendation,
};

/// Below this many comparables the database signal is not trusted at all.
const MIN_TRUSTED_COUNT: usize = 3;

/// Cap on the empirical weight so the AI estimate is never fully discarded.
const MAX_DATA_WEIGHT: f64 = 0.8;

const AI_ONLY_CONFIDENCE: u8 = 60;

/// Blend the AI estimate with comparable-sales statistics. With fewer than
/// three comparables the AI estimate passes through unchanged; otherwise the
/// optimal price is a count-weighted average and the range is rebuilt from
/// the comparable set's spread.
pub fn blend_pricing(
    ai_estimate: &PriceEstimate,
    comparables: Option<&ComparableSetSummary>,
) -> PriceRecommendation {
    let Some(data) = comparables.filter(|data| data.count >= MIN_TRUSTED_COUNT) else {
        return PriceRecommendation {
            min: ai_estimate.min,
            optimal: ai_estimate.optimal,
            max: ai_estimate.max,
            data_source: PriceDataSource::AiOnly,
            confidence_score: AI_ONLY_CONFIDENCE,
            data_count: None,
            geographic_scope: None,
            avg_days_to_sell: None,
        };
    };

    // Empirical weight grows with sample size: 0.65 at three comparables,
    // capped at 0.8.
    let data_weight = (0.5 + data.count as f64 * 0.05).min(MAX_DATA_WEIGHT);
    let ai_weight = 1.0 - data_weight;

    let optimal =
        (data.avg_price as f64 * data_weight + ai_estimate.optimal as f64 * ai_weight).round()
            as i64;

    // The range comes from the blended optimal plus/minus the observed
    // spread, not from the AI's own bounds.
    let min = (optimal - data.std_dev).max(1);
    let max = (optimal + data.std_dev).max(optimal);

    let mut confidence: u8 = if data.count >= 10 {
        90
    } else if data.count >= 5 {
        80
    } else {
        75
    };
    if data.geographic_scope == GeographicScope::Local {
        confidence += 5;
    }
    if data.data_freshness == DataFreshness::Recent {
        confidence += 5;
    }

    PriceRecommendation {
        min,
        optimal,
        max,
        data_source: PriceDataSource::HybridAiPlusDatabase,
        confidence_score: confidence.min(100),
        data_count: Some(data.count),
        geographic_scope: Some(data.geographic_scope),
        avg_days_to_sell: data.avg_days_to_sell,
    }
}

/// Compose the one-paragraph pricing insight shown next to the range. Pure
/// string assembly; callers rely on the exact phrasing.
pub fn format_pricing_insights(
    comparables: Option<&ComparableSetSummary>,
    location: &LocationData,
) -> String {
    let Some(data) = comparables else {
        return "Be the first to report a sale in this category to help build our pricing database!"
            .to_string();
    };

    let scope = match data.geographic_scope {
        GeographicScope::Local => format!(
            "in {}",
            location
                .metro
                .as_deref()
                .or(location.city.as_deref())
                .unwrap_or("your area")
        ),
        GeographicScope::Regional => format!(
            "in {}",
            location.state.as_deref().unwrap_or("your state")
        ),
        GeographicScope::National => "nationally".to_string(),
    };

    let mut insight = format!("Based on {} similar items sold {}. ", data.count, scope);
    insight.push_str(&format!("Average sale price: ${}. ", data.avg_price));
    if let Some(days) = data.avg_days_to_sell {
        insight.push_str(&format!("Typical time to sell: {days} days. "));
    }
    match data.data_freshness {
        DataFreshness::Recent => insight.push_str("Data is from the last 90 days."),
        DataFreshness::Historical => insight.push_str("Note: Limited recent data available."),
    }
    insight
}
