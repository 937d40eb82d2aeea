//! Comparable-sales retrieval: a three-tier geographic fallback cascade
//! over the sold-price dataset, followed by a freshness filter and
//! descriptive statistics over the chosen analysis set.

use crate::firestore::StoreError;
use crate::location::LocationData;
use crate::pricing::models::{
    ComparableSample, ComparableSetSummary, DataFreshness, GeographicScope, SoldPriceRecord,
};
use chrono::{Duration, Utc};
use tracing::{info, warn};

const METRO_TIER_LIMIT: u32 = 20;
const STATE_TIER_LIMIT: u32 = 20;
const NATIONAL_TIER_LIMIT: u32 = 30;

/// The state tier runs only when the metro tier left us short of this.
const STATE_TIER_THRESHOLD: usize = 5;
/// The national tier runs only when we are still short of this. Also the
/// minimum volume at which the blend trusts the database at all.
const NATIONAL_TIER_THRESHOLD: usize = 3;

/// Window inside which sales count as fresh.
const FRESHNESS_WINDOW_DAYS: i64 = 90;

/// How many representative sales are kept for display.
const SAMPLE_SIZE: usize = 5;

pub trait SoldPriceSource {
    async fn sold_by_metro(
        &self,
        category: &str,
        metro: &str,
        limit: u32,
    ) -> Result<Vec<SoldPriceRecord>, StoreError>;
    async fn sold_by_state(
        &self,
        category: &str,
        state: &str,
        limit: u32,
    ) -> Result<Vec<SoldPriceRecord>, StoreError>;
    async fn sold_by_category(
        &self,
        category: &str,
        limit: u32,
    ) -> Result<Vec<SoldPriceRecord>, StoreError>;
}

/// Query comparable sold items, widening the geographic net until there is
/// enough volume. A tier that errors contributes zero rows; the cascade
/// carries on. Returns `None` when every tier comes back empty, which
/// callers treat as "no data", not as a failure.
pub async fn get_comparable_items<S: SoldPriceSource>(
    source: &S,
    item_name: &str,
    category: &str,
    location: &LocationData,
) -> Option<ComparableSetSummary> {
    let mut comparables: Vec<SoldPriceRecord> = Vec::new();

    if let Some(metro) = &location.metro {
        match source
            .sold_by_metro(category, metro, METRO_TIER_LIMIT)
            .await
        {
            Ok(rows) => comparables.extend(rows),
            Err(err) => warn!(
                target = "pricelens.pricing",
                category,
                metro,
                error = %err,
                "metro_tier_query_failed"
            ),
        }
    }

    if comparables.len() < STATE_TIER_THRESHOLD
        && let Some(state) = &location.state
    {
        match source
            .sold_by_state(category, state, STATE_TIER_LIMIT)
            .await
        {
            Ok(rows) => merge_deduplicated(&mut comparables, rows),
            Err(err) => warn!(
                target = "pricelens.pricing",
                category,
                state,
                error = %err,
                "state_tier_query_failed"
            ),
        }
    }

    if comparables.len() < NATIONAL_TIER_THRESHOLD {
        match source.sold_by_category(category, NATIONAL_TIER_LIMIT).await {
            Ok(rows) => merge_deduplicated(&mut comparables, rows),
            Err(err) => warn!(
                target = "pricelens.pricing",
                category,
                error = %err,
                "national_tier_query_failed"
            ),
        }
    }

    if comparables.is_empty() {
        info!(
            target = "pricelens.pricing",
            item = item_name,
            category,
            "no_comparable_sales_found"
        );
        return None;
    }

    Some(summarize(comparables, location))
}

/// Merge rows from a wider tier, skipping sales already seen. Identity is
/// `(item_name, timestamp)`.
fn merge_deduplicated(comparables: &mut Vec<SoldPriceRecord>, rows: Vec<SoldPriceRecord>) {
    for row in rows {
        let duplicate = comparables
            .iter()
            .any(|seen| seen.item_name == row.item_name && seen.timestamp == row.timestamp);
        if !duplicate {
            comparables.push(row);
        }
    }
}

fn summarize(comparables: Vec<SoldPriceRecord>, location: &LocationData) -> ComparableSetSummary {
    // Geographic scope is judged over the full union, before the freshness
    // filter narrows it.
    let geographic_scope = classify_scope(&comparables, location);

    let cutoff = Utc::now() - Duration::days(FRESHNESS_WINDOW_DAYS);
    let recent: Vec<&SoldPriceRecord> = comparables
        .iter()
        .filter(|record| record.timestamp >= cutoff)
        .collect();

    let (analysis, data_freshness) = if recent.len() >= NATIONAL_TIER_THRESHOLD {
        (recent, DataFreshness::Recent)
    } else {
        (comparables.iter().collect(), DataFreshness::Historical)
    };

    let prices: Vec<f64> = analysis
        .iter()
        .map(|record| record.actual_sold_price)
        .collect();
    let count = prices.len();
    let avg = prices.iter().sum::<f64>() / count as f64;
    let variance = prices.iter().map(|p| (p - avg).powi(2)).sum::<f64>() / count as f64;
    let std_dev = variance.sqrt();

    let mut sorted = prices.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    // Middle element by index; for even-length sets this is the upper of
    // the two middle values, deliberately not the interpolated median.
    let median = sorted[sorted.len() / 2];

    let min = sorted.first().copied().unwrap_or(avg);
    let max = sorted.last().copied().unwrap_or(avg);

    let days: Vec<f64> = analysis
        .iter()
        .filter_map(|record| record.days_to_sell)
        .collect();
    let avg_days_to_sell = if days.is_empty() {
        None
    } else {
        Some((days.iter().sum::<f64>() / days.len() as f64).round() as i64)
    };

    let comparable_items = analysis
        .iter()
        .take(SAMPLE_SIZE)
        .map(|record| ComparableSample {
            description: format!("{} ({})", record.item_name, record.condition),
            sold_price: record.actual_sold_price.round() as i64,
            location: record
                .location
                .parsed
                .city
                .clone()
                .or_else(|| record.location.parsed.state.clone())
                .unwrap_or_else(|| "Unknown".into()),
            days_to_sell: record.days_to_sell.map(|d| d.round() as i64),
        })
        .collect();

    ComparableSetSummary {
        count,
        avg_price: avg.round() as i64,
        median: median.round() as i64,
        min: min.round() as i64,
        max: max.round() as i64,
        std_dev: std_dev.round() as i64,
        avg_days_to_sell,
        comparable_items,
        data_freshness,
        geographic_scope,
    }
}

fn classify_scope(comparables: &[SoldPriceRecord], location: &LocationData) -> GeographicScope {
    let metro_match = location.metro.as_deref().is_some_and(|metro| {
        comparables
            .iter()
            .any(|record| record.location.parsed.metro.as_deref() == Some(metro))
    });
    if metro_match {
        return GeographicScope::Local;
    }
    let state_match = location.state.as_deref().is_some_and(|state| {
        comparables
            .iter()
            .any(|record| record.location.parsed.state.as_deref() == Some(state))
    });
    if state_match {
        return GeographicScope::Regional;
    }
    GeographicScope::National
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::parse_location;
    use crate::pricing::models::{ParsedSaleLocation, SaleLocation};
    use std::sync::Mutex;

    type TierResult = Result<Vec<SoldPriceRecord>, ()>;

    /// Scripted source: each tier either yields fixed rows or errors, and
    /// every call is recorded so tests can assert which tiers ran.
    struct ScriptedSource {
        metro: TierResult,
        state: TierResult,
        national: TierResult,
        calls: Mutex<Vec<&'static str>>,
    }

    impl ScriptedSource {
        fn new(metro: TierResult, state: TierResult, national: TierResult) -> Self {
            Self {
                metro,
                state,
                national,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().expect("lock").clone()
        }
    }

    fn tier(result: &TierResult) -> Result<Vec<SoldPriceRecord>, StoreError> {
        result
            .clone()
            .map_err(|_| StoreError::Request("tier offline".into()))
    }

    impl SoldPriceSource for ScriptedSource {
        async fn sold_by_metro(
            &self,
            _category: &str,
            _metro: &str,
            _limit: u32,
        ) -> Result<Vec<SoldPriceRecord>, StoreError> {
            self.calls.lock().expect("lock").push("metro");
            tier(&self.metro)
        }

        async fn sold_by_state(
            &self,
            _category: &str,
            _state: &str,
            _limit: u32,
        ) -> Result<Vec<SoldPriceRecord>, StoreError> {
            self.calls.lock().expect("lock").push("state");
            tier(&self.state)
        }

        async fn sold_by_category(
            &self,
            _category: &str,
            _limit: u32,
        ) -> Result<Vec<SoldPriceRecord>, StoreError> {
            self.calls.lock().expect("lock").push("national");
            tier(&self.national)
        }
    }

    fn record(name: &str, price: f64, days_ago: i64) -> SoldPriceRecord {
        SoldPriceRecord {
            item_name: name.into(),
            category: "Electronics".into(),
            location: SaleLocation {
                raw: None,
                parsed: ParsedSaleLocation {
                    metro: Some("Seattle Metro".into()),
                    state: Some("WA".into()),
                    city: Some("Seattle".into()),
                },
            },
            actual_sold_price: price,
            days_to_sell: Some(5.0),
            condition: "good".into(),
            timestamp: Utc::now() - Duration::days(days_ago),
        }
    }

    fn seattle() -> LocationData {
        parse_location("seattle")
    }

    #[tokio::test]
    async fn metro_volume_short_circuits_later_tiers() {
        let rows: Vec<SoldPriceRecord> = (0..6)
            .map(|i| record(&format!("item-{i}"), 100.0 + i as f64, 10))
            .collect();
        let source = ScriptedSource::new(Ok(rows), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(source.calls(), vec!["metro"]);
        assert_eq!(summary.count, 6);
        assert_eq!(summary.data_freshness, DataFreshness::Recent);
        assert_eq!(summary.geographic_scope, GeographicScope::Local);
    }

    #[tokio::test]
    async fn thin_metro_results_trigger_state_tier() {
        let metro_rows = vec![record("a", 100.0, 10), record("b", 120.0, 12)];
        let state_rows = vec![
            record("c", 140.0, 15),
            record("d", 150.0, 20),
            record("e", 160.0, 25),
        ];
        let source = ScriptedSource::new(Ok(metro_rows), Ok(state_rows), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        // 5 rows after the state tier: the national tier stays untouched
        assert_eq!(source.calls(), vec!["metro", "state"]);
        assert_eq!(summary.count, 5);
    }

    #[tokio::test]
    async fn tier_failures_fall_through_instead_of_aborting() {
        let national_rows = vec![
            record("a", 90.0, 5),
            record("b", 100.0, 6),
            record("c", 110.0, 7),
        ];
        let source = ScriptedSource::new(Err(()), Err(()), Ok(national_rows));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(source.calls(), vec!["metro", "state", "national"]);
        assert_eq!(summary.count, 3);
    }

    #[tokio::test]
    async fn all_tiers_empty_returns_none() {
        let source = ScriptedSource::new(Ok(vec![]), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle()).await;
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn all_tiers_failing_returns_none() {
        let source = ScriptedSource::new(Err(()), Err(()), Err(()));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle()).await;
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn duplicate_rows_across_tiers_are_merged_once() {
        let shared = record("dupe", 100.0, 10);
        let metro_rows = vec![shared.clone(), record("a", 110.0, 11)];
        let state_rows = vec![shared.clone(), record("b", 120.0, 12), record("c", 130.0, 13)];
        let source = ScriptedSource::new(Ok(metro_rows), Ok(state_rows), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(summary.count, 4);
    }

    #[tokio::test]
    async fn stale_majority_falls_back_to_historical_analysis() {
        // two fresh rows, four older than the 90-day window
        let mut rows = vec![record("f1", 100.0, 10), record("f2", 110.0, 20)];
        rows.extend((0..4).map(|i| record(&format!("old-{i}"), 200.0, 120 + i)));
        let source = ScriptedSource::new(Ok(rows), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(summary.data_freshness, DataFreshness::Historical);
        assert_eq!(summary.count, 6);
    }

    #[tokio::test]
    async fn fresh_subset_narrows_the_analysis_set() {
        let mut rows: Vec<SoldPriceRecord> = (0..3)
            .map(|i| record(&format!("fresh-{i}"), 100.0, 10 + i))
            .collect();
        rows.push(record("ancient", 1000.0, 400));
        let source = ScriptedSource::new(Ok(rows), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(summary.data_freshness, DataFreshness::Recent);
        // the 1000-unit outlier sits outside the analysis window
        assert_eq!(summary.count, 3);
        assert_eq!(summary.max, 100);
    }

    #[tokio::test]
    async fn statistics_follow_the_documented_definitions() {
        let rows = vec![
            record("a", 100.0, 5),
            record("b", 150.0, 6),
            record("c", 200.0, 7),
            record("d", 250.0, 8),
        ];
        let source = ScriptedSource::new(Ok(rows), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(summary.avg_price, 175);
        // even-length set: element at index n/2, not the interpolated value
        assert_eq!(summary.median, 200);
        assert_eq!(summary.min, 100);
        assert_eq!(summary.max, 250);
        // population std dev of [100, 150, 200, 250] = sqrt(3125) ~ 55.9
        assert_eq!(summary.std_dev, 56);
        assert_eq!(summary.avg_days_to_sell, Some(5));
    }

    #[tokio::test]
    async fn summary_invariants_hold() {
        let rows = vec![
            record("a", 37.0, 5),
            record("b", 240.0, 6),
            record("c", 58.0, 7),
            record("d", 121.0, 8),
            record("e", 99.0, 9),
        ];
        let source = ScriptedSource::new(Ok(rows), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert!(summary.min <= summary.median && summary.median <= summary.max);
        assert!(summary.min <= summary.avg_price && summary.avg_price <= summary.max);
    }

    #[tokio::test]
    async fn days_to_sell_absent_everywhere_yields_none() {
        let rows: Vec<SoldPriceRecord> = (0..3)
            .map(|i| {
                let mut row = record(&format!("r-{i}"), 100.0, 10);
                row.days_to_sell = None;
                row
            })
            .collect();
        let source = ScriptedSource::new(Ok(rows), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(summary.avg_days_to_sell, None);
    }

    #[tokio::test]
    async fn sample_prefers_city_then_state_then_unknown() {
        let mut with_city = record("a", 100.0, 5);
        let mut state_only = record("b", 110.0, 6);
        state_only.location.parsed.city = None;
        let mut unplaced = record("c", 120.0, 7);
        unplaced.location.parsed.city = None;
        unplaced.location.parsed.state = None;
        unplaced.location.parsed.metro = None;
        with_city.location.parsed.city = Some("Bellevue".into());
        let source =
            ScriptedSource::new(Ok(vec![with_city, state_only, unplaced]), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        let labels: Vec<&str> = summary
            .comparable_items
            .iter()
            .map(|sample| sample.location.as_str())
            .collect();
        assert_eq!(labels, vec!["Bellevue", "WA", "Unknown"]);
        assert!(summary.comparable_items[0].description.contains("(good)"));
    }

    #[tokio::test]
    async fn sample_is_capped_at_five() {
        let rows: Vec<SoldPriceRecord> = (0..9)
            .map(|i| record(&format!("r-{i}"), 100.0 + i as f64, 10))
            .collect();
        let source = ScriptedSource::new(Ok(rows), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(summary.comparable_items.len(), 5);
    }

    #[tokio::test]
    async fn scope_degrades_to_regional_then_national() {
        let mut regional = record("a", 100.0, 5);
        regional.location.parsed.metro = Some("Spokane Metro".into());
        let mut r2 = regional.clone();
        r2.item_name = "b".into();
        let mut r3 = regional.clone();
        r3.item_name = "c".into();
        let source = ScriptedSource::new(Ok(vec![regional, r2, r3]), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(summary.geographic_scope, GeographicScope::Regional);

        let mut national = record("x", 100.0, 5);
        national.location.parsed.metro = Some("Austin Metro".into());
        national.location.parsed.state = Some("TX".into());
        let mut n2 = national.clone();
        n2.item_name = "y".into();
        let mut n3 = national.clone();
        n3.item_name = "z".into();
        let source = ScriptedSource::new(Ok(vec![national, n2, n3]), Ok(vec![]), Ok(vec![]));
        let summary = get_comparable_items(&source, "camera", "Electronics", &seattle())
            .await
            .expect("summary");
        assert_eq!(summary.geographic_scope, GeographicScope::National);
    }

    #[tokio::test]
    async fn no_metro_in_query_skips_the_metro_tier() {
        let rows = vec![
            record("a", 100.0, 5),
            record("b", 110.0, 6),
            record("c", 120.0, 7),
        ];
        let source = ScriptedSource::new(Ok(vec![]), Ok(rows), Ok(vec![]));
        let location = parse_location("relocating to WA soon");
        assert!(location.metro.is_none());
        let summary = get_comparable_items(&source, "camera", "Electronics", &location)
            .await
            .expect("summary");
        assert_eq!(source.calls(), vec!["state"]);
        assert_eq!(summary.geographic_scope, GeographicScope::Regional);
    }
}
