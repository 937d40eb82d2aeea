use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// One row of the proprietary sold-price dataset, read-only from this
/// service's perspective. Field names match the `soldPrices` collection.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoldPriceRecord {
    pub item_name: String,
    pub category: String,
    #[serde(default)]
    pub location: SaleLocation,
    pub actual_sold_price: f64,
    #[serde(default)]
    pub days_to_sell: Option<f64>,
    pub condition: String,
    pub timestamp: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaleLocation {
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub parsed: ParsedSaleLocation,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedSaleLocation {
    #[serde(default)]
    pub metro: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFreshness {
    Recent,
    Historical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographicScope {
    Local,
    Regional,
    National,
}

/// Display-ready slice of one comparable sale.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ComparableSample {
    pub description: String,
    pub sold_price: i64,
    pub location: String,
    pub days_to_sell: Option<i64>,
}

/// Derived, never-persisted aggregate over a set of comparable sales.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ComparableSetSummary {
    pub count: usize,
    pub avg_price: i64,
    pub median: i64,
    pub min: i64,
    pub max: i64,
    pub std_dev: i64,
    pub avg_days_to_sell: Option<i64>,
    pub comparable_items: Vec<ComparableSample>,
    pub data_freshness: DataFreshness,
    pub geographic_scope: GeographicScope,
}

/// A `{min, optimal, max}` price triple in whole currency units, as supplied
/// by the model (or a client override) before blending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEstimate {
    pub min: i64,
    pub optimal: i64,
    pub max: i64,
}

impl PriceEstimate {
    /// Reorder the triple so `min <= optimal <= max` holds regardless of
    /// what the model or a client override handed us.
    pub fn normalized(self) -> Self {
        let mut values = [self.min, self.optimal, self.max];
        values.sort_unstable();
        Self {
            min: values[0],
            optimal: values[1],
            max: values[2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceDataSource {
    #[serde(rename = "AI_only")]
    AiOnly,
    #[serde(rename = "hybrid_AI_plus_database")]
    HybridAiPlusDatabase,
}

/// Final recommendation handed to the UI: a range, a confidence score, and
/// provenance metadata describing how it was produced.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PriceRecommendation {
    pub min: i64,
    pub optimal: i64,
    pub max: i64,
    pub data_source: PriceDataSource,
    pub confidence_score: u8,
    pub data_count: Option<usize>,
    pub geographic_scope: Option<GeographicScope>,
    pub avg_days_to_sell: Option<i64>,
}
