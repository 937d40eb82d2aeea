pub mod blend;
pub mod comparables;
pub mod models;

pub use blend::{blend_pricing, format_pricing_insights};
pub use comparables::get_comparable_items;
pub use models::{ComparableSetSummary, PriceEstimate, PriceRecommendation};
