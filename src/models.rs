use crate::llm::InlineImage;
use crate::location::LocationData;
use crate::pricing::models::{ComparableSetSummary, PriceEstimate, PriceRecommendation};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Request-scoped failure with an input/internal split so handlers can map
/// it onto 400 vs 500 without inspecting message text.
#[derive(Debug, Error)]
#[error("`{scope}` failed: {message}")]
pub struct ServiceError {
    scope: &'static str,
    message: String,
    kind: ServiceErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    InvalidInput,
    Internal,
}

impl ServiceError {
    pub fn invalid_input(scope: &'static str, message: impl Into<String>) -> Self {
        Self {
            scope,
            message: message.into(),
            kind: ServiceErrorKind::InvalidInput,
        }
    }

    pub fn internal(scope: &'static str, message: impl Into<String>) -> Self {
        Self {
            scope,
            message: message.into(),
            kind: ServiceErrorKind::Internal,
        }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub fn kind(&self) -> ServiceErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

/// Input to the pricing analyze flow. Either `ai_estimate` is supplied by
/// the client (an earlier analysis, or a manual override) or the model is
/// asked for one, optionally with photos attached.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalyzeRequest {
    pub item_name: String,
    pub category: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub images: Vec<InlineImage>,
    #[serde(default)]
    pub ai_estimate: Option<PriceEstimate>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalyzeResponse {
    pub analysis_id: String,
    pub recommendation: PriceRecommendation,
    pub comparables: Option<ComparableSetSummary>,
    pub insights: String,
    pub location: LocationSummary,
    pub estimate_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LocationSummary {
    pub description: String,
    pub insight: String,
    pub parsed: LocationData,
}

/// Session context passed explicitly to every call site that attributes a
/// write to a visitor. Carries the opaque session id plus the linked user,
/// if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    /// Coarse classification from the raw User-Agent string. Tablets are
    /// checked first because their UAs usually also carry mobile markers.
    pub fn from_user_agent(ua: &str) -> Self {
        let ua = ua.to_lowercase();
        let tablet_markers = ["tablet", "ipad", "playbook", "silk"];
        if tablet_markers.iter().any(|marker| ua.contains(marker))
            || (ua.contains("android") && !ua.contains("mobi"))
        {
            return DeviceClass::Tablet;
        }
        let mobile_markers = [
            "mobi",
            "android",
            "iphone",
            "ipod",
            "iemobile",
            "blackberry",
            "kindle",
            "opera mini",
            "webos",
        ];
        if mobile_markers.iter().any(|marker| ua.contains(marker)) {
            return DeviceClass::Mobile;
        }
        DeviceClass::Desktop
    }
}

/// Which point of the recommended range a seller published at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePoint {
    Min,
    Optimal,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

/// Contribution tier from the number of listings a user has added.
pub fn calculate_tier(listings_added: u32) -> UserTier {
    if listings_added >= 25 {
        UserTier::Platinum
    } else if listings_added >= 10 {
        UserTier::Gold
    } else if listings_added >= 3 {
        UserTier::Silver
    } else {
        UserTier::Bronze
    }
}

pub fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_class_covers_the_big_three() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148";
        assert_eq!(DeviceClass::from_user_agent(iphone), DeviceClass::Mobile);
        let ipad = "Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X)";
        assert_eq!(DeviceClass::from_user_agent(ipad), DeviceClass::Tablet);
        let android_tablet = "Mozilla/5.0 (Linux; Android 13; SM-X200)";
        assert_eq!(
            DeviceClass::from_user_agent(android_tablet),
            DeviceClass::Tablet
        );
        let android_phone = "Mozilla/5.0 (Linux; Android 13; Pixel 7) Mobile";
        assert_eq!(
            DeviceClass::from_user_agent(android_phone),
            DeviceClass::Mobile
        );
        let chrome = "Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0";
        assert_eq!(DeviceClass::from_user_agent(chrome), DeviceClass::Desktop);
    }

    #[test]
    fn tier_thresholds() {
        assert_eq!(calculate_tier(0), UserTier::Bronze);
        assert_eq!(calculate_tier(2), UserTier::Bronze);
        assert_eq!(calculate_tier(3), UserTier::Silver);
        assert_eq!(calculate_tier(10), UserTier::Gold);
        assert_eq!(calculate_tier(25), UserTier::Platinum);
        assert_eq!(calculate_tier(400), UserTier::Platinum);
    }

    #[test]
    fn rounding_helpers() {
        assert_eq!(round_one(7.25), 7.3);
        assert_eq!(round_two(0.666_666), 0.67);
    }
}
