//! ZIP/city/state lookup tables and the location parser that feeds the
//! comparable-sales cascade and regional pricing adjustments.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Demand {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
}

/// Parsed location for the querying side. Distinct from the
/// `location.parsed` shape stored on sold-price documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationData {
    pub city: Option<String>,
    pub state: Option<String>,
    pub metro: Option<String>,
    pub zip_code: Option<String>,
    pub multiplier: f64,
    pub demand: Demand,
    pub confidence: MatchConfidence,
}

impl LocationData {
    fn baseline() -> Self {
        Self {
            city: None,
            state: None,
            metro: None,
            zip_code: None,
            multiplier: 1.00,
            demand: Demand::Medium,
            confidence: MatchConfidence::Low,
        }
    }
}

struct ZipEntry {
    zip: &'static str,
    city: &'static str,
    state: &'static str,
    metro: &'static str,
    multiplier: f64,
    demand: Demand,
}

struct CityEntry {
    name: &'static str,
    state: &'static str,
    metro: &'static str,
    multiplier: f64,
    demand: Demand,
}

const ZIP_TABLE: &[ZipEntry] = &[
    ZipEntry { zip: "10001", city: "New York", state: "NY", metro: "NYC Metro", multiplier: 1.25, demand: Demand::High },
    ZipEntry { zip: "10002", city: "New York", state: "NY", metro: "NYC Metro", multiplier: 1.25, demand: Demand::High },
    ZipEntry { zip: "10003", city: "New York", state: "NY", metro: "NYC Metro", multiplier: 1.25, demand: Demand::High },
    ZipEntry { zip: "11201", city: "Brooklyn", state: "NY", metro: "NYC Metro", multiplier: 1.22, demand: Demand::High },
    ZipEntry { zip: "11101", city: "Queens", state: "NY", metro: "NYC Metro", multiplier: 1.20, demand: Demand::High },
    ZipEntry { zip: "94102", city: "San Francisco", state: "CA", metro: "SF Bay Area", multiplier: 1.28, demand: Demand::High },
    ZipEntry { zip: "94103", city: "San Francisco", state: "CA", metro: "SF Bay Area", multiplier: 1.28, demand: Demand::High },
    ZipEntry { zip: "94104", city: "San Francisco", state: "CA", metro: "SF Bay Area", multiplier: 1.28, demand: Demand::High },
    ZipEntry { zip: "94301", city: "Palo Alto", state: "CA", metro: "SF Bay Area", multiplier: 1.30, demand: Demand::High },
    ZipEntry { zip: "94025", city: "Menlo Park", state: "CA", metro: "SF Bay Area", multiplier: 1.30, demand: Demand::High },
    ZipEntry { zip: "94041", city: "Mountain View", state: "CA", metro: "SF Bay Area", multiplier: 1.27, demand: Demand::High },
    ZipEntry { zip: "94043", city: "Mountain View", state: "CA", metro: "SF Bay Area", multiplier: 1.27, demand: Demand::High },
    ZipEntry { zip: "95054", city: "Santa Clara", state: "CA", metro: "SF Bay Area", multiplier: 1.25, demand: Demand::High },
    ZipEntry { zip: "94085", city: "Sunnyvale", state: "CA", metro: "SF Bay Area", multiplier: 1.25, demand: Demand::High },
    ZipEntry { zip: "94087", city: "Sunnyvale", state: "CA", metro: "SF Bay Area", multiplier: 1.25, demand: Demand::High },
    ZipEntry { zip: "94089", city: "Sunnyvale", state: "CA", metro: "SF Bay Area", multiplier: 1.25, demand: Demand::High },
    ZipEntry { zip: "94501", city: "Alameda", state: "CA", metro: "SF Bay Area", multiplier: 1.18, demand: Demand::High },
    ZipEntry { zip: "94601", city: "Oakland", state: "CA", metro: "SF Bay Area", multiplier: 1.15, demand: Demand::High },
    ZipEntry { zip: "90001", city: "Los Angeles", state: "CA", metro: "LA Metro", multiplier: 1.20, demand: Demand::High },
    ZipEntry { zip: "90012", city: "Los Angeles", state: "CA", metro: "LA Metro", multiplier: 1.20, demand: Demand::High },
    ZipEntry { zip: "90028", city: "Los Angeles", state: "CA", metro: "LA Metro", multiplier: 1.22, demand: Demand::High },
    ZipEntry { zip: "90210", city: "Beverly Hills", state: "CA", metro: "LA Metro", multiplier: 1.35, demand: Demand::High },
    ZipEntry { zip: "90291", city: "Venice", state: "CA", metro: "LA Metro", multiplier: 1.25, demand: Demand::High },
    ZipEntry { zip: "90401", city: "Santa Monica", state: "CA", metro: "LA Metro", multiplier: 1.27, demand: Demand::High },
    ZipEntry { zip: "98101", city: "Seattle", state: "WA", metro: "Seattle Metro", multiplier: 1.22, demand: Demand::High },
    ZipEntry { zip: "98102", city: "Seattle", state: "WA", metro: "Seattle Metro", multiplier: 1.22, demand: Demand::High },
    ZipEntry { zip: "98103", city: "Seattle", state: "WA", metro: "Seattle Metro", multiplier: 1.20, demand: Demand::High },
    ZipEntry { zip: "98004", city: "Bellevue", state: "WA", metro: "Seattle Metro", multiplier: 1.23, demand: Demand::High },
    ZipEntry { zip: "98052", city: "Redmond", state: "WA", metro: "Seattle Metro", multiplier: 1.21, demand: Demand::High },
    ZipEntry { zip: "02108", city: "Boston", state: "MA", metro: "Boston Metro", multiplier: 1.20, demand: Demand::High },
    ZipEntry { zip: "02109", city: "Boston", state: "MA", metro: "Boston Metro", multiplier: 1.20, demand: Demand::High },
    ZipEntry { zip: "02138", city: "Cambridge", state: "MA", metro: "Boston Metro", multiplier: 1.22, demand: Demand::High },
    ZipEntry { zip: "02139", city: "Cambridge", state: "MA", metro: "Boston Metro", multiplier: 1.22, demand: Demand::High },
    ZipEntry { zip: "20001", city: "Washington", state: "DC", metro: "DC Metro", multiplier: 1.18, demand: Demand::High },
    ZipEntry { zip: "20002", city: "Washington", state: "DC", metro: "DC Metro", multiplier: 1.18, demand: Demand::High },
    ZipEntry { zip: "22201", city: "Arlington", state: "VA", metro: "DC Metro", multiplier: 1.17, demand: Demand::High },
    ZipEntry { zip: "60601", city: "Chicago", state: "IL", metro: "Chicago Metro", multiplier: 1.12, demand: Demand::High },
    ZipEntry { zip: "60602", city: "Chicago", state: "IL", metro: "Chicago Metro", multiplier: 1.12, demand: Demand::High },
    ZipEntry { zip: "78701", city: "Austin", state: "TX", metro: "Austin Metro", multiplier: 1.10, demand: Demand::High },
    ZipEntry { zip: "78702", city: "Austin", state: "TX", metro: "Austin Metro", multiplier: 1.10, demand: Demand::High },
    ZipEntry { zip: "80201", city: "Denver", state: "CO", metro: "Denver Metro", multiplier: 1.10, demand: Demand::High },
    ZipEntry { zip: "80202", city: "Denver", state: "CO", metro: "Denver Metro", multiplier: 1.10, demand: Demand::High },
    ZipEntry { zip: "33101", city: "Miami", state: "FL", metro: "Miami Metro", multiplier: 1.08, demand: Demand::Medium },
    ZipEntry { zip: "33109", city: "Miami Beach", state: "FL", metro: "Miami Metro", multiplier: 1.15, demand: Demand::Medium },
    ZipEntry { zip: "97201", city: "Portland", state: "OR", metro: "Portland Metro", multiplier: 1.08, demand: Demand::Medium },
    ZipEntry { zip: "85001", city: "Phoenix", state: "AZ", metro: "Phoenix Metro", multiplier: 1.00, demand: Demand::Medium },
    ZipEntry { zip: "75201", city: "Dallas", state: "TX", metro: "Dallas Metro", multiplier: 1.02, demand: Demand::Medium },
    ZipEntry { zip: "77001", city: "Houston", state: "TX", metro: "Houston Metro", multiplier: 1.00, demand: Demand::Medium },
    ZipEntry { zip: "19101", city: "Philadelphia", state: "PA", metro: "Philadelphia Metro", multiplier: 1.05, demand: Demand::Medium },
    ZipEntry { zip: "92101", city: "San Diego", state: "CA", metro: "San Diego Metro", multiplier: 1.12, demand: Demand::Medium },
    ZipEntry { zip: "30301", city: "Atlanta", state: "GA", metro: "Atlanta Metro", multiplier: 1.02, demand: Demand::Medium },
    ZipEntry { zip: "37201", city: "Nashville", state: "TN", metro: "Nashville Metro", multiplier: 1.03, demand: Demand::Medium },
    ZipEntry { zip: "27601", city: "Raleigh", state: "NC", metro: "Raleigh Metro", multiplier: 1.02, demand: Demand::Medium },
    ZipEntry { zip: "84101", city: "Salt Lake City", state: "UT", metro: "Salt Lake Metro", multiplier: 1.00, demand: Demand::Medium },
];

const CITY_TABLE: &[CityEntry] = &[
    CityEntry { name: "new york", state: "NY", metro: "NYC Metro", multiplier: 1.25, demand: Demand::High },
    CityEntry { name: "nyc", state: "NY", metro: "NYC Metro", multiplier: 1.25, demand: Demand::High },
    CityEntry { name: "manhattan", state: "NY", metro: "NYC Metro", multiplier: 1.25, demand: Demand::High },
    CityEntry { name: "brooklyn", state: "NY", metro: "NYC Metro", multiplier: 1.22, demand: Demand::High },
    CityEntry { name: "queens", state: "NY", metro: "NYC Metro", multiplier: 1.20, demand: Demand::High },
    CityEntry { name: "san francisco", state: "CA", metro: "SF Bay Area", multiplier: 1.28, demand: Demand::High },
    CityEntry { name: "palo alto", state: "CA", metro: "SF Bay Area", multiplier: 1.30, demand: Demand::High },
    CityEntry { name: "mountain view", state: "CA", metro: "SF Bay Area", multiplier: 1.27, demand: Demand::High },
    CityEntry { name: "oakland", state: "CA", metro: "SF Bay Area", multiplier: 1.15, demand: Demand::High },
    CityEntry { name: "san jose", state: "CA", metro: "SF Bay Area", multiplier: 1.25, demand: Demand::High },
    CityEntry { name: "los angeles", state: "CA", metro: "LA Metro", multiplier: 1.20, demand: Demand::High },
    CityEntry { name: "beverly hills", state: "CA", metro: "LA Metro", multiplier: 1.35, demand: Demand::High },
    CityEntry { name: "santa monica", state: "CA", metro: "LA Metro", multiplier: 1.27, demand: Demand::High },
    CityEntry { name: "venice", state: "CA", metro: "LA Metro", multiplier: 1.25, demand: Demand::High },
    CityEntry { name: "seattle", state: "WA", metro: "Seattle Metro", multiplier: 1.22, demand: Demand::High },
    CityEntry { name: "bellevue", state: "WA", metro: "Seattle Metro", multiplier: 1.23, demand: Demand::High },
    CityEntry { name: "redmond", state: "WA", metro: "Seattle Metro", multiplier: 1.21, demand: Demand::High },
    CityEntry { name: "boston", state: "MA", metro: "Boston Metro", multiplier: 1.20, demand: Demand::High },
    CityEntry { name: "cambridge", state: "MA", metro: "Boston Metro", multiplier: 1.22, demand: Demand::High },
    CityEntry { name: "washington", state: "DC", metro: "DC Metro", multiplier: 1.18, demand: Demand::High },
    CityEntry { name: "arlington", state: "VA", metro: "DC Metro", multiplier: 1.17, demand: Demand::High },
    CityEntry { name: "chicago", state: "IL", metro: "Chicago Metro", multiplier: 1.12, demand: Demand::High },
    CityEntry { name: "austin", state: "TX", metro: "Austin Metro", multiplier: 1.10, demand: Demand::High },
    CityEntry { name: "denver", state: "CO", metro: "Denver Metro", multiplier: 1.10, demand: Demand::High },
    CityEntry { name: "miami", state: "FL", metro: "Miami Metro", multiplier: 1.08, demand: Demand::Medium },
    CityEntry { name: "portland", state: "OR", metro: "Portland Metro", multiplier: 1.08, demand: Demand::Medium },
    CityEntry { name: "phoenix", state: "AZ", metro: "Phoenix Metro", multiplier: 1.00, demand: Demand::Medium },
    CityEntry { name: "dallas", state: "TX", metro: "Dallas Metro", multiplier: 1.02, demand: Demand::Medium },
    CityEntry { name: "houston", state: "TX", metro: "Houston Metro", multiplier: 1.00, demand: Demand::Medium },
    CityEntry { name: "philadelphia", state: "PA", metro: "Philadelphia Metro", multiplier: 1.05, demand: Demand::Medium },
    CityEntry { name: "philly", state: "PA", metro: "Philadelphia Metro", multiplier: 1.05, demand: Demand::Medium },
    CityEntry { name: "san diego", state: "CA", metro: "San Diego Metro", multiplier: 1.12, demand: Demand::Medium },
    CityEntry { name: "atlanta", state: "GA", metro: "Atlanta Metro", multiplier: 1.02, demand: Demand::Medium },
    CityEntry { name: "nashville", state: "TN", metro: "Nashville Metro", multiplier: 1.03, demand: Demand::Medium },
    CityEntry { name: "raleigh", state: "NC", metro: "Raleigh Metro", multiplier: 1.02, demand: Demand::Medium },
    CityEntry { name: "salt lake city", state: "UT", metro: "Salt Lake Metro", multiplier: 1.00, demand: Demand::Medium },
];

const STATE_MULTIPLIERS: &[(&str, f64)] = &[
    ("NY", 1.15), ("CA", 1.18), ("MA", 1.12), ("WA", 1.10), ("DC", 1.15),
    ("IL", 1.05), ("TX", 1.00), ("CO", 1.05), ("FL", 1.00), ("OR", 1.03),
    ("AZ", 0.95), ("PA", 1.00), ("GA", 0.98), ("TN", 0.95), ("NC", 0.95),
    ("UT", 0.95), ("AL", 0.90), ("AR", 0.88), ("ID", 0.90), ("IN", 0.92),
    ("IA", 0.90), ("KS", 0.90), ("KY", 0.90), ("LA", 0.92), ("ME", 0.95),
    ("MI", 0.95), ("MN", 1.00), ("MS", 0.85), ("MO", 0.92), ("MT", 0.92),
    ("NE", 0.90), ("NV", 1.00), ("NH", 1.05), ("NJ", 1.10), ("NM", 0.90),
    ("ND", 0.90), ("OH", 0.95), ("OK", 0.88), ("RI", 1.05), ("SC", 0.92),
    ("SD", 0.88), ("VT", 1.00), ("VA", 1.05), ("WV", 0.85), ("WI", 0.95),
    ("WY", 0.90),
];

/// Parse free-form location text into metro/state/city plus a regional
/// pricing multiplier. Match order: ZIP, then city name, then a two-letter
/// state token. Always returns a usable value; unmatched input falls back
/// to the national baseline.
pub fn parse_location(location_text: &str) -> LocationData {
    let text = location_text.trim().to_lowercase();
    if text.is_empty() {
        return LocationData::baseline();
    }

    if let Some(zip) = first_zip_token(&text)
        && let Some(entry) = ZIP_TABLE.iter().find(|e| e.zip == zip)
    {
        return LocationData {
            city: Some(entry.city.to_string()),
            state: Some(entry.state.to_string()),
            metro: Some(entry.metro.to_string()),
            zip_code: Some(zip),
            multiplier: entry.multiplier,
            demand: entry.demand,
            confidence: MatchConfidence::High,
        };
    }

    if let Some(entry) = CITY_TABLE.iter().find(|e| text.contains(e.name)) {
        return LocationData {
            city: Some(title_case(entry.name)),
            state: Some(entry.state.to_string()),
            metro: Some(entry.metro.to_string()),
            zip_code: None,
            multiplier: entry.multiplier,
            demand: entry.demand,
            confidence: MatchConfidence::Medium,
        };
    }

    if let Some((state, multiplier)) = first_state_token(&text) {
        return LocationData {
            city: None,
            state: Some(state),
            metro: None,
            zip_code: None,
            multiplier,
            demand: Demand::Medium,
            confidence: MatchConfidence::Low,
        };
    }

    LocationData::baseline()
}

fn first_zip_token(text: &str) -> Option<String> {
    text.split(|ch: char| !ch.is_ascii_digit())
        .find(|run| run.len() == 5)
        .map(|run| run.to_string())
}

fn first_state_token(text: &str) -> Option<(String, f64)> {
    text.split(|ch: char| !ch.is_ascii_alphabetic())
        .filter(|token| token.len() == 2)
        .find_map(|token| {
            let code = token.to_uppercase();
            STATE_MULTIPLIERS
                .iter()
                .find(|(state, _)| *state == code)
                .map(|(_, multiplier)| (code.clone(), *multiplier))
        })
}

fn title_case(name: &str) -> String {
    name.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable label for a parsed location.
pub fn location_description(location: &LocationData) -> String {
    match (&location.city, &location.state, &location.metro) {
        (Some(city), Some(state), _) => format!("{city}, {state}"),
        (None, Some(state), _) => state.clone(),
        (None, None, Some(metro)) => metro.clone(),
        _ => "General Market".to_string(),
    }
}

/// One-line explanation of how the region shifts pricing.
pub fn location_pricing_insight(location: &LocationData) -> String {
    let label = location_description(location);
    if location.multiplier >= 1.20 {
        format!("{label} is a premium market. Prices typically 20-30% higher than national average.")
    } else if location.multiplier >= 1.10 {
        format!("{label} has above-average demand. Prices run 10-20% higher than typical markets.")
    } else if location.multiplier >= 1.00 {
        format!("{label} has average market conditions. Standard pricing applies.")
    } else {
        format!("{label} is a value market. Prices tend to be 10-15% below major metros.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_match_wins_and_is_high_confidence() {
        let parsed = parse_location("moving sale near 94103!");
        assert_eq!(parsed.metro.as_deref(), Some("SF Bay Area"));
        assert_eq!(parsed.city.as_deref(), Some("San Francisco"));
        assert_eq!(parsed.zip_code.as_deref(), Some("94103"));
        assert_eq!(parsed.confidence, MatchConfidence::High);
        assert_eq!(parsed.multiplier, 1.28);
    }

    #[test]
    fn city_substring_match() {
        let parsed = parse_location("Downtown Seattle, near the market");
        assert_eq!(parsed.metro.as_deref(), Some("Seattle Metro"));
        assert_eq!(parsed.state.as_deref(), Some("WA"));
        assert_eq!(parsed.confidence, MatchConfidence::Medium);
    }

    #[test]
    fn state_token_fallback() {
        let parsed = parse_location("relocating to TX soon");
        assert_eq!(parsed.state.as_deref(), Some("TX"));
        assert!(parsed.metro.is_none());
        assert_eq!(parsed.multiplier, 1.00);
        assert_eq!(parsed.confidence, MatchConfidence::Low);
    }

    #[test]
    fn unknown_input_is_baseline_not_error() {
        let parsed = parse_location("the moon");
        assert!(parsed.city.is_none());
        assert!(parsed.state.is_none());
        assert_eq!(parsed.multiplier, 1.00);
        assert_eq!(parsed.confidence, MatchConfidence::Low);
        assert_eq!(location_description(&parsed), "General Market");
    }

    #[test]
    fn empty_input_is_baseline() {
        let parsed = parse_location("   ");
        assert!(parsed.zip_code.is_none());
        assert_eq!(parsed.multiplier, 1.00);
    }

    #[test]
    fn pricing_insight_tiers() {
        let premium = parse_location("90210");
        assert!(location_pricing_insight(&premium).contains("premium market"));
        let above = parse_location("chicago");
        assert!(location_pricing_insight(&above).contains("above-average demand"));
        let average = parse_location("houston");
        assert!(location_pricing_insight(&average).contains("average market conditions"));
        let value = parse_location("OK");
        assert!(location_pricing_insight(&value).contains("value market"));
    }

    #[test]
    fn description_prefers_city_state() {
        let parsed = parse_location("cambridge ma");
        assert_eq!(location_description(&parsed), "Cambridge, MA");
    }
}
