//! Finalized listing persistence plus the field mapping for publishing to
//! Facebook Marketplace.

use crate::firestore::StoreError;
use crate::models::PricePoint;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_with::skip_serializing_none;
use tracing::{info, warn};

const MARKETPLACE_TITLE_LIMIT: usize = 100;
const MARKETPLACE_TIP_LIMIT: usize = 3;
const DEFAULT_LIST_LIMIT: u32 = 50;

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemIdentification {
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub observed_condition: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingStrategy {
    pub listing_price: f64,
    #[serde(default)]
    pub price_point: Option<PricePoint>,
}

/// A finalized listing document in the `listings` collection. Mutated only
/// through view/share counter bumps and explicit updates.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub user_id: String,
    pub item_identification: ItemIdentification,
    pub pricing_strategy: PricingStrategy,
    #[serde(default)]
    pub optimization_tips: Vec<String>,
    #[serde(default)]
    pub additional_details: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub is_public: bool,
    #[serde(default)]
    pub view_count: u32,
    #[serde(default)]
    pub share_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_viewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_shared_at: Option<DateTime<Utc>>,
}

/// Client-supplied listing payload before ids and counters are attached.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListingDraft {
    pub item_identification: ItemIdentification,
    pub pricing_strategy: PricingStrategy,
    #[serde(default)]
    pub optimization_tips: Vec<String>,
    #[serde(default)]
    pub additional_details: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Listing fields shaped for Facebook Marketplace's posting form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MarketplaceListing {
    pub title: String,
    pub description: String,
    pub price: i64,
    pub category: String,
    pub condition: String,
    pub location: String,
}

pub trait ListingStore {
    async fn put_listing(&self, listing: &Listing) -> Result<(), StoreError>;
    async fn fetch_listing(&self, listing_id: &str) -> Result<Option<Listing>, StoreError>;
    async fn listings_for_user(&self, user_id: &str, limit: u32)
    -> Result<Vec<Listing>, StoreError>;
    async fn patch_listing(&self, listing_id: &str, fields: &Value) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct ListingStorage<S> {
    store: S,
}

impl<S: ListingStore> ListingStorage<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Persist a finalized listing. The primary write surfaces its failure;
    /// the caller decides how to present it.
    pub async fn save_listing(
        &self,
        draft: ListingDraft,
        user_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let now = Utc::now();
        let listing = Listing {
            id: generate_listing_id(),
            user_id: user_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .unwrap_or("guest")
                .to_string(),
            item_identification: draft.item_identification,
            pricing_strategy: draft.pricing_strategy,
            optimization_tips: draft.optimization_tips,
            additional_details: draft.additional_details,
            images: draft.images,
            location: draft.location,
            is_public: true,
            view_count: 0,
            share_count: 0,
            created_at: now,
            updated_at: now,
            last_viewed_at: None,
            last_shared_at: None,
        };
        self.store.put_listing(&listing).await?;
        info!(
            target = "pricelens.listing",
            listing_id = %listing.id,
            user_id = %listing.user_id,
            "listing_saved"
        );
        Ok(listing.id)
    }

    /// Public fetch. Bumps the view counter as a best-effort side write.
    pub async fn get_listing(&self, listing_id: &str) -> Option<Listing> {
        let listing = match self.store.fetch_listing(listing_id).await {
            Ok(Some(listing)) => listing,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    target = "pricelens.listing",
                    listing_id,
                    error = %err,
                    "listing_fetch_failed"
                );
                return None;
            }
        };

        let bump = json!({
            "viewCount": listing.view_count + 1,
            "lastViewedAt": Utc::now(),
        });
        if let Err(err) = self.store.patch_listing(listing_id, &bump).await {
            warn!(
                target = "pricelens.listing",
                listing_id,
                error = %err,
                "view_count_update_failed"
            );
        }
        Some(listing)
    }

    /// All listings owned by a user, newest first. Fail-soft empty.
    pub async fn get_all_listings(&self, user_id: &str, max_results: Option<u32>) -> Vec<Listing> {
        let limit = max_results.unwrap_or(DEFAULT_LIST_LIMIT);
        match self.store.listings_for_user(user_id, limit).await {
            Ok(listings) => listings,
            Err(err) => {
                warn!(
                    target = "pricelens.listing",
                    user_id,
                    error = %err,
                    "listing_query_failed"
                );
                Vec::new()
            }
        }
    }

    /// Merge arbitrary updates into a listing, stamping `updatedAt`.
    pub async fn update_listing(&self, listing_id: &str, updates: Value) -> bool {
        let mut fields = match updates {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        fields.insert("updatedAt".into(), json!(Utc::now()));
        match self
            .store
            .patch_listing(listing_id, &Value::Object(fields))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = "pricelens.listing",
                    listing_id,
                    error = %err,
                    "listing_update_failed"
                );
                false
            }
        }
    }

    /// Bump the share counter. Returns false when the listing is missing or
    /// the store is unreachable.
    pub async fn increment_share_count(&self, listing_id: &str) -> bool {
        let listing = match self.store.fetch_listing(listing_id).await {
            Ok(Some(listing)) => listing,
            Ok(None) => return false,
            Err(err) => {
                warn!(
                    target = "pricelens.listing",
                    listing_id,
                    error = %err,
                    "share_count_fetch_failed"
                );
                return false;
            }
        };
        let bump = json!({
            "shareCount": listing.share_count + 1,
            "lastSharedAt": Utc::now(),
        });
        match self.store.patch_listing(listing_id, &bump).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = "pricelens.listing",
                    listing_id,
                    error = %err,
                    "share_count_update_failed"
                );
                false
            }
        }
    }
}

/// Millisecond timestamp plus a short random suffix.
pub fn generate_listing_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}

/// Shape a listing for Facebook Marketplace: truncated title, a composed
/// description with up to three tips, a whole-unit price, and the platform's
/// condition vocabulary.
pub fn format_for_marketplace(listing: &Listing) -> MarketplaceListing {
    let item = &listing.item_identification;
    let title: String = item.name.chars().take(MARKETPLACE_TITLE_LIMIT).collect();

    let mut description = String::new();
    let condition = item.observed_condition.as_deref().unwrap_or("good");
    match &item.brand {
        Some(brand) => {
            description.push_str(&format!("{condition} condition {brand} {}.", item.name))
        }
        None => description.push_str(&format!("{condition} condition {}.", item.name)),
    }
    let tips: Vec<String> = listing
        .optimization_tips
        .iter()
        .take(MARKETPLACE_TIP_LIMIT)
        .map(|tip| format!("\u{2713} {tip}"))
        .collect();
    if !tips.is_empty() {
        description.push_str("\n\n");
        description.push_str(&tips.join("\n"));
    }
    if let Some(details) = listing
        .additional_details
        .as_deref()
        .filter(|details| !details.trim().is_empty())
    {
        description.push_str("\n\n");
        description.push_str(details.trim());
    }
    description.push_str("\n\nPriced using AI market analysis for optimal sell-through.");

    MarketplaceListing {
        title,
        description,
        price: listing.pricing_strategy.listing_price.round() as i64,
        category: item.category.clone().unwrap_or_default(),
        condition: map_condition_to_marketplace(item.observed_condition.as_deref()),
        location: listing.location.clone().unwrap_or_default(),
    }
}

fn map_condition_to_marketplace(condition: Option<&str>) -> String {
    match condition.map(|c| c.trim().to_lowercase()).as_deref() {
        Some("excellent") => "new",
        Some("good") => "used_like_new",
        Some("fair") => "used_good",
        Some("poor") => "used_fair",
        _ => "used_good",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryListings {
        records: Mutex<HashMap<String, Listing>>,
        patches: Mutex<Vec<(String, Value)>>,
        fail_writes: bool,
        fail_reads: bool,
    }

    impl ListingStore for MemoryListings {
        async fn put_listing(&self, listing: &Listing) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Request("store offline".into()));
            }
            self.records
                .lock()
                .expect("lock")
                .insert(listing.id.clone(), listing.clone());
            Ok(())
        }

        async fn fetch_listing(&self, listing_id: &str) -> Result<Option<Listing>, StoreError> {
            if self.fail_reads {
                return Err(StoreError::Request("store offline".into()));
            }
            Ok(self.records.lock().expect("lock").get(listing_id).cloned())
        }

        async fn listings_for_user(
            &self,
            user_id: &str,
            limit: u32,
        ) -> Result<Vec<Listing>, StoreError> {
            if self.fail_reads {
                return Err(StoreError::Request("store offline".into()));
            }
            let mut listings: Vec<Listing> = self
                .records
                .lock()
                .expect("lock")
                .values()
                .filter(|listing| listing.user_id == user_id)
                .cloned()
                .collect();
            listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            listings.truncate(limit as usize);
            Ok(listings)
        }

        async fn patch_listing(&self, listing_id: &str, fields: &Value) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Request("store offline".into()));
            }
            self.patches
                .lock()
                .expect("lock")
                .push((listing_id.to_string(), fields.clone()));
            Ok(())
        }
    }

    fn draft(name: &str) -> ListingDraft {
        ListingDraft {
            item_identification: ItemIdentification {
                name: name.into(),
                brand: Some("Acme".into()),
                category: Some("Electronics".into()),
                observed_condition: Some("good".into()),
            },
            pricing_strategy: PricingStrategy {
                listing_price: 149.6,
                price_point: Some(PricePoint::Optimal),
            },
            optimization_tips: vec![
                "Photograph in daylight".into(),
                "Mention the original box".into(),
                "List on a weekend".into(),
                "A fourth tip that gets dropped".into(),
            ],
            additional_details: Some("Includes charger.".into()),
            images: vec!["https://example.com/a.jpg".into()],
            location: Some("Seattle, WA".into()),
        }
    }

    fn stored_listing() -> Listing {
        let now = Utc::now();
        Listing {
            id: "123-abc".into(),
            user_id: "guest".into(),
            item_identification: ItemIdentification {
                name: "Noise-cancelling headphones".into(),
                brand: Some("Acme".into()),
                category: Some("Electronics".into()),
                observed_condition: Some("good".into()),
            },
            pricing_strategy: PricingStrategy {
                listing_price: 149.6,
                price_point: None,
            },
            optimization_tips: vec!["Tip one".into(), "Tip two".into()],
            additional_details: None,
            images: vec![],
            location: Some("Seattle, WA".into()),
            is_public: true,
            view_count: 2,
            share_count: 0,
            created_at: now,
            updated_at: now,
            last_viewed_at: None,
            last_shared_at: None,
        }
    }

    #[test]
    fn listing_ids_look_right_and_differ() {
        let first = generate_listing_id();
        let second = generate_listing_id();
        assert_ne!(first, second);
        let (millis, suffix) = first.split_once('-').expect("dash");
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 9);
    }

    #[tokio::test]
    async fn save_then_fetch_round_trip() {
        let storage = ListingStorage::new(MemoryListings::default());
        let id = storage
            .save_listing(draft("Headphones"), Some("user-1"))
            .await
            .expect("save");
        let listing = storage.get_listing(&id).await.expect("present");
        assert_eq!(listing.user_id, "user-1");
        assert!(listing.is_public);
        assert_eq!(listing.view_count, 0);
    }

    #[tokio::test]
    async fn save_defaults_to_guest_owner() {
        let storage = ListingStorage::new(MemoryListings::default());
        let id = storage
            .save_listing(draft("Headphones"), None)
            .await
            .expect("save");
        let listing = storage.get_listing(&id).await.expect("present");
        assert_eq!(listing.user_id, "guest");
    }

    #[tokio::test]
    async fn save_surfaces_store_failure() {
        let storage = ListingStorage::new(MemoryListings {
            fail_writes: true,
            ..Default::default()
        });
        assert!(storage.save_listing(draft("Headphones"), None).await.is_err());
    }

    #[tokio::test]
    async fn fetch_bumps_view_counter_best_effort() {
        let storage = ListingStorage::new(MemoryListings::default());
        storage
            .store
            .put_listing(&stored_listing())
            .await
            .expect("seed");
        let listing = storage.get_listing("123-abc").await.expect("present");
        assert_eq!(listing.view_count, 2);
        let patches = storage.store.patches.lock().expect("lock");
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].1["viewCount"], serde_json::json!(3));
    }

    #[tokio::test]
    async fn fetch_missing_or_offline_is_none() {
        let storage = ListingStorage::new(MemoryListings::default());
        assert!(storage.get_listing("nope").await.is_none());
        let offline = ListingStorage::new(MemoryListings {
            fail_reads: true,
            ..Default::default()
        });
        assert!(offline.get_listing("123-abc").await.is_none());
    }

    #[tokio::test]
    async fn share_increment_requires_existing_listing() {
        let storage = ListingStorage::new(MemoryListings::default());
        assert!(!storage.increment_share_count("missing").await);
        storage
            .store
            .put_listing(&stored_listing())
            .await
            .expect("seed");
        assert!(storage.increment_share_count("123-abc").await);
        let patches = storage.store.patches.lock().expect("lock");
        assert_eq!(patches[0].1["shareCount"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn update_merges_and_stamps_updated_at() {
        let storage = ListingStorage::new(MemoryListings::default());
        assert!(
            storage
                .update_listing("123-abc", serde_json::json!({"isPublic": false}))
                .await
        );
        let patches = storage.store.patches.lock().expect("lock");
        assert_eq!(patches[0].1["isPublic"], serde_json::json!(false));
        assert!(patches[0].1.get("updatedAt").is_some());
    }

    #[tokio::test]
    async fn user_listings_fail_soft() {
        let offline = ListingStorage::new(MemoryListings {
            fail_reads: true,
            ..Default::default()
        });
        assert!(offline.get_all_listings("user-1", None).await.is_empty());
    }

    #[test]
    fn marketplace_format_composes_description() {
        let formatted = format_for_marketplace(&stored_listing());
        assert_eq!(formatted.title, "Noise-cancelling headphones");
        assert_eq!(formatted.price, 150);
        assert_eq!(formatted.condition, "used_like_new");
        assert_eq!(formatted.category, "Electronics");
        assert_eq!(formatted.location, "Seattle, WA");
        assert!(
            formatted
                .description
                .starts_with("good condition Acme Noise-cancelling headphones.")
        );
        assert!(formatted.description.contains("\u{2713} Tip one"));
        assert!(
            formatted
                .description
                .ends_with("Priced using AI market analysis for optimal sell-through.")
        );
    }

    #[test]
    fn marketplace_title_is_truncated_to_limit() {
        let mut listing = stored_listing();
        listing.item_identification.name = "x".repeat(140);
        let formatted = format_for_marketplace(&listing);
        assert_eq!(formatted.title.chars().count(), 100);
    }

    #[test]
    fn marketplace_tips_cap_at_three() {
        let mut listing = stored_listing();
        listing.optimization_tips = (1..=5).map(|i| format!("Tip {i}")).collect();
        let formatted = format_for_marketplace(&listing);
        assert_eq!(formatted.description.matches('\u{2713}').count(), 3);
        assert!(!formatted.description.contains("Tip 4"));
    }

    #[test]
    fn marketplace_condition_mapping() {
        let mut listing = stored_listing();
        for (ours, theirs) in [
            (Some("excellent"), "new"),
            (Some("good"), "used_like_new"),
            (Some("fair"), "used_good"),
            (Some("poor"), "used_fair"),
            (Some("mystery"), "used_good"),
            (None, "used_good"),
        ] {
            listing.item_identification.observed_condition = ours.map(str::to_string);
            assert_eq!(format_for_marketplace(&listing).condition, theirs);
        }
    }

    #[test]
    fn marketplace_format_handles_sparse_listings() {
        let mut listing = stored_listing();
        listing.item_identification.brand = None;
        listing.item_identification.category = None;
        listing.item_identification.observed_condition = None;
        listing.optimization_tips = vec![];
        listing.location = None;
        let formatted = format_for_marketplace(&listing);
        assert!(formatted.description.starts_with("good condition Noise-cancelling"));
        assert_eq!(formatted.category, "");
        assert_eq!(formatted.location, "");
    }
}
