//! Firestore REST client. Covers the narrow slice of the API the service
//! needs: `runQuery` with equality/range filters ordered by a timestamp
//! field, `createDocument`, `patch` with an update mask, and single-document
//! `get`. Documents are converted between plain JSON and Firestore's typed
//! value format by the codec at the bottom of this file.

use crate::feedback::models::{FeedbackEvent, TransactionStage};
use crate::feedback::service::FeedbackStore;
use crate::http::build_client;
use crate::listing::{Listing, ListingStore};
use crate::pricing::comparables::SoldPriceSource;
use crate::pricing::models::SoldPriceRecord;
use crate::session::{Session, SessionStore};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use urlencoding::encode;
use uuid::Uuid;

pub const SESSIONS: &str = "sessions";
pub const FEEDBACK_EVENTS: &str = "feedback_events";
pub const LISTINGS: &str = "listings";
pub const LISTINGS_TEMP: &str = "listings_temp";
pub const SOLD_PRICES: &str = "soldPrices";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[derive(Debug, Clone)]
pub struct FirestoreClient {
    base_url: String,
    project_id: String,
    access_token: Option<String>,
    http: Client,
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub data: Value,
}

enum FilterOp {
    Equal,
    GreaterThanOrEqual,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equal => "EQUAL",
            FilterOp::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        }
    }
}

impl FirestoreClient {
    pub fn from_env() -> Self {
        let base_url = std::env::var("FIRESTORE_API_URL")
            .unwrap_or_else(|_| "https://firestore.googleapis.com/v1".into());
        let project_id =
            std::env::var("FIRESTORE_PROJECT_ID").unwrap_or_else(|_| "pricelens-demo".into());
        let access_token = std::env::var("FIRESTORE_ACCESS_TOKEN").ok();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            access_token,
            http: build_client(),
        }
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents",
            self.base_url, self.project_id
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn run_query(
        &self,
        collection: &str,
        filters: &[(&str, FilterOp, Value)],
        order_by: &str,
        limit: Option<u32>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let field_filters: Vec<Value> = filters
            .iter()
            .map(|(path, op, value)| {
                json!({
                    "fieldFilter": {
                        "field": {"fieldPath": path},
                        "op": op.as_str(),
                        "value": encode_value(value),
                    }
                })
            })
            .collect();

        let mut structured = json!({
            "from": [{"collectionId": collection}],
            "orderBy": [{"field": {"fieldPath": order_by}, "direction": "DESCENDING"}],
        });
        match field_filters.len() {
            0 => {}
            1 => {
                structured["where"] = field_filters[0].clone();
            }
            _ => {
                structured["where"] = json!({
                    "compositeFilter": {"op": "AND", "filters": field_filters}
                });
            }
        }
        if let Some(limit) = limit {
            structured["limit"] = json!(limit);
        }

        let url = format!("{}:runQuery", self.documents_root());
        let response = self
            .authorize(self.http.post(url))
            .json(&json!({"structuredQuery": structured}))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;

        // runQuery streams one entry per result; entries carrying only a
        // readTime mark an empty page and are skipped.
        let mut documents = Vec::new();
        for row in rows {
            if let Some(doc) = row.get("document") {
                documents.push(parse_document(doc)?);
            }
        }
        Ok(documents)
    }

    async fn create_document(
        &self,
        collection: &str,
        document_id: Option<&str>,
        data: &Value,
    ) -> Result<String, StoreError> {
        let mut url = format!("{}/{}", self.documents_root(), encode(collection));
        if let Some(id) = document_id {
            url.push_str(&format!("?documentId={}", encode(id)));
        }
        let response = self
            .authorize(self.http.post(url))
            .json(&json!({"fields": encode_fields(data)}))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        document_id_from_name(&payload)
            .ok_or_else(|| StoreError::Deserialize("document name missing".into()))
    }

    /// Merge-writes the given top-level fields, leaving the rest of the
    /// document untouched.
    async fn patch_document(
        &self,
        collection: &str,
        document_id: &str,
        data: &Value,
    ) -> Result<(), StoreError> {
        let field_paths = data
            .as_object()
            .map(|map| map.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        let mask = field_paths
            .iter()
            .map(|path| format!("updateMask.fieldPaths={}", encode(path)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!(
            "{}/{}/{}?{}",
            self.documents_root(),
            encode(collection),
            encode(document_id),
            mask
        );
        let response = self
            .authorize(self.http.patch(url))
            .json(&json!({"fields": encode_fields(data)}))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn get_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let url = format!(
            "{}/{}/{}",
            self.documents_root(),
            encode(collection),
            encode(document_id)
        );
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        Ok(Some(parse_document(&payload)?))
    }

    fn decode_typed<T: DeserializeOwned>(doc: StoredDocument) -> Result<T, StoreError> {
        serde_json::from_value(doc.data).map_err(|err| StoreError::Deserialize(err.to_string()))
    }
}

impl SoldPriceSource for FirestoreClient {
    async fn sold_by_metro(
        &self,
        category: &str,
        metro: &str,
        limit: u32,
    ) -> Result<Vec<SoldPriceRecord>, StoreError> {
        let docs = self
            .run_query(
                SOLD_PRICES,
                &[
                    ("category", FilterOp::Equal, json!(category)),
                    ("location.parsed.metro", FilterOp::Equal, json!(metro)),
                ],
                "timestamp",
                Some(limit),
            )
            .await?;
        docs.into_iter().map(Self::decode_typed).collect()
    }

    async fn sold_by_state(
        &self,
        category: &str,
        state: &str,
        limit: u32,
    ) -> Result<Vec<SoldPriceRecord>, StoreError> {
        let docs = self
            .run_query(
                SOLD_PRICES,
                &[
                    ("category", FilterOp::Equal, json!(category)),
                    ("location.parsed.state", FilterOp::Equal, json!(state)),
                ],
                "timestamp",
                Some(limit),
            )
            .await?;
        docs.into_iter().map(Self::decode_typed).collect()
    }

    async fn sold_by_category(
        &self,
        category: &str,
        limit: u32,
    ) -> Result<Vec<SoldPriceRecord>, StoreError> {
        let docs = self
            .run_query(
                SOLD_PRICES,
                &[("category", FilterOp::Equal, json!(category))],
                "timestamp",
                Some(limit),
            )
            .await?;
        docs.into_iter().map(Self::decode_typed).collect()
    }
}

impl FeedbackStore for FirestoreClient {
    async fn insert_feedback(&self, event: &FeedbackEvent) -> Result<String, StoreError> {
        let document_id = Uuid::new_v4().to_string();
        let data =
            serde_json::to_value(event).map_err(|err| StoreError::Deserialize(err.to_string()))?;
        self.create_document(FEEDBACK_EVENTS, Some(&document_id), &data)
            .await
    }

    async fn feedback_for_listing(
        &self,
        listing_id: &str,
    ) -> Result<Vec<FeedbackEvent>, StoreError> {
        let docs = self
            .run_query(
                FEEDBACK_EVENTS,
                &[("listingId", FilterOp::Equal, json!(listing_id))],
                "createdAt",
                None,
            )
            .await?;
        docs.into_iter()
            .map(|doc| {
                let id = doc.id.clone();
                let mut event: FeedbackEvent = Self::decode_typed(doc)?;
                event.id = Some(id);
                Ok(event)
            })
            .collect()
    }

    async fn recent_feedback(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FeedbackEvent>, StoreError> {
        let docs = self
            .run_query(
                FEEDBACK_EVENTS,
                &[("createdAt", FilterOp::GreaterThanOrEqual, json!(cutoff))],
                "createdAt",
                Some(limit),
            )
            .await?;
        docs.into_iter()
            .map(|doc| {
                let id = doc.id.clone();
                let mut event: FeedbackEvent = Self::decode_typed(doc)?;
                event.id = Some(id);
                Ok(event)
            })
            .collect()
    }

    async fn set_listing_stage(
        &self,
        listing_id: &str,
        stage: TransactionStage,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.patch_document(
            LISTINGS_TEMP,
            listing_id,
            &json!({"stage": stage, "lastFeedbackAt": at}),
        )
        .await
    }
}

impl SessionStore for FirestoreClient {
    async fn fetch_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        match self.get_document(SESSIONS, session_id).await? {
            Some(doc) => Ok(Some(Self::decode_typed(doc)?)),
            None => Ok(None),
        }
    }

    async fn put_session(&self, session: &Session) -> Result<(), StoreError> {
        let data =
            serde_json::to_value(session).map_err(|err| StoreError::Deserialize(err.to_string()))?;
        self.create_document(SESSIONS, Some(&session.session_id), &data)
            .await?;
        Ok(())
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.patch_document(SESSIONS, session_id, &json!({"lastActiveAt": at}))
            .await
    }

    async fn link_user(
        &self,
        session_id: &str,
        user_id: &str,
        user_email: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.patch_document(
            SESSIONS,
            session_id,
            &json!({
                "userId": user_id,
                "userEmail": user_email,
                "isAnonymous": false,
                "lastActiveAt": at,
            }),
        )
        .await
    }
}

impl ListingStore for FirestoreClient {
    async fn put_listing(&self, listing: &Listing) -> Result<(), StoreError> {
        let data =
            serde_json::to_value(listing).map_err(|err| StoreError::Deserialize(err.to_string()))?;
        self.create_document(LISTINGS, Some(&listing.id), &data)
            .await?;
        Ok(())
    }

    async fn fetch_listing(&self, listing_id: &str) -> Result<Option<Listing>, StoreError> {
        match self.get_document(LISTINGS, listing_id).await? {
            Some(doc) => Ok(Some(Self::decode_typed(doc)?)),
            None => Ok(None),
        }
    }

    async fn listings_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Listing>, StoreError> {
        let docs = self
            .run_query(
                LISTINGS,
                &[("userId", FilterOp::Equal, json!(user_id))],
                "createdAt",
                Some(limit),
            )
            .await?;
        docs.into_iter().map(Self::decode_typed).collect()
    }

    async fn patch_listing(&self, listing_id: &str, fields: &Value) -> Result<(), StoreError> {
        self.patch_document(LISTINGS, listing_id, fields).await
    }
}

fn parse_document(doc: &Value) -> Result<StoredDocument, StoreError> {
    let id = document_id_from_name(doc)
        .ok_or_else(|| StoreError::Deserialize("document name missing".into()))?;
    let data = doc
        .get("fields")
        .map(decode_fields)
        .unwrap_or_else(|| json!({}));
    Ok(StoredDocument { id, data })
}

fn document_id_from_name(doc: &Value) -> Option<String> {
    doc.get("name")
        .and_then(Value::as_str)
        .and_then(|name| name.rsplit('/').next())
        .map(|id| id.to_string())
}

// ---- value codec ----
//
// Plain JSON <-> Firestore typed values. Strings in RFC 3339 form are stored
// as native timestamps so that server-side ordering and range filters over
// `createdAt`/`timestamp` behave chronologically.

fn encode_fields(data: &Value) -> Value {
    let mut fields = serde_json::Map::new();
    if let Some(map) = data.as_object() {
        for (key, value) in map {
            fields.insert(key.clone(), encode_value(value));
        }
    }
    Value::Object(fields)
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({"nullValue": null}),
        Value::Bool(flag) => json!({"booleanValue": flag}),
        Value::Number(number) => {
            if number.is_f64() {
                json!({"doubleValue": number})
            } else {
                json!({"integerValue": number.to_string()})
            }
        }
        Value::String(text) => {
            if DateTime::parse_from_rfc3339(text).is_ok() {
                json!({"timestampValue": text})
            } else {
                json!({"stringValue": text})
            }
        }
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({"arrayValue": {"values": values}})
        }
        Value::Object(_) => json!({"mapValue": {"fields": encode_fields(value)}}),
    }
}

fn decode_fields(fields: &Value) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(map) = fields.as_object() {
        for (key, value) in map {
            out.insert(key.clone(), decode_value(value));
        }
    }
    Value::Object(out)
}

fn decode_value(value: &Value) -> Value {
    let Some(map) = value.as_object() else {
        return Value::Null;
    };
    if let Some(text) = map.get("stringValue").and_then(Value::as_str) {
        return Value::String(text.to_string());
    }
    if let Some(text) = map.get("timestampValue").and_then(Value::as_str) {
        return Value::String(text.to_string());
    }
    if let Some(raw) = map.get("integerValue") {
        let parsed = match raw {
            Value::String(text) => text.parse::<i64>().ok(),
            Value::Number(number) => number.as_i64(),
            _ => None,
        };
        if let Some(number) = parsed {
            return json!(number);
        }
        return Value::Null;
    }
    if let Some(number) = map.get("doubleValue") {
        return number.clone();
    }
    if let Some(flag) = map.get("booleanValue") {
        return flag.clone();
    }
    if map.contains_key("nullValue") {
        return Value::Null;
    }
    if let Some(array) = map.get("arrayValue") {
        let items = array
            .get("values")
            .and_then(Value::as_array)
            .map(|values| values.iter().map(decode_value).collect())
            .unwrap_or_default();
        return Value::Array(items);
    }
    if let Some(mapped) = map.get("mapValue") {
        return mapped
            .get("fields")
            .map(decode_fields)
            .unwrap_or_else(|| json!({}));
    }
    Value::Null
}
