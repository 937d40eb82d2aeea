//! API-key authentication and per-org rate limiting for the protected
//! routes. Keys are loaded once from the environment; the limiter is a
//! fixed-window counter keyed by org id.

use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    convert::Infallible,
    env,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{info, warn};

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, OrgRecord>>,
    limiter: Arc<RateWindow>,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub org_id: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct OrgRecord {
    org_id: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        Self {
            records: Arc::new(load_keys_from_env()),
            limiter: Arc::new(RateWindow::from_env()),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            org_id: record.org_id.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-PriceLens-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&context.org_id).await {
        Ok(remaining) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            state
                .limiter
                .annotate(response.headers_mut(), remaining, None);
            Ok(response)
        }
        Err(retry_after) => {
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            );
            state
                .limiter
                .annotate(response.headers_mut(), 0, Some(retry_after));
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-PriceLens-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

fn load_keys_from_env() -> HashMap<String, OrgRecord> {
    let raw = env::var("PRICELENS_API_KEYS").unwrap_or_else(|_| "demo-org:demo-key".to_string());
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.split_once(':') {
            Some((org, secret)) if !org.trim().is_empty() && !secret.trim().is_empty() => {
                entries.insert(
                    secret.trim().to_string(),
                    OrgRecord {
                        org_id: org.trim().to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(
                target = "pricelens.api",
                "ignored malformed PRICELENS_API_KEYS entry: {trimmed}"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "pricelens.api",
            "PRICELENS_API_KEYS produced no keys; falling back to demo credentials"
        );
        entries.insert(
            "demo-key".to_string(),
            OrgRecord {
                org_id: "demo-org".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "pricelens.api",
            key_count = entries.len(),
            "loaded API keys from env"
        );
    }

    entries
}

struct RateWindow {
    limit: u32,
    slots: Mutex<HashMap<String, WindowState>>,
}

struct WindowState {
    started: Instant,
    count: u32,
}

impl RateWindow {
    fn from_env() -> Self {
        let limit = env::var("RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(120);
        Self {
            limit,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Take one unit from the caller's window. Returns the remaining
    /// allowance, or the seconds until the window resets when exhausted.
    async fn consume(&self, key: &str) -> Result<u32, u64> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let state = slots.entry(key.to_string()).or_insert(WindowState {
            started: now,
            count: 0,
        });

        if now.duration_since(state.started) >= RATE_WINDOW {
            state.started = now;
            state.count = 0;
        }

        if state.count < self.limit {
            state.count += 1;
            Ok(self.limit - state.count)
        } else {
            let elapsed = now.duration_since(state.started);
            Err(RATE_WINDOW.saturating_sub(elapsed).as_secs().max(1))
        }
    }

    fn annotate(&self, headers: &mut http::HeaderMap, remaining: u32, retry_after: Option<u64>) {
        headers.insert(
            "X-RateLimit-Limit",
            header_number(self.limit as u64),
        );
        headers.insert("X-RateLimit-Remaining", header_number(remaining as u64));
        if let Some(seconds) = retry_after {
            headers.insert(http::header::RETRY_AFTER, header_number(seconds));
        }
    }
}

fn header_number(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(limit: u32) -> RateWindow {
        RateWindow {
            limit,
            slots: Mutex::new(HashMap::new()),
        }
    }

    #[tokio::test]
    async fn limiter_counts_down_then_rejects() {
        let limiter = window(2);
        assert_eq!(limiter.consume("org-a").await, Ok(1));
        assert_eq!(limiter.consume("org-a").await, Ok(0));
        let retry = limiter.consume("org-a").await.expect_err("exhausted");
        assert!(retry >= 1);
    }

    #[tokio::test]
    async fn limiter_is_per_key() {
        let limiter = window(1);
        assert!(limiter.consume("org-a").await.is_ok());
        assert!(limiter.consume("org-b").await.is_ok());
        assert!(limiter.consume("org-a").await.is_err());
    }

    #[test]
    fn api_key_extraction_supports_both_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret-1"),
        );
        assert_eq!(extract_api_key(&headers).as_deref(), Some("secret-1"));

        let mut headers = http::HeaderMap::new();
        headers.insert("X-PriceLens-Key", HeaderValue::from_static(" secret-2 "));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("secret-2"));

        assert_eq!(extract_api_key(&http::HeaderMap::new()), None);
    }
}
