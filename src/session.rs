//! Hybrid session tracking: anonymous visitors get a minted session id on
//! first contact; the same record is upgraded in place when they sign in.

use crate::firestore::StoreError;
use crate::models::DeviceClass;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::{debug, warn};

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub device_type: DeviceClass,
    pub region: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
}

pub trait SessionStore {
    async fn fetch_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;
    async fn put_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn link_user(
        &self,
        session_id: &str,
        user_id: &str,
        user_email: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SessionManager<S> {
    store: S,
}

impl<S: SessionStore> SessionManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolve an existing session or mint a new one. Store failures
    /// degrade to a locally valid session; the caller always gets a usable
    /// value back.
    pub async fn initialize_session(
        &self,
        existing_id: Option<&str>,
        user: Option<&UserRef>,
        region_hint: Option<&str>,
        user_agent: &str,
    ) -> Session {
        let now = Utc::now();

        if let Some(id) = existing_id.filter(|id| !id.trim().is_empty()) {
            match self.store.fetch_session(id).await {
                Ok(Some(mut session)) => {
                    if let Some(user) = user
                        && session.is_anonymous
                    {
                        session.user_id = Some(user.uid.clone());
                        session.user_email = user.email.clone();
                        session.is_anonymous = false;
                        if let Err(err) = self
                            .store
                            .link_user(id, &user.uid, user.email.as_deref(), now)
                            .await
                        {
                            warn!(
                                target = "pricelens.session",
                                session_id = id,
                                error = %err,
                                "session_link_write_failed"
                            );
                        }
                    }
                    session.last_active_at = now;
                    if let Err(err) = self.store.touch_session(id, now).await {
                        debug!(
                            target = "pricelens.session",
                            session_id = id,
                            error = %err,
                            "session_touch_failed"
                        );
                    }
                    return session;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        target = "pricelens.session",
                        session_id = id,
                        error = %err,
                        "session_lookup_failed_minting_fresh"
                    );
                }
            }
        }

        let session = Session {
            session_id: generate_session_id(),
            user_id: user.map(|u| u.uid.clone()),
            user_email: user.and_then(|u| u.email.clone()),
            device_type: DeviceClass::from_user_agent(user_agent),
            region: region_hint
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            created_at: now,
            last_active_at: now,
            is_anonymous: user.is_none(),
        };

        if let Err(err) = self.store.put_session(&session).await {
            warn!(
                target = "pricelens.session",
                session_id = %session.session_id,
                error = %err,
                "session_persist_failed_continuing_locally"
            );
        }
        session
    }

    /// Best-effort last-active refresh. Never surfaces an error.
    pub async fn update_session_activity(&self, session_id: &str) {
        if let Err(err) = self.store.touch_session(session_id, Utc::now()).await {
            debug!(
                target = "pricelens.session",
                session_id,
                error = %err,
                "session_activity_ping_failed"
            );
        }
    }

    /// Attach an authenticated user to a session. Idempotent: re-linking
    /// the same user writes the same fields again.
    pub async fn link_session_to_user(&self, session_id: &str, user: &UserRef) -> bool {
        match self
            .store
            .link_user(session_id, &user.uid, user.email.as_deref(), Utc::now())
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = "pricelens.session",
                    session_id,
                    error = %err,
                    "session_link_failed"
                );
                false
            }
        }
    }
}

/// Millisecond timestamp prefix plus a random alphanumeric suffix. Unique
/// with overwhelming probability without coordinating with the store.
fn generate_session_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(13)
        .map(char::from)
        .collect();
    format!(
        "sess_{}_{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}
