use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client, Url};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::redirect::LoginRedirect;
use super::refresh;
use super::store::{
    SessionStore, ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS, USER_KEY,
};
use super::types::{Expiry, SessionGrant, SessionSettings, StoredSession, TokenData, UserProfile};

/// Refresh outcome shared by every caller that asked while it was running
type PendingRefresh = Shared<BoxFuture<'static, Option<String>>>;

/// True when a credential expiring at `expires_at` is inside the stale buffer
pub fn is_expiring_soon(expires_at: i64, now: i64, threshold: i64) -> bool {
    expires_at.saturating_sub(now) <= threshold
}

/// Session manager
/// Owns the stored credentials, refreshes them when stale and coalesces
/// concurrent refreshes into a single backend call.
///
/// Cloning is cheap and every clone shares the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,

    /// In-flight refresh, if any
    pending: Arc<Mutex<Option<PendingRefresh>>>,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    redirect: Arc<dyn LoginRedirect>,
    settings: SessionSettings,
    refresh_url: Url,

    /// HTTP client for refresh requests
    client: Client,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn SessionStore>,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Result<Self> {
        let refresh_url = refresh::refresh_url(&settings.api_base_url, &settings.refresh_path)?;

        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(settings.connect_timeout))
            .timeout(std::time::Duration::from_secs(settings.request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                redirect,
                settings,
                refresh_url,
                client,
            }),
            pending: Arc::new(Mutex::new(None)),
        })
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Get a usable access token, refreshing it first if it is stale
    pub async fn valid_access_token(&self) -> Option<String> {
        let session = self.inner.snapshot()?;
        let (access_token, _) = session.credentials()?;

        let now = Utc::now().timestamp();
        match session.expires_at {
            Expiry::Missing if !self.inner.settings.strict_expiry => {
                tracing::debug!("No expiry stored, using access token as-is");
                return Some(access_token.to_string());
            }
            Expiry::Missing => {
                tracing::debug!("No expiry stored, treating access token as stale");
            }
            Expiry::At(expires_at) => {
                if !is_expiring_soon(expires_at, now, self.inner.settings.refresh_threshold) {
                    return Some(access_token.to_string());
                }
                let expires_in = expires_at.saturating_sub(now);
                tracing::debug!(expires_in, "Access token is stale");
            }
            Expiry::Unparseable => {
                tracing::warn!("Stored expiry is not a timestamp, treating access token as stale");
            }
        }

        self.refresh_access_token().await
    }

    /// Refresh the access token
    /// Only one refresh runs at a time; callers arriving while it runs get its result.
    pub async fn refresh_access_token(&self) -> Option<String> {
        let pending = {
            let mut slot = self.lock_pending();
            match slot.as_ref() {
                Some(pending) => {
                    tracing::debug!("Refresh already in flight, waiting for it");
                    pending.clone()
                }
                None => {
                    let pending = self.start_refresh();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    fn start_refresh(&self) -> PendingRefresh {
        let inner = Arc::clone(&self.inner);
        let slot: Weak<Mutex<Option<PendingRefresh>>> = Arc::downgrade(&self.pending);

        async move {
            // A panic must not leave a poisoned future in the slot
            let outcome = match AssertUnwindSafe(inner.perform_refresh())
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!("Token refresh panicked, ending session");
                    inner.teardown();
                    None
                }
            };

            if let Some(slot) = slot.upgrade() {
                let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
                *slot = None;
            }

            outcome
        }
        .boxed()
        .shared()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingRefresh>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clear the session and send the user to the login page
    pub fn logout(&self) {
        tracing::info!("Logging out");
        self.inner.teardown();
    }

    /// Whether both credentials are stored (expiry is not checked)
    pub fn is_logged_in(&self) -> bool {
        self.inner
            .snapshot()
            .map(|s| s.credentials().is_some())
            .unwrap_or(false)
    }

    /// Last cached user profile
    pub fn current_user(&self) -> Option<UserProfile> {
        let raw = match self.inner.store.get(USER_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!("Failed to read cached user: {:#}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!("Cached user is not valid JSON: {}", e);
                None
            }
        }
    }

    /// Stored expiry timestamp, if any
    pub fn expires_at(&self) -> Option<i64> {
        match self.inner.snapshot()?.expires_at {
            Expiry::At(at) => Some(at),
            _ => None,
        }
    }

    /// Refresh credential sent alongside requests
    pub fn current_refresh_token(&self) -> Option<String> {
        self.inner.snapshot()?.refresh_token
    }

    /// Store a grant obtained from a login
    pub fn establish(&self, grant: SessionGrant) -> Result<()> {
        let data = refresh::resolve_grant(grant, None, Utc::now().timestamp())?;

        if data.user.is_none() {
            self.inner
                .store
                .remove_many(&[USER_KEY])
                .context("Failed to clear previous user")?;
        }
        self.inner.persist(&data)?;

        tracing::info!(expires_at = data.expires_at, "Session established");
        Ok(())
    }
}

impl Inner {
    /// Read all session keys in one snapshot; storage errors count as no session
    fn snapshot(&self) -> Option<StoredSession> {
        match self.store.get_many(&SESSION_KEYS) {
            Ok(values) => {
                let mut values = values.into_iter();
                let mut next = || values.next().flatten();
                let access_token = next();
                let refresh_token = next();
                let expires_at = Expiry::parse(next().as_deref());
                let user = next();

                Some(StoredSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user,
                })
            }
            Err(e) => {
                tracing::error!("Failed to read session: {:#}", e);
                None
            }
        }
    }

    async fn perform_refresh(&self) -> Option<String> {
        let Some(current_refresh) = self.snapshot().and_then(|s| s.refresh_token) else {
            tracing::warn!("No refresh token stored, ending session");
            self.teardown();
            return None;
        };

        let response =
            refresh::request_refresh(&self.client, &self.refresh_url, &current_refresh).await;
        let grant = match response {
            Ok(grant) => grant,
            Err(e) => {
                tracing::error!("Token refresh failed: {:#}", e);
                self.teardown();
                return None;
            }
        };

        let data = match refresh::resolve_grant(
            grant,
            Some(&current_refresh),
            Utc::now().timestamp(),
        ) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Token refresh returned an unusable grant: {:#}", e);
                self.teardown();
                return None;
            }
        };

        if let Err(e) = self.persist(&data) {
            tracing::error!("Failed to store refreshed credentials: {:#}", e);
            self.teardown();
            return None;
        }

        tracing::info!(expires_at = data.expires_at, "Access token refreshed");
        Some(data.access_token)
    }

    /// Write the credential set in one store operation; a missing user keeps the cached one
    fn persist(&self, data: &TokenData) -> Result<()> {
        let mut entries = vec![
            (ACCESS_TOKEN_KEY, data.access_token.clone()),
            (REFRESH_TOKEN_KEY, data.refresh_token.clone()),
            (EXPIRES_AT_KEY, data.expires_at.to_string()),
        ];
        if let Some(ref user) = data.user {
            let json = serde_json::to_string(user).context("Failed to serialize user profile")?;
            entries.push((USER_KEY, json));
        }

        self.store.set_many(&entries)
    }

    fn teardown(&self) {
        if let Err(e) = self.store.remove_many(&SESSION_KEYS) {
            tracing::error!("Failed to clear session: {:#}", e);
        }
        self.redirect.redirect_to_login(&self.settings.login_url);
    }
}
