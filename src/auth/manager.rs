//! Pre-emptive credential manager.
//!
//! Hands out credentials that stay valid for at least a requested horizon,
//! refreshing them before they expire rather than after an API call fails.
//!
//! # Locking
//! - `refresh_lock` serializes every lookup that may reach the network, so
//!   two callers never refresh the same token twice
//! - `cache` holds credentials and their expiries together and is only ever
//!   locked for in-memory reads and writes

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::credentials::{cache_key, Credential, CredentialStore, DEFAULT_ACCOUNT};
use super::oauth::{AuthError, TokenProvider};
use crate::observability::metrics;

/// In-memory view of the credentials handed out so far.
#[derive(Debug, Default)]
struct CredentialCache {
    credentials: HashMap<String, Credential>,
    expiries: HashMap<String, Option<DateTime<Utc>>>,
}

/// Lifecycle of a cached token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    NotLoaded,
    Valid,
    Expired,
}

/// Point-in-time report for one (service, account) token.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub service: String,
    pub account: String,
    pub status: TokenState,
    pub expiry: Option<DateTime<Utc>>,
    pub minutes_remaining: Option<i64>,
    pub needs_refresh: bool,
}

pub struct AuthManager {
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn TokenProvider>,
    services: BTreeMap<String, Vec<String>>,
    refresh_margin: Duration,
    refresh_lock: tokio::sync::Mutex<()>,
    cache: Mutex<CredentialCache>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    /// `services` maps each known service to the scopes requested when it is authorized.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn TokenProvider>,
        services: BTreeMap<String, Vec<String>>,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            services,
            refresh_margin,
            refresh_lock: tokio::sync::Mutex::new(()),
            cache: Mutex::new(CredentialCache::default()),
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Credentials for `service` that remain valid for at least `min_validity`
    /// (the refresh margin when `None`).
    ///
    /// Refreshes at most once per call. A credential that cannot be made to
    /// cover the horizon is an error, never returned as-is.
    pub async fn get_credentials(
        &self,
        service: &str,
        account: Option<&str>,
        min_validity: Option<Duration>,
    ) -> Result<Credential, AuthError> {
        let account = account.unwrap_or(DEFAULT_ACCOUNT);
        let scopes = self
            .services
            .get(service)
            .ok_or_else(|| AuthError::UnknownService(service.to_string()))?;
        let horizon = to_chrono(min_validity.unwrap_or(self.refresh_margin));
        let key = cache_key(service, account);

        let _refresh = self.refresh_lock.lock().await;
        let now = Utc::now();

        if let Some((cached, expiry)) = self.cached(&key) {
            if needs_refresh(&cached.access_token, expiry, now, horizon) {
                tracing::info!(
                    service = %service,
                    account = %account,
                    minutes_remaining = ?expiry.map(|at| (at - now).num_minutes()),
                    "Cached token inside refresh horizon, refreshing"
                );
                return self.refresh_and_store(&cached).await;
            }
            return Ok(cached);
        }

        match self.store.load(service, account).await? {
            Some(loaded) if needs_refresh(&loaded.access_token, loaded.expiry, now, horizon) => {
                tracing::info!(service = %service, account = %account, "Stored token inside refresh horizon, refreshing");
                self.refresh_and_store(&loaded).await
            }
            Some(loaded) => {
                self.remember(loaded.clone());
                Ok(loaded)
            }
            None => {
                tracing::info!(service = %service, account = %account, "No stored credentials, starting authorization");
                self.authorize_and_store(service, account, scopes).await
            }
        }
    }

    /// Credentials guaranteed to outlive an operation of the given duration.
    pub async fn ensure_valid_for_upload(
        &self,
        service: &str,
        account: Option<&str>,
        estimated: Duration,
    ) -> Result<Credential, AuthError> {
        let min_validity = estimated.saturating_add(self.refresh_margin);
        tracing::debug!(
            service = %service,
            required_minutes = min_validity.as_secs() / 60,
            "Ensuring credentials outlive long-running operation"
        );
        self.get_credentials(service, account, Some(min_validity)).await
    }

    /// Run the consent flow again, replacing whatever is cached and stored.
    pub async fn reauthorize(
        &self,
        service: &str,
        account: Option<&str>,
    ) -> Result<Credential, AuthError> {
        let account = account.unwrap_or(DEFAULT_ACCOUNT);
        let scopes = self
            .services
            .get(service)
            .ok_or_else(|| AuthError::UnknownService(service.to_string()))?;

        let _refresh = self.refresh_lock.lock().await;
        self.authorize_and_store(service, account, scopes).await
    }

    /// Report on the cached token without touching storage or the network.
    pub fn get_token_status(&self, service: &str, account: Option<&str>) -> TokenStatus {
        let account = account.unwrap_or(DEFAULT_ACCOUNT);
        let key = cache_key(service, account);
        let now = Utc::now();

        let cache = self.lock_cache();
        let mut status = TokenStatus {
            service: service.to_string(),
            account: account.to_string(),
            status: TokenState::NotLoaded,
            expiry: None,
            minutes_remaining: None,
            needs_refresh: false,
        };
        let Some(credential) = cache.credentials.get(&key) else {
            return status;
        };

        let expiry = cache.expiries.get(&key).copied().flatten();
        let remaining = expiry.map(|at| at - now);
        status.expiry = expiry;
        status.minutes_remaining = remaining.map(|d| d.num_minutes());
        status.status = if credential.access_token.is_empty() || expiry.is_some_and(|at| at <= now) {
            TokenState::Expired
        } else {
            TokenState::Valid
        };
        status.needs_refresh = needs_refresh(
            &credential.access_token,
            expiry,
            now,
            to_chrono(self.refresh_margin),
        );
        status
    }

    async fn refresh_and_store(&self, credential: &Credential) -> Result<Credential, AuthError> {
        if !credential.can_refresh() {
            metrics::record_token_refresh(&credential.service, "unrefreshable");
            return Err(AuthError::ReconsentRequired {
                key: credential.key(),
                reason: "token is expiring and has no refresh token".to_string(),
            });
        }

        let refreshed = match self.provider.refresh(credential).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                metrics::record_token_refresh(&credential.service, "failure");
                tracing::error!(key = %credential.key(), error = %e, "Token refresh failed");
                return Err(e);
            }
        };

        self.store.save(&refreshed).await?;
        self.remember(refreshed.clone());
        metrics::record_token_refresh(&refreshed.service, "success");
        tracing::info!(
            service = %refreshed.service,
            account = %refreshed.account,
            expiry = ?refreshed.expiry,
            "Token refreshed"
        );
        Ok(refreshed)
    }

    async fn authorize_and_store(
        &self,
        service: &str,
        account: &str,
        scopes: &[String],
    ) -> Result<Credential, AuthError> {
        let credential = self.provider.authorize(service, account, scopes).await?;
        self.store.save(&credential).await?;
        self.remember(credential.clone());
        Ok(credential)
    }

    /// The cached credential and the expiry recorded when it was cached.
    fn cached(&self, key: &str) -> Option<(Credential, Option<DateTime<Utc>>)> {
        let cache = self.lock_cache();
        let credential = cache.credentials.get(key)?.clone();
        let expiry = cache.expiries.get(key).copied().flatten();
        Some((credential, expiry))
    }

    fn remember(&self, credential: Credential) {
        let key = credential.key();
        let mut cache = self.lock_cache();
        cache.expiries.insert(key.clone(), credential.expiry);
        cache.credentials.insert(key, credential);
    }

    fn lock_cache(&self) -> MutexGuard<'_, CredentialCache> {
        self.cache.lock().expect("credential cache mutex poisoned")
    }
}

/// Missing, expired, or expiring within `horizon`. No expiry means it never expires.
fn needs_refresh(
    access_token: &str,
    expiry: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    horizon: chrono::Duration,
) -> bool {
    access_token.is_empty()
        || expiry.is_some_and(|at| at <= now || at - now < horizon)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
