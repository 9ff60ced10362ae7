//! Composition root for outbound API calls.
//!
//! Owns the breaker registry, the rate limiter and the auth manager, and runs
//! every call through them in order: quota, credentials, breaker.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::auth::{
    AuthError, AuthManager, Credential, FileCredentialStore, GoogleOAuth, TokenStatus,
};
use crate::config::validation::validate_config;
use crate::config::{ConfigError, GatewayConfig};
use crate::lifecycle::Shutdown;
use crate::resilience::{Admission, BreakerRegistry, BreakerStatus, CircuitBreaker, CircuitState};
use crate::security::{QuotaExceeded, QuotaStatus, RateLimiter};

/// Failures surfaced by [`Gateway::execute`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Quota(#[from] QuotaExceeded),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Shutdown has been triggered; no new calls are admitted.
    #[error("gateway is shutting down")]
    ShuttingDown,

    /// The admitted operation itself failed.
    #[error("upstream call failed: {0}")]
    Upstream(Box<dyn StdError + Send + Sync>),
}

/// Credentials an [`ApiCall`] needs before it runs.
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    pub service: String,
    pub account: Option<String>,
    pub min_validity: Option<Duration>,
}

/// Routing for one outbound call: which quota, which breaker, which credentials.
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub api: String,
    pub breaker: String,
    pub auth: Option<CredentialRequest>,
}

impl ApiCall {
    /// A call metered under `api` and guarded by the breaker of the same name.
    pub fn new(api: impl Into<String>) -> Self {
        let api = api.into();
        Self {
            breaker: api.clone(),
            api,
            auth: None,
        }
    }

    pub fn breaker(mut self, breaker: impl Into<String>) -> Self {
        self.breaker = breaker.into();
        self
    }

    pub fn with_credentials(mut self, service: impl Into<String>) -> Self {
        self.auth = Some(CredentialRequest {
            service: service.into(),
            account: None,
            min_validity: None,
        });
        self
    }

    /// Only meaningful after `with_credentials`.
    pub fn account(mut self, account: impl Into<String>) -> Self {
        if let Some(auth) = self.auth.as_mut() {
            auth.account = Some(account.into());
        }
        self
    }

    /// Only meaningful after `with_credentials`.
    pub fn min_validity(mut self, min_validity: Duration) -> Self {
        if let Some(auth) = self.auth.as_mut() {
            auth.min_validity = Some(min_validity);
        }
        self
    }
}

pub struct Gateway {
    config: GatewayConfig,
    breakers: Arc<BreakerRegistry>,
    limiter: Arc<RateLimiter>,
    auth: Arc<AuthManager>,
    shutdown: Arc<Shutdown>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("breakers", &self.breakers.len())
            .field("auth", &self.auth)
            .field("in_flight", &self.shutdown.in_flight())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Assemble a gateway around an existing auth manager.
    ///
    /// The configuration is validated first; breakers and quotas are only
    /// built from a valid one.
    pub fn new(config: GatewayConfig, auth: Arc<AuthManager>) -> Result<Self, GatewayError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let breakers = Arc::new(BreakerRegistry::from_config(&config));
        breakers.register_configured();
        let limiter = Arc::new(RateLimiter::from_config(&config));
        Ok(Self {
            config,
            breakers,
            limiter,
            auth,
            shutdown: Arc::new(Shutdown::new()),
        })
    }

    /// Assemble a gateway with file-backed credentials and Google OAuth.
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        let auth = Arc::new(auth_manager(&config)?);
        Self::new(config, auth)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers.breaker(name)
    }

    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    /// Run `operation` through quota, credentials and the call's breaker.
    ///
    /// A breaker rejection is `Ok(Admission::Downgraded)`; `operation` never
    /// runs in that case, but the quota slot has already been spent. After
    /// shutdown is triggered every call fails with `ShuttingDown` before
    /// touching quota.
    pub async fn execute<F, Fut, T, E>(
        &self,
        call: ApiCall,
        operation: F,
    ) -> Result<Admission<T>, GatewayError>
    where
        F: FnOnce(Option<Credential>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Box<dyn StdError + Send + Sync>> + fmt::Display,
    {
        let _in_flight = self.shutdown.track().ok_or(GatewayError::ShuttingDown)?;
        self.limiter.acquire(&call.api).await?;

        let credential = match &call.auth {
            Some(req) => Some(
                self.auth
                    .get_credentials(&req.service, req.account.as_deref(), req.min_validity)
                    .await?,
            ),
            None => None,
        };

        let breaker = self.breakers.breaker(&call.breaker);
        let admission = breaker
            .call(move || operation(credential))
            .await
            .map_err(|e| GatewayError::Upstream(e.into()))?;

        if let Admission::Downgraded(rejection) = &admission {
            tracing::info!(api = %call.api, %rejection, "Call downgraded");
        }
        Ok(admission)
    }

    /// Token status for every configured service, default account.
    pub fn token_statuses(&self) -> Vec<TokenStatus> {
        self.auth
            .services()
            .map(|service| self.auth.get_token_status(service, None))
            .collect()
    }

    /// Snapshot of breakers, tokens and quotas with operator guidance.
    pub fn status(&self) -> SystemStatus {
        let now = Utc::now();
        let mut issues = Vec::new();

        let circuit_breakers: Vec<BreakerReport> = self
            .breakers
            .statuses()
            .into_iter()
            .map(|status| BreakerReport::new(status, now))
            .collect();
        for report in &circuit_breakers {
            if report.status.state == CircuitState::Open {
                issues.push(format!("{} circuit is open", report.status.name));
            }
        }

        let tokens = self.token_statuses().into_iter().map(TokenReport::new).collect();

        let rate_limits: Vec<QuotaReport> = self
            .limiter
            .statuses()
            .into_iter()
            .map(QuotaReport::new)
            .collect();
        for report in &rate_limits {
            if report.status.remaining == 0 {
                issues.push(format!("{} quota exhausted", report.status.api));
            }
        }

        SystemStatus {
            overall_health: if issues.is_empty() {
                Health::Healthy
            } else {
                Health::Degraded
            },
            issues,
            circuit_breakers,
            tokens,
            rate_limits,
            timestamp: now,
        }
    }
}

fn auth_manager(config: &GatewayConfig) -> Result<AuthManager, AuthError> {
    let store = Arc::new(
        FileCredentialStore::new(&config.auth.credentials_dir)
            .with_services(config.auth.services.keys().cloned()),
    );
    let provider = Arc::new(GoogleOAuth::new(&config.auth.client_secrets_file)?);
    let services: BTreeMap<String, Vec<String>> = config
        .auth
        .services
        .iter()
        .map(|(name, s)| (name.clone(), s.scopes.clone()))
        .collect();
    let margin = Duration::from_secs(u64::from(config.auth.preemptive_refresh_minutes) * 60);
    Ok(AuthManager::new(store, provider, services, margin))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerReport {
    #[serde(flatten)]
    pub status: BreakerStatus,
    pub estimated_recovery: Option<DateTime<Utc>>,
    pub recommendation: String,
}

impl BreakerReport {
    fn new(status: BreakerStatus, now: DateTime<Utc>) -> Self {
        let (estimated_recovery, recommendation) = if status.state == CircuitState::Open {
            let eta = now + chrono::Duration::seconds(status.cooldown_secs as i64);
            (
                Some(eta),
                format!("Wait {} minutes before retry.", status.cooldown_secs / 60),
            )
        } else {
            (None, "Service available".to_string())
        };
        Self {
            status,
            estimated_recovery,
            recommendation,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenReport {
    #[serde(flatten)]
    pub status: TokenStatus,
    pub recommendation: Option<String>,
}

impl TokenReport {
    fn new(status: TokenStatus) -> Self {
        let recommendation = status.minutes_remaining.map(|minutes| {
            if minutes < 30 {
                "Token expiring soon. Will auto-refresh before next call."
            } else if minutes < 60 {
                "Token healthy but monitor for long operations."
            } else {
                "Token healthy."
            }
            .to_string()
        });
        Self {
            status,
            recommendation,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaReport {
    #[serde(flatten)]
    pub status: QuotaStatus,
    pub recommendation: String,
}

impl QuotaReport {
    fn new(status: QuotaStatus) -> Self {
        let recommendation = if status.remaining == 0 {
            format!(
                "Daily quota exhausted. Resets at {}",
                status.resets_at.format("%H:%M UTC")
            )
        } else if status.remaining < 10 {
            "Quota running low.".to_string()
        } else {
            "Quota healthy.".to_string()
        };
        Self {
            status,
            recommendation,
        }
    }
}

/// Full system report.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub overall_health: Health,
    pub issues: Vec<String>,
    pub circuit_breakers: Vec<BreakerReport>,
    pub tokens: Vec<TokenReport>,
    pub rate_limits: Vec<QuotaReport>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RateLimitConfig};

    fn gateway(config: GatewayConfig) -> Gateway {
        let dir = std::env::temp_dir().join("mcp-gateway-unit-unused");
        let auth = AuthManager::new(
            Arc::new(FileCredentialStore::new(dir)),
            Arc::new(GoogleOAuth::new("/nonexistent/client_secrets.json").unwrap()),
            BTreeMap::new(),
            Duration::from_secs(600),
        );
        Gateway::new(config, Arc::new(auth)).unwrap()
    }

    #[test]
    fn test_api_call_builder() {
        let call = ApiCall::new("youtube_upload")
            .with_credentials("youtube")
            .account("UC1")
            .min_validity(Duration::from_secs(60));
        assert_eq!(call.breaker, "youtube_upload");
        let auth = call.auth.unwrap();
        assert_eq!(auth.service, "youtube");
        assert_eq!(auth.account.as_deref(), Some("UC1"));
        assert_eq!(auth.min_validity, Some(Duration::from_secs(60)));

        let call = ApiCall::new("trends").breaker("google_trends").account("ignored");
        assert_eq!(call.breaker, "google_trends");
        assert!(call.auth.is_none());
    }

    #[tokio::test]
    async fn test_status_reports_open_breaker_and_exhausted_quota() {
        let mut config = GatewayConfig::default();
        config.breakers.clear();
        config
            .breakers
            .insert("flaky".into(), CircuitBreakerConfig::new(1, 300));
        config.rate_limits.clear();
        config.rate_limits.insert("flaky".into(), RateLimitConfig::new(1, 1));
        let gw = gateway(config);

        assert_eq!(gw.status().overall_health, Health::Healthy);

        let err = gw
            .execute(ApiCall::new("flaky"), |_| async { Err::<(), _>("boom") })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));

        let status = gw.status();
        assert_eq!(status.overall_health, Health::Degraded);
        assert_eq!(
            status.issues,
            vec!["flaky circuit is open".to_string(), "flaky quota exhausted".to_string()]
        );
        let breaker = &status.circuit_breakers[0];
        assert!(breaker.recommendation.starts_with("Wait "));
        assert!(breaker.status.cooldown_secs > 290);
        assert!(breaker.estimated_recovery.is_some());
        assert!(status.rate_limits[0]
            .recommendation
            .starts_with("Daily quota exhausted. Resets at "));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let dir = std::env::temp_dir().join("mcp-gateway-unit-unused");
        let auth = Arc::new(AuthManager::new(
            Arc::new(FileCredentialStore::new(dir)),
            Arc::new(GoogleOAuth::new("/nonexistent/client_secrets.json").unwrap()),
            BTreeMap::new(),
            Duration::from_secs(600),
        ));
        let mut config = GatewayConfig::default();
        config
            .rate_limits
            .insert("stalled".into(), RateLimitConfig::new(100, 0));

        let err = Gateway::new(config, auth).unwrap_err();
        match err {
            GatewayError::Config(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].to_string().contains("rate_limits.stalled.requests_per_minute"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_execute_refused_after_shutdown() {
        let mut config = GatewayConfig::default();
        config.rate_limits.clear();
        config.rate_limits.insert("trends".into(), RateLimitConfig::new(5, 5));
        let gw = gateway(config);

        gw.shutdown().trigger();
        let invoked = std::sync::atomic::AtomicBool::new(false);
        let err = gw
            .execute(ApiCall::new("trends"), |_| async {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ShuttingDown));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
        // No quota was spent.
        assert_eq!(gw.limiter().get_remaining("trends"), Some(5));
    }

    #[test]
    fn test_token_recommendations() {
        let report = |minutes: Option<i64>| {
            TokenReport::new(TokenStatus {
                service: "youtube".into(),
                account: "default".into(),
                status: crate::auth::TokenState::Valid,
                expiry: None,
                minutes_remaining: minutes,
                needs_refresh: false,
            })
            .recommendation
        };
        assert_eq!(report(None), None);
        assert_eq!(
            report(Some(12)).as_deref(),
            Some("Token expiring soon. Will auto-refresh before next call.")
        );
        assert_eq!(
            report(Some(45)).as_deref(),
            Some("Token healthy but monitor for long operations.")
        );
        assert_eq!(report(Some(90)).as_deref(), Some("Token healthy."));
    }
}
