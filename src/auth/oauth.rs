//! OAuth 2.0 token acquisition against Google's endpoints.
//!
//! Two operations: exchanging a refresh token for a fresh access token, and
//! the interactive installed-app flow (browser consent, PKCE, loopback
//! redirect) used the first time a service is authorized.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use http_body_util::Full;
use hyper::body::{self, Bytes};
use hyper::service::service_fn;
use hyper::{Request, Response};
use oauth2::basic::{BasicClient, BasicErrorResponseType};
use oauth2::{
    reqwest, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use thiserror::Error;

use super::credentials::{cache_key, Credential, StoreError, GOOGLE_TOKEN_URI};

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// How long the loopback receiver waits for the user to finish consent.
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

const CONSENT_DONE_HTML: &str = "<html><body><h3>Authorization complete.</h3>\
    <p>You can close this window and return to the terminal.</p></body></html>";

/// Credential management errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The refresh token was rejected; a human must consent again.
    #[error("credentials for {key} need re-authorization: {reason}")]
    ReconsentRequired { key: String, reason: String },

    /// The token endpoint could not be reached or answered badly; retry later.
    #[error("token refresh for {key} failed: {reason}")]
    Transient { key: String, reason: String },

    #[error("authorization for {key} failed: {reason}")]
    Authorization { key: String, reason: String },

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("OAuth configuration error: {0}")]
    Configuration(String),

    #[error("credential storage error: {0}")]
    Storage(#[from] StoreError),
}

impl AuthError {
    pub fn needs_reconsent(&self) -> bool {
        matches!(self, AuthError::ReconsentRequired { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Transient { .. })
    }
}

/// Source of access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Exchange the credential's refresh token for a new access token.
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError>;

    /// Obtain a brand new credential through user consent.
    async fn authorize(
        &self,
        service: &str,
        account: &str,
        scopes: &[String],
    ) -> Result<Credential, AuthError>;
}

/// Client registration as downloaded from the Google Cloud console.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientRegistration>,
    web: Option<ClientRegistration>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientRegistration {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    auth_uri: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// Google OAuth client for installed applications.
#[derive(Debug, Clone)]
pub struct GoogleOAuth {
    client_secrets_file: PathBuf,
    http: reqwest::Client,
}

impl GoogleOAuth {
    pub fn new(client_secrets_file: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let http = reqwest::ClientBuilder::new()
            // Token endpoints never redirect.
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client_secrets_file: client_secrets_file.into(),
            http,
        })
    }

    async fn registration(&self) -> Result<ClientRegistration, AuthError> {
        let path = &self.client_secrets_file;
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AuthError::Configuration(format!(
                "cannot read client secrets {}: {e}",
                path.display()
            ))
        })?;
        let file: ClientSecretsFile = serde_json::from_str(&content).map_err(|e| {
            AuthError::Configuration(format!("invalid client secrets {}: {e}", path.display()))
        })?;
        file.installed.or(file.web).ok_or_else(|| {
            AuthError::Configuration(format!(
                "{} has neither an 'installed' nor a 'web' section",
                path.display()
            ))
        })
    }
}

#[async_trait]
impl TokenProvider for GoogleOAuth {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let key = credential.key();
        let Some(refresh_token) = credential.refresh_token.clone().filter(|t| !t.is_empty()) else {
            return Err(AuthError::ReconsentRequired {
                key,
                reason: "no refresh token available".to_string(),
            });
        };

        let token_url = TokenUrl::new(credential.token_uri.clone())
            .map_err(|e| AuthError::Configuration(format!("token_uri: {e}")))?;
        let mut client =
            BasicClient::new(ClientId::new(credential.client_id.clone())).set_token_uri(token_url);
        if let Some(secret) = &credential.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        tracing::debug!(key = %key, "Refreshing OAuth token");
        let refresh_token = RefreshToken::new(refresh_token);
        let response = client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(ref sr)
                    if matches!(sr.error(), BasicErrorResponseType::InvalidGrant) =>
                {
                    AuthError::ReconsentRequired {
                        key: key.clone(),
                        reason: e.to_string(),
                    }
                }
                RequestTokenError::ServerResponse(sr) => AuthError::Transient {
                    key: key.clone(),
                    reason: sr.to_string(),
                },
                RequestTokenError::Request(err) => AuthError::Transient {
                    key: key.clone(),
                    reason: format!("token endpoint unreachable: {err}"),
                },
                other => AuthError::Transient {
                    key: key.clone(),
                    reason: other.to_string(),
                },
            })?;

        Ok(refreshed_credential(credential, &response))
    }

    async fn authorize(
        &self,
        service: &str,
        account: &str,
        scopes: &[String],
    ) -> Result<Credential, AuthError> {
        let key = cache_key(service, account);
        let failed = |reason: String| AuthError::Authorization {
            key: key.clone(),
            reason,
        };

        let registration = self.registration().await?;
        let auth_url = AuthUrl::new(registration.auth_uri.clone())
            .map_err(|e| AuthError::Configuration(format!("auth_uri: {e}")))?;
        let token_url = TokenUrl::new(registration.token_uri.clone())
            .map_err(|e| AuthError::Configuration(format!("token_uri: {e}")))?;

        let csrf = CsrfToken::new_random();
        let (redirect_url, authorization_code) = setup_redirect(csrf.clone())
            .await
            .map_err(|e| failed(format!("redirect receiver: {e}")))?;

        let mut client = BasicClient::new(ClientId::new(registration.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);
        if let Some(secret) = &registration.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (consent_url, _) = client
            .authorize_url(move || csrf.clone())
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        tracing::info!(service = %service, account = %account, url = %consent_url, "Asking user to complete OAuth consent");
        if let Err(e) = webbrowser::open(consent_url.as_str()) {
            tracing::warn!(error = %e, "Could not open a browser; open the URL manually");
        }

        let code = tokio::time::timeout(CONSENT_TIMEOUT, authorization_code)
            .await
            .map_err(|_| failed("timed out waiting for consent".to_string()))?
            .map_err(failed)?;

        let response = client
            .exchange_code(code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http)
            .await
            .map_err(|e| failed(format!("code exchange: {e}")))?;

        let template = Credential {
            service: service.to_string(),
            account: account.to_string(),
            access_token: String::new(),
            refresh_token: None,
            token_uri: registration.token_uri,
            client_id: registration.client_id,
            client_secret: registration.client_secret,
            scopes: scopes.to_vec(),
            expiry: None,
        };
        let credential = refreshed_credential(&template, &response);
        tracing::info!(service = %service, account = %account, "OAuth authorization complete");
        Ok(credential)
    }
}

/// Merge a token endpoint response into an existing credential.
///
/// Google omits the refresh token on refresh responses; the old one stays.
pub(crate) fn refreshed_credential<R: TokenResponse>(base: &Credential, response: &R) -> Credential {
    let now = Utc::now();
    let expiry = response
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| now + d);
    let scopes = response
        .scopes()
        .map(|granted| granted.iter().map(|s| s.to_string()).collect())
        .unwrap_or_else(|| base.scopes.clone());

    Credential {
        access_token: response.access_token().secret().clone(),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| base.refresh_token.clone()),
        scopes,
        expiry,
        ..base.clone()
    }
}

/// Bind a loopback receiver for the OAuth redirect.
///
/// Returns the redirect URL and a future resolving to the authorization
/// code once the browser lands on it with a matching `state`.
async fn setup_redirect(
    csrf: CsrfToken,
) -> Result<(RedirectUrl, impl Future<Output = Result<AuthorizationCode, String>>), String> {
    let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("bind to localhost: {e}"))?;
    let addr = socket.local_addr().map_err(|e| e.to_string())?;
    let url = RedirectUrl::new(format!("http://{}:{}", addr.ip(), addr.port()))
        .map_err(|e| e.to_string())?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let received = async move {
            let (conn, _) = socket.accept().await.map_err(|e| format!("accept: {e}"))?;
            let conn = hyper_util::rt::TokioIo::new(conn);
            let (got, mut gotten) = tokio::sync::mpsc::channel(1);
            let service = service_fn(move |req: Request<body::Incoming>| {
                let csrf = csrf.clone();
                let got = got.clone();
                async move {
                    let mut state = None;
                    let mut code = None;
                    for (k, v) in form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
                    {
                        match &*k {
                            "state" => state = Some(v),
                            "code" => code = Some(v),
                            _ => {}
                        }
                    }
                    if state.as_deref() != Some(csrf.secret().as_str()) {
                        return Err("invalid csrf token");
                    }
                    let Some(code) = code else {
                        return Err("no authorization code found");
                    };
                    let _ = got.send(AuthorizationCode::new(code.into_owned())).await;
                    Ok(Response::new(Full::<Bytes>::from(CONSENT_DONE_HTML)))
                }
            });
            let mut serve = std::pin::pin!(
                hyper::server::conn::http1::Builder::new().serve_connection(conn, service)
            );

            tokio::select! {
                exit = &mut serve => match exit {
                    Err(e) => Err(format!("redirect receiver got a bad request: {e}")),
                    Ok(()) => Err("redirect receiver exited before receiving a code".to_string()),
                },
                code = gotten.recv() => {
                    serve.as_mut().graceful_shutdown();
                    code.ok_or_else(|| "redirect receiver closed".to_string())
                }
            }
        };
        let _ = tx.send(received.await);
    });

    Ok((url, async move {
        rx.await
            .map_err(|_| "redirect receiver dropped".to_string())?
    }))
}
