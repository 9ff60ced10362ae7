//! Shared utilities for integration tests.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use mcp_gateway::auth::credentials::GOOGLE_TOKEN_URI;
use mcp_gateway::auth::{AuthError, AuthManager, Credential, FileCredentialStore, TokenProvider};

/// Start a token endpoint that answers every request with `(status, json)`.
///
/// Returns the bound address and the request bodies seen so far.
#[allow(dead_code)]
pub async fn start_token_endpoint(
    status: u16,
    body: &'static str,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let requests = seen.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        let request_body = read_request_body(&mut socket).await;
                        requests.lock().unwrap().push(request_body);

                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            401 => "401 Unauthorized",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, seen)
}

async fn read_request_body(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(split) = text.find("\r\n\r\n") {
            let content_length = text[..split]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= split + 4 + content_length {
                return String::from_utf8_lossy(&buf[split + 4..split + 4 + content_length])
                    .into_owned();
            }
        }
    }
    String::new()
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Credential with `minutes_left` of validity (negative means already expired).
#[allow(dead_code)]
pub fn credential(service: &str, account: &str, minutes_left: i64) -> Credential {
    Credential {
        service: service.into(),
        account: account.into(),
        access_token: "ya29.initial".into(),
        refresh_token: Some("stored-refresh-token".into()),
        token_uri: GOOGLE_TOKEN_URI.into(),
        client_id: "test-client.apps.googleusercontent.com".into(),
        client_secret: Some("test-secret".into()),
        scopes: vec!["https://www.googleapis.com/auth/youtube.upload".into()],
        expiry: Some(Utc::now() + chrono::Duration::minutes(minutes_left)),
    }
}

/// Token provider that never touches the network.
#[derive(Default)]
pub struct FakeTokenProvider {
    pub refreshes: AtomicU32,
    pub authorizations: AtomicU32,
}

#[async_trait]
impl TokenProvider for FakeTokenProvider {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Credential {
            access_token: format!("ya29.refreshed-{n}"),
            expiry: Some(Utc::now() + chrono::Duration::hours(1)),
            ..credential.clone()
        })
    }

    async fn authorize(
        &self,
        service: &str,
        account: &str,
        _scopes: &[String],
    ) -> Result<Credential, AuthError> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        Ok(credential(service, account, 60))
    }
}

/// Auth manager over a file store in `dir`, knowing the `youtube` service.
#[allow(dead_code)]
pub fn auth_manager(
    dir: &std::path::Path,
    provider: Arc<dyn TokenProvider>,
) -> AuthManager {
    let mut services = BTreeMap::new();
    services.insert(
        "youtube".to_string(),
        vec!["https://www.googleapis.com/auth/youtube.upload".to_string()],
    );
    AuthManager::new(
        Arc::new(FileCredentialStore::new(dir)),
        provider,
        services,
        Duration::from_secs(600),
    )
}
