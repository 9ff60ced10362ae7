//! Credential records and their durable storage.
//!
//! One JSON file per (service, account) under the credentials directory:
//! `token_{service}.json` for the default account and
//! `token_{service}_{account}.json` otherwise. Underscores in the account
//! are written as `%5F`, so the last `_` always ends the service name. A
//! missing file is the normal "never authorized" state.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::config::validation::is_file_safe;

/// Account used when the caller does not name one.
pub const DEFAULT_ACCOUNT: &str = "default";

/// Google's token endpoint, assumed for records that do not carry one.
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Cache key shared by the credential and expiry caches.
pub fn cache_key(service: &str, account: &str) -> String {
    format!("{service}:{account}")
}

/// An OAuth credential for one (service, account) pair.
///
/// `service` and `account` identify the record and are not part of the
/// persisted document; they come from the file name.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(skip)]
    pub service: String,
    #[serde(skip)]
    pub account: String,
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri", deserialize_with = "token_uri_or_default")]
    pub token_uri: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub scopes: Vec<String>,
    #[serde(default, with = "iso8601")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

fn token_uri_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_token_uri))
}

// Older records write `null` for fields they never knew.
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

impl Credential {
    pub fn key(&self) -> String {
        cache_key(&self.service, &self.account)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    /// Holds an access token that has not expired. Tokens without an expiry never expire.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && !self.is_expired_at(now)
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expiry.map(|expiry| expiry - now)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("service", &self.service)
            .field("account", &self.account)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// RFC 3339 timestamps; naive timestamps from older records are read as UTC.
mod iso8601 {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(at) => s.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let Some(raw) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(at.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Some(naive.and_utc()))
            .map_err(|e| de::Error::custom(format!("invalid expiry {raw:?}: {e}")))
    }
}

/// Errors from durable credential storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid name for credential file: {0}")]
    InvalidName(String),
}

/// Durable storage for credential records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the record for (service, account). `Ok(None)` when there is no usable record.
    async fn load(&self, service: &str, account: &str) -> Result<Option<Credential>, StoreError>;

    /// Persist `credential`, replacing any previous record for its key.
    async fn save(&self, credential: &Credential) -> Result<(), StoreError>;
}

/// One JSON file per (service, account) in a directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
    services: BTreeSet<String>,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            services: BTreeSet::new(),
        }
    }

    /// Known service names. An account whose file would shadow another
    /// service's default-account file is rejected.
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, service: &str, account: &str) -> Result<PathBuf, StoreError> {
        for name in [service, account] {
            if !is_file_safe(name) {
                return Err(StoreError::InvalidName(name.to_string()));
            }
        }
        let file = if account == DEFAULT_ACCOUNT {
            format!("token_{service}.json")
        } else {
            let stem = format!("{service}_{}", account.replace('_', "%5F"));
            if self.services.contains(&stem) {
                return Err(StoreError::InvalidName(format!(
                    "{service}:{account} shares a file with service {stem}"
                )));
            }
            format!("token_{stem}.json")
        };
        Ok(self.dir.join(file))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, service: &str, account: &str) -> Result<Option<Credential>, StoreError> {
        let path = self.path_for(service, account)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable credential file, ignoring");
                return Ok(None);
            }
        };

        match serde_json::from_str::<Credential>(&content) {
            Ok(mut credential) => {
                credential.service = service.to_string();
                credential.account = account.to_string();
                tracing::debug!(service = %service, account = %account, "Credential loaded");
                Ok(Some(credential))
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Corrupt credential file, ignoring");
                Ok(None)
            }
        }
    }

    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let path = self.path_for(&credential.service, &credential.account)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let content = serde_json::to_string_pretty(credential)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;

        // Set file permissions to user-only (Unix)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &path).await?;
        tracing::info!(
            service = %credential.service,
            account = %credential.account,
            "Credentials saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credential(account: &str) -> Credential {
        Credential {
            service: "youtube".into(),
            account: account.into(),
            access_token: "ya29.access".into(),
            refresh_token: Some("1//refresh".into()),
            token_uri: GOOGLE_TOKEN_URI.into(),
            client_id: "client.apps.googleusercontent.com".into(),
            client_secret: Some("secret".into()),
            scopes: vec!["https://www.googleapis.com/auth/youtube.upload".into()],
            expiry: Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()),
        }
    }

    #[test]
    fn test_validity_helpers() {
        let now = Utc.with_ymd_and_hms(2030, 1, 2, 2, 4, 5).unwrap();
        let cred = credential(DEFAULT_ACCOUNT);

        assert!(cred.is_valid_at(now));
        assert_eq!(cred.remaining_at(now), Some(Duration::hours(1)));
        assert!(!cred.is_valid_at(now + Duration::hours(1)));

        let forever = Credential { expiry: None, ..cred };
        assert!(forever.is_valid_at(now + Duration::days(3650)));
        assert_eq!(forever.remaining_at(now), None);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", credential(DEFAULT_ACCOUNT));
        assert!(!rendered.contains("ya29.access"));
        assert!(!rendered.contains("1//refresh"));
        assert!(rendered.contains("youtube"));
    }

    #[test]
    fn test_file_names() {
        let store = FileCredentialStore::new("/creds");
        assert_eq!(
            store.path_for("youtube", DEFAULT_ACCOUNT).unwrap(),
            PathBuf::from("/creds/token_youtube.json")
        );
        assert_eq!(
            store.path_for("youtube", "UC123").unwrap(),
            PathBuf::from("/creds/token_youtube_UC123.json")
        );
        assert!(matches!(
            store.path_for("youtube", "../etc"),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn test_file_names_never_collide_across_services() {
        let store = FileCredentialStore::new("/creds").with_services(["youtube", "youtube_analytics"]);

        let split_account = store.path_for("youtube", "analytics_UC1").unwrap();
        let split_service = store.path_for("youtube_analytics", "UC1").unwrap();
        assert_ne!(split_account, split_service);
        assert_eq!(split_account, PathBuf::from("/creds/token_youtube_analytics%5FUC1.json"));
        assert_eq!(split_service, PathBuf::from("/creds/token_youtube_analytics_UC1.json"));

        // Would be the default-account file of `youtube_analytics`.
        assert!(matches!(
            store.path_for("youtube", "analytics"),
            Err(StoreError::InvalidName(_))
        ));
        assert_eq!(
            store.path_for("youtube_analytics", DEFAULT_ACCOUNT).unwrap(),
            PathBuf::from("/creds/token_youtube_analytics.json")
        );
    }

    #[tokio::test]
    async fn test_underscored_account_keeps_its_own_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).with_services(["youtube", "youtube_analytics"]);

        let mut channel = credential("analytics_UC1");
        channel.access_token = "channel-token".into();
        let mut analytics = credential("UC1");
        analytics.service = "youtube_analytics".into();
        analytics.access_token = "analytics-token".into();
        store.save(&channel).await.unwrap();
        store.save(&analytics).await.unwrap();

        let loaded = store.load("youtube", "analytics_UC1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "channel-token");
        let loaded = store.load("youtube_analytics", "UC1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "analytics-token");
    }

    #[tokio::test]
    async fn test_null_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("token_youtube.json"),
            r#"{"token": "abc", "refresh_token": "1//r", "token_uri": null,
                "client_id": null, "client_secret": null, "scopes": null, "expiry": null}"#,
        )
        .unwrap();

        let store = FileCredentialStore::new(dir.path());
        let loaded = store.load("youtube", DEFAULT_ACCOUNT).await.unwrap().unwrap();
        assert_eq!(loaded.token_uri, GOOGLE_TOKEN_URI);
        assert_eq!(loaded.client_id, "");
        assert!(loaded.scopes.is_empty());
        assert!(loaded.expiry.is_none());
        assert!(loaded.can_refresh());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        assert!(store.load("youtube", DEFAULT_ACCOUNT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_then_save_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested"));
        store.save(&credential("UC123")).await.unwrap();

        let path = store.path_for("youtube", "UC123").unwrap();
        let before = std::fs::read(&path).unwrap();

        let loaded = store.load("youtube", "UC123").await.unwrap().unwrap();
        assert_eq!(loaded, credential("UC123"));
        store.save(&loaded).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_reads_naive_expiry_and_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("token_youtube.json"),
            r#"{"token": "abc", "refresh_token": null, "expiry": "2030-01-02T03:04:05.250000"}"#,
        )
        .unwrap();

        let store = FileCredentialStore::new(dir.path());
        let loaded = store.load("youtube", DEFAULT_ACCOUNT).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "abc");
        assert_eq!(loaded.token_uri, GOOGLE_TOKEN_URI);
        assert!(loaded.scopes.is_empty());
        assert_eq!(
            loaded.expiry,
            Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap() + Duration::milliseconds(250))
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token_youtube.json"), r#"{"token": "trunc"#).unwrap();

        let store = FileCredentialStore::new(dir.path());
        assert!(store.load("youtube", DEFAULT_ACCOUNT).await.unwrap().is_none());
    }
}
