//! OAuth credential management.
//!
//! - `credentials`: credential records and file-backed storage
//! - `oauth`: token endpoint access and interactive consent
//! - `manager`: cache with pre-emptive refresh

pub mod credentials;
pub mod manager;
pub mod oauth;

pub use credentials::{Credential, CredentialStore, FileCredentialStore, StoreError, DEFAULT_ACCOUNT};
pub use manager::{AuthManager, TokenState, TokenStatus};
pub use oauth::{AuthError, GoogleOAuth, TokenProvider};
