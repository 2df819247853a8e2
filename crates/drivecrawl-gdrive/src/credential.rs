//! OAuth credentials read from a token file.
//!
//! The file is JSON and holds one or more identities plus the name of the
//! default one:
//!
//! ```json
//! {
//!   "default": "alice@example.com",
//!   "client_id": "123.apps.googleusercontent.com",
//!   "client_secret": "…",
//!   "identities": {
//!     "alice@example.com": {
//!       "refresh_token": "1//0g…",
//!       "access_token": "ya29…",
//!       "expires_at": "2024-05-01T10:00:00Z"
//!     }
//!   }
//! }
//! ```
//!
//! Client id and secret may also be set per identity. Refreshed tokens live
//! in memory only; the file is never written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use drivecrawl_core::RemoteError;
use serde::Deserialize;

use crate::http::{http_client, send_json};

pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Tokens are treated as expired this long before their actual expiry.
const EXPIRY_SKEW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Deserialize)]
struct TokenFile {
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    identities: BTreeMap<String, IdentityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct IdentityEntry {
    refresh_token: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

/// All identities from one token file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    file: TokenFile,
}

impl TokenStore {
    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RemoteError::Auth(format!("cannot read token file {}: {e}", path.display()))
        })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, RemoteError> {
        let file: TokenFile = serde_json::from_str(text).map_err(|e| {
            RemoteError::Auth(format!("invalid token file {}: {e}", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.file.identities.keys().map(String::as_str)
    }

    pub fn default_identity(&self) -> Option<&str> {
        self.file.default.as_deref()
    }

    /// Resolve `identity` (or the default one) to a credential.
    ///
    /// With no identity requested and no default set, a file holding a
    /// single identity uses that one.
    pub fn get_credential(&self, identity: Option<&str>) -> Result<(String, Credential), RemoteError> {
        let requested = identity.filter(|s| !s.is_empty());
        let name = match requested.or(self.file.default.as_deref()) {
            Some(name) => name.to_string(),
            None if self.file.identities.len() == 1 => {
                self.file.identities.keys().next().cloned().unwrap_or_default()
            }
            None => {
                return Err(RemoteError::Auth(format!(
                    "no default identity in {}, pass one explicitly",
                    self.path.display()
                )));
            }
        };
        let entry = self.file.identities.get(&name).ok_or_else(|| {
            RemoteError::Auth(format!("unknown identity {name} in {}", self.path.display()))
        })?;

        let client_id = entry
            .client_id
            .clone()
            .or_else(|| self.file.client_id.clone())
            .ok_or_else(|| RemoteError::Auth(format!("no client_id for {name}")))?;
        let client_secret = entry
            .client_secret
            .clone()
            .or_else(|| self.file.client_secret.clone())
            .ok_or_else(|| RemoteError::Auth(format!("no client_secret for {name}")))?;
        let expires_at = match entry.expires_at.as_deref() {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| RemoteError::Auth(format!("invalid expires_at for {name}: {e}")))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let credential = Credential {
            identity: name.clone(),
            access_token: entry.access_token.clone(),
            refresh_token: entry.refresh_token.clone(),
            client_id,
            client_secret,
            expires_at,
        };
        Ok((name, credential))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// A refreshable OAuth credential for one identity.
#[derive(Clone)]
pub struct Credential {
    identity: String,
    access_token: Option<String>,
    refresh_token: String,
    client_id: String,
    client_secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.expires_at) {
            (None, _) => true,
            (Some(_), Some(exp)) => now >= exp - Duration::minutes(EXPIRY_SKEW_MINUTES),
            // no expiry info, refresh to be safe
            (Some(_), None) => true,
        }
    }

    /// Exchange the refresh token for a new access token.
    pub fn refresh(&mut self) -> Result<(), RemoteError> {
        let request = http_client().post(TOKEN_ENDPOINT).form(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ]);
        let resp: TokenResponse = send_json(request, None).map_err(|e| match e {
            RemoteError::Auth(_) => e,
            other => RemoteError::Auth(format!(
                "token refresh failed for {}: {other}",
                self.identity
            )),
        })?;
        self.apply(resp, Utc::now());
        log::debug!("Refreshed access token for {}", self.identity);
        Ok(())
    }

    fn apply(&mut self, resp: TokenResponse, now: DateTime<Utc>) {
        self.access_token = Some(resp.access_token);
        self.expires_at = resp.expires_in.map(|secs| now + Duration::seconds(secs));
        // Google may rotate the refresh token
        if let Some(rotated) = resp.refresh_token {
            self.refresh_token = rotated;
        }
    }

    /// Current access token, refreshing first when expired.
    pub fn bearer(&mut self) -> Result<String, RemoteError> {
        if self.is_expired() {
            self.refresh()?;
        }
        self.access_token
            .clone()
            .ok_or_else(|| RemoteError::Auth(format!("no access token for {}", self.identity)))
    }

    /// Forget the current access token so the next call refreshes.
    pub fn invalidate(&mut self) {
        self.access_token = None;
    }
}
