//! OAuth credential material: the persisted user token and the client
//! secret downloaded from the Google Cloud console.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::persist;

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

pub const SPREADSHEETS_READONLY_SCOPE: &str =
    "https://www.googleapis.com/auth/spreadsheets.readonly";
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Scopes every credential must carry to list and read spreadsheets.
pub fn default_scopes() -> Vec<String> {
    vec![
        SPREADSHEETS_READONLY_SCOPE.to_string(),
        DRIVE_READONLY_SCOPE.to_string(),
    ]
}

/// Tokens are treated as expired this long before their actual expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// A user's OAuth token bundle, persisted between runs.
///
/// The field names match Google's "authorized user" token file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl Credential {
    /// Build a fresh credential from an authorization-code exchange.
    pub fn from_token_response(
        client: &ClientSecret,
        response: TokenResponse,
        requested_scopes: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let mut credential = Self {
            token: String::new(),
            refresh_token: None,
            token_uri: client.token_uri.clone(),
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            scopes: requested_scopes.to_vec(),
            expiry: None,
        };
        credential.apply(response, now);
        credential
    }

    /// Fold a token endpoint response into this credential. A missing refresh
    /// token or scope list keeps the previous one.
    pub fn apply(&mut self, response: TokenResponse, now: DateTime<Utc>) {
        self.token = response.access_token;
        self.expiry = response
            .expires_in
            .map(|secs| now + Duration::seconds(secs));
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if let Some(scope) = response.scope {
            let granted: Vec<String> = scope.split_whitespace().map(str::to_string).collect();
            if !granted.is_empty() {
                self.scopes = granted;
            }
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now + Duration::seconds(EXPIRY_SKEW_SECS) >= expiry,
            None => false,
        }
    }

    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }

    /// Usable as-is: a token is present, not expired, and covers `required`.
    pub fn is_valid(&self, now: DateTime<Utc>, required: &[String]) -> bool {
        !self.token.is_empty() && !self.is_expired(now) && self.has_scopes(required)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        persist::load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::save_json(path, self, true)
    }
}

/// Response body of the OAuth token endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// OAuth client registration (`credentials.json`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Read a client secret file. Fails with `CredentialsFileMissing` when
    /// the file does not exist.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file: ClientSecretFile = persist::load_json(path)?.ok_or_else(|| {
            Error::CredentialsFileMissing {
                path: path.to_path_buf(),
            }
        })?;
        Self::from_parts(file, path)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: ClientSecretFile = serde_json::from_str(json)?;
        Self::from_parts(file, Path::new("<inline>"))
    }

    fn from_parts(file: ClientSecretFile, path: &Path) -> Result<Self> {
        file.installed.or(file.web).ok_or_else(|| {
            Error::AuthenticationFailed(format!(
                "{} has neither an 'installed' nor a 'web' client",
                path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn credential(expiry: Option<DateTime<Utc>>) -> Credential {
        Credential {
            token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            scopes: default_scopes(),
            expiry,
        }
    }

    #[test]
    fn test_future_expiry_is_valid() {
        let cred = credential(Some(now() + Duration::hours(1)));
        assert!(cred.is_valid(now(), &default_scopes()));
    }

    #[test]
    fn test_expiry_within_skew_is_expired() {
        let cred = credential(Some(now() + Duration::seconds(30)));
        assert!(cred.is_expired(now()));
        assert!(!cred.is_valid(now(), &default_scopes()));
    }

    #[test]
    fn test_missing_expiry_is_not_expired() {
        assert!(credential(None).is_valid(now(), &default_scopes()));
    }

    #[test]
    fn test_missing_scope_is_invalid() {
        let mut cred = credential(Some(now() + Duration::hours(1)));
        cred.scopes = vec![SPREADSHEETS_READONLY_SCOPE.to_string()];
        assert!(!cred.has_scopes(&default_scopes()));
        assert!(!cred.is_valid(now(), &default_scopes()));
    }

    #[test]
    fn test_apply_keeps_refresh_token_when_absent() {
        let mut cred = credential(Some(now() - Duration::hours(1)));
        cred.apply(
            TokenResponse {
                access_token: "new".to_string(),
                expires_in: Some(3600),
                refresh_token: None,
                scope: None,
                token_type: Some("Bearer".to_string()),
            },
            now(),
        );
        assert_eq!(cred.token, "new");
        assert_eq!(cred.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(cred.expiry, Some(now() + Duration::hours(1)));
        assert_eq!(cred.scopes, default_scopes());
    }

    #[test]
    fn test_apply_replaces_granted_scopes() {
        let mut cred = credential(None);
        cred.apply(
            TokenResponse {
                access_token: "new".to_string(),
                expires_in: None,
                refresh_token: Some("rotated".to_string()),
                scope: Some(SPREADSHEETS_READONLY_SCOPE.to_string()),
                token_type: None,
            },
            now(),
        );
        assert_eq!(cred.refresh_token.as_deref(), Some("rotated"));
        assert_eq!(cred.scopes, vec![SPREADSHEETS_READONLY_SCOPE.to_string()]);
        assert_eq!(cred.expiry, None);
    }

    #[test]
    fn test_reads_authorized_user_file() {
        let json = json!({
            "token": "ya29.token",
            "refresh_token": "1//refresh",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "secret",
            "scopes": [SPREADSHEETS_READONLY_SCOPE, DRIVE_READONLY_SCOPE],
            "expiry": "2024-01-01T13:00:00.123456Z"
        });
        let cred: Credential = serde_json::from_value(json).unwrap();
        assert!(cred.is_valid(now(), &default_scopes()));
        assert!(cred.can_refresh());
    }

    #[test]
    fn test_client_secret_installed_and_web() {
        let installed = ClientSecret::from_json(
            r#"{"installed": {"client_id": "a", "client_secret": "b"}}"#,
        )
        .unwrap();
        assert_eq!(installed.client_id, "a");
        assert_eq!(installed.auth_uri, GOOGLE_AUTH_URI);
        assert_eq!(installed.token_uri, GOOGLE_TOKEN_URI);

        let web = ClientSecret::from_json(
            r#"{"web": {"client_id": "c", "client_secret": "d", "token_uri": "http://t"}}"#,
        )
        .unwrap();
        assert_eq!(web.token_uri, "http://t");

        assert!(matches!(
            ClientSecret::from_json("{}"),
            Err(Error::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_client_secret_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        assert!(matches!(
            ClientSecret::from_file(&path),
            Err(Error::CredentialsFileMissing { .. })
        ));
    }
}
