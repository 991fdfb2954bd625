//! OAuth 2.0 building blocks: the token endpoint, the consent request, and PKCE.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::{Client, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::credential::{ClientSecret, Credential, TokenResponse};
use crate::error::{Error, Result};

pub const GOOGLE_REVOKE_URI: &str = "https://oauth2.googleapis.com/revoke";

/// Remote OAuth token operations.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Trade an authorization code for tokens.
    async fn exchange_code(
        &self,
        client: &ClientSecret,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse>;

    /// Obtain a new access token with the credential's refresh token.
    async fn refresh(&self, credential: &Credential) -> Result<TokenResponse>;

    async fn revoke(&self, token: &str) -> Result<()>;
}

/// Parameters the consent flow needs to build the authorization URL.
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub auth_uri: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub state: String,
    pub code_challenge: String,
}

impl ConsentRequest {
    pub fn authorization_url(&self, redirect_uri: &str) -> Result<Url> {
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("state", self.state.as_str()),
                ("code_challenge", self.code_challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| Error::AuthenticationFailed(format!("invalid auth_uri '{}': {}", self.auth_uri, e)))
    }
}

/// What the user's browser handed back to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: Option<String>,
    pub redirect_uri: String,
}

/// Interactive step that sends the user to the consent screen and returns
/// the authorization code.
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    async fn request_code(&self, request: &ConsentRequest) -> Result<AuthorizationResponse>;
}

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier = format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

pub fn random_state() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// [`TokenEndpoint`] backed by Google's OAuth servers.
#[derive(Debug, Clone)]
pub struct GoogleTokenEndpoint {
    http: Client,
    revoke_uri: String,
}

impl Default for GoogleTokenEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleTokenEndpoint {
    pub fn new() -> Self {
        Self::with_revoke_uri(GOOGLE_REVOKE_URI)
    }

    pub fn with_revoke_uri(revoke_uri: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            revoke_uri: revoke_uri.into(),
        }
    }

    async fn post_token(&self, token_uri: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        debug!("POST {}", token_uri);
        let response = self.http.post(token_uri).form(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AuthenticationFailed(describe_oauth_error(status.as_u16(), &body)));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    async fn exchange_code(
        &self,
        client: &ClientSecret,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse> {
        self.post_token(
            &client.token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("code_verifier", code_verifier),
            ],
        )
        .await
    }

    async fn refresh(&self, credential: &Credential) -> Result<TokenResponse> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::AuthenticationFailed("credential has no refresh token".to_string()))?;

        self.post_token(
            &credential.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", credential.client_id.as_str()),
                ("client_secret", credential.client_secret.as_str()),
            ],
        )
        .await
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.revoke_uri)
            .form(&[("token", token)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ApiRequest {
                status: Some(status.as_u16()),
                message: describe_oauth_error(status.as_u16(), &body),
            });
        }
        Ok(())
    }
}

fn describe_oauth_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(err) => match err.error_description {
            Some(description) => format!("{} ({}): {}", err.error, status, description),
            None => format!("{} ({})", err.error, status),
        },
        Err(_) => format!("status {}: {}", status, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_rfc7636_vector() {
        let challenge = Pkce::challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_pkce_verifier_shape() {
        let pkce = Pkce::generate();
        assert_eq!(pkce.verifier.len(), 64);
        assert!(pkce.verifier.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(pkce.verifier, Pkce::generate().verifier);
    }

    #[test]
    fn test_authorization_url() {
        let request = ConsentRequest {
            auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
            client_id: "client".to_string(),
            scopes: vec!["a".to_string(), "b".to_string()],
            state: "xyz".to_string(),
            code_challenge: "challenge".to_string(),
        };
        let url = request.authorization_url("http://127.0.0.1:8080/").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("scope".to_string(), "a b".to_string())));
        assert!(pairs.contains(&("redirect_uri".to_string(), "http://127.0.0.1:8080/".to_string())));
        assert!(pairs.contains(&("code_challenge_method".to_string(), "S256".to_string())));
        assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
    }

    #[test]
    fn test_describe_oauth_error() {
        let body = r#"{"error": "invalid_grant", "error_description": "Token has been expired or revoked."}"#;
        assert_eq!(
            describe_oauth_error(400, body),
            "invalid_grant (400): Token has been expired or revoked."
        );
        assert_eq!(describe_oauth_error(502, "bad gateway"), "status 502: bad gateway");
    }
}
