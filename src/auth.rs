//! Credential lifecycle: load the persisted token, refresh it, or fall back to
//! interactive authorization, and persist whatever comes out.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::credential::{default_scopes, ClientSecret, Credential};
use crate::error::{Error, Result};
use crate::loopback::LoopbackFlow;
use crate::oauth::{random_state, ConsentFlow, ConsentRequest, GoogleTokenEndpoint, Pkce, TokenEndpoint};
use crate::persist;

pub const DEFAULT_CLIENT_SECRET_PATH: &str = "credentials.json";
pub const DEFAULT_TOKEN_PATH: &str = "token.json";

/// Supplies the bearer token for each API request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
}

/// A fixed token that is never refreshed.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Owns the OAuth token for the current user.
pub struct CredentialManager<T, F> {
    client_secret_path: PathBuf,
    token_path: PathBuf,
    scopes: Vec<String>,
    endpoint: T,
    consent: F,
    credential: Option<Credential>,
}

/// The production pairing: Google's token endpoint and the loopback consent flow.
pub type GoogleCredentialManager = CredentialManager<GoogleTokenEndpoint, LoopbackFlow>;

impl GoogleCredentialManager {
    pub fn google(client_secret_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
        Self::new(
            client_secret_path,
            token_path,
            GoogleTokenEndpoint::new(),
            LoopbackFlow::new(),
        )
    }
}

impl<T: TokenEndpoint, F: ConsentFlow> CredentialManager<T, F> {
    pub fn new(
        client_secret_path: impl Into<PathBuf>,
        token_path: impl Into<PathBuf>,
        endpoint: T,
        consent: F,
    ) -> Self {
        Self {
            client_secret_path: client_secret_path.into(),
            token_path: token_path.into(),
            scopes: default_scopes(),
            endpoint,
            consent,
            credential: None,
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    pub fn client_secret_path(&self) -> &Path {
        &self.client_secret_path
    }

    pub fn cached(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Return a valid credential, refreshing or re-authorizing as needed.
    pub async fn authenticate(&mut self) -> Result<Credential> {
        let now = Utc::now();

        if let Some(cached) = self.credential.as_ref().filter(|c| c.is_valid(now, &self.scopes)) {
            return Ok(cached.clone());
        }

        if let Some(stored) = self.load_persisted() {
            if stored.is_valid(now, &self.scopes) {
                debug!("Reusing stored credential");
                self.credential = Some(stored.clone());
                return Ok(stored);
            }

            if !stored.has_scopes(&self.scopes) {
                info!("Stored credential lacks required scopes, re-authorizing");
            } else if stored.can_refresh() {
                match self.refresh(stored).await {
                    Ok(refreshed) => return Ok(refreshed),
                    Err(e) => warn!("Error refreshing token: {}", e),
                }
            } else {
                info!("Stored credential expired without a refresh token, re-authorizing");
            }
        }

        self.reauthorize().await
    }

    /// Bearer token of a valid credential.
    pub async fn access_token(&mut self) -> Result<String> {
        Ok(self.authenticate().await?.token)
    }

    /// True when a token file exists and the in-memory credential is valid.
    /// Never touches the network.
    pub fn is_authenticated(&self) -> bool {
        self.token_path.exists()
            && self
                .credential
                .as_ref()
                .is_some_and(|c| c.is_valid(Utc::now(), &self.scopes))
    }

    /// Delete the token file and forget the cached credential.
    pub fn clear_credentials(&mut self) -> Result<()> {
        self.credential = None;
        if persist::remove_if_exists(&self.token_path)? {
            info!("Removed stored credential {}", self.token_path.display());
        }
        Ok(())
    }

    /// Revoke the stored grant at Google (best effort) and clear local state.
    pub async fn revoke(&mut self) -> Result<()> {
        let stored = self.load_persisted().or_else(|| self.credential.clone());
        if let Some(credential) = stored {
            let token = credential.refresh_token.clone().unwrap_or(credential.token);
            if !token.is_empty() {
                match self.endpoint.revoke(&token).await {
                    Ok(()) => info!("Revoked OAuth grant"),
                    Err(e) => warn!("Could not revoke token: {}", e),
                }
            }
        }
        self.clear_credentials()
    }

    fn load_persisted(&self) -> Option<Credential> {
        match Credential::load(&self.token_path) {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Ignoring unreadable token file {}: {}", self.token_path.display(), e);
                None
            }
        }
    }

    async fn refresh(&mut self, mut credential: Credential) -> Result<Credential> {
        info!("Access token expired, refreshing");
        let response = self.endpoint.refresh(&credential).await?;
        credential.apply(response, Utc::now());
        self.store(&credential);
        Ok(credential)
    }

    async fn reauthorize(&mut self) -> Result<Credential> {
        if !self.client_secret_path.exists() {
            return Err(Error::CredentialsFileMissing {
                path: self.client_secret_path.clone(),
            });
        }

        info!("Starting interactive authorization");
        let credential = self
            .run_consent_flow()
            .await
            .map_err(|e| match e {
                Error::CredentialsFileMissing { .. } | Error::AuthenticationFailed(_) => e,
                other => Error::AuthenticationFailed(other.to_string()),
            })?;

        self.store(&credential);
        Ok(credential)
    }

    async fn run_consent_flow(&self) -> Result<Credential> {
        let client = ClientSecret::from_file(&self.client_secret_path)?;
        let pkce = Pkce::generate();
        let request = ConsentRequest {
            auth_uri: client.auth_uri.clone(),
            client_id: client.client_id.clone(),
            scopes: self.scopes.clone(),
            state: random_state(),
            code_challenge: pkce.challenge.clone(),
        };

        let authorization = self.consent.request_code(&request).await?;
        if authorization.state.as_deref() != Some(request.state.as_str()) {
            return Err(Error::AuthenticationFailed(
                "authorization response state does not match the request".to_string(),
            ));
        }

        let response = self
            .endpoint
            .exchange_code(&client, &authorization.code, &authorization.redirect_uri, &pkce.verifier)
            .await?;

        Ok(Credential::from_token_response(&client, response, &self.scopes, Utc::now()))
    }

    /// Persist and cache. A failed write is logged; the credential is still
    /// usable for this run.
    fn store(&mut self, credential: &Credential) {
        if let Err(e) = credential.save(&self.token_path) {
            error!("Failed to save credential to {}: {}", self.token_path.display(), e);
        }
        self.credential = Some(credential.clone());
    }
}

/// A shared manager checks expiry on every request, so a token that runs out
/// mid-run is refreshed before the next call.
#[async_trait]
impl<T: TokenEndpoint, F: ConsentFlow> TokenSource for Mutex<CredentialManager<T, F>> {
    async fn bearer_token(&self) -> Result<String> {
        self.lock().await.access_token().await
    }
}
