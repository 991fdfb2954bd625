//! Installed-app consent flow with a short-lived listener on 127.0.0.1.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use reqwest::Url;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::oauth::{AuthorizationResponse, ConsentFlow, ConsentRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const SUCCESS_PAGE: &str = "<html><body><h3>Authorization complete.</h3>\
<p>You may close this window and return to the terminal.</p></body></html>";
const DENIED_PAGE: &str = "<html><body><h3>Authorization was not granted.</h3>\
<p>You may close this window.</p></body></html>";

/// Outcome carried by the redirect back to the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Code { code: String, state: Option<String> },
    Denied(String),
}

/// Parse the request target of a redirect (`/?code=...&state=...`).
/// `None` means the request is not an authorization callback.
pub fn parse_callback(target: &str) -> Option<Callback> {
    let url = Url::parse(&format!("http://127.0.0.1{}", target)).ok()?;
    if url.path() != "/" {
        return None;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => Some(Callback::Denied(error)),
        (Some(code), None) => Some(Callback::Code { code, state }),
        (None, None) => None,
    }
}

type Announce = Box<dyn Fn(&Url) + Send + Sync>;

/// [`ConsentFlow`] that points the user at the consent screen and waits for
/// the browser to be redirected to a local listener.
pub struct LoopbackFlow {
    host: IpAddr,
    port: u16,
    timeout: Duration,
    announce: Announce,
}

impl Default for LoopbackFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackFlow {
    pub fn new() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            timeout: DEFAULT_TIMEOUT,
            announce: Box::new(|url| {
                println!("Please visit this URL to authorize this application:\n\n    {}\n", url);
            }),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace how the consent URL is shown to the user.
    pub fn with_announce(mut self, announce: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.announce = Box::new(announce);
        self
    }
}

/// Hands the first callback to the waiting flow. Later callbacks still get a
/// page but are otherwise dropped.
#[derive(Clone)]
struct CallbackState {
    sender: Arc<Mutex<Option<oneshot::Sender<Callback>>>>,
}

async fn receive_callback(State(state): State<CallbackState>, uri: Uri) -> Response {
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let Some(callback) = parse_callback(target) else {
        debug!("Ignoring request for {}", target);
        return StatusCode::NOT_FOUND.into_response();
    };

    let page = match callback {
        Callback::Code { .. } => SUCCESS_PAGE,
        Callback::Denied(_) => DENIED_PAGE,
    };
    match state.sender.lock().await.take() {
        Some(sender) => {
            if sender.send(callback).is_err() {
                warn!("Authorization arrived after the flow stopped waiting");
            }
        }
        None => debug!("Authorization already received, ignoring repeat callback"),
    }
    Html(page).into_response()
}

#[async_trait]
impl ConsentFlow for LoopbackFlow {
    async fn request_code(&self, request: &ConsentRequest) -> Result<AuthorizationResponse> {
        let listener = TcpListener::bind((self.host, self.port))
            .await
            .map_err(|e| Error::AuthenticationFailed(format!("cannot start local callback listener: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::AuthenticationFailed(format!("cannot read listener address: {}", e)))?;

        let redirect_uri = format!("http://{}:{}/", addr.ip(), addr.port());
        let url = request.authorization_url(&redirect_uri)?;

        let (callback_tx, callback_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = Router::new()
            .route("/", get(receive_callback))
            .with_state(CallbackState {
                sender: Arc::new(Mutex::new(Some(callback_tx))),
            });
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        (self.announce)(&url);
        info!("Waiting up to {}s for authorization on {}", self.timeout.as_secs(), redirect_uri);

        let received = tokio::time::timeout(self.timeout, callback_rx).await;
        let _ = shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
            Ok(Ok(Ok(()))) => debug!("Callback listener stopped"),
            Ok(Ok(Err(e))) => warn!("Callback listener failed: {}", e),
            Ok(Err(e)) => warn!("Callback listener task failed: {}", e),
            Err(_) => debug!("Callback listener still draining connections"),
        }

        let callback = match received {
            Ok(Ok(callback)) => callback,
            Ok(Err(_)) => {
                return Err(Error::AuthenticationFailed(
                    "callback listener stopped before authorization".to_string(),
                ))
            }
            Err(_) => {
                return Err(Error::AuthenticationFailed(format!(
                    "no authorization received within {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        match callback {
            Callback::Code { code, state } => Ok(AuthorizationResponse {
                code,
                state,
                redirect_uri,
            }),
            Callback::Denied(reason) => Err(Error::AuthenticationFailed(format!(
                "authorization denied: {}",
                reason
            ))),
        }
    }
}
