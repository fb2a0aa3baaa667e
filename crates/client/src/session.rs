//! Authentication session: credential lifecycle, identity cache, and the
//! authoritative token refresh.
//!
//! [`AuthSession`] is a cheap-to-clone handle. It is the only writer of the
//! [`CredentialStore`] and the only source of truth for whether a user is
//! signed in and with which role.

use std::sync::Arc;

use futures::FutureExt;
use hamro_core::identity::{Identity, ProfileUpdate, Registration, TokenPair};
use hamro_core::roles::Role;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::error::{ClientError, ClientResult};
use crate::http::{self, AuthorizingClient};
use crate::refresh::{self, RefreshGate, RefreshTicket};

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// Tokens are held and the identity is being loaded.
    Authenticating,
    /// Tokens are held. The cached identity may be absent if loading it
    /// failed for a reason other than authorization.
    Authenticated,
    /// A token refresh is in flight.
    Refreshing,
}

impl SessionState {
    /// Whether a token pair is currently held.
    pub fn has_tokens(&self) -> bool {
        !matches!(self, SessionState::Unauthenticated)
    }
}

/// Body of the login and refresh responses. `token_type` and the embedded
/// user summary are ignored; the identity is always reloaded.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

impl TokenResponse {
    fn pair(&self) -> TokenPair {
        TokenPair::new(&self.access_token, &self.refresh_token)
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct PhoneRequest<'a> {
    phone: &'a str,
}

#[derive(Serialize)]
struct OtpRequest<'a> {
    phone: &'a str,
    otp: &'a str,
}

#[derive(Serialize)]
struct EmailTokenRequest<'a> {
    token: &'a str,
}

/// Generic `{"message": ...}` acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: String,
}

struct SessionInner {
    http: reqwest::Client,
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    tokens: RwLock<Option<TokenPair>>,
    identity: RwLock<Option<Identity>>,
    gate: RefreshGate,
    state_tx: watch::Sender<SessionState>,
}

#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<SessionInner>,
}

impl AuthSession {
    /// Build the session and its HTTP client. Call [`AuthSession::initialize`]
    /// to restore stored credentials.
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);

        Ok(Self {
            inner: Arc::new(SessionInner {
                http,
                config,
                store,
                tokens: RwLock::new(None),
                identity: RwLock::new(None),
                gate: RefreshGate::new(),
                state_tx,
            }),
        })
    }

    /// An [`AuthorizingClient`] bound to this session.
    pub fn authorized(&self) -> AuthorizingClient {
        AuthorizingClient::new(self.clone())
    }

    // ---- accessors ----

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.inner.identity.read().await.clone()
    }

    pub async fn role(&self) -> Option<Role> {
        self.inner.identity.read().await.as_ref().map(|i| i.role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().has_tokens()
    }

    pub async fn is_admin(&self) -> bool {
        self.role().await == Some(Role::Admin)
    }

    pub async fn is_seller(&self) -> bool {
        self.role().await == Some(Role::Seller)
    }

    /// The access token held right now.
    pub async fn access_token(&self) -> Option<String> {
        self.inner
            .tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    // ---- lifecycle ----

    /// Restore a stored token pair, if any, and load the identity.
    pub async fn initialize(&self) -> SessionState {
        let stored = match self.inner.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored credentials");
                None
            }
        };

        let Some(tokens) = stored else {
            self.set_state(SessionState::Unauthenticated);
            return self.state();
        };

        *self.inner.tokens.write().await = Some(tokens);
        self.set_state(SessionState::Authenticating);
        tracing::info!("Restored stored session");

        self.load_identity_keeping_session().await;
        self.state()
    }

    /// Exchange credentials for a token pair and load the identity.
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<TokenPair> {
        let previous = self.state();
        self.set_state(SessionState::Authenticating);

        let request = LoginRequest { email, password };
        let response = match self.post_unauthorized("/auth/login", &request).await {
            Ok(response) => response,
            Err(e) => {
                self.set_state(previous);
                return Err(match e {
                    ClientError::Unauthorized(_) | ClientError::Validation(_) => {
                        ClientError::InvalidCredentials
                    }
                    other => other,
                });
            }
        };
        let response: TokenResponse = match http::parse_response(response).await {
            Ok(parsed) => parsed,
            Err(e) => {
                self.set_state(previous);
                return Err(e);
            }
        };

        let tokens = response.pair();
        self.install_tokens(&tokens).await;
        self.inner.gate.reset().await;
        tracing::info!("Logged in");

        match self.load_identity().await {
            Ok(_) => {}
            Err(e) if e.ends_session() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Identity load after login failed; keeping session");
            }
        }
        Ok(tokens)
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, registration: &Registration) -> ClientResult<Identity> {
        registration.validate_fields()?;
        let response = self.post_unauthorized("/auth/register", registration).await?;
        http::parse_response(response).await
    }

    /// Best-effort backend logout, then an unconditional local clear.
    pub async fn logout(&self) {
        let refresh_token = self
            .inner
            .tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone());

        if let Some(refresh_token) = refresh_token {
            let result = self
                .post_unauthorized(
                    "/auth/logout",
                    &RefreshRequest {
                        refresh_token: &refresh_token,
                    },
                )
                .await;
            match result {
                Ok(response) => {
                    if let Err(e) = http::check_status(response).await {
                        tracing::warn!(error = %e, "Backend logout rejected");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Backend logout failed"),
            }
        }

        self.clear_local().await;
        self.inner.gate.reset().await;
        tracing::info!("Logged out");
    }

    /// Refresh the token pair. On failure the session is cleared.
    ///
    /// Concurrent callers share one backend refresh.
    pub async fn refresh(&self) -> bool {
        match self.access_token().await {
            Some(current) => self.refresh_after_rejection(&current).await,
            None => false,
        }
    }

    /// Handle a 401 for a request that was sent with `sent_token`.
    ///
    /// Returns `true` when the caller should retry with the current token.
    pub(crate) async fn refresh_after_rejection(&self, sent_token: &str) -> bool {
        let session = self.clone();
        let ticket = self
            .inner
            .gate
            .acquire(sent_token, self.tokens(), move |generation, tokens| {
                let refresh_token = tokens.refresh_token;
                let worker = session.clone();
                let started_from = refresh_token.clone();
                let task =
                    tokio::spawn(async move { worker.run_refresh(generation, started_from).await });
                refresh::supervise(task, move || {
                    async move { session.abandon_refresh(generation, &refresh_token).await }.boxed()
                })
            })
            .await;

        match ticket {
            RefreshTicket::Await(refresh) => refresh.await,
            RefreshTicket::AlreadyRotated => true,
            RefreshTicket::Unavailable => false,
        }
    }

    /// Body of the spawned refresh task.
    ///
    /// The result only applies while the session still holds
    /// `refresh_token`; a login or logout in the meantime wins.
    async fn run_refresh(&self, generation: u64, refresh_token: String) -> bool {
        {
            let tokens = self.inner.tokens.read().await;
            if !holds_refresh_token(&tokens, &refresh_token) {
                drop(tokens);
                self.inner.gate.settle(generation, false).await;
                return false;
            }
            self.set_state(SessionState::Refreshing);
        }
        tracing::info!("Refreshing access token");

        let result = async {
            let response = self
                .post_unauthorized(
                    "/auth/refresh",
                    &RefreshRequest {
                        refresh_token: &refresh_token,
                    },
                )
                .await?;
            http::parse_response::<TokenResponse>(response).await
        }
        .await;

        match result {
            Ok(response) => {
                let tokens = response.pair();
                if !self.replace_tokens(&refresh_token, &tokens).await {
                    tracing::info!("Session changed during token refresh; discarding new tokens");
                    self.inner.gate.settle(generation, false).await;
                    return false;
                }
                tracing::info!("Access token refreshed");

                match self.fetch_identity(&tokens.access_token).await {
                    Ok(identity) => {
                        let held = self.inner.tokens.read().await;
                        if holds_refresh_token(&held, &tokens.refresh_token) {
                            *self.inner.identity.write().await = Some(identity);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Identity reload after refresh failed"),
                }
                self.inner.gate.settle(generation, true).await;
                true
            }
            Err(e) => {
                if self.clear_if_current(&refresh_token).await {
                    tracing::error!(error = %e, "Token refresh failed; ending session");
                } else {
                    tracing::info!(error = %e, "Superseded token refresh failed");
                }
                self.inner.gate.settle(generation, false).await;
                false
            }
        }
    }

    /// The refresh task died without reporting; treat it as a failed refresh.
    async fn abandon_refresh(&self, generation: u64, refresh_token: &str) {
        self.clear_if_current(refresh_token).await;
        self.inner.gate.settle(generation, false).await;
    }

    // ---- identity ----

    /// Reload the identity from `GET /auth/me`.
    ///
    /// A 401 goes through one refresh; if that does not recover, the session
    /// is cleared and the error returned.
    pub async fn load_identity(&self) -> ClientResult<Identity> {
        match self.authorized().get_json::<Identity>("/auth/me").await {
            Ok(identity) => {
                *self.inner.identity.write().await = Some(identity.clone());
                if self.state() == SessionState::Authenticating {
                    self.set_state(SessionState::Authenticated);
                }
                Ok(identity)
            }
            Err(e) if e.ends_session() => {
                if self.is_authenticated() {
                    tracing::error!(error = %e, "Identity load unauthorized; ending session");
                    self.clear_local().await;
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Update profile fields and replace the cached identity.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> ClientResult<Identity> {
        let identity: Identity = self.authorized().put_json("/auth/me", update).await?;
        *self.inner.identity.write().await = Some(identity.clone());
        Ok(identity)
    }

    // ---- verification ----

    pub async fn send_otp(&self, phone: &str) -> ClientResult<Ack> {
        self.authorized()
            .post_json("/auth/send-otp", &PhoneRequest { phone })
            .await
    }

    /// Verify the phone OTP, patch the cached identity, then reload it.
    pub async fn verify_otp(&self, phone: &str, otp: &str) -> ClientResult<Ack> {
        let ack: Ack = self
            .authorized()
            .post_json("/auth/verify-otp", &OtpRequest { phone, otp })
            .await?;

        if let Some(identity) = self.inner.identity.write().await.as_mut() {
            identity.mark_phone_verified(phone);
        }
        if let Err(e) = self.load_identity().await {
            tracing::warn!(error = %e, "Identity reload after OTP verification failed");
        }
        Ok(ack)
    }

    /// Confirm an email address. Works without a session.
    pub async fn verify_email(&self, token: &str) -> ClientResult<Ack> {
        let response = self
            .post_unauthorized("/auth/verify-email", &EmailTokenRequest { token })
            .await?;
        let ack: Ack = http::parse_response(response).await?;

        if self.is_authenticated() {
            if let Some(identity) = self.inner.identity.write().await.as_mut() {
                identity.mark_email_verified();
            }
            if let Err(e) = self.load_identity().await {
                tracing::warn!(error = %e, "Identity reload after email verification failed");
            }
        }
        Ok(ack)
    }

    // ---- private helpers ----

    fn set_state(&self, state: SessionState) {
        let previous = self.inner.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Session state changed");
        }
    }

    /// Hold the pair in memory, persist it, and go authenticated. A
    /// persistence failure keeps the in-memory session.
    async fn install_tokens(&self, tokens: &TokenPair) {
        let mut held = self.inner.tokens.write().await;
        self.hold_tokens(&mut held, tokens).await;
    }

    /// Replace the pair only if `previous_refresh` is still the one held.
    async fn replace_tokens(&self, previous_refresh: &str, tokens: &TokenPair) -> bool {
        let mut held = self.inner.tokens.write().await;
        if !holds_refresh_token(&held, previous_refresh) {
            return false;
        }
        self.hold_tokens(&mut held, tokens).await;
        true
    }

    /// Store and state change happen under the tokens write lock, so a
    /// concurrent clear cannot interleave with them.
    async fn hold_tokens(&self, held: &mut Option<TokenPair>, tokens: &TokenPair) {
        *held = Some(tokens.clone());
        if let Err(e) = self.inner.store.save(tokens).await {
            tracing::warn!(error = %e, "Failed to persist credentials");
        }
        self.set_state(SessionState::Authenticated);
    }

    /// Drop tokens and identity everywhere and go unauthenticated.
    async fn clear_local(&self) {
        let mut held = self.inner.tokens.write().await;
        self.clear_held(&mut held).await;
    }

    /// [`Self::clear_local`], but only while `refresh_token` is still held.
    async fn clear_if_current(&self, refresh_token: &str) -> bool {
        let mut held = self.inner.tokens.write().await;
        if !holds_refresh_token(&held, refresh_token) {
            return false;
        }
        self.clear_held(&mut held).await;
        true
    }

    async fn clear_held(&self, held: &mut Option<TokenPair>) {
        *held = None;
        *self.inner.identity.write().await = None;
        if let Err(e) = self.inner.store.clear().await {
            tracing::warn!(error = %e, "Failed to clear stored credentials");
        }
        self.set_state(SessionState::Unauthenticated);
    }

    async fn tokens(&self) -> Option<TokenPair> {
        self.inner.tokens.read().await.clone()
    }

    /// Startup identity load: only an authorization failure ends the session.
    async fn load_identity_keeping_session(&self) {
        match self.load_identity().await {
            Ok(identity) => {
                tracing::info!(email = %identity.email, role = %identity.role, "Identity loaded");
            }
            Err(e) if e.ends_session() => {}
            Err(e) => {
                tracing::warn!(error = %e, "Identity load failed; keeping restored session");
                if self.is_authenticated() {
                    self.set_state(SessionState::Authenticated);
                }
            }
        }
    }

    /// `GET /auth/me` with an explicit token and no refresh protocol.
    async fn fetch_identity(&self, access_token: &str) -> ClientResult<Identity> {
        let path = "/auth/me";
        let (builder, request_id) =
            http::request(&self.inner.http, Method::GET, &self.inner.config.url(path));
        let response =
            http::dispatch(builder.bearer_auth(access_token), &Method::GET, path, &request_id)
                .await?;
        http::parse_response(response).await
    }

    /// JSON `POST` without credentials. Non-success statuses are classified.
    async fn post_unauthorized<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<reqwest::Response> {
        let (builder, request_id) =
            http::request(&self.inner.http, Method::POST, &self.inner.config.url(path));
        let response = http::dispatch(builder.json(body), &Method::POST, path, &request_id).await?;
        http::ensure_success(response).await
    }
}

fn holds_refresh_token(held: &Option<TokenPair>, refresh_token: &str) -> bool {
    held.as_ref().map_or(false, |t| t.refresh_token == refresh_token)
}
