//! Hamro marketplace client.
//!
//! - [`AuthSession`] owns the token pair, the identity cache, and the
//!   single-flight refresh.
//! - [`AuthorizingClient`] sends every privileged request and resolves 401s
//!   through the session.
//! - [`KycWorkflow`] submits and reviews seller verification applications.
//! - [`NotificationPoller`] keeps the unread badge and feed current.
//!
//! [`Marketplace`] wires them together once per process.

pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod kyc;
pub mod notifications;
mod refresh;
pub mod session;

use std::sync::Arc;

pub use config::ClientConfig;
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{ClientError, ClientResult};
pub use http::AuthorizingClient;
pub use kyc::KycWorkflow;
pub use notifications::{NotificationPoller, NotificationSnapshot, PollerHandle};
pub use session::{AuthSession, SessionState};

/// The client services, constructed once and shared by every consumer.
#[derive(Clone)]
pub struct Marketplace {
    pub session: AuthSession,
    pub api: AuthorizingClient,
    pub kyc: KycWorkflow,
    pub notifications: NotificationPoller,
}

impl Marketplace {
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> ClientResult<Self> {
        let session = AuthSession::new(config, store)?;
        let api = session.authorized();
        Ok(Self {
            kyc: KycWorkflow::new(api.clone()),
            notifications: NotificationPoller::new(api.clone()),
            session,
            api,
        })
    }

    /// Bundle backed by the file store at `config.credentials_path`.
    pub fn with_file_store(config: ClientConfig) -> ClientResult<Self> {
        let store = Arc::new(FileCredentialStore::new(config.credentials_path.clone()));
        Self::new(config, store)
    }

    /// Stop polling, then end the session.
    pub async fn logout(&self) {
        self.notifications.stop().await;
        self.session.logout().await;
    }
}
