//! `hamro-watch` -- long-running marketplace session companion.
//!
//! Restores the stored session (or signs in from the environment), reports
//! the signed-in identity and KYC status, and keeps the notification badge
//! current until interrupted or the session ends.
//!
//! # Environment variables
//!
//! | Variable          | Required | Default | Description                                  |
//! |-------------------|----------|---------|----------------------------------------------|
//! | `HAMRO_BACKEND_URL` | yes    | --      | Backend root, e.g. `http://localhost:8000`   |
//! | `HAMRO_EMAIL`     | no       | --      | Login email when no stored session exists    |
//! | `HAMRO_PASSWORD`  | no       | --      | Login password when no stored session exists |
//!
//! The remaining `HAMRO_*` settings are documented on `ClientConfig::from_env`.

use hamro_client::{ClientConfig, Marketplace, SessionState};
use hamro_core::notification::badge_label;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hamro_watch=info,hamro_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        api = %config.api_base_url,
        credentials = %config.credentials_path.display(),
        poll_secs = config.poll_interval.as_secs(),
        "Starting hamro-watch",
    );

    let market = Marketplace::with_file_store(config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build client");
        std::process::exit(1);
    });

    if market.session.initialize().await == SessionState::Unauthenticated {
        sign_in_from_env(&market).await;
    }

    report_identity(&market).await;
    report_kyc_status(&market).await;

    let poller = market.notifications.start().await;
    if let Err(e) = market.notifications.open_feed().await {
        tracing::warn!(error = %e, "Initial notification fetch failed");
    }

    let mut session_rx = market.session.subscribe();
    let mut snapshot_rx = market.notifications.subscribe();
    let mut last_count = snapshot_rx.borrow_and_update().unread_count;
    tracing::info!(unread = last_count, badge = ?badge_label(last_count), "Notifications");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
            ended = session_ended(&mut session_rx) => {
                if ended {
                    tracing::warn!("Session ended; sign in again to resume");
                }
                break;
            }
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = snapshot_rx.borrow_and_update().unread_count;
                if count != last_count {
                    tracing::info!(unread = count, badge = ?badge_label(count), "Unread notifications changed");
                    last_count = count;
                }
            }
        }
    }

    poller.stop().await;
    tracing::info!("hamro-watch stopped");
}

/// Log in with `HAMRO_EMAIL` / `HAMRO_PASSWORD`, or exit.
async fn sign_in_from_env(market: &Marketplace) {
    let (Ok(email), Ok(password)) = (std::env::var("HAMRO_EMAIL"), std::env::var("HAMRO_PASSWORD"))
    else {
        tracing::error!("No stored session and HAMRO_EMAIL / HAMRO_PASSWORD are not set");
        std::process::exit(1);
    };

    if let Err(e) = market.session.login(&email, &password).await {
        tracing::error!(error = %e, "Login failed");
        std::process::exit(1);
    }
}

async fn report_identity(market: &Marketplace) {
    match market.session.identity().await {
        Some(identity) => tracing::info!(
            email = %identity.email,
            role = %identity.role,
            email_verified = identity.is_verified,
            phone_verified = identity.phone_verified,
            "Signed in",
        ),
        None => tracing::warn!("Signed in, identity not yet available"),
    }
}

async fn report_kyc_status(market: &Marketplace) {
    match market.kyc.get_mine().await {
        Ok(Some(application)) => tracing::info!(
            kyc_id = %application.id,
            status = %application.status,
            business = %application.business_name,
            "KYC application",
        ),
        Ok(None) => tracing::info!("No KYC application"),
        Err(e) => tracing::warn!(error = %e, "Failed to fetch KYC application"),
    }
}

/// Resolves once the session drops its tokens. `true` when it ended, `false`
/// when the session channel closed.
async fn session_ended(rx: &mut watch::Receiver<SessionState>) -> bool {
    rx.wait_for(|state| !state.has_tokens()).await.is_ok()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
