//! # authd-server
//!
//! HTTP front end for LDAP credential verification.
//!
//! - `POST {base}/v1/auth` checks a username and password against the directory
//! - `GET {base}/v1/healthz` and `GET {base}/v1/readyz` answer probes

#![deny(missing_docs)]

pub mod logging;
pub mod routes;
pub mod settings;

pub use routes::{create_router, AppState};
pub use settings::ServerSettings;

use anyhow::Context;
use authd_ldap::Authenticator;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Binds the listener and serves until Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Fails when the port cannot be bound or the server stops with an I/O error.
pub async fn serve(settings: &ServerSettings, authenticator: Authenticator) -> anyhow::Result<()> {
    let app = create_router(AppState::new(authenticator), &settings.base_path);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, base_path = %settings.base_path, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server exited");
    Ok(())
}

/// Waits for a shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
