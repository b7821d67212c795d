//! Single-use directory connections.

use crate::bounded::{run_bounded, Discard, WaitError};
use crate::config::DirectoryConfig;
use crate::transport::{Ldap3Dialer, LdapDialer, LdapSession};
use async_trait::async_trait;
use authd_core::{DirectoryError, DirectoryErrorKind, Result};
use secrecy::ExposeSecret;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Opens one fresh [`DirectoryConnection`] per call.
pub struct DirectoryConnector {
    config: Arc<DirectoryConfig>,
    dialer: Arc<dyn LdapDialer>,
}

impl DirectoryConnector {
    /// Creates a connector that dials with `ldap3`.
    #[must_use]
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        let dialer = Arc::new(Ldap3Dialer::new(Arc::clone(&config)));
        Self { config, dialer }
    }

    /// Creates a connector with a custom dialer.
    #[must_use]
    pub fn with_dialer(config: Arc<DirectoryConfig>, dialer: Arc<dyn LdapDialer>) -> Self {
        Self { config, dialer }
    }

    /// Returns the directory configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<DirectoryConfig> {
        &self.config
    }

    /// Dials the directory and performs the service bind, within the connect timeout.
    ///
    /// # Errors
    ///
    /// - `connection_failed` when the dial or TLS negotiation fails
    /// - `tls_failed` when the local TLS setup fails
    /// - `connection_timeout` when the connect timeout elapses
    /// - `bind_failed` when the service identity is rejected
    pub async fn connect(&self) -> Result<DirectoryConnection> {
        self.connect_within(self.config.connect_timeout()).await
    }

    /// Same as [`connect`](Self::connect) with an explicit deadline.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_within(&self, deadline: Duration) -> Result<DirectoryConnection> {
        let dialer = Arc::clone(&self.dialer);
        let config = Arc::clone(&self.config);

        let outcome = run_bounded(deadline, async move {
            let session: Arc<dyn LdapSession> = Arc::from(dialer.dial().await?);
            let Some(identity) = config.service_identity() else {
                return Ok(Dialed {
                    session,
                    service_bound: false,
                });
            };

            if let Err(err) = session
                .simple_bind(identity.dn(), identity.password().expose_secret())
                .await
            {
                session.unbind().await;
                return Err(DirectoryError::with_cause(
                    DirectoryErrorKind::BindFailed,
                    format!("service bind as {} failed", identity.dn()),
                    err,
                ));
            }

            Ok(Dialed {
                session,
                service_bound: true,
            })
        })
        .await;

        match outcome {
            Ok(Ok(dialed)) => {
                debug!(
                    tls_mode = ?self.config.tls_mode(),
                    service_bound = dialed.service_bound,
                    "directory connection established"
                );
                Ok(DirectoryConnection {
                    session: Some(dialed.session),
                    config: Arc::clone(&self.config),
                    service_bound: dialed.service_bound,
                })
            }
            Ok(Err(err)) => Err(err),
            Err(err @ WaitError::TimedOut(_)) => Err(DirectoryError::with_cause(
                DirectoryErrorKind::ConnectionTimeout,
                format!("no connection to {} within {deadline:?}", self.config.url()),
                err,
            )),
            Err(err @ WaitError::TaskFailed) => Err(DirectoryError::with_cause(
                DirectoryErrorKind::ConnectionFailed,
                format!("failed to connect to {}", self.config.url()),
                err,
            )),
        }
    }
}

impl fmt::Debug for DirectoryConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConnector")
            .field("url", &self.config.url())
            .finish_non_exhaustive()
    }
}

struct Dialed {
    session: Arc<dyn LdapSession>,
    service_bound: bool,
}

#[async_trait]
impl Discard for Result<Dialed> {
    async fn discard(self) {
        if let Ok(dialed) = self {
            dialed.session.unbind().await;
        }
    }
}

/// Exclusively owned handle over one LDAP session.
///
/// Serves one resolve and one verify, then is released. Dropping an unclosed connection
/// schedules the unbind on the current runtime.
pub struct DirectoryConnection {
    session: Option<Arc<dyn LdapSession>>,
    config: Arc<DirectoryConfig>,
    service_bound: bool,
}

impl DirectoryConnection {
    #[cfg(test)]
    pub(crate) fn for_session(
        session: Arc<dyn LdapSession>,
        config: Arc<DirectoryConfig>,
    ) -> Self {
        Self {
            session: Some(session),
            config,
            service_bound: false,
        }
    }

    /// Whether the service identity is bound on this connection.
    #[must_use]
    pub const fn is_service_bound(&self) -> bool {
        self.service_bound
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    pub(crate) fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub(crate) fn session(&self) -> Result<Arc<dyn LdapSession>> {
        self.session.clone().ok_or_else(|| {
            DirectoryError::new(
                DirectoryErrorKind::ConnectionFailed,
                "connection already closed",
            )
        })
    }

    /// Unbinds and releases the session, waiting at most the operation timeout.
    /// Calling it again does nothing.
    pub async fn close(&mut self) {
        self.close_within(self.config.operation_timeout()).await;
    }

    /// Same as [`close`](Self::close) with an explicit limit on the unbind.
    pub async fn close_within(&mut self, limit: Duration) {
        let Some(session) = self.session.take() else {
            return;
        };
        if tokio::time::timeout(limit, session.unbind()).await.is_err() {
            warn!(?limit, "unbind did not complete, dropping connection");
        }
    }
}

impl Drop for DirectoryConnection {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { session.unbind().await });
            }
        }
    }
}

impl fmt::Debug for DirectoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConnection")
            .field("url", &self.config.url())
            .field("service_bound", &self.service_bound)
            .field("closed", &self.is_closed())
            .finish()
    }
}
