//! LDAP transport seam and its `ldap3` implementation.
//!
//! The connector and session only ever talk to [`LdapDialer`] and [`LdapSession`], so tests and
//! embedders can swap in fakes without a directory server.

use crate::config::{DirectoryConfig, TlsMode};
use async_trait::async_trait;
use authd_core::{DirectoryError, DirectoryErrorKind, Result};
use ldap3::{
    DerefAliases, Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry,
    SearchOptions,
};
use native_tls::{Certificate, TlsConnector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// LDAP result code for a rejected bind (`invalidCredentials`).
pub const INVALID_CREDENTIALS_RC: u32 = 49;

/// Directory entry returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute map (values keep the server's order).
    pub attributes: HashMap<String, Vec<String>>,
}

impl LdapEntry {
    /// Returns the first value of the attribute, matching the name case-insensitively.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .and_then(|(_, values)| values.first().map(String::as_str))
    }
}

/// Parameters of a single-entry subtree search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base DN.
    pub base: String,
    /// Rendered, escaped filter.
    pub filter: String,
    /// Attribute projection.
    pub attributes: Vec<String>,
    /// Server-side time limit.
    pub time_limit: Duration,
}

/// One live LDAP session.
///
/// Methods take `&self` so a session can be shared with the background task running an
/// operation; implementations serialize requests over the one underlying socket.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LdapSession: Send + Sync {
    /// Performs a simple bind; returns an error unless the server answered `success`.
    async fn simple_bind(&self, dn: &str, password: &str) -> std::result::Result<(), LdapError>;

    /// Runs a subtree search limited to one entry with aliases never dereferenced.
    async fn search(
        &self,
        request: &SearchRequest,
    ) -> std::result::Result<Vec<LdapEntry>, LdapError>;

    /// Sends an unbind and releases the socket. Errors are swallowed.
    async fn unbind(&self);
}

/// Opens new [`LdapSession`]s.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LdapDialer: Send + Sync {
    /// Dials the directory. No bind is performed.
    async fn dial(&self) -> Result<Box<dyn LdapSession>>;
}

/// Real dialer backed by `ldap3`.
pub struct Ldap3Dialer {
    config: Arc<DirectoryConfig>,
}

impl Ldap3Dialer {
    /// Creates a new dialer instance.
    #[must_use]
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LdapDialer for Ldap3Dialer {
    async fn dial(&self) -> Result<Box<dyn LdapSession>> {
        let settings = build_ldap_settings(&self.config).await?;
        let url = self.config.dial_url()?;

        // A failed StartTLS exchange drops the half-open stream inside ldap3 before returning.
        let (conn, ldap) = LdapConnAsync::from_url_with_settings(settings, &url)
            .await
            .map_err(|err| {
                let message = match self.config.tls_mode() {
                    TlsMode::Plain => "failed to dial LDAP server",
                    TlsMode::Implicit => "failed to dial LDAPS server",
                    TlsMode::Upgrade => "failed to dial LDAP server for StartTLS",
                };
                DirectoryError::with_cause(DirectoryErrorKind::ConnectionFailed, message, err)
            })?;

        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                warn!(error = %err, "LDAP connection driver stopped");
            }
        });

        Ok(Box::new(Ldap3Session { ldap }))
    }
}

struct Ldap3Session {
    ldap: Ldap,
}

#[async_trait]
impl LdapSession for Ldap3Session {
    async fn simple_bind(&self, dn: &str, password: &str) -> std::result::Result<(), LdapError> {
        let mut ldap = self.ldap.clone();
        ldap.simple_bind(dn, password).await?.success()?;
        Ok(())
    }

    async fn search(
        &self,
        request: &SearchRequest,
    ) -> std::result::Result<Vec<LdapEntry>, LdapError> {
        let mut ldap = self.ldap.clone();
        let options = SearchOptions::new()
            .deref(DerefAliases::Never)
            .sizelimit(1)
            .timelimit(time_limit_secs(request.time_limit));

        let (entries, _) = ldap
            .with_search_options(options)
            .search(
                &request.base,
                Scope::Subtree,
                &request.filter,
                request.attributes.as_slice(),
            )
            .await?
            .success()?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| LdapEntry {
                dn: entry.dn,
                attributes: entry.attrs,
            })
            .collect())
    }

    async fn unbind(&self) {
        let mut ldap = self.ldap.clone();
        if let Err(err) = ldap.unbind().await {
            debug!(error = %err, "LDAP unbind failed");
        }
    }
}

async fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new()
        .set_conn_timeout(config.connect_timeout())
        .set_starttls(config.tls_mode() == TlsMode::Upgrade);

    if config.skip_cert_verify() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|err| tls_failed("failed to construct TLS connector", err))?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = config.tls_ca_cert() {
        let pem = tokio::fs::read(cert_path).await.map_err(|err| {
            tls_failed(
                format!("failed to read CA certificate {}", cert_path.display()),
                err,
            )
        })?;
        let certificate = Certificate::from_pem(&pem)
            .map_err(|err| tls_failed("invalid CA certificate", err))?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| tls_failed("failed to load CA certificate", err))?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

fn tls_failed(
    message: impl Into<String>,
    err: impl std::error::Error + Send + Sync + 'static,
) -> DirectoryError {
    DirectoryError::with_cause(DirectoryErrorKind::TlsFailed, message, err)
}

/// Server-side search time limit in whole seconds, never zero (zero means unlimited).
fn time_limit_secs(limit: Duration) -> i32 {
    let secs = limit.as_secs().max(1);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

/// Returns the LDAP result code carried by an operation error, if any.
#[must_use]
pub fn result_code(err: &LdapError) -> Option<u32> {
    match err {
        LdapError::LdapResult { result } => Some(result.rc),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldap3::LdapResult;

    fn entry() -> LdapEntry {
        let mut attributes = HashMap::new();
        attributes.insert("Mail".to_string(), vec!["alice@example.com".to_string()]);
        attributes.insert("cn".to_string(), Vec::new());
        LdapEntry {
            dn: "uid=alice,dc=example,dc=com".to_string(),
            attributes,
        }
    }

    #[test]
    fn first_matches_attribute_names_case_insensitively() {
        let entry = entry();
        assert_eq!(entry.first("mail"), Some("alice@example.com"));
        assert_eq!(entry.first("cn"), None);
        assert_eq!(entry.first("uid"), None);
    }

    #[test]
    fn time_limit_is_at_least_one_second() {
        assert_eq!(time_limit_secs(Duration::from_millis(200)), 1);
        assert_eq!(time_limit_secs(Duration::from_secs(8)), 8);
        assert_eq!(time_limit_secs(Duration::from_secs(u64::MAX)), i32::MAX);
    }

    #[test]
    fn result_code_reads_ldap_results_only() {
        let rejected = LdapError::from(LdapResult {
            rc: INVALID_CREDENTIALS_RC,
            matched: String::new(),
            text: "invalid credentials".to_string(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        });
        assert_eq!(result_code(&rejected), Some(49));

        let io = LdapError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(result_code(&io), None);
    }

    #[tokio::test]
    async fn settings_fail_with_tls_failed_for_missing_ca() {
        let config = DirectoryConfig::new("ldaps://ldap.example.com", "dc=example,dc=com")
            .unwrap()
            .with_tls_ca_cert("/nonexistent/ca.pem".into());
        let err = build_ldap_settings(&config).await.err().unwrap();
        assert_eq!(err.kind(), DirectoryErrorKind::TlsFailed);
    }

    #[tokio::test]
    async fn dial_failure_is_connection_failed() {
        // Port 1 on loopback refuses immediately.
        let config = DirectoryConfig::new("ldap://127.0.0.1:1", "dc=example,dc=com").unwrap();
        let dialer = Ldap3Dialer::new(Arc::new(config));
        let err = dialer.dial().await.err().unwrap();
        assert_eq!(err.kind(), DirectoryErrorKind::ConnectionFailed);
    }
}
