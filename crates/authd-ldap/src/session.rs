//! User resolution and password verification on a live connection.

use crate::bounded::{run_bounded, Discard, WaitError};
use crate::connector::DirectoryConnection;
use crate::transport::{result_code, LdapEntry, SearchRequest, INVALID_CREDENTIALS_RC};
use async_trait::async_trait;
use authd_core::{DirectoryError, DirectoryErrorKind, Result};
use ldap3::LdapError;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// A directory user located by login name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    bind_dn: String,
    entry_dn: String,
    attributes: BTreeMap<String, String>,
}

impl ResolvedIdentity {
    fn from_entry(entry: LdapEntry, requested: &[String], dn_override: Option<&str>) -> Self {
        let attributes = requested
            .iter()
            .filter_map(|name| entry.first(name).map(|value| (name.clone(), value.to_string())))
            .collect();

        let bind_dn = dn_override
            .and_then(|attribute| entry.first(attribute))
            .filter(|value| !value.is_empty())
            .map_or_else(|| entry.dn.clone(), str::to_string);

        Self {
            bind_dn,
            entry_dn: entry.dn,
            attributes,
        }
    }

    /// DN to verify the password against.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// DN of the matched entry.
    #[must_use]
    pub fn entry_dn(&self) -> &str {
        &self.entry_dn
    }

    /// Requested attributes present on the entry, first value each.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Consumes the identity, returning its attributes.
    #[must_use]
    pub fn into_attributes(self) -> BTreeMap<String, String> {
        self.attributes
    }
}

#[async_trait]
impl Discard for std::result::Result<Vec<LdapEntry>, LdapError> {
    async fn discard(self) {}
}

#[async_trait]
impl Discard for std::result::Result<(), LdapError> {
    async fn discard(self) {}
}

impl DirectoryConnection {
    /// Looks up the entry for `login` and extracts the configured attributes.
    ///
    /// # Errors
    ///
    /// - `user_not_found` when no entry matches
    /// - `search_failed` when the search errors, including an ambiguous match
    /// - `search_timeout` when `deadline` elapses
    pub async fn resolve_user(&self, login: &str, deadline: Duration) -> Result<ResolvedIdentity> {
        let session = self.session()?;
        let config = self.config();

        let mut projection = config.attributes().to_vec();
        if let Some(attribute) = config.dn_override_attribute() {
            if !projection.iter().any(|name| name.eq_ignore_ascii_case(attribute)) {
                projection.push(attribute.to_string());
            }
        }

        let request = SearchRequest {
            base: config.search_base().to_string(),
            filter: config.filter().render(login),
            attributes: projection,
            time_limit: deadline,
        };
        debug!(base = %request.base, filter = ?request.filter, "searching for user");

        let outcome = run_bounded(deadline, async move { session.search(&request).await }).await;
        let entries = match outcome {
            Ok(Ok(entries)) => entries,
            Ok(Err(err)) => {
                return Err(DirectoryError::with_cause(
                    DirectoryErrorKind::SearchFailed,
                    "user search failed",
                    err,
                ))
            }
            Err(err @ WaitError::TimedOut(_)) => {
                return Err(DirectoryError::with_cause(
                    DirectoryErrorKind::SearchTimeout,
                    "user search timed out",
                    err,
                ))
            }
            Err(err @ WaitError::TaskFailed) => {
                return Err(DirectoryError::with_cause(
                    DirectoryErrorKind::SearchFailed,
                    "user search failed",
                    err,
                ))
            }
        };

        let Some(entry) = entries.into_iter().next() else {
            return Err(DirectoryError::new(
                DirectoryErrorKind::UserNotFound,
                "user not found",
            ));
        };

        Ok(ResolvedIdentity::from_entry(
            entry,
            config.attributes(),
            config.dn_override_attribute(),
        ))
    }

    /// Binds as `dn` with `password` on this connection. Never retries.
    ///
    /// # Errors
    ///
    /// - `invalid_credentials` when the password is empty or the directory rejects it
    /// - `bind_failed` for any other result code, or when `deadline` elapses
    /// - `connection_failed` when the transport fails
    pub async fn verify_password(&self, dn: &str, password: &str, deadline: Duration) -> Result<()> {
        if password.is_empty() {
            return Err(DirectoryError::new(
                DirectoryErrorKind::InvalidCredentials,
                "empty password refused",
            ));
        }

        let session = self.session()?;
        let target = dn.to_string();
        let secret = SecretString::from(password.to_string());

        let outcome = run_bounded(deadline, async move {
            session.simple_bind(&target, secret.expose_secret()).await
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(match result_code(&err) {
                Some(INVALID_CREDENTIALS_RC) => DirectoryError::with_cause(
                    DirectoryErrorKind::InvalidCredentials,
                    "invalid credentials",
                    err,
                ),
                Some(rc) => DirectoryError::with_cause(
                    DirectoryErrorKind::BindFailed,
                    format!("bind as {dn} failed with result code {rc}"),
                    err,
                ),
                None => DirectoryError::with_cause(
                    DirectoryErrorKind::ConnectionFailed,
                    format!("bind as {dn} failed"),
                    err,
                ),
            }),
            Err(err) => Err(DirectoryError::with_cause(
                DirectoryErrorKind::BindFailed,
                format!("bind as {dn} did not complete"),
                err,
            )),
        }
    }
}
