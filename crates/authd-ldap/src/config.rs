//! Configuration for the directory client.

use crate::filter::FilterTemplate;
use authd_core::{DirectoryError, DirectoryErrorKind, Result};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Default connection timeout (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;
/// Default per-operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 2;
/// Default end-to-end request timeout (seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 8;
/// Attributes returned for a resolved user unless overridden.
pub const DEFAULT_RETURN_ATTRIBUTES: &[&str] = &["cn", "mail", "uid"];

/// How the transport is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// No encryption.
    Plain,
    /// TLS from the first byte (`ldaps://`).
    Implicit,
    /// Plain connect followed by a StartTLS upgrade.
    Upgrade,
}

/// Privileged identity used to search the directory.
#[derive(Debug)]
pub struct ServiceIdentity {
    dn: String,
    password: SecretString,
}

impl ServiceIdentity {
    /// Bind DN of the service account.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Bind password of the service account.
    #[must_use]
    pub fn password(&self) -> &SecretString {
        &self.password
    }
}

/// Immutable configuration for connecting to and searching the directory.
#[derive(Debug, Validate)]
pub struct DirectoryConfig {
    #[validate(url)]
    url: String,
    use_implicit_tls: bool,
    use_upgrade_tls: bool,
    skip_cert_verify: bool,
    tls_ca_cert: Option<PathBuf>,
    service_identity: Option<ServiceIdentity>,
    #[validate(length(min = 1))]
    search_base: String,
    filter: FilterTemplate,
    dn_override_attribute: Option<String>,
    #[validate(length(min = 1))]
    attributes: Vec<String>,
    connect_timeout: Duration,
    operation_timeout: Duration,
    request_timeout: Duration,
}

impl DirectoryConfig {
    /// Creates a configuration with default TLS posture, filter and timeouts.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_config` error if the URL cannot be parsed.
    pub fn new(url: impl Into<String>, search_base: impl Into<String>) -> Result<Self> {
        let url = url.into();
        Url::parse(&url).map_err(|err| {
            DirectoryError::with_cause(
                DirectoryErrorKind::InvalidConfig,
                format!("invalid directory URL `{url}`"),
                err,
            )
        })?;

        Ok(Self {
            url,
            use_implicit_tls: false,
            use_upgrade_tls: false,
            skip_cert_verify: false,
            tls_ca_cert: None,
            service_identity: None,
            search_base: search_base.into(),
            filter: FilterTemplate::default(),
            dn_override_attribute: None,
            attributes: DEFAULT_RETURN_ATTRIBUTES
                .iter()
                .map(|attribute| (*attribute).to_string())
                .collect(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    /// Checks every cross-field invariant. Call once at startup.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_config` error describing the first violated rule.
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate().map_err(|err| {
            DirectoryError::with_cause(
                DirectoryErrorKind::InvalidConfig,
                "invalid directory configuration",
                err,
            )
        })?;

        if self.use_implicit_tls && self.use_upgrade_tls {
            return Err(DirectoryError::invalid_config(
                "implicit TLS and StartTLS are mutually exclusive",
            ));
        }

        let scheme = self.parsed_url()?.scheme().to_ascii_lowercase();
        match scheme.as_str() {
            "ldap" => {}
            "ldaps" if self.use_upgrade_tls => {
                return Err(DirectoryError::invalid_config(
                    "StartTLS cannot be combined with an ldaps:// URL",
                ));
            }
            "ldaps" => {}
            other => {
                return Err(DirectoryError::invalid_config(format!(
                    "unsupported directory URL scheme `{other}`"
                )));
            }
        }

        if self.attributes.iter().any(|attribute| attribute.trim().is_empty()) {
            return Err(DirectoryError::invalid_config(
                "return attribute names cannot be blank",
            ));
        }
        if self
            .dn_override_attribute
            .as_deref()
            .is_some_and(|attribute| attribute.trim().is_empty())
        {
            return Err(DirectoryError::invalid_config(
                "DN override attribute cannot be blank",
            ));
        }

        if self.connect_timeout.is_zero()
            || self.operation_timeout.is_zero()
            || self.request_timeout.is_zero()
        {
            return Err(DirectoryError::invalid_config("timeouts must be non-zero"));
        }

        let worst_case = self.connect_timeout + self.operation_timeout * 2;
        if worst_case > self.request_timeout {
            return Err(DirectoryError::invalid_config(format!(
                "connect ({:?}) + resolve ({:?}) + verify ({:?}) exceeds request timeout ({:?})",
                self.connect_timeout,
                self.operation_timeout,
                self.operation_timeout,
                self.request_timeout
            )));
        }

        Ok(())
    }

    /// Returns the directory URL as configured.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the transport security mode.
    ///
    /// StartTLS is checked first; an `ldaps://` URL implies implicit TLS.
    #[must_use]
    pub fn tls_mode(&self) -> TlsMode {
        if self.use_upgrade_tls {
            TlsMode::Upgrade
        } else if self.use_implicit_tls || self.url.to_ascii_lowercase().starts_with("ldaps:") {
            TlsMode::Implicit
        } else {
            TlsMode::Plain
        }
    }

    /// Returns the URL to dial, switching `ldap://` to `ldaps://` for implicit TLS.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_config` error if the URL cannot be parsed or rewritten.
    pub fn dial_url(&self) -> Result<Url> {
        let mut url = self.parsed_url()?;
        if self.tls_mode() == TlsMode::Implicit && url.scheme().eq_ignore_ascii_case("ldap") {
            url.set_scheme("ldaps").map_err(|()| {
                DirectoryError::invalid_config(format!("cannot switch `{}` to ldaps", self.url))
            })?;
        }
        Ok(url)
    }

    /// Returns whether certificate verification is disabled.
    #[must_use]
    pub const fn skip_cert_verify(&self) -> bool {
        self.skip_cert_verify
    }

    /// Optional custom CA certificate path.
    #[must_use]
    pub fn tls_ca_cert(&self) -> Option<&PathBuf> {
        self.tls_ca_cert.as_ref()
    }

    /// Returns the service identity when both its DN and password are non-empty.
    #[must_use]
    pub fn service_identity(&self) -> Option<&ServiceIdentity> {
        self.service_identity.as_ref().filter(|identity| {
            !identity.dn.is_empty() && !identity.password.expose_secret().is_empty()
        })
    }

    /// Returns the search base DN.
    #[must_use]
    pub fn search_base(&self) -> &str {
        &self.search_base
    }

    /// Returns the user filter template.
    #[must_use]
    pub const fn filter(&self) -> &FilterTemplate {
        &self.filter
    }

    /// Returns the attribute whose value replaces the entry DN for the password bind.
    #[must_use]
    pub fn dn_override_attribute(&self) -> Option<&str> {
        self.dn_override_attribute.as_deref()
    }

    /// Returns the attributes fetched for a resolved user, in order.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Returns the connection deadline.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the per-operation deadline.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Returns the end-to-end request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Enables TLS from the first byte.
    #[must_use]
    pub const fn with_implicit_tls(mut self, enabled: bool) -> Self {
        self.use_implicit_tls = enabled;
        self
    }

    /// Enables the StartTLS upgrade.
    #[must_use]
    pub const fn with_upgrade_tls(mut self, enabled: bool) -> Self {
        self.use_upgrade_tls = enabled;
        self
    }

    /// Disables certificate verification.
    #[must_use]
    pub const fn with_skip_cert_verify(mut self, skip: bool) -> Self {
        self.skip_cert_verify = skip;
        self
    }

    /// Adds a custom CA certificate for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Sets the service identity used before searching.
    #[must_use]
    pub fn with_service_bind(mut self, dn: impl Into<String>, password: SecretString) -> Self {
        self.service_identity = Some(ServiceIdentity {
            dn: dn.into(),
            password,
        });
        self
    }

    /// Overrides the user filter template.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterTemplate) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the attribute that overrides the entry DN for the password bind.
    #[must_use]
    pub fn with_dn_override_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.dn_override_attribute = Some(attribute.into());
        self
    }

    /// Replaces the attribute list returned for a resolved user.
    #[must_use]
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the connection deadline.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the per-operation deadline.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Overrides the end-to-end request deadline.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn parsed_url(&self) -> Result<Url> {
        Url::parse(&self.url).map_err(|err| {
            DirectoryError::with_cause(
                DirectoryErrorKind::InvalidConfig,
                format!("invalid directory URL `{}`", self.url),
                err,
            )
        })
    }
}
