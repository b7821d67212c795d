//! Service settings read from flags and the environment.

use crate::logging::LogRotation;
use authd_core::DirectoryError;
use authd_ldap::{DirectoryConfig, FilterTemplate};
use clap::{ArgAction, Parser};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for the `ldap-authd` process.
#[derive(Clone, Parser)]
#[command(name = "ldap-authd")]
#[command(version)]
#[command(about = "Verifies user credentials against an LDAP directory", long_about = None)]
pub struct ServerSettings {
    /// HTTP listen port
    #[arg(long, env = "SERVICE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory server URL (ldap:// or ldaps://)
    #[arg(long, env = "LDAP_URL", default_value = "ldap://ldap.example.com:389")]
    pub ldap_url: String,

    /// Service identity DN used before searching
    #[arg(long, env = "LDAP_BIND_DN")]
    pub bind_dn: Option<String>,

    /// Service identity password
    #[arg(long, env = "LDAP_BIND_PASSWORD", hide_env_values = true)]
    pub bind_password: Option<String>,

    /// Base DN for user searches
    #[arg(long, env = "LDAP_USER_BASE", default_value = "dc=example,dc=com")]
    pub user_base: String,

    /// User search filter, `%s` is replaced by the escaped login
    #[arg(long, env = "LDAP_USER_FILTER", default_value = "(uid=%s)")]
    pub user_filter: String,

    /// Attribute whose value replaces the entry DN for the password bind
    #[arg(long, env = "LDAP_USER_DN_ATTR")]
    pub user_dn_attr: Option<String>,

    /// Attributes returned to the client on success
    #[arg(
        long,
        env = "LDAP_RETURN_ATTRIBUTES",
        value_delimiter = ',',
        default_value = "cn,mail,uid"
    )]
    pub return_attributes: Vec<String>,

    /// Use TLS from the first byte
    #[arg(long, env = "LDAP_USE_LDAPS", action = ArgAction::Set, value_parser = parse_flag, default_value = "false")]
    pub use_ldaps: bool,

    /// Upgrade a plain connection with StartTLS
    #[arg(long, env = "LDAP_USE_STARTTLS", action = ArgAction::Set, value_parser = parse_flag, default_value = "false")]
    pub use_starttls: bool,

    /// Skip certificate and hostname verification
    #[arg(long, env = "LDAP_INSECURE_SKIP_VERIFY", action = ArgAction::Set, value_parser = parse_flag, default_value = "false")]
    pub insecure_skip_verify: bool,

    /// PEM file with an extra trusted CA certificate
    #[arg(long, env = "LDAP_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// Connect timeout in seconds
    #[arg(long, env = "LDAP_CONNECT_TIMEOUT_SECS", default_value_t = authd_ldap::DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,

    /// Search and bind timeout in seconds
    #[arg(long, env = "LDAP_OPERATION_TIMEOUT_SECS", default_value_t = authd_ldap::DEFAULT_OPERATION_TIMEOUT_SECS)]
    pub operation_timeout_secs: u64,

    /// Overall timeout for one authentication in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = authd_ldap::DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// URL path prefix for every route, e.g. `/ldap`
    #[arg(long, env = "BASE_PATH", default_value = "", value_parser = parse_base_path)]
    pub base_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Also append logs to this file
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log file size in megabytes before it is rotated
    #[arg(long, env = "LOG_MAX_SIZE_MB", default_value_t = 100)]
    pub log_max_size_mb: u64,

    /// Rotated log files to keep
    #[arg(long, env = "LOG_MAX_BACKUPS", default_value_t = 3)]
    pub log_max_backups: usize,

    /// Days to keep rotated log files when no backup count is set
    #[arg(long, env = "LOG_MAX_AGE_DAYS", default_value_t = 28)]
    pub log_max_age_days: u32,

    /// Gzip rotated log files
    #[arg(long, env = "LOG_COMPRESS", action = ArgAction::Set, value_parser = parse_flag, default_value = "true")]
    pub log_compress: bool,
}

impl ServerSettings {
    /// Builds and validates the directory configuration.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_config` [`DirectoryError`] when any directory setting is malformed.
    pub fn directory_config(&self) -> Result<DirectoryConfig, DirectoryError> {
        let filter = FilterTemplate::parse(&self.user_filter)?;

        let mut config = DirectoryConfig::new(&self.ldap_url, &self.user_base)?
            .with_implicit_tls(self.use_ldaps)
            .with_upgrade_tls(self.use_starttls)
            .with_skip_cert_verify(self.insecure_skip_verify)
            .with_filter(filter)
            .with_attributes(self.return_attributes.iter().map(|name| name.trim()))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_operation_timeout(Duration::from_secs(self.operation_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs));

        if let Some(path) = &self.ca_cert {
            config = config.with_tls_ca_cert(path.clone());
        }
        if let Some(dn) = &self.bind_dn {
            let password = self.bind_password.clone().unwrap_or_default();
            config = config.with_service_bind(dn.clone(), SecretString::from(password));
        }
        if let Some(attribute) = &self.user_dn_attr {
            config = config.with_dn_override_attribute(attribute.clone());
        }

        config.ensure_valid()?;
        Ok(config)
    }

    /// Rotation limits for the log file.
    #[must_use]
    pub const fn log_rotation(&self) -> LogRotation {
        LogRotation {
            max_size_mb: self.log_max_size_mb,
            max_backups: self.log_max_backups,
            max_age_days: self.log_max_age_days,
            compress: self.log_compress,
        }
    }

    /// Effective settings for the startup log. Secrets are left out.
    #[must_use]
    pub fn summary(&self) -> Value {
        json!({
            "port": self.port,
            "ldap_url": self.ldap_url,
            "service_bind": self.bind_dn.is_some(),
            "user_base": self.user_base,
            "user_filter": self.user_filter,
            "user_dn_attr": self.user_dn_attr,
            "return_attributes": self.return_attributes,
            "use_ldaps": self.use_ldaps,
            "use_starttls": self.use_starttls,
            "insecure_skip_verify": self.insecure_skip_verify,
            "ca_cert": self.ca_cert,
            "connect_timeout_secs": self.connect_timeout_secs,
            "operation_timeout_secs": self.operation_timeout_secs,
            "request_timeout_secs": self.request_timeout_secs,
            "base_path": self.base_path,
            "log_level": self.log_level,
            "log_file": self.log_file,
            "log_max_size_mb": self.log_max_size_mb,
            "log_max_backups": self.log_max_backups,
            "log_max_age_days": self.log_max_age_days,
            "log_compress": self.log_compress,
        })
    }
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSettings")
            .field("port", &self.port)
            .field("ldap_url", &self.ldap_url)
            .field("bind_dn", &self.bind_dn)
            .field("user_base", &self.user_base)
            .field("user_filter", &self.user_filter)
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

/// Accepts `1` or `true` (any case) as enabled; everything else is disabled.
fn parse_flag(value: &str) -> Result<bool, Infallible> {
    let value = value.trim();
    Ok(value == "1" || value.eq_ignore_ascii_case("true"))
}

fn parse_base_path(value: &str) -> Result<String, Infallible> {
    Ok(normalize_path(value))
}

/// Normalizes a route prefix to a leading `/` and no trailing `/`. Blank or `/` becomes empty.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
