//! LDAP credential verification.
//!
//! Each attempt opens its own connection, optionally binds a service identity, resolves the
//! login to a DN with a single-entry search and re-binds as that DN with the supplied password.
//! Every step runs under a deadline; results arriving late are released in the background.

#![deny(missing_docs)]

mod authenticator;
pub mod bounded;
mod config;
mod connector;
mod filter;
mod session;
mod transport;

pub use authenticator::{AuthError, AuthStage, Authenticator, Rejection};
pub use config::{
    DirectoryConfig, ServiceIdentity, TlsMode, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RETURN_ATTRIBUTES,
};
pub use connector::{DirectoryConnection, DirectoryConnector};
pub use filter::{escape_filter_value, FilterTemplate, FilterTemplateError, LOGIN_PLACEHOLDER};
pub use ldap3::{LdapError, LdapResult};
pub use session::ResolvedIdentity;
pub use transport::{
    result_code, Ldap3Dialer, LdapDialer, LdapEntry, LdapSession, SearchRequest,
    INVALID_CREDENTIALS_RC,
};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = authd_core::Result<T>;
