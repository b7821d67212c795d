//! ldap-authd - verifies user credentials against an LDAP directory.

use anyhow::Context;
use authd_ldap::Authenticator;
use authd_server::{logging, ServerSettings};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let settings = ServerSettings::parse();

    logging::init(
        &settings.log_level,
        settings.log_file.as_deref(),
        &settings.log_rotation(),
    )?;

    info!(config = %settings.summary(), "starting ldap-authd");

    let config = settings
        .directory_config()
        .context("invalid directory configuration")?;
    let authenticator = Authenticator::new(Arc::new(config));

    authd_server::serve(&settings, authenticator).await
}
