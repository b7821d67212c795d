//! Tracing subscriber setup.

use anyhow::Context;
use file_rotate::compression::Compression;
use file_rotate::suffix::{AppendTimestamp, FileLimit};
use file_rotate::{ContentLimit, FileRotate};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Limits applied to the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotation {
    /// Size in megabytes at which the file is rotated.
    pub max_size_mb: u64,
    /// Rotated files to keep. Zero falls back to `max_age_days`.
    pub max_backups: usize,
    /// Days a rotated file is kept when `max_backups` is zero. Zero keeps everything.
    pub max_age_days: u32,
    /// Gzip rotated files.
    pub compress: bool,
}

impl Default for LogRotation {
    fn default() -> Self {
        Self {
            max_size_mb: 100,
            max_backups: 3,
            max_age_days: 28,
            compress: true,
        }
    }
}

impl LogRotation {
    fn content_limit(&self) -> ContentLimit {
        let bytes = self.max_size_mb.max(1).saturating_mul(1024 * 1024);
        ContentLimit::Bytes(usize::try_from(bytes).unwrap_or(usize::MAX))
    }

    fn file_limit(&self) -> FileLimit {
        if self.max_backups > 0 {
            FileLimit::MaxFiles(self.max_backups)
        } else if self.max_age_days > 0 {
            FileLimit::Age(chrono::Duration::days(i64::from(self.max_age_days)))
        } else {
            FileLimit::Unlimited
        }
    }

    fn compression(&self) -> Compression {
        if self.compress {
            Compression::OnRotate(0)
        } else {
            Compression::None
        }
    }
}

/// Opens `path` for appending and rotates it by size.
///
/// Rotated files get a timestamp suffix.
///
/// # Errors
///
/// Fails when the file cannot be created or opened.
pub fn rotating_file(
    path: &Path,
    rotation: &LogRotation,
) -> anyhow::Result<FileRotate<AppendTimestamp>> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    Ok(FileRotate::new(
        path,
        AppendTimestamp::default(rotation.file_limit()),
        rotation.content_limit(),
        rotation.compression(),
        #[cfg(unix)]
        None,
    ))
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. When `log_file` is set, events are also written
/// to that file without ANSI colors, rotated according to `rotation`.
///
/// # Errors
///
/// Fails when the log file cannot be opened or a subscriber is already installed.
pub fn init(level: &str, log_file: Option<&Path>, rotation: &LogRotation) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            let file = rotating_file(path, rotation)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}
