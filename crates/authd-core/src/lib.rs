//! # authd-core
//!
//! Shared error taxonomy for the ldap-authd crates.
//!
//! ## Modules
//!
//! - [`error`] - [`DirectoryError`] and its closed [`DirectoryErrorKind`] enumeration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;

// Re-export commonly used types
pub use error::{BoxError, DirectoryError, DirectoryErrorKind, Result};
