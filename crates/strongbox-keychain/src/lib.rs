//! Secure notes in macOS keychains, via the `security` command-line utility
//!
//! This crate shells out to `security` and recovers structured data from its
//! output:
//!
//! - **Discovery** ([`Registry`]): list keychains, resolve the default one, or
//!   find one by case-insensitive name
//! - **Scoped unlock** ([`Keychain::open`], [`Keychain::with_open`]): unlock for
//!   the duration of a guard or closure, always locking again afterwards
//! - **Read** ([`Keychain::read`]): parse the attribute dump and peel the
//!   secret's hex and property-list layers
//! - **Write** ([`Keychain::write`]): upsert a secure note keyed by service name
//!
//! # Example
//!
//! ```rust,ignore
//! use strongbox_keychain::{Registry, SecurityCli, WriteOptions};
//!
//! let registry = Registry::new(SecurityCli::default());
//! let keychain = registry.find("notes")?;
//!
//! keychain.with_open(|keychain| {
//!     keychain.write("api-token", "s3cret", &WriteOptions::default())?;
//!     let entry = keychain.read("api-token")?;
//!     println!("{}", entry.secret_text());
//!     Ok::<_, strongbox_keychain::KeychainError>(())
//! })?;
//! ```

pub mod codec;
mod error;
mod keychain;
mod registry;
mod runner;

pub use codec::{EntryInfo, EntryType, WriteOptions};
pub use error::{CommandError, KeychainError, Result};
pub use keychain::{Entry, Keychain, OpenKeychain};
pub use registry::Registry;
pub use runner::{CommandOutput, CommandRunner, SecurityCli, DEFAULT_SECURITY_PATH};
