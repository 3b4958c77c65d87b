//! Keychain discovery

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{KeychainError, Result};
use crate::keychain::Keychain;
use crate::runner::{CommandRunner, SecurityCli};

static KEYCHAIN_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"\n]+\.keychain(?:-db)?)""#).expect("valid keychain path regex")
});

/// Enumerates and resolves the keychains known to the OS
#[derive(Debug, Clone, Default)]
pub struct Registry<R = SecurityCli> {
    runner: R,
}

impl<R: CommandRunner + Clone> Registry<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// All keychains on the search list, in the order the utility reports them
    pub fn list(&self) -> Result<Vec<Keychain<R>>> {
        let output = self.runner.run(&["list-keychains".to_string()])?;
        let keychains: Vec<_> = keychain_paths(&output)
            .map(|path| Keychain::new(path, self.runner.clone()))
            .collect();

        tracing::debug!(count = keychains.len(), "Listed keychains");
        Ok(keychains)
    }

    /// The user's default keychain
    pub fn default_keychain(&self) -> Result<Keychain<R>> {
        let output = self.runner.run(&["default-keychain".to_string()])?;
        let path = keychain_paths(&output)
            .next()
            .ok_or_else(|| KeychainError::not_found("no default keychain is set"))?;

        Ok(Keychain::new(path, self.runner.clone()))
    }

    /// First keychain whose path contains `name`, ignoring case
    pub fn find(&self, name: &str) -> Result<Keychain<R>> {
        let mut keychains = self.list()?;
        let needle = name.to_lowercase();

        if let Some(index) = keychains.iter().position(|keychain| {
            keychain
                .path()
                .to_string_lossy()
                .to_lowercase()
                .contains(&needle)
        }) {
            return Ok(keychains.swap_remove(index));
        }

        let known = keychains
            .iter()
            .map(|keychain| keychain.name())
            .collect::<Vec<_>>()
            .join(", ");
        Err(KeychainError::not_found(format!(
            "could not find keychain \"{name}\" in {known}"
        )))
    }
}

fn keychain_paths(output: &str) -> impl Iterator<Item = &str> {
    KEYCHAIN_PATH
        .captures_iter(output)
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str())
}
