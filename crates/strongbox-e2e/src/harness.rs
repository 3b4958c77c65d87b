//! Shared fixtures for end-to-end tests

use strongbox_keychain::{Keychain, Registry};

use crate::fake_security::FakeSecurity;

pub const LOGIN_PATH: &str = "/Users/tester/Library/Keychains/login.keychain-db";
pub const NOTES_PATH: &str = "/Users/tester/Library/Keychains/Project Notes.keychain";
pub const SYSTEM_PATH: &str = "/Library/Keychains/System.keychain";

/// Initialize tracing for tests (safe to call repeatedly)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("strongbox_keychain=debug,strongbox_e2e=debug")
        .with_test_writer()
        .try_init();
}

/// A fake store preloaded with login, project-notes and system keychains
pub struct TestKeychains {
    pub security: FakeSecurity,
    pub registry: Registry<FakeSecurity>,
}

impl TestKeychains {
    pub fn new() -> Self {
        let security = FakeSecurity::new();
        security
            .add_keychain(LOGIN_PATH)
            .add_keychain(NOTES_PATH)
            .add_keychain(SYSTEM_PATH);

        tracing::debug!("Fake security utility ready with 3 keychains");

        Self {
            registry: Registry::new(security.clone()),
            security,
        }
    }

    /// Handle onto the project-notes keychain
    pub fn notes(&self) -> Keychain<FakeSecurity> {
        Keychain::new(NOTES_PATH, self.security.clone())
    }
}

impl Default for TestKeychains {
    fn default() -> Self {
        Self::new()
    }
}
