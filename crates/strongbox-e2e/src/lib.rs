//! End-to-end test utilities for strongbox
//!
//! This crate provides a fake `security` utility and fixtures for exercising
//! the keychain crate without touching a real macOS keychain.

pub mod fake_security;
pub mod harness;

pub use fake_security::{FakeSecurity, StoredItem};
pub use harness::{init_test, TestKeychains};
