//! Invocation of the `security` command-line utility
//!
//! Every keychain operation is a single blocking call to the utility. The
//! [`CommandRunner`] trait is the seam between keychain logic and the process
//! boundary, so tests can substitute an in-memory fake.
//!
//! See: `man security`

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::error::CommandError;

/// Default location of the utility on macOS
pub const DEFAULT_SECURITY_PATH: &str = "/usr/bin/security";

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs the credential-store utility with the given arguments
///
/// The first argument is always the verb. A non-zero exit status must be
/// reported as a [`CommandError`] carrying the utility's diagnostic text.
pub trait CommandRunner {
    fn execute(&self, args: &[String]) -> Result<CommandOutput, CommandError>;

    /// Run and return standard output only
    fn run(&self, args: &[String]) -> Result<String, CommandError> {
        self.execute(args).map(|output| output.stdout)
    }

    /// Run and return the (info, secret) regions separately
    ///
    /// With `-g` the utility prints the attribute dump on stdout and the
    /// `password:` line on stderr.
    fn run_split(&self, args: &[String]) -> Result<(String, String), CommandError> {
        self.execute(args)
            .map(|output| (output.stdout, output.stderr))
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn execute(&self, args: &[String]) -> Result<CommandOutput, CommandError> {
        (**self).execute(args)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    fn execute(&self, args: &[String]) -> Result<CommandOutput, CommandError> {
        (**self).execute(args)
    }
}

/// Runs the real `security` binary as a subprocess
#[derive(Debug, Clone)]
pub struct SecurityCli {
    program: PathBuf,
}

impl Default for SecurityCli {
    fn default() -> Self {
        Self::new(DEFAULT_SECURITY_PATH)
    }
}

impl SecurityCli {
    /// Use the utility at the given path
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Path of the utility being invoked
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl CommandRunner for SecurityCli {
    fn execute(&self, args: &[String]) -> Result<CommandOutput, CommandError> {
        let verb = args.first().map(String::as_str).unwrap_or_default();

        // Arguments may carry secret data; only the verb is logged.
        tracing::debug!(program = %self.program.display(), verb, "Invoking security");

        let output = Command::new(&self.program).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandError::new(
                    verb,
                    None,
                    format!(
                        "'{}' not found. The security utility ships with macOS; set security_path in the configuration if it lives elsewhere",
                        self.program.display()
                    ),
                )
            } else {
                CommandError::new(
                    verb,
                    None,
                    format!("Failed to execute '{}': {}", self.program.display(), e),
                )
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            tracing::debug!(verb, status = ?output.status.code(), "security reported failure");
            return Err(CommandError::new(verb, output.status.code(), message));
        }

        Ok(CommandOutput { stdout, stderr })
    }
}
