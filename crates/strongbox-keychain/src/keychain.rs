//! Keychain handle: scoped unlock, entry read and upsert

use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::codec::{self, EntryInfo, WriteOptions};
use crate::error::{CommandError, KeychainError, Result};
use crate::runner::{CommandRunner, SecurityCli};

const KEYCHAIN_SUFFIXES: [&str; 2] = [".keychain-db", ".keychain"];

/// A secure note read back from a keychain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    #[serde(flatten)]
    pub info: EntryInfo,
    #[serde(serialize_with = "serialize_secret")]
    pub secret: Vec<u8>,
}

impl Entry {
    /// Secret as text, with invalid UTF-8 replaced
    pub fn secret_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.secret)
    }
}

fn serialize_secret<S>(secret: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(secret))
}

/// Handle onto an OS-managed keychain file
///
/// Holds no state of its own beyond the path; every operation is a fresh
/// invocation of the utility.
#[derive(Debug, Clone)]
pub struct Keychain<R = SecurityCli> {
    path: PathBuf,
    name: String,
    runner: R,
}

impl<R: CommandRunner> Keychain<R> {
    pub fn new(path: impl Into<PathBuf>, runner: R) -> Self {
        let path = path.into();
        let name = keychain_name(&path);
        Self { path, name, runner }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without the keychain extension
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unlock the keychain until the returned guard is dropped
    ///
    /// If unlocking fails the keychain is still locked again before the
    /// error is returned.
    pub fn open(&self) -> Result<OpenKeychain<'_, R>> {
        tracing::debug!(keychain = %self.name, "Unlocking keychain");

        let guard = OpenKeychain {
            keychain: self,
            locked: false,
        };
        self.command("unlock-keychain", Vec::new())?;
        Ok(guard)
    }

    /// Run `f` with the keychain unlocked, locking it again afterwards
    ///
    /// The lock runs whether `f` returns `Ok`, returns `Err` or panics; a
    /// panic is resumed once the keychain is locked.
    pub fn with_open<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<KeychainError>,
    {
        let guard = self.open()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));

        match outcome {
            Ok(Ok(value)) => {
                guard.close()?;
                Ok(value)
            }
            Ok(Err(e)) => {
                drop(guard);
                Err(e)
            }
            Err(payload) => {
                drop(guard);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Read the entry whose label is `key`
    ///
    /// Every lookup failure is reported as [`KeychainError::NotFound`].
    pub fn read(&self, key: &str) -> Result<Entry> {
        let args = self.args(
            "find-generic-password",
            vec!["-g".to_string(), "-l".to_string(), key.to_string()],
        );

        let (info, secret) = self.runner.run_split(&args).map_err(|e| {
            tracing::debug!(keychain = %self.name, error = %e, "Lookup failed");
            KeychainError::not_found(format!("key not found: {key}"))
        })?;

        Ok(Entry {
            info: codec::parse_info(&info),
            secret: codec::decode_secret_payload(codec::parse_secret(&secret)),
        })
    }

    /// Insert or replace the entry for `key`
    pub fn write(&self, key: &str, data: &str, options: &WriteOptions) -> Result<()> {
        let flags = codec::encode_write_args(key, data, options)?;
        tracing::debug!(keychain = %self.name, key, "Writing entry");
        self.command("add-generic-password", flags)?;
        Ok(())
    }

    fn lock(&self) -> std::result::Result<(), CommandError> {
        tracing::debug!(keychain = %self.name, "Locking keychain");
        self.command("lock-keychain", Vec::new())
    }

    fn command(&self, verb: &str, flags: Vec<String>) -> std::result::Result<(), CommandError> {
        self.runner.run(&self.args(verb, flags)).map(|_| ())
    }

    /// `verb flags... path`: the keychain path always comes last
    fn args(&self, verb: &str, flags: Vec<String>) -> Vec<String> {
        let mut args = Vec::with_capacity(flags.len() + 2);
        args.push(verb.to_string());
        args.extend(flags);
        args.push(self.path.to_string_lossy().into_owned());
        args
    }
}

impl<R> fmt::Display for Keychain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Unlocked window onto a [`Keychain`]; locks it again exactly once
#[must_use = "the keychain is locked again as soon as the guard is dropped"]
pub struct OpenKeychain<'a, R: CommandRunner> {
    keychain: &'a Keychain<R>,
    locked: bool,
}

impl<R: CommandRunner> OpenKeychain<'_, R> {
    /// Lock now and report failure instead of logging it
    pub fn close(mut self) -> Result<()> {
        self.locked = true;
        self.keychain.lock()?;
        Ok(())
    }
}

impl<R: CommandRunner> std::ops::Deref for OpenKeychain<'_, R> {
    type Target = Keychain<R>;

    fn deref(&self) -> &Self::Target {
        self.keychain
    }
}

impl<R: CommandRunner> Drop for OpenKeychain<'_, R> {
    fn drop(&mut self) {
        if self.locked {
            return;
        }
        self.locked = true;
        if let Err(e) = self.keychain.lock() {
            tracing::warn!(keychain = %self.keychain.name, error = %e, "Failed to lock keychain");
        }
    }
}

fn keychain_name(path: &Path) -> String {
    let base = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let stem = KEYCHAIN_SUFFIXES
        .iter()
        .find_map(|suffix| base.strip_suffix(suffix))
        .filter(|stem| !stem.is_empty())
        .map(str::to_string);
    stem.unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::runner::CommandOutput;

    /// Records invocations and replays scripted results in order
    #[derive(Debug, Default)]
    struct Scripted {
        calls: RefCell<Vec<Vec<String>>>,
        results: RefCell<VecDeque<std::result::Result<CommandOutput, CommandError>>>,
    }

    impl Scripted {
        fn push_ok(&self, stdout: &str, stderr: &str) {
            self.results.borrow_mut().push_back(Ok(CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }));
        }

        fn push_err(&self, verb: &str, message: &str) {
            self.results
                .borrow_mut()
                .push_back(Err(CommandError::new(verb, Some(1), message)));
        }

        fn verbs(&self) -> Vec<String> {
            self.calls.borrow().iter().map(|args| args[0].clone()).collect()
        }
    }

    impl CommandRunner for Scripted {
        fn execute(&self, args: &[String]) -> std::result::Result<CommandOutput, CommandError> {
            self.calls.borrow_mut().push(args.to_vec());
            self.results
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::default()))
        }
    }

    const PATH: &str = "/Users/me/Library/Keychains/Notes.keychain";

    #[test]
    fn test_name_strips_extension() {
        let runner = Scripted::default();
        assert_eq!(Keychain::new(PATH, &runner).name(), "Notes");
        assert_eq!(
            Keychain::new("/Library/Keychains/login.keychain-db", &runner).name(),
            "login"
        );
        assert_eq!(Keychain::new("/tmp/plain", &runner).name(), "plain");
        assert_eq!(Keychain::new("/tmp/.keychain", &runner).name(), ".keychain");
        assert_eq!(Keychain::new(PATH, &runner).to_string(), "Notes");
    }

    #[test]
    fn test_read_parses_entry() {
        let runner = Scripted::default();
        runner.push_ok(
            "    0x00000007 <blob>=\"MyService\"\n    \"acct\"<blob>=<NULL>\n    \"desc\"<blob>=\"secure note\"\n    \"svce\"<blob>=\"MyService\"\n    \"type\"<uint32>=\"note\"\n",
            "password: 0x68756E74657232\n",
        );
        let keychain = Keychain::new(PATH, &runner);

        let entry = keychain.read("MyService").unwrap();
        assert_eq!(entry.info.service_name, "MyService");
        assert_eq!(entry.info.account_name, "");
        assert_eq!(entry.secret_text(), "hunter2");

        let calls = runner.calls.borrow();
        assert_eq!(
            calls[0],
            vec!["find-generic-password", "-g", "-l", "MyService", PATH]
        );
    }

    #[test]
    fn test_read_failure_is_not_found() {
        let runner = Scripted::default();
        runner.push_err(
            "find-generic-password",
            "The specified item could not be found in the keychain.",
        );
        let keychain = Keychain::new(PATH, &runner);

        let err = keychain.read("missing").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "key not found: missing");
    }

    #[test]
    fn test_write_invocation() {
        let runner = Scripted::default();
        let keychain = Keychain::new(PATH, &runner);

        keychain
            .write("MyService", "data", &WriteOptions::default())
            .unwrap();

        let calls = runner.calls.borrow();
        assert_eq!(
            calls[0],
            vec![
                "add-generic-password", "-a", "", "-s", "MyService", "-l", "MyService", "-D",
                "secure note", "-C", "note", "-T", "", "-U", "-w", "data", PATH,
            ]
        );
    }

    #[test]
    fn test_write_failure_propagates_command_error() {
        let runner = Scripted::default();
        runner.push_err("add-generic-password", "User interaction is not allowed.");
        let keychain = Keychain::new(PATH, &runner);

        let err = keychain
            .write("MyService", "data", &WriteOptions::default())
            .unwrap_err();
        match err {
            KeychainError::Command(e) => assert_eq!(e.message, "User interaction is not allowed."),
            other => panic!("expected command error, got {other:?}"),
        }
    }

    #[test]
    fn test_write_unknown_type_runs_nothing() {
        let runner = Scripted::default();
        let keychain = Keychain::new(PATH, &runner);

        let err = keychain
            .write("k", "d", &WriteOptions::new().entry_type("card"))
            .unwrap_err();
        assert!(matches!(err, KeychainError::UnknownEntryType { .. }));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_open_guard_locks_on_drop() {
        let runner = Scripted::default();
        let keychain = Keychain::new(PATH, &runner);

        {
            let open = keychain.open().unwrap();
            assert_eq!(open.name(), "Notes");
        }

        assert_eq!(runner.verbs(), vec!["unlock-keychain", "lock-keychain"]);
        assert_eq!(runner.calls.borrow()[1], vec!["lock-keychain", PATH]);
    }

    #[test]
    fn test_close_locks_once() {
        let runner = Scripted::default();
        let keychain = Keychain::new(PATH, &runner);

        keychain.open().unwrap().close().unwrap();
        assert_eq!(runner.verbs(), vec!["unlock-keychain", "lock-keychain"]);
    }

    #[test]
    fn test_failed_unlock_still_locks() {
        let runner = Scripted::default();
        runner.push_err("unlock-keychain", "bad password");
        let keychain = Keychain::new(PATH, &runner);

        assert!(keychain.open().is_err());
        assert_eq!(runner.verbs(), vec!["unlock-keychain", "lock-keychain"]);
    }

    #[test]
    fn test_with_open_locks_after_error() {
        let runner = Scripted::default();
        let keychain = Keychain::new(PATH, &runner);

        let result: Result<()> =
            keychain.with_open(|_| Err(KeychainError::not_found("nothing here")));
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(runner.verbs(), vec!["unlock-keychain", "lock-keychain"]);
    }

    #[test]
    fn test_with_open_locks_after_panic() {
        let runner = Scripted::default();
        let keychain = Keychain::new(PATH, &runner);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<()> = keychain.with_open(|_| panic!("caller failed"));
        }));

        assert!(outcome.is_err());
        assert_eq!(runner.verbs(), vec!["unlock-keychain", "lock-keychain"]);
    }

    #[test]
    fn test_with_open_reports_lock_failure_on_success() {
        let runner = Scripted::default();
        runner.push_ok("", "");
        runner.push_err("lock-keychain", "could not lock");
        let keychain = Keychain::new(PATH, &runner);

        let result: Result<u8> = keychain.with_open(|_| Ok(7));
        assert!(matches!(result, Err(KeychainError::Command(_))));
        assert_eq!(runner.verbs(), vec!["unlock-keychain", "lock-keychain"]);
    }

    #[test]
    fn test_entry_serializes_secret_as_text() {
        let entry = Entry {
            info: EntryInfo {
                service_name: "svc".to_string(),
                entry_type: "note".to_string(),
                ..EntryInfo::default()
            },
            secret: b"text".to_vec(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["service_name"], "svc");
        assert_eq!(json["type"], "note");
        assert_eq!(json["secret"], "text");
    }
}
