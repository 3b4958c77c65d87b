//! In-memory stand-in for the `security` utility
//!
//! Understands the verbs the keychain crate issues and answers in the same
//! textual formats as the real binary: quoted paths for discovery, an
//! attribute dump on stdout and a `password:` line on stderr for lookups.
//! Every invocation is recorded for assertions, and any verb can be made to
//! fail.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use strongbox_keychain::{CommandError, CommandOutput, CommandRunner};

const ITEM_NOT_FOUND: i32 = 44;
const DUPLICATE_ITEM: i32 = 45;
const NO_SUCH_KEYCHAIN: i32 = 50;

/// A generic-password item held by the fake
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredItem {
    pub account: String,
    pub service: String,
    pub label: String,
    pub description: String,
    pub type_code: String,
    pub secret: Vec<u8>,
}

#[derive(Debug, Default)]
struct FakeKeychain {
    path: String,
    locked: bool,
    lock_count: usize,
    unlock_count: usize,
    items: Vec<StoredItem>,
}

#[derive(Debug, Default)]
struct State {
    keychains: Vec<FakeKeychain>,
    default: Option<String>,
    failures: HashMap<String, String>,
    calls: Vec<Vec<String>>,
}

/// Shared handle onto a fake credential store
///
/// Clones share state, so a registry and the keychains it hands out all see
/// the same items.
#[derive(Clone, Debug, Default)]
pub struct FakeSecurity {
    state: Arc<Mutex<State>>,
}

impl FakeSecurity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a locked keychain; the first one added becomes the default
    pub fn add_keychain(&self, path: &str) -> &Self {
        let mut state = self.state.lock();
        if state.default.is_none() {
            state.default = Some(path.to_string());
        }
        state.keychains.push(FakeKeychain {
            path: path.to_string(),
            locked: true,
            ..Default::default()
        });
        self
    }

    pub fn set_default(&self, path: &str) {
        self.state.lock().default = Some(path.to_string());
    }

    /// Store an item directly, bypassing `add-generic-password`
    pub fn insert_item(&self, path: &str, item: StoredItem) {
        let mut state = self.state.lock();
        if let Some(keychain) = state.keychains.iter_mut().find(|k| k.path == path) {
            keychain.items.push(item);
        }
    }

    /// Store a secure note the way Keychain Access does: text wrapped in an
    /// XML property list under `NOTE`
    pub fn insert_note(&self, path: &str, service: &str, text: &str) {
        let mut dict = plist::Dictionary::new();
        dict.insert("NOTE".to_string(), plist::Value::String(text.to_string()));
        let mut secret = Vec::new();
        plist::Value::Dictionary(dict)
            .to_writer_xml(&mut secret)
            .expect("Failed to encode plist");

        self.insert_item(
            path,
            StoredItem {
                account: String::new(),
                service: service.to_string(),
                label: service.to_string(),
                description: "secure note".to_string(),
                type_code: "note".to_string(),
                secret,
            },
        );
    }

    /// Make every invocation of `verb` fail with `message`
    pub fn fail(&self, verb: &str, message: &str) {
        self.state
            .lock()
            .failures
            .insert(verb.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every invocation so far, verb first
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().calls.clone()
    }

    pub fn verbs(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|args| args.first().cloned())
            .collect()
    }

    pub fn items(&self, path: &str) -> Vec<StoredItem> {
        self.with_keychain(path, |k| k.items.clone())
            .unwrap_or_default()
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.with_keychain(path, |k| k.locked).unwrap_or(true)
    }

    pub fn lock_count(&self, path: &str) -> usize {
        self.with_keychain(path, |k| k.lock_count).unwrap_or_default()
    }

    pub fn unlock_count(&self, path: &str) -> usize {
        self.with_keychain(path, |k| k.unlock_count)
            .unwrap_or_default()
    }

    fn with_keychain<T>(&self, path: &str, f: impl FnOnce(&FakeKeychain) -> T) -> Option<T> {
        let state = self.state.lock();
        state.keychains.iter().find(|k| k.path == path).map(f)
    }
}

impl CommandRunner for FakeSecurity {
    fn execute(&self, args: &[String]) -> Result<CommandOutput, CommandError> {
        let mut state = self.state.lock();
        state.calls.push(args.to_vec());

        let verb = args.first().map(String::as_str).unwrap_or_default();
        if let Some(message) = state.failures.get(verb) {
            return Err(CommandError::new(verb, Some(1), message.clone()));
        }

        let rest = &args[1.min(args.len())..];
        match verb {
            "list-keychains" => Ok(stdout(
                state
                    .keychains
                    .iter()
                    .map(|k| format!("    \"{}\"\n", k.path))
                    .collect(),
            )),
            "default-keychain" => Ok(stdout(
                state
                    .default
                    .as_ref()
                    .map(|path| format!("    \"{path}\"\n"))
                    .unwrap_or_default(),
            )),
            "unlock-keychain" | "lock-keychain" => {
                let keychain = keychain_mut(&mut state, verb, rest)?;
                if verb == "unlock-keychain" {
                    keychain.locked = false;
                    keychain.unlock_count += 1;
                } else {
                    keychain.locked = true;
                    keychain.lock_count += 1;
                }
                Ok(CommandOutput::default())
            }
            "find-generic-password" => find_generic_password(&mut state, rest),
            "add-generic-password" => add_generic_password(&mut state, rest),
            other => Err(CommandError::new(
                other,
                Some(2),
                format!("security: {other}: unknown command"),
            )),
        }
    }
}

fn stdout(text: String) -> CommandOutput {
    CommandOutput {
        stdout: text,
        stderr: String::new(),
    }
}

/// The keychain path is always the last argument
fn keychain_mut<'a>(
    state: &'a mut State,
    verb: &str,
    rest: &[String],
) -> Result<&'a mut FakeKeychain, CommandError> {
    let path = rest.last().cloned().unwrap_or_default();
    state
        .keychains
        .iter_mut()
        .find(|k| k.path == path)
        .ok_or_else(|| {
            CommandError::new(
                verb,
                Some(NO_SUCH_KEYCHAIN),
                format!("security: {verb} {path}: The specified keychain could not be found."),
            )
        })
}

/// Split `-x value` pairs (and bare `-U`/`-g` switches) from the trailing path
fn parse_flags(rest: &[String]) -> (HashMap<String, String>, Vec<String>) {
    let mut values = HashMap::new();
    let mut switches = Vec::new();
    let flags = &rest[..rest.len().saturating_sub(1)];

    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "-U" | "-g" => switches.push(flag.clone()),
            _ => {
                let value = iter.next().cloned().unwrap_or_default();
                values.insert(flag.clone(), value);
            }
        }
    }

    (values, switches)
}

fn find_generic_password(state: &mut State, rest: &[String]) -> Result<CommandOutput, CommandError> {
    const VERB: &str = "find-generic-password";
    let (values, switches) = parse_flags(rest);
    let keychain = keychain_mut(state, VERB, rest)?;

    let item = keychain
        .items
        .iter()
        .find(|item| {
            values.get("-l").map_or(true, |label| &item.label == label)
                && values.get("-s").map_or(true, |service| &item.service == service)
                && values.get("-a").map_or(true, |account| &item.account == account)
        })
        .ok_or_else(|| {
            CommandError::new(
                VERB,
                Some(ITEM_NOT_FOUND),
                "security: SecKeychainSearchCopyNext: The specified item could not be found in the keychain.",
            )
        })?;

    let stderr = if switches.iter().any(|s| s == "-g") {
        password_line(&item.secret)
    } else {
        String::new()
    };

    Ok(CommandOutput {
        stdout: attribute_dump(&keychain.path, item),
        stderr,
    })
}

fn add_generic_password(state: &mut State, rest: &[String]) -> Result<CommandOutput, CommandError> {
    const VERB: &str = "add-generic-password";
    let (values, switches) = parse_flags(rest);
    let keychain = keychain_mut(state, VERB, rest)?;

    let get = |flag: &str| values.get(flag).cloned().unwrap_or_default();
    let service = get("-s");
    let item = StoredItem {
        account: get("-a"),
        label: values.get("-l").cloned().unwrap_or_else(|| service.clone()),
        description: get("-D"),
        type_code: get("-C"),
        secret: get("-w").into_bytes(),
        service,
    };

    let existing = keychain
        .items
        .iter()
        .position(|i| i.service == item.service && i.account == item.account);

    match existing {
        Some(index) if switches.iter().any(|s| s == "-U") => keychain.items[index] = item,
        Some(_) => {
            return Err(CommandError::new(
                VERB,
                Some(DUPLICATE_ITEM),
                "security: SecKeychainItemCreateFromContent (<default>): The specified item already exists in the keychain.",
            ))
        }
        None => keychain.items.push(item),
    }

    Ok(CommandOutput::default())
}

fn attribute_dump(path: &str, item: &StoredItem) -> String {
    let blob = |value: &str| {
        if value.is_empty() {
            "<NULL>".to_string()
        } else {
            format!("\"{value}\"")
        }
    };

    let mut out = String::new();
    let _ = writeln!(out, "keychain: \"{path}\"");
    let _ = writeln!(out, "version: 512");
    let _ = writeln!(out, "class: \"genp\"");
    let _ = writeln!(out, "attributes:");
    let _ = writeln!(out, "    0x00000007 <blob>={}", blob(&item.label));
    let _ = writeln!(out, "    0x00000008 <blob>=<NULL>");
    let _ = writeln!(out, "    \"acct\"<blob>={}", blob(&item.account));
    let _ = writeln!(out, "    \"cdat\"<timedate>=0x32303236313031393132303030305A00  \"20261019120000Z\\000\"");
    let _ = writeln!(out, "    \"crtr\"<uint32>=<NULL>");
    let _ = writeln!(out, "    \"desc\"<blob>={}", blob(&item.description));
    let _ = writeln!(out, "    \"icmt\"<blob>=<NULL>");
    let _ = writeln!(out, "    \"svce\"<blob>={}", blob(&item.service));
    let _ = writeln!(out, "    \"type\"<uint32>={}", blob(&item.type_code));
    out
}

/// Printable secrets are shown quoted, anything else as hex
fn password_line(secret: &[u8]) -> String {
    let printable = secret
        .iter()
        .all(|b| (0x20..0x7f).contains(b) && *b != b'"' && *b != b'\\');

    if printable && !secret.is_empty() {
        format!("password: \"{}\"\n", String::from_utf8_lossy(secret))
    } else {
        format!("password: 0x{}\n", hex::encode_upper(secret))
    }
}
