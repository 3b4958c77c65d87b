//! Parsing and encoding of `security` generic-password data
//!
//! All parsers here are total: missing attributes degrade to empty strings and
//! undecodable secret payloads are returned as-is. Error signaling belongs to
//! the invocation layer.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KeychainError, Result};

/// Attribute marker under which the utility prints an entry's label
const LABEL_MARKER: &str = "0x00000007";

/// Property-list key holding the text of a secure note
const NOTE_KEY: &str = "NOTE";

/// Leading bytes of a binary property list
const BINARY_PLIST_MAGIC: &[u8] = b"bplist00";

static HEX_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)password: 0x([a-f0-9]+)").expect("valid password regex"));

static QUOTED_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)password: "(.*)"$"#).expect("valid password regex"));

static ATTRIBUTES: LazyLock<[(Attribute, Regex); 5]> = LazyLock::new(|| {
    Attribute::ALL.map(|attribute| {
        let pattern = format!(
            r#"{}[^=\n]*=(?:<NULL>|[^"\n]*"(.*)")"#,
            regex::escape(attribute.marker())
        );
        (attribute, Regex::new(&pattern).expect("valid attribute regex"))
    })
});

/// Kind of keychain entry this crate knows how to write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryType {
    #[default]
    Note,
}

impl EntryType {
    pub const ALL: [EntryType; 1] = [EntryType::Note];

    /// Symbolic name accepted in write options
    pub fn name(&self) -> &'static str {
        match self {
            EntryType::Note => "note",
        }
    }

    /// Description stored in the `desc` attribute
    pub fn kind(&self) -> &'static str {
        match self {
            EntryType::Note => "secure note",
        }
    }

    /// Four-character code stored in the `type` attribute
    pub fn code(&self) -> &'static str {
        match self {
            EntryType::Note => "note",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntryType {
    type Err = KeychainError;

    fn from_str(s: &str) -> Result<Self> {
        EntryType::ALL
            .into_iter()
            .find(|entry_type| entry_type.name() == s)
            .ok_or_else(|| KeychainError::UnknownEntryType {
                name: s.to_string(),
                expected: EntryType::ALL
                    .iter()
                    .map(EntryType::name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Overrides applied on top of the defaults when writing an entry
///
/// Unset fields fall back to: type `note`, empty account name, service name
/// equal to the key, label equal to the service name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriteOptions {
    /// Symbolic entry type name (see [`EntryType`])
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_type(mut self, name: impl Into<String>) -> Self {
        self.entry_type = Some(name.into());
        self
    }

    pub fn account_name(mut self, account_name: impl Into<String>) -> Self {
        self.account_name = Some(account_name.into());
        self
    }

    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Layer `overrides` on top of `self`, field by field
    pub fn merge(&self, overrides: &WriteOptions) -> WriteOptions {
        WriteOptions {
            entry_type: overrides.entry_type.clone().or_else(|| self.entry_type.clone()),
            account_name: overrides
                .account_name
                .clone()
                .or_else(|| self.account_name.clone()),
            service_name: overrides
                .service_name
                .clone()
                .or_else(|| self.service_name.clone()),
            label: overrides.label.clone().or_else(|| self.label.clone()),
        }
    }

    /// Resolve the entry type, defaulting to [`EntryType::Note`]
    pub fn resolved_type(&self) -> Result<EntryType> {
        match &self.entry_type {
            Some(name) => name.parse(),
            None => Ok(EntryType::default()),
        }
    }
}

/// Attributes recovered from a `find-generic-password` dump
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub account_name: String,
    pub kind: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub label: String,
    pub service_name: String,
}

#[derive(Debug, Clone, Copy)]
enum Attribute {
    Account,
    Description,
    Type,
    Label,
    Service,
}

impl Attribute {
    const ALL: [Attribute; 5] = [
        Attribute::Account,
        Attribute::Description,
        Attribute::Type,
        Attribute::Label,
        Attribute::Service,
    ];

    fn marker(&self) -> &'static str {
        match self {
            Attribute::Account => "acct",
            Attribute::Description => "desc",
            Attribute::Type => "type",
            Attribute::Label => LABEL_MARKER,
            Attribute::Service => "svce",
        }
    }
}

/// Extract entry attributes from the utility's attribute dump
///
/// Each attribute line looks like `"svce"<blob>="value"` or
/// `"acct"<blob>=<NULL>`. Null and missing attributes both become `""`.
pub fn parse_info(text: &str) -> EntryInfo {
    let mut info = EntryInfo::default();

    for (attribute, regex) in ATTRIBUTES.iter() {
        let value = regex
            .captures(text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        match attribute {
            Attribute::Account => info.account_name = value,
            Attribute::Description => info.kind = value,
            Attribute::Type => info.entry_type = value,
            Attribute::Label => info.label = value,
            Attribute::Service => info.service_name = value,
        }
    }

    info
}

/// Extract the raw secret bytes from the `password:` line
///
/// The utility prints non-printable secrets as `password: 0x<hex>` and
/// printable ones as `password: "<text>"`. Anything else yields no bytes.
pub fn parse_secret(text: &str) -> Vec<u8> {
    if let Some(captures) = HEX_PASSWORD.captures(text) {
        let mut digits = captures[1].to_string();
        // Pad a dangling nibble, matching how the utility would pack it.
        if digits.len() % 2 == 1 {
            digits.push('0');
        }
        return hex::decode(digits).unwrap_or_default();
    }

    QUOTED_PASSWORD
        .captures(text)
        .map(|captures| captures[1].as_bytes().to_vec())
        .unwrap_or_default()
}

/// Unwrap a secure note's property-list envelope, if there is one
///
/// Returns the `NOTE` string when `bytes` is an XML or binary property list
/// with that key, and `bytes` unchanged otherwise. Text in the OpenStep
/// format is not a note envelope and is left alone.
pub fn decode_secret_payload(bytes: Vec<u8>) -> Vec<u8> {
    let parsed = if bytes.starts_with(BINARY_PLIST_MAGIC) {
        plist::Value::from_reader(Cursor::new(bytes.as_slice()))
    } else {
        plist::Value::from_reader_xml(bytes.as_slice())
    };

    let note = parsed
        .ok()
        .and_then(|value| {
            value
                .into_dictionary()
                .and_then(|mut dict| dict.remove(NOTE_KEY))
        })
        .and_then(|note| note.into_string());

    match note {
        Some(text) => text.into_bytes(),
        None => bytes,
    }
}

/// Build the `add-generic-password` flags for an upsert of `data` under `key`
///
/// The access list is deliberately empty so that no application is granted
/// standing access to the entry.
pub fn encode_write_args(key: &str, data: &str, options: &WriteOptions) -> Result<Vec<String>> {
    let entry_type = options.resolved_type()?;
    let account_name = options.account_name.clone().unwrap_or_default();
    let service_name = options
        .service_name
        .clone()
        .unwrap_or_else(|| key.to_string());
    let label = options
        .label
        .clone()
        .unwrap_or_else(|| service_name.clone());

    Ok(vec![
        "-a".to_string(),
        account_name,
        "-s".to_string(),
        service_name,
        "-l".to_string(),
        label,
        "-D".to_string(),
        entry_type.kind().to_string(),
        "-C".to_string(),
        entry_type.code().to_string(),
        "-T".to_string(),
        String::new(),
        "-U".to_string(),
        "-w".to_string(),
        data.to_string(),
    ])
}
