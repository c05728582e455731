//! The canonical multi-account file.
//!
//! Object root: `{ schemaVersion, ...preserved, activeLabel, accounts }`.
//! A bare array of accounts is accepted on read and rewritten as an object.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::account::{Account, AccountSource, Provider};
use crate::atomic::write_file_atomic;
use crate::error::{AuthError, AuthResult};
use crate::json::{encode_pretty, value_as_string};
use crate::normalize::{pick_key, read_tokens, write_tokens_exact, CANONICAL_FIELDS};

pub const SCHEMA_VERSION: u64 = 1;

const KEY_SCHEMA_VERSION: &str = "schemaVersion";
const KEY_ACTIVE_LABEL: &str = "activeLabel";
const KEY_ACCOUNTS: &str = "accounts";
const LABEL_ALIASES: &[&str] = &["label", "name"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RootType {
    Missing,
    Array,
    Object,
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub path: PathBuf,
    pub provider: Provider,
    pub root_type: RootType,
    /// Root keys other than the three the codec owns, in file order.
    pub root_fields: Map<String, Value>,
    pub schema_version: Option<u64>,
    pub active_label: Option<String>,
    pub accounts: Vec<Account>,
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerOverrides {
    /// `Some(None)` clears the active label.
    pub active_label: Option<Option<String>>,
    pub schema_version: Option<u64>,
}

impl Container {
    pub fn missing(path: &Path, provider: Provider) -> Self {
        Self {
            path: path.to_path_buf(),
            provider,
            root_type: RootType::Missing,
            root_fields: Map::new(),
            schema_version: None,
            active_label: None,
            accounts: Vec::new(),
            invalid_reason: None,
        }
    }

    fn invalid(path: &Path, provider: Provider, reason: impl Into<String>) -> Self {
        Self {
            root_type: RootType::Invalid,
            invalid_reason: Some(reason.into()),
            ..Self::missing(path, provider)
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.root_type == RootType::Invalid
    }

    pub fn ensure_valid(&self) -> AuthResult<()> {
        if self.is_invalid() {
            return Err(AuthError::parse(
                &self.path,
                self.invalid_reason
                    .clone()
                    .unwrap_or_else(|| "unrecognized root".to_string()),
            ));
        }
        Ok(())
    }

    pub fn find(&self, label: &str) -> Option<&Account> {
        self.accounts.iter().find(|account| account.label == label)
    }

    pub fn active_account(&self) -> Option<&Account> {
        self.active_label.as_deref().and_then(|label| self.find(label))
    }
}

pub fn read_container(path: &Path, provider: Provider) -> AuthResult<Container> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Container::missing(path, provider))
        }
        Err(err) => return Err(AuthError::io(path, "read", err)),
    };
    Ok(decode_container(path, provider, &data))
}

pub fn decode_container(path: &Path, provider: Provider, data: &[u8]) -> Container {
    let root = match serde_json::from_slice::<Value>(data) {
        Ok(root) => root,
        Err(err) => return Container::invalid(path, provider, format!("invalid JSON: {}", err)),
    };

    let (root_type, root_fields, schema_version, active_label, entries) = match root {
        Value::Array(entries) => (RootType::Array, Map::new(), None, None, entries),
        Value::Object(mut object) => {
            let entries = match object.remove(KEY_ACCOUNTS) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(entries)) => entries,
                Some(_) => {
                    return Container::invalid(path, provider, "accounts is not an array");
                }
            };
            let schema_version = object.remove(KEY_SCHEMA_VERSION).and_then(|value| value.as_u64());
            let active_label = value_as_string(object.remove(KEY_ACTIVE_LABEL).as_ref());
            (RootType::Object, object, schema_version, active_label, entries)
        }
        _ => return Container::invalid(path, provider, "root is neither an object nor an array"),
    };

    let mut accounts = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let Value::Object(raw) = entry else {
            return Container::invalid(path, provider, format!("accounts[{}] is not an object", index));
        };
        let Some(label) = LABEL_ALIASES
            .iter()
            .find_map(|key| value_as_string(raw.get(*key)))
        else {
            return Container::invalid(path, provider, format!("accounts[{}] has no label", index));
        };
        accounts.push(Account {
            label,
            provider,
            tokens: read_tokens(&raw, &CANONICAL_FIELDS),
            source: AccountSource::Store,
            raw,
        });
    }

    Container {
        path: path.to_path_buf(),
        provider,
        root_type,
        root_fields,
        schema_version,
        active_label,
        accounts,
        invalid_reason: None,
    }
}

fn encode_account(account: &Account) -> Value {
    let mut entry = account.raw.clone();
    if let Some(key) = pick_key(&entry, LABEL_ALIASES) {
        entry.insert(key.to_string(), Value::String(account.label.clone()));
    }
    write_tokens_exact(&mut entry, &CANONICAL_FIELDS, &account.tokens, 0);
    Value::Object(entry)
}

/// Env-sourced accounts are never emitted. A dangling or empty active label
/// is written as `null`.
pub fn encode_container(
    previous: &Container,
    accounts: &[Account],
    overrides: &ContainerOverrides,
) -> AuthResult<Vec<u8>> {
    previous.ensure_valid()?;

    let persisted = accounts
        .iter()
        .filter(|account| !account.is_env())
        .collect::<Vec<_>>();
    let mut seen = HashSet::new();
    for account in &persisted {
        if !seen.insert(account.label.as_str()) {
            return Err(AuthError::invalid_label(&account.label, "duplicate label"));
        }
    }

    let schema_version = previous
        .schema_version
        .unwrap_or(0)
        .max(overrides.schema_version.unwrap_or(0))
        .max(SCHEMA_VERSION);
    let active_label = overrides
        .active_label
        .clone()
        .unwrap_or_else(|| previous.active_label.clone())
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .filter(|label| seen.contains(label.as_str()));

    let mut root = Map::new();
    root.insert(KEY_SCHEMA_VERSION.to_string(), Value::Number(schema_version.into()));
    for (key, value) in &previous.root_fields {
        root.insert(key.clone(), value.clone());
    }
    root.insert(
        KEY_ACTIVE_LABEL.to_string(),
        active_label.map(Value::String).unwrap_or(Value::Null),
    );
    root.insert(
        KEY_ACCOUNTS.to_string(),
        Value::Array(persisted.into_iter().map(encode_account).collect()),
    );

    encode_pretty(&Value::Object(root)).map_err(|err| AuthError::parse(&previous.path, err))
}

#[derive(Debug, Clone)]
pub struct CanonicalStore {
    pub provider: Provider,
    pub path: PathBuf,
}

impl CanonicalStore {
    pub fn new(provider: Provider, path: PathBuf) -> Self {
        Self { provider, path }
    }

    pub fn load(&self) -> AuthResult<Container> {
        read_container(&self.path, self.provider)
    }

    pub fn load_for_write(&self) -> AuthResult<Container> {
        let container = self.load()?;
        container.ensure_valid()?;
        Ok(container)
    }

    /// Writes `accounts` over `previous` and returns the container as now on disk.
    pub fn save(
        &self,
        previous: &Container,
        accounts: &[Account],
        overrides: &ContainerOverrides,
    ) -> AuthResult<Container> {
        let data = encode_container(previous, accounts, overrides)?;
        write_file_atomic(&self.path, &data)?;
        Ok(decode_container(&self.path, self.provider, &data))
    }
}
