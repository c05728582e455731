//! Adapters for the third-party auth files mirrored from the canonical store.
//!
//! Every peer is a JSON object holding one credential per provider at a fixed
//! key. Writes are load-modify-save so sibling entries survive untouched.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::account::{Account, Provider, TokenSet};
use crate::atomic::write_file_atomic;
use crate::error::{AuthError, AuthResult};
use crate::json::{encode_pretty, utc_now_iso, value_as_string};
use crate::matcher::{tokens_match, MatchInput};
use crate::normalize::{
    clear_identity, read_tokens, write_tokens, FieldAliases, CLAUDE_CLI_FIELDS, CODEX_CLI_FIELDS,
    PROVIDER_MAP_FIELDS,
};
use crate::paths::StorePaths;

/// Root key in the native OpenAI-family file naming the label last switched to.
pub const CODEX_LABEL_MARKER: &str = "authsync_label";
const CODEX_LAST_REFRESH: &str = "last_refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLayout {
    /// `{ "tokens": {...}, "last_refresh": ..., "authsync_label": ... }`
    CodexCli,
    /// `{ "claudeAiOauth": {...} }`
    ClaudeCli,
    /// `{ "<key>": { "type": "oauth", ... } }`, shared by several providers.
    ProviderMap { key: &'static str },
}

impl PeerLayout {
    fn entry_key(self) -> &'static str {
        match self {
            Self::CodexCli => "tokens",
            Self::ClaudeCli => "claudeAiOauth",
            Self::ProviderMap { key } => key,
        }
    }

    fn fields(self) -> &'static FieldAliases {
        match self {
            Self::CodexCli => &CODEX_CLI_FIELDS,
            Self::ClaudeCli => &CLAUDE_CLI_FIELDS,
            Self::ProviderMap { .. } => &PROVIDER_MAP_FIELDS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerWriteOutcome {
    pub name: String,
    pub path: PathBuf,
    pub updated: bool,
    pub unchanged: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStore {
    pub name: &'static str,
    pub provider: Provider,
    pub path: PathBuf,
    pub layout: PeerLayout,
}

impl PeerStore {
    pub fn new(name: &'static str, provider: Provider, path: PathBuf, layout: PeerLayout) -> Self {
        Self {
            name,
            provider,
            path,
            layout,
        }
    }

    fn load_root(&self) -> AuthResult<Option<Map<String, Value>>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::io(&self.path, "read", err)),
        };
        match serde_json::from_slice::<Value>(&data) {
            Ok(Value::Object(root)) => Ok(Some(root)),
            Ok(_) => Err(AuthError::parse(&self.path, "root is not an object")),
            Err(err) => Err(AuthError::parse(&self.path, err)),
        }
    }

    fn entry_tokens(&self, root: &Map<String, Value>) -> Option<TokenSet> {
        let entry = root.get(self.layout.entry_key())?.as_object()?;
        let mut tokens = read_tokens(entry, self.layout.fields());
        if self.provider == Provider::OpenAi {
            tokens.fill_openai_claims();
        }
        tokens.has_any_token().then_some(tokens)
    }

    pub fn read_tokens(&self) -> AuthResult<Option<TokenSet>> {
        Ok(self
            .load_root()?
            .and_then(|root| self.entry_tokens(&root)))
    }

    pub fn read_label_marker(&self) -> AuthResult<Option<String>> {
        if self.layout != PeerLayout::CodexCli {
            return Ok(None);
        }
        Ok(self
            .load_root()?
            .and_then(|root| value_as_string(root.get(CODEX_LABEL_MARKER))))
    }

    /// Removes the tracked-label marker; returns whether the file changed.
    pub fn clear_label_marker(&self) -> AuthResult<bool> {
        if self.layout != PeerLayout::CodexCli {
            return Ok(false);
        }
        let Some(mut root) = self.load_root()? else {
            return Ok(false);
        };
        if root.remove(CODEX_LABEL_MARKER).is_none() {
            return Ok(false);
        }
        self.save_root(root)?;
        Ok(true)
    }

    fn save_root(&self, root: Map<String, Value>) -> AuthResult<PathBuf> {
        let data = encode_pretty(&Value::Object(root)).map_err(|err| AuthError::parse(&self.path, err))?;
        write_file_atomic(&self.path, &data)
    }

    /// An entry that did not hold `previous` (or the account's own tokens) loses
    /// its identity fields before the new ones land.
    fn render(
        &self,
        root: &Map<String, Value>,
        account: &Account,
        previous: Option<&TokenSet>,
        now_ms: i64,
    ) -> Map<String, Value> {
        let key = self.layout.entry_key();
        let fields = self.layout.fields();
        let mut next = root.clone();
        let old_entry = root.get(key).and_then(Value::as_object).cloned();
        let mut entry = old_entry.clone().unwrap_or_default();

        let stored = read_tokens(&entry, fields);
        let holds = |candidate: &TokenSet| {
            tokens_match(MatchInput {
                stored_access: stored.access.as_deref(),
                stored_refresh: stored.refresh.as_deref(),
                previous_access: candidate.access.as_deref(),
                previous_refresh: candidate.refresh.as_deref(),
                ..MatchInput::default()
            })
        };
        let belongs = previous.is_some_and(holds) || holds(&account.tokens);
        if !belongs {
            clear_identity(&mut entry, fields);
        }

        if let PeerLayout::ProviderMap { .. } = self.layout {
            entry
                .entry("type".to_string())
                .or_insert_with(|| Value::String("oauth".to_string()));
        }
        write_tokens(&mut entry, fields, &account.tokens, now_ms);
        let entry_changed = old_entry.as_ref() != Some(&entry);
        next.insert(key.to_string(), Value::Object(entry));

        if self.layout == PeerLayout::CodexCli {
            next.insert(
                CODEX_LABEL_MARKER.to_string(),
                Value::String(account.label.clone()),
            );
            if entry_changed || !next.contains_key(CODEX_LAST_REFRESH) {
                next.insert(CODEX_LAST_REFRESH.to_string(), Value::String(utc_now_iso()));
            }
        }
        next
    }

    /// Forward-syncs `account` into this peer. Never creates a missing file.
    pub fn write_tokens(
        &self,
        account: &Account,
        previous: Option<&TokenSet>,
        now_ms: i64,
    ) -> PeerWriteOutcome {
        self.push(account, previous, now_ms, true)
    }

    pub fn preview_write(
        &self,
        account: &Account,
        previous: Option<&TokenSet>,
        now_ms: i64,
    ) -> PeerWriteOutcome {
        self.push(account, previous, now_ms, false)
    }

    fn push(
        &self,
        account: &Account,
        previous: Option<&TokenSet>,
        now_ms: i64,
        commit: bool,
    ) -> PeerWriteOutcome {
        let mut outcome = PeerWriteOutcome {
            name: self.name.to_string(),
            path: self.path.clone(),
            ..PeerWriteOutcome::default()
        };
        let root = match self.load_root() {
            Ok(Some(root)) => root,
            Ok(None) => {
                outcome.skipped = true;
                return outcome;
            }
            Err(err) => {
                outcome.error = Some(err.to_string());
                return outcome;
            }
        };

        let next = self.render(&root, account, previous, now_ms);
        if next == root {
            outcome.unchanged = true;
            return outcome;
        }
        if commit {
            if let Err(err) = self.save_root(next) {
                outcome.error = Some(err.to_string());
                return outcome;
            }
        }
        outcome.updated = true;
        outcome
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub name: String,
    pub path: PathBuf,
    pub tokens: TokenSet,
}

/// Reads every peer that holds a credential. Unreadable peers become warnings.
pub fn snapshot_peers(stores: &[PeerStore]) -> (Vec<PeerSnapshot>, Vec<String>) {
    let mut snapshots = Vec::new();
    let mut warnings = Vec::new();
    for store in stores {
        match store.read_tokens() {
            Ok(Some(tokens)) => snapshots.push(PeerSnapshot {
                name: store.name.to_string(),
                path: store.path.clone(),
                tokens,
            }),
            Ok(None) => {}
            Err(err) => warnings.push(format!("{}: {}", store.name, err)),
        }
    }
    (snapshots, warnings)
}

/// The provider's own CLI store, used for imports and divergence checks.
pub fn native_store(paths: &StorePaths, provider: Provider) -> PeerStore {
    match provider {
        Provider::OpenAi => PeerStore::new(
            "codex-cli",
            provider,
            paths.codex_auth.clone(),
            PeerLayout::CodexCli,
        ),
        Provider::Claude => PeerStore::new(
            "claude-cli",
            provider,
            paths.claude_credentials.clone(),
            PeerLayout::ClaudeCli,
        ),
    }
}

pub fn peer_stores(paths: &StorePaths, provider: Provider) -> Vec<PeerStore> {
    let (opencode_key, pi_key) = match provider {
        Provider::OpenAi => ("openai", "openai-codex"),
        Provider::Claude => ("anthropic", "anthropic"),
    };
    vec![
        native_store(paths, provider),
        PeerStore::new(
            "opencode",
            provider,
            paths.opencode_auth.clone(),
            PeerLayout::ProviderMap { key: opencode_key },
        ),
        PeerStore::new(
            "pi-agent",
            provider,
            paths.pi_auth.clone(),
            PeerLayout::ProviderMap { key: pi_key },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::test_support::openai_jwt;
    use crate::paths::Config;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_json(path: &Path, value: Value) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, serde_json::to_vec_pretty(&value).expect("json")).expect("write");
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_slice(&fs::read(path).expect("read")).expect("json")
    }

    fn paths_in(temp: &TempDir) -> StorePaths {
        Config::with_vars(temp.path().to_path_buf(), &[]).paths()
    }

    fn account(label: &str, provider: Provider, access: &str, refresh: &str, expires: i64) -> Account {
        Account::new(
            label,
            provider,
            TokenSet {
                access: Some(access.to_string()),
                refresh: Some(refresh.to_string()),
                expires_ms: Some(expires),
                ..TokenSet::default()
            },
        )
    }

    #[test]
    fn codex_cli_reads_seconds_and_jwt_identity() {
        let temp = TempDir::new().expect("temp dir");
        let paths = paths_in(&temp);
        let access = openai_jwt("acct-x", 1_900_000_000);
        write_json(
            &paths.codex_auth,
            json!({
                "OPENAI_API_KEY": null,
                "tokens": { "access_token": access, "refresh_token": "r", "id_token": "i" }
            }),
        );
        let store = native_store(&paths, Provider::OpenAi);
        let tokens = store.read_tokens().expect("read").expect("tokens");
        assert_eq!(tokens.refresh.as_deref(), Some("r"));
        assert_eq!(tokens.account_id.as_deref(), Some("acct-x"));
        assert_eq!(tokens.expires_ms, Some(1_900_000_000_000));
    }

    #[test]
    fn codex_cli_push_keeps_siblings_and_sets_marker() {
        let temp = TempDir::new().expect("temp dir");
        let paths = paths_in(&temp);
        write_json(
            &paths.codex_auth,
            json!({
                "OPENAI_API_KEY": "sk-keep",
                "tokens": { "access_token": "old", "refresh_token": "r", "account_id": "acct-old" }
            }),
        );
        let store = native_store(&paths, Provider::OpenAi);
        let mut next = account("work", Provider::OpenAi, "new", "r", 1_700_000_000_500);
        next.tokens.account_id = Some("acct-new".to_string());

        let outcome = store.write_tokens(&next, None, 0);
        assert!(outcome.updated, "{:?}", outcome);
        let root = read_json(&paths.codex_auth);
        assert_eq!(root["OPENAI_API_KEY"], json!("sk-keep"));
        assert_eq!(root["tokens"]["access_token"], json!("new"));
        assert_eq!(root["tokens"]["expires_at"], json!(1_700_000_000));
        assert_eq!(root["tokens"]["account_id"], json!("acct-new"));
        assert_eq!(root[CODEX_LABEL_MARKER], json!("work"));
        assert!(root[CODEX_LAST_REFRESH].is_string());
        assert_eq!(store.read_label_marker().expect("marker").as_deref(), Some("work"));

        let mode = fs::metadata(&paths.codex_auth).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let again = store.write_tokens(&next, None, 0);
        assert!(again.unchanged && !again.updated);
    }

    #[test]
    fn missing_peer_is_skipped_and_not_created() {
        let temp = TempDir::new().expect("temp dir");
        let paths = paths_in(&temp);
        for store in peer_stores(&paths, Provider::Claude) {
            let outcome = store.write_tokens(&account("a", Provider::Claude, "x", "y", 1), None, 0);
            assert!(outcome.skipped);
            assert!(!store.path.exists());
            assert_eq!(store.read_tokens().expect("read"), None);
        }
    }

    #[test]
    fn corrupt_peer_reports_error_and_is_untouched() {
        let temp = TempDir::new().expect("temp dir");
        let paths = paths_in(&temp);
        fs::create_dir_all(paths.claude_credentials.parent().expect("parent")).expect("mkdir");
        fs::write(&paths.claude_credentials, b"{oops").expect("seed");
        let store = native_store(&paths, Provider::Claude);
        assert!(matches!(store.read_tokens(), Err(AuthError::Parse { .. })));
        let outcome = store.write_tokens(&account("a", Provider::Claude, "x", "y", 1), None, 0);
        assert!(outcome.error.is_some());
        assert_eq!(fs::read(&paths.claude_credentials).expect("read"), b"{oops");
    }

    #[test]
    fn shared_provider_map_keeps_other_provider_entry() {
        let temp = TempDir::new().expect("temp dir");
        let paths = paths_in(&temp);
        write_json(
            &paths.opencode_auth,
            json!({
                "openai": { "type": "oauth", "access": "oa", "refresh": "or", "expires": 1 },
                "github": { "type": "api", "key": "gh" }
            }),
        );
        let stores = peer_stores(&paths, Provider::Claude);
        let opencode = stores.iter().find(|store| store.name == "opencode").expect("opencode");
        assert_eq!(opencode.read_tokens().expect("read"), None);

        let outcome = opencode.write_tokens(&account("c", Provider::Claude, "ca", "cr", 9), None, 0);
        assert!(outcome.updated);
        let root = read_json(&paths.opencode_auth);
        assert_eq!(root["openai"]["access"], json!("oa"));
        assert_eq!(root["github"]["key"], json!("gh"));
        assert_eq!(
            root["anthropic"],
            json!({ "type": "oauth", "access": "ca", "refresh": "cr", "expires": 9 })
        );
    }

    #[test]
    fn foreign_entry_loses_stale_identity() {
        let temp = TempDir::new().expect("temp dir");
        let paths = paths_in(&temp);
        write_json(
            &paths.pi_auth,
            json!({
                "openai-codex": { "type": "oauth", "access": "a", "refresh": "r-other", "expires": 1, "accountId": "acct-other" }
            }),
        );
        let stores = peer_stores(&paths, Provider::OpenAi);
        let pi = stores.iter().find(|store| store.name == "pi-agent").expect("pi");
        let outcome = pi.write_tokens(&account("w", Provider::OpenAi, "a2", "r2", 2), None, 0);
        assert!(outcome.updated);
        let root = read_json(&paths.pi_auth);
        assert!(root["openai-codex"].get("accountId").is_none());

        write_json(
            &paths.pi_auth,
            json!({
                "openai-codex": { "type": "oauth", "access": "a", "refresh": "r2", "expires": 1, "accountId": "acct-same" }
            }),
        );
        pi.write_tokens(&account("w", Provider::OpenAi, "a3", "r2", 3), None, 0);
        let root = read_json(&paths.pi_auth);
        assert_eq!(root["openai-codex"]["accountId"], json!("acct-same"));
    }

    #[test]
    fn preview_reports_update_without_writing() {
        let temp = TempDir::new().expect("temp dir");
        let paths = paths_in(&temp);
        write_json(
            &paths.claude_credentials,
            json!({ "claudeAiOauth": { "accessToken": "a", "refreshToken": "r", "expiresAt": 1 } }),
        );
        let store = native_store(&paths, Provider::Claude);
        let before = fs::read(&paths.claude_credentials).expect("read");
        let outcome = store.preview_write(&account("c", Provider::Claude, "b", "r", 2), None, 0);
        assert!(outcome.updated);
        assert_eq!(fs::read(&paths.claude_credentials).expect("read"), before);
    }

    #[test]
    fn snapshot_collects_readable_peers_and_warns_on_corrupt() {
        let temp = TempDir::new().expect("temp dir");
        let paths = paths_in(&temp);
        write_json(
            &paths.opencode_auth,
            json!({ "anthropic": { "type": "oauth", "access": "a", "refresh": "r", "expires": 5 } }),
        );
        fs::create_dir_all(paths.pi_auth.parent().expect("parent")).expect("mkdir");
        fs::write(&paths.pi_auth, b"[]").expect("seed");

        let (snapshots, warnings) = snapshot_peers(&peer_stores(&paths, Provider::Claude));
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "opencode");
        assert_eq!(snapshots[0].tokens.expires_ms, Some(5));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("pi-agent: "));
    }

    #[test]
    fn clear_label_marker_only_touches_codex_marker() {
        let temp = TempDir::new().expect("temp dir");
        let paths = paths_in(&temp);
        write_json(
            &paths.codex_auth,
            json!({ "tokens": { "access_token": "a" }, "authsync_label": "old" }),
        );
        let store = native_store(&paths, Provider::OpenAi);
        assert!(store.clear_label_marker().expect("clear"));
        assert!(!store.clear_label_marker().expect("clear again"));
        let root = read_json(&paths.codex_auth);
        assert_eq!(root, json!({ "tokens": { "access_token": "a" } }));
    }
}
