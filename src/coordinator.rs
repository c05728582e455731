//! Orchestrates pull, refresh and push for one provider's active account,
//! plus the account-management commands built on the same stores.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::account::{validate_label, Account, Provider, TokenSet};
use crate::container::{CanonicalStore, Container, ContainerOverrides};
use crate::divergence::{
    account_id_of, detect_claude, detect_openai, native_account_id, DivergenceReport, MigrationMode,
};
use crate::env_accounts::{load_env_accounts, merge_accounts};
use crate::error::{AuthError, AuthResult};
use crate::freshness::{expires_later, resolve_fresher};
use crate::json::{expiry_after_seconds, now_ms, value_as_f64};
use crate::lock::with_refresh_lock;
use crate::log::SyncLogWriter;
use crate::matcher::{tokens_match, MatchInput};
use crate::normalize::{
    read_tokens, FieldAliases, CANONICAL_FIELDS, CLAUDE_CLI_FIELDS, CODEX_CLI_FIELDS,
};
use crate::paths::{Config, StorePaths};
use crate::recovery::{describe_stores, resolve_recovery, RecoveryRefusal};
use crate::refresh::{apply_refresh, default_refresh_client, RefreshClient};
use crate::stores::{native_store, peer_stores, snapshot_peers, PeerSnapshot, PeerStore};
use crate::usage::{default_usage_client, UsageClient, UsageRequest, UsageSnapshot};

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub assume_peer_fresher_without_expiry: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            assume_peer_fresher_without_expiry: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub provider: Provider,
    pub active_label: String,
    pub dry_run: bool,
    pub refreshed: bool,
    /// Set on dry runs when a real run would have refreshed.
    pub refresh_due: bool,
    pub recovered_from: Option<String>,
    pub pulled_paths: Vec<PathBuf>,
    pub updated_paths: Vec<PathBuf>,
    pub unchanged_paths: Vec<PathBuf>,
    pub skipped_paths: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl SyncReport {
    fn new(provider: Provider, label: &str, dry_run: bool) -> Self {
        Self {
            provider,
            active_label: label.to_string(),
            dry_run,
            refreshed: false,
            refresh_due: false,
            recovered_from: None,
            pulled_paths: Vec::new(),
            updated_paths: Vec::new(),
            unchanged_paths: Vec::new(),
            skipped_paths: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveReport {
    pub provider: Provider,
    pub label: String,
    pub dry_run: bool,
    pub active_cleared: bool,
    pub marker_cleared: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    NativeStore,
    Json(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReport {
    pub provider: Provider,
    pub label: String,
    pub created: bool,
    pub active: bool,
    pub source: String,
    pub account_id: Option<String>,
    pub expires_ms: Option<i64>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub label: String,
    pub source: String,
    pub active: bool,
    pub account_id: Option<String>,
    pub expires_ms: Option<i64>,
    pub expiry_state: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReport {
    pub provider: Provider,
    pub active_label: Option<String>,
    pub accounts: Vec<AccountSummary>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(flatten)]
    pub divergence: DivergenceReport,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaReport {
    pub provider: Provider,
    pub label: String,
    pub usage: UsageSnapshot,
}

/// Takes `incoming` wholesale; identity and scopes the incoming copy lacks are
/// kept only when both copies share a refresh token.
fn adopt_tokens(current: &TokenSet, incoming: &TokenSet) -> TokenSet {
    let mut next = incoming.clone();
    let same_credential = current.refresh.is_some() && current.refresh == incoming.refresh;
    if same_credential {
        if next.account_id.is_none() {
            next.account_id = current.account_id.clone();
        }
        if next.id_token.is_none() {
            next.id_token = current.id_token.clone();
        }
        if next.scopes.is_none() {
            next.scopes = current.scopes.clone();
        }
    }
    next
}

fn expiry_state(tokens: &TokenSet, now_ms: i64, buffer_ms: i64) -> &'static str {
    match tokens.expires_ms {
        None => "unknown",
        Some(expires_ms) if expires_ms <= now_ms => "expired",
        Some(_) if tokens.is_expiring(now_ms, buffer_ms) => "expiring",
        Some(_) => "valid",
    }
}

/// Reads a pasted credential: a native CLI file, a token endpoint response,
/// or a flat token object.
pub fn parse_pasted_tokens(provider: Provider, text: &str) -> AuthResult<TokenSet> {
    let origin = Path::new("<stdin>");
    let root = match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(root)) => root,
        Ok(_) => return Err(AuthError::parse(origin, "expected a JSON object")),
        Err(err) => return Err(AuthError::parse(origin, err)),
    };

    let nested = |key: &str| root.get(key).and_then(Value::as_object);
    let candidates: [(Option<&Map<String, Value>>, &FieldAliases); 3] = [
        (nested("tokens"), &CODEX_CLI_FIELDS),
        (nested("claudeAiOauth"), &CLAUDE_CLI_FIELDS),
        (Some(&root), &CANONICAL_FIELDS),
    ];
    let mut tokens = candidates
        .iter()
        .filter_map(|(entry, fields)| entry.map(|entry| read_tokens(entry, fields)))
        .find(TokenSet::has_any_token)
        .ok_or_else(|| AuthError::parse(origin, "no access or refresh token found"))?;

    if tokens.expires_ms.is_none() {
        tokens.expires_ms = root
            .get("expires_in")
            .and_then(value_as_f64)
            .and_then(|seconds| expiry_after_seconds(now_ms(), seconds));
    }
    if provider == Provider::OpenAi {
        tokens.fill_openai_claims();
    }
    Ok(tokens)
}

pub struct Coordinator {
    config: Config,
    paths: StorePaths,
    refresh_client: RefreshClient,
    usage_client: UsageClient,
    log: SyncLogWriter,
    migration_mode: MigrationMode,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        let refresh_client = default_refresh_client(&config);
        Self::with_clients(config, refresh_client, default_usage_client())
    }

    pub fn with_clients(config: Config, refresh_client: RefreshClient, usage_client: UsageClient) -> Self {
        let paths = config.paths();
        let log = SyncLogWriter::new(paths.log_dir());
        Self {
            config,
            paths,
            refresh_client,
            usage_client,
            log,
            migration_mode: MigrationMode::Allow,
        }
    }

    pub fn with_migration_mode(mut self, migration_mode: MigrationMode) -> Self {
        self.migration_mode = migration_mode;
        self
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    fn canonical(&self, provider: Provider) -> CanonicalStore {
        CanonicalStore::new(provider, self.paths.canonical_store(provider))
    }

    /// Store accounts plus env accounts. Env problems are reported, not fatal.
    fn merged_accounts(&self, container: &Container, warnings: &mut Vec<String>) -> Vec<Account> {
        let env = match load_env_accounts(&self.config, container.provider) {
            Ok(env) => env,
            Err(err) => {
                warnings.push(err.to_string());
                Vec::new()
            }
        };
        let (merged, shadowed) = merge_accounts(&container.accounts, env);
        for label in shadowed {
            warnings.push(format!(
                "env account {} is hidden by the stored account with the same label",
                label
            ));
        }
        merged
    }

    fn find_account(accounts: Vec<Account>, label: &str) -> AuthResult<Account> {
        accounts
            .into_iter()
            .find(|account| account.label == label)
            .ok_or_else(|| AuthError::NotFound {
                label: label.to_string(),
            })
    }

    pub fn sync(&self, provider: Provider, options: &SyncOptions) -> AuthResult<SyncReport> {
        let store = self.canonical(provider);
        let mut container = store.load_for_write()?;
        let mut warnings = Vec::new();
        let accounts = self.merged_accounts(&container, &mut warnings);
        let label = container
            .active_label
            .clone()
            .ok_or(AuthError::NoActiveLabel { provider })?;
        let account = Self::find_account(accounts, &label)?;
        self.sync_account(&store, &mut container, account, options, warnings)
    }

    /// Makes `label` active, then syncs it. Env accounts are pushed but never
    /// become the stored active label.
    pub fn switch(&self, provider: Provider, label: &str, options: &SyncOptions) -> AuthResult<SyncReport> {
        validate_label(label)?;
        let store = self.canonical(provider);
        let mut container = store.load_for_write()?;
        let mut warnings = Vec::new();
        let accounts = self.merged_accounts(&container, &mut warnings);
        let account = Self::find_account(accounts, label)?;

        if account.is_env() {
            warnings.push(format!(
                "{} comes from {}; the stored active label was left unchanged",
                label,
                account.source.tag()
            ));
        } else if container.active_label.as_deref() != Some(label) && !options.dry_run {
            container = store.save(
                &container,
                &container.accounts,
                &ContainerOverrides {
                    active_label: Some(Some(label.to_string())),
                    schema_version: None,
                },
            )?;
        }
        self.sync_account(&store, &mut container, account, options, warnings)
    }

    fn sync_account(
        &self,
        store: &CanonicalStore,
        container: &mut Container,
        mut account: Account,
        options: &SyncOptions,
        warnings: Vec<String>,
    ) -> AuthResult<SyncReport> {
        let provider = account.provider;
        let mut report = SyncReport::new(provider, &account.label, options.dry_run);
        report.warnings = warnings;
        if provider == Provider::OpenAi {
            account.tokens.fill_openai_claims();
        }
        let initial = account.tokens.clone();
        let mut stored = account.tokens.clone();
        self.log.record(
            provider,
            "sync_start",
            &[
                ("label", Some(account.label.clone())),
                ("source", Some(account.source.tag())),
                ("dry_run", Some(options.dry_run.to_string())),
                ("refresh", account.tokens.refresh.clone()),
            ],
        );

        let peers = peer_stores(&self.paths, provider);
        let (snapshots, read_warnings) = snapshot_peers(&peers);
        report.warnings.extend(read_warnings);

        let freshness = resolve_fresher(
            &account.tokens,
            &snapshots,
            options.assume_peer_fresher_without_expiry,
        );
        if let (true, Some(source)) = (freshness.fresher, freshness.store) {
            account.tokens = adopt_tokens(&account.tokens, &source.tokens);
            report.pulled_paths.push(source.path.clone());
            self.log.record(
                provider,
                "sync_pull",
                &[
                    ("store", Some(source.name.clone())),
                    ("expires_ms", source.tokens.expires_ms.map(|value| value.to_string())),
                ],
            );
            if !options.dry_run {
                self.persist(store, container, &account, &stored)?;
                stored = account.tokens.clone();
            }
        }

        if account
            .tokens
            .is_expiring(now_ms(), provider.refresh_buffer_ms())
        {
            if options.dry_run {
                report.refresh_due = true;
            } else {
                self.refresh_or_recover(provider, &mut account, &snapshots, &mut report)?;
                self.persist(store, container, &account, &stored)?;
            }
        }

        if account.is_env() && account.tokens != initial && !options.dry_run {
            report.warnings.push(format!(
                "{} comes from {}; updated tokens were pushed to peers but not stored",
                account.label,
                account.source.tag()
            ));
        }

        self.push(&peers, &account, &initial, options.dry_run, &mut report);
        self.log.record(
            provider,
            "sync_done",
            &[
                ("label", Some(account.label.clone())),
                ("pulled", Some(report.pulled_paths.len().to_string())),
                ("updated", Some(report.updated_paths.len().to_string())),
                ("skipped", Some(report.skipped_paths.len().to_string())),
                ("warnings", Some(report.warnings.len().to_string())),
            ],
        );
        Ok(report)
    }

    fn refresh_or_recover(
        &self,
        provider: Provider,
        account: &mut Account,
        snapshots: &[PeerSnapshot],
        report: &mut SyncReport,
    ) -> AuthResult<()> {
        let previous_refresh = account.tokens.refresh.clone();
        let refresh_error = match self.refresh_tokens(provider, &account.tokens) {
            Ok(tokens) => {
                account.tokens = tokens;
                report.refreshed = true;
                self.log.record(
                    provider,
                    "sync_refresh",
                    &[
                        ("result", Some("success".to_string())),
                        ("refresh", previous_refresh.clone()),
                    ],
                );
                return Ok(());
            }
            Err(err) => err,
        };
        self.log.record(
            provider,
            "sync_refresh",
            &[
                ("result", Some("error".to_string())),
                ("error_kind", Some(refresh_error.kind().to_string())),
                ("refresh", previous_refresh),
            ],
        );
        if provider != Provider::Claude {
            return Err(refresh_error);
        }

        let recovery = resolve_recovery(snapshots);
        match (recovery.store, recovery.reason) {
            (Some(source), _) if expires_later(source.tokens.expires_ms, account.tokens.expires_ms) => {
                self.log.record(
                    provider,
                    "sync_recovery",
                    &[
                        ("store", Some(source.name.clone())),
                        ("refresh", source.tokens.refresh.clone()),
                    ],
                );
                report.warnings.push(format!(
                    "refresh failed ({}); recovered credential from {} ({})",
                    refresh_error,
                    source.name,
                    source.path.display()
                ));
                account.tokens = adopt_tokens(&account.tokens, &source.tokens);
                report.recovered_from = Some(source.name);
                Ok(())
            }
            (_, Some(RecoveryRefusal::Ambiguous)) => {
                self.log.record(
                    provider,
                    "sync_recovery",
                    &[
                        ("result", Some("ambiguous".to_string())),
                    ],
                );
                let holders = snapshots
                    .iter()
                    .filter(|snapshot| snapshot.tokens.has_any_token())
                    .cloned()
                    .collect::<Vec<_>>();
                Err(AuthError::AmbiguousRecovery {
                    provider,
                    stores: describe_stores(&holders),
                })
            }
            _ => Err(refresh_error),
        }
    }

    fn refresh_tokens(&self, provider: Provider, current: &TokenSet) -> AuthResult<TokenSet> {
        let refresh_token = current.refresh.as_deref().ok_or_else(|| AuthError::Refresh {
            provider,
            status: 0,
            body_snippet: "no refresh token stored".to_string(),
        })?;
        let payload = with_refresh_lock(&self.paths.lock_dir(), refresh_token, &self.log, || {
            (self.refresh_client)(provider, refresh_token)
        })?;
        Ok(apply_refresh(provider, current, payload, now_ms()))
    }

    /// Writes `account` into the canonical store, updating every entry that
    /// held `stored` (legacy duplicates share a credential) or carries its label.
    fn persist(
        &self,
        store: &CanonicalStore,
        container: &mut Container,
        account: &Account,
        stored: &TokenSet,
    ) -> AuthResult<()> {
        if account.is_env() {
            return Ok(());
        }
        let mut accounts = container.accounts.clone();
        for existing in accounts.iter_mut() {
            let same = existing.label == account.label
                || tokens_match(MatchInput {
                    stored_access: existing.tokens.access.as_deref(),
                    stored_refresh: existing.tokens.refresh.as_deref(),
                    previous_access: stored.access.as_deref(),
                    previous_refresh: stored.refresh.as_deref(),
                    label: Some(account.label.as_str()),
                    stored_label: Some(existing.label.as_str()),
                });
            if same {
                existing.tokens = account.tokens.clone();
            }
        }
        if accounts == container.accounts {
            return Ok(());
        }
        *container = store.save(container, &accounts, &ContainerOverrides::default())?;
        Ok(())
    }

    fn push(
        &self,
        peers: &[PeerStore],
        account: &Account,
        previous: &TokenSet,
        dry_run: bool,
        report: &mut SyncReport,
    ) {
        let now = now_ms();
        for peer in peers {
            let outcome = if dry_run {
                peer.preview_write(account, Some(previous), now)
            } else {
                peer.write_tokens(account, Some(previous), now)
            };
            let result = if let Some(error) = &outcome.error {
                report.warnings.push(format!("{}: {}", outcome.name, error));
                "error"
            } else if outcome.skipped {
                report.skipped_paths.push(outcome.path.clone());
                "skipped"
            } else if outcome.unchanged {
                report.unchanged_paths.push(outcome.path.clone());
                "unchanged"
            } else {
                report.updated_paths.push(outcome.path.clone());
                "updated"
            };
            self.log.record(
                account.provider,
                "sync_push",
                &[
                    ("store", Some(outcome.name.clone())),
                    ("result", Some(result.to_string())),
                    ("dry_run", Some(dry_run.to_string())),
                ],
            );
        }
    }

    pub fn remove(&self, provider: Provider, label: &str, dry_run: bool) -> AuthResult<RemoveReport> {
        let store = self.canonical(provider);
        let container = store.load_for_write()?;
        let mut warnings = Vec::new();
        let accounts = self.merged_accounts(&container, &mut warnings);
        let removed = Self::find_account(accounts, label)?;
        removed.ensure_mutable()?;

        let remaining = container
            .accounts
            .iter()
            .filter(|account| account.label != label)
            .cloned()
            .collect::<Vec<_>>();
        let active_cleared = container.active_label.as_deref() == Some(label);
        if !dry_run {
            store.save(
                &container,
                &remaining,
                &ContainerOverrides {
                    active_label: active_cleared.then_some(None),
                    schema_version: None,
                },
            )?;
        }

        let marker_cleared = provider == Provider::OpenAi
            && self.clear_native_marker(&removed, dry_run, &mut warnings);
        self.log.record(
            provider,
            "account_removed",
            &[
                ("label", Some(label.to_string())),
                ("active_cleared", Some(active_cleared.to_string())),
                ("marker_cleared", Some(marker_cleared.to_string())),
                ("dry_run", Some(dry_run.to_string())),
            ],
        );
        Ok(RemoveReport {
            provider,
            label: label.to_string(),
            dry_run,
            active_cleared,
            marker_cleared,
            warnings,
        })
    }

    /// Clears the native tracked-label marker only when it names `removed`
    /// and the native credential is the same account.
    fn clear_native_marker(&self, removed: &Account, dry_run: bool, warnings: &mut Vec<String>) -> bool {
        let native = native_store(&self.paths, removed.provider);
        let marker = match native.read_label_marker() {
            Ok(marker) => marker,
            Err(err) => {
                warnings.push(format!("{}: {}", native.name, err));
                return false;
            }
        };
        if marker.as_deref() != Some(removed.label.as_str()) {
            return false;
        }
        let native_id = match native.read_tokens() {
            Ok(tokens) => tokens.as_ref().and_then(native_account_id),
            Err(err) => {
                warnings.push(format!("{}: {}", native.name, err));
                return false;
            }
        };
        if native_id.is_none() || native_id != account_id_of(&removed.tokens) {
            return false;
        }
        if dry_run {
            return true;
        }
        match native.clear_label_marker() {
            Ok(cleared) => cleared,
            Err(err) => {
                warnings.push(format!("{}: {}", native.name, err));
                false
            }
        }
    }

    fn import_tokens(&self, provider: Provider, source: &ImportSource) -> AuthResult<(TokenSet, String)> {
        match source {
            ImportSource::NativeStore => {
                let native = native_store(&self.paths, provider);
                let tokens = native.read_tokens()?.ok_or_else(|| AuthError::NotFound {
                    label: format!("{} credential in {}", native.name, native.path.display()),
                })?;
                Ok((tokens, native.name.to_string()))
            }
            ImportSource::Json(text) => Ok((parse_pasted_tokens(provider, text)?, "paste".to_string())),
        }
    }

    /// Stores a new account. It becomes active when nothing else is.
    pub fn add(&self, provider: Provider, label: &str, source: &ImportSource) -> AuthResult<AccountReport> {
        validate_label(label)?;
        let store = self.canonical(provider);
        let container = store.load_for_write()?;
        let mut warnings = Vec::new();
        let accounts = self.merged_accounts(&container, &mut warnings);
        if let Some(existing) = accounts.iter().find(|account| account.label == label) {
            return Err(AuthError::invalid_label(
                label,
                format!("already used by a {} account", existing.source.tag()),
            ));
        }

        let (tokens, source_name) = self.import_tokens(provider, source)?;
        if let Some(twin) = accounts.iter().find(|account| {
            account.tokens.fingerprint_source().is_some()
                && account.tokens.fingerprint_source() == tokens.fingerprint_source()
        }) {
            warnings.push(format!("the same credential is already stored as {}", twin.label));
        }

        let mut next = container.accounts.clone();
        next.push(Account::new(label, provider, tokens.clone()));
        let active = container.active_account().is_none();
        store.save(
            &container,
            &next,
            &ContainerOverrides {
                active_label: active.then(|| Some(label.to_string())),
                schema_version: None,
            },
        )?;
        Ok(AccountReport {
            provider,
            label: label.to_string(),
            created: true,
            active,
            source: source_name,
            account_id: tokens.account_id,
            expires_ms: tokens.expires_ms,
            warnings,
        })
    }

    pub fn reauth(&self, provider: Provider, label: &str, source: &ImportSource) -> AuthResult<AccountReport> {
        validate_label(label)?;
        let store = self.canonical(provider);
        let container = store.load_for_write()?;
        let mut warnings = Vec::new();
        let accounts = self.merged_accounts(&container, &mut warnings);
        Self::find_account(accounts, label)?.ensure_mutable()?;

        let (tokens, source_name) = self.import_tokens(provider, source)?;
        let next = container
            .accounts
            .iter()
            .cloned()
            .map(|mut account| {
                if account.label == label {
                    account.tokens = tokens.clone();
                }
                account
            })
            .collect::<Vec<_>>();
        let saved = store.save(&container, &next, &ContainerOverrides::default())?;
        let active = saved.active_label.as_deref() == Some(label);
        if active {
            warnings.push("run sync to push the new credential to peer stores".to_string());
        }
        Ok(AccountReport {
            provider,
            label: label.to_string(),
            created: false,
            active,
            source: source_name,
            account_id: tokens.account_id,
            expires_ms: tokens.expires_ms,
            warnings,
        })
    }

    pub fn list(&self, provider: Provider) -> AuthResult<ListReport> {
        let container = self.canonical(provider).load()?;
        container.ensure_valid()?;
        let mut warnings = Vec::new();
        let accounts = self.merged_accounts(&container, &mut warnings);
        let now = now_ms();
        let summaries = accounts
            .into_iter()
            .map(|mut account| {
                if provider == Provider::OpenAi {
                    account.tokens.fill_openai_claims();
                }
                AccountSummary {
                    active: container.active_label.as_deref() == Some(account.label.as_str()),
                    source: account.source.tag(),
                    account_id: account.tokens.account_id.clone(),
                    expires_ms: account.tokens.expires_ms,
                    expiry_state: expiry_state(&account.tokens, now, provider.refresh_buffer_ms()),
                    label: account.label,
                }
            })
            .collect();
        Ok(ListReport {
            provider,
            active_label: container.active_label.clone(),
            accounts: summaries,
            warnings,
        })
    }

    /// Runs the divergence detector. An accepted marker migration is persisted.
    pub fn status(&self, provider: Provider) -> AuthResult<StatusReport> {
        let store = self.canonical(provider);
        let container = store.load_for_write()?;
        let mut warnings = Vec::new();
        let accounts = self.merged_accounts(&container, &mut warnings);
        let peers = peer_stores(&self.paths, provider);
        let (snapshots, read_warnings) = snapshot_peers(&peers);
        warnings.extend(read_warnings);

        let divergence = match provider {
            Provider::OpenAi => {
                let native = native_store(&self.paths, provider);
                let native_snapshot = snapshots.iter().find(|snapshot| snapshot.name == native.name);
                let marker = match native.read_label_marker() {
                    Ok(marker) => marker,
                    Err(err) => {
                        warnings.push(format!("{}: label marker unreadable: {}", native.name, err));
                        None
                    }
                };
                let report = detect_openai(
                    container.active_label.as_deref(),
                    &accounts,
                    native_snapshot,
                    marker.as_deref(),
                    self.migration_mode,
                );
                if let Some(label) = &report.migrated_label {
                    if container.find(label).is_some() {
                        store.save(
                            &container,
                            &container.accounts,
                            &ContainerOverrides {
                                active_label: Some(Some(label.clone())),
                                schema_version: None,
                            },
                        )?;
                        self.log.record(
                            provider,
                            "active_label_migrated",
                            &[
                                ("from", container.active_label.clone()),
                                ("to", Some(label.clone())),
                            ],
                        );
                    } else {
                        warnings.push(format!("{} is not a stored account; active label not migrated", label));
                    }
                }
                report
            }
            Provider::Claude => detect_claude(container.active_label.as_deref(), &accounts, &snapshots),
        };
        Ok(StatusReport { divergence, warnings })
    }

    pub fn quota(&self, provider: Provider, label: Option<&str>) -> AuthResult<QuotaReport> {
        let container = self.canonical(provider).load()?;
        container.ensure_valid()?;
        let mut warnings = Vec::new();
        let accounts = self.merged_accounts(&container, &mut warnings);
        let label = label
            .map(str::to_string)
            .or_else(|| container.active_label.clone())
            .ok_or(AuthError::NoActiveLabel { provider })?;
        let mut account = Self::find_account(accounts, &label)?;
        if provider == Provider::OpenAi {
            account.tokens.fill_openai_claims();
        }
        let access_token = account.tokens.access.clone().ok_or_else(|| AuthError::NotFound {
            label: format!("{} access token", label),
        })?;
        let usage = (self.usage_client)(
            provider,
            &UsageRequest {
                access_token,
                account_id: account.tokens.account_id.clone(),
            },
        )?;
        Ok(QuotaReport {
            provider,
            label,
            usage,
        })
    }
}
