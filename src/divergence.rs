//! Read-only comparison of the active account against what peers hold.

use serde::Serialize;

use crate::account::{openai_account_id_from_jwt, Account, Provider, TokenSet};
use crate::stores::PeerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationMode {
    /// Promote the native tracked-label marker to the active label when it checks out.
    Allow,
    Disallow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreComparison {
    pub name: String,
    pub considered: bool,
    pub matches: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivergenceReport {
    pub provider: Provider,
    pub active_label: Option<String>,
    pub diverged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_label: Option<String>,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Set when the tracked-label marker was promoted to the active label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_label: Option<String>,
    pub per_store: Vec<StoreComparison>,
}

impl DivergenceReport {
    fn new(provider: Provider, active_label: Option<&str>) -> Self {
        Self {
            provider,
            active_label: active_label.map(str::to_string),
            diverged: false,
            cli_label: None,
            skipped: false,
            skip_reason: None,
            migrated_label: None,
            per_store: Vec::new(),
        }
    }

    fn skip(mut self, reason: &str) -> Self {
        self.skipped = true;
        self.skip_reason = Some(reason.to_string());
        self
    }
}

/// Stored id first, then the access token's claim.
pub fn account_id_of(tokens: &TokenSet) -> Option<String> {
    tokens
        .account_id
        .clone()
        .or_else(|| tokens.access.as_deref().and_then(openai_account_id_from_jwt))
}

/// Claim first; the native file's stored id can lag behind its token.
pub fn native_account_id(tokens: &TokenSet) -> Option<String> {
    tokens
        .access
        .as_deref()
        .and_then(openai_account_id_from_jwt)
        .or_else(|| tokens.account_id.clone())
}

pub fn detect_openai(
    active_label: Option<&str>,
    accounts: &[Account],
    native: Option<&PeerSnapshot>,
    marker: Option<&str>,
    mode: MigrationMode,
) -> DivergenceReport {
    let native_id = native.and_then(|snapshot| native_account_id(&snapshot.tokens));
    let find = |label: &str| accounts.iter().find(|account| account.label == label);

    let mut active_label = active_label.map(str::to_string);
    let mut migrated_label = None;
    if mode == MigrationMode::Allow {
        let promotable = marker
            .filter(|marker| active_label.as_deref() != Some(*marker))
            .and_then(find)
            .filter(|account| native_id.is_some() && account_id_of(&account.tokens) == native_id);
        if let Some(account) = promotable {
            active_label = Some(account.label.clone());
            migrated_label = Some(account.label.clone());
        }
    }

    let mut report = DivergenceReport::new(Provider::OpenAi, active_label.as_deref());
    report.migrated_label = migrated_label;
    report.cli_label = native_id.as_ref().and_then(|native_id| {
        accounts
            .iter()
            .find(|account| account_id_of(&account.tokens).as_ref() == Some(native_id))
            .map(|account| account.label.clone())
    });

    let Some(label) = active_label.as_deref() else {
        return report.skip("no-active-label");
    };
    let Some(active) = find(label) else {
        return report.skip("active-label-not-found");
    };
    let Some(native) = native else {
        return report.skip("native-store-missing");
    };
    let active_id = account_id_of(&active.tokens);
    let considered = active_id.is_some() && native_id.is_some();
    let matches = considered && active_id == native_id;
    report.per_store.push(StoreComparison {
        name: native.name.clone(),
        considered,
        matches,
    });
    report.diverged = considered && !matches;
    if !considered {
        return report.skip("account-id-unavailable");
    }
    report
}

/// Claude check: refresh tokens when both sides have one, else access tokens.
/// A peer with neither pairing is not considered.
pub fn detect_claude(
    active_label: Option<&str>,
    accounts: &[Account],
    peers: &[PeerSnapshot],
) -> DivergenceReport {
    let mut report = DivergenceReport::new(Provider::Claude, active_label);
    let Some(label) = active_label else {
        return report.skip("no-active-label");
    };
    let Some(active) = accounts.iter().find(|account| account.label == label) else {
        return report.skip("active-label-not-found");
    };

    for peer in peers {
        let pair = match (active.tokens.refresh.as_deref(), peer.tokens.refresh.as_deref()) {
            (Some(ours), Some(theirs)) => Some((ours, theirs)),
            _ => match (active.tokens.access.as_deref(), peer.tokens.access.as_deref()) {
                (Some(ours), Some(theirs)) => Some((ours, theirs)),
                _ => None,
            },
        };
        report.per_store.push(StoreComparison {
            name: peer.name.clone(),
            considered: pair.is_some(),
            matches: pair.is_some_and(|(ours, theirs)| ours == theirs),
        });
    }
    report.diverged = report
        .per_store
        .iter()
        .any(|store| store.considered && !store.matches);
    if peers.is_empty() {
        return report.skip("no-peer-stores");
    }
    report
}
