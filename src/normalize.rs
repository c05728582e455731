//! Alias tables mapping each store's field spelling onto [`TokenSet`].
//!
//! Reading takes the first alias present. Writing reuses whichever alias the
//! entry already carries, so a store keeps its own naming style; new keys use
//! the first alias in the list.

use serde_json::{Map, Value};

use crate::account::TokenSet;
use crate::json::{normalize_scope_value, value_as_i64, value_as_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryUnit {
    Millis,
    Seconds,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub access: &'static [&'static str],
    pub refresh: &'static [&'static str],
    pub expires: &'static [&'static str],
    pub expiry_unit: ExpiryUnit,
    pub account_id: &'static [&'static str],
    pub id_token: &'static [&'static str],
    pub scopes: &'static [&'static str],
    /// Stores whose consumers require an expiry get `now - 1s` instead of nothing.
    pub expiry_required: bool,
}

pub const CANONICAL_FIELDS: FieldAliases = FieldAliases {
    access: &["access", "accessToken", "access_token"],
    refresh: &["refresh", "refreshToken", "refresh_token"],
    expires: &["expires", "expiresAt", "expires_at"],
    expiry_unit: ExpiryUnit::Millis,
    account_id: &["accountId", "account_id"],
    id_token: &["idToken", "id_token"],
    scopes: &["scopes", "scope"],
    expiry_required: false,
};

pub const CODEX_CLI_FIELDS: FieldAliases = FieldAliases {
    access: &["access_token", "accessToken", "access"],
    refresh: &["refresh_token", "refreshToken", "refresh"],
    expires: &["expires_at", "expiresAt", "expires"],
    expiry_unit: ExpiryUnit::Seconds,
    account_id: &["account_id", "accountId"],
    id_token: &["id_token", "idToken"],
    scopes: &[],
    expiry_required: false,
};

pub const CLAUDE_CLI_FIELDS: FieldAliases = FieldAliases {
    access: &["accessToken", "access_token", "access"],
    refresh: &["refreshToken", "refresh_token", "refresh"],
    expires: &["expiresAt", "expires_at", "expires"],
    expiry_unit: ExpiryUnit::Millis,
    account_id: &[],
    id_token: &[],
    scopes: &["scopes"],
    expiry_required: true,
};

pub const PROVIDER_MAP_FIELDS: FieldAliases = FieldAliases {
    access: &["access", "accessToken", "access_token"],
    refresh: &["refresh", "refreshToken", "refresh_token"],
    expires: &["expires", "expiresAt", "expires_at"],
    expiry_unit: ExpiryUnit::Millis,
    account_id: &["accountId", "account_id"],
    id_token: &[],
    scopes: &["scopes"],
    expiry_required: true,
};

const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

fn first_present<'a>(entry: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| entry.get(*alias))
}

pub fn pick_key(entry: &Map<String, Value>, aliases: &[&'static str]) -> Option<&'static str> {
    aliases
        .iter()
        .copied()
        .find(|alias| entry.contains_key(*alias))
        .or_else(|| aliases.first().copied())
}

pub fn read_tokens(entry: &Map<String, Value>, fields: &FieldAliases) -> TokenSet {
    let access = value_as_string(first_present(entry, fields.access));
    let refresh = value_as_string(first_present(entry, fields.refresh));
    let expires_ms = first_present(entry, fields.expires)
        .and_then(value_as_i64)
        .filter(|raw| *raw > 0)
        .map(|raw| match fields.expiry_unit {
            ExpiryUnit::Millis => raw,
            // Some writers store milliseconds under a seconds-typed key.
            ExpiryUnit::Seconds if raw >= MILLIS_THRESHOLD => raw,
            ExpiryUnit::Seconds => raw * 1000,
        });
    let scopes = first_present(entry, fields.scopes)
        .map(normalize_scope_value)
        .filter(|scopes| !scopes.is_empty());
    let account_id = value_as_string(first_present(entry, fields.account_id));
    let id_token = value_as_string(first_present(entry, fields.id_token));

    TokenSet {
        access,
        refresh,
        expires_ms,
        scopes,
        account_id,
        id_token,
    }
}

fn remove_aliases(entry: &mut Map<String, Value>, aliases: &[&str]) {
    for alias in aliases {
        entry.remove(*alias);
    }
}

fn set_string(entry: &mut Map<String, Value>, aliases: &[&'static str], value: &str) {
    if let Some(key) = pick_key(entry, aliases) {
        entry.insert(key.to_string(), Value::String(value.to_string()));
    }
}

pub fn expiry_to_store(expires_ms: i64, unit: ExpiryUnit) -> i64 {
    match unit {
        ExpiryUnit::Millis => expires_ms,
        ExpiryUnit::Seconds => expires_ms.div_euclid(1000),
    }
}

/// Missing access/refresh/expiry values remove the stale keys; missing
/// identity and scope values leave whatever the entry already holds.
pub fn write_tokens(
    entry: &mut Map<String, Value>,
    fields: &FieldAliases,
    tokens: &TokenSet,
    now_ms: i64,
) {
    match tokens.access.as_deref() {
        Some(access) => set_string(entry, fields.access, access),
        None => remove_aliases(entry, fields.access),
    }
    match tokens.refresh.as_deref() {
        Some(refresh) => set_string(entry, fields.refresh, refresh),
        None => remove_aliases(entry, fields.refresh),
    }

    let expires_ms = match tokens.expires_ms {
        Some(expires_ms) => Some(expires_ms),
        None if fields.expiry_required => Some(now_ms - 1000),
        None => None,
    };
    match expires_ms {
        Some(expires_ms) => {
            if let Some(key) = pick_key(entry, fields.expires) {
                let stored = expiry_to_store(expires_ms, fields.expiry_unit);
                entry.insert(key.to_string(), Value::Number(stored.into()));
            }
        }
        None => remove_aliases(entry, fields.expires),
    }

    if let Some(account_id) = tokens.account_id.as_deref() {
        set_string(entry, fields.account_id, account_id);
    }
    if let Some(id_token) = tokens.id_token.as_deref() {
        set_string(entry, fields.id_token, id_token);
    }
    if let Some(scopes) = tokens.scopes.as_ref() {
        if let Some(key) = pick_key(entry, fields.scopes) {
            let value = match entry.get(key) {
                Some(Value::String(_)) => Value::String(scopes.join(" ")),
                _ => Value::Array(scopes.iter().cloned().map(Value::String).collect()),
            };
            entry.insert(key.to_string(), value);
        }
    }
}

/// Like [`write_tokens`], but optional fields absent from `tokens` are removed
/// too, for entries where `tokens` is the whole truth.
pub fn write_tokens_exact(
    entry: &mut Map<String, Value>,
    fields: &FieldAliases,
    tokens: &TokenSet,
    now_ms: i64,
) {
    if tokens.account_id.is_none() {
        remove_aliases(entry, fields.account_id);
    }
    if tokens.id_token.is_none() {
        remove_aliases(entry, fields.id_token);
    }
    if tokens.scopes.is_none() {
        remove_aliases(entry, fields.scopes);
    }
    write_tokens(entry, fields, tokens, now_ms);
}

/// Drops the identity fields the engine owns, used when an entry belonged to another credential.
pub fn clear_identity(entry: &mut Map<String, Value>, fields: &FieldAliases) {
    remove_aliases(entry, fields.account_id);
    remove_aliases(entry, fields.id_token);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object fixture")
    }

    #[test]
    fn read_takes_first_present_alias() {
        let entry = object(json!({
            "access_token": "snake",
            "accessToken": "camel",
            "refresh": "rt",
            "expiresAt": 1_700_000_000_000i64
        }));
        let tokens = read_tokens(&entry, &CANONICAL_FIELDS);
        assert_eq!(tokens.access.as_deref(), Some("camel"));
        assert_eq!(tokens.refresh.as_deref(), Some("rt"));
        assert_eq!(tokens.expires_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn seconds_stores_are_scaled_both_ways() {
        let entry = object(json!({ "access_token": "a", "expires_at": 1_700_000_000 }));
        let tokens = read_tokens(&entry, &CODEX_CLI_FIELDS);
        assert_eq!(tokens.expires_ms, Some(1_700_000_000_000));

        let mut out = Map::new();
        let tokens = TokenSet {
            access: Some("a".to_string()),
            expires_ms: Some(1_700_000_000_999),
            ..TokenSet::default()
        };
        write_tokens(&mut out, &CODEX_CLI_FIELDS, &tokens, 0);
        assert_eq!(out.get("expires_at"), Some(&json!(1_700_000_000)));
    }

    #[test]
    fn seconds_key_holding_milliseconds_is_not_scaled_again() {
        let entry = object(json!({ "expires_at": 1_700_000_000_000i64 }));
        let tokens = read_tokens(&entry, &CODEX_CLI_FIELDS);
        assert_eq!(tokens.expires_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn write_reuses_existing_alias_and_keeps_unknown_fields() {
        let mut entry = object(json!({
            "type": "oauth",
            "accessToken": "old",
            "refresh_token": "rt-old",
            "custom": true
        }));
        let tokens = TokenSet {
            access: Some("new".to_string()),
            refresh: Some("rt-new".to_string()),
            expires_ms: Some(5_000),
            ..TokenSet::default()
        };
        write_tokens(&mut entry, &PROVIDER_MAP_FIELDS, &tokens, 0);
        assert_eq!(entry.get("accessToken"), Some(&json!("new")));
        assert_eq!(entry.get("refresh_token"), Some(&json!("rt-new")));
        assert_eq!(entry.get("expires"), Some(&json!(5_000)));
        assert!(!entry.contains_key("access"));
        assert_eq!(entry.get("custom"), Some(&json!(true)));
        assert_eq!(entry.get("type"), Some(&json!("oauth")));
    }

    #[test]
    fn unset_expiry_is_written_as_already_expired_where_required() {
        let mut entry = Map::new();
        let tokens = TokenSet {
            access: Some("a".to_string()),
            ..TokenSet::default()
        };
        write_tokens(&mut entry, &CLAUDE_CLI_FIELDS, &tokens, 10_000);
        assert_eq!(entry.get("expiresAt"), Some(&json!(9_000)));

        let mut canonical = object(json!({ "expires": 42 }));
        write_tokens(&mut canonical, &CANONICAL_FIELDS, &tokens, 10_000);
        assert!(!canonical.contains_key("expires"));
    }

    #[test]
    fn missing_identity_leaves_existing_values() {
        let mut entry = object(json!({ "accountId": "keep" }));
        write_tokens(&mut entry, &PROVIDER_MAP_FIELDS, &TokenSet::default(), 0);
        assert_eq!(entry.get("accountId"), Some(&json!("keep")));
        clear_identity(&mut entry, &PROVIDER_MAP_FIELDS);
        assert!(!entry.contains_key("accountId"));
    }

    #[test]
    fn exact_write_removes_unset_optional_fields_in_place() {
        let mut entry = object(json!({ "label": "x", "accountId": "old", "access": "a", "idToken": "i" }));
        let tokens = TokenSet {
            access: Some("b".to_string()),
            id_token: Some("j".to_string()),
            ..TokenSet::default()
        };
        write_tokens_exact(&mut entry, &CANONICAL_FIELDS, &tokens, 0);
        assert_eq!(
            entry.keys().cloned().collect::<Vec<_>>(),
            vec!["label", "access", "idToken"]
        );
        assert_eq!(entry.get("idToken"), Some(&json!("j")));
    }

    #[test]
    fn space_separated_scope_strings_stay_strings() {
        let mut entry = object(json!({ "scope": "a b" }));
        let read = read_tokens(&entry, &CANONICAL_FIELDS);
        assert_eq!(read.scopes, Some(vec!["a".to_string(), "b".to_string()]));
        let tokens = TokenSet {
            scopes: Some(vec!["c".to_string(), "d".to_string()]),
            ..TokenSet::default()
        };
        write_tokens(&mut entry, &CANONICAL_FIELDS, &tokens, 0);
        assert_eq!(entry.get("scope"), Some(&json!("c d")));
    }
}
