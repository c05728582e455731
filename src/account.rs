use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{AuthError, AuthResult};
use crate::json::{decode_jwt_payload, get_path_string, value_as_i64};

const OPENAI_AUTH_CLAIM: &str = "https://api.openai.com/auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Claude,
}

impl Provider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "codex" | "openai" | "chatgpt" => Some(Self::OpenAi),
            "claude" | "anthropic" => Some(Self::Claude),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Claude => "claude",
        }
    }

    /// Window before expiry in which the engine refreshes proactively.
    pub fn refresh_buffer_ms(self) -> i64 {
        match self {
            Self::OpenAi => 60 * 1000,
            Self::Claude => 5 * 60 * 1000,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSource {
    Store,
    Env(String),
}

impl AccountSource {
    pub fn tag(&self) -> String {
        match self {
            Self::Store => "store".to_string(),
            Self::Env(var) => format!("env:{}", var),
        }
    }

    pub fn is_env(&self) -> bool {
        self.tag().starts_with("env")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub access: Option<String>,
    pub refresh: Option<String>,
    pub expires_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenSet {
    pub fn has_any_token(&self) -> bool {
        self.access.is_some() || self.refresh.is_some()
    }

    /// Refresh token if present, else access token.
    pub fn fingerprint_source(&self) -> Option<&str> {
        self.refresh.as_deref().or(self.access.as_deref())
    }

    pub fn is_expiring(&self, now_ms: i64, buffer_ms: i64) -> bool {
        match self.expires_ms {
            Some(expires_ms) => expires_ms <= now_ms + buffer_ms,
            None => false,
        }
    }

    /// Fills identity and expiry gaps from the JWT claims of the OpenAI-family tokens.
    pub fn fill_openai_claims(&mut self) {
        if self.account_id.is_none() {
            self.account_id = self
                .access
                .as_deref()
                .and_then(openai_account_id_from_jwt)
                .or_else(|| self.id_token.as_deref().and_then(openai_account_id_from_jwt));
        }
        if self.expires_ms.is_none() {
            self.expires_ms = self.access.as_deref().and_then(jwt_expiry_ms);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub label: String,
    pub provider: Provider,
    pub tokens: TokenSet,
    pub source: AccountSource,
    /// The entry exactly as read, including fields the engine does not own.
    pub raw: Map<String, Value>,
}

impl Account {
    pub fn new(label: &str, provider: Provider, tokens: TokenSet) -> Self {
        Self {
            label: label.to_string(),
            provider,
            tokens,
            source: AccountSource::Store,
            raw: Map::new(),
        }
    }

    pub fn is_env(&self) -> bool {
        self.source.is_env()
    }

    pub fn ensure_mutable(&self) -> AuthResult<()> {
        if self.is_env() {
            return Err(AuthError::ImmutableSource {
                label: self.label.clone(),
                source_name: self.source.tag(),
            });
        }
        Ok(())
    }
}

pub fn validate_label(label: &str) -> AuthResult<()> {
    if label.is_empty() {
        return Err(AuthError::invalid_label(label, "label is required"));
    }
    let valid = label
        .chars()
        .all(|character| character.is_ascii_alphanumeric() || character == '-' || character == '_');
    if !valid {
        return Err(AuthError::invalid_label(
            label,
            "only letters, digits, '-' and '_' are allowed",
        ));
    }
    Ok(())
}

pub fn openai_account_id_from_jwt(token: &str) -> Option<String> {
    let payload = decode_jwt_payload(token)?;
    get_path_string(&payload, &[OPENAI_AUTH_CLAIM, "chatgpt_account_id"])
        .or_else(|| get_path_string(&payload, &["chatgpt_account_id"]))
}

pub fn jwt_expiry_ms(token: &str) -> Option<i64> {
    let payload = decode_jwt_payload(token)?;
    let exp = payload.get("exp").and_then(value_as_i64)?;
    if exp <= 0 {
        return None;
    }
    exp.checked_mul(1000)
}


#[cfg(test)]
mod tests {
    use super::test_support::openai_jwt;
    use super::*;

    #[test]
    fn label_validation_accepts_word_characters_only() {
        assert!(validate_label("work_2-b").is_ok());
        assert!(matches!(
            validate_label("has space"),
            Err(AuthError::InvalidLabel { .. })
        ));
        assert!(matches!(
            validate_label(""),
            Err(AuthError::InvalidLabel { .. })
        ));
        assert!(validate_label("caf\u{e9}").is_err());
    }

    #[test]
    fn openai_claims_fill_account_id_and_expiry() {
        let mut tokens = TokenSet {
            access: Some(openai_jwt("acct-uuid-1", 1_900_000_000)),
            ..TokenSet::default()
        };
        tokens.fill_openai_claims();
        assert_eq!(tokens.account_id.as_deref(), Some("acct-uuid-1"));
        assert_eq!(tokens.expires_ms, Some(1_900_000_000_000));
    }

    #[test]
    fn oversized_jwt_exp_is_unknown_expiry() {
        assert_eq!(jwt_expiry_ms(&openai_jwt("acct", 9_000_000_000_000_000_000)), None);
        let mut tokens = TokenSet {
            access: Some(openai_jwt("acct", 9_000_000_000_000_000_000)),
            ..TokenSet::default()
        };
        tokens.fill_openai_claims();
        assert_eq!(tokens.account_id.as_deref(), Some("acct"));
        assert_eq!(tokens.expires_ms, None);
    }

    #[test]
    fn unknown_expiry_is_never_expiring() {
        let tokens = TokenSet::default();
        assert!(!tokens.is_expiring(10, 60_000));
        let soon = TokenSet {
            expires_ms: Some(50_000),
            ..TokenSet::default()
        };
        assert!(soon.is_expiring(0, 60_000));
        assert!(!soon.is_expiring(0, 10_000));
    }

    #[test]
    fn env_source_is_immutable() {
        let mut account = Account::new("ci", Provider::Claude, TokenSet::default());
        assert!(account.ensure_mutable().is_ok());
        account.source = AccountSource::Env("AUTHSYNC_CLAUDE_ACCOUNTS".to_string());
        assert!(account.is_env());
        assert!(matches!(
            account.ensure_mutable(),
            Err(AuthError::ImmutableSource { .. })
        ));
    }
}
