//! Read-only accounts supplied through an environment variable.

use std::path::PathBuf;

use crate::account::{Account, AccountSource, Provider};
use crate::container::decode_container;
use crate::error::{AuthError, AuthResult};
use crate::paths::Config;

/// Accounts from the provider's env variable. Accepts the same shapes as the
/// canonical file (bare array or `{accounts: [...]}`). Unset means none.
pub fn load_env_accounts(config: &Config, provider: Provider) -> AuthResult<Vec<Account>> {
    let var = config.env_accounts_var(provider);
    let Some(raw) = config.var(var) else {
        return Ok(Vec::new());
    };
    let origin = PathBuf::from(format!("${}", var));
    let container = decode_container(&origin, provider, raw.as_bytes());
    if container.is_invalid() {
        return Err(AuthError::parse(
            &origin,
            container
                .invalid_reason
                .unwrap_or_else(|| "unrecognized value".to_string()),
        ));
    }
    Ok(container
        .accounts
        .into_iter()
        .map(|mut account| {
            if provider == Provider::OpenAi {
                account.tokens.fill_openai_claims();
            }
            account.source = AccountSource::Env(var.to_string());
            account
        })
        .collect())
}

/// Store accounts followed by env accounts whose labels are not already taken.
/// Returns the merged list and the labels that were shadowed.
pub fn merge_accounts(store: &[Account], env: Vec<Account>) -> (Vec<Account>, Vec<String>) {
    let mut merged = store.to_vec();
    let mut shadowed = Vec::new();
    for account in env {
        if merged.iter().any(|existing| existing.label == account.label) {
            shadowed.push(account.label);
            continue;
        }
        merged.push(account);
    }
    (merged, shadowed)
}
