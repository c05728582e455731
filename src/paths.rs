use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::account::Provider;

pub const ENV_STORE_HOME: &str = "AUTHSYNC_HOME";
pub const ENV_CODEX_AUTH_FILE: &str = "AUTHSYNC_CODEX_AUTH_FILE";
pub const ENV_CLAUDE_CREDENTIALS_FILE: &str = "AUTHSYNC_CLAUDE_CREDENTIALS_FILE";
pub const ENV_PI_AUTH_FILE: &str = "AUTHSYNC_PI_AUTH_FILE";
pub const ENV_XDG_DATA_HOME: &str = "XDG_DATA_HOME";
pub const ENV_CODEX_HOME: &str = "CODEX_HOME";
pub const ENV_CLAUDE_CONFIG_DIR: &str = "CLAUDE_CONFIG_DIR";
pub const ENV_CODEX_ACCOUNTS: &str = "AUTHSYNC_CODEX_ACCOUNTS";
pub const ENV_CLAUDE_ACCOUNTS: &str = "AUTHSYNC_CLAUDE_ACCOUNTS";
pub const ENV_OPENAI_TOKEN_URL: &str = "AUTHSYNC_OPENAI_TOKEN_URL";
pub const ENV_CLAUDE_TOKEN_URL: &str = "AUTHSYNC_CLAUDE_TOKEN_URL";
pub const ENV_NO_COLOR: &str = "NO_COLOR";

const RECOGNIZED_VARS: [&str; 12] = [
    ENV_STORE_HOME,
    ENV_CODEX_AUTH_FILE,
    ENV_CLAUDE_CREDENTIALS_FILE,
    ENV_PI_AUTH_FILE,
    ENV_XDG_DATA_HOME,
    ENV_CODEX_HOME,
    ENV_CLAUDE_CONFIG_DIR,
    ENV_CODEX_ACCOUNTS,
    ENV_CLAUDE_ACCOUNTS,
    ENV_OPENAI_TOKEN_URL,
    ENV_CLAUDE_TOKEN_URL,
    ENV_NO_COLOR,
];

/// Home directory plus the environment variables the engine recognizes,
/// captured once and passed around explicitly.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub home_dir: PathBuf,
    vars: HashMap<String, String>,
}

impl Config {
    pub fn from_process_env(home_dir: PathBuf) -> Self {
        let vars = RECOGNIZED_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
            .collect();
        Self { home_dir, vars }
    }

    pub fn with_vars(home_dir: PathBuf, vars: &[(&str, &str)]) -> Self {
        Self {
            home_dir,
            vars: vars
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn no_color(&self) -> bool {
        self.var(ENV_NO_COLOR).is_some()
    }

    pub fn env_accounts_var(&self, provider: Provider) -> &'static str {
        match provider {
            Provider::OpenAi => ENV_CODEX_ACCOUNTS,
            Provider::Claude => ENV_CLAUDE_ACCOUNTS,
        }
    }

    pub fn token_endpoint_override(&self, provider: Provider) -> Option<String> {
        let name = match provider {
            Provider::OpenAi => ENV_OPENAI_TOKEN_URL,
            Provider::Claude => ENV_CLAUDE_TOKEN_URL,
        };
        self.var(name).map(|value| value.to_string())
    }

    pub fn paths(&self) -> StorePaths {
        StorePaths::resolve(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub store_dir: PathBuf,
    pub codex_auth: PathBuf,
    pub claude_credentials: PathBuf,
    pub opencode_auth: PathBuf,
    pub pi_auth: PathBuf,
}

impl StorePaths {
    pub fn resolve(config: &Config) -> Self {
        let home = config.home_dir.as_path();
        let override_path = |name: &str| config.var(name).map(|raw| expand_home(raw, home));

        let store_dir = override_path(ENV_STORE_HOME)
            .unwrap_or_else(|| home.join(".config").join("authsync"));
        let codex_auth = override_path(ENV_CODEX_AUTH_FILE).unwrap_or_else(|| {
            override_path(ENV_CODEX_HOME)
                .unwrap_or_else(|| home.join(".codex"))
                .join("auth.json")
        });
        let claude_credentials =
            override_path(ENV_CLAUDE_CREDENTIALS_FILE).unwrap_or_else(|| {
                override_path(ENV_CLAUDE_CONFIG_DIR)
                    .unwrap_or_else(|| home.join(".claude"))
                    .join(".credentials.json")
            });
        let opencode_auth = override_path(ENV_XDG_DATA_HOME)
            .unwrap_or_else(|| home.join(".local").join("share"))
            .join("opencode")
            .join("auth.json");
        let pi_auth = override_path(ENV_PI_AUTH_FILE)
            .unwrap_or_else(|| home.join(".pi").join("agent").join("auth.json"));

        Self {
            store_dir,
            codex_auth,
            claude_credentials,
            opencode_auth,
            pi_auth,
        }
    }

    pub fn canonical_store(&self, provider: Provider) -> PathBuf {
        let file_name = match provider {
            Provider::OpenAi => "codex-accounts.json",
            Provider::Claude => "claude-accounts.json",
        };
        self.store_dir.join(file_name)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.store_dir.join("logs")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.store_dir.join("locks")
    }
}

fn expand_home(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        return home.to_path_buf();
    }
    match raw.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(raw),
    }
}
