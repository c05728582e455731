use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::account::{jwt_expiry_ms, Provider, TokenSet};
use crate::error::{AuthError, AuthResult};
use crate::json::{
    expiry_after_seconds, normalize_scope_string, truncate_chars, value_as_f64, value_as_string,
};
use crate::paths::Config;

pub const REFRESH_TIMEOUT_SECS: u64 = 120;
pub const USER_AGENT: &str = "authsync/0.1";

const OPENAI_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const OPENAI_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const CLAUDE_TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
const CLAUDE_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPayload {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<f64>,
    pub id_token: Option<String>,
    pub scope: Option<String>,
}

pub type RefreshClient = Arc<dyn Fn(Provider, &str) -> AuthResult<RefreshPayload> + Send + Sync>;

#[derive(Debug, Clone)]
struct TokenEndpoint {
    url: String,
    client_id: &'static str,
}

fn token_endpoint(config: &Config, provider: Provider) -> TokenEndpoint {
    let (default_url, client_id) = match provider {
        Provider::OpenAi => (OPENAI_TOKEN_URL, OPENAI_CLIENT_ID),
        Provider::Claude => (CLAUDE_TOKEN_URL, CLAUDE_CLIENT_ID),
    };
    TokenEndpoint {
        url: config
            .token_endpoint_override(provider)
            .unwrap_or_else(|| default_url.to_string()),
        client_id,
    }
}

pub fn default_refresh_client(config: &Config) -> RefreshClient {
    let openai = token_endpoint(config, Provider::OpenAi);
    let claude = token_endpoint(config, Provider::Claude);
    Arc::new(move |provider: Provider, refresh_token: &str| {
        let endpoint = match provider {
            Provider::OpenAi => &openai,
            Provider::Claude => &claude,
        };
        request_refresh(provider, endpoint, refresh_token)
    })
}

fn request_refresh(
    provider: Provider,
    endpoint: &TokenEndpoint,
    refresh_token: &str,
) -> AuthResult<RefreshPayload> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(REFRESH_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|err| AuthError::Http {
            provider,
            message: format!("failed to build HTTP client: {}", err),
        })?;

    // OpenAI takes a form body; Claude takes JSON.
    let request = match provider {
        Provider::OpenAi => client.post(&endpoint.url).form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", endpoint.client_id),
        ]),
        Provider::Claude => client.post(&endpoint.url).json(&serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": endpoint.client_id,
        })),
    };

    let transport_error = |err: reqwest::Error| {
        if err.is_timeout() {
            AuthError::Timeout {
                provider,
                seconds: REFRESH_TIMEOUT_SECS,
            }
        } else {
            AuthError::Http {
                provider,
                message: err.to_string(),
            }
        }
    };
    let response = request
        .header("Accept", "application/json")
        .send()
        .map_err(transport_error)?;
    let status = response.status().as_u16();
    let text = response.text().map_err(transport_error)?;
    parse_refresh_response(provider, status, &text)
}

pub fn parse_refresh_response(
    provider: Provider,
    status: u16,
    text: &str,
) -> AuthResult<RefreshPayload> {
    let refresh_error = |status: u16, body: &str| AuthError::Refresh {
        provider,
        status,
        body_snippet: truncate_chars(body.trim(), BODY_SNIPPET_CHARS),
    };
    if !(200..300).contains(&status) {
        return Err(refresh_error(status, text));
    }

    let root = match serde_json::from_str::<Value>(text) {
        Ok(root @ Value::Object(_)) => root,
        _ => return Err(refresh_error(status, "response is not a JSON object")),
    };
    let access_token = value_as_string(root.get("access_token"))
        .ok_or_else(|| refresh_error(status, "response missing access_token"))?;

    Ok(RefreshPayload {
        access_token,
        refresh_token: value_as_string(root.get("refresh_token")),
        expires_in: root.get("expires_in").and_then(value_as_f64),
        id_token: value_as_string(root.get("id_token")),
        scope: value_as_string(root.get("scope")),
    })
}

/// The refresh token is kept unless rotated. Expiry is `now + expires_in`,
/// else the new access token's JWT `exp`, else unknown.
pub fn apply_refresh(
    provider: Provider,
    previous: &TokenSet,
    payload: RefreshPayload,
    now_ms: i64,
) -> TokenSet {
    let expires_ms = payload
        .expires_in
        .and_then(|seconds| expiry_after_seconds(now_ms, seconds))
        .or_else(|| jwt_expiry_ms(&payload.access_token));

    let mut next = TokenSet {
        access: Some(payload.access_token),
        refresh: payload.refresh_token.or_else(|| previous.refresh.clone()),
        expires_ms,
        scopes: payload
            .scope
            .map(|scope| normalize_scope_string(&scope))
            .filter(|scopes| !scopes.is_empty())
            .or_else(|| previous.scopes.clone()),
        account_id: previous.account_id.clone(),
        id_token: payload.id_token.or_else(|| previous.id_token.clone()),
    };
    if provider == Provider::OpenAi {
        next.fill_openai_claims();
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::test_support::openai_jwt;
    use std::path::PathBuf;

    fn previous() -> TokenSet {
        TokenSet {
            access: Some("old".to_string()),
            refresh: Some("R".to_string()),
            expires_ms: Some(1),
            scopes: Some(vec!["user:inference".to_string()]),
            account_id: None,
            id_token: Some("old-id".to_string()),
        }
    }

    #[test]
    fn non_success_status_becomes_refresh_error_with_snippet() {
        let body = format!("{{\"error\":\"invalid_grant\"}}{}", "x".repeat(500));
        let err = parse_refresh_response(Provider::Claude, 400, &body).expect_err("400");
        match err {
            AuthError::Refresh {
                status,
                body_snippet,
                ..
            } => {
                assert_eq!(status, 400);
                assert!(body_snippet.starts_with("{\"error\":\"invalid_grant\"}"));
                assert_eq!(body_snippet.chars().count(), BODY_SNIPPET_CHARS);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn success_without_access_token_is_an_error() {
        assert!(matches!(
            parse_refresh_response(Provider::OpenAi, 200, r#"{"refresh_token":"x"}"#),
            Err(AuthError::Refresh { status: 200, .. })
        ));
        assert!(parse_refresh_response(Provider::OpenAi, 200, "not json").is_err());
    }

    #[test]
    fn apply_keeps_refresh_token_and_computes_expiry() {
        let payload = parse_refresh_response(
            Provider::Claude,
            200,
            r#"{"access_token":"A3","expires_in":3600}"#,
        )
        .expect("payload");
        let next = apply_refresh(Provider::Claude, &previous(), payload, 10_000);
        assert_eq!(next.access.as_deref(), Some("A3"));
        assert_eq!(next.refresh.as_deref(), Some("R"));
        assert_eq!(next.expires_ms, Some(10_000 + 3_600_000));
        assert_eq!(next.scopes, previous().scopes);
        assert_eq!(next.id_token.as_deref(), Some("old-id"));
    }

    #[test]
    fn apply_takes_rotated_values_and_jwt_fallbacks() {
        let access = openai_jwt("acct-9", 2_000_000_000);
        let payload = RefreshPayload {
            access_token: access,
            refresh_token: Some("R2".to_string()),
            expires_in: None,
            id_token: Some("new-id".to_string()),
            scope: Some("a b".to_string()),
        };
        let next = apply_refresh(Provider::OpenAi, &previous(), payload, 0);
        assert_eq!(next.refresh.as_deref(), Some("R2"));
        assert_eq!(next.expires_ms, Some(2_000_000_000_000));
        assert_eq!(next.account_id.as_deref(), Some("acct-9"));
        assert_eq!(next.id_token.as_deref(), Some("new-id"));
        assert_eq!(next.scopes, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn huge_expires_in_falls_back_to_unknown_expiry() {
        let payload = RefreshPayload {
            access_token: "A4".to_string(),
            refresh_token: None,
            expires_in: Some(1e300),
            id_token: None,
            scope: None,
        };
        let next = apply_refresh(Provider::Claude, &previous(), payload, 10_000);
        assert_eq!(next.access.as_deref(), Some("A4"));
        assert_eq!(next.expires_ms, None);
    }

    #[test]
    fn endpoint_override_is_honored() {
        let config = Config::with_vars(
            PathBuf::from("/home/u"),
            &[(crate::paths::ENV_CLAUDE_TOKEN_URL, "http://127.0.0.1:9/token")],
        );
        assert_eq!(token_endpoint(&config, Provider::Claude).url, "http://127.0.0.1:9/token");
        assert_eq!(token_endpoint(&config, Provider::OpenAi).url, OPENAI_TOKEN_URL);
    }
}
