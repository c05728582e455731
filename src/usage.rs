use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::account::Provider;
use crate::error::{AuthError, AuthResult};
use crate::json::{get_path_value, truncate_chars, value_as_f64, value_as_string};
use crate::refresh::{REFRESH_TIMEOUT_SECS, USER_AGENT};

const CLAUDE_USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";
const OPENAI_USAGE_URL: &str = "https://chatgpt.com/backend-api/wham/usage";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageWindow {
    pub percent: Option<i32>,
    pub resets_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    pub five_hour: UsageWindow,
    pub seven_day: UsageWindow,
}

#[derive(Debug, Clone)]
pub struct UsageRequest {
    pub access_token: String,
    pub account_id: Option<String>,
}

pub type UsageClient = Arc<dyn Fn(Provider, &UsageRequest) -> AuthResult<UsageSnapshot> + Send + Sync>;

pub fn default_usage_client() -> UsageClient {
    Arc::new(fetch_usage)
}

fn fetch_usage(provider: Provider, request: &UsageRequest) -> AuthResult<UsageSnapshot> {
    let http_error = |message: String| AuthError::Http { provider, message };
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(REFRESH_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|err| http_error(format!("failed to build HTTP client: {}", err)))?;

    let mut builder = match provider {
        Provider::Claude => client
            .get(CLAUDE_USAGE_URL)
            .header("anthropic-beta", "oauth-2025-04-20"),
        Provider::OpenAi => client.get(OPENAI_USAGE_URL),
    };
    builder = builder
        .header("Accept", "application/json")
        .bearer_auth(&request.access_token);
    if provider == Provider::OpenAi {
        let account_id = request
            .account_id
            .as_deref()
            .ok_or_else(|| http_error("account id is required for usage".to_string()))?;
        builder = builder.header("ChatGPT-Account-Id", account_id);
    }

    let response = builder.send().map_err(|err| {
        if err.is_timeout() {
            AuthError::Timeout {
                provider,
                seconds: REFRESH_TIMEOUT_SECS,
            }
        } else {
            http_error(err.to_string())
        }
    })?;
    let status = response.status();
    let text = response
        .text()
        .map_err(|err| http_error(format!("failed to read usage response: {}", err)))?;
    if !status.is_success() {
        return Err(http_error(format!(
            "usage request failed ({}): {}",
            status.as_u16(),
            truncate_chars(text.trim(), 200)
        )));
    }
    let root = serde_json::from_str::<Value>(&text)
        .map_err(|err| http_error(format!("usage response is not JSON: {}", err)))?;
    Ok(match provider {
        Provider::Claude => parse_claude_usage(&root),
        Provider::OpenAi => parse_openai_usage(&root),
    })
}

pub fn parse_claude_usage(root: &Value) -> UsageSnapshot {
    let window = |key: &str| {
        let window = root.get(key);
        UsageWindow {
            percent: window
                .and_then(|window| window.get("utilization"))
                .and_then(value_as_f64)
                .map(|value| value.round() as i32),
            resets_at: window
                .and_then(|window| window.get("resets_at"))
                .and_then(parse_date_value)
                .map(|date| date.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    };
    UsageSnapshot {
        plan: None,
        five_hour: window("five_hour"),
        seven_day: window("seven_day"),
    }
}

pub fn parse_openai_usage(root: &Value) -> UsageSnapshot {
    let window = |key: &str| {
        let window = get_path_value(root, &["rate_limit", key]);
        UsageWindow {
            percent: window
                .and_then(|window| window.get("used_percent"))
                .and_then(value_as_f64)
                .map(|value| value.round() as i32),
            resets_at: window
                .and_then(|window| window.get("reset_at"))
                .and_then(parse_date_value)
                .map(|date| date.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    };
    UsageSnapshot {
        plan: value_as_string(root.get("plan_type")),
        five_hour: window("primary_window"),
        seven_day: window("secondary_window"),
    }
}

fn parse_date_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => number.as_f64().and_then(date_from_timestamp),
        Value::String(raw) => {
            if let Ok(number) = raw.trim().parse::<f64>() {
                return date_from_timestamp(number);
            }
            DateTime::parse_from_rfc3339(raw.trim())
                .ok()
                .map(|date| date.with_timezone(&Utc))
        }
        _ => None,
    }
}

fn date_from_timestamp(timestamp: f64) -> Option<DateTime<Utc>> {
    if !timestamp.is_finite() || timestamp <= 0.0 {
        return None;
    }
    let milliseconds = if timestamp > 1_000_000_000_000.0 {
        timestamp
    } else if timestamp > 1_000_000_000.0 {
        timestamp * 1000.0
    } else {
        return None;
    };
    DateTime::<Utc>::from_timestamp_millis(milliseconds.round() as i64)
}

pub fn format_duration(seconds: i64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}

/// `42% (resets in 1h 3m)`; `--` for unknown parts.
pub fn format_usage_window(window: &UsageWindow, now: DateTime<Utc>) -> String {
    let percent_text = window
        .percent
        .map(|value| format!("{}%", value))
        .unwrap_or_else(|| "--".to_string());
    let reset_text = window
        .resets_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|date| {
            let remaining = (date.with_timezone(&Utc) - now).num_seconds();
            if remaining <= 0 {
                "reset due".to_string()
            } else {
                format!("resets in {}", format_duration(remaining))
            }
        })
        .unwrap_or_else(|| "--".to_string());
    format!("{} ({})", percent_text, reset_text)
}
