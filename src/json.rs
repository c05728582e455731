use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub fn get_path_value<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = current.get(*segment)?;
    }
    Some(current)
}

pub fn get_path_string(root: &Value, path: &[&str]) -> Option<String> {
    value_as_string(get_path_value(root, path))
}

pub fn value_as_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// `now + seconds` in milliseconds; `None` when the result leaves the `i64` range.
pub fn expiry_after_seconds(now_ms: i64, seconds: f64) -> Option<i64> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    let delta = (seconds * 1000.0).round();
    if delta >= i64::MAX as f64 {
        return None;
    }
    now_ms.checked_add(delta as i64)
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|raw| raw.is_finite()).map(|raw| raw as i64)),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn normalize_scope_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(list) => list
            .iter()
            .filter_map(|item| value_as_string(Some(item)))
            .collect(),
        Value::String(raw) => normalize_scope_string(raw),
        _ => Vec::new(),
    }
}

pub fn normalize_scope_string(raw: &str) -> Vec<String> {
    raw.split(' ')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect()
}

pub fn decode_jwt_payload(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let _signature = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let payload_data = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .or_else(|_| URL_SAFE.decode(payload.as_bytes()))
        .ok()?;
    let payload_root = serde_json::from_slice::<Value>(&payload_data).ok()?;
    if payload_root.is_object() {
        Some(payload_root)
    } else {
        None
    }
}

pub fn short_hash_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)[..16].to_string()
}

/// Loggable stand-in for a secret; never the secret itself.
pub fn token_fingerprint(token: Option<&str>) -> Option<String> {
    let raw = token?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(short_hash_hex(raw.as_bytes()))
}

pub fn truncate_chars(raw: &str, max_chars: usize) -> String {
    raw.chars().take(max_chars).collect::<String>()
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn encode_pretty(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_as_string_trims_and_drops_empty() {
        assert_eq!(
            value_as_string(Some(&json!("  tok  "))).as_deref(),
            Some("tok")
        );
        assert_eq!(value_as_string(Some(&json!("   "))), None);
        assert_eq!(value_as_string(Some(&json!(12))), None);
    }

    #[test]
    fn value_as_i64_accepts_floats_and_strings() {
        assert_eq!(value_as_i64(&json!(1_700_000_000_000i64)), Some(1_700_000_000_000));
        assert_eq!(value_as_i64(&json!(12.9)), Some(12));
        assert_eq!(value_as_i64(&json!(" 42 ")), Some(42));
        assert_eq!(value_as_i64(&json!(null)), None);
    }

    #[test]
    fn expiry_after_seconds_rejects_out_of_range_values() {
        assert_eq!(expiry_after_seconds(10_000, 3600.0), Some(3_610_000));
        assert_eq!(expiry_after_seconds(10_000, 0.0), None);
        assert_eq!(expiry_after_seconds(10_000, f64::NAN), None);
        assert_eq!(expiry_after_seconds(10_000, 1e300), None);
        assert_eq!(expiry_after_seconds(i64::MAX - 10, 1.0), None);
    }

    #[test]
    fn decode_jwt_payload_rejects_non_jwt() {
        assert!(decode_jwt_payload("opaque-token").is_none());
        assert!(decode_jwt_payload("a.b.c.d").is_none());
        let payload = URL_SAFE_NO_PAD.encode(br#"{"exp":5}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(
            decode_jwt_payload(&token).and_then(|root| root.get("exp").cloned()),
            Some(json!(5))
        );
    }

    #[test]
    fn token_fingerprint_is_short_and_stable() {
        let first = token_fingerprint(Some("rt-1")).expect("fingerprint");
        assert_eq!(first.len(), 16);
        assert_eq!(token_fingerprint(Some(" rt-1 ")), Some(first));
        assert_eq!(token_fingerprint(Some("")), None);
        assert_eq!(token_fingerprint(None), None);
    }

    #[test]
    fn encode_pretty_ends_with_newline() {
        let data = encode_pretty(&json!({"a": 1})).expect("encode");
        assert_eq!(data.last(), Some(&b'\n'));
    }
}
