use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::account::Provider;
use crate::atomic::PRIVATE_FILE_MODE;
use crate::json::{token_fingerprint, utc_now_iso};

const LOG_FILE_NAME: &str = "sync.log";
const ROTATED_LOG_FILE_NAME: &str = "sync.log.1";
const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;

// Token-valued keys are written as `<key>_fp` fingerprints.
const TOKEN_KEYS: [&str; 3] = ["access", "refresh", "id_token"];

/// Best-effort JSON-lines event log. Raw tokens never reach the file.
#[derive(Debug, Clone)]
pub struct SyncLogWriter {
    log_dir: PathBuf,
    log_file: PathBuf,
    max_log_bytes: u64,
}

impl SyncLogWriter {
    pub fn new(log_dir: PathBuf) -> Self {
        let log_file = log_dir.join(LOG_FILE_NAME);
        Self {
            log_dir,
            log_file,
            max_log_bytes: MAX_LOG_BYTES,
        }
    }

    #[cfg(test)]
    pub fn log_file(&self) -> &PathBuf {
        &self.log_file
    }

    pub fn write(&self, event: &str, fields: &[(&str, Option<String>)]) {
        let _ = self.write_inner(event, None, fields);
    }

    /// Like [`Self::write`], with the provider stamped ahead of the fields.
    pub fn record(&self, provider: Provider, event: &str, fields: &[(&str, Option<String>)]) {
        let _ = self.write_inner(event, Some(provider), fields);
    }

    fn write_inner(
        &self,
        event: &str,
        provider: Option<Provider>,
        fields: &[(&str, Option<String>)],
    ) -> std::io::Result<()> {
        fs::create_dir_all(&self.log_dir)?;
        self.rotate_if_needed()?;

        let mut payload = Map::new();
        payload.insert("timestamp".to_string(), Value::String(utc_now_iso()));
        payload.insert("event".to_string(), Value::String(event.to_string()));
        if let Some(provider) = provider {
            payload.insert("provider".to_string(), Value::String(provider.to_string()));
        }
        for (key, value) in fields {
            let Some(value) = value else { continue };
            let trimmed = value.trim();
            if trimmed.is_empty() {
                continue;
            }
            if TOKEN_KEYS.contains(key) {
                if let Some(fingerprint) = token_fingerprint(Some(trimmed)) {
                    payload.insert(format!("{}_fp", key), Value::String(fingerprint));
                }
                continue;
            }
            payload.insert((*key).to_string(), Value::String(trimmed.to_string()));
        }

        let line = match serde_json::to_string(&Value::Object(payload)) {
            Ok(value) => format!("{}\n", value),
            Err(_) => return Ok(()),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;
        let _ = file.set_permissions(fs::Permissions::from_mode(PRIVATE_FILE_MODE));
        file.write_all(line.as_bytes())
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match fs::metadata(&self.log_file) {
            Ok(metadata) => metadata.len(),
            Err(_) => return Ok(()),
        };
        if size <= self.max_log_bytes {
            return Ok(());
        }
        let rotated = self.log_dir.join(ROTATED_LOG_FILE_NAME);
        if rotated.exists() {
            let _ = fs::remove_file(&rotated);
        }
        fs::rename(&self.log_file, rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_lines(writer: &SyncLogWriter) -> Vec<Value> {
        fs::read_to_string(writer.log_file())
            .expect("read log")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    #[test]
    fn writes_event_lines_and_drops_empty_fields() {
        let temp = TempDir::new().expect("temp dir");
        let writer = SyncLogWriter::new(temp.path().join("logs"));
        writer.write(
            "sync_start",
            &[
                ("provider", Some("claude".to_string())),
                ("label", Some("  ".to_string())),
                ("refresh_fp", None),
            ],
        );
        writer.write("sync_done", &[]);

        let lines = read_lines(&writer);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "sync_start");
        assert_eq!(lines[0]["provider"], "claude");
        assert!(lines[0].get("label").is_none());
        assert!(lines[0].get("refresh_fp").is_none());
        assert!(lines[1]["timestamp"].is_string());

        let mode = fs::metadata(writer.log_file()).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn record_stamps_provider_and_fingerprints_tokens() {
        let temp = TempDir::new().expect("temp dir");
        let writer = SyncLogWriter::new(temp.path().join("logs"));
        writer.record(
            Provider::Claude,
            "sync_recovery",
            &[
                ("store", Some("opencode".to_string())),
                ("refresh", Some("secret-refresh".to_string())),
                ("access", None),
            ],
        );

        let raw = fs::read_to_string(writer.log_file()).expect("read log");
        assert!(!raw.contains("secret-refresh"));
        let lines = read_lines(&writer);
        assert_eq!(lines[0]["provider"], "claude");
        assert_eq!(lines[0]["store"], "opencode");
        assert_eq!(
            lines[0]["refresh_fp"],
            Value::String(token_fingerprint(Some("secret-refresh")).expect("fingerprint"))
        );
        assert!(lines[0].get("refresh").is_none());
        assert!(lines[0].get("access_fp").is_none());
    }

    #[test]
    fn rotates_past_size_limit() {
        let temp = TempDir::new().expect("temp dir");
        let mut writer = SyncLogWriter::new(temp.path().join("logs"));
        writer.max_log_bytes = 10;
        writer.write("first", &[("detail", Some("x".repeat(32)))]);
        writer.write("second", &[]);

        let rotated = temp.path().join("logs").join(ROTATED_LOG_FILE_NAME);
        assert!(fs::read_to_string(rotated).expect("rotated").contains("first"));
        let lines = read_lines(&writer);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event"], "second");
    }
}
