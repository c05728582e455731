mod account;
mod atomic;
mod container;
mod coordinator;
mod divergence;
mod env_accounts;
mod error;
mod freshness;
mod json;
mod lock;
mod log;
mod matcher;
mod normalize;
mod paths;
mod recovery;
mod refresh;
mod stores;
mod usage;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Read;
use std::path::PathBuf;

use crate::account::Provider;
use crate::coordinator::{
    AccountReport, Coordinator, ImportSource, ListReport, QuotaReport, RemoveReport, StatusReport,
    SyncOptions, SyncReport,
};
use crate::divergence::MigrationMode;
use crate::error::{CliError, CliResult};
use crate::paths::Config;
use crate::usage::format_usage_window;

const USAGE_TEXT: &str = "authsync - keep CLI OAuth credentials in sync across tools\n\n\
     Usage:\n\
       authsync <codex|claude> switch <label> [--dry-run]   Make <label> active and push it to peer stores\n\
       authsync <codex|claude> sync [--dry-run]             Pull, refresh and push the active account\n\
       authsync <codex|claude> list                         List stored and env accounts\n\
       authsync <codex|claude> status [--no-migrate]        Compare the active account with peer stores\n\
       authsync <codex|claude> remove <label> [--dry-run]   Delete a stored account\n\
       authsync <codex|claude> add <label> [--paste]        Store the native CLI credential (or stdin JSON)\n\
       authsync <codex|claude> reauth <label> [--paste]     Replace a stored account's credential\n\
       authsync <codex|claude> quota [label]                Show usage windows for an account\n\
       authsync help                                        Show this help\n\n\
     Every command accepts --json.";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Switch(String),
    Sync,
    List,
    Status { migrate: bool },
    Remove(String),
    Add { label: String, paste: bool },
    Reauth { label: String, paste: bool },
    Quota(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Help,
    Run {
        provider: Provider,
        command: Command,
        json: bool,
        dry_run: bool,
    },
}

impl CliCommand {
    fn parse(args: &[String]) -> CliResult<Self> {
        let Some(first) = args.first() else {
            return Ok(Self::Help);
        };
        if matches!(first.as_str(), "-h" | "--help" | "help") {
            return Ok(Self::Help);
        }
        let provider = Provider::parse(first)
            .ok_or_else(|| CliError::usage(format!("unknown provider: {}", first)))?;

        let mut json = false;
        let mut dry_run = false;
        let mut paste = false;
        let mut migrate = true;
        let mut positional = Vec::new();
        for arg in &args[1..] {
            match arg.as_str() {
                "--json" => json = true,
                "--dry-run" => dry_run = true,
                "--paste" => paste = true,
                "--no-migrate" => migrate = false,
                "-h" | "--help" => return Ok(Self::Help),
                flag if flag.starts_with("--") => {
                    return Err(CliError::usage(format!("unknown option: {}", flag)));
                }
                _ => positional.push(arg.clone()),
            }
        }

        let Some((name, rest)) = positional.split_first() else {
            return Err(CliError::usage(format!("usage: authsync {} <command>", provider_arg(provider))));
        };
        let usage = |shape: &str| {
            CliError::usage(format!("usage: authsync {} {}", provider_arg(provider), shape))
        };
        let command = match (name.as_str(), rest) {
            ("switch", [label]) => Command::Switch(label.clone()),
            ("switch", _) => return Err(usage("switch <label> [--dry-run]")),
            ("sync", []) => Command::Sync,
            ("sync", _) => return Err(usage("sync [--dry-run]")),
            ("list" | "ls", []) => Command::List,
            ("list" | "ls", _) => return Err(usage("list")),
            ("status", []) => Command::Status { migrate },
            ("status", _) => return Err(usage("status [--no-migrate]")),
            ("remove" | "rm", [label]) => Command::Remove(label.clone()),
            ("remove" | "rm", _) => return Err(usage("remove <label> [--dry-run]")),
            ("add", [label]) => Command::Add {
                label: label.clone(),
                paste,
            },
            ("add", _) => return Err(usage("add <label> [--paste]")),
            ("reauth", [label]) => Command::Reauth {
                label: label.clone(),
                paste,
            },
            ("reauth", _) => return Err(usage("reauth <label> [--paste]")),
            ("quota", []) => Command::Quota(None),
            ("quota", [label]) => Command::Quota(Some(label.clone())),
            ("quota", _) => return Err(usage("quota [label]")),
            (other, _) => return Err(CliError::usage(format!("unknown command: {}", other))),
        };

        if paste && !matches!(command, Command::Add { .. } | Command::Reauth { .. }) {
            return Err(CliError::usage("--paste only applies to add and reauth"));
        }
        if !migrate && !matches!(command, Command::Status { .. }) {
            return Err(CliError::usage("--no-migrate only applies to status"));
        }
        if dry_run && !matches!(command, Command::Switch(_) | Command::Sync | Command::Remove(_)) {
            return Err(CliError::usage("--dry-run only applies to switch, sync and remove"));
        }
        Ok(Self::Run {
            provider,
            command,
            json,
            dry_run,
        })
    }
}

fn provider_arg(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "codex",
        Provider::Claude => "claude",
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let json = args.iter().any(|arg| arg == "--json");
    if let Err(err) = run(&args) {
        if json {
            println!("{}", error_envelope(&err));
        } else {
            eprintln!("authsync: {}", err.message);
        }
        std::process::exit(err.exit_code);
    }
}

fn run(args: &[String]) -> CliResult<()> {
    let command = CliCommand::parse(args)?;
    let CliCommand::Run {
        provider,
        command,
        json,
        dry_run,
    } = command
    else {
        println!("{}", USAGE_TEXT);
        return Ok(());
    };

    let config = Config::from_process_env(default_home_dir());
    let output = Output {
        json,
        color: !config.no_color(),
    };
    let coordinator = Coordinator::new(config);
    let options = SyncOptions {
        dry_run,
        ..SyncOptions::default()
    };

    match command {
        Command::Switch(label) => {
            let report = coordinator.switch(provider, &label, &options)?;
            output.emit(&report, |style| render_sync(style, &report))
        }
        Command::Sync => {
            let report = coordinator.sync(provider, &options)?;
            output.emit(&report, |style| render_sync(style, &report))
        }
        Command::List => {
            let report = coordinator.list(provider)?;
            output.emit(&report, |style| render_list(style, &report))
        }
        Command::Status { migrate } => {
            let mode = if migrate {
                MigrationMode::Allow
            } else {
                MigrationMode::Disallow
            };
            let report = coordinator.with_migration_mode(mode).status(provider)?;
            output.emit(&report, |style| render_status(style, &report))
        }
        Command::Remove(label) => {
            let report = coordinator.remove(provider, &label, dry_run)?;
            output.emit(&report, |style| render_remove(style, &report))
        }
        Command::Add { label, paste } => {
            let source = import_source(paste)?;
            let report = coordinator.add(provider, &label, &source)?;
            output.emit(&report, |style| render_account(style, &report))
        }
        Command::Reauth { label, paste } => {
            let source = import_source(paste)?;
            let report = coordinator.reauth(provider, &label, &source)?;
            output.emit(&report, |style| render_account(style, &report))
        }
        Command::Quota(label) => {
            let report = coordinator.quota(provider, label.as_deref())?;
            output.emit(&report, |style| render_quota(style, &report))
        }
    }
}

fn default_home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn import_source(paste: bool) -> CliResult<ImportSource> {
    if !paste {
        return Ok(ImportSource::NativeStore);
    }
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .map_err(|err| CliError::new(format!("failed to read stdin: {}", err), 1))?;
    Ok(ImportSource::Json(text))
}

fn success_envelope<T: Serialize>(report: &T) -> CliResult<Value> {
    let body = serde_json::to_value(report)
        .map_err(|err| CliError::new(format!("failed to serialize output: {}", err), 1))?;
    let mut envelope = Map::new();
    envelope.insert("success".to_string(), Value::Bool(true));
    if let Value::Object(fields) = body {
        envelope.extend(fields);
    }
    Ok(Value::Object(envelope))
}

fn error_envelope(err: &CliError) -> Value {
    serde_json::json!({
        "success": false,
        "error": err.message,
        "kind": err.kind,
        "exitCode": err.exit_code,
    })
}

struct Style {
    color: bool,
}

impl Style {
    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: &str) -> String {
        self.paint("1", text)
    }

    fn warn(&self, text: &str) -> String {
        self.paint("33", &format!("warning: {}", text))
    }

    fn alert(&self, text: &str) -> String {
        self.paint("31", text)
    }
}

struct Output {
    json: bool,
    color: bool,
}

impl Output {
    fn emit<T, F>(&self, report: &T, render: F) -> CliResult<()>
    where
        T: Serialize,
        F: FnOnce(&Style) -> Vec<String>,
    {
        if self.json {
            let envelope = success_envelope(report)?;
            let text = serde_json::to_string_pretty(&envelope)
                .map_err(|err| CliError::new(format!("failed to serialize output: {}", err), 1))?;
            println!("{}", text);
            return Ok(());
        }
        for line in render(&Style { color: self.color }) {
            println!("{}", line);
        }
        Ok(())
    }
}

fn format_expiry(expires_ms: Option<i64>) -> String {
    expires_ms
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|date| date.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "--".to_string())
}

fn push_warnings(style: &Style, lines: &mut Vec<String>, warnings: &[String]) {
    lines.extend(warnings.iter().map(|warning| style.warn(warning)));
}

fn render_sync(style: &Style, report: &SyncReport) -> Vec<String> {
    let prefix = if report.dry_run { "dry run: " } else { "" };
    let mut lines = vec![format!(
        "{}{} {}",
        prefix,
        report.provider,
        style.bold(&report.active_label)
    )];
    for path in &report.pulled_paths {
        lines.push(format!("  pulled   {}", path.display()));
    }
    if report.refreshed {
        lines.push("  refreshed access token".to_string());
    }
    if report.refresh_due {
        lines.push("  refresh due".to_string());
    }
    if let Some(store) = &report.recovered_from {
        lines.push(format!("  recovered from {}", store));
    }
    for path in &report.updated_paths {
        lines.push(format!("  updated  {}", path.display()));
    }
    for path in &report.unchanged_paths {
        lines.push(format!("  current  {}", path.display()));
    }
    for path in &report.skipped_paths {
        lines.push(format!("  missing  {}", path.display()));
    }
    push_warnings(style, &mut lines, &report.warnings);
    lines
}

fn render_list(style: &Style, report: &ListReport) -> Vec<String> {
    if report.accounts.is_empty() {
        let mut lines = vec![format!("no {} accounts", report.provider)];
        push_warnings(style, &mut lines, &report.warnings);
        return lines;
    }
    let mut lines = report
        .accounts
        .iter()
        .map(|summary| {
            let marker = if summary.active { "*" } else { " " };
            let label = if summary.active {
                style.bold(&summary.label)
            } else {
                summary.label.clone()
            };
            let state = match summary.expiry_state {
                "expired" => style.alert(summary.expiry_state),
                other => other.to_string(),
            };
            format!(
                "{} {} [{}] {} {} {}",
                marker,
                label,
                summary.source,
                summary.account_id.as_deref().unwrap_or("-"),
                state,
                format_expiry(summary.expires_ms)
            )
        })
        .collect::<Vec<_>>();
    push_warnings(style, &mut lines, &report.warnings);
    lines
}

fn render_status(style: &Style, report: &StatusReport) -> Vec<String> {
    let divergence = &report.divergence;
    let active = divergence.active_label.as_deref().unwrap_or("-");
    let mut lines = Vec::new();
    if let Some(label) = &divergence.migrated_label {
        lines.push(format!("active label migrated to {}", label));
    }
    let headline = if divergence.skipped {
        format!(
            "{} {}: not checked ({})",
            divergence.provider,
            active,
            divergence.skip_reason.as_deref().unwrap_or("unknown")
        )
    } else if divergence.diverged {
        style.alert(&format!("{} {}: diverged", divergence.provider, active))
    } else {
        format!("{} {}: in sync", divergence.provider, active)
    };
    lines.push(headline);
    if let Some(label) = &divergence.cli_label {
        lines.push(format!("  native CLI holds {}", label));
    }
    for store in &divergence.per_store {
        let state = match (store.considered, store.matches) {
            (false, _) => "not comparable",
            (true, true) => "matches",
            (true, false) => "differs",
        };
        lines.push(format!("  {:<10} {}", store.name, state));
    }
    push_warnings(style, &mut lines, &report.warnings);
    lines
}

fn render_remove(style: &Style, report: &RemoveReport) -> Vec<String> {
    let prefix = if report.dry_run { "dry run: " } else { "" };
    let mut lines = vec![format!("{}removed {} {}", prefix, report.provider, report.label)];
    if report.active_cleared {
        lines.push("  active label cleared".to_string());
    }
    if report.marker_cleared {
        lines.push("  native CLI label marker cleared".to_string());
    }
    push_warnings(style, &mut lines, &report.warnings);
    lines
}

fn render_account(style: &Style, report: &AccountReport) -> Vec<String> {
    let verb = if report.created { "added" } else { "reauthenticated" };
    let mut lines = vec![format!(
        "{} {} {} from {}",
        verb,
        report.provider,
        style.bold(&report.label),
        report.source
    )];
    if let Some(account_id) = &report.account_id {
        lines.push(format!("  account  {}", account_id));
    }
    lines.push(format!("  expires  {}", format_expiry(report.expires_ms)));
    if report.active {
        lines.push("  active".to_string());
    }
    push_warnings(style, &mut lines, &report.warnings);
    lines
}

fn render_quota(style: &Style, report: &QuotaReport) -> Vec<String> {
    let now = Utc::now();
    vec![format!(
        "{}: {} 5h {} 7d {}",
        style.bold(&report.label),
        report.usage.plan.as_deref().unwrap_or("-"),
        format_usage_window(&report.usage.five_hour, now),
        format_usage_window(&report.usage.seven_day, now)
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parse_reads_provider_command_and_flags() {
        assert_eq!(CliCommand::parse(&args(&[])).expect("parse"), CliCommand::Help);
        assert_eq!(CliCommand::parse(&args(&["help"])).expect("parse"), CliCommand::Help);
        assert_eq!(
            CliCommand::parse(&args(&["codex", "switch", "work", "--json", "--dry-run"])).expect("parse"),
            CliCommand::Run {
                provider: Provider::OpenAi,
                command: Command::Switch("work".to_string()),
                json: true,
                dry_run: true,
            }
        );
        assert_eq!(
            CliCommand::parse(&args(&["claude", "--paste", "add", "main"])).expect("parse"),
            CliCommand::Run {
                provider: Provider::Claude,
                command: Command::Add {
                    label: "main".to_string(),
                    paste: true
                },
                json: false,
                dry_run: false,
            }
        );
        assert_eq!(
            CliCommand::parse(&args(&["codex", "status", "--no-migrate"])).expect("parse"),
            CliCommand::Run {
                provider: Provider::OpenAi,
                command: Command::Status { migrate: false },
                json: false,
                dry_run: false,
            }
        );
        assert_eq!(
            CliCommand::parse(&args(&["claude", "quota"])).expect("parse"),
            CliCommand::Run {
                provider: Provider::Claude,
                command: Command::Quota(None),
                json: false,
                dry_run: false,
            }
        );
    }

    #[test]
    fn parse_rejects_bad_usage_with_exit_code_two() {
        for bad in [
            vec!["gemini", "sync"],
            vec!["codex"],
            vec!["codex", "switch"],
            vec!["codex", "sync", "extra"],
            vec!["codex", "list", "--dry-run"],
            vec!["codex", "sync", "--paste"],
            vec!["codex", "sync", "--force"],
            vec!["codex", "sync", "--no-migrate"],
            vec!["claude", "launch"],
        ] {
            let err = CliCommand::parse(&args(&bad)).expect_err("usage error");
            assert_eq!(err.exit_code, 2, "{:?}", bad);
        }
    }

    #[test]
    fn json_envelopes_carry_success_flag() {
        let report = RemoveReport {
            provider: Provider::Claude,
            label: "main".to_string(),
            dry_run: false,
            active_cleared: true,
            marker_cleared: false,
            warnings: Vec::new(),
        };
        let envelope = success_envelope(&report).expect("envelope");
        assert_eq!(envelope["success"], Value::Bool(true));
        assert_eq!(envelope["label"], serde_json::json!("main"));
        assert_eq!(envelope["activeCleared"], Value::Bool(true));
        assert_eq!(
            envelope.as_object().and_then(|fields| fields.keys().next().cloned()),
            Some("success".to_string())
        );

        let err = CliError::from(error::AuthError::NotFound {
            label: "ghost".to_string(),
        });
        let envelope = error_envelope(&err);
        assert_eq!(envelope["success"], Value::Bool(false));
        assert_eq!(envelope["exitCode"], serde_json::json!(1));
        assert!(envelope["error"].as_str().expect("message").contains("ghost"));
    }

    #[test]
    fn text_rendering_respects_color_setting() {
        let plain = Style { color: false };
        let colored = Style { color: true };
        assert_eq!(plain.warn("x"), "warning: x");
        assert_eq!(colored.warn("x"), "\x1b[33mwarning: x\x1b[0m");
        assert_eq!(format_expiry(None), "--");
        assert_eq!(format_expiry(Some(0)), "1970-01-01T00:00:00Z");
    }
}
