use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;

pub fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Append-only JSONL event sink. A failed write is logged and dropped; it
/// never interrupts a session.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    enabled: bool,
    path: PathBuf,
    run_id: String,
    command: String,
    file_lock: Arc<Mutex<()>>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, command: String) -> Self {
        Self {
            enabled: cfg.telemetry_enabled,
            path: PathBuf::from(&cfg.telemetry_path),
            run_id: format!("run-{}-{}", unix_ms_now(), std::process::id()),
            command,
            file_lock: Arc::new(Mutex::new(())),
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
            run_id: "run-test".to_string(),
            command: "test".to_string(),
            file_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Emit one event. Payload keys are flattened into the envelope so the
    /// stream stays one flat object per line.
    pub fn emit(&self, event: &str, payload: Value) {
        if !self.enabled {
            return;
        }

        let mut record = json!({
            "ts_unix_ms": unix_ms_now(),
            "event": event,
            "run_id": self.run_id,
            "command": self.command,
        });
        if let (Some(envelope), Some(extra)) = (record.as_object_mut(), payload.as_object()) {
            for (key, value) in extra {
                envelope.insert(key.clone(), value.clone());
            }
        }

        if let Err(err) = self.append_line(&record) {
            tracing::warn!(
                event = event,
                path = %self.path.display(),
                error = %err,
                "telemetry write failed"
            );
        }
    }

    fn append_line(&self, record: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create telemetry directory '{}'", parent.display())
            })?;
        }

        let line = serde_json::to_string(record)
            .with_context(|| format!("failed to serialize telemetry event for '{}'", self.command))?;

        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open telemetry path '{}'", self.path.display()))?;
        writeln!(file, "{line}").context("failed to append telemetry line")
    }
}

#[derive(Debug, Default)]
pub struct TelemetrySummary {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub parse_errors: usize,
    pub unique_runs: BTreeSet<String>,
    pub event_counts: BTreeMap<String, usize>,
    pub command_counts: BTreeMap<String, usize>,
    /// participant id -> how often it was degraded.
    pub degradations_by_participant: BTreeMap<String, usize>,
    pub last_event_ts_unix_ms: Option<u64>,
}

impl TelemetrySummary {
    pub fn count(&self, event: &str) -> usize {
        self.event_counts.get(event).copied().unwrap_or(0)
    }
}

/// Fold the newest `limit` lines of a JSONL stream into a summary. Unparseable
/// lines are counted, not fatal: the file may be mid-append or hand-edited.
pub fn summarize_telemetry_lines(lines: Vec<String>, limit: usize) -> TelemetrySummary {
    let mut summary = TelemetrySummary {
        total_lines: lines.len(),
        ..TelemetrySummary::default()
    };

    for line in lines.into_iter().rev().take(limit.max(1)) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<Value>(line) else {
            summary.parse_errors += 1;
            continue;
        };
        summary.parsed_events += 1;

        let field = |name: &str| {
            parsed
                .get(name)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
        };

        if let Some(run_id) = field("run_id") {
            summary.unique_runs.insert(run_id.to_string());
        }
        if let Some(command) = field("command") {
            *summary.command_counts.entry(command.to_string()).or_insert(0) += 1;
        }

        let event = field("event").unwrap_or_default().to_string();
        if !event.is_empty() {
            *summary.event_counts.entry(event.clone()).or_insert(0) += 1;
        }
        if event == "participant.degraded"
            && let Some(participant) = field("participant")
        {
            *summary
                .degradations_by_participant
                .entry(participant.to_string())
                .or_insert(0) += 1;
        }

        if let Some(ts) = parsed.get("ts_unix_ms").and_then(Value::as_u64) {
            summary.last_event_ts_unix_ms =
                Some(summary.last_event_ts_unix_ms.map_or(ts, |existing| existing.max(ts)));
        }
    }

    summary
}

pub fn run_telemetry_report(
    cfg: &RuntimeConfig,
    path_override: Option<String>,
    limit: usize,
) -> Result<()> {
    let path = PathBuf::from(path_override.unwrap_or_else(|| cfg.telemetry_path.clone()));
    if !path.exists() {
        println!("No telemetry file found at '{}'.", path.display());
        return Ok(());
    }

    let file = std::fs::File::open(&path)
        .with_context(|| format!("failed to open telemetry file '{}'", path.display()))?;
    let lines = io::BufReader::new(file)
        .lines()
        .collect::<std::result::Result<Vec<String>, io::Error>>()
        .with_context(|| format!("failed to read telemetry file '{}'", path.display()))?;

    let summary = summarize_telemetry_lines(lines, limit);

    println!("Telemetry report for '{}'", path.display());
    println!(
        "Lines: {} (parsed={}, parse_errors={})",
        summary.total_lines, summary.parsed_events, summary.parse_errors
    );
    println!("Unique runs: {}", summary.unique_runs.len());
    println!(
        "Sessions: started={} completed={} failed={}",
        summary.count("session.started"),
        summary.count("session.completed"),
        summary.count("session.failed")
    );
    println!("Rounds completed: {}", summary.count("round.completed"));

    if !summary.degradations_by_participant.is_empty() {
        println!(
            "Degraded participant turns: {}",
            summary.count("participant.degraded")
        );
        for (participant, count) in &summary.degradations_by_participant {
            println!("- {participant}: {count}");
        }
    }

    if !summary.command_counts.is_empty() {
        let mut commands = summary.command_counts.iter().collect::<Vec<_>>();
        commands.sort_by_key(|(name, count)| (std::cmp::Reverse(**count), (*name).clone()));
        println!("Top commands:");
        for (name, count) in commands.into_iter().take(5) {
            println!("- {name}: {count}");
        }
    }

    if let Some(last_ts) = summary.last_event_ts_unix_ms {
        println!("Last event ts_unix_ms: {last_ts}");
    }

    Ok(())
}
