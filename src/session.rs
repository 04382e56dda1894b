use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cli::{ContextStrategy, Mode};
use crate::config::RuntimeConfig;

/// One participant's reply in one round. Written once; only a retry may
/// replace a failure placeholder.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub participant: String,
    pub round: u32,
    pub text: String,
    pub parsed: Option<Value>,
    pub ok: bool,
    pub attempts: u32,
}

/// One discussion round: every participant contributes exactly one response
/// (real or degraded placeholder) before the round is complete.
#[derive(Debug, Clone)]
pub struct RoundRecord {
    pub index: u32,
    pub responses: Vec<ResponseRecord>,
}

impl RoundRecord {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            responses: Vec::new(),
        }
    }

    pub fn response_for(&self, participant: &str) -> Option<&ResponseRecord> {
        self.responses.iter().find(|r| r.participant == participant)
    }
}

/// The only mutable part of a session's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub topic: String,
    pub mode: Mode,
    pub rounds: u32,
    pub participants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub config: ConfigSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub char_budget: usize,
    pub context_strategy: ContextStrategy,
    pub retries_enabled: bool,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub adapter_timeout_secs: u64,
    pub parallel_opening: bool,
    /// participant id → provider label.
    pub providers: std::collections::BTreeMap<String, String>,
}

impl SessionMetadata {
    pub fn from_config(cfg: &RuntimeConfig, topic: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            topic: topic.to_string(),
            mode: cfg.mode,
            rounds: cfg.rounds,
            participants: cfg.participant_ids(),
            created_at,
            status: SessionStatus::Running,
            config: ConfigSnapshot {
                char_budget: cfg.char_budget,
                context_strategy: cfg.context_strategy,
                retries_enabled: cfg.retries_enabled,
                retry_attempts: cfg.retry_attempts,
                retry_delay_ms: cfg.retry_delay_ms,
                adapter_timeout_secs: cfg.adapter_timeout_secs,
                parallel_opening: cfg.parallel_opening,
                providers: cfg
                    .participants
                    .iter()
                    .map(|p| (p.id.clone(), p.provider.label().to_string()))
                    .collect(),
            },
        }
    }
}

/// A parsed `responses/round_<n>_<participant>.md` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundFile {
    pub round: u32,
    pub participant: String,
    pub path: PathBuf,
}

/// File store for one session directory. All session state lives here; no
/// cross-session sharing.
#[derive(Debug, Clone)]
pub struct SessionStore {
    pub dir: PathBuf,
    pub metadata: SessionMetadata,
}

impl SessionStore {
    /// Create the session directory (timestamp + topic slug) and write
    /// `metadata.json`. Fails if the directory already exists: round indexes
    /// are never reused.
    pub fn create(root: &Path, metadata: SessionMetadata) -> Result<Self> {
        let dir = root.join(session_dir_name(metadata.created_at, &metadata.topic));
        if dir.exists() {
            return Err(anyhow::anyhow!(
                "session directory '{}' already exists",
                dir.display()
            ));
        }
        std::fs::create_dir_all(dir.join("responses")).with_context(|| {
            format!("failed to create session directory '{}'", dir.display())
        })?;
        std::fs::create_dir_all(dir.join("summaries"))
            .with_context(|| format!("failed to create summaries dir under '{}'", dir.display()))?;

        let store = Self { dir, metadata };
        store.write_json(&store.metadata_path(), &store.metadata)?;
        Ok(store)
    }

    /// Open an existing session directory by reading its `metadata.json`.
    pub fn open(dir: &Path) -> Result<Self> {
        let metadata_path = dir.join("metadata.json");
        let content = std::fs::read_to_string(&metadata_path).with_context(|| {
            format!(
                "failed to read session metadata '{}'",
                metadata_path.display()
            )
        })?;
        let metadata = serde_json::from_str::<SessionMetadata>(&content).with_context(|| {
            format!(
                "invalid session metadata in '{}'",
                metadata_path.display()
            )
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            metadata,
        })
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join("metadata.json")
    }

    /// Everything else in `metadata.json` is immutable after creation.
    pub fn set_status(&mut self, status: SessionStatus) -> Result<()> {
        self.metadata.status = status;
        self.write_json(&self.metadata_path(), &self.metadata)
    }

    pub fn responses_dir(&self) -> PathBuf {
        self.dir.join("responses")
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.dir.join("summaries")
    }

    pub fn opinions_dir(&self) -> PathBuf {
        self.dir.join("opinions")
    }

    pub fn round_response_path(&self, round: u32, participant: &str) -> PathBuf {
        self.responses_dir()
            .join(format!("round_{round}_{participant}.md"))
    }

    pub fn moderation_path(&self, round: u32) -> PathBuf {
        self.responses_dir()
            .join(format!("moderation_round_{round}.md"))
    }

    pub fn synthesis_path(&self, participant: &str) -> PathBuf {
        self.responses_dir()
            .join(format!("synthesis_{participant}.md"))
    }

    pub fn final_synthesis_path(&self) -> PathBuf {
        self.dir.join("final_synthesis.md")
    }

    pub fn summary_path(&self, round: u32) -> PathBuf {
        self.summaries_dir().join(format!("round_{round}.md"))
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join("transcript.md")
    }

    pub fn resolution_path(&self) -> PathBuf {
        self.dir.join("resolution.json")
    }

    pub fn resolution_raw_path(&self) -> PathBuf {
        self.responses_dir().join("resolution_raw.md")
    }

    pub fn position_analysis_path(&self) -> PathBuf {
        self.dir.join("position_analysis.json")
    }

    pub fn position_analysis_raw_path(&self) -> PathBuf {
        self.responses_dir().join("position_analysis_raw.md")
    }

    pub fn opinion_assignments_path(&self) -> PathBuf {
        self.dir.join("opinion_assignments.json")
    }

    pub fn opinion_path(&self, kind: &str, participant: &str) -> PathBuf {
        self.opinions_dir().join(format!("{kind}_{participant}.md"))
    }

    pub fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        ensure_parent_dir(path)?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write '{}'", path.display()))
    }

    pub fn read_text(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))
    }

    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        ensure_parent_dir(path)?;
        let payload = serde_json::to_string_pretty(value)
            .with_context(|| format!("failed to serialize '{}'", path.display()))?;
        std::fs::write(path, payload)
            .with_context(|| format!("failed to write '{}'", path.display()))
    }

    pub fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<T> {
        let content = self.read_text(path)?;
        serde_json::from_str::<T>(&content)
            .with_context(|| format!("invalid JSON in '{}'", path.display()))
    }

    /// All `round_<n>_<participant>.md` files, sorted numerically by round
    /// index and then by participant id. Filesystem listing order is never
    /// trusted: lexically, round 10 sorts before round 2.
    pub fn list_round_files(&self) -> Result<Vec<RoundFile>> {
        let mut files = Vec::new();
        for entry in list_dir(&self.responses_dir())? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if let Some((round, participant)) = parse_round_file_name(&name) {
                files.push(RoundFile {
                    round,
                    participant,
                    path: entry,
                });
            }
        }
        files.sort_by(|a, b| {
            a.round
                .cmp(&b.round)
                .then_with(|| a.participant.cmp(&b.participant))
        });
        Ok(files)
    }

    /// Moderation notes by round index, numerically sorted.
    pub fn list_moderation_files(&self) -> Result<Vec<(u32, PathBuf)>> {
        let mut files = Vec::new();
        for entry in list_dir(&self.responses_dir())? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if let Some(round) = name
                .strip_prefix("moderation_round_")
                .and_then(|rest| rest.strip_suffix(".md"))
                .and_then(|digits| digits.parse::<u32>().ok())
            {
                files.push((round, entry));
            }
        }
        files.sort_by_key(|(round, _)| *round);
        Ok(files)
    }

    pub fn list_synthesis_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        for entry in list_dir(&self.responses_dir())? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if let Some(participant) = name
                .strip_prefix("synthesis_")
                .and_then(|rest| rest.strip_suffix(".md"))
            {
                files.push((participant.to_string(), entry));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    pub fn list_opinion_files(&self) -> Result<Vec<(String, String, PathBuf)>> {
        let dir = self.opinions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in list_dir(&dir)? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".md") else {
                continue;
            };
            if let Some((kind, participant)) = stem.split_once('_') {
                files.push((kind.to_string(), participant.to_string(), entry));
            }
        }
        // majority, then concurrence, then dissent.
        let rank = |kind: &str| match kind {
            "majority" => 0u8,
            "concurrence" => 1,
            "dissent" => 2,
            _ => 3,
        };
        files.sort_by(|a, b| rank(&a.0).cmp(&rank(&b.0)).then_with(|| a.1.cmp(&b.1)));
        Ok(files)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory '{}'", parent.display()))?;
    }
    Ok(())
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list directory '{}'", dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in '{}'", dir.display()))?;
        paths.push(entry.path());
    }
    Ok(paths)
}

/// Parse `round_<n>_<participant>.md`. Participant ids may themselves
/// contain underscores; only the first segment after the prefix is numeric.
pub fn parse_round_file_name(name: &str) -> Option<(u32, String)> {
    let stem = name.strip_prefix("round_")?.strip_suffix(".md")?;
    let (digits, participant) = stem.split_once('_')?;
    let round = digits.parse::<u32>().ok()?;
    if participant.is_empty() {
        return None;
    }
    Some((round, participant.to_string()))
}

pub fn session_dir_name(created_at: DateTime<Utc>, topic: &str) -> String {
    format!("{}_{}", created_at.format("%Y%m%d_%H%M%S"), slugify(topic))
}

/// Lowercased, alphanumeric-and-dash slug, capped so directory names stay
/// reasonable for long topics.
pub fn slugify(topic: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in topic.chars() {
        if slug.len() >= 40 {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        "session".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn run_sessions_list(cfg: &RuntimeConfig) -> Result<()> {
    let root = Path::new(&cfg.sessions_root);
    if !root.exists() {
        println!("No sessions found under '{}'.", root.display());
        return Ok(());
    }

    let mut sessions = Vec::new();
    for entry in list_dir(root)? {
        if entry.join("metadata.json").exists()
            && let Ok(store) = SessionStore::open(&entry)
        {
            sessions.push(store);
        }
    }

    if sessions.is_empty() {
        println!("No sessions found under '{}'.", root.display());
        return Ok(());
    }

    sessions.sort_by_key(|store| std::cmp::Reverse(store.metadata.created_at));

    println!("Sessions under '{}':", root.display());
    for store in sessions {
        println!(
            "- {} ({} mode, {} rounds, {} participants, {}, created {})",
            store.dir.display(),
            store.metadata.mode.label(),
            store.metadata.rounds,
            store.metadata.participants.len(),
            store.metadata.status.label(),
            store.metadata.created_at.to_rfc3339()
        );
    }
    Ok(())
}

pub fn run_sessions_show(dir: &str) -> Result<()> {
    let store = SessionStore::open(Path::new(dir))?;
    let meta = &store.metadata;

    println!("Session '{}'", store.dir.display());
    println!("Topic: {}", meta.topic);
    println!("Mode: {}", meta.mode.label());
    println!("Rounds: {}", meta.rounds);
    println!("Participants: {}", meta.participants.join(", "));
    println!("Status: {}", meta.status.label());
    println!("Created: {}", meta.created_at.to_rfc3339());

    let round_files = store.list_round_files()?;
    if round_files.is_empty() {
        println!("No round responses recorded.");
    } else {
        println!("Round responses:");
        for file in round_files {
            println!("- round {} / {}", file.round, file.participant);
        }
    }

    for (participant, _) in store.list_synthesis_files()? {
        println!("- synthesis / {participant}");
    }
    if store.final_synthesis_path().exists() {
        println!("- final synthesis");
    }
    for (kind, participant, _) in store.list_opinion_files()? {
        println!("- opinion {kind} / {participant}");
    }
    if store.transcript_path().exists() {
        println!("Transcript: {}", store.transcript_path().display());
    }
    Ok(())
}
