use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{Cli, ContextStrategy, Mode};

pub const MIN_ROUNDS: u32 = 2;
pub const MAX_ROUNDS: u32 = 10;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub mode: Mode,
    pub rounds: u32,
    /// Ordered: the first participant presides.
    pub participants: Vec<ParticipantSpec>,
    pub sessions_root: String,
    pub persona_catalog_path: String,
    pub char_budget: usize,
    pub context_strategy: ContextStrategy,
    pub retries_enabled: bool,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub adapter_timeout_secs: u64,
    pub parallel_opening: bool,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
}

impl RuntimeConfig {
    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    pub fn presiding_participant(&self) -> &str {
        // Resolution guarantees at least one participant.
        &self.participants[0].id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// External executable: prompt on stdin, reply on stdout.
    Command,
    /// Deterministic offline stand-in.
    Echo,
}

impl ProviderKind {
    pub fn label(self) -> &'static str {
        match self {
            ProviderKind::Command => "command",
            ProviderKind::Echo => "echo",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParticipantSpec {
    pub id: String,
    pub provider: ProviderKind,
    /// Executable for the `command` provider.
    pub command: Option<String>,
    /// Argv for the command. `{system_prompt}` is substituted before spawn.
    #[serde(default)]
    pub args: Vec<String>,
    /// Persona name in the catalog; defaults to the participant id.
    pub persona: Option<String>,
}

impl ParticipantSpec {
    pub fn persona_name(&self) -> &str {
        self.persona.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub mode: Option<Mode>,
    pub rounds: Option<u32>,
    pub sessions_root: Option<String>,
    pub persona_catalog_path: Option<String>,
    pub char_budget: Option<usize>,
    pub context_strategy: Option<ContextStrategy>,
    pub retries_enabled: Option<bool>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub adapter_timeout_secs: Option<u64>,
    pub parallel_opening: Option<bool>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
    #[serde(default)]
    pub participants: Vec<ParticipantSpec>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    toml::from_str::<ProfilesFile>(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check mode/strategy values and field names.",
            path.display()
        )
    })
}

/// The participant trio used when no participants are configured. Runs on the
/// echo provider so the full pipeline works offline.
pub fn implicit_participants() -> Vec<ParticipantSpec> {
    ["advocate", "skeptic", "arbiter"]
        .into_iter()
        .map(|id| ParticipantSpec {
            id: id.to_string(),
            provider: ProviderKind::Echo,
            command: None,
            args: Vec::new(),
            persona: None,
        })
        .collect()
}

fn select_participants(
    catalog: Vec<ParticipantSpec>,
    requested: &[String],
) -> Result<Vec<ParticipantSpec>> {
    let catalog = if catalog.is_empty() {
        implicit_participants()
    } else {
        catalog
    };

    if requested.is_empty() {
        return Ok(catalog);
    }

    let mut selected = Vec::with_capacity(requested.len());
    for id in requested {
        let trimmed = id.trim();
        let spec = catalog.iter().find(|p| p.id == trimmed).ok_or_else(|| {
            let mut names = catalog.iter().map(|p| p.id.clone()).collect::<Vec<String>>();
            names.sort();
            anyhow::anyhow!(
                "participant '{}' not found. Available participants: {}",
                trimmed,
                names.join(", ")
            )
        })?;
        if selected.iter().any(|p: &ParticipantSpec| p.id == spec.id) {
            return Err(anyhow::anyhow!(
                "participant '{}' was requested more than once",
                spec.id
            ));
        }
        selected.push(spec.clone());
    }
    Ok(selected)
}

fn validate_rounds(rounds: u32) -> Result<u32> {
    if (MIN_ROUNDS..=MAX_ROUNDS).contains(&rounds) {
        Ok(rounds)
    } else {
        Err(anyhow::anyhow!(
            "round count {} is out of range {}..={}",
            rounds,
            MIN_ROUNDS,
            MAX_ROUNDS
        ))
    }
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let participants = select_participants(profile.participants.clone(), &cli.participant)?;
    for spec in &participants {
        if spec.provider == ProviderKind::Command && spec.command.is_none() {
            return Err(anyhow::anyhow!(
                "participant '{}' uses the command provider but has no command configured",
                spec.id
            ));
        }
    }

    let rounds = validate_rounds(cli.rounds.or(profile.rounds).unwrap_or(3))?;

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        mode: cli.mode.or(profile.mode).unwrap_or(Mode::Collaborative),
        rounds,
        participants,
        sessions_root: cli
            .sessions_root
            .clone()
            .or(profile.sessions_root)
            .unwrap_or_else(|| ".conclave/sessions".to_string()),
        persona_catalog_path: cli
            .persona_catalog_path
            .clone()
            .or(profile.persona_catalog_path)
            .unwrap_or_else(|| ".conclave/personas.toml".to_string()),
        char_budget: cli
            .char_budget
            .or(profile.char_budget)
            .unwrap_or(32_000)
            .max(1_000),
        context_strategy: cli
            .context_strategy
            .or(profile.context_strategy)
            .unwrap_or(ContextStrategy::Auto),
        retries_enabled: cli
            .retries_enabled
            .or(profile.retries_enabled)
            .unwrap_or(true),
        retry_attempts: cli
            .retry_attempts
            .or(profile.retry_attempts)
            .unwrap_or(2)
            .max(1),
        retry_delay_ms: cli.retry_delay_ms.or(profile.retry_delay_ms).unwrap_or(500),
        adapter_timeout_secs: cli
            .adapter_timeout_secs
            .or(profile.adapter_timeout_secs)
            .unwrap_or(120)
            .max(1),
        parallel_opening: cli.parallel_opening || profile.parallel_opening.unwrap_or(false),
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| ".conclave/telemetry/events.jsonl".to_string()),
    })
}
