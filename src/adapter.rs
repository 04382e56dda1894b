use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::config::{ParticipantSpec, ProviderKind};

/// Environment variable carrying the persona system prompt to command
/// adapters that cannot take it as an argv placeholder.
pub const SYSTEM_PROMPT_ENV: &str = "CONCLAVE_SYSTEM_PROMPT";

/// Argv placeholder substituted with the system prompt before spawning.
pub const SYSTEM_PROMPT_PLACEHOLDER: &str = "{system_prompt}";

pub struct AdapterRequest<'a> {
    pub prompt: &'a str,
    pub system_prompt: &'a str,
    /// Slot the raw reply is written to, owned by the caller.
    pub output_path: &'a Path,
}

pub struct AdapterReply {
    pub output_path: PathBuf,
    pub exit_status: i32,
}

/// Uniform call surface over heterogeneous external agents. One
/// implementation per provider; instances are resolved once at startup via
/// the registry, never by per-call string branching.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke the external agent. Implementations write the raw reply to
    /// `request.output_path` and report the agent's exit status; the caller
    /// enforces the timeout and interprets nonzero exits.
    async fn invoke(&self, request: AdapterRequest<'_>) -> Result<AdapterReply>;
}

/// Adapter spawning an external executable: prompt on stdin, reply on
/// stdout. The system prompt is exposed both as an env var and through the
/// `{system_prompt}` argv placeholder.
pub struct CommandAdapter {
    command: String,
    args: Vec<String>,
}

impl CommandAdapter {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl Adapter for CommandAdapter {
    fn name(&self) -> &str {
        "command"
    }

    async fn invoke(&self, request: AdapterRequest<'_>) -> Result<AdapterReply> {
        let args = self
            .args
            .iter()
            .map(|arg| arg.replace(SYSTEM_PROMPT_PLACEHOLDER, request.system_prompt))
            .collect::<Vec<String>>();

        let mut child = tokio::process::Command::new(&self.command)
            .args(&args)
            .env(SYSTEM_PROMPT_ENV, request.system_prompt)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn adapter command '{}'", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // Feed stdin from a separate task so a large prompt cannot
            // deadlock against an agent that writes before reading. Dropping
            // the handle gives line-oriented agents their EOF.
            let prompt = request.prompt.to_string();
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
            });
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("failed to collect output from '{}'", self.command))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        write_reply(request.output_path, stdout.trim_end())?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(
                command = %self.command,
                status = output.status.code().unwrap_or(-1),
                stderr = %stderr.trim_end(),
                "adapter command exited nonzero"
            );
        }

        Ok(AdapterReply {
            output_path: request.output_path.to_path_buf(),
            exit_status: output.status.code().unwrap_or(-1),
        })
    }
}

/// Deterministic offline stand-in: replies with a short note derived from
/// the prompt. Lets the full pipeline run without any external agent.
pub struct EchoAdapter {
    participant_id: String,
}

impl EchoAdapter {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
        }
    }
}

#[async_trait]
impl Adapter for EchoAdapter {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, request: AdapterRequest<'_>) -> Result<AdapterReply> {
        let head = request
            .prompt
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .chars()
            .take(160)
            .collect::<String>();
        let text = format!(
            "[offline echo from '{}'] Responding to: {}",
            self.participant_id, head
        );
        write_reply(request.output_path, &text)?;
        Ok(AdapterReply {
            output_path: request.output_path.to_path_buf(),
            exit_status: 0,
        })
    }
}

fn write_reply(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create adapter output directory '{}'", parent.display())
        })?;
    }
    std::fs::write(path, text)
        .with_context(|| format!("failed to write adapter output to '{}'", path.display()))
}

/// Participant id → adapter, built once at startup.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn from_participants(participants: &[ParticipantSpec]) -> Result<Self> {
        let mut registry = Self::default();
        for spec in participants {
            let adapter: Arc<dyn Adapter> = match spec.provider {
                ProviderKind::Command => {
                    let command = spec.command.clone().ok_or_else(|| {
                        anyhow::anyhow!(
                            "participant '{}' uses the command provider but has no command",
                            spec.id
                        )
                    })?;
                    Arc::new(CommandAdapter::new(command, spec.args.clone()))
                }
                ProviderKind::Echo => Arc::new(EchoAdapter::new(spec.id.clone())),
            };
            registry.insert(&spec.id, adapter);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, participant_id: &str, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(participant_id.to_string(), adapter);
    }

    pub fn resolve(&self, participant_id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(participant_id).cloned()
    }

    pub fn participant_ids(&self) -> Vec<String> {
        let mut ids = self.adapters.keys().cloned().collect::<Vec<String>>();
        ids.sort();
        ids
    }
}
