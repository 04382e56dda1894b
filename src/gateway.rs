use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::adapter::{AdapterRegistry, AdapterRequest};
use crate::config::{ParticipantSpec, RuntimeConfig};
use crate::error::ConclaveError;
use crate::persona::PersonaCatalog;

/// Uniform, synchronous-feeling call surface over the adapter registry.
/// One call per participant per turn; bounded by the configured timeout.
pub struct Gateway {
    registry: AdapterRegistry,
    personas: PersonaCatalog,
    specs: HashMap<String, ParticipantSpec>,
    timeout: Duration,
}

impl Gateway {
    pub fn new(cfg: &RuntimeConfig, registry: AdapterRegistry, personas: PersonaCatalog) -> Self {
        let specs = cfg
            .participants
            .iter()
            .map(|spec| (spec.id.clone(), spec.clone()))
            .collect();
        Self {
            registry,
            personas,
            specs,
            timeout: Duration::from_secs(cfg.adapter_timeout_secs),
        }
    }

    pub fn system_prompt_for(&self, participant_id: &str) -> String {
        match self.specs.get(participant_id) {
            Some(spec) => self.personas.system_prompt_for(spec),
            None => crate::persona::generic_system_prompt(participant_id),
        }
    }

    /// Invoke one participant. The raw reply lands in `slot` before any
    /// interpretation happens, so a failed call leaves no state beyond the
    /// slot (which the retry controller then owns). Timeouts and nonzero
    /// adapter exits surface as `ConclaveError` values the retry controller
    /// can classify.
    pub async fn invoke(&self, participant_id: &str, prompt: &str, slot: &Path) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "refusing to invoke participant '{participant_id}' with an empty prompt"
            ));
        }

        let adapter = self
            .registry
            .resolve(participant_id)
            .ok_or_else(|| ConclaveError::UnknownParticipant(participant_id.to_string()))?;

        let system_prompt = self.system_prompt_for(participant_id);
        let request = AdapterRequest {
            prompt,
            system_prompt: &system_prompt,
            output_path: slot,
        };

        let started = std::time::Instant::now();
        let reply = match tokio::time::timeout(self.timeout, adapter.invoke(request)).await {
            Ok(result) => result.with_context(|| {
                format!("adapter '{}' failed for participant '{participant_id}'", adapter.name())
            })?,
            Err(_) => {
                return Err(ConclaveError::AdapterTimeout {
                    participant: participant_id.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
                .into());
            }
        };

        tracing::debug!(
            participant = participant_id,
            adapter = adapter.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            status = reply.exit_status,
            "adapter call finished"
        );

        if reply.exit_status != 0 {
            return Err(ConclaveError::AdapterNonZeroExit {
                participant: participant_id.to_string(),
                status: reply.exit_status,
            }
            .into());
        }

        let text = std::fs::read_to_string(&reply.output_path).with_context(|| {
            format!(
                "failed to read adapter output slot '{}'",
                reply.output_path.display()
            )
        })?;
        Ok(text)
    }
}
