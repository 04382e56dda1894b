use std::path::Path;
use std::time::Duration;

use anyhow::Context;

use crate::config::RuntimeConfig;
use crate::error::ConclaveError;
use crate::gateway::Gateway;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    /// Fixed delay between attempts; no backoff growth.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            enabled: cfg.retries_enabled,
            max_attempts: cfg.retry_attempts.max(1),
            delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }

    pub fn attempts(&self) -> u32 {
        if self.enabled { self.max_attempts } else { 1 }
    }
}

/// Outcome of one participant turn after retries: either a real reply or a
/// degradation placeholder. Never an error; degradation is how a round
/// survives one failing participant.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub participant: String,
    pub text: String,
    pub ok: bool,
    pub attempts: u32,
}

impl InvocationOutcome {
    pub fn degraded(&self) -> bool {
        !self.ok
    }
}

pub fn degraded_placeholder(participant_id: &str, attempts: u32) -> String {
    format!(
        "[Participant '{participant_id}' was unavailable this round after {attempts} attempt(s).]"
    )
}

/// Wrap a gateway call in retry-then-degrade. Failed attempts overwrite the
/// slot; after the last attempt the placeholder replaces whatever partial
/// output the failing adapter left there.
pub async fn invoke_with_retry(
    gateway: &Gateway,
    policy: &RetryPolicy,
    participant_id: &str,
    prompt: &str,
    slot: &Path,
) -> InvocationOutcome {
    let max_attempts = policy.attempts();
    let mut attempts = 0u32;

    while attempts < max_attempts {
        attempts += 1;
        match gateway.invoke(participant_id, prompt, slot).await {
            Ok(text) => {
                return InvocationOutcome {
                    participant: participant_id.to_string(),
                    text,
                    ok: true,
                    attempts,
                };
            }
            Err(err) => {
                let retryable = err
                    .downcast_ref::<ConclaveError>()
                    .is_none_or(ConclaveError::is_retryable);
                tracing::warn!(
                    participant = participant_id,
                    attempt = attempts,
                    max_attempts,
                    retryable,
                    error = %format!("{err:#}"),
                    "participant invocation failed"
                );
                if !retryable {
                    break;
                }
            }
        }

        if attempts < max_attempts && !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
    }

    let placeholder = degraded_placeholder(participant_id, attempts);
    if let Err(err) = write_placeholder(slot, &placeholder) {
        tracing::error!(
            participant = participant_id,
            slot = %slot.display(),
            error = %format!("{err:#}"),
            "failed to write degradation placeholder"
        );
    }

    InvocationOutcome {
        participant: participant_id.to_string(),
        text: placeholder,
        ok: false,
        attempts,
    }
}

fn write_placeholder(slot: &Path, placeholder: &str) -> anyhow::Result<()> {
    if let Some(parent) = slot.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create slot directory '{}'", parent.display()))?;
    }
    std::fs::write(slot, placeholder)
        .with_context(|| format!("failed to write placeholder to '{}'", slot.display()))
}
