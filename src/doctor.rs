use std::path::Path;

use anyhow::Result;

use crate::config::{ProviderKind, RuntimeConfig};
use crate::persona::PersonaCatalog;

/// Resolve an adapter command the way the shell would: explicit paths are
/// checked directly, bare names against PATH.
pub fn command_available(command: &str) -> bool {
    if command.contains('/') {
        return Path::new(command).exists();
    }
    let Ok(path_var) = std::env::var("PATH") else {
        return false;
    };
    path_var
        .split(':')
        .any(|dir| !dir.is_empty() && Path::new(dir).join(command).exists())
}

pub fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );
    println!(
        "Session defaults: mode={}, rounds={}, sessions_root={}",
        cfg.mode.label(),
        cfg.rounds,
        cfg.sessions_root
    );

    let personas = PersonaCatalog::load(Path::new(&cfg.persona_catalog_path))?;
    println!(
        "Persona catalog: {} ({} personas){}",
        cfg.persona_catalog_path,
        personas.entries().len(),
        if Path::new(&cfg.persona_catalog_path).exists() {
            ""
        } else {
            " [file missing; built-ins only]"
        }
    );

    println!("Participants ({}):", cfg.participants.len());
    for spec in &cfg.participants {
        let status = match spec.provider {
            ProviderKind::Echo => "ok (offline echo)".to_string(),
            ProviderKind::Command => match spec.command.as_deref() {
                Some(command) if command_available(command) => {
                    format!("ok ('{command}' found)")
                }
                Some(command) => format!("missing ('{command}' not found on PATH)"),
                None => "misconfigured (no command)".to_string(),
            },
        };
        println!(
            "- {} (provider={}, persona={}): {}",
            spec.id,
            spec.provider.label(),
            spec.persona_name(),
            status
        );
    }
    println!(
        "Presiding participant: {} (derives resolutions, moderates, breaks split votes)",
        cfg.presiding_participant()
    );

    let root = Path::new(&cfg.sessions_root);
    match std::fs::create_dir_all(root) {
        Ok(()) => println!("Sessions root: ok ({})", root.display()),
        Err(err) => println!("Sessions root: cannot create '{}': {err}", root.display()),
    }

    println!(
        "Context: char_budget={}, strategy={}",
        cfg.char_budget,
        cfg.context_strategy.label()
    );
    println!(
        "Retry: enabled={}, attempts={}, delay_ms={}, adapter_timeout_secs={}",
        cfg.retries_enabled, cfg.retry_attempts, cfg.retry_delay_ms, cfg.adapter_timeout_secs
    );
    println!(
        "Telemetry: enabled={} path={}",
        cfg.telemetry_enabled, cfg.telemetry_path
    );

    Ok(())
}
