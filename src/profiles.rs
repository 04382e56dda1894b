use anyhow::Result;

use crate::cli::Mode;
use crate::config::{ProfilesFile, RuntimeConfig};

pub fn run_profiles_list(profiles: &ProfilesFile, cfg: &RuntimeConfig) -> Result<()> {
    let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
    if !names.iter().any(|name| name == "default") {
        names.push("default".to_string());
    }
    names.sort();

    println!("Profiles in '{}' (active='{}'):", cfg.config_path, cfg.profile);
    for name in names {
        let marker = if name == cfg.profile { "*" } else { " " };
        match profiles.profiles.get(&name) {
            Some(profile) => {
                let rounds = profile
                    .rounds
                    .map(|rounds| rounds.to_string())
                    .unwrap_or_else(|| "inherit".to_string());
                println!(
                    "{marker} {name} (mode={}, rounds={rounds}, participants={})",
                    profile.mode.map(Mode::label).unwrap_or("inherit"),
                    profile.participants.len()
                );
            }
            None => println!("{marker} {name} (implicit defaults)"),
        }
    }

    Ok(())
}

pub fn run_profiles_show(cfg: &RuntimeConfig) -> Result<()> {
    println!("Active profile: {}", cfg.profile);
    println!("Config path: {}", cfg.config_path);
    println!("Mode: {}", cfg.mode.label());
    println!("Rounds: {}", cfg.rounds);
    println!(
        "Participants: {}",
        cfg.participants
            .iter()
            .map(|p| format!("{} ({})", p.id, p.provider.label()))
            .collect::<Vec<String>>()
            .join(", ")
    );
    println!("Sessions root: {}", cfg.sessions_root);
    println!("Persona catalog: {}", cfg.persona_catalog_path);
    println!("Char budget: {}", cfg.char_budget);
    println!("Context strategy: {}", cfg.context_strategy.label());
    println!("Retries enabled: {}", cfg.retries_enabled);
    println!("Retry attempts: {}", cfg.retry_attempts);
    println!("Retry delay (ms): {}", cfg.retry_delay_ms);
    println!("Adapter timeout (secs): {}", cfg.adapter_timeout_secs);
    println!("Parallel opening requested: {}", cfg.parallel_opening);
    println!("Telemetry enabled: {}", cfg.telemetry_enabled);
    println!("Telemetry path: {}", cfg.telemetry_path);
    Ok(())
}
