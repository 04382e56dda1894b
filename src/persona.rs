use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::ParticipantSpec;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaCatalogFile {
    #[serde(default)]
    pub personas: HashMap<String, PersonaConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaConfig {
    pub system_prompt: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaSource {
    Builtin,
    Catalog,
}

impl PersonaSource {
    pub fn label(self) -> &'static str {
        match self {
            PersonaSource::Builtin => "builtin",
            PersonaSource::Catalog => "catalog",
        }
    }
}

/// Pure lookup from persona name to system-prompt text. Built-ins are
/// overridable by a TOML catalog file.
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    personas: HashMap<String, (PersonaSource, PersonaConfig)>,
}

impl PersonaCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let mut personas: HashMap<String, (PersonaSource, PersonaConfig)> = builtin_personas()
            .into_iter()
            .map(|(name, config)| (name, (PersonaSource::Builtin, config)))
            .collect();

        if path.exists() {
            let content = std::fs::read_to_string(path).with_context(|| {
                format!("failed to read persona catalog file at '{}'", path.display())
            })?;
            let parsed = toml::from_str::<PersonaCatalogFile>(&content).with_context(|| {
                format!(
                    "invalid persona catalog in '{}'. Each [personas.<name>] needs a system_prompt.",
                    path.display()
                )
            })?;
            for (name, config) in parsed.personas {
                personas.insert(name, (PersonaSource::Catalog, config));
            }
        }

        Ok(Self { personas })
    }

    pub fn system_prompt_for(&self, spec: &ParticipantSpec) -> String {
        let name = spec.persona_name();
        match self.personas.get(name) {
            Some((_, config)) => config.system_prompt.clone(),
            None => {
                tracing::warn!(
                    participant = %spec.id,
                    persona = %name,
                    "persona not found in catalog; using the generic persona"
                );
                generic_system_prompt(&spec.id)
            }
        }
    }

    pub fn entries(&self) -> Vec<(&str, PersonaSource, &PersonaConfig)> {
        let mut entries = self
            .personas
            .iter()
            .map(|(name, (source, config))| (name.as_str(), *source, config))
            .collect::<Vec<_>>();
        entries.sort_by_key(|(name, _, _)| name.to_string());
        entries
    }
}

pub fn builtin_personas() -> HashMap<String, PersonaConfig> {
    let mut personas = HashMap::new();
    personas.insert(
        "advocate".to_string(),
        PersonaConfig {
            system_prompt: "You are the council's advocate. Argue the strongest constructive \
                            case for the proposal under discussion, with concrete examples and \
                            explicit trade-offs. Engage directly with other participants' points."
                .to_string(),
            description: Some("Argues the strongest constructive case".to_string()),
        },
    );
    personas.insert(
        "skeptic".to_string(),
        PersonaConfig {
            system_prompt: "You are the council's skeptic. Stress-test every claim made in the \
                            discussion: name failure modes, hidden costs, and missing evidence. \
                            Be rigorous and specific, never dismissive."
                .to_string(),
            description: Some("Stress-tests claims and names failure modes".to_string()),
        },
    );
    personas.insert(
        "arbiter".to_string(),
        PersonaConfig {
            system_prompt: "You are the council's arbiter. Weigh the arguments on their merits, \
                            identify where participants actually disagree, and steer the \
                            discussion toward a defensible conclusion. When asked for structured \
                            output, reply with exactly the requested JSON and nothing else."
                .to_string(),
            description: Some("Weighs arguments and presides over verdicts".to_string()),
        },
    );
    personas
}

pub fn generic_system_prompt(participant_id: &str) -> String {
    format!(
        "You are '{participant_id}', a thoughtful participant in a structured council \
         discussion. Respond to the prompt directly, engage with the other participants' \
         arguments, and keep your contribution focused."
    )
}

pub fn run_personas_list(catalog: &PersonaCatalog) -> Result<()> {
    println!("Available personas:");
    for (name, source, config) in catalog.entries() {
        println!(
            "- {} ({}): {}",
            name,
            source.label(),
            config.description.as_deref().unwrap_or("<no description>")
        );
    }
    Ok(())
}
