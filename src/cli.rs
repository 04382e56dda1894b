use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Collaborative,
    Adversarial,
    Exploratory,
    Judicial,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Collaborative => "collaborative",
            Mode::Adversarial => "adversarial",
            Mode::Exploratory => "exploratory",
            Mode::Judicial => "judicial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStrategy {
    /// Summarize old rounds only when the assembled history would exceed the
    /// character budget.
    Auto,
    /// Always include full history verbatim.
    Full,
    /// Always substitute prior rounds with summaries.
    Summarize,
}

impl ContextStrategy {
    pub fn label(self) -> &'static str {
        match self {
            ContextStrategy::Auto => "auto",
            ContextStrategy::Full => "full",
            ContextStrategy::Summarize => "summarize",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum PersonaCommands {
    #[command(about = "List available personas from built-ins and the persona catalog")]
    List,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum SessionCommands {
    #[command(about = "List session directories under the sessions root")]
    List,
    #[command(about = "Show metadata and round layout for a session directory")]
    Show {
        #[arg(long)]
        dir: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize telemetry events from a JSONL stream")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 5000)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  conclave run \"Should the team adopt a monorepo?\"\n\
  conclave --mode judicial --rounds 4 run \"Is eventual consistency acceptable for billing?\"\n\
  conclave --participant advocate --participant skeptic run \"Evaluate the v2 storage design\"\n\
  conclave --context-strategy summarize --char-budget 16000 run \"Long design review\"\n\
  conclave sessions list\n\
  conclave sessions show --dir .conclave/sessions/20260805_141559_monorepo\n\
  conclave transcript --dir .conclave/sessions/20260805_141559_monorepo\n\
  conclave personas list\n\
  conclave telemetry report --limit 2000\n\
\n\
Participants:\n\
  - Configure [[participants]] in .conclave/config.toml to route each id to an\n\
    external agent command. Without configuration, an offline echo trio\n\
    (advocate, skeptic, arbiter) is used.\n\
  - The first participant presides: it derives the judicial resolution,\n\
    moderates rebuttal rounds, and breaks split votes.";

#[derive(Debug, Parser)]
#[command(name = "conclave")]
#[command(about = "Convene a structured multi-round council of external AI agents")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "CONCLAVE_MODE", value_enum)]
    pub mode: Option<Mode>,

    #[arg(long, env = "CONCLAVE_ROUNDS")]
    pub rounds: Option<u32>,

    /// Participant ids to include, in speaking order. Repeatable.
    #[arg(long = "participant", env = "CONCLAVE_PARTICIPANT")]
    pub participant: Vec<String>,

    #[arg(long, env = "CONCLAVE_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "CONCLAVE_CONFIG", default_value = ".conclave/config.toml")]
    pub config_path: String,

    #[arg(long, env = "CONCLAVE_SESSIONS_ROOT")]
    pub sessions_root: Option<String>,

    #[arg(long, env = "CONCLAVE_PERSONA_CATALOG")]
    pub persona_catalog_path: Option<String>,

    #[arg(long, env = "CONCLAVE_CHAR_BUDGET")]
    pub char_budget: Option<usize>,

    #[arg(long, env = "CONCLAVE_CONTEXT_STRATEGY", value_enum)]
    pub context_strategy: Option<ContextStrategy>,

    #[arg(long, env = "CONCLAVE_RETRIES_ENABLED", action = clap::ArgAction::Set)]
    pub retries_enabled: Option<bool>,

    #[arg(long, env = "CONCLAVE_RETRY_ATTEMPTS")]
    pub retry_attempts: Option<u32>,

    #[arg(long, env = "CONCLAVE_RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,

    #[arg(long, env = "CONCLAVE_ADAPTER_TIMEOUT_SECS")]
    pub adapter_timeout_secs: Option<u64>,

    /// Request parallel opening statements. Accepted and recorded, but the
    /// opening round still runs sequentially.
    #[arg(long, env = "CONCLAVE_PARALLEL_OPENING", default_value_t = false)]
    pub parallel_opening: bool,

    #[arg(long, env = "CONCLAVE_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "CONCLAVE_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run a council session on a topic and render its transcript")]
    Run {
        #[arg(required = true)]
        topic: Vec<String>,
    },
    #[command(about = "Validate participant adapters, personas, and session storage")]
    Doctor,
    #[command(about = "Inspect persona catalogs")]
    Personas {
        #[command(subcommand)]
        command: PersonaCommands,
    },
    #[command(about = "Inspect session directories")]
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
    #[command(about = "Re-render the transcript for an existing session directory")]
    Transcript {
        #[arg(long)]
        dir: String,
    },
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Telemetry utilities and reporting")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Run { .. } => "run".to_string(),
        Commands::Doctor => "doctor".to_string(),
        Commands::Personas { command } => match command {
            PersonaCommands::List => "personas.list".to_string(),
        },
        Commands::Sessions { command } => match command {
            SessionCommands::List => "sessions.list".to_string(),
            SessionCommands::Show { .. } => "sessions.show".to_string(),
        },
        Commands::Transcript { .. } => "transcript".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
    }
}
