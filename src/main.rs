use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;

use conclave::cli::{Cli, Commands, PersonaCommands, ProfileCommands, SessionCommands, TelemetryCommands, command_label};
use conclave::config::{load_profiles, resolve_runtime_config};
use conclave::debate::run_council;
use conclave::doctor::run_doctor;
use conclave::error::{categorize_error, format_cli_error};
use conclave::persona::{PersonaCatalog, run_personas_list};
use conclave::profiles::{run_profiles_list, run_profiles_show};
use conclave::session::{run_sessions_list, run_sessions_show};
use conclave::telemetry::{TelemetrySink, run_telemetry_report};
use conclave::transcript::run_transcript_command;

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;
    let telemetry = TelemetrySink::new(&cfg, command_label(&cli.command));

    match cli.command {
        Commands::Run { topic } => {
            let topic = topic.join(" ");
            let outcome = run_council(&cfg, &telemetry, &topic).await?;
            println!("Session complete: {}", outcome.headline);
            println!("Session directory: {}", outcome.session_dir.display());
            println!("Transcript: {}", outcome.transcript_path.display());
        }
        Commands::Doctor => {
            run_doctor(&cfg)?;
        }
        Commands::Personas { command } => match command {
            PersonaCommands::List => {
                let catalog =
                    PersonaCatalog::load(std::path::Path::new(&cfg.persona_catalog_path))?;
                run_personas_list(&catalog)?;
            }
        },
        Commands::Sessions { command } => match command {
            SessionCommands::List => run_sessions_list(&cfg)?,
            SessionCommands::Show { dir } => run_sessions_show(&dir)?,
        },
        Commands::Transcript { dir } => {
            run_transcript_command(&dir)?;
        }
        Commands::Profiles { command } => match command {
            ProfileCommands::List => run_profiles_list(&profiles, &cfg)?,
            ProfileCommands::Show => run_profiles_show(&cfg)?,
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => {
                run_telemetry_report(&cfg, path, limit)?;
            }
        },
    }

    Ok(())
}
