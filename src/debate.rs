use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;

use crate::adapter::AdapterRegistry;
use crate::cli::Mode;
use crate::config::RuntimeConfig;
use crate::context::ContextBudget;
use crate::gateway::Gateway;
use crate::judicial::{
    self, OpinionAssignment, PositionAnalysis, Resolution,
};
use crate::persona::PersonaCatalog;
use crate::prompts::{
    CombinedSynthesisParams, ModerationParams, OpeningParams, RebuttalParams, SynthesisParams,
    combined_synthesis_prompt, moderation_prompt, opening_prompt, rebuttal_prompt,
    synthesis_prompt,
};
use crate::retry::{RetryPolicy, invoke_with_retry};
use crate::session::{ResponseRecord, RoundRecord, SessionMetadata, SessionStatus, SessionStore};
use crate::telemetry::TelemetrySink;
use crate::transcript;

/// Session phases. A phase completes only after every participant's response
/// for it is recorded (success or degradation); there is no partial-round
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ResolutionDerivation,
    Opening,
    Moderation(u32),
    Rebuttal(u32),
    Synthesis,
    CombinedSynthesis,
    PositionAnalysis,
    OpinionAssignment,
    OpinionWriting,
    Done,
}

impl Phase {
    pub fn label(&self) -> String {
        match self {
            Phase::ResolutionDerivation => "resolution-derivation".to_string(),
            Phase::Opening => "opening".to_string(),
            Phase::Moderation(round) => format!("moderation({round})"),
            Phase::Rebuttal(round) => format!("rebuttal({round})"),
            Phase::Synthesis => "synthesis".to_string(),
            Phase::CombinedSynthesis => "combined-synthesis".to_string(),
            Phase::PositionAnalysis => "position-analysis".to_string(),
            Phase::OpinionAssignment => "opinion-assignment".to_string(),
            Phase::OpinionWriting => "opinion-writing".to_string(),
            Phase::Done => "done".to_string(),
        }
    }
}

/// Phase sequence for collaborative/adversarial/exploratory sessions:
/// R numbered discussion rounds, then syntheses.
pub fn standard_phases(rounds: u32) -> Vec<Phase> {
    let mut phases = vec![Phase::Opening];
    for round in 2..=rounds {
        phases.push(Phase::Rebuttal(round));
    }
    phases.push(Phase::Synthesis);
    phases.push(Phase::CombinedSynthesis);
    phases.push(Phase::Done);
    phases
}

/// Judicial sequence: a derived resolution up front, moderated rebuttals,
/// and a vote instead of syntheses.
pub fn judicial_phases(rounds: u32) -> Vec<Phase> {
    let mut phases = vec![Phase::ResolutionDerivation, Phase::Opening];
    for round in 2..=rounds {
        phases.push(Phase::Moderation(round));
        phases.push(Phase::Rebuttal(round));
    }
    phases.push(Phase::PositionAnalysis);
    phases.push(Phase::OpinionAssignment);
    phases.push(Phase::OpinionWriting);
    phases.push(Phase::Done);
    phases
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub session_dir: PathBuf,
    pub transcript_path: PathBuf,
    pub headline: String,
}

/// Drives one session to completion. Owns the Session and Round lifecycles;
/// judicial artifacts belong to the consensus module and summaries to the
/// context budget manager.
pub struct DebateController<'a> {
    cfg: &'a RuntimeConfig,
    store: SessionStore,
    gateway: Gateway,
    policy: RetryPolicy,
    context: ContextBudget,
    telemetry: &'a TelemetrySink,
    rounds: Vec<RoundRecord>,
}

impl<'a> DebateController<'a> {
    pub fn new(
        cfg: &'a RuntimeConfig,
        store: SessionStore,
        gateway: Gateway,
        telemetry: &'a TelemetrySink,
    ) -> Self {
        let context = ContextBudget::new(cfg, store.clone());
        Self {
            cfg,
            store,
            gateway,
            policy: RetryPolicy::from_config(cfg),
            context,
            telemetry,
            rounds: Vec::new(),
        }
    }

    fn presiding(&self) -> &str {
        self.cfg.presiding_participant()
    }

    fn topic(&self) -> &str {
        &self.store.metadata.topic
    }

    pub async fn run(mut self) -> Result<SessionOutcome> {
        if self.cfg.parallel_opening {
            tracing::info!(
                "parallel opening statements requested; running sequentially as designed"
            );
        }

        let phases = match self.cfg.mode {
            Mode::Judicial => judicial_phases(self.cfg.rounds),
            _ => standard_phases(self.cfg.rounds),
        };

        let mut resolution: Option<Resolution> = None;
        let mut analysis: Option<PositionAnalysis> = None;
        let mut assignment: Option<OpinionAssignment> = None;
        let mut pending_moderation: Option<String> = None;
        let mut syntheses: Vec<(String, String)> = Vec::new();

        for phase in phases {
            tracing::info!(phase = %phase.label(), "entering phase");
            match phase {
                Phase::ResolutionDerivation => {
                    resolution = Some(
                        judicial::derive_resolution(
                            &self.gateway,
                            &self.policy,
                            &self.store,
                            self.topic(),
                            self.presiding(),
                        )
                        .await?,
                    );
                }
                Phase::Opening => {
                    self.run_discussion_round(1, None, resolution.as_ref())
                        .await?;
                }
                Phase::Moderation(round) => {
                    let current = resolution
                        .as_ref()
                        .context("moderation phase reached without a resolution")?;
                    pending_moderation = Some(self.moderate(round, current).await);
                }
                Phase::Rebuttal(round) => {
                    let moderation = pending_moderation.take();
                    self.run_discussion_round(round, moderation.as_deref(), resolution.as_ref())
                        .await?;
                }
                Phase::Synthesis => {
                    syntheses = self.run_synthesis().await?;
                }
                Phase::CombinedSynthesis => {
                    self.run_combined_synthesis(&syntheses).await?;
                }
                Phase::PositionAnalysis => {
                    let current = resolution
                        .as_ref()
                        .context("position analysis reached without a resolution")?;
                    let history = self.context.assemble_history(&self.rounds, None);
                    analysis = Some(
                        judicial::analyze_positions(
                            &self.gateway,
                            &self.policy,
                            &self.store,
                            current,
                            &self.store.metadata.participants,
                            &history,
                        )
                        .await?,
                    );
                }
                Phase::OpinionAssignment => {
                    let current = analysis
                        .as_ref()
                        .context("opinion assignment reached without a position analysis")?;
                    assignment = Some(judicial::assign_opinions(current, self.presiding())?);
                }
                Phase::OpinionWriting => {
                    let current_resolution = resolution
                        .as_ref()
                        .context("opinion writing reached without a resolution")?;
                    let current_analysis = analysis
                        .as_ref()
                        .context("opinion writing reached without a position analysis")?;
                    let current_assignment = assignment
                        .as_ref()
                        .context("opinion writing reached without assignments")?;
                    let history = self.context.assemble_history(&self.rounds, None);
                    judicial::write_opinions(
                        &self.gateway,
                        &self.policy,
                        &self.store,
                        current_resolution,
                        current_analysis,
                        current_assignment,
                        &history,
                    )
                    .await?;
                }
                Phase::Done => {}
            }
        }

        self.store.set_status(SessionStatus::Completed)?;
        let transcript_path = transcript::write_transcript(&self.store)?;
        let headline = match (&analysis, &assignment) {
            (Some(analysis), Some(assignment)) => format!(
                "{} {} opinion by '{}' (tally: {})",
                assignment.opinion_type.label(),
                assignment.position.label(),
                assignment.lead_author,
                analysis.tally_line()
            ),
            _ => format!(
                "combined synthesis written to {}",
                self.store.final_synthesis_path().display()
            ),
        };

        Ok(SessionOutcome {
            session_dir: self.store.dir.clone(),
            transcript_path,
            headline,
        })
    }

    /// One numbered discussion round. Every participant responds (or is
    /// degraded) before the round is considered complete.
    async fn run_discussion_round(
        &mut self,
        round_index: u32,
        moderation: Option<&str>,
        resolution: Option<&Resolution>,
    ) -> Result<()> {
        let participants = self.store.metadata.participants.clone();
        let mut round = RoundRecord::new(round_index);
        let proposition = resolution.map(|r| r.proposition.as_str());

        for participant in &participants {
            let prompt = if round_index == 1 {
                opening_prompt(&OpeningParams {
                    topic: self.topic(),
                    mode: self.cfg.mode,
                    total_rounds: self.cfg.rounds,
                    proposition,
                })
            } else {
                let history = self
                    .context
                    .assemble_history(&self.rounds, Some(participant.as_str()));
                let own_previous = ContextBudget::own_previous(&self.rounds, participant);
                rebuttal_prompt(&RebuttalParams {
                    topic: self.topic(),
                    mode: self.cfg.mode,
                    round: round_index,
                    total_rounds: self.cfg.rounds,
                    history: &history,
                    own_previous: own_previous.as_deref(),
                    moderation,
                    proposition,
                })
            };

            let slot = self.store.round_response_path(round_index, participant);
            let record = self
                .record_turn(participant, &prompt, &slot, round_index)
                .await;
            round.responses.push(record);
        }

        let degraded = round.responses.iter().filter(|r| !r.ok).count();
        tracing::info!(
            round = round_index,
            participants = round.responses.len(),
            degraded,
            "round complete"
        );
        self.telemetry.emit(
            "round.completed",
            json!({
                "round": round_index,
                "participants": round.responses.len(),
                "degraded": degraded,
            }),
        );

        self.context.on_round_complete(&round);
        self.rounds.push(round);
        Ok(())
    }

    async fn record_turn(
        &self,
        participant: &str,
        prompt: &str,
        slot: &Path,
        round_index: u32,
    ) -> ResponseRecord {
        let outcome =
            invoke_with_retry(&self.gateway, &self.policy, participant, prompt, slot).await;
        if outcome.degraded() {
            self.telemetry.emit(
                "participant.degraded",
                json!({
                    "participant": participant,
                    "round": round_index,
                    "attempts": outcome.attempts,
                }),
            );
        }
        ResponseRecord {
            participant: participant.to_string(),
            round: round_index,
            text: outcome.text,
            parsed: None,
            ok: outcome.ok,
            attempts: outcome.attempts,
        }
    }

    /// The presiding participant frames the next rebuttal round. A degraded
    /// moderator yields a placeholder note; the round itself still runs.
    async fn moderate(&mut self, next_round: u32, resolution: &Resolution) -> String {
        let history = self.context.assemble_history(&self.rounds, None);
        let prompt = moderation_prompt(&ModerationParams {
            proposition: &resolution.proposition,
            next_round,
            total_rounds: self.cfg.rounds,
            history: &history,
        });
        let slot = self.store.moderation_path(next_round);
        let outcome = invoke_with_retry(
            &self.gateway,
            &self.policy,
            self.cfg.presiding_participant(),
            &prompt,
            &slot,
        )
        .await;
        outcome.text
    }

    async fn run_synthesis(&mut self) -> Result<Vec<(String, String)>> {
        let participants = self.store.metadata.participants.clone();
        let history = self.context.assemble_history(&self.rounds, None);
        let mut syntheses = Vec::with_capacity(participants.len());

        for participant in &participants {
            let prompt = synthesis_prompt(&SynthesisParams {
                topic: self.topic(),
                mode: self.cfg.mode,
                history: &history,
            });
            let slot = self.store.synthesis_path(participant);
            let outcome =
                invoke_with_retry(&self.gateway, &self.policy, participant, &prompt, &slot).await;
            if outcome.degraded() {
                self.telemetry.emit(
                    "participant.degraded",
                    json!({ "participant": participant, "phase": "synthesis" }),
                );
            }
            syntheses.push((participant.clone(), outcome.text));
        }
        Ok(syntheses)
    }

    async fn run_combined_synthesis(&mut self, syntheses: &[(String, String)]) -> Result<()> {
        let prompt = combined_synthesis_prompt(&CombinedSynthesisParams {
            topic: self.topic(),
            syntheses,
        });
        let slot = self.store.final_synthesis_path();
        let outcome = invoke_with_retry(
            &self.gateway,
            &self.policy,
            self.cfg.presiding_participant(),
            &prompt,
            &slot,
        )
        .await;
        if outcome.degraded() {
            tracing::warn!("combined synthesis degraded; placeholder written");
        }
        Ok(())
    }
}

/// Wire everything together and run one session end to end.
pub async fn run_council(
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
    topic: &str,
) -> Result<SessionOutcome> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(anyhow::anyhow!("topic cannot be empty"));
    }

    let personas = PersonaCatalog::load(Path::new(&cfg.persona_catalog_path))?;
    let registry = AdapterRegistry::from_participants(&cfg.participants)?;
    let gateway = Gateway::new(cfg, registry, personas);

    let metadata = SessionMetadata::from_config(cfg, topic, Utc::now());
    let store = SessionStore::create(Path::new(&cfg.sessions_root), metadata)?;
    tracing::info!(
        session = %store.dir.display(),
        mode = cfg.mode.label(),
        rounds = cfg.rounds,
        participants = cfg.participants.len(),
        "session created"
    );
    telemetry.emit(
        "session.started",
        json!({
            "session_dir": store.dir.display().to_string(),
            "mode": cfg.mode.label(),
            "rounds": cfg.rounds,
            "participants": cfg.participants.len(),
        }),
    );

    let session_dir = store.dir.clone();
    let controller = DebateController::new(cfg, store, gateway, telemetry);
    match controller.run().await {
        Ok(outcome) => {
            telemetry.emit(
                "session.completed",
                json!({
                    "session_dir": outcome.session_dir.display().to_string(),
                    "headline": outcome.headline,
                }),
            );
            Ok(outcome)
        }
        Err(err) => {
            // Fatal: abort loudly but leave every partial file for postmortem.
            if let Ok(mut store) = SessionStore::open(&session_dir) {
                let _ = store.set_status(SessionStatus::Failed);
            }
            telemetry.emit(
                "session.failed",
                json!({
                    "session_dir": session_dir.display().to_string(),
                    "error": format!("{err:#}"),
                }),
            );
            Err(err).with_context(|| {
                format!(
                    "session aborted; partial files preserved in '{}'",
                    session_dir.display()
                )
            })
        }
    }
}
