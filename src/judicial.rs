use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::ConclaveError;
use crate::extract::extract_typed;
use crate::gateway::Gateway;
use crate::prompts::{
    OpinionParams, PositionAnalysisParams, ResolutionParams, opinion_prompt,
    position_analysis_prompt, resolution_prompt,
};
use crate::retry::{RetryPolicy, invoke_with_retry};
use crate::session::SessionStore;

/// The yes/no proposition a judicial session votes on. Derived once from the
/// open topic; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub proposition: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Affirm,
    Oppose,
    Nuanced,
}

impl Stance {
    pub fn label(self) -> &'static str {
        match self {
            Stance::Affirm => "affirm",
            Stance::Oppose => "oppose",
            Stance::Nuanced => "nuanced",
        }
    }

    /// The directly opposing stance, where one exists. `nuanced` has none.
    pub fn opposite(self) -> Option<Stance> {
        match self {
            Stance::Affirm => Some(Stance::Oppose),
            Stance::Oppose => Some(Stance::Affirm),
            Stance::Nuanced => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantPosition {
    pub participant: String,
    pub stance: Stance,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

/// Inferred stances plus the vote tally. Invariant: the tally sums to the
/// participant count; degraded participants count too (the analyst sees
/// their placeholder lines and assigns them a stance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionAnalysis {
    pub positions: Vec<ParticipantPosition>,
    pub tally: BTreeMap<Stance, usize>,
}

impl PositionAnalysis {
    pub fn position_for(&self, participant: &str) -> Option<&ParticipantPosition> {
        self.positions.iter().find(|p| p.participant == participant)
    }

    pub fn tally_line(&self) -> String {
        self.tally
            .iter()
            .map(|(stance, count)| format!("{}: {}", stance.label(), count))
            .collect::<Vec<String>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpinionType {
    Majority,
    Plurality,
}

impl OpinionType {
    pub fn label(self) -> &'static str {
        match self {
            OpinionType::Majority => "majority",
            OpinionType::Plurality => "plurality",
        }
    }
}

/// File prefix for the lead opinion. The session layout fixes the opinion
/// file prefixes; a plurality decision's lead opinion still lands in a
/// `majority_*` file while the assignment records the real type.
pub const LEAD_OPINION_PREFIX: &str = "majority";
pub const CONCURRENCE_OPINION_PREFIX: &str = "concurrence";
pub const DISSENT_OPINION_PREFIX: &str = "dissent";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpinionAssignment {
    pub opinion_type: OpinionType,
    /// The winning (or, for splits, presiding) stance.
    pub position: Stance,
    pub lead_author: String,
    pub concurrence_author: Option<String>,
    pub dissent_author: Option<String>,
}

/// Shape of the raw position-analysis payload returned by the analyst.
#[derive(Debug, Deserialize)]
struct PositionsPayload {
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    participant: String,
    stance: Stance,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

/// Convert the open topic into a crisp yes/no resolution via one structured
/// call to the presiding participant. Fatal when no valid resolution can be
/// extracted: no meaningful vote can occur without one.
pub async fn derive_resolution(
    gateway: &Gateway,
    policy: &RetryPolicy,
    store: &SessionStore,
    topic: &str,
    presiding: &str,
) -> Result<Resolution> {
    let prompt = resolution_prompt(&ResolutionParams { topic });
    let slot = store.resolution_raw_path();
    let outcome = invoke_with_retry(gateway, policy, presiding, &prompt, &slot).await;

    if outcome.degraded() {
        return Err(ConclaveError::ResolutionDerivationFailed(format!(
            "presiding participant '{presiding}' was unavailable after {} attempt(s)",
            outcome.attempts
        ))
        .into());
    }

    let resolution = extract_typed::<Resolution>(&outcome.text)
        .map_err(|err| ConclaveError::ResolutionDerivationFailed(err.to_string()))?;
    if resolution.proposition.trim().is_empty() {
        return Err(ConclaveError::ResolutionDerivationFailed(
            "derived proposition is empty".to_string(),
        )
        .into());
    }

    store.write_json(&store.resolution_path(), &resolution)?;
    tracing::info!(proposition = %resolution.proposition, "resolution derived");
    Ok(resolution)
}

/// Infer every participant's stance from the full debate record in one
/// structured call, then validate the tally invariant. The tally is counted
/// here, never taken from the analyst.
pub async fn analyze_positions(
    gateway: &Gateway,
    policy: &RetryPolicy,
    store: &SessionStore,
    resolution: &Resolution,
    participants: &[String],
    history: &str,
) -> Result<PositionAnalysis> {
    let prompt = position_analysis_prompt(&PositionAnalysisParams {
        proposition: &resolution.proposition,
        participants,
        history,
    });
    let slot = store.position_analysis_raw_path();
    let outcome = invoke_with_retry(gateway, policy, gateway_analyst(participants), &prompt, &slot)
        .await;

    if outcome.degraded() {
        return Err(ConclaveError::InvalidStructuredResponse(format!(
            "position analysis unavailable after {} attempt(s)",
            outcome.attempts
        ))
        .into());
    }

    let payload = extract_typed::<PositionsPayload>(&outcome.text)?;
    let analysis = validate_positions(payload, participants)?;

    store.write_json(&store.position_analysis_path(), &analysis)?;
    tracing::info!(tally = %analysis.tally_line(), "positions analyzed");
    Ok(analysis)
}

/// The presiding participant performs the analysis.
fn gateway_analyst(participants: &[String]) -> &str {
    participants.first().map(String::as_str).unwrap_or_default()
}

/// Every session participant must appear exactly once; the resulting tally
/// sums to the participant count or the session aborts. Never silently
/// clamped or corrected.
fn validate_positions(
    payload: PositionsPayload,
    participants: &[String],
) -> Result<PositionAnalysis, ConclaveError> {
    let mut by_id: BTreeMap<&str, &RawPosition> = BTreeMap::new();
    for position in &payload.positions {
        // Duplicates collapse here and surface as a short tally below.
        by_id.insert(position.participant.as_str(), position);
    }

    let mut positions = Vec::with_capacity(participants.len());
    for participant in participants {
        if let Some(raw) = by_id.get(participant.as_str()) {
            positions.push(ParticipantPosition {
                participant: participant.clone(),
                stance: raw.stance,
                confidence: raw.confidence.clamp(0.0, 1.0),
                rationale: raw.rationale.clone(),
            });
        }
    }

    let mut tally: BTreeMap<Stance, usize> = BTreeMap::new();
    for position in &positions {
        *tally.entry(position.stance).or_insert(0) += 1;
    }

    let tally_total: usize = tally.values().sum();
    if tally_total != participants.len() {
        return Err(ConclaveError::TallyInvariantViolation {
            tally_total,
            participant_count: participants.len(),
        });
    }

    Ok(PositionAnalysis { positions, tally })
}

/// Deterministic, rule-based opinion assignment. No model call.
///
/// Majority: lead to the strongest advocate of the winning stance, dissent
/// to the strongest advocate of the opposing stance, concurrence to a
/// remaining winning-side participant if one exists.
///
/// Split (top two counts equal, including 1-1-1): the presiding
/// participant's own stance becomes the plurality position and the presiding
/// participant self-assigns the lead opinion. A participant holding a
/// genuinely distinct third stance authors a concurrence, not a dissent.
pub fn assign_opinions(
    analysis: &PositionAnalysis,
    presiding: &str,
) -> Result<OpinionAssignment> {
    let mut ranked = analysis
        .tally
        .iter()
        .map(|(stance, count)| (*stance, *count))
        .collect::<Vec<(Stance, usize)>>();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let (top_stance, top_count) = *ranked
        .first()
        .ok_or_else(|| anyhow::anyhow!("position analysis contains no stances"))?;
    let split = ranked.get(1).is_some_and(|(_, count)| *count == top_count);

    let assignment = if split {
        let presiding_position = analysis.position_for(presiding).ok_or_else(|| {
            anyhow::anyhow!("presiding participant '{presiding}' missing from position analysis")
        })?;
        let position = presiding_position.stance;

        let dissent_stance = opposing_stance(position, &analysis.tally);
        let dissent_author = dissent_stance
            .and_then(|stance| strongest_advocate(analysis, stance, &[presiding]));

        let concurrence_author = analysis
            .tally
            .keys()
            .copied()
            .find(|stance| *stance != position && Some(*stance) != dissent_stance)
            .and_then(|stance| strongest_advocate(analysis, stance, &[presiding]));

        OpinionAssignment {
            opinion_type: OpinionType::Plurality,
            position,
            lead_author: presiding.to_string(),
            concurrence_author,
            dissent_author,
        }
    } else {
        let lead_author = strongest_advocate(analysis, top_stance, &[]).ok_or_else(|| {
            anyhow::anyhow!("no advocate found for winning stance '{}'", top_stance.label())
        })?;

        let dissent_stance = opposing_stance(top_stance, &analysis.tally);
        let dissent_author =
            dissent_stance.and_then(|stance| strongest_advocate(analysis, stance, &[]));

        let concurrence_author =
            strongest_advocate(analysis, top_stance, &[lead_author.as_str()]);

        OpinionAssignment {
            opinion_type: OpinionType::Majority,
            position: top_stance,
            lead_author,
            concurrence_author,
            dissent_author,
        }
    };

    Ok(assignment)
}

/// The stance the dissent argues from: the direct opposite when represented,
/// otherwise the best-represented other stance.
fn opposing_stance(position: Stance, tally: &BTreeMap<Stance, usize>) -> Option<Stance> {
    if let Some(opposite) = position.opposite()
        && tally.get(&opposite).copied().unwrap_or(0) > 0
    {
        return Some(opposite);
    }
    tally
        .iter()
        .filter(|(stance, count)| **stance != position && **count > 0)
        .max_by_key(|(_, count)| **count)
        .map(|(stance, _)| *stance)
}

/// Highest confidence wins; ties break toward session speaking order.
fn strongest_advocate(
    analysis: &PositionAnalysis,
    stance: Stance,
    exclude: &[&str],
) -> Option<String> {
    let mut best: Option<&ParticipantPosition> = None;
    for position in &analysis.positions {
        if position.stance != stance || exclude.contains(&position.participant.as_str()) {
            continue;
        }
        if best.is_none_or(|current| position.confidence > current.confidence) {
            best = Some(position);
        }
    }
    best.map(|position| position.participant.clone())
}

/// Write the assigned opinions. Per-author failures degrade to a placeholder
/// file; the session still completes.
pub async fn write_opinions(
    gateway: &Gateway,
    policy: &RetryPolicy,
    store: &SessionStore,
    resolution: &Resolution,
    analysis: &PositionAnalysis,
    assignment: &OpinionAssignment,
    history: &str,
) -> Result<Vec<(String, String)>> {
    store.write_json(&store.opinion_assignments_path(), assignment)?;

    let mut slots: Vec<(&str, &str)> = vec![(LEAD_OPINION_PREFIX, assignment.lead_author.as_str())];
    if let Some(author) = assignment.concurrence_author.as_deref() {
        slots.push((CONCURRENCE_OPINION_PREFIX, author));
    }
    if let Some(author) = assignment.dissent_author.as_deref() {
        slots.push((DISSENT_OPINION_PREFIX, author));
    }

    let tally_line = analysis.tally_line();
    let mut written = Vec::with_capacity(slots.len());
    for (kind, author) in slots {
        let stance = analysis
            .position_for(author)
            .map(|position| position.stance.label())
            .unwrap_or("nuanced");
        let prompt = opinion_prompt(&OpinionParams {
            kind,
            opinion_type: assignment.opinion_type.label(),
            proposition: &resolution.proposition,
            stance,
            tally_line: &tally_line,
            history,
        });
        let slot = store.opinion_path(kind, author);
        let outcome = invoke_with_retry(gateway, policy, author, &prompt, &slot).await;
        if outcome.degraded() {
            tracing::warn!(kind, author, "opinion author degraded; placeholder written");
        }
        written.push((kind.to_string(), author.to_string()));
    }

    Ok(written)
}
