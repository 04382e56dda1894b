//! Prompt templates as pure functions over small typed parameter structs.
//! Nothing here touches an adapter, so exact prompt content is unit-testable.

use crate::cli::Mode;

pub struct OpeningParams<'a> {
    pub topic: &'a str,
    pub mode: Mode,
    pub total_rounds: u32,
    /// Judicial sessions open against the derived proposition.
    pub proposition: Option<&'a str>,
}

pub struct RebuttalParams<'a> {
    pub topic: &'a str,
    pub mode: Mode,
    pub round: u32,
    pub total_rounds: u32,
    pub history: &'a str,
    pub own_previous: Option<&'a str>,
    pub moderation: Option<&'a str>,
    pub proposition: Option<&'a str>,
}

pub struct SynthesisParams<'a> {
    pub topic: &'a str,
    pub mode: Mode,
    pub history: &'a str,
}

pub struct CombinedSynthesisParams<'a> {
    pub topic: &'a str,
    pub syntheses: &'a [(String, String)],
}

pub struct ModerationParams<'a> {
    pub proposition: &'a str,
    pub next_round: u32,
    pub total_rounds: u32,
    pub history: &'a str,
}

pub struct ResolutionParams<'a> {
    pub topic: &'a str,
}

pub struct PositionAnalysisParams<'a> {
    pub proposition: &'a str,
    pub participants: &'a [String],
    pub history: &'a str,
}

pub struct OpinionParams<'a> {
    pub kind: &'a str,
    pub opinion_type: &'a str,
    pub proposition: &'a str,
    pub stance: &'a str,
    pub tally_line: &'a str,
    pub history: &'a str,
}

fn mode_directive(mode: Mode) -> &'static str {
    match mode {
        Mode::Collaborative => {
            "Build on the other participants' strongest points and work toward a shared \
             recommendation."
        }
        Mode::Adversarial => {
            "Challenge the other participants' weakest claims directly and defend your own \
             position under pressure."
        }
        Mode::Exploratory => {
            "Broaden the space: surface angles, precedents, and second-order effects no one has \
             raised yet."
        }
        Mode::Judicial => {
            "Argue for or against the resolution on the merits, citing the discussion so far as \
             the record."
        }
    }
}

pub fn opening_prompt(p: &OpeningParams) -> String {
    let framing = match p.proposition {
        Some(proposition) => format!("RESOLUTION UNDER DEBATE:\n{proposition}\n"),
        None => format!("TOPIC:\n{}\n", p.topic),
    };
    format!(
        "{framing}\n\
         This is round 1 of {total} in a {mode} council discussion.\n\
         {directive}\n\n\
         Give your opening statement: your position, your strongest two or three arguments, \
         and what evidence would change your mind. Do not address other participants yet.",
        total = p.total_rounds,
        mode = p.mode.label(),
        directive = mode_directive(p.mode),
    )
}

pub fn rebuttal_prompt(p: &RebuttalParams) -> String {
    let framing = match p.proposition {
        Some(proposition) => format!("RESOLUTION UNDER DEBATE:\n{proposition}\n"),
        None => format!("TOPIC:\n{}\n", p.topic),
    };
    let mut out = format!(
        "{framing}\n\
         This is round {round} of {total} in a {mode} council discussion.\n\
         {directive}\n",
        round = p.round,
        total = p.total_rounds,
        mode = p.mode.label(),
        directive = mode_directive(p.mode),
    );

    if let Some(moderation) = p.moderation {
        out.push_str("\nMODERATOR'S FOCUS FOR THIS ROUND:\n");
        out.push_str(moderation);
        out.push('\n');
    }

    out.push_str("\nDISCUSSION SO FAR (other participants):\n");
    if p.history.is_empty() {
        out.push_str("No previous discussion.\n");
    } else {
        out.push_str(p.history);
        out.push('\n');
    }

    if let Some(own) = p.own_previous {
        out.push_str("\nYOUR PREVIOUS STATEMENT:\n");
        out.push_str(own);
        out.push('\n');
    }

    out.push_str(
        "\nRespond to the strongest opposing arguments above. Concede points that deserve it, \
         rebut the ones that do not, and sharpen your own position.",
    );
    out
}

pub fn synthesis_prompt(p: &SynthesisParams) -> String {
    format!(
        "TOPIC:\n{topic}\n\n\
         The {mode} discussion is complete. Full record:\n{history}\n\n\
         Write your individual synthesis: where the council converged, where it still \
         disagrees, and your final recommendation with its key caveats.",
        topic = p.topic,
        mode = p.mode.label(),
        history = if p.history.is_empty() {
            "No previous discussion."
        } else {
            p.history
        },
    )
}

pub fn combined_synthesis_prompt(p: &CombinedSynthesisParams) -> String {
    let mut out = format!(
        "TOPIC:\n{}\n\n\
         Each participant has written an individual synthesis:\n",
        p.topic
    );
    for (participant, text) in p.syntheses {
        out.push_str(&format!("\n--- Synthesis from {participant} ---\n{text}\n"));
    }
    out.push_str(
        "\nMerge these into one combined verdict for the council: the shared conclusion, the \
         strongest dissenting caveat, and the concrete next steps. Write it as a standalone \
         document.",
    );
    out
}

pub fn moderation_prompt(p: &ModerationParams) -> String {
    format!(
        "RESOLUTION UNDER DEBATE:\n{proposition}\n\n\
         You are moderating. Record of the debate so far:\n{history}\n\n\
         Before round {next} of {total}, write a short moderation note: the two or three \
         points of genuine disagreement the next round should focus on, and any argument that \
         has been asserted but not yet supported. Do not take a side.",
        proposition = p.proposition,
        next = p.next_round,
        total = p.total_rounds,
        history = if p.history.is_empty() {
            "No previous discussion."
        } else {
            p.history
        },
    )
}

pub fn resolution_prompt(p: &ResolutionParams) -> String {
    format!(
        "OPEN TOPIC:\n{topic}\n\n\
         Convert this topic into a crisp yes/no resolution the council can vote on.\n\n\
         Your response MUST be valid JSON and nothing else:\n\
         {{\n\
         \x20 \"proposition\": \"Resolved: <one clear yes/no proposition>\",\n\
         \x20 \"dimensions\": [\"<key dimension 1>\", \"<key dimension 2>\", \"<key dimension 3>\"]\n\
         }}",
        topic = p.topic,
    )
}

pub fn position_analysis_prompt(p: &PositionAnalysisParams) -> String {
    format!(
        "RESOLUTION:\n{proposition}\n\n\
         FULL DEBATE RECORD:\n{history}\n\n\
         Infer each participant's final stance on the resolution. Participants, in order: \
         {participants}. A participant represented only by an unavailability placeholder \
         takes stance \"nuanced\" with confidence 0.0.\n\n\
         Your response MUST be valid JSON and nothing else, with exactly one entry per \
         participant:\n\
         {{\n\
         \x20 \"positions\": [\n\
         \x20   {{\"participant\": \"<id>\", \"stance\": \"affirm|oppose|nuanced\", \
         \"confidence\": 0.0, \"rationale\": \"<one sentence>\"}}\n\
         \x20 ]\n\
         }}",
        proposition = p.proposition,
        participants = p.participants.join(", "),
        history = if p.history.is_empty() {
            "No previous discussion."
        } else {
            p.history
        },
    )
}

pub fn opinion_prompt(p: &OpinionParams) -> String {
    format!(
        "RESOLUTION:\n{proposition}\n\n\
         VOTE: {tally}\n\n\
         DEBATE RECORD:\n{history}\n\n\
         You are writing the {kind} opinion of a {opinion_type} decision. Your inferred \
         stance is '{stance}'. Write the opinion in your own voice: state the holding as it \
         concerns the resolution, the reasoning that carries it, and the limits of the \
         decision. Do not summarize the other opinions.",
        proposition = p.proposition,
        tally = p.tally_line,
        kind = p.kind,
        opinion_type = p.opinion_type,
        stance = p.stance,
        history = if p.history.is_empty() {
            "No previous discussion."
        } else {
            p.history
        },
    )
}
