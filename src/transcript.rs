use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::judicial::{OpinionAssignment, PositionAnalysis, Resolution};
use crate::session::{RoundFile, SessionStore};

/// Render the full transcript from the session's files. Regenerated
/// wholesale; never partially edited. Round files are read in numeric
/// order regardless of how the filesystem lists them.
pub fn render_transcript(store: &SessionStore) -> Result<String> {
    let meta = &store.metadata;
    let mut out = String::new();

    out.push_str(&format!("# Council Transcript: {}\n\n", meta.topic));
    out.push_str(&format!("- Mode: {}\n", meta.mode.label()));
    out.push_str(&format!("- Rounds: {}\n", meta.rounds));
    out.push_str(&format!("- Participants: {}\n", meta.participants.join(", ")));
    out.push_str(&format!("- Created: {}\n", meta.created_at.to_rfc3339()));

    if store.resolution_path().exists() {
        let resolution: Resolution = store.read_json(&store.resolution_path())?;
        out.push_str("\n## Resolution\n\n");
        out.push_str(&format!("{}\n", resolution.proposition));
        if !resolution.dimensions.is_empty() {
            out.push_str("\nKey dimensions:\n");
            for dimension in &resolution.dimensions {
                out.push_str(&format!("- {dimension}\n"));
            }
        }
    }

    let moderation = store
        .list_moderation_files()?
        .into_iter()
        .collect::<BTreeMap<u32, PathBuf>>();

    let mut by_round: BTreeMap<u32, Vec<RoundFile>> = BTreeMap::new();
    for file in store.list_round_files()? {
        by_round.entry(file.round).or_default().push(file);
    }

    for (round, mut files) in by_round {
        out.push_str(&format!("\n## Round {round}\n"));

        if let Some(path) = moderation.get(&round) {
            out.push_str("\n### Moderator's note\n\n");
            out.push_str(store.read_text(path)?.trim_end());
            out.push('\n');
        }

        sort_by_speaking_order(&mut files, &meta.participants);
        for file in files {
            out.push_str(&format!("\n### {}\n\n", file.participant));
            out.push_str(store.read_text(&file.path)?.trim_end());
            out.push('\n');
        }
    }

    let syntheses = store.list_synthesis_files()?;
    if !syntheses.is_empty() {
        out.push_str("\n## Individual syntheses\n");
        let mut ordered = syntheses;
        ordered.sort_by_key(|(participant, _)| speaking_rank(participant, &meta.participants));
        for (participant, path) in ordered {
            out.push_str(&format!("\n### {participant}\n\n"));
            out.push_str(store.read_text(&path)?.trim_end());
            out.push('\n');
        }
    }

    if store.final_synthesis_path().exists() {
        out.push_str("\n## Final synthesis\n\n");
        out.push_str(store.read_text(&store.final_synthesis_path())?.trim_end());
        out.push('\n');
    }

    if store.position_analysis_path().exists() {
        let analysis: PositionAnalysis = store.read_json(&store.position_analysis_path())?;
        out.push_str("\n## Vote\n\n");
        out.push_str(&format!("Tally: {}\n\n", analysis.tally_line()));
        for position in &analysis.positions {
            out.push_str(&format!(
                "- {}: {} (confidence {:.2}){}\n",
                position.participant,
                position.stance.label(),
                position.confidence,
                if position.rationale.is_empty() {
                    String::new()
                } else {
                    format!(" - {}", position.rationale)
                }
            ));
        }
    }

    if store.opinion_assignments_path().exists() {
        let assignment: OpinionAssignment = store.read_json(&store.opinion_assignments_path())?;
        out.push_str(&format!(
            "\n## Opinions ({} decision, position: {})\n",
            assignment.opinion_type.label(),
            assignment.position.label()
        ));
        for (kind, participant, path) in store.list_opinion_files()? {
            out.push_str(&format!("\n### {kind} ({participant})\n\n"));
            out.push_str(store.read_text(&path)?.trim_end());
            out.push('\n');
        }
    }

    Ok(out)
}

pub fn write_transcript(store: &SessionStore) -> Result<PathBuf> {
    let transcript = render_transcript(store)?;
    let path = store.transcript_path();
    store.write_text(&path, &transcript)?;
    Ok(path)
}

pub fn run_transcript_command(dir: &str) -> Result<()> {
    let store = SessionStore::open(Path::new(dir))?;
    let path = write_transcript(&store)?;
    println!("Transcript written to '{}'.", path.display());
    Ok(())
}

fn speaking_rank(participant: &str, order: &[String]) -> usize {
    order
        .iter()
        .position(|id| id == participant)
        .unwrap_or(order.len())
}

fn sort_by_speaking_order(files: &mut [RoundFile], order: &[String]) {
    files.sort_by_key(|file| {
        (
            speaking_rank(&file.participant, order),
            file.participant.clone(),
        )
    });
}
