use std::collections::HashMap;

use crate::cli::ContextStrategy;
use crate::config::RuntimeConfig;
use crate::error::ConclaveError;
use crate::session::{RoundRecord, SessionStore};

/// Maximum characters of one response carried into a round summary.
pub const SUMMARY_RESPONSE_HEAD_CHARS: usize = 240;

/// Marker prepended whenever history had to be cut below the budget. The
/// agent is never silently handed an incomplete context.
pub const TRUNCATION_MARKER: &str = "[truncated]";

const BLOCK_SEPARATOR: &str = "\n\n";

/// Assembles each round's prompt history under a fixed character ceiling.
/// Prior rounds enter in numeric order; when the ceiling would be exceeded
/// the oldest rounds are replaced by cached summaries first, and truncation
/// is the explicit last resort. Owns the `ContextSummary` cache.
pub struct ContextBudget {
    budget: usize,
    strategy: ContextStrategy,
    summaries: HashMap<u32, String>,
    store: SessionStore,
}

struct Block {
    round: u32,
    text: String,
}

impl ContextBudget {
    pub fn new(cfg: &RuntimeConfig, store: SessionStore) -> Self {
        Self {
            budget: cfg.char_budget,
            strategy: cfg.context_strategy,
            summaries: HashMap::new(),
            store,
        }
    }

    /// History block for the next round's prompts. `exclude` drops that
    /// participant's own turns from verbatim blocks (rebuttal prompts show
    /// the actor's previous statement separately).
    pub fn assemble_history(&mut self, rounds: &[RoundRecord], exclude: Option<&str>) -> String {
        let mut ordered = rounds.iter().collect::<Vec<&RoundRecord>>();
        ordered.sort_by_key(|round| round.index);

        if ordered.is_empty() {
            return String::new();
        }

        let mut blocks = match self.strategy {
            ContextStrategy::Full => {
                return join_blocks(
                    &ordered
                        .iter()
                        .map(|round| Block {
                            round: round.index,
                            text: format_round_block(round, exclude),
                        })
                        .collect::<Vec<Block>>(),
                );
            }
            ContextStrategy::Summarize => ordered
                .iter()
                .map(|round| Block {
                    round: round.index,
                    text: self.summary_for(round),
                })
                .collect::<Vec<Block>>(),
            ContextStrategy::Auto => ordered
                .iter()
                .map(|round| Block {
                    round: round.index,
                    text: format_round_block(round, exclude),
                })
                .collect::<Vec<Block>>(),
        };

        if self.strategy == ContextStrategy::Auto {
            // Swap oldest rounds for summaries until the assembly fits; the
            // most recent round stays verbatim.
            let mut swap_at = 0usize;
            while assembled_len(&blocks) > self.budget && swap_at + 1 < blocks.len() {
                let round = ordered[swap_at];
                blocks[swap_at] = Block {
                    round: round.index,
                    text: self.summary_for(round),
                };
                swap_at += 1;
            }
        }

        match self.try_fit(&blocks) {
            Ok(()) => join_blocks(&blocks),
            Err(err) => {
                tracing::warn!(
                    budget = self.budget,
                    error = %err,
                    "history exceeds budget after summarization; truncating oldest content"
                );
                truncate_blocks(blocks, self.budget)
            }
        }
    }

    /// The participant's most recent prior statement, for rebuttal prompts.
    pub fn own_previous(rounds: &[RoundRecord], participant: &str) -> Option<String> {
        let mut ordered = rounds.iter().collect::<Vec<&RoundRecord>>();
        ordered.sort_by_key(|round| round.index);
        ordered
            .iter()
            .rev()
            .find_map(|round| round.response_for(participant))
            .map(|response| response.text.clone())
    }

    /// Called by the controller when a round completes. Under the
    /// `summarize` strategy the summary is produced eagerly; otherwise it
    /// stays lazy until the budget first demands it.
    pub fn on_round_complete(&mut self, round: &RoundRecord) {
        if self.strategy == ContextStrategy::Summarize {
            let _ = self.summary_for(round);
        }
    }

    /// Lazily produced, cached in memory and on disk, generated at most once
    /// per round.
    fn summary_for(&mut self, round: &RoundRecord) -> String {
        if let Some(cached) = self.summaries.get(&round.index) {
            return cached.clone();
        }

        let path = self.store.summary_path(round.index);
        if let Ok(existing) = self.store.read_text(&path) {
            self.summaries.insert(round.index, existing.clone());
            return existing;
        }

        let summary = summarize_round(round, SUMMARY_RESPONSE_HEAD_CHARS);
        if let Err(err) = self.store.write_text(&path, &summary) {
            tracing::warn!(
                round = round.index,
                error = %format!("{err:#}"),
                "failed to cache round summary"
            );
        }
        self.summaries.insert(round.index, summary.clone());
        summary
    }

    fn try_fit(&self, blocks: &[Block]) -> Result<(), ConclaveError> {
        if assembled_len(blocks) <= self.budget {
            Ok(())
        } else {
            Err(ConclaveError::BudgetUnsatisfiable {
                budget: self.budget,
                round: blocks.last().map(|block| block.round).unwrap_or(0),
            })
        }
    }
}

fn assembled_len(blocks: &[Block]) -> usize {
    let separators = blocks.len().saturating_sub(1) * BLOCK_SEPARATOR.len();
    blocks.iter().map(|block| block.text.chars().count()).sum::<usize>() + separators
}

fn join_blocks(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(|block| block.text.as_str())
        .collect::<Vec<&str>>()
        .join(BLOCK_SEPARATOR)
}

/// Drop oldest blocks behind an explicit marker until the assembly fits. If
/// even the newest block alone is over budget, keep its tail.
fn truncate_blocks(mut blocks: Vec<Block>, budget: usize) -> String {
    let marker_len = TRUNCATION_MARKER.len() + BLOCK_SEPARATOR.len();
    while blocks.len() > 1 && assembled_len(&blocks) + marker_len > budget {
        blocks.remove(0);
    }

    let newest = match blocks.pop() {
        Some(block) => block,
        None => return TRUNCATION_MARKER.to_string(),
    };
    let mut kept_prefix = join_blocks(&blocks);

    let newest_budget = budget
        .saturating_sub(marker_len)
        .saturating_sub(kept_prefix.chars().count());
    let newest_chars = newest.text.chars().count();
    let newest_text = if newest_chars > newest_budget {
        kept_prefix.clear();
        let skip = newest_chars.saturating_sub(budget.saturating_sub(marker_len));
        newest.text.chars().skip(skip).collect::<String>()
    } else {
        newest.text
    };

    let mut out = String::from(TRUNCATION_MARKER);
    if !kept_prefix.is_empty() {
        out.push_str(BLOCK_SEPARATOR);
        out.push_str(&kept_prefix);
    }
    out.push_str(BLOCK_SEPARATOR);
    out.push_str(&newest_text);
    out
}

/// Verbatim rendering of one round for prompt history.
pub fn format_round_block(round: &RoundRecord, exclude: Option<&str>) -> String {
    let mut out = format!("--- Round {} ---", round.index);
    for response in &round.responses {
        if exclude.is_some_and(|id| id == response.participant) {
            continue;
        }
        out.push('\n');
        out.push_str(&format!("[{}]: {}", response.participant, response.text));
    }
    out
}

/// Condensed rendering of one round: the head of every response, degraded
/// placeholders included so absences stay visible downstream.
pub fn summarize_round(round: &RoundRecord, max_chars_per_response: usize) -> String {
    let mut out = format!("--- Round {} (summary) ---", round.index);
    for response in &round.responses {
        let head = head_chars(&response.text, max_chars_per_response);
        out.push('\n');
        out.push_str(&format!("[{}]: {}", response.participant, head));
    }
    out
}

fn head_chars(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<&str>>().join(" ");
    let mut iter = flattened.chars();
    let head = iter.by_ref().take(max_chars).collect::<String>();
    if iter.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
