use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ConclaveError;

/// Turn raw agent text that is supposed to contain a JSON payload into a
/// validated `Value`, or fail definitively. Every downstream decision
/// (votes, opinions) depends on this being correct or absent: the repairs
/// are bounded and the routine never invents a payload that was not there.
/// Already-valid input round-trips unchanged.
pub fn extract_structured(raw: &str) -> Result<Value, ConclaveError> {
    let unfenced = strip_code_fence(raw.trim());
    let trimmed = unfenced.trim();

    let candidate = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        trimmed.to_string()
    } else if let Some(embedded) = embedded_object(trimmed) {
        embedded.to_string()
    } else {
        return Err(ConclaveError::InvalidStructuredResponse(
            "no JSON object or array found in response".to_string(),
        ));
    };

    if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
        return Ok(value);
    }

    for repaired in repair_candidates(&candidate) {
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            tracing::debug!(
                original_len = candidate.len(),
                repaired_len = repaired.len(),
                "structured response parsed after textual repair"
            );
            return Ok(value);
        }
    }

    Err(ConclaveError::InvalidStructuredResponse(format!(
        "response could not be parsed as JSON after repairs: {}",
        head_for_diagnostics(&candidate)
    )))
}

/// Typed extraction on top of `extract_structured`.
pub fn extract_typed<T: DeserializeOwned>(raw: &str) -> Result<T, ConclaveError> {
    let value = extract_structured(raw)?;
    serde_json::from_value::<T>(value).map_err(|err| {
        ConclaveError::InvalidStructuredResponse(format!(
            "structured payload did not match the expected shape: {err}"
        ))
    })
}

/// Bounded repairs for common agent formatting mistakes, cumulative and in
/// a fixed order. No further guessing beyond these.
fn repair_candidates(candidate: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    let collapsed = collapse_triple_quotes(candidate);
    if collapsed != candidate {
        candidates.push(collapsed.clone());
    }

    if let Some(fixed) = fix_dangling_bracket(&collapsed) {
        candidates.push(fixed.clone());
        if let Some(balanced) = balance_closers(&fixed) {
            candidates.push(balanced);
        }
    }

    if let Some(balanced) = balance_closers(&collapsed) {
        candidates.push(balanced);
    }

    candidates
}

/// Drop a markdown code fence if the first line opens one.
fn strip_code_fence(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if !first_line.trim_start().starts_with("```") {
        return text.to_string();
    }

    let mut lines = text.lines().skip(1).collect::<Vec<&str>>();
    if let Some(last) = lines.last()
        && last.trim() == "```"
    {
        lines.pop();
    }
    lines.join("\n")
}

/// The substring from the first `{` to its matching `}`, string-aware. If
/// the object never closes, the tail is returned so the balance repair can
/// finish the job.
fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' | b'[' if !in_string => depth += 1,
            b'}' | b']' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    Some(&text[start..])
}

/// Collapse triple-quote artifacts (`"""`) some agents emit around string
/// values.
fn collapse_triple_quotes(text: &str) -> String {
    text.replace("\"\"\"", "\"")
}

/// A dangling `]` standing where a `}` belongs: the text ends with a closing
/// bracket that has no matching opener while an object is still open.
fn fix_dangling_bracket(text: &str) -> Option<String> {
    let trimmed = text.trim_end();
    if !trimmed.ends_with(']') {
        return None;
    }

    let counts = delimiter_counts(trimmed);
    if counts.open_braces > counts.close_braces && counts.close_brackets > counts.open_brackets {
        let mut fixed = trimmed[..trimmed.len() - 1].to_string();
        fixed.push('}');
        return Some(fixed);
    }
    None
}

/// Last resort: append whatever closers are needed to balance the openers
/// already seen. Returns `None` when the text is balanced or unsalvageable
/// (e.g. an unterminated string).
fn balance_closers(text: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for byte in text.bytes() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => stack.push(b'}'),
            b'[' if !in_string => stack.push(b']'),
            b'}' | b']' if !in_string => {
                if stack.last() == Some(&byte) {
                    stack.pop();
                } else {
                    return None;
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() {
        return None;
    }

    let mut balanced = text.to_string();
    if in_string {
        balanced.push('"');
    }
    while let Some(closer) = stack.pop() {
        balanced.push(closer as char);
    }
    Some(balanced)
}

struct DelimiterCounts {
    open_braces: usize,
    close_braces: usize,
    open_brackets: usize,
    close_brackets: usize,
}

fn delimiter_counts(text: &str) -> DelimiterCounts {
    let mut counts = DelimiterCounts {
        open_braces: 0,
        close_braces: 0,
        open_brackets: 0,
        close_brackets: 0,
    };
    let mut in_string = false;
    let mut escaped = false;

    for byte in text.bytes() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => counts.open_braces += 1,
            b'}' if !in_string => counts.close_braces += 1,
            b'[' if !in_string => counts.open_brackets += 1,
            b']' if !in_string => counts.close_brackets += 1,
            _ => {}
        }
    }
    counts
}

fn head_for_diagnostics(text: &str) -> String {
    let mut iter = text.chars();
    let head = iter.by_ref().take(120).collect::<String>();
    if iter.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
