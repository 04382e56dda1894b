use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tempfile::tempdir;

use crate::adapter::*;
use crate::cli::*;
use crate::config::*;
use crate::context::*;
use crate::debate::*;
use crate::doctor::*;
use crate::error::*;
use crate::extract::*;
use crate::gateway::*;
use crate::judicial::*;
use crate::persona::*;
use crate::retry::*;
use crate::session::*;
use crate::telemetry::*;
use crate::transcript::*;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn participant(id: &str) -> ParticipantSpec {
    ParticipantSpec {
        id: id.to_string(),
        provider: ProviderKind::Echo,
        command: None,
        args: Vec::new(),
        persona: None,
    }
}

fn base_cfg(root: &Path) -> RuntimeConfig {
    RuntimeConfig {
        profile: "default".to_string(),
        config_path: ".conclave/config.toml".to_string(),
        mode: Mode::Collaborative,
        rounds: 3,
        participants: vec![participant("alice"), participant("bob"), participant("carol")],
        sessions_root: root.join("sessions").to_string_lossy().to_string(),
        persona_catalog_path: root.join("personas.toml").to_string_lossy().to_string(),
        char_budget: 32_000,
        context_strategy: ContextStrategy::Auto,
        retries_enabled: true,
        retry_attempts: 2,
        retry_delay_ms: 0,
        adapter_timeout_secs: 30,
        parallel_opening: false,
        telemetry_enabled: false,
        telemetry_path: root.join("telemetry.jsonl").to_string_lossy().to_string(),
    }
}

fn test_cli(config_path: &str, profile: &str) -> Cli {
    Cli {
        mode: None,
        rounds: None,
        participant: Vec::new(),
        profile: profile.to_string(),
        config_path: config_path.to_string(),
        sessions_root: None,
        persona_catalog_path: None,
        char_budget: None,
        context_strategy: None,
        retries_enabled: None,
        retry_attempts: None,
        retry_delay_ms: None,
        adapter_timeout_secs: None,
        parallel_opening: false,
        telemetry_enabled: None,
        telemetry_path: None,
        log_filter: "warn".to_string(),
        command: Commands::Doctor,
    }
}

fn store_for(cfg: &RuntimeConfig, topic: &str) -> SessionStore {
    SessionStore::create(
        Path::new(&cfg.sessions_root),
        SessionMetadata::from_config(cfg, topic, Utc::now()),
    )
    .expect("session store should create")
}

fn personas() -> PersonaCatalog {
    PersonaCatalog::load(Path::new("/nonexistent/personas.toml"))
        .expect("builtin persona catalog should load")
}

/// Replies keyed by prompt substring, with a fallback. Stands in for an
/// external agent without spawning anything.
struct ScriptedAdapter {
    replies: Vec<(&'static str, String)>,
    fail_on: Vec<&'static str>,
    fallback: String,
}

impl ScriptedAdapter {
    fn new(fallback: &str) -> Self {
        Self {
            replies: Vec::new(),
            fail_on: Vec::new(),
            fallback: fallback.to_string(),
        }
    }

    fn on(mut self, needle: &'static str, reply: impl Into<String>) -> Self {
        self.replies.push((needle, reply.into()));
        self
    }

    /// Exit nonzero whenever the prompt contains `needle`.
    fn failing_on(mut self, needle: &'static str) -> Self {
        self.fail_on.push(needle);
        self
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: AdapterRequest<'_>) -> Result<AdapterReply> {
        if self
            .fail_on
            .iter()
            .any(|needle| request.prompt.contains(needle))
        {
            std::fs::write(request.output_path, "scripted failure")?;
            return Ok(AdapterReply {
                output_path: request.output_path.to_path_buf(),
                exit_status: 1,
            });
        }

        let reply = self
            .replies
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone());
        std::fs::write(request.output_path, &reply)?;
        Ok(AdapterReply {
            output_path: request.output_path.to_path_buf(),
            exit_status: 0,
        })
    }
}

/// Always fails with the given exit status.
struct FailingAdapter {
    exit_status: i32,
}

#[async_trait]
impl Adapter for FailingAdapter {
    fn name(&self) -> &str {
        "failing"
    }

    async fn invoke(&self, request: AdapterRequest<'_>) -> Result<AdapterReply> {
        std::fs::write(request.output_path, "garbled partial output")?;
        Ok(AdapterReply {
            output_path: request.output_path.to_path_buf(),
            exit_status: self.exit_status,
        })
    }
}

/// Fails the first `fail_times` calls, then succeeds.
struct FlakyAdapter {
    fail_times: u32,
    calls: AtomicU32,
    reply: String,
}

impl FlakyAdapter {
    fn new(fail_times: u32, reply: &str) -> Self {
        Self {
            fail_times,
            calls: AtomicU32::new(0),
            reply: reply.to_string(),
        }
    }
}

#[async_trait]
impl Adapter for FlakyAdapter {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn invoke(&self, request: AdapterRequest<'_>) -> Result<AdapterReply> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            std::fs::write(request.output_path, "transient failure")?;
            return Ok(AdapterReply {
                output_path: request.output_path.to_path_buf(),
                exit_status: 1,
            });
        }
        std::fs::write(request.output_path, &self.reply)?;
        Ok(AdapterReply {
            output_path: request.output_path.to_path_buf(),
            exit_status: 0,
        })
    }
}

/// Never completes; exercises the gateway timeout.
struct HangingAdapter;

#[async_trait]
impl Adapter for HangingAdapter {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn invoke(&self, _request: AdapterRequest<'_>) -> Result<AdapterReply> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        unreachable!("hanging adapter should be cancelled by the gateway timeout")
    }
}

fn gateway_with(
    cfg: &RuntimeConfig,
    adapters: Vec<(&str, Arc<dyn Adapter>)>,
) -> Gateway {
    let mut registry = AdapterRegistry::default();
    for (id, adapter) in adapters {
        registry.insert(id, adapter);
    }
    Gateway::new(cfg, registry, personas())
}

fn round_of(index: u32, responses: &[(&str, &str)]) -> RoundRecord {
    RoundRecord {
        index,
        responses: responses
            .iter()
            .map(|(id, text)| ResponseRecord {
                participant: id.to_string(),
                round: index,
                text: text.to_string(),
                parsed: None,
                ok: true,
                attempts: 1,
            })
            .collect(),
    }
}

fn analysis_of(entries: &[(&str, Stance, f64)]) -> PositionAnalysis {
    let positions = entries
        .iter()
        .map(|(id, stance, confidence)| ParticipantPosition {
            participant: id.to_string(),
            stance: *stance,
            confidence: *confidence,
            rationale: String::new(),
        })
        .collect::<Vec<ParticipantPosition>>();
    let mut tally = std::collections::BTreeMap::new();
    for position in &positions {
        *tally.entry(position.stance).or_insert(0usize) += 1;
    }
    PositionAnalysis { positions, tally }
}

const RESOLUTION_NEEDLE: &str = "Convert this topic into a crisp yes/no resolution";
const ANALYSIS_NEEDLE: &str = "Infer each participant's final stance";
const MODERATION_NEEDLE: &str = "write a short moderation note";
const OPINION_NEEDLE: &str = "You are writing the";
const SYNTHESIS_NEEDLE: &str = "Write your individual synthesis";
const COMBINED_NEEDLE: &str = "Merge these into one combined verdict";

fn resolution_json() -> String {
    json!({
        "proposition": "Resolved: the proposal should be adopted",
        "dimensions": ["cost", "risk", "reversibility"]
    })
    .to_string()
}

fn analysis_json() -> String {
    json!({
        "positions": [
            {"participant": "alice", "stance": "affirm", "confidence": 0.9, "rationale": "led the case"},
            {"participant": "bob", "stance": "affirm", "confidence": 0.7, "rationale": "agreed with caveats"},
            {"participant": "carol", "stance": "oppose", "confidence": 0.8, "rationale": "argued the risks"}
        ]
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------------

#[test]
fn resolve_config_uses_defaults_without_profile_file() {
    let cli = test_cli("/nonexistent/config.toml", "default");
    let profiles = load_profiles(&cli.config_path).expect("missing file is not an error");
    let cfg = resolve_runtime_config(&cli, &profiles).expect("defaults should resolve");

    assert_eq!(cfg.rounds, 3);
    assert!(matches!(cfg.mode, Mode::Collaborative));
    assert_eq!(
        cfg.participant_ids(),
        vec!["advocate", "skeptic", "arbiter"]
    );
    assert_eq!(cfg.presiding_participant(), "advocate");
}

#[test]
fn resolve_config_rejects_rounds_out_of_bounds() {
    let mut cli = test_cli("/nonexistent/config.toml", "default");
    cli.rounds = Some(1);
    let profiles = ProfilesFile::default();
    let err = resolve_runtime_config(&cli, &profiles).expect_err("1 round should fail");
    assert!(err.to_string().contains("out of range"));

    cli.rounds = Some(11);
    let err = resolve_runtime_config(&cli, &profiles).expect_err("11 rounds should fail");
    assert!(err.to_string().contains("out of range"));
}

#[test]
fn resolve_config_prefers_cli_over_profile() {
    let dir = tempdir().expect("temp directory should create");
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[profiles.default]\nrounds = 5\nmode = \"adversarial\"\nchar_budget = 12000\n",
    )
    .expect("config should write");

    let mut cli = test_cli(&config_path.to_string_lossy(), "default");
    let profiles = load_profiles(&cli.config_path).expect("profiles should load");

    let cfg = resolve_runtime_config(&cli, &profiles).expect("profile values should resolve");
    assert_eq!(cfg.rounds, 5);
    assert!(matches!(cfg.mode, Mode::Adversarial));
    assert_eq!(cfg.char_budget, 12_000);

    cli.rounds = Some(4);
    cli.mode = Some(Mode::Judicial);
    let cfg = resolve_runtime_config(&cli, &profiles).expect("cli overrides should resolve");
    assert_eq!(cfg.rounds, 4);
    assert!(matches!(cfg.mode, Mode::Judicial));
}

#[test]
fn resolve_config_unknown_profile_lists_available() {
    let dir = tempdir().expect("temp directory should create");
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "[profiles.team]\nrounds = 4\n").expect("config should write");

    let cli = test_cli(&config_path.to_string_lossy(), "missing");
    let profiles = load_profiles(&cli.config_path).expect("profiles should load");
    let err = resolve_runtime_config(&cli, &profiles).expect_err("unknown profile should fail");
    assert!(err.to_string().contains("Available profiles: team"));
}

#[test]
fn resolve_config_selects_participants_in_requested_order() {
    let dir = tempdir().expect("temp directory should create");
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[[profiles.default.participants]]
id = "alpha"
provider = "echo"

[[profiles.default.participants]]
id = "beta"
provider = "echo"

[[profiles.default.participants]]
id = "gamma"
provider = "echo"
"#,
    )
    .expect("config should write");

    let mut cli = test_cli(&config_path.to_string_lossy(), "default");
    cli.participant = vec!["gamma".to_string(), "alpha".to_string()];
    let profiles = load_profiles(&cli.config_path).expect("profiles should load");
    let cfg = resolve_runtime_config(&cli, &profiles).expect("selection should resolve");

    assert_eq!(cfg.participant_ids(), vec!["gamma", "alpha"]);
    assert_eq!(cfg.presiding_participant(), "gamma");

    cli.participant = vec!["nobody".to_string()];
    let err = resolve_runtime_config(&cli, &profiles).expect_err("unknown id should fail");
    assert!(err.to_string().contains("Available participants"));
}

#[test]
fn resolve_config_rejects_command_provider_without_command() {
    let dir = tempdir().expect("temp directory should create");
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[[profiles.default.participants]]\nid = \"broken\"\nprovider = \"command\"\n",
    )
    .expect("config should write");

    let cli = test_cli(&config_path.to_string_lossy(), "default");
    let profiles = load_profiles(&cli.config_path).expect("profiles should load");
    let err = resolve_runtime_config(&cli, &profiles).expect_err("missing command should fail");
    assert!(err.to_string().contains("no command configured"));
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

#[test]
fn slugify_produces_safe_directory_names() {
    assert_eq!(slugify("Should we adopt Rust?"), "should-we-adopt-rust");
    assert_eq!(slugify("  !!  "), "session");
    assert!(slugify(&"x".repeat(200)).len() <= 40);
}

#[test]
fn parse_round_file_name_handles_underscored_participants() {
    assert_eq!(
        parse_round_file_name("round_10_deep_thought.md"),
        Some((10, "deep_thought".to_string()))
    );
    assert_eq!(
        parse_round_file_name("round_2_alice.md"),
        Some((2, "alice".to_string()))
    );
    assert_eq!(parse_round_file_name("synthesis_alice.md"), None);
    assert_eq!(parse_round_file_name("round_x_alice.md"), None);
    assert_eq!(parse_round_file_name("round_3_.md"), None);
}

#[test]
fn round_files_are_listed_in_numeric_order() {
    let dir = tempdir().expect("temp directory should create");
    let cfg = {
        let mut cfg = base_cfg(dir.path());
        cfg.rounds = 10;
        cfg
    };
    let store = store_for(&cfg, "ordering check");

    // Written out of order on purpose; lexical order would put 10 before 2.
    for round in [10, 1, 2] {
        store
            .write_text(
                &store.round_response_path(round, "alice"),
                &format!("round {round}"),
            )
            .expect("response should write");
    }

    let rounds = store
        .list_round_files()
        .expect("listing should succeed")
        .into_iter()
        .map(|file| file.round)
        .collect::<Vec<u32>>();
    assert_eq!(rounds, vec![1, 2, 10]);
}

#[test]
fn session_metadata_round_trips_through_open() {
    let dir = tempdir().expect("temp directory should create");
    let cfg = base_cfg(dir.path());
    let store = store_for(&cfg, "metadata round trip");

    let reopened = SessionStore::open(&store.dir).expect("store should reopen");
    assert_eq!(reopened.metadata.topic, "metadata round trip");
    assert_eq!(reopened.metadata.participants, cfg.participant_ids());
    assert_eq!(reopened.metadata.rounds, cfg.rounds);
    assert_eq!(reopened.metadata.status, SessionStatus::Running);
}

// ---------------------------------------------------------------------------
// Extractor / repairer
// ---------------------------------------------------------------------------

#[test]
fn extractor_is_idempotent_on_valid_json() {
    let raw = r#"{"proposition": "Resolved: yes", "dimensions": ["a", "b"]}"#;
    let value = extract_structured(raw).expect("valid JSON should pass through");
    let direct: serde_json::Value = serde_json::from_str(raw).expect("control parse");
    assert_eq!(value, direct);

    let array = r#"[1, 2, 3]"#;
    let value = extract_structured(array).expect("valid array should pass through");
    assert_eq!(value, json!([1, 2, 3]));
}

#[test]
fn extractor_strips_markdown_fences() {
    let raw = "```json\n{\"stance\": \"affirm\"}\n```";
    let value = extract_structured(raw).expect("fenced JSON should parse");
    assert_eq!(value, json!({"stance": "affirm"}));

    let raw_no_lang = "```\n{\"stance\": \"oppose\"}\n```";
    let value = extract_structured(raw_no_lang).expect("bare fence should parse");
    assert_eq!(value, json!({"stance": "oppose"}));
}

#[test]
fn extractor_finds_embedded_objects_in_prose() {
    let raw = "Sure! Here is my analysis:\n{\"confidence\": 0.8}\nLet me know if that helps.";
    let value = extract_structured(raw).expect("embedded object should parse");
    assert_eq!(value, json!({"confidence": 0.8}));
}

#[test]
fn extractor_collapses_triple_quotes() {
    let raw = r#"{"rationale": """strong case"""}"#;
    let value = extract_structured(raw).expect("triple quotes should collapse");
    assert_eq!(value, json!({"rationale": "strong case"}));
}

#[test]
fn extractor_fixes_dangling_closing_bracket() {
    let raw = r#"{"dimensions": ["cost", "risk"]]"#;
    let value = extract_structured(raw).expect("dangling bracket should be repaired");
    assert_eq!(value, json!({"dimensions": ["cost", "risk"]}));
}

#[test]
fn extractor_balances_missing_closers() {
    let raw = r#"{"positions": [{"participant": "alice", "stance": "affirm""#;
    let value = extract_structured(raw).expect("closers should be appended");
    assert_eq!(
        value,
        json!({"positions": [{"participant": "alice", "stance": "affirm"}]})
    );
}

#[test]
fn extractor_fails_definitively_on_prose() {
    let err = extract_structured("I believe we should proceed carefully, all things considered.")
        .expect_err("prose must never produce a payload");
    assert!(matches!(err, ConclaveError::InvalidStructuredResponse(_)));

    let err = extract_structured("").expect_err("empty input must fail");
    assert!(matches!(err, ConclaveError::InvalidStructuredResponse(_)));
}

#[test]
fn extractor_never_fabricates_from_unbalanced_garbage() {
    let err = extract_structured("}}}} not even close {{{{ ]")
        .expect_err("garbage must fail definitively");
    assert!(matches!(err, ConclaveError::InvalidStructuredResponse(_)));
}

#[test]
fn extract_typed_rejects_mismatched_shapes() {
    #[derive(serde::Deserialize, Debug)]
    #[allow(dead_code)]
    struct Expected {
        proposition: String,
    }
    let err = extract_typed::<Expected>(r#"{"other_field": 1}"#)
        .expect_err("shape mismatch must fail");
    assert!(matches!(err, ConclaveError::InvalidStructuredResponse(_)));
}

// ---------------------------------------------------------------------------
// Context budget manager
// ---------------------------------------------------------------------------

#[test]
fn history_within_budget_is_verbatim_and_numeric_ordered() {
    let dir = tempdir().expect("temp directory should create");
    let cfg = base_cfg(dir.path());
    let store = store_for(&cfg, "verbatim history");
    let mut budget = ContextBudget::new(&cfg, store);

    // Deliberately out of order; assembly must sort numerically.
    let rounds = vec![
        round_of(2, &[("alice", "second round point")]),
        round_of(1, &[("alice", "first round point")]),
    ];
    let history = budget.assemble_history(&rounds, None);

    let first = history.find("Round 1").expect("round 1 present");
    let second = history.find("Round 2").expect("round 2 present");
    assert!(first < second);
    assert!(history.contains("first round point"));
    assert!(history.contains("second round point"));
    assert!(!history.contains("(summary)"));
}

#[test]
fn oldest_round_is_summarized_first_when_over_budget() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.char_budget = 1_200;
    let store = store_for(&cfg, "summarize oldest");
    let mut budget = ContextBudget::new(&cfg, store.clone());

    let long_a = "alpha ".repeat(140);
    let long_b = "bravo ".repeat(140);
    let rounds = vec![
        round_of(1, &[("alice", long_a.as_str())]),
        round_of(2, &[("alice", long_b.as_str())]),
    ];

    let history = budget.assemble_history(&rounds, None);
    assert!(history.chars().count() <= cfg.char_budget);
    assert!(history.contains("Round 1 (summary)"));
    assert!(!history.contains("Round 2 (summary)"));
    assert!(history.contains("bravo"));
    // The lazy summary was cached to disk for reuse by later rounds.
    assert!(store.summary_path(1).exists());
    assert!(!store.summary_path(2).exists());
}

#[test]
fn assembled_history_never_exceeds_ceiling_even_when_truncating() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.char_budget = 300;
    let store = store_for(&cfg, "truncation ceiling");
    let mut budget = ContextBudget::new(&cfg, store);

    let long = "lorem ".repeat(200);
    let rounds = vec![
        round_of(1, &[("alice", long.as_str())]),
        round_of(2, &[("bob", long.as_str())]),
        round_of(3, &[("carol", long.as_str())]),
    ];

    let history = budget.assemble_history(&rounds, None);
    assert!(history.chars().count() <= cfg.char_budget);
    assert!(history.starts_with(TRUNCATION_MARKER));
}

#[test]
fn summaries_are_generated_once_and_reused() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.char_budget = 1_200;
    let store = store_for(&cfg, "summary cache");
    let mut budget = ContextBudget::new(&cfg, store.clone());

    let long = "delta ".repeat(140);
    let rounds = vec![
        round_of(1, &[("alice", long.as_str())]),
        round_of(2, &[("alice", long.as_str())]),
    ];

    let first = budget.assemble_history(&rounds, None);
    let cached = store
        .read_text(&store.summary_path(1))
        .expect("summary file should exist");
    assert!(cached.contains("delta"));

    // A second over-budget assembly reuses the cached summary even though
    // the underlying round record changed.
    let mut mutated = rounds.clone();
    mutated[0].responses[0].text = "omega ".repeat(140);
    let second = budget.assemble_history(&mutated, None);
    assert_eq!(first, second);
    assert!(!second.contains("omega"));
    assert_eq!(
        cached,
        store
            .read_text(&store.summary_path(1))
            .expect("summary file should persist")
    );
}

#[test]
fn summarize_strategy_always_substitutes_summaries() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.context_strategy = ContextStrategy::Summarize;
    let store = store_for(&cfg, "summarize strategy");
    let mut budget = ContextBudget::new(&cfg, store);

    let rounds = vec![
        round_of(1, &[("alice", "short opening")]),
        round_of(2, &[("alice", "short rebuttal")]),
    ];
    let history = budget.assemble_history(&rounds, None);
    assert!(history.contains("Round 1 (summary)"));
    assert!(history.contains("Round 2 (summary)"));
}

#[test]
fn full_strategy_keeps_everything_verbatim_over_budget() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.char_budget = 100;
    cfg.context_strategy = ContextStrategy::Full;
    let store = store_for(&cfg, "full strategy");
    let mut budget = ContextBudget::new(&cfg, store);

    let long = "epsilon ".repeat(100);
    let rounds = vec![round_of(1, &[("alice", long.as_str())])];
    let history = budget.assemble_history(&rounds, None);
    assert!(history.chars().count() > cfg.char_budget);
    assert!(!history.contains("(summary)"));
}

#[test]
fn history_excludes_the_current_actor_when_asked() {
    let dir = tempdir().expect("temp directory should create");
    let cfg = base_cfg(dir.path());
    let store = store_for(&cfg, "exclusion");
    let mut budget = ContextBudget::new(&cfg, store);

    let rounds = vec![round_of(
        1,
        &[("alice", "alice speaks"), ("bob", "bob speaks")],
    )];
    let history = budget.assemble_history(&rounds, Some("alice"));
    assert!(!history.contains("alice speaks"));
    assert!(history.contains("bob speaks"));
}

#[test]
fn own_previous_returns_latest_statement() {
    let rounds = vec![
        round_of(1, &[("alice", "opening"), ("bob", "bob opening")]),
        round_of(2, &[("alice", "rebuttal"), ("bob", "bob rebuttal")]),
    ];
    assert_eq!(
        ContextBudget::own_previous(&rounds, "alice").as_deref(),
        Some("rebuttal")
    );
    assert_eq!(ContextBudget::own_previous(&rounds, "nobody"), None);
}

#[test]
fn degraded_placeholders_survive_into_summaries() {
    let mut round = round_of(1, &[("alice", "real reply")]);
    round.responses.push(ResponseRecord {
        participant: "bob".to_string(),
        round: 1,
        text: degraded_placeholder("bob", 3),
        parsed: None,
        ok: false,
        attempts: 3,
    });

    let summary = summarize_round(&round, 240);
    assert!(summary.contains("bob"));
    assert!(summary.contains("unavailable this round"));
}

// ---------------------------------------------------------------------------
// Gateway, retry, degradation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gateway_rejects_empty_prompts() {
    let dir = tempdir().expect("temp directory should create");
    let cfg = base_cfg(dir.path());
    let gateway = gateway_with(&cfg, vec![("alice", Arc::new(ScriptedAdapter::new("hi")))]);

    let err = gateway
        .invoke("alice", "   ", &dir.path().join("slot.md"))
        .await
        .expect_err("empty prompt should be refused");
    assert!(err.to_string().contains("empty prompt"));
}

#[tokio::test]
async fn gateway_reports_unknown_participants() {
    let dir = tempdir().expect("temp directory should create");
    let cfg = base_cfg(dir.path());
    let gateway = gateway_with(&cfg, vec![]);

    let err = gateway
        .invoke("ghost", "hello", &dir.path().join("slot.md"))
        .await
        .expect_err("unknown participant should fail");
    assert!(matches!(
        err.downcast_ref::<ConclaveError>(),
        Some(ConclaveError::UnknownParticipant(_))
    ));
    assert_eq!(categorize_error(&err), ErrorCategory::Adapter);
}

#[tokio::test]
async fn gateway_surfaces_nonzero_exit_with_slot_preserved() {
    let dir = tempdir().expect("temp directory should create");
    let cfg = base_cfg(dir.path());
    let gateway = gateway_with(
        &cfg,
        vec![("alice", Arc::new(FailingAdapter { exit_status: 3 }))],
    );

    let slot = dir.path().join("slot.md");
    let err = gateway
        .invoke("alice", "hello", &slot)
        .await
        .expect_err("nonzero exit should fail");
    match err.downcast_ref::<ConclaveError>() {
        Some(ConclaveError::AdapterNonZeroExit { status, .. }) => assert_eq!(*status, 3),
        other => panic!("expected AdapterNonZeroExit, got {other:?}"),
    }
    // The raw-output slot keeps whatever the adapter wrote, for diagnostics.
    assert!(
        std::fs::read_to_string(&slot)
            .expect("slot should exist")
            .contains("garbled")
    );
}

#[tokio::test]
async fn gateway_times_out_hanging_adapters() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.adapter_timeout_secs = 1;
    let gateway = gateway_with(&cfg, vec![("alice", Arc::new(HangingAdapter))]);

    let err = gateway
        .invoke("alice", "hello", &dir.path().join("slot.md"))
        .await
        .expect_err("hanging adapter should time out");
    assert!(matches!(
        err.downcast_ref::<ConclaveError>(),
        Some(ConclaveError::AdapterTimeout { .. })
    ));
}

#[tokio::test]
async fn retry_recovers_from_transient_failures() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.retry_attempts = 3;
    let gateway = gateway_with(
        &cfg,
        vec![("alice", Arc::new(FlakyAdapter::new(2, "recovered reply")))],
    );
    let policy = RetryPolicy::from_config(&cfg);

    let outcome = invoke_with_retry(
        &gateway,
        &policy,
        "alice",
        "hello",
        &dir.path().join("slot.md"),
    )
    .await;
    assert!(outcome.ok);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.text, "recovered reply");
}

#[tokio::test]
async fn retry_degrades_after_exhausting_attempts() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.retry_attempts = 2;
    let gateway = gateway_with(
        &cfg,
        vec![("alice", Arc::new(FailingAdapter { exit_status: 1 }))],
    );
    let policy = RetryPolicy::from_config(&cfg);

    let slot = dir.path().join("slot.md");
    let outcome = invoke_with_retry(&gateway, &policy, "alice", "hello", &slot).await;
    assert!(outcome.degraded());
    assert_eq!(outcome.attempts, 2);
    assert!(outcome.text.contains("'alice'"));
    assert!(outcome.text.contains("unavailable this round"));
    // The placeholder replaces the failed output in the slot.
    assert_eq!(
        std::fs::read_to_string(&slot).expect("slot should exist"),
        outcome.text
    );
}

#[tokio::test]
async fn retry_does_not_waste_attempts_on_unknown_participants() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.retry_attempts = 5;
    let gateway = gateway_with(&cfg, vec![]);
    let policy = RetryPolicy::from_config(&cfg);

    let outcome = invoke_with_retry(
        &gateway,
        &policy,
        "ghost",
        "hello",
        &dir.path().join("slot.md"),
    )
    .await;
    assert!(outcome.degraded());
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn disabled_retries_mean_a_single_attempt() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.retries_enabled = false;
    cfg.retry_attempts = 4;
    let gateway = gateway_with(
        &cfg,
        vec![("alice", Arc::new(FailingAdapter { exit_status: 1 }))],
    );
    let policy = RetryPolicy::from_config(&cfg);

    let outcome = invoke_with_retry(
        &gateway,
        &policy,
        "alice",
        "hello",
        &dir.path().join("slot.md"),
    )
    .await;
    assert!(outcome.degraded());
    assert_eq!(outcome.attempts, 1);
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn echo_adapter_writes_deterministic_reply() {
    let dir = tempdir().expect("temp directory should create");
    let adapter = EchoAdapter::new("alice");
    let slot = dir.path().join("slot.md");

    let reply = adapter
        .invoke(AdapterRequest {
            prompt: "TOPIC:\nshould we?",
            system_prompt: "persona",
            output_path: &slot,
        })
        .await
        .expect("echo should succeed");
    assert_eq!(reply.exit_status, 0);
    let text = std::fs::read_to_string(&slot).expect("slot should exist");
    assert!(text.contains("offline echo from 'alice'"));
}

#[tokio::test]
async fn command_adapter_pipes_prompt_through_stdin() {
    let dir = tempdir().expect("temp directory should create");
    let adapter = CommandAdapter::new("sh", vec!["-c".to_string(), "cat".to_string()]);
    let slot = dir.path().join("slot.md");

    let reply = adapter
        .invoke(AdapterRequest {
            prompt: "prompt over stdin",
            system_prompt: "persona text",
            output_path: &slot,
        })
        .await
        .expect("command should run");
    assert_eq!(reply.exit_status, 0);
    assert_eq!(
        std::fs::read_to_string(&slot).expect("slot should exist"),
        "prompt over stdin"
    );
}

#[tokio::test]
async fn command_adapter_reports_exit_status() {
    let dir = tempdir().expect("temp directory should create");
    let adapter = CommandAdapter::new("sh", vec!["-c".to_string(), "exit 7".to_string()]);
    let slot = dir.path().join("slot.md");

    let reply = adapter
        .invoke(AdapterRequest {
            prompt: "irrelevant",
            system_prompt: "",
            output_path: &slot,
        })
        .await
        .expect("spawn should succeed even when the command fails");
    assert_eq!(reply.exit_status, 7);
}

#[test]
fn command_available_checks_paths_and_path_var() {
    assert!(command_available("sh"));
    assert!(!command_available("definitely-not-a-real-command-xyz"));

    let dir = tempdir().expect("temp directory should create");
    let file = dir.path().join("tool");
    std::fs::write(&file, "#!/bin/sh\n").expect("file should write");
    assert!(command_available(&file.to_string_lossy()));
}

// ---------------------------------------------------------------------------
// Judicial consensus
// ---------------------------------------------------------------------------

#[test]
fn majority_assignment_matches_the_expected_bench() {
    let analysis = analysis_of(&[
        ("alice", Stance::Affirm, 0.9),
        ("bob", Stance::Affirm, 0.7),
        ("carol", Stance::Oppose, 0.8),
    ]);
    assert_eq!(analysis.tally.get(&Stance::Affirm), Some(&2));
    assert_eq!(analysis.tally.get(&Stance::Oppose), Some(&1));

    let assignment = assign_opinions(&analysis, "alice").expect("assignment should succeed");
    assert!(matches!(assignment.opinion_type, OpinionType::Majority));
    assert!(matches!(assignment.position, Stance::Affirm));
    assert_eq!(assignment.lead_author, "alice");
    assert_eq!(assignment.dissent_author.as_deref(), Some("carol"));
    assert_eq!(assignment.concurrence_author.as_deref(), Some("bob"));
}

#[test]
fn majority_lead_goes_to_strongest_advocate_not_presiding() {
    let analysis = analysis_of(&[
        ("alice", Stance::Affirm, 0.4),
        ("bob", Stance::Affirm, 0.95),
        ("carol", Stance::Oppose, 0.8),
    ]);
    let assignment = assign_opinions(&analysis, "alice").expect("assignment should succeed");
    assert_eq!(assignment.lead_author, "bob");
    assert_eq!(assignment.concurrence_author.as_deref(), Some("alice"));
}

#[test]
fn three_way_split_is_plurality_led_by_presiding() {
    let analysis = analysis_of(&[
        ("alice", Stance::Affirm, 0.5),
        ("bob", Stance::Oppose, 0.9),
        ("carol", Stance::Nuanced, 0.9),
    ]);

    let assignment = assign_opinions(&analysis, "alice").expect("assignment should succeed");
    assert!(matches!(assignment.opinion_type, OpinionType::Plurality));
    // The presiding participant's stance is authoritative and it
    // self-assigns the lead opinion.
    assert!(matches!(assignment.position, Stance::Affirm));
    assert_eq!(assignment.lead_author, "alice");
    assert_eq!(assignment.dissent_author.as_deref(), Some("bob"));
    // The genuinely distinct third stance concurs rather than dissents.
    assert_eq!(assignment.concurrence_author.as_deref(), Some("carol"));
}

#[test]
fn two_way_tie_is_plurality_with_no_concurrence() {
    let analysis = analysis_of(&[
        ("alice", Stance::Affirm, 0.6),
        ("bob", Stance::Affirm, 0.9),
        ("carol", Stance::Oppose, 0.9),
        ("dave", Stance::Oppose, 0.4),
    ]);

    let assignment = assign_opinions(&analysis, "alice").expect("assignment should succeed");
    assert!(matches!(assignment.opinion_type, OpinionType::Plurality));
    assert_eq!(assignment.lead_author, "alice");
    assert_eq!(assignment.dissent_author.as_deref(), Some("carol"));
    assert_eq!(assignment.concurrence_author, None);
}

#[test]
fn unanimous_vote_has_no_dissent() {
    let analysis = analysis_of(&[
        ("alice", Stance::Affirm, 0.7),
        ("bob", Stance::Affirm, 0.9),
        ("carol", Stance::Affirm, 0.8),
    ]);

    let assignment = assign_opinions(&analysis, "alice").expect("assignment should succeed");
    assert!(matches!(assignment.opinion_type, OpinionType::Majority));
    assert_eq!(assignment.lead_author, "bob");
    assert_eq!(assignment.dissent_author, None);
    assert_eq!(assignment.concurrence_author.as_deref(), Some("carol"));
}

#[tokio::test]
async fn analysis_missing_a_participant_violates_the_tally_invariant() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.mode = Mode::Judicial;
    let store = store_for(&cfg, "tally invariant");

    let incomplete = json!({
        "positions": [
            {"participant": "alice", "stance": "affirm", "confidence": 0.9},
            {"participant": "bob", "stance": "oppose", "confidence": 0.8}
        ]
    })
    .to_string();
    let gateway = gateway_with(
        &cfg,
        vec![(
            "alice",
            Arc::new(ScriptedAdapter::new("fallback").on(ANALYSIS_NEEDLE, incomplete)),
        )],
    );
    let policy = RetryPolicy::from_config(&cfg);
    let resolution = Resolution {
        proposition: "Resolved: test".to_string(),
        dimensions: Vec::new(),
    };

    let err = analyze_positions(
        &gateway,
        &policy,
        &store,
        &resolution,
        &cfg.participant_ids(),
        "history",
    )
    .await
    .expect_err("missing participant must violate the invariant");

    match err.downcast_ref::<ConclaveError>() {
        Some(ConclaveError::TallyInvariantViolation {
            tally_total,
            participant_count,
        }) => {
            assert_eq!(*tally_total, 2);
            assert_eq!(*participant_count, 3);
        }
        other => panic!("expected TallyInvariantViolation, got {other:?}"),
    }
    assert_eq!(categorize_error(&err), ErrorCategory::Consensus);
}

#[tokio::test]
async fn resolution_derivation_failure_is_fatal() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.mode = Mode::Judicial;
    cfg.rounds = 2;
    let store = store_for(&cfg, "fatal resolution");
    let session_dir = store.dir.clone();

    // The presiding participant never produces usable output.
    let gateway = gateway_with(
        &cfg,
        vec![
            ("alice", Arc::new(FailingAdapter { exit_status: 1 })),
            ("bob", Arc::new(ScriptedAdapter::new("bob speaks"))),
            ("carol", Arc::new(ScriptedAdapter::new("carol speaks"))),
        ],
    );
    let telemetry = TelemetrySink::disabled();
    let controller = DebateController::new(&cfg, store, gateway, &telemetry);

    let err = controller
        .run()
        .await
        .expect_err("session must abort without a resolution");
    match err.downcast_ref::<ConclaveError>() {
        Some(inner @ ConclaveError::ResolutionDerivationFailed(_)) => {
            assert!(inner.is_fatal());
        }
        other => panic!("expected ResolutionDerivationFailed, got {other:?}"),
    }
    // Partial files survive for postmortem.
    assert!(session_dir.join("metadata.json").exists());
    assert!(session_dir.join("responses/resolution_raw.md").exists());
}

#[tokio::test]
async fn failed_session_is_marked_failed_in_metadata() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.mode = Mode::Judicial;
    cfg.rounds = 2;
    cfg.participants = vec![participant("alice")];

    let err = run_council(&cfg, &TelemetrySink::disabled(), "doomed session")
        .await
        .expect_err("lone failing participant cannot derive a resolution");
    assert!(err.to_string().contains("partial files preserved"));

    let sessions_root = Path::new(&cfg.sessions_root);
    let entry = std::fs::read_dir(sessions_root)
        .expect("sessions root should exist")
        .next()
        .expect("one session directory")
        .expect("entry should read");
    let store = SessionStore::open(&entry.path()).expect("store should reopen");
    assert_eq!(store.metadata.status, SessionStatus::Failed);
}

// ---------------------------------------------------------------------------
// End-to-end sessions
// ---------------------------------------------------------------------------

fn scripted_debater(name: &str) -> Arc<dyn Adapter> {
    Arc::new(
        ScriptedAdapter::new(&format!("{name} weighs in on the topic."))
            .on(SYNTHESIS_NEEDLE, format!("{name}'s synthesis of the debate."))
            .on(COMBINED_NEEDLE, format!("{name}'s combined verdict."))
            .on(OPINION_NEEDLE, format!("{name}'s written opinion."))
            .on(MODERATION_NEEDLE, format!("{name}'s moderation note."))
            .on(RESOLUTION_NEEDLE, resolution_json())
            .on(ANALYSIS_NEEDLE, analysis_json()),
    )
}

#[tokio::test]
async fn collaborative_session_produces_all_round_and_synthesis_files() {
    let dir = tempdir().expect("temp directory should create");
    let cfg = base_cfg(dir.path());
    let store = store_for(&cfg, "collaborative end to end");
    let session_dir = store.dir.clone();

    let gateway = gateway_with(
        &cfg,
        vec![
            ("alice", scripted_debater("alice")),
            ("bob", scripted_debater("bob")),
            ("carol", scripted_debater("carol")),
        ],
    );
    let telemetry = TelemetrySink::disabled();
    let controller = DebateController::new(&cfg, store, gateway, &telemetry);
    let outcome = controller.run().await.expect("session should complete");

    // 3 participants x 3 rounds, one file each, plus syntheses and verdict.
    for round in 1..=3u32 {
        for participant in ["alice", "bob", "carol"] {
            assert!(
                session_dir
                    .join(format!("responses/round_{round}_{participant}.md"))
                    .exists(),
                "missing round {round} response for {participant}"
            );
        }
    }
    for participant in ["alice", "bob", "carol"] {
        assert!(
            session_dir
                .join(format!("responses/synthesis_{participant}.md"))
                .exists()
        );
    }
    assert!(session_dir.join("final_synthesis.md").exists());

    let transcript = std::fs::read_to_string(&outcome.transcript_path)
        .expect("transcript should exist");
    let round_one = transcript.find("## Round 1").expect("round 1 section");
    let round_two = transcript.find("## Round 2").expect("round 2 section");
    let round_three = transcript.find("## Round 3").expect("round 3 section");
    let syntheses = transcript
        .find("## Individual syntheses")
        .expect("syntheses section");
    let final_section = transcript
        .find("## Final synthesis")
        .expect("final synthesis section");
    assert!(round_one < round_two);
    assert!(round_two < round_three);
    assert!(round_three < syntheses);
    assert!(syntheses < final_section);

    let reopened = SessionStore::open(&session_dir).expect("store should reopen");
    assert_eq!(reopened.metadata.status, SessionStatus::Completed);
}

#[tokio::test]
async fn degraded_participant_never_blocks_round_progression() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.rounds = 2;
    cfg.retry_attempts = 3;
    let store = store_for(&cfg, "degradation end to end");
    let session_dir = store.dir.clone();

    let gateway = gateway_with(
        &cfg,
        vec![
            ("alice", scripted_debater("alice")),
            ("bob", Arc::new(FailingAdapter { exit_status: 1 })),
            ("carol", scripted_debater("carol")),
        ],
    );
    let telemetry = TelemetrySink::disabled();
    let controller = DebateController::new(&cfg, store, gateway, &telemetry);
    let outcome = controller
        .run()
        .await
        .expect("session must complete despite the failing participant");

    for round in 1..=2u32 {
        let bob_text =
            std::fs::read_to_string(session_dir.join(format!("responses/round_{round}_bob.md")))
                .expect("bob's slot should exist");
        assert!(bob_text.contains("'bob'"));
        assert!(bob_text.contains("unavailable this round"));

        let alice_text = std::fs::read_to_string(
            session_dir.join(format!("responses/round_{round}_alice.md")),
        )
        .expect("alice's slot should exist");
        assert!(!alice_text.contains("unavailable"));
    }

    // The gap stays attributable in the final transcript.
    let transcript = std::fs::read_to_string(&outcome.transcript_path)
        .expect("transcript should exist");
    assert!(transcript.contains("unavailable this round"));
}

#[tokio::test]
async fn judicial_session_tallies_votes_and_assigns_opinions() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.mode = Mode::Judicial;
    cfg.rounds = 3;
    let store = store_for(&cfg, "judicial end to end");
    let session_dir = store.dir.clone();
    let reopened = SessionStore::open(&session_dir).expect("store should reopen");

    let gateway = gateway_with(
        &cfg,
        vec![
            ("alice", scripted_debater("alice")),
            ("bob", scripted_debater("bob")),
            ("carol", scripted_debater("carol")),
        ],
    );
    let telemetry = TelemetrySink::disabled();
    let controller = DebateController::new(&cfg, store, gateway, &telemetry);
    let outcome = controller.run().await.expect("session should complete");

    let resolution: Resolution = reopened
        .read_json(&reopened.resolution_path())
        .expect("resolution artifact");
    assert_eq!(resolution.proposition, "Resolved: the proposal should be adopted");

    let analysis: PositionAnalysis = reopened
        .read_json(&reopened.position_analysis_path())
        .expect("analysis artifact");
    assert_eq!(analysis.tally.get(&Stance::Affirm), Some(&2));
    assert_eq!(analysis.tally.get(&Stance::Oppose), Some(&1));
    let total: usize = analysis.tally.values().sum();
    assert_eq!(total, 3);

    let assignment: OpinionAssignment = reopened
        .read_json(&reopened.opinion_assignments_path())
        .expect("assignment artifact");
    assert!(matches!(assignment.opinion_type, OpinionType::Majority));
    assert_eq!(assignment.lead_author, "alice");
    assert_eq!(assignment.dissent_author.as_deref(), Some("carol"));
    assert_eq!(assignment.concurrence_author.as_deref(), Some("bob"));

    assert!(session_dir.join("opinions/majority_alice.md").exists());
    assert!(session_dir.join("opinions/concurrence_bob.md").exists());
    assert!(session_dir.join("opinions/dissent_carol.md").exists());
    // Moderated rebuttal rounds leave their notes behind.
    assert!(session_dir.join("responses/moderation_round_2.md").exists());
    assert!(session_dir.join("responses/moderation_round_3.md").exists());

    let transcript = std::fs::read_to_string(&outcome.transcript_path)
        .expect("transcript should exist");
    assert!(transcript.contains("## Resolution"));
    assert!(transcript.contains("## Vote"));
    assert!(transcript.contains("affirm: 2, oppose: 1"));
    assert!(transcript.contains("## Opinions (majority decision"));
    assert!(outcome.headline.contains("majority"));
}

#[tokio::test]
async fn degraded_moderation_never_halts_a_judicial_round() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.mode = Mode::Judicial;
    cfg.rounds = 2;
    let store = store_for(&cfg, "degraded moderation");
    let session_dir = store.dir.clone();

    // The presiding participant debates fine but fails every moderation call.
    let alice: Arc<dyn Adapter> = Arc::new(
        ScriptedAdapter::new("alice weighs in on the resolution.")
            .on(RESOLUTION_NEEDLE, resolution_json())
            .on(ANALYSIS_NEEDLE, analysis_json())
            .on(OPINION_NEEDLE, "alice's written opinion.")
            .failing_on(MODERATION_NEEDLE),
    );
    let gateway = gateway_with(
        &cfg,
        vec![
            ("alice", alice),
            ("bob", scripted_debater("bob")),
            ("carol", scripted_debater("carol")),
        ],
    );
    let telemetry = TelemetrySink::disabled();
    let controller = DebateController::new(&cfg, store, gateway, &telemetry);
    controller
        .run()
        .await
        .expect("session must complete despite the failed moderator");

    let note = std::fs::read_to_string(session_dir.join("responses/moderation_round_2.md"))
        .expect("moderation slot should exist");
    assert!(note.contains("unavailable this round"));
    for participant in ["alice", "bob", "carol"] {
        assert!(
            session_dir
                .join(format!("responses/round_2_{participant}.md"))
                .exists(),
            "round 2 should still run for {participant}"
        );
    }
}

#[tokio::test]
async fn transcript_regeneration_is_stable() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg(dir.path());
    cfg.rounds = 2;
    let store = store_for(&cfg, "stable transcript");
    let session_dir = store.dir.clone();

    let gateway = gateway_with(
        &cfg,
        vec![
            ("alice", scripted_debater("alice")),
            ("bob", scripted_debater("bob")),
            ("carol", scripted_debater("carol")),
        ],
    );
    let telemetry = TelemetrySink::disabled();
    let controller = DebateController::new(&cfg, store, gateway, &telemetry);
    let outcome = controller.run().await.expect("session should complete");

    let first = std::fs::read_to_string(&outcome.transcript_path).expect("transcript one");
    let reopened = SessionStore::open(&session_dir).expect("store should reopen");
    write_transcript(&reopened).expect("regeneration should succeed");
    let second = std::fs::read_to_string(&outcome.transcript_path).expect("transcript two");
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Phase sequences
// ---------------------------------------------------------------------------

#[test]
fn standard_phase_sequence_matches_round_count() {
    let phases = standard_phases(3);
    assert_eq!(
        phases,
        vec![
            Phase::Opening,
            Phase::Rebuttal(2),
            Phase::Rebuttal(3),
            Phase::Synthesis,
            Phase::CombinedSynthesis,
            Phase::Done,
        ]
    );

    // Minimum round count: one opening and one rebuttal.
    let phases = standard_phases(2);
    assert_eq!(
        phases,
        vec![
            Phase::Opening,
            Phase::Rebuttal(2),
            Phase::Synthesis,
            Phase::CombinedSynthesis,
            Phase::Done,
        ]
    );
}

#[test]
fn judicial_phase_sequence_interleaves_moderation() {
    let phases = judicial_phases(3);
    assert_eq!(
        phases,
        vec![
            Phase::ResolutionDerivation,
            Phase::Opening,
            Phase::Moderation(2),
            Phase::Rebuttal(2),
            Phase::Moderation(3),
            Phase::Rebuttal(3),
            Phase::PositionAnalysis,
            Phase::OpinionAssignment,
            Phase::OpinionWriting,
            Phase::Done,
        ]
    );
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

#[test]
fn opening_prompt_is_pure_and_exact() {
    let prompt = crate::prompts::opening_prompt(&crate::prompts::OpeningParams {
        topic: "Adopt a monorepo",
        mode: Mode::Collaborative,
        total_rounds: 3,
        proposition: None,
    });
    assert!(prompt.starts_with("TOPIC:\nAdopt a monorepo"));
    assert!(prompt.contains("round 1 of 3 in a collaborative council discussion"));
    assert!(prompt.contains("opening statement"));
    assert!(!prompt.contains("DISCUSSION SO FAR"));
}

#[test]
fn rebuttal_prompt_includes_moderation_and_own_statement() {
    let prompt = crate::prompts::rebuttal_prompt(&crate::prompts::RebuttalParams {
        topic: "Adopt a monorepo",
        mode: Mode::Judicial,
        round: 2,
        total_rounds: 4,
        history: "--- Round 1 ---\n[bob]: bold claim",
        own_previous: Some("my opening"),
        moderation: Some("focus on migration cost"),
        proposition: Some("Resolved: adopt a monorepo"),
    });
    assert!(prompt.contains("RESOLUTION UNDER DEBATE:\nResolved: adopt a monorepo"));
    assert!(prompt.contains("MODERATOR'S FOCUS FOR THIS ROUND:\nfocus on migration cost"));
    assert!(prompt.contains("[bob]: bold claim"));
    assert!(prompt.contains("YOUR PREVIOUS STATEMENT:\nmy opening"));
    assert!(prompt.contains("round 2 of 4"));
}

#[test]
fn structured_prompts_request_exact_json_shapes() {
    let resolution =
        crate::prompts::resolution_prompt(&crate::prompts::ResolutionParams { topic: "Topic" });
    assert!(resolution.contains("\"proposition\""));
    assert!(resolution.contains("\"dimensions\""));
    assert!(resolution.contains("MUST be valid JSON"));

    let participants = vec!["alice".to_string(), "bob".to_string()];
    let analysis =
        crate::prompts::position_analysis_prompt(&crate::prompts::PositionAnalysisParams {
            proposition: "Resolved: yes",
            participants: &participants,
            history: "",
        });
    assert!(analysis.contains("alice, bob"));
    assert!(analysis.contains("\"affirm|oppose|nuanced\""));
    assert!(analysis.contains("exactly one entry per"));
}

// ---------------------------------------------------------------------------
// Personas, telemetry, errors
// ---------------------------------------------------------------------------

#[test]
fn persona_catalog_overlays_builtins_with_file_entries() {
    let dir = tempdir().expect("temp directory should create");
    let path = dir.path().join("personas.toml");
    std::fs::write(
        &path,
        r#"
[personas.advocate]
system_prompt = "Custom advocate prompt."
description = "Overridden"

[personas.economist]
system_prompt = "You weigh costs."
"#,
    )
    .expect("catalog should write");

    let catalog = PersonaCatalog::load(&path).expect("catalog should load");
    let spec = participant("advocate");
    assert_eq!(catalog.system_prompt_for(&spec), "Custom advocate prompt.");

    let spec = participant("economist");
    assert_eq!(catalog.system_prompt_for(&spec), "You weigh costs.");

    // Unknown personas fall back to the generic prompt rather than failing.
    let spec = participant("stranger");
    assert!(catalog.system_prompt_for(&spec).contains("'stranger'"));
}

#[test]
fn telemetry_summary_counts_session_lifecycle_events() {
    let lines = vec![
        json!({"event": "session.started", "run_id": "r1", "command": "run", "ts_unix_ms": 10})
            .to_string(),
        json!({"event": "round.completed", "run_id": "r1", "command": "run", "ts_unix_ms": 20})
            .to_string(),
        json!({"event": "participant.degraded", "run_id": "r1", "command": "run",
               "participant": "bob", "ts_unix_ms": 30})
            .to_string(),
        json!({"event": "session.completed", "run_id": "r1", "command": "run", "ts_unix_ms": 40})
            .to_string(),
        "not json".to_string(),
    ];

    let summary = summarize_telemetry_lines(lines, 100);
    assert_eq!(summary.count("session.started"), 1);
    assert_eq!(summary.count("session.completed"), 1);
    assert_eq!(summary.count("round.completed"), 1);
    assert_eq!(summary.count("participant.degraded"), 1);
    assert_eq!(summary.degradations_by_participant.get("bob"), Some(&1));
    assert_eq!(summary.parse_errors, 1);
    assert_eq!(summary.unique_runs.len(), 1);
    assert_eq!(summary.last_event_ts_unix_ms, Some(40));
}

#[test]
fn error_categories_carry_codes_and_hints() {
    let err: anyhow::Error = ConclaveError::TallyInvariantViolation {
        tally_total: 2,
        participant_count: 3,
    }
    .into();
    assert_eq!(categorize_error(&err), ErrorCategory::Consensus);
    let rendered = format_cli_error(&err);
    assert!(rendered.contains("[CONSENSUS]"));
    assert!(rendered.contains("Hint:"));

    let err: anyhow::Error = ConclaveError::AdapterTimeout {
        participant: "alice".to_string(),
        timeout_secs: 30,
    }
    .into();
    assert_eq!(categorize_error(&err), ErrorCategory::Adapter);

    let err = anyhow::anyhow!("round count 99 is out of range 2..=10");
    assert_eq!(categorize_error(&err), ErrorCategory::Input);
}

#[test]
fn fatal_flags_match_the_taxonomy() {
    assert!(ConclaveError::ResolutionDerivationFailed("x".to_string()).is_fatal());
    assert!(
        ConclaveError::TallyInvariantViolation {
            tally_total: 1,
            participant_count: 2
        }
        .is_fatal()
    );
    assert!(
        !ConclaveError::AdapterTimeout {
            participant: "a".to_string(),
            timeout_secs: 1
        }
        .is_fatal()
    );
    assert!(!ConclaveError::UnknownParticipant("a".to_string()).is_fatal());
    assert!(
        !ConclaveError::BudgetUnsatisfiable {
            budget: 100,
            round: 2
        }
        .is_fatal()
    );
}
