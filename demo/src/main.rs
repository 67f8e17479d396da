//! Arbiter kernel — demo CLI
//!
//! Runs one or all of four governed scenarios. Each scenario wires real
//! kernel components (policy compiler, arbiter, harness, firewall, trace
//! recorder) around mock instruction implementations.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- pipeline
//!   cargo run -p demo -- forbidden-transition
//!   cargo run -p demo -- resource-limit
//!   cargo run -p demo -- approval-gate

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use arbiter_contracts::execution::{RunReport, RunStatus};
use arbiter_contracts::instruction::{from_fn, InstructionBinding, InstructionType};
use arbiter_core::{GraphBuilder, Harness, MemoryCheckpointStore, Router};
use arbiter_firewall::{RetryEnforcer, SchemaFirewall};
use arbiter_policy::rule::PolicyConfig;
use arbiter_trace::InMemoryRecorder;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Arbiter — governed-execution kernel demo.
///
/// Each subcommand runs a small workflow graph under a declarative policy,
/// showing routing decisions, schema enforcement, and the hash-chained
/// trace.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Arbiter governance kernel demo",
    long_about = "Runs governed workflow scenarios showing policy compilation,\n\
                  arbiter routing decisions, schema enforcement, interrupt/resume,\n\
                  and trace chain integrity."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all four scenarios in sequence.
    RunAll,
    /// Generate → verify → tool pipeline with a low-confidence reroute.
    Pipeline,
    /// A policy that forbids Cognitive→Execution transitions.
    ForbiddenTransition,
    /// A replan loop cut off by the step budget.
    ResourceLimit,
    /// An interrupt boundary with checkpointed resume.
    ApprovalGate,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for verbose kernel output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all(),
        Command::Pipeline => pipeline(),
        Command::ForbiddenTransition => forbidden_transition(),
        Command::ResourceLimit => resource_limit(),
        Command::ApprovalGate => approval_gate(),
    };

    if let Err(e) = result {
        eprintln!("Demo error: {}", e);
        std::process::exit(1);
    }
}

fn run_all() -> arbiter_contracts::error::ArbiterResult<()> {
    pipeline()?;
    forbidden_transition()?;
    resource_limit()?;
    approval_gate()?;
    Ok(())
}

// ── Shared wiring ─────────────────────────────────────────────────────────────

fn make_harness(recorder: Arc<InMemoryRecorder>) -> Harness {
    let validator = Arc::new(SchemaFirewall::new());
    let enforcer = Arc::new(RetryEnforcer::new(validator.clone()));
    Harness::new(validator, enforcer, recorder)
}

fn generate_binding() -> InstructionBinding {
    InstructionBinding::new(
        "generate",
        InstructionType::Generate,
        from_fn(|_| {
            Ok(json!({
                "draft": "Dispatch order #4711 to the Berlin warehouse.",
                "tokens_used": 64,
            }))
        }),
    )
    .with_output_schema(json!({
        "type": "object",
        "properties": { "draft": { "type": "string" } },
        "required": ["draft"]
    }))
}

fn verify_binding() -> InstructionBinding {
    InstructionBinding::new(
        "verify",
        InstructionType::Verify,
        from_fn(|input| {
            let draft = input.get("draft").and_then(Value::as_str).unwrap_or("");
            let confident = draft.contains("#4711");
            Ok(json!({
                "passed": true,
                "confidence": if confident { 0.82 } else { 0.4 },
                "reason": "order id cross-checked",
            }))
        }),
    )
    .with_input_keys(["draft"])
}

fn tool_binding() -> InstructionBinding {
    InstructionBinding::new(
        "dispatch",
        InstructionType::ToolCall,
        from_fn(|_| Ok(json!({ "dispatched": true, "carrier": "DHL" }))),
    )
}

fn report_outcome(label: &str, report: &RunReport, recorder: &InMemoryRecorder) {
    println!("── {label} ──");
    match &report.status {
        RunStatus::Completed => println!("  status: completed"),
        RunStatus::Halted {
            reason,
            violated_rule_id,
        } => println!(
            "  status: halted ({reason}{})",
            violated_rule_id
                .as_deref()
                .map(|id| format!(", rule {id}"))
                .unwrap_or_default()
        ),
        RunStatus::Interrupted { execution_id, step } => {
            println!("  status: interrupted at step {step} (execution {execution_id})")
        }
    }
    println!("  executed: {:?}", report.state.governance.history);
    println!(
        "  decisions: {:?}",
        report
            .state
            .governance
            .decisions
            .iter()
            .map(|d| d.action.as_str())
            .collect::<Vec<_>>()
    );
    println!(
        "  trace: {:?}, chain intact: {}",
        recorder.summary(&report.state.governance.execution_id),
        recorder.verify_integrity()
    );
    println!();
}

// ── Scenario 1: governed pipeline with reroute ───────────────────────────────

fn pipeline() -> arbiter_contracts::error::ArbiterResult<()> {
    let policy = PolicyConfig::from_toml_str(
        r#"
        policy_id = "pipeline-policy"
        description = "Reroute weak verifications to a human reviewer"

        [limits]
        max_steps = 10

        [[rules]]
        kind = "conditional"
        id = "low-confidence-review"
        description = "route weak verifications to a human"
        action = "reroute"
        target = "human_review"

        [[rules.conditions]]
        field = "governance.last_verification.confidence"
        op = "lt"
        value = 0.9
    "#,
    )?;

    let human_review = InstructionBinding::new(
        "human_review",
        InstructionType::Verify,
        from_fn(|_| Ok(json!({ "passed": true, "confidence": 1.0, "reason": "signed off" }))),
    );

    let mut builder = GraphBuilder::new();
    builder.add_instruction(generate_binding())?;
    builder.add_instruction(verify_binding())?;
    builder.add_instruction(tool_binding())?;
    builder.add_instruction(human_review)?;
    builder.add_edge("generate", "verify")?;
    builder.add_edge("verify", "dispatch")?;
    builder.add_edge("human_review", "dispatch")?;
    builder.set_entry("generate")?;
    let graph = Arc::new(builder.compile(&policy)?);

    let recorder = Arc::new(InMemoryRecorder::new());
    let router = Router::new(graph, make_harness(recorder.clone()), recorder.clone());

    let report = router.run(Map::new());
    report_outcome("pipeline (low confidence → human review)", &report, &recorder);
    Ok(())
}

// ── Scenario 2: forbidden transition ─────────────────────────────────────────

fn forbidden_transition() -> arbiter_contracts::error::ArbiterResult<()> {
    let policy = PolicyConfig::from_toml_str(
        r#"
        policy_id = "strict-policy"
        description = "Generation may never feed a tool call directly"

        [[rules]]
        kind = "transition"
        id = "no-cognitive-to-execution"
        description = "a generated draft must be verified before any side effect"
        from_core = "cognitive"
        to_core = "execution"
    "#,
    )?;

    let mut builder = GraphBuilder::new();
    builder.add_instruction(generate_binding())?;
    builder.add_instruction(tool_binding())?;
    builder.add_edge("generate", "dispatch")?;
    builder.set_entry("generate")?;
    let graph = Arc::new(builder.compile(&policy)?);

    let recorder = Arc::new(InMemoryRecorder::new());
    let router = Router::new(graph, make_harness(recorder.clone()), recorder.clone());

    let report = router.run(Map::new());
    report_outcome("forbidden transition (generate → dispatch)", &report, &recorder);
    Ok(())
}

// ── Scenario 3: resource limit over a replan loop ────────────────────────────

fn resource_limit() -> arbiter_contracts::error::ArbiterResult<()> {
    let policy = PolicyConfig::from_toml_str(
        r#"
        policy_id = "budgeted-policy"
        description = "Bound the replan loop by construction"

        [limits]
        max_steps = 5
    "#,
    )?;

    let replan = InstructionBinding::new(
        "replan",
        InstructionType::Replan,
        from_fn(|_| Ok(json!({ "plan": "try a different carrier" }))),
    );
    let evaluate = InstructionBinding::new(
        "evaluate",
        InstructionType::EvaluateProgress,
        from_fn(|_| Ok(json!({ "progress": "still blocked" }))),
    );

    let mut builder = GraphBuilder::new();
    builder.add_instruction(replan)?;
    builder.add_instruction(evaluate)?;
    builder.add_edge("replan", "evaluate")?;
    builder.add_edge("evaluate", "replan")?;
    builder.set_entry("replan")?;
    let graph = Arc::new(builder.compile(&policy)?);

    let recorder = Arc::new(InMemoryRecorder::new());
    let router = Router::new(graph, make_harness(recorder.clone()), recorder.clone());

    let report = router.run(Map::new());
    report_outcome("resource limit (replan loop, max_steps = 5)", &report, &recorder);
    Ok(())
}

// ── Scenario 4: interrupt boundary with resume ───────────────────────────────

fn approval_gate() -> arbiter_contracts::error::ArbiterResult<()> {
    let policy = PolicyConfig::permissive("approval-policy");

    let gate = InstructionBinding::new(
        "approval_gate",
        InstructionType::Interrupt,
        from_fn(|_| Ok(json!({}))),
    );
    let finalize = InstructionBinding::new(
        "finalize",
        InstructionType::ToolCall,
        from_fn(|_| Ok(json!({ "finalized": true }))),
    );

    let mut builder = GraphBuilder::new();
    builder.add_instruction(tool_binding())?;
    builder.add_instruction(gate)?;
    builder.add_instruction(finalize)?;
    builder.add_edge("dispatch", "approval_gate")?;
    builder.add_edge("approval_gate", "finalize")?;
    builder.set_entry("dispatch")?;
    let graph = Arc::new(builder.compile(&policy)?);

    let recorder = Arc::new(InMemoryRecorder::new());
    let store = Arc::new(MemoryCheckpointStore::new());
    let router = Router::new(graph, make_harness(recorder.clone()), recorder.clone())
        .with_checkpoints(store);

    let report = router.run(Map::new());
    report_outcome("approval gate (paused)", &report, &recorder);

    if let RunStatus::Interrupted { execution_id, step } = &report.status {
        let resumed = router.resume(execution_id, *step, None)?;
        report_outcome("approval gate (resumed)", &resumed, &recorder);
    }

    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Arbiter — Governed Execution Kernel");
    println!("Demo Scenarios");
    println!("===================================");
    println!();
    println!("Governance cycle per step:");
    println!("  [1] Harness validates input, invokes the implementation, enforces output schema");
    println!("  [2] State snapshot derived; checkpoint saved");
    println!("  [3] Arbiter decides: resource limits → conditional rules → transition matrix");
    println!("  [4] Router applies PROCEED / REROUTE / HALT; interrupts park the run");
    println!("  [5] Every step and decision lands in the hash-chained trace");
    println!();
}
