//! `veritas ask`: research one question and print the cited result.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use veritas_agent::{FinalResult, Orchestrator, Outcome};
use veritas_core::event::EventBus;
use veritas_providers::build_provider;
use veritas_telemetry::TelemetryEngine;

pub struct AskOptions {
    pub root: PathBuf,
    pub max_tool_calls: Option<u32>,
    pub json: bool,
}

/// Exit code for a session that ended without an answer.
const INCOMPLETE_EXIT: u8 = 2;

pub async fn run(config_path: Option<&Path>, question: &str, options: AskOptions) -> anyhow::Result<ExitCode> {
    let mut config = super::load_config(config_path)?;
    if let Some(budget) = options.max_tool_calls {
        config.agent.max_tool_calls = budget;
    }
    config.validate().context("Invalid configuration")?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    VERITAS_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY");
        eprintln!();
        eprintln!("  Or add api_key to {}", veritas_config::AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        anyhow::bail!("No API key found. See above for setup instructions.");
    }

    let provider = build_provider(&config)?;
    let store = super::open_store(&config).await?;
    let toolkit = super::toolkit(&config, &options.root, store.clone())?;
    let telemetry = Arc::new(TelemetryEngine::new());
    let orchestrator = Orchestrator::new(provider, toolkit, &config)
        .with_store(store)
        .with_telemetry(telemetry.clone())
        .with_event_bus(Arc::new(EventBus::default()));

    let result = orchestrator.run(question).await;
    debug!(usage = ?telemetry.usage_snapshot(), "Telemetry");

    if options.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_human(&result);
    }

    Ok(if result.is_answered() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(INCOMPLETE_EXIT)
    })
}

fn print_human(result: &FinalResult) {
    let stats = &result.stats;
    println!();
    match &result.outcome {
        Outcome::Answered {
            answer,
            evidence_log,
            ..
        } => {
            println!("  ANSWERED");
            println!();
            for line in answer.lines() {
                println!("  {line}");
            }
            if !evidence_log.is_empty() {
                println!();
                println!("  Evidence:");
                for record in evidence_log {
                    println!("    [t{}] {}", record.turn, record.evidence.location);
                }
            }
        }
        Outcome::Incomplete {
            partial_report,
            unresolved_gaps,
        } => {
            println!("  INCOMPLETE");
            println!();
            for gap in unresolved_gaps {
                println!("  - {gap}");
            }
            if !partial_report.is_empty() {
                println!();
                println!("  Partial report:");
                for line in partial_report.render().lines() {
                    println!("    {line}");
                }
            }
        }
    }
    println!();
    println!(
        "  Turns: {}  Tool calls: {}  Model calls: {}  Time: {:.1}s",
        stats.turns,
        stats.tool_calls,
        stats.model_calls,
        stats.duration_ms as f64 / 1000.0
    );
    println!();
}
