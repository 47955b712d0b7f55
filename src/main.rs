use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mail_agent::agent::ToolRouter;
use mail_agent::config::AppConfig;
use mail_agent::llm::{LlmService, Reasoning, create_provider};
use mail_agent::ops::MailOperations;
use mail_agent::pipeline::PipelineOrchestrator;
use mail_agent::pipeline::classifier::HybridClassifier;
use mail_agent::pipeline::email_processor::{RunnerConfig, spawn_email_processor};
use mail_agent::pipeline::extract::Extractor;
use mail_agent::pipeline::rules::RuleEvaluator;
use mail_agent::safety::InputGuard;
use mail_agent::source::{EmailSource, InMemoryMailbox, eml};
use mail_agent::tools::ToolRegistry;

const USAGE: &str = "usage: mail-agent [run | watch | chat]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let mode = std::env::args().nth(1).unwrap_or_else(|| "chat".to_string());
    if !matches!(mode.as_str(), "run" | "watch" | "chat") {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    eprintln!("📬 Mail Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({:?})", config.llm.model, config.llm.backend);

    // ── LLM ─────────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm.llm_config()?)?;
    let service = LlmService::new(llm, config.retry);

    // ── Email source ────────────────────────────────────────────────────
    let source: Arc<dyn EmailSource> = match &config.maildir {
        Some(dir) => {
            let mailbox = eml::load_dir(dir)
                .with_context(|| format!("loading mail from {}", dir.display()))?;
            eprintln!("   Mailbox: {} ({} emails)", dir.display(), mailbox.len().await);
            Arc::new(mailbox)
        }
        None => {
            eprintln!("   Mailbox: empty (set MAIL_AGENT_MAILDIR to load .eml files)");
            Arc::new(InMemoryMailbox::new())
        }
    };

    // ── Operations ──────────────────────────────────────────────────────
    let rules = match &config.pipeline.rules_path {
        Some(path) => RuleEvaluator::from_file(path)
            .with_context(|| format!("loading rules from {}", path.display()))?,
        None => RuleEvaluator::default_rules(),
    };
    eprintln!("   Rules: {}", rules.rules().len());
    let guard = InputGuard::new(config.pipeline.limit);
    let ops = Arc::new(MailOperations::new(
        source,
        HybridClassifier::new(
            Arc::new(rules),
            config.pipeline.band,
            service.clone(),
            guard.clone(),
        ),
        Extractor::new(service.clone(), guard),
        config.retry,
    ));
    info!(source = ops.source_name(), mode = %mode, "Mail operations ready");

    match mode.as_str() {
        "run" => {
            let orchestrator = PipelineOrchestrator::new(ops, config.pipeline.concurrency);
            let report = orchestrator
                .run(&config.pipeline.fetch_query, config.pipeline.fetch_limit)
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "watch" => {
            let orchestrator = Arc::new(PipelineOrchestrator::new(ops, config.pipeline.concurrency));
            let (tx, mut rx) = tokio::sync::mpsc::channel(8);
            let runner = RunnerConfig {
                criteria: config.pipeline.fetch_query.clone(),
                limit: config.pipeline.fetch_limit,
                interval: config.pipeline.interval,
            };
            let (handle, shutdown) = spawn_email_processor(orchestrator, runner, Some(tx));
            eprintln!("   Watching every {}s. Ctrl-C to stop.\n", config.pipeline.interval.as_secs());

            loop {
                tokio::select! {
                    report = rx.recv() => match report {
                        Some(report) => println!("{}", serde_json::to_string(&report)?),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        shutdown.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
            handle.abort();
        }
        _ => {
            let registry = Arc::new(ToolRegistry::new(ops));
            eprintln!("   Tools: {}", registry.list().join(", "));
            let router = ToolRouter::new(registry, Reasoning::new(service), config.max_steps);
            eprintln!("   Type a request and press Enter. /quit to exit.\n");
            chat(&router).await?;
        }
    }

    Ok(())
}

/// One episode per stdin line.
async fn chat(router: &ToolRouter) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        let query = line.trim();
        if query.is_empty() {
            eprint!("> ");
            continue;
        }
        if query == "/quit" {
            break;
        }

        let episode = router.run(query).await;
        for step in &episode.steps {
            eprintln!(
                "   [{}] {} {}",
                step.number,
                step.invocation.tool,
                if step.invocation.succeeded() { "ok" } else { "error" }
            );
        }
        match episode.outcome() {
            Ok(answer) => println!("\n{answer}\n"),
            Err(e) => println!("\nFailed: {e}\n"),
        }
        eprint!("> ");
    }
    Ok(())
}

/// Stderr logging, plus a daily-rotated file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    guard
}
