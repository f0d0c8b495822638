//! Conductor
//!
//! Command line entry point and HTTP server over `conductor_core`: plan a
//! document offline, drive the blueprint orchestrator, or serve the API.

mod api;

use std::io::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::{net::TcpListener, sync::mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conductor_core::observability::{LogBuffer, LogCaptureLayer};
use conductor_core::skills::prompts;
use conductor_core::state::{
    export_run, ingest_into, ExportFormat, InMemoryPlanStore, PlanRequest, PlanStore, PlanStyle,
    SqlitePlanStore,
};
use conductor_core::swarm::{
    CodingOrchestrator, OrchestratorAgents, OrchestratorService, PipelineEvent, PlanningPipeline,
};
use conductor_core::PipelineConfig;

use api::AppState;

#[derive(Parser, Clone)]
#[command(author, version, about = "Conductor - research documents to coding-agent prompts")]
struct Args {
    /// Skip model calls and use the heuristic stages only
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// SQLite file for the plan store
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Ingest a text file, run the planning pipeline and print the export
    Plan {
        file: PathBuf,
        /// strict or creative
        #[arg(long, default_value = "strict")]
        style: String,
        /// yaml, jsonl or md
        #[arg(long, default_value = "yaml")]
        format: String,
    },
    /// Drive the blueprint orchestrator and print the final result as JSON
    Orchestrate {
        file: PathBuf,
        /// Approve the summary and milestones without asking
        #[arg(long)]
        auto_approve: bool,
    },
    /// List the bundled system prompts
    Prompts,
}

fn read_document(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn source_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    eprint!("{} [y/N] ", question);
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

// === Commands ===

async fn run_plan(
    config: &PipelineConfig,
    file: &Path,
    style: &str,
    format: &str,
) -> anyhow::Result<()> {
    let style = PlanStyle::from_str(style).with_context(|| format!("Unknown style: {}", style))?;
    let format =
        ExportFormat::from_str(format).with_context(|| format!("Unknown format: {}", format))?;
    let text = read_document(file)?;

    let store = Arc::new(InMemoryPlanStore::new());
    let ingested = ingest_into(store.as_ref(), &text, source_name(file).as_deref())?;
    eprintln!(
        "📄 Ingested {} words into {} chunks (run {})",
        ingested.stats.word_count, ingested.stats.chunk_count, ingested.run_id
    );

    let pipeline = PlanningPipeline::from_config(config, config.build_client());
    let request = PlanRequest {
        style,
        ..PlanRequest::new(ingested.run_id.clone())
    };

    let (tx, mut rx) = mpsc::channel::<PipelineEvent>(32);
    let run_store = store.clone();
    let run = async move {
        let result = pipeline.run(&request, run_store.as_ref(), Some(&tx)).await;
        drop(tx);
        result
    };
    let progress = async {
        while let Some(event) = rx.recv().await {
            eprintln!("   • {}", event.kind.as_str());
        }
    };
    let (result, ()) = tokio::join!(run, progress);
    let response = result?;
    eprintln!(
        "✅ Plan ready: {} objectives, {} steps",
        response.objectives.len(),
        response.steps.len()
    );

    let export = export_run(store.as_ref(), &ingested.run_id, format)?;
    println!("{}", export.content);
    Ok(())
}

async fn run_orchestrate(
    config: &PipelineConfig,
    file: &Path,
    auto_approve: bool,
) -> anyhow::Result<()> {
    let text = read_document(file)?;
    let agents = OrchestratorAgents::from_config(config, config.build_client());
    let mut orchestrator = CodingOrchestrator::new(None, agents);

    let summary = orchestrator.ingest_blueprint(&text).await?;
    eprintln!("📝 Summary ({}):\n{}\n", summary.run_id, summary.summary);
    for component in &summary.components {
        eprintln!("   component: {}", component);
    }
    let approved = auto_approve || confirm("Approve summary?")?;
    orchestrator.approve_summary(approved)?;
    if !approved {
        eprintln!("Summary rejected; stopping.");
        return Ok(());
    }

    let (plan, snapshot) = orchestrator.generate_milestones().await?;
    eprintln!("🧭 Milestones:");
    for milestone in &plan.milestones {
        eprintln!("   {}. {}", milestone.milestone_id, milestone.details);
    }
    if !snapshot.uncovered_nodes.is_empty() {
        eprintln!("   uncovered: {}", snapshot.uncovered_nodes.join(", "));
    }
    let approved = auto_approve || confirm("Approve milestones?")?;
    orchestrator.approve_milestones(approved)?;
    if !approved {
        eprintln!("Milestones rejected; stopping.");
        return Ok(());
    }

    orchestrator.generate_prompts().await?;
    let result = orchestrator.finalize()?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn list_prompts() {
    for (slug, text) in prompts::all_defaults() {
        let headline = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
        println!("{:<20} {}", slug, headline.trim());
    }
}

// === Server Entry ===

async fn run_server(
    config: &PipelineConfig,
    logs: Arc<LogBuffer>,
    port: u16,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let db_path = db.or_else(|| config.database_path.as_ref().map(PathBuf::from));
    let store: Arc<dyn PlanStore> = match &db_path {
        Some(path) => Arc::new(
            SqlitePlanStore::open_at(path)
                .with_context(|| format!("Failed to open plan store at {}", path.display()))?,
        ),
        None => Arc::new(InMemoryPlanStore::new()),
    };

    let client = config.build_client();
    let state = Arc::new(AppState {
        store,
        pipeline: PlanningPipeline::from_config(config, client.clone()),
        orchestrator: OrchestratorService::in_memory(OrchestratorAgents::from_config(
            config, client,
        )),
        logs,
    });
    let app = api::router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(
        event = "server.start",
        addr = %addr,
        store = db_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "memory".to_string()),
        "Conductor server listening"
    );
    println!("🚀 Conductor running at http://{}", addr);
    println!("   Planning:      /api/ingest, /api/plan, /api/runs/:id/steps, /api/export");
    println!("   Orchestrator:  /api/orchestrator/sessions");
    println!("   Observability: /api/observability, /api/logs");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = PipelineConfig::from_env();
    config.offline |= args.offline;

    let logs = Arc::new(LogBuffer::new(config.log_capacity));
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(LogCaptureLayer::new(logs.clone()))
        .init();

    match args.command {
        Some(CliCommand::Plan {
            file,
            style,
            format,
        }) => run_plan(&config, &file, &style, &format).await,
        Some(CliCommand::Orchestrate { file, auto_approve }) => {
            run_orchestrate(&config, &file, auto_approve).await
        }
        Some(CliCommand::Prompts) => {
            list_prompts();
            Ok(())
        }
        Some(CliCommand::Serve { port, db }) => run_server(&config, logs, port, db).await,
        None => run_server(&config, logs, 8080, None).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_command() {
        let args = Args::try_parse_from([
            "conductor",
            "plan",
            "notes.md",
            "--style",
            "creative",
            "--offline",
        ])
        .unwrap();
        assert!(args.offline);
        match args.command {
            Some(CliCommand::Plan { file, style, format }) => {
                assert_eq!(file, PathBuf::from("notes.md"));
                assert_eq!(style, "creative");
                assert_eq!(format, "yaml");
            }
            _ => panic!("expected plan command"),
        }
    }

    #[test]
    fn test_parse_serve_defaults() {
        let args = Args::try_parse_from(["conductor", "serve"]).unwrap();
        match args.command {
            Some(CliCommand::Serve { port, db }) => {
                assert_eq!(port, 8080);
                assert!(db.is_none());
            }
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn test_source_name_uses_file_name() {
        assert_eq!(
            source_name(Path::new("/tmp/research/notes.md")).as_deref(),
            Some("notes.md")
        );
    }
}
