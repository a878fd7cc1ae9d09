//! Conductor CLI
//!
//! Usage:
//!   conductor serve --port 8000
//!   conductor workflow run MAIN_WORKFLOW --message "hello"
//!   conductor workflow list
//!   conductor workflow show MAIN_WORKFLOW
//!   conductor workflow validate
//!   conductor agents list

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conductor::config::AppFileConfig;
use conductor::web::{self, WebConfig};
use conductor::workflow::resolve;
use conductor::{
    event_channel, AgentRegistry, AgentReply, AgentRequest, EngineConfig, ExecutionRequest,
    FnAgent, Message, ProgressSender, SessionStore, WorkflowEngine, WorkflowRegistry,
};

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Multi-agent workflow orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of workflow definition files
    #[arg(long, env = "CONDUCTOR_WORKFLOWS_DIR", global = true)]
    workflows_dir: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        /// Port to listen on
        #[arg(long, short, env = "CONDUCTOR_PORT")]
        port: Option<u16>,
    },
    /// Workflow management and execution
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Agent management
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Run a workflow from the command line
    Run {
        /// Workflow id (e.g. "MAIN_WORKFLOW"); falls back to the
        /// configured default_workflow when omitted
        workflow: Option<String>,

        /// User input handed to the first step
        #[arg(long, short)]
        message: String,

        /// Reuse an existing session
        #[arg(long)]
        session: Option<String>,
    },
    /// List available workflows
    List,
    /// Show a workflow definition
    Show {
        /// Workflow id
        workflow: String,
    },
    /// Resolve every loaded workflow and report problems
    Validate,
}

#[derive(Subcommand)]
enum AgentCommands {
    /// List registered agents
    List,
}

/// Initialize tracing with the given verbosity level
///
/// - 0: warn (default)
/// - 1: info (-v)
/// - 2: debug (-vv)
/// - 3+: trace (-vvv)
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // Allow RUST_LOG to override if set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// Built-in agents so the binary works out of the box. Real
/// deployments register their own handlers through the library API.
fn builtin_agents() -> AgentRegistry {
    let mut agents = AgentRegistry::new();
    agents.register("echo_agent", || {
        Arc::new(FnAgent::new(|req: AgentRequest| async move {
            Ok(AgentReply::new(Message::assistant(req.message.content)))
        }))
    });
    agents
}

fn build_engine(cli: &Cli, config: &AppFileConfig) -> Result<WorkflowEngine> {
    let workflows_dir = cli
        .workflows_dir
        .clone()
        .unwrap_or_else(|| config.registry.workflows_dir.clone());

    let workflows = WorkflowRegistry::load_dir(&workflows_dir)?;
    workflows.validate()?;

    let engine_config = EngineConfig {
        agent_timeout: Duration::from_secs(config.engine.agent_timeout_secs),
        default_workflow: config.engine.default_workflow.clone(),
    };

    Ok(WorkflowEngine::new(
        Arc::new(workflows),
        Arc::new(builtin_agents()),
        SessionStore::new(),
        engine_config,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppFileConfig::load()?;

    match &cli.command {
        Commands::Serve { port } => {
            let engine = build_engine(&cli, &config)?;
            let port = port.unwrap_or(config.server.port);
            web::serve(engine, WebConfig { port }).await?;
        }

        Commands::Workflow { command } => match command {
            WorkflowCommands::Run {
                workflow,
                message,
                session,
            } => {
                let engine = build_engine(&cli, &config)?;
                let workflow = match workflow.as_deref().or(engine.default_workflow()) {
                    Some(id) => id.to_string(),
                    None => anyhow::bail!(
                        "no workflow named and no default_workflow configured"
                    ),
                };

                let (event_tx, mut event_rx) = event_channel();
                let printer = tokio::spawn(async move {
                    while let Some(event) = event_rx.recv().await {
                        println!("[{}] {}", event.subject(), event.describe());
                    }
                });

                let request = ExecutionRequest::new(message.clone())
                    .with_events(ProgressSender::new(event_tx));
                let request = match session {
                    Some(id) => request.with_session(id.clone()),
                    None => request,
                };

                let outcome = engine.run(&workflow, request).await?;
                let _ = printer.await;

                println!("\n{}", outcome.content);
                if !outcome.metadata.is_empty() {
                    println!(
                        "\nmetadata: {}",
                        serde_json::to_string_pretty(&outcome.metadata)?
                    );
                }
            }

            WorkflowCommands::List => {
                let engine = build_engine(&cli, &config)?;
                for id in engine.workflows().ids() {
                    println!("{id}");
                }
            }

            WorkflowCommands::Show { workflow } => {
                let engine = build_engine(&cli, &config)?;
                let Some(definition) = engine.workflows().get(workflow) else {
                    anyhow::bail!("Workflow not found: {workflow}");
                };
                println!("{}", serde_json::to_string_pretty(&*definition)?);

                let steps = engine.workflows().flattened(workflow)?;
                println!(
                    "\n{} agent steps after expansion",
                    resolve::agent_step_count(&steps)
                );
            }

            WorkflowCommands::Validate => {
                let engine = build_engine(&cli, &config)?;
                engine.workflows().validate()?;
                println!("{} workflows OK", engine.workflows().ids().len());
            }
        },

        Commands::Agents { command } => match command {
            AgentCommands::List => {
                let agents = builtin_agents();
                for name in agents.names() {
                    println!("{name}");
                }
            }
        },
    }

    Ok(())
}
