//! bunsen - scientific data analysis agent CLI

mod config;

use anyhow::Context as _;
use clap::Parser;
use std::io::{self, Write};
use std::sync::Arc;

use bunsen_agent::{
    extract_report, Agent, AgentConfig, AgentEvent, JsonlUsageSink, PathRewrite, RunOutcome,
    SessionStore,
};
use bunsen_ai::{providers::OpenAIProvider, ModelConfig};
use bunsen_exec::{ExecutorConfig, PythonExecutor};

use config::Config;

/// bunsen - LLM agent for scientific data analysis
#[derive(Parser, Debug)]
#[command(name = "bunsen")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The analysis question; omit for interactive mode
    query: Option<String>,

    /// Thread identifier for multi-turn conversations
    #[arg(short, long)]
    thread: Option<String>,

    /// Continue the thread's saved conversation instead of starting fresh
    #[arg(short = 'c', long)]
    r#continue: bool,

    /// Resume a suspended run with this token (requires --reply)
    #[arg(long)]
    resume: Option<String>,

    /// Human reply for --resume
    #[arg(long)]
    reply: Option<String>,

    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Directory holding the dataset files
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("bunsen=debug")
            .init();
    }

    if args.init_config {
        let path = Config::init()?;
        println!("Config file: {}", path.display());
        return Ok(());
    }

    let mut config = Config::load();
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.into();
    }

    let agent = build_agent(&config).await?;
    let thread_id = args
        .thread
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let rewrite = PathRewrite::new(&config.plots_dir, &config.web_plots_prefix);

    if let Some(token) = &args.resume {
        let reply = args
            .reply
            .as_deref()
            .context("--resume requires --reply")?;
        let outcome = agent.resume(token, reply).await?;
        report_outcome(&outcome, &rewrite);
        return Ok(());
    }

    match &args.query {
        Some(query) => {
            let outcome = if args.r#continue {
                agent.continue_conversation(query, &thread_id).await?
            } else {
                agent.run(query, &thread_id).await?
            };
            report_outcome(&outcome, &rewrite);
            Ok(())
        }
        None => run_interactive(&agent, &thread_id, &rewrite).await,
    }
}

async fn build_agent(config: &Config) -> anyhow::Result<Agent> {
    let api_key = config
        .resolve_api_key()
        .context("no API key; set OPENAI_API_KEY or add api_key to the config file")?;

    let model = ModelConfig {
        id: config.model.clone(),
        base_url: config.base_url.clone(),
        ..ModelConfig::default()
    };
    let provider = Arc::new(OpenAIProvider::new(api_key.clone(), model.clone()));
    let vision = Arc::new(OpenAIProvider::new(api_key, model));

    let executor_config = ExecutorConfig {
        venv_dir: config.venv_dir.clone(),
        plots_dir: config.plots_dir.clone(),
        ..ExecutorConfig::default()
    };
    let executor = Arc::new(
        PythonExecutor::provision(executor_config, &[])
            .await
            .context("failed to provision the Python sandbox")?,
    );
    if executor.is_degraded() {
        eprintln!("Warning: running against the host interpreter (no virtual environment)");
    }

    let agent_config = AgentConfig {
        max_rounds: config.max_rounds,
        data_dir: config.data_dir.clone(),
        plots_dir: config.plots_dir.clone(),
        ..AgentConfig::default()
    };
    let mut agent = Agent::new(agent_config, provider, vision, executor)
        .with_store(SessionStore::open_default()?);
    if let Some(usage_log) = &config.usage_log {
        agent = agent.with_usage_sink(Arc::new(JsonlUsageSink::new(usage_log)));
    }
    Ok(agent)
}

/// Print the structured report for a finished run, or resumption
/// instructions for a suspended one.
fn report_outcome(outcome: &RunOutcome, rewrite: &PathRewrite) {
    match outcome {
        RunOutcome::Finished { state, .. } => {
            let report = extract_report(state, Some(rewrite));
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Failed to render report: {}", e),
            }
        }
        RunOutcome::Suspended { resumption, .. } => {
            println!("The agent needs your input: {}", resumption.question);
            println!(
                "Resume with: bunsen --resume {} --reply \"<your answer>\"",
                resumption.token
            );
        }
    }
}

async fn run_interactive(
    agent: &Agent,
    thread_id: &str,
    rewrite: &PathRewrite,
) -> anyhow::Result<()> {
    println!("bunsen interactive mode (thread {})", thread_id);
    println!("Type a question, or 'exit' to quit.\n");

    let mut events = agent.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AgentEvent::RoundStart { round } => {
                    eprintln!("[round {}]", round);
                }
                AgentEvent::ToolExecutionStart { tool_name, .. } => {
                    eprintln!("[tool: {}]", tool_name);
                }
                AgentEvent::Error { message } => {
                    eprintln!("[error: {}]", message);
                }
                _ => {}
            }
        }
    });

    let mut first = true;
    loop {
        print!("bunsen> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "exit" || query == "quit" {
            break;
        }

        let result = if first {
            agent.run(query, thread_id).await
        } else {
            agent.continue_conversation(query, thread_id).await
        };
        first = false;

        match result {
            Ok(mut outcome) => {
                // Answer suspensions inline in interactive mode.
                loop {
                    let resumption = match &outcome {
                        RunOutcome::Suspended { resumption, .. } => resumption.clone(),
                        RunOutcome::Finished { .. } => break,
                    };
                    println!("The agent asks: {}", resumption.question);
                    print!("reply> ");
                    io::stdout().flush()?;
                    let mut reply = String::new();
                    if io::stdin().read_line(&mut reply)? == 0 {
                        break;
                    }
                    outcome = agent.resume(&resumption.token, reply.trim()).await?;
                }
                report_outcome(&outcome, rewrite);
            }
            Err(e) => eprintln!("Error: {}", e),
        }
        println!();
    }

    printer.abort();
    Ok(())
}
