use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sop_agents::{ExplainerAgent, LoopSettings};
use sop_core::{advisory_safe_cues, validate_question, ExplainRequest};
use sop_llm::Generator;
use sop_observability::{init_tracing, AppMetrics};
use sop_storage::{load_sop_dir, SopRepository, Store};

type Agent = ExplainerAgent<Generator, Store>;

#[derive(Debug, Parser)]
#[command(name = "sop-explainer")]
#[command(about = "Manufacturing SOP & safety explainer")]
struct Cli {
    /// SQLite database holding SOP documents; the demo memory store is used when unset.
    #[arg(long, env = "SOP_DATABASE_URL")]
    database_url: Option<String>,

    /// Directory of .md/.txt SOP documents loaded at startup.
    #[arg(long, env = "SOP_DOCS_ROOT")]
    docs_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Explain a safety concept or the intent of an SOP.
    Ask {
        question: String,
        #[arg(long)]
        sop_id: Option<String>,
    },
    /// Run only the intent gate.
    Classify { question: String },
    /// Report operational phrasing in a piece of text. Reads stdin when no text is given.
    Scan {
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        text: Option<String>,
    },
    Sops {
        #[command(subcommand)]
        command: SopsCommand,
    },
    Chat {
        #[arg(long)]
        sop_id: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum SopsCommand {
    List,
    Show { sop_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("sop_cli");
    let cli = Cli::parse();

    let agent = build_agent(cli.database_url.as_deref(), cli.docs_root.as_deref()).await?;

    match cli.command {
        Command::Ask { question, sop_id } => {
            validate_question(&question)?;
            let result = agent.explain(ExplainRequest { question, sop_id }).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Classify { question } => {
            let verdict = agent.classify(&question);
            let payload = serde_json::json!({
                "safe": verdict.safe,
                "matched": verdict.matched,
                "refusal": verdict.refusal_text,
                "safe_cues": advisory_safe_cues(&question),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Scan { file, text } => {
            let text = read_scan_input(file.as_deref(), text)?;
            let violations = agent.scan(&text);
            let payload = serde_json::json!({
                "clean": violations.is_empty(),
                "violations": violations,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Sops { command } => match command {
            SopsCommand::List => {
                let sops = agent.store().list_sops().await?;
                println!("{}", serde_json::to_string_pretty(&sops)?);
            }
            SopsCommand::Show { sop_id } => {
                let document = agent
                    .store()
                    .get_sop(&sop_id)
                    .await?
                    .with_context(|| format!("no SOP with id '{sop_id}'"))?;
                println!("{}", serde_json::to_string_pretty(&document)?);
            }
        },
        Command::Chat { sop_id } => run_chat(&agent, sop_id).await?,
    }

    Ok(())
}

fn read_scan_input(file: Option<&Path>, text: Option<String>) -> Result<String> {
    match (file, text) {
        (Some(path), _) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display())),
        (None, Some(text)) => Ok(text),
        (None, None) => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed reading stdin")?;
            Ok(buffer)
        }
    }
}

async fn run_chat(agent: &Agent, sop_id: Option<String>) -> Result<()> {
    println!("SOP & Safety Explainer. Ask about safety concepts and why SOPs exist. type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }
        if let Err(err) = validate_question(question) {
            println!("\n{err}\n");
            continue;
        }

        let result = agent
            .explain(ExplainRequest {
                question: question.to_string(),
                sop_id: sop_id.clone(),
            })
            .await;

        println!("\n{}\n", result.response);
        if result.filtered {
            println!("(refused by the intent gate)\n");
        }
    }

    Ok(())
}

async fn build_agent(database_url: Option<&str>, docs_root: Option<&Path>) -> Result<Agent> {
    let store = Store::open(database_url).await?;

    if let Some(root) = docs_root {
        let documents = load_sop_dir(root)
            .with_context(|| format!("failed loading SOP documents from {}", root.display()))?;
        for document in documents {
            store.upsert_sop(document).await?;
        }
    }

    Ok(ExplainerAgent::new(
        Arc::new(Generator::from_env()),
        Arc::new(store),
        LoopSettings::from_env(),
        AppMetrics::shared(),
    ))
}
