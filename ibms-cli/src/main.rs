use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ibms_config::AssistantConfig;
use ibms_core::{Assistant, Session, TurnOutcome, TurnReport, EXAMPLE_QUESTIONS};
use ibms_infer::HttpOllamaEngine;
use ibms_narrator::OutputSurface;
use ibms_policy::SqlPolicy;
use ibms_sqlgen::extract_sql;
use ibms_store::SqliteDataPlane;
use ibms_types::TurnStage;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ibms", about = "Natural-language questions over the IBMS database")]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database file; overrides the configured path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer one question and exit.
    Ask { question: Vec<String> },
    /// Interactive session over stdin.
    Chat,
    /// Extract and validate a statement without running it.
    Validate { sql: Vec<String> },
    /// Print the suggested questions.
    Examples,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Examples => {
            for (i, q) in EXAMPLE_QUESTIONS.iter().enumerate() {
                println!("{:>2}. {q}", i + 1);
            }
        }
        Command::Validate { sql } => {
            let candidate = extract_sql(&sql.join(" "));
            match SqlPolicy::ibms().validate(&candidate) {
                Ok(validated) => println!("OK: {validated}"),
                Err(rejection) => {
                    println!("REJECTED ({:?}): {rejection}", rejection.check);
                    std::process::exit(1);
                }
            }
        }
        Command::Ask { question } => {
            let cfg = load_config(cli.config, cli.db)?;
            init_tracing(&cfg.logging.level)?;
            let assistant = build_assistant(&cfg)?;
            let mut session = Session::new();
            let report = ask(&assistant, &mut session, &question.join(" "), cfg.pipeline.display_rows).await;
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Command::Chat => {
            let cfg = load_config(cli.config, cli.db)?;
            init_tracing(&cfg.logging.level)?;
            let assistant = build_assistant(&cfg)?;
            let mut session = Session::new();
            println!("IBMS assistant. Type a question, 'examples' for suggestions, 'exit' to quit.");

            let stdin = io::stdin();
            loop {
                print!("\n> ");
                io::stdout().flush()?;
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let message = line.trim();
                match message {
                    "" => continue,
                    "exit" | "quit" => break,
                    "examples" => {
                        EXAMPLE_QUESTIONS.iter().for_each(|q| println!("  {q}"));
                        continue;
                    }
                    _ => {}
                }
                ask(&assistant, &mut session, message, cfg.pipeline.display_rows).await;
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>, db: Option<PathBuf>) -> anyhow::Result<AssistantConfig> {
    let mut cfg = AssistantConfig::load(path.as_deref())?;
    if let Some(db) = db {
        cfg.database.path = db;
    }
    Ok(cfg)
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("{level},reqwest=warn,hyper=warn"))
            .map_err(|e| anyhow::anyhow!("invalid log level '{level}': {e}"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn build_assistant(cfg: &AssistantConfig) -> anyhow::Result<Assistant> {
    let llm = Arc::new(HttpOllamaEngine::new(cfg.llm.base_url.clone(), cfg.llm.request_timeout()));
    let data = Arc::new(SqliteDataPlane::open(&cfg.sqlite())?);
    info!(
        llm = %cfg.llm.base_url,
        sql_model = %cfg.llm.sql_model,
        chat_model = %cfg.llm.chat_model,
        db = %cfg.database.path.display(),
        "assistant ready"
    );
    Ok(Assistant::from_config(llm, data, cfg)?)
}

async fn ask(assistant: &Assistant, session: &mut Session, question: &str, display_rows: usize) -> TurnReport {
    let mut surface = TerminalSurface::default();
    let report = assistant.handle_turn(session, question, &mut surface).await;
    surface.finish();

    match &report.outcome {
        TurnOutcome::Conversation(c) => {
            println!("\n\n{}", c.details());
        }
        TurnOutcome::Briefing(b) => {
            if !b.result.is_empty() {
                println!("\n\n{}", b.table(display_rows));
            }
            println!("\n{}", b.details());
        }
        TurnOutcome::Rejected { .. } | TurnOutcome::ExecutionFailed { .. } | TurnOutcome::ModelFault { .. } => {
            println!("{}", report.text());
        }
    }
    report
}

/// Streams narration to stdout. Frames that only extend the printed text are
/// written as deltas; any other frame makes the final text be reprinted whole.
#[derive(Default)]
struct TerminalSurface {
    printed: String,
    latest: String,
    diverged: bool,
}

impl TerminalSurface {
    fn finish(&mut self) {
        if self.diverged {
            println!("\n----------------------------------------");
            print!("{}", self.latest);
        }
        let _ = io::stdout().flush();
    }
}

impl OutputSurface for TerminalSurface {
    fn render(&mut self, text: &str) {
        self.latest = text.to_string();
        if self.diverged {
            return;
        }
        match text.strip_prefix(self.printed.as_str()) {
            Some(delta) => {
                print!("{delta}");
                let _ = io::stdout().flush();
                self.printed.push_str(delta);
            }
            None => self.diverged = true,
        }
    }

    fn stage(&mut self, stage: TurnStage) {
        let status = match stage {
            TurnStage::Generating => "generating SQL...",
            TurnStage::Validating => "validating...",
            TurnStage::Executing => "querying database...",
            TurnStage::Narrating => "writing response...",
            TurnStage::Rejected => "query blocked",
            TurnStage::ExecFailed => "execution failed",
            _ => return,
        };
        eprintln!("[{status}]");
    }
}
