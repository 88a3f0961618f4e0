use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use insights_advisor::backend::ChatBackend;
use insights_advisor::config::BackendArgs;
use insights_advisor::constants::DEFAULT_PORT;
use insights_advisor::conversation::MessageStatus;
use insights_advisor::dataset::{TabularDataset, PREVIEW_ROWS};
use insights_advisor::session::{Session, TurnOutcome};
use insights_advisor::ui::{render_preview, TranscriptPrinter};
use insights_advisor::web_server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    backend: BackendArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the web interface.
    Serve {
        #[arg(long, default_value_t = DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, help = "CSV file to load at startup.")]
        csv: Option<PathBuf>,
    },
    /// Chat about a CSV file in the terminal.
    Chat {
        #[arg(long, help = "CSV file to analyze.")]
        csv: PathBuf,
    },
    /// Ask a single question about a CSV file and print the answer.
    Ask {
        #[arg(long, help = "CSV file to analyze.")]
        csv: PathBuf,
        /// The question to ask.
        question: String,
    },
    /// Print the first rows of a CSV file.
    Preview {
        #[arg(long, help = "CSV file to preview.")]
        csv: PathBuf,
        #[arg(long, default_value_t = PREVIEW_ROWS, help = "Number of rows to show.")]
        rows: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GEMINI_API_KEY and friends)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Terminal commands print answers on stdout, so logs stay quiet on stderr
    let default_filter = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Serve { port, csv } => {
            let backend = cli.backend.build_backend()?;
            let session = Session::new();
            if let Some(path) = csv {
                session.init(load_dataset(&path)?).await;
            }

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(port, session, backend).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, shutting down...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat { csv } => {
            let dataset = load_dataset(&csv)?;
            let backend = cli.backend.build_backend()?;
            run_chat(dataset, backend.as_ref()).await?;
        }
        Commands::Ask { csv, question } => {
            let dataset = load_dataset(&csv)?;
            let backend = cli.backend.build_backend()?;
            let session = Session::new();
            session.init(dataset).await;

            // Mark the greeting as already shown
            let mut printer = TranscriptPrinter::new();
            printer.render(&session.snapshot());

            match answer(&session, backend.as_ref(), &mut printer, &question).await? {
                TurnOutcome::Finished(message) if message.status == MessageStatus::Failed => {
                    bail!("the model backend could not answer the question")
                }
                TurnOutcome::Finished(_) => {}
                TurnOutcome::Orphaned => bail!("the conversation was reset"),
            }
        }
        Commands::Preview { csv, rows } => {
            let dataset = load_dataset(&csv)?;
            print!("{}", render_preview(&dataset.preview(rows)));
        }
    }

    Ok(())
}

fn load_dataset(path: &Path) -> Result<TabularDataset> {
    TabularDataset::from_path(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn emit(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// Submits one question and prints the reply while it streams.
async fn answer(
    session: &Session,
    backend: &dyn ChatBackend,
    printer: &mut TranscriptPrinter,
    question: &str,
) -> Result<TurnOutcome> {
    let turn = session.begin_turn(question).await?;
    let mut snapshots = session.subscribe();
    let run = session.run_turn(turn, backend);
    tokio::pin!(run);

    loop {
        tokio::select! {
            outcome = &mut run => {
                emit(&printer.render(&session.snapshot()));
                return Ok(outcome);
            }
            Ok(()) = snapshots.changed() => {
                let snapshot = snapshots.borrow_and_update().clone();
                emit(&printer.render(&snapshot));
            }
        }
    }
}

async fn run_chat(dataset: TabularDataset, backend: &dyn ChatBackend) -> Result<()> {
    let session = Session::new();
    session.init(dataset.clone()).await;

    let mut printer = TranscriptPrinter::new();
    emit(&printer.render(&session.snapshot()));
    emit("Commands: /preview, /reset, /quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        emit("\n> ");
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/preview" => {
                if let Some(preview) = session.preview().await {
                    emit(&render_preview(&preview));
                }
            }
            "/reset" => {
                session.reset().await;
                session.init(dataset.clone()).await;
                emit(&printer.render(&session.snapshot()));
            }
            question => {
                if let Err(e) = answer(&session, backend, &mut printer, question).await {
                    emit(&format!("! {e}\n"));
                }
            }
        }
    }
    Ok(())
}
