use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::debug;
use plas_notebook::kernel::KernelEvent;
use plas_notebook::node::{CodeNode, Container, Node, QuestionKind, Slot};
use plas_notebook::settings::{load_settings, ClientSettings};
use plas_notebook::{
    Action, FileSessionStore, HttpApi, KernelClient, MemorySessionStore, NodeId,
    NotebookController, SessionStore, ViewMode, WsConnector,
};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server origin (overrides the settings file and PLAS_ORIGIN)
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List kernels known to the server
    Kernels {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Start a kernel and remember it as the current session
    Start {
        /// Restart the stored kernel instead of starting a new one
        #[arg(long)]
        reuse: bool,
    },
    /// Interrupt a kernel (defaults to the stored session)
    Interrupt { id: Option<String> },
    /// Shut a kernel down (defaults to the stored session)
    Shutdown { id: Option<String> },
    /// Execute every top-level code node of an exercise and print the outputs
    Run {
        p_id: String,
        /// Seconds to wait for the queue to drain
        #[arg(long, default_value = "60")]
        timeout: u64,
        /// Leave the kernel running afterwards
        #[arg(long)]
        keep: bool,
    },
    /// Submit answers for one question and print the verdict
    Score {
        p_id: String,
        q_id: String,
        /// One answer per field or answer cell, in order
        #[arg(long = "answer")]
        answers: Vec<String>,
    },
}

#[derive(Serialize)]
struct KernelEntry {
    id: String,
    alive: bool,
    current: bool,
}

#[derive(Tabled)]
struct KernelTableRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "SESSION")]
    session: String,
}

impl From<&KernelEntry> for KernelTableRow {
    fn from(entry: &KernelEntry) -> Self {
        KernelTableRow {
            id: entry.id.clone(),
            status: if entry.alive { "alive" } else { "dead" }.to_string(),
            session: if entry.current { "*" } else { "-" }.to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let mut settings = load_settings().with_env_overrides();
    if let Some(origin) = cli.origin {
        settings.origin = origin;
    }
    debug!("Using origin {}", settings.origin);

    match cli.command {
        Commands::Kernels { json } => list_kernels(&settings, json).await,
        Commands::Start { reuse } => start_kernel(&settings, reuse).await,
        Commands::Interrupt { id } => interrupt_kernel(&settings, id).await,
        Commands::Shutdown { id } => shutdown_kernel(&settings, id).await,
        Commands::Run { p_id, timeout, keep } => run_page(&settings, &p_id, timeout, keep).await,
        Commands::Score {
            p_id,
            q_id,
            answers,
        } => score_question(&settings, &p_id, &q_id, answers).await,
    }
}

/// A kernel client over the real transports. `id` replaces the stored session.
fn kernel_client(
    settings: &ClientSettings,
    id: Option<String>,
) -> Result<(KernelClient, UnboundedReceiver<KernelEvent>)> {
    let transport = Arc::new(HttpApi::new(&settings.origin, settings.request_timeout())?);
    let connector = Arc::new(WsConnector::new(&settings.origin)?);
    let store: Arc<dyn SessionStore> = match id {
        Some(id) => Arc::new(MemorySessionStore::with_kernel_id(id)),
        None => Arc::new(FileSessionStore::new(settings.origin.clone())),
    };
    Ok(KernelClient::new(
        transport,
        connector,
        store,
        settings.kernel_options(),
    ))
}

async fn list_kernels(settings: &ClientSettings, json_output: bool) -> Result<()> {
    let (client, _events) = kernel_client(settings, None)?;
    let current = FileSessionStore::new(settings.origin.clone()).load_kernel_id();

    let ids = client.get_kernel_ids().await?;
    let alive = join_all(ids.iter().map(|id| client.is_alive_kernel(Some(id)))).await;
    let entries: Vec<KernelEntry> = ids
        .into_iter()
        .zip(alive)
        .map(|(id, alive)| KernelEntry {
            current: current.as_deref() == Some(id.as_str()),
            alive: alive.unwrap_or(false),
            id,
        })
        .collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No running kernels found.");
        return Ok(());
    }
    let rows: Vec<KernelTableRow> = entries.iter().map(KernelTableRow::from).collect();
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
    Ok(())
}

async fn start_kernel(settings: &ClientSettings, reuse: bool) -> Result<()> {
    let (mut client, _events) = kernel_client(settings, None)?;
    let kernel_id = client.set_up_kernel(reuse).await?;
    println!("{}", kernel_id);
    Ok(())
}

async fn interrupt_kernel(settings: &ClientSettings, id: Option<String>) -> Result<()> {
    let (client, _events) = kernel_client(settings, id)?;
    client.kernel_interrupt().await?;
    println!("Interrupt requested");
    Ok(())
}

async fn shutdown_kernel(settings: &ClientSettings, id: Option<String>) -> Result<()> {
    let (mut client, _events) = kernel_client(settings, id)?;
    client.shutdown().await?;
    println!("Kernel shut down");
    Ok(())
}

async fn run_page(settings: &ClientSettings, p_id: &str, timeout: u64, keep: bool) -> Result<()> {
    let mut controller = NotebookController::connect(settings, p_id, ViewMode::Learner).await?;
    controller.open().await?;
    controller.handle_action(Action::ExecAll, None).await?;
    let finished = controller
        .run_until_idle(Duration::from_secs(timeout))
        .await;

    let document = controller.document();
    let code_ids = document.code_children(&Container::Root)?;
    for (idx, id) in code_ids.iter().enumerate() {
        let code = document.code(id)?;
        println!("In [{}]:", idx + 1);
        for line in code.value().lines() {
            println!("    {}", line);
        }
        for output in code.outputs() {
            println!("{}", output.to_text());
        }
        println!();
    }

    if !keep {
        controller.close().await?;
    }
    finished.context("Execution did not finish")?;
    Ok(())
}

fn find_question(controller: &NotebookController, q_id: &str) -> Option<NodeId> {
    let document = controller.document();
    document
        .root()
        .iter()
        .find(|id| document.question(id).is_ok_and(|q| q.q_id == q_id))
        .cloned()
}

/// Put `answers` into the question's fields or answer cells.
fn fill_answers(
    controller: &mut NotebookController,
    question: &NodeId,
    answers: Vec<String>,
) -> Result<()> {
    let document = controller.document_mut();
    let (kind, editable) = {
        let q = document.question(question)?;
        (q.kind, q.editable)
    };
    let answer_field = Container::Slot {
        question: question.clone(),
        slot: Slot::AnswerField,
    };

    match kind {
        QuestionKind::WordTest => {
            let fields = &mut document.question_mut(question)?.fields;
            if answers.len() > fields.len() {
                bail!("{} answers given for {} fields", answers.len(), fields.len());
            }
            for (field, answer) in fields.iter_mut().zip(&answers) {
                field.set_value(answer);
            }
        }
        QuestionKind::CodeTest if editable => {
            document.clear_slot(question, Slot::AnswerField)?;
            for answer in answers {
                document.append(&answer_field, Node::Code(CodeNode::new(answer, false)))?;
            }
        }
        QuestionKind::CodeTest => {
            let cells = document.code_children(&answer_field)?;
            if answers.len() > cells.len() {
                bail!("{} answers given for {} code cells", answers.len(), cells.len());
            }
            for (cell, answer) in cells.iter().zip(answers) {
                document.code_mut(cell)?.set_value(answer);
            }
        }
    }
    Ok(())
}

async fn score_question(
    settings: &ClientSettings,
    p_id: &str,
    q_id: &str,
    answers: Vec<String>,
) -> Result<()> {
    let mut controller = NotebookController::connect(settings, p_id, ViewMode::Learner).await?;
    let question = find_question(&controller, q_id)
        .ok_or_else(|| anyhow!("No question '{}' in {}", q_id, p_id))?;
    fill_answers(&mut controller, &question, answers)?;

    controller
        .handle_action(Action::Test, Some(question.clone()))
        .await?;

    let q = controller.document().question(&question)?;
    if q.progress_bar_visible() {
        println!("Grading pending");
    } else {
        println!("{:?}", q.progress);
        if let Some(toast) = q.toast() {
            println!("{}", toast);
        }
    }
    Ok(())
}
