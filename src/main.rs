use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use patchwise_cli::{
    Config, ConfigStore,
    cli::{Cli, Commands, ConfigCommands, HistoryCommands, LineRange},
    core::{
        ChangesAction, ChatSession, ClientManager, CommentAction, HistoryStore, Outcome, Services,
        TerminalNotifier, WorkerPool, host, prompt,
    },
};
use patchwise_core::{Document as _, TextDocument};
use patchwise_core::approval::ApprovalActor;
use patchwise_core::transport::Role;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity, unless RUST_LOG says otherwise
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Chat { prompt } => chat(&prompt).await,

        Commands::Change {
            file,
            instruction,
            code,
            lines,
        } => change(&file, &instruction, code.as_deref(), lines).await,

        Commands::Comment { file, lines } => comment(&file, lines).await,

        Commands::Config { command } => {
            config_command(command)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::History { command } => {
            history_command(command)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Everything the flows need, with the terminal as the approval interface.
fn services() -> anyhow::Result<Services> {
    let config = Config::load()?;
    let store = Arc::new(ConfigStore::with_path(config, Config::config_path()?));
    let clients = Arc::new(ClientManager::default());
    Arc::clone(&clients).follow(store.subscribe());

    let (actor, approvals) = ApprovalActor::new();
    tokio::spawn(actor.run());
    let _approver = host::spawn_terminal_approver(approvals.clone())?;

    Ok(Services {
        config: store,
        clients,
        pool: WorkerPool::default(),
        approvals,
        notifier: Arc::new(TerminalNotifier),
    })
}

/// First Ctrl-C interrupts the LLM call in flight, the second one exits.
fn interrupt_on_ctrl_c(clients: Arc<ClientManager>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("interrupt requested");
        clients.interrupt_current();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn shutdown(clients: &ClientManager) {
    if let Err(e) = clients.shutdown() {
        tracing::warn!(error = %e, "failed to close LLM client");
    }
}

const fn exit_code(outcome: &Outcome) -> ExitCode {
    match outcome {
        Outcome::Failed(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

async fn chat(prompt: &str) -> anyhow::Result<ExitCode> {
    let config = Config::load()?;
    let history = HistoryStore::open(&config.history)?;
    let conversation = history.load()?;

    let store = Arc::new(ConfigStore::new(config));
    let clients = Arc::new(ClientManager::default());
    Arc::clone(&clients).follow(store.subscribe());
    let mut session = ChatSession::new(
        store,
        Arc::clone(&clients),
        WorkerPool::default(),
        conversation,
    );
    interrupt_on_ctrl_c(Arc::clone(&clients));

    let reply = session
        .send(prompt, |text| {
            print!("{text}");
            std::io::stdout().flush().ok();
        })
        .await;
    println!();

    if let Err(e) = history.save(session.conversation_mut()) {
        tracing::warn!(error = %e, "failed to save chat history");
    }
    shutdown(&clients);

    let reply = reply?;
    if reply.interrupted {
        eprintln!("(interrupted)");
    }
    Ok(ExitCode::SUCCESS)
}

async fn change(
    file: &Path,
    instruction: &str,
    code: Option<&Path>,
    lines: Option<LineRange>,
) -> anyhow::Result<ExitCode> {
    let text = read(file)?;
    let suggested = code.map(read).transpose()?;
    let instruction = match lines {
        Some(range) => format!(
            "{instruction}\nOnly change lines {} to {}.",
            range.start, range.end
        ),
        None => instruction.to_string(),
    };

    let services = services()?;
    let clients = Arc::clone(&services.clients);
    interrupt_on_ctrl_c(Arc::clone(&clients));

    let mut document = TextDocument::new(text);
    let target = file.display().to_string();
    let outcome = ChangesAction::new(services)
        .run(
            &mut document,
            &target,
            prompt::language_for(file),
            &instruction,
            suggested.as_deref(),
        )
        .await;
    shutdown(&clients);

    if matches!(outcome, Outcome::Applied { .. }) {
        write(file, document.text())?;
    }
    Ok(exit_code(&outcome))
}

async fn comment(file: &Path, lines: LineRange) -> anyhow::Result<ExitCode> {
    let mut document = TextDocument::new(read(file)?);
    document.select_lines(lines.start, lines.end);

    let services = services()?;
    let clients = Arc::clone(&services.clients);
    interrupt_on_ctrl_c(Arc::clone(&clients));

    let target = file.display().to_string();
    let outcome = CommentAction::new(services)
        .run(&mut document, &target, prompt::language_for(file))
        .await;
    shutdown(&clients);

    if matches!(outcome, Outcome::Applied { .. }) {
        write(file, document.text())?;
    }
    Ok(exit_code(&outcome))
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write(path: &Path, text: &str) -> anyhow::Result<()> {
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

fn config_command(command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            let mut config = Config::load()?;
            for profile in &mut config.llms {
                if !profile.llm.api_key.is_empty() {
                    profile.llm.api_key = "********".to_string();
                }
            }
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommands::Path => {
            let path: PathBuf = Config::config_path()?;
            println!("{}", path.display());
        }
        ConfigCommands::Select { name } => {
            let store = ConfigStore::with_path(Config::load()?, Config::config_path()?);
            store.select(&name)?;
            store.save_selection()?;
            println!("Active LLM: {name}");
        }
    }
    Ok(())
}

fn history_command(command: HistoryCommands) -> anyhow::Result<()> {
    let config = Config::load()?;
    let history = HistoryStore::open(&config.history)?;

    match command {
        HistoryCommands::Show => {
            let conversation = history.load()?;
            if conversation.is_empty() {
                println!("No chat history.");
            }
            for turn in conversation.turns() {
                let who = match turn.role {
                    Role::System => "system",
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                let marker = if turn.interrupted { " (interrupted)" } else { "" };
                println!(
                    "[{}] {who}{marker}:\n{}\n",
                    turn.at.format("%Y-%m-%d %H:%M"),
                    turn.content
                );
            }
        }
        HistoryCommands::Clear => {
            history.clear()?;
            println!("Chat history cleared.");
        }
    }
    Ok(())
}
