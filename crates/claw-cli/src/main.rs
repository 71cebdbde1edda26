//! claw - terminal chat client for claw agents

mod commands;
mod config;
mod ui;

use std::sync::Arc;

use clap::Parser;
use claw_chat::{ChatClient, ChatSession, HistoryOutcome, StoreEvent, StreamOutcome};
use claw_client::{ChatTransport, HttpTransport, Speaker};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::EnvFilter;

/// claw - chat with a claw agent from the terminal
#[derive(Parser, Debug)]
#[command(name = "claw")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chat service base URL (default: http://localhost:8000)
    #[arg(long)]
    base_url: Option<String>,

    /// Bearer token (falls back to config, then CLAW_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Agent conversation to open
    #[arg(short, long)]
    agent: Option<String>,

    /// Send a single message, print the reply and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Print the conversation history and exit
    #[arg(long)]
    history: bool,

    /// Clear the conversation history and exit
    #[arg(long)]
    clear: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("claw=debug,claw_client=debug,claw_chat=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_transport(args: &Args, cfg: &config::Config) -> anyhow::Result<Arc<dyn ChatTransport>> {
    let mut builder = HttpTransport::builder(cfg.base_url(args.base_url.clone()))
        .credentials(cfg.credentials(args.token.clone()));
    if let Some(limit) = cfg.history_limit {
        builder = builder.history_limit(limit);
    }
    if let Some(timeout) = cfg.connect_timeout() {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(timeout) = cfg.request_timeout() {
        builder = builder.request_timeout(timeout);
    }

    Ok(Arc::new(builder.build()?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();

    let Some(conversation_id) = args
        .agent
        .clone()
        .or_else(|| cfg.default_conversation.clone())
    else {
        eprintln!("Error: No agent given");
        eprintln!();
        eprintln!("Pass one with: claw --agent <id>");
        eprintln!("Or set default_conversation in the config file: claw --init-config");
        std::process::exit(1);
    };

    let transport = build_transport(&args, &cfg)?;
    let client = ChatClient::new(transport);
    // Subscribe before the session starts loading history so `Seeded` is seen
    let receiver = client.subscribe();
    let mut session = client.session(conversation_id);

    if args.clear {
        session.clear_history().await;
        println!("Cleared conversation.");
        return Ok(());
    }

    if args.history {
        if session.wait_for_history().await == Some(HistoryOutcome::Failed) {
            eprintln!("Warning: Could not load history (run with -v for details)");
        }
        ui::print_log(&session.messages());
        return Ok(());
    }

    // Non-interactive mode
    if let Some(command) = args.command {
        return run_command(&mut session, &command).await;
    }

    run_interactive(&client, receiver, &mut session).await
}

async fn run_command(session: &mut ChatSession, command: &str) -> anyhow::Result<()> {
    // Prior history would otherwise be seeded after the echo and lost
    session.wait_for_history().await;

    println!("you> {}", command);
    println!();

    let start = session.messages().len();
    let outcome = session.send_message(command)?.wait().await;

    for message in ui::reply_after(&session.messages(), start) {
        println!("{}", ui::render_message(message));
    }

    if let StreamOutcome::Errored(_) = outcome {
        std::process::exit(1);
    }
    Ok(())
}

/// Print replies for the conversation currently on screen as they arrive
fn spawn_printer(
    client: &ChatClient,
    mut receiver: broadcast::Receiver<StoreEvent>,
    mut current: watch::Receiver<String>,
) -> tokio::task::JoinHandle<()> {
    let client = client.clone();

    tokio::spawn(async move {
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "display fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if event.conversation_id() != current.borrow_and_update().as_str() {
                continue;
            }

            match event {
                StoreEvent::Appended { message, .. } => {
                    if message.speaker() != Some(Speaker::User) {
                        println!("{}", ui::render_message(&message));
                    }
                }
                StoreEvent::Seeded {
                    conversation_id, ..
                } => {
                    println!("[Loaded history]");
                    ui::print_log(&client.messages(&conversation_id));
                }
                StoreEvent::Cleared { .. } | StoreEvent::StreamingChanged { .. } => {}
            }
        }
    })
}

async fn run_interactive(
    client: &ChatClient,
    receiver: broadcast::Receiver<StoreEvent>,
    session: &mut ChatSession,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (current_tx, current_rx) = watch::channel(session.conversation_id().to_string());
    let printer = spawn_printer(client, receiver, current_rx);

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("claw ({})  /help for commands", session.conversation_id());
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input) {
            match result {
                commands::CommandResult::Clear => {
                    session.clear_history().await;
                    println!("Cleared conversation.");
                }
                commands::CommandResult::Switch(id) => {
                    current_tx.send_replace(id.clone());
                    session.switch_to(id);
                    println!("Switched to {}.", session.conversation_id());
                }
                commands::CommandResult::History => {
                    ui::print_log(&session.messages());
                }
                commands::CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                commands::CommandResult::Exit => {
                    break;
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        if let Err(e) = session.send_message(input) {
            println!("{}", e);
        }
    }

    client.cancel_all();
    printer.abort();
    Ok(())
}
