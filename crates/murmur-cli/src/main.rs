//! murmur - streaming LLM chat in the terminal

mod commands;
mod config;

use clap::Parser;
use murmur_ai::providers::openai::{API_KEY_ENV_VAR, OpenAIProvider};
use murmur_ai::{Model, models};
use murmur_chat::{ChatConfig, ChatEvent, ChatSession, QueryPhase, Setting, Submission};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

/// murmur - streaming LLM chat
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: gpt-3.5-turbo)
    #[arg(short, long)]
    model: Option<String>,

    /// OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// System prompt prepended to every request
    #[arg(short, long)]
    system_prompt: Option<String>,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Minimum milliseconds between streamed updates
    #[arg(long)]
    throttle_ms: Option<u64>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Ask this question on startup, as if typed in after --ask-delay-ms
    #[arg(long)]
    ask: Option<String>,

    /// Delay before a scripted --ask is typed in
    #[arg(long, default_value_t = 0)]
    ask_delay_ms: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("murmur=debug,murmur_chat=debug,murmur_ai=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
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

    // Merge config with CLI args (CLI takes precedence)
    let model_id = args
        .model
        .or(cfg.model.clone())
        .unwrap_or_else(|| models::DEFAULT_MODEL.to_string());
    let base_url = args.base_url.or(cfg.base_url.clone());
    let model = models::resolve_model(&model_id, base_url.as_deref());
    if !model.is_known() {
        tracing::info!("Using custom model '{}' at {}", model.id, model.base_url);
    }

    let Some(api_key) = cfg.get_api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set your API key with: export {}=your-key", API_KEY_ENV_VAR);
        eprintln!("Or add it to config file: murmur --init-config");
        std::process::exit(1);
    };
    let provider = Arc::new(OpenAIProvider::new(api_key));

    // Shared so /model takes effect on the next query
    let current_model = Arc::new(Mutex::new(model));
    let model_setting = {
        let current_model = Arc::clone(&current_model);
        Setting::supplier(move || current_model.lock().clone())
    };

    let mut chat_config = ChatConfig::new().with_model(model_setting);
    if let Some(prompt) = args.system_prompt.or(cfg.system_prompt.clone()) {
        chat_config = chat_config.with_system_prompt(prompt);
    }
    if let Some(temperature) = args.temperature.or(cfg.temperature) {
        chat_config = chat_config.with_temperature(temperature);
    }
    if let Some(throttle_ms) = args.throttle_ms.or(cfg.throttle_ms) {
        chat_config = chat_config.with_throttle(Duration::from_millis(throttle_ms));
    }

    let session = ChatSession::new(chat_config, provider);

    // Non-interactive mode
    if let Some(command) = args.command {
        println!("murmur> {}", command);
        println!();
        return run_query(&session, &command).await;
    }

    if let Some(question) = args.ask.filter(|q| !q.trim().is_empty()) {
        let mut events = session.subscribe();
        let scheduled = session.ask(question.as_str(), Duration::from_millis(args.ask_delay_ms));
        if scheduled.wait().await == Some(Submission::Started) {
            println!("> {}", question);
            follow_query(&session, &mut events).await?;
        }
    }

    run_interactive(&session, &current_model).await
}

/// Submit one query and print its reply as it streams
async fn run_query(session: &ChatSession, query: &str) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    match session.submit(query) {
        Submission::Started => follow_query(session, &mut events).await,
        Submission::Ignored(reason) => {
            tracing::debug!("Query ignored: {:?}", reason);
            Ok(())
        }
    }
}

/// Print events until the running query ends; Ctrl-C cancels it.
///
/// A partial reply left by a failure or cancellation is kept in the log.
async fn follow_query(
    session: &ChatSession,
    events: &mut broadcast::Receiver<ChatEvent>,
) -> anyhow::Result<()> {
    let mut started = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if print_event(&event, &mut started)? {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!("Dropped {} events", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
            }
        }
    }

    session.wait_for_idle().await;
    if matches!(session.phase(), QueryPhase::Errored(_) | QueryPhase::Cancelled) {
        if let Some(message) = session.commit_partial().await? {
            eprintln!("[kept partial reply, {} chars]", message.content().chars().count());
        }
    }
    Ok(())
}

/// Print one event; returns whether it ends the query
fn print_event(event: &ChatEvent, started: &mut bool) -> io::Result<bool> {
    match event {
        ChatEvent::QueryStart { .. } => *started = true,
        ChatEvent::Batch { fragments } => {
            let mut stdout = io::stdout();
            for fragment in fragments {
                write!(stdout, "{}", fragment)?;
            }
            stdout.flush()?;
        }
        ChatEvent::MessageEnd { .. } if *started => println!(),
        ChatEvent::Cancelled => eprintln!("\n[cancelled]"),
        ChatEvent::Error { message } => eprintln!("\nError: {}", message),
        _ => {}
    }
    Ok(match event {
        ChatEvent::MessageEnd { .. } => *started,
        other => other.is_terminal(),
    })
}

async fn run_interactive(session: &ChatSession, current_model: &Mutex<Model>) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("murmur ({})  /help for commands", current_model.lock().id);
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

        let model = current_model.lock().clone();
        if let Some(result) = commands::execute_command(input, session, &model) {
            match result {
                commands::CommandResult::Message(msg) => println!("{}", msg),
                commands::CommandResult::ChangeModel(new_model) => {
                    println!("Switched to: {} ({})", new_model.id, new_model.base_url);
                    *current_model.lock() = new_model;
                }
                commands::CommandResult::Commit => match session.commit_partial().await {
                    Ok(Some(_)) => println!("Kept partial reply."),
                    Ok(None) => println!("No partial reply pending."),
                    Err(e) => println!("{}", e),
                },
                commands::CommandResult::Discard => match session.discard_partial() {
                    Ok(Some(_)) => println!("Dropped partial reply."),
                    Ok(None) => println!("No partial reply pending."),
                    Err(e) => println!("{}", e),
                },
                commands::CommandResult::Exit => break,
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            continue;
        }

        run_query(session, input).await?;
        println!();
    }

    Ok(())
}
