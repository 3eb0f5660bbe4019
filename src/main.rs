use std::process::ExitCode;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use ask_cli::config::{self, Config};
use ask_cli::copilot::{CopilotAuth, TokenStore};
use ask_cli::llm::models::{self, ProviderKind};
use ask_cli::llm::{self, CompletionRequest, LlmError};
use ask_cli::prompt::{self, Suffixes};
use ask_cli::relay::{self, Delivery};

const COMMIT_PROMPT: &str = "Generate a git commit message based on the following diff:";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "ask",
    about = "Ask hosted or local LLMs from the shell",
    version = env!("CARGO_PKG_VERSION"),
    args_conflicts_with_subcommands = true,
)]
struct Cli {
    #[command(subcommand)]
    subcommand: Option<Commands>,

    #[command(flatten)]
    ask: AskArgs,

    /// Model to use (e.g. gpt-4o, claude-3-haiku, openai/gpt-5, llama3:8b)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Print the whole reply at once instead of streaming it
    #[arg(long, global = true)]
    no_stream: bool,
}

#[derive(Args)]
struct AskArgs {
    /// The prompt to send
    prompt: Vec<String>,

    /// Reply with the shell command only
    #[arg(short = 'c', long)]
    command: bool,

    /// Ask for a breakdown of what the command does
    #[arg(short, long)]
    breakdown: bool,

    /// Comma-separated files or glob patterns to include
    #[arg(long)]
    files: Option<String>,

    /// URL whose content to include (repeatable)
    #[arg(short = 'u', long = "url")]
    urls: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List known models
    List {
        /// Also list models installed in the local Ollama daemon
        #[arg(long)]
        include_ollama: bool,
    },
    /// Generate a git commit message from a piped diff
    Cm,
    /// Run a custom command from the config file
    Run {
        name: String,
        prompt: Vec<String>,
    },
    /// Log in to GitHub Copilot
    CopilotLogin,
    /// Remove the stored GitHub Copilot token
    CopilotLogout,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    if let Ok(path) = dotenvy::dotenv() {
        tracing::info!(path = %path.display(), "loaded .env");
    }

    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone());

    let cli = Cli::parse();
    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_cancelled(&e) => ExitCode::from(130),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ask_cli=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// The first Ctrl+C cancels the in-flight request; a second one exits.
fn install_interrupt_handler(cancel: CancellationToken) {
    let presses = Arc::new(AtomicU8::new(0));
    let result = ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) >= 1 {
            std::process::exit(130);
        }
        eprintln!("\nInterrupted. Press Ctrl+C again to force quit.");
        cancel.cancel();
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, "could not install Ctrl+C handler");
    }
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<LlmError>(), Some(LlmError::Cancelled))
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let config = config::load_config()?;
    let stream = config.stream && !cli.no_stream;

    match cli.subcommand {
        None => cmd_ask(&config, cli.ask, cli.model, stream, cancel).await,
        Some(Commands::List { include_ollama }) => cmd_list(&config, include_ollama).await,
        Some(Commands::Cm) => cmd_cm(&config, cli.model, stream, cancel).await,
        Some(Commands::Run { name, prompt }) => {
            cmd_run(&config, &name, &prompt, cli.model, stream, cancel).await
        }
        Some(Commands::CopilotLogin) => cmd_copilot_login(cancel).await,
        Some(Commands::CopilotLogout) => cmd_copilot_logout(),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_ask(
    config: &Config,
    args: AskArgs,
    model: Option<String>,
    stream: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let stdin = prompt::read_stdin()?;
    let suffixes = Suffixes {
        command: args.command,
        breakdown: args.breakdown,
    };
    let mut text = prompt::compose(&args.prompt, stdin.as_deref(), suffixes)?;

    if let Some(list) = args.files.as_deref() {
        text = prompt::with_files(&text, &prompt::read_files(list)?);
    }
    if !args.urls.is_empty() {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        let content = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled.into()),
            content = prompt::fetch_urls(&client, &args.urls) => content?,
        };
        text = prompt::with_urls(&text, &content);
    }

    let model = model.unwrap_or_else(|| config.default_model.clone());
    process_request(config, &model, text, stream, cancel).await
}

async fn cmd_cm(
    config: &Config,
    model: Option<String>,
    stream: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let diff = prompt::read_stdin()?.context("this command requires git diff input on stdin")?;
    let text = prompt::compose(&[COMMIT_PROMPT.to_string()], Some(&diff), Suffixes::default())?;
    let model = model.unwrap_or_else(|| models::cheap_model(&config.default_model));
    process_request(config, &model, text, stream, cancel).await
}

async fn cmd_run(
    config: &Config,
    name: &str,
    words: &[String],
    model: Option<String>,
    stream: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let command = config.command(name).with_context(|| {
        let known: Vec<&str> = config.commands.iter().map(|c| c.name.as_str()).collect();
        format!("no custom command '{}' (configured: {})", name, known.join(", "))
    })?;

    let stdin = prompt::read_stdin()?;
    if command.require_stdin && stdin.is_none() {
        anyhow::bail!("command '{}' requires piped input", name);
    }

    let mut all_words = vec![command.prompt.clone()];
    all_words.extend_from_slice(words);
    let text = prompt::compose(&all_words, stdin.as_deref(), Suffixes::default())?;

    let model = model.unwrap_or_else(|| config.default_model.clone());
    process_request(config, &model, text, stream, cancel).await
}

async fn cmd_list(config: &Config, include_ollama: bool) -> Result<()> {
    let mut current = None;
    for (kind, entry) in models::all_models() {
        if current != Some(kind) {
            if current.is_some() {
                println!();
            }
            println!("{}:", kind);
            current = Some(kind);
        }
        println!("  {:<28} {:<28} {}", entry.alias, entry.id(), entry.description);
    }

    if include_ollama {
        let settings = config.provider_settings(None);
        let client = llm::transport::build_client(ProviderKind::Ollama.name(), FETCH_TIMEOUT)?;
        println!("\n{}:", ProviderKind::Ollama);
        match llm::ollama::list_models(&client, settings.ollama_host.as_deref()).await {
            Ok(local) if local.is_empty() => println!("  (no local models installed)"),
            Ok(local) => {
                for m in local {
                    println!("  {:<28} {:.1} GB", m.name, m.size as f64 / 1e9);
                }
            }
            Err(e) => eprintln!("  could not reach Ollama: {}", e),
        }
    }

    Ok(())
}

async fn cmd_copilot_login(cancel: &CancellationToken) -> Result<()> {
    let store = token_store()?;
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("building HTTP client")?;
    let auth = CopilotAuth::new(client);

    let device = auth
        .request_device_code(cancel)
        .await
        .context("requesting device code")?;

    println!("First copy your one-time code:");
    println!("\x1b[1m\x1b[32m{}\x1b[0m\n", device.user_code);
    println!("Then visit this GitHub URL to authorize: {}\n", device.verification_uri);
    println!("Waiting for authentication...");

    let token = auth
        .poll_for_token(cancel, &device)
        .await
        .context("authentication failed")?;
    store.save(&token)?;

    println!("Successfully logged in to GitHub Copilot.");
    Ok(())
}

fn cmd_copilot_logout() -> Result<()> {
    token_store()?.remove()?;
    println!("Logged out of GitHub Copilot.");
    Ok(())
}

fn token_store() -> Result<TokenStore> {
    let dir = config::config_dir().context("could not determine the config directory")?;
    Ok(TokenStore::new(&dir))
}

// ---------------------------------------------------------------------------
// Request pipeline
// ---------------------------------------------------------------------------

/// Resolve the model, build its provider and relay the reply to stdout.
async fn process_request(
    config: &Config,
    model: &str,
    text: String,
    stream: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let descriptor = models::resolve(model)?;
    tracing::debug!(
        alias = %descriptor.alias,
        provider = %descriptor.provider,
        model = %descriptor.model_id,
        "resolved model"
    );

    let copilot_token = if descriptor.provider == ProviderKind::Copilot {
        token_store()?.load()?
    } else {
        None
    };
    let settings = config.provider_settings(copilot_token);

    let provider = llm::create_provider(&descriptor, &settings, cancel).await?;
    let reply = provider
        .complete(cancel, CompletionRequest::new(text, stream))
        .await?;

    let mut stdout = tokio::io::stdout();
    if stream {
        relay::relay(relay::into_words(reply), &mut stdout, Delivery::Incremental, cancel).await?;
    } else {
        relay::relay(reply, &mut stdout, Delivery::Batch, cancel).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}
