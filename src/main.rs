//! azchat CLI - Azure OpenAI chat, concurrent batching and Batch API jobs.

use anyhow::{Context, Result, bail};
use azchat::batch::{BatchJobRunner, build_requests, correlate, write_jsonl};
use azchat::client::{AzureOpenAIClientFactory, ClientFactory, ResponseRequest};
use azchat::identity::AzureIdentity;
use azchat::models::{AuthMode, Config, Message};
use azchat::{ChatOptions, ChatSession, ChatUtil};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "azchat")]
#[command(author = "Infernet <dev@infernet.org>")]
#[command(version)]
#[command(about = "Azure OpenAI chat sessions, concurrent batching and Batch API jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single message
    Chat {
        /// Message text
        message: String,

        /// System prompt (overrides config)
        #[arg(short, long)]
        system: Option<String>,

        /// Sampling temperature (overrides config)
        #[arg(short, long)]
        temperature: Option<f64>,

        /// Maximum tokens in the reply
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Deployment name (overrides config)
        #[arg(short, long)]
        deployment: Option<String>,
    },

    /// Interactive multi-turn session (/reset, /history, /exit)
    Session {
        /// System prompt (overrides config)
        #[arg(short, long)]
        system: Option<String>,

        /// Deployment name (overrides config)
        #[arg(short, long)]
        deployment: Option<String>,
    },

    /// Answer many prompts concurrently, printing replies in input order
    Batch {
        /// Prompts
        prompts: Vec<String>,

        /// File with one prompt per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Concurrent workers (overrides config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// System prompt (overrides config)
        #[arg(short, long)]
        system: Option<String>,

        /// Deployment name (overrides config)
        #[arg(short, long)]
        deployment: Option<String>,
    },

    /// Run prompts through an offline Batch API job
    Job {
        /// Prompts
        prompts: Vec<String>,

        /// File with one prompt per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// System prompt (overrides config)
        #[arg(short, long)]
        system: Option<String>,

        /// Keep a copy of the submitted JSONL
        #[arg(long)]
        save_input: Option<PathBuf>,

        /// Seconds between status polls (overrides config)
        #[arg(long)]
        poll_secs: Option<u64>,
    },

    /// Call the Responses API
    Respond {
        /// Input text
        message: String,

        /// Require a JSON object and pretty-print it
        #[arg(long)]
        json: bool,

        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Deployment name (overrides config)
        #[arg(short, long)]
        deployment: Option<String>,
    },

    /// Validate configuration and credentials
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {path:?}")),
        None => Ok(Config::from_env()),
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message.to_string());
    pb
}

/// Positional prompts followed by non-empty lines of `file`.
fn read_prompts(mut prompts: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompts from {path:?}"))?;
        prompts.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
    }
    if prompts.is_empty() {
        bail!("No prompts given (pass them as arguments or with --file)");
    }
    Ok(prompts)
}

fn chat_options(config: &Config, system: Option<String>) -> ChatOptions {
    let mut options = ChatOptions::from(&config.chat);
    if system.is_some() {
        options.system_prompt = system;
    }
    options
}

fn resolve_deployment(config: &Config, flag: Option<String>) -> Result<String> {
    match flag {
        Some(name) => Ok(name),
        None => Ok(config.deployment()?),
    }
}

async fn run_session(
    factory: Arc<dyn ClientFactory>,
    deployment: String,
    options: ChatOptions,
) -> Result<()> {
    let mut session = ChatSession::new(factory, deployment, options)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Session started. Commands: /reset, /history, /exit");
    loop {
        print!("> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                session.reset();
                println!("(history cleared)");
            }
            "/history" => {
                for message in session.history() {
                    println!("[{}] {}", message.role, message.content);
                }
            }
            text => match session.send(text).await {
                Ok(reply) => println!("{reply}\n"),
                Err(e) => eprintln!("error: {e}"),
            },
        }
    }

    info!(turns = session.turns(), "Session ended");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            println!("{}", Config::example_toml());
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            config.validate().context("Invalid configuration")?;
            let auth = config.resolve_auth().context("Failed to resolve credentials")?;

            info!("Configuration is valid");
            info!("  Endpoint:    {}", config.endpoint()?);
            info!("  API version: {}", config.azure.api_version);
            info!(
                "  Deployment:  {}",
                config.azure.deployment.as_deref().unwrap_or("(unset)")
            );
            info!(
                "  Batch:       {}",
                config.azure.batch_deployment.as_deref().unwrap_or("(unset)")
            );
            info!("  Auth:        {}", auth.label());

            if let AuthMode::ServicePrincipal(principal) = auth {
                let identity = AzureIdentity::from_service_principal(principal)?;
                let token = identity
                    .get_token()
                    .await
                    .context("Failed to acquire Entra ID token")?;
                info!("  Token:       acquired ({} chars)", token.len());
            }
        }

        Commands::Chat {
            message,
            system,
            temperature,
            max_tokens,
            deployment: deployment_flag,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let factory = Arc::new(AzureOpenAIClientFactory::from_config(&config)?);
            let deployment = resolve_deployment(&config, deployment_flag)?;

            let mut options = chat_options(&config, system);
            if let Some(t) = temperature {
                options.temperature = t;
            }
            options.max_tokens = max_tokens;

            let reply = ChatUtil::new(factory)
                .quick_chat(&deployment, &message, &options)
                .await?;
            println!("{reply}");
        }

        Commands::Session {
            system,
            deployment: deployment_flag,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let factory = Arc::new(AzureOpenAIClientFactory::from_config(&config)?);
            let deployment = resolve_deployment(&config, deployment_flag)?;
            run_session(factory, deployment, chat_options(&config, system)).await?;
        }

        Commands::Batch {
            prompts,
            file,
            workers,
            system,
            deployment: deployment_flag,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let prompts = read_prompts(prompts, file.as_deref())?;
            let factory = Arc::new(AzureOpenAIClientFactory::from_config(&config)?);
            let deployment = resolve_deployment(&config, deployment_flag)?;
            let workers = workers.unwrap_or(config.chat.max_workers);

            let pb = spinner(&format!("{} prompts, {workers} workers", prompts.len()));
            let result = ChatUtil::new(factory)
                .batch_chat(&deployment, &prompts, &chat_options(&config, system), workers)
                .await;
            pb.finish_and_clear();

            for (prompt, reply) in prompts.iter().zip(result?) {
                println!("Q: {prompt}\nA: {reply}\n");
            }
        }

        Commands::Job {
            prompts,
            file,
            system,
            save_input,
            poll_secs,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let prompts = read_prompts(prompts, file.as_deref())?;
            let deployment = config.batch_deployment()?;
            let factory = AzureOpenAIClientFactory::from_config(&config)?;

            let mut runner =
                BatchJobRunner::new(Arc::new(factory.create_azure_client()), config.batch.clone());
            if let Some(secs) = poll_secs {
                runner = runner.with_poll_interval(Duration::from_secs(secs.max(1)));
            }

            let system = system.or_else(|| config.chat.system_prompt.clone());
            let entries = build_requests(&deployment, &prompts, system.as_deref());
            if let Some(path) = &save_input {
                write_jsonl(path, &entries)?;
                info!(path = %path.display(), "Saved batch input");
            }

            let job = runner.submit(&entries).await?;
            println!("Batch {} submitted ({})", job.id, job.status);

            let pb = spinner(&format!("batch {}: {}", job.id, job.status));
            let job = runner
                .wait(job, |job| {
                    pb.println(format!("status: {}", job.status));
                    pb.set_message(format!("batch {}: {}", job.id, job.status));
                })
                .await;
            pb.finish_and_clear();
            let job = job?;

            if let Some(counts) = job.request_counts {
                println!(
                    "Batch {} {}: {}/{} completed, {} failed",
                    job.id, job.status, counts.completed, counts.total, counts.failed
                );
            }

            match runner.collect(&job).await? {
                Some(replies) => {
                    for outcome in correlate(&prompts, &replies) {
                        println!(
                            "[{}] {}\n{}\n",
                            outcome.custom_id, outcome.prompt, outcome.reply
                        );
                    }
                }
                None => {
                    warn!(batch_id = %job.id, status = %job.status, "No output file");
                    let error_file = job.error_file_id.as_deref().filter(|id| !id.is_empty());
                    if let Some(error_file) = error_file {
                        println!("Error file: {error_file}");
                    }
                }
            }
        }

        Commands::Respond {
            message,
            json,
            system,
            deployment: deployment_flag,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let factory = AzureOpenAIClientFactory::from_config(&config)?;
            let deployment = resolve_deployment(&config, deployment_flag)?;

            let mut input = Vec::with_capacity(2);
            if let Some(system) = system.filter(|s| !s.is_empty()) {
                input.push(Message::system(system));
            }
            input.push(Message::user(message));

            let mut request = ResponseRequest::new(deployment, input);
            if json {
                request = request.json_object();
            }

            let response = factory.create_azure_client().create_response(&request).await?;
            let text = response.text();

            if json {
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                    Err(e) => {
                        warn!(error = %e, "Response is not valid JSON");
                        println!("{text}");
                    }
                }
            } else {
                println!("{text}");
            }
        }
    }

    Ok(())
}
