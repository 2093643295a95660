mod console;
mod engine;

use clap::{Parser, Subcommand};
use console::ConsoleChannel;
use engine::Engine;
use rapport_core::config::{self, Config};
use rapport_core::context::Context;
use rapport_core::traits::{Channel, Provider};
use rapport_memory::Store;
use rapport_providers::{OllamaProvider, OpenAiProvider};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "rapport",
    version,
    about = "Rapport — adaptive one-on-one engagement engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine on the configured channel.
    Start,
    /// Check configuration, store, and provider availability.
    Status,
    /// Send a one-shot prompt to the completion provider.
    Ask {
        /// The prompt to send.
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Start => {
            let cfg = config::load(&cli.config)?;

            let provider = build_provider(&cfg)?;
            if !provider.is_available().await {
                anyhow::bail!("provider '{}' is not available", provider.name());
            }

            let channel: Arc<dyn Channel> = Arc::new(ConsoleChannel::new());
            let store = Store::new(&cfg.memory).await?;

            println!("Rapport — starting engine (type a message, Ctrl-D to quit)");
            let engine = Arc::new(Engine::new(cfg, store, provider, channel));
            engine.run().await?;
        }
        Commands::Status => {
            let cfg = config::load(&cli.config)?;
            println!("Rapport — status\n");
            println!("Config: {}", cli.config);
            println!("Default provider: {}", cfg.provider.default);

            match build_provider(&cfg) {
                Ok(provider) => {
                    let available = provider.is_available().await;
                    println!(
                        "  {}: {}",
                        provider.name(),
                        if available { "available" } else { "not reachable" }
                    );
                }
                Err(e) => println!("  provider: misconfigured ({e})"),
            }

            match Store::new(&cfg.memory).await {
                Ok(_) => println!("  store: ok ({})", cfg.memory.db_path),
                Err(e) => println!("  store: failed ({e})"),
            }
        }
        Commands::Ask { prompt } => {
            let cfg = config::load(&cli.config)?;
            let prompt = prompt.join(" ");
            if prompt.trim().is_empty() {
                anyhow::bail!("empty prompt");
            }

            let provider = build_provider(&cfg)?;
            let reply = provider.complete(&Context::new(&prompt)).await?;
            println!("{reply}");
        }
    }

    Ok(())
}

/// Build the configured completion provider.
fn build_provider(cfg: &Config) -> anyhow::Result<Arc<dyn Provider>> {
    match cfg.provider.default.as_str() {
        "openai" => {
            let (mut api_key, model, base_url) = match &cfg.provider.openai {
                Some(c) => (c.api_key.clone(), c.model.clone(), c.base_url.clone()),
                None => (
                    String::new(),
                    "gpt-4o-mini".to_string(),
                    "https://api.openai.com/v1".to_string(),
                ),
            };
            if api_key.is_empty() {
                api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
            }
            if api_key.is_empty() {
                anyhow::bail!(
                    "OpenAI API key missing. Set provider.openai.api_key in config.toml \
                     or the OPENAI_API_KEY env var."
                );
            }
            Ok(Arc::new(OpenAiProvider::from_config(base_url, api_key, model)))
        }
        "ollama" => {
            let (base_url, model) = match &cfg.provider.ollama {
                Some(c) => (c.base_url.clone(), c.model.clone()),
                None => ("http://localhost:11434".to_string(), "llama3".to_string()),
            };
            Ok(Arc::new(OllamaProvider::from_config(base_url, model)))
        }
        other => anyhow::bail!("unknown provider '{other}' (expected 'openai' or 'ollama')"),
    }
}
