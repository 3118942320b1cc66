//! chat-relay - streaming relay for hosted chat and image providers
//!
//! Forwards browser chat turns to an LLM or image provider and records the
//! conversation in a remote SQL store when one is configured.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_relay::config::{Config, KeySource};

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "Streaming relay for hosted chat and image providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "relay.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file and show what is enabled
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "relay.toml")]
        config: String,
    },
}

fn log_key_sources(key_sources: &[(String, KeySource)]) {
    for (section, source) in key_sources {
        match source {
            KeySource::None => tracing::info!(section = %section, "No secret configured"),
            _ => tracing::info!(section = %section, source = %source, "Secret resolved"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = %config, "Loading configuration");
            let (mut config, key_sources) = Config::from_file_with_env(&config)?;
            log_key_sources(&key_sources);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            chat_relay::proxy::run_server(config).await
        }

        Commands::Check { config: path } => {
            let (config, key_sources) = Config::from_file_with_env(&path)?;

            println!("Configuration OK: {}", path);
            println!("  listen:   {}", config.server.listen);
            println!(
                "  chat:     {} ({}) model={} stream={} history_limit={}",
                config.chat.provider_name(),
                config.chat.base_url(),
                config.chat.model(),
                config.chat.stream,
                config.chat.history_limit,
            );
            println!(
                "  image:    {} ({}) model={} {}x{}",
                config.image.name,
                config.image.url,
                config.image.model,
                config.image.width,
                config.image.height,
            );
            println!("  triggers: {}", config.routing.image_triggers.join(", "));
            for (section, source) in &key_sources {
                println!("  secret {:<6} {}", section, source);
            }
            Ok(())
        }
    }
}
