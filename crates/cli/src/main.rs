//! AgentBus CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write the default config file
//! - `broker`: Run the broker behind the HTTP/WebSocket gateway
//! - `demo`: In-process broker, echo agents and a tool host
//! - `config`: Show, locate or validate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agentbus",
    about = "AgentBus — multi-agent broker and worker runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Start the broker and its HTTP/WebSocket gateway
    Broker {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run echo agents against an in-process broker
    Demo {
        /// Number of agents to spawn when none are configured
        #[arg(short, long, default_value_t = 2)]
        agents: usize,

        /// Message sent to every agent
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Broker { port } => commands::broker::run(port).await?,
        Commands::Demo { agents, message } => commands::demo::run(agents, message).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}
