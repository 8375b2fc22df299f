//! Colloquy CLI — the main entry point.
//!
//! Commands:
//! - `chat`   — Interactive tool-augmented chat (the default)
//! - `config` — Configuration management

use clap::{ArgAction, Parser, Subcommand};

mod commands;
mod render;

use commands::chat::ChatArgs;

#[derive(Parser)]
#[command(
    name = "colloquy",
    about = "Colloquy — interactive tool-augmented chat driver",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the model (default)
    Chat(ChatArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Some(Commands::Chat(args)) => commands::chat::run(args).await?,
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Show => commands::config_cmd::show()?,
        },
        None => commands::chat::run(ChatArgs::default()).await?,
    }

    Ok(())
}
