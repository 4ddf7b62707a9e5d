use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use chat_sync::Identity;

use crate::config::{ChatConfig, ClientConfig, FileConfig};

#[derive(Parser)]
#[command(name = "chat")]
#[command(about = "Private messaging from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.chat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Sign in as this user id instead of the configured identity
    #[arg(long = "as", global = true)]
    as_user: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive client (default)
    Chat(ChatArgs),

    /// List chat partners
    Partners(PartnersArgs),

    /// Print the persisted conversation with a partner
    History(HistoryArgs),

    /// Print the resolved configuration
    Config,
}

#[derive(Parser)]
struct ChatArgs {
    /// Partner id or display name to open right away
    partner: Option<String>,
}

#[derive(Parser)]
struct PartnersArgs {
    /// List every chat user, not only past partners
    #[arg(long)]
    all: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct HistoryArgs {
    /// Partner user id
    partner: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the conversation.
    let default_directive = if cli.debug {
        "chat_cli=debug,chat_sync=debug,info"
    } else {
        "chat_cli=warn,chat_sync=warn,error"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let chat_config = ChatConfig::new(cli.data_dir.clone())?;
    let file_config = chat_config.load()?;

    match cli.command {
        Some(Commands::Config) => cli::config_command(&chat_config, &file_config),
        None => cli::interactive::run(&client(&file_config, cli.as_user)?, None).await,
        Some(Commands::Chat(args)) => {
            cli::interactive::run(&client(&file_config, cli.as_user)?, args.partner).await
        }
        Some(Commands::Partners(args)) => {
            cli::partners_command(&client(&file_config, cli.as_user)?, args.all, args.json).await
        }
        Some(Commands::History(args)) => {
            cli::history_command(&client(&file_config, cli.as_user)?, &args.partner, args.json)
                .await
        }
    }
}

fn client(file_config: &FileConfig, as_user: Option<String>) -> Result<ClientConfig> {
    let mut client = ClientConfig::from_file(file_config)?;
    if let Some(id) = as_user {
        client.identity = Some(Identity::new(id.clone(), id));
    }
    Ok(client)
}
