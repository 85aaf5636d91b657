use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::context::ContextOptions;

#[derive(Parser)]
#[command(name = "seekchat")]
#[command(about = "SeekChat - branching chat client for DeepSeek-compatible APIs", long_about = None)]
struct Cli {
    /// Host document whose embedded conversations are merged on startup
    #[arg(long, global = true)]
    document: Option<PathBuf>,

    /// Storage root (defaults to the platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Client configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations, newest first
    List,
    /// Print the active path of a conversation
    Show {
        /// Conversation key (defaults to the selected conversation)
        key: Option<i64>,
    },
    /// Create an empty conversation and select it
    New,
    /// Delete a conversation
    Remove { key: i64 },
    /// Select a conversation
    Select { key: i64 },
    /// Send a message and stream the answer
    Send {
        message: String,
        /// Conversation key (defaults to the selected conversation)
        #[arg(long)]
        chat: Option<i64>,
        /// Switch the conversation to the reasoner model
        #[arg(long, overrides_with = "no_reasoning")]
        reasoning: bool,
        /// Switch the conversation to the chat model
        #[arg(long, overrides_with = "reasoning")]
        no_reasoning: bool,
        /// Print the reasoning trace after the answer
        #[arg(long)]
        show_reasoning: bool,
    },
    /// Regenerate an answer as a new alternate
    Regenerate {
        /// Message key to regenerate
        key: i64,
        #[arg(long)]
        chat: Option<i64>,
    },
    /// Make a message, and the branch leading to it, active
    Switch {
        key: i64,
        #[arg(long)]
        chat: Option<i64>,
    },
    /// Export conversations into an HTML document
    Export {
        /// Output file name, without the .html extension
        #[arg(short, long, default_value = "seekchat-export")]
        output: PathBuf,
        /// Give the export its own storage identity
        #[arg(long)]
        isolate: bool,
        /// Conversation keys (defaults to all)
        keys: Vec<i64>,
    },
    /// Import conversations from an exported HTML document
    Import { path: PathBuf },
}

/// `None` keeps the conversation's own setting.
fn reasoning_choice(reasoning: bool, no_reasoning: bool) -> Option<bool> {
    match (reasoning, no_reasoning) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SEEKCHAT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = ContextOptions {
        document: cli.document,
        data_dir: cli.data_dir,
        config: cli.config,
    };
    let collection = commands::context::open(&options).await?;

    match cli.command {
        Commands::List => commands::chat::list(&collection).await?,
        Commands::Show { key } => commands::chat::show(&collection, key).await?,
        Commands::New => commands::chat::new_chat(&collection).await?,
        Commands::Remove { key } => commands::chat::remove(&collection, key).await?,
        Commands::Select { key } => commands::chat::select(&collection, key).await?,
        Commands::Send {
            message,
            chat,
            reasoning,
            no_reasoning,
            show_reasoning,
        } => {
            let reasoning = reasoning_choice(reasoning, no_reasoning);
            commands::chat::send(&collection, chat, &message, reasoning, show_reasoning).await?
        }
        Commands::Regenerate { key, chat } => {
            commands::chat::regenerate(&collection, chat, key).await?
        }
        Commands::Switch { key, chat } => commands::chat::switch(&collection, chat, key).await?,
        Commands::Export {
            output,
            isolate,
            keys,
        } => commands::transfer::export(&collection, keys, &output, isolate).await?,
        Commands::Import { path } => commands::transfer::import(&collection, &path).await?,
    }

    Ok(())
}
