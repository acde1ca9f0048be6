//! mnemosyne - inspect and maintain memory collections from the shell.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mnemosyne_core::MnemosyneConfig;

#[derive(Parser)]
#[command(
    name = "mnemosyne",
    version,
    about = "Manage the vector database behind long-term conversational memory"
)]
struct Cli {
    /// Configuration file (.toml, .json or .yaml). Defaults to MNEMOSYNE_* variables.
    #[arg(short, long, global = true, env = "MNEMOSYNE_CONFIG")]
    config: Option<PathBuf>,

    /// Collection to operate on, overriding the configured one.
    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Which memories to touch, by persona and session.
#[derive(clap::Args, Debug, Default)]
pub struct ScopeArgs {
    /// Only memories of this persona.
    #[arg(long)]
    pub persona: Option<String>,

    /// Only memories of this session (requires --persona).
    #[arg(long, requires = "persona")]
    pub session: Option<String>,

    /// Raw filter expression, combined with the scope.
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// List collections.
    Collections {
        /// Only collections loaded into memory.
        #[arg(long)]
        loaded: bool,
    },

    /// Create the memory collection if it does not exist.
    Create {
        /// Embedding dimension; defaults to the configured one.
        #[arg(long)]
        dim: Option<usize>,
    },

    /// Check the collection against the memory schema.
    Check {
        #[arg(long)]
        dim: Option<usize>,
    },

    /// Show the most recent memories.
    Latest {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Print rows matching a scope or filter.
    Query {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Fields to print, comma separated.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// Similarity search with a raw embedding.
    Search {
        /// Query vector, comma separated.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        vector: Vec<f32>,

        /// Number of results; defaults to the configured top_k.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Delete rows matching a scope or filter.
    Delete {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Drop the collection with all its data.
    Drop {
        /// Confirm the drop.
        #[arg(long)]
        yes: bool,
    },
}

fn load_config(cli: &Cli) -> Result<MnemosyneConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = MnemosyneConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            config.apply_env()?;
            config.validate()?;
            config
        }
        None => MnemosyneConfig::from_env().context("invalid MNEMOSYNE_* environment")?,
    };
    if let Some(collection) = &cli.collection {
        config.collection_name = collection.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("mnemosyne=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    commands::run(cli.command, config).await
}
