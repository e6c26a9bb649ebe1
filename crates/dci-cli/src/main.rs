//! DCI agent command line client.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "dcictl")]
#[command(about = "DCI job scheduling client", version, long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "DCI_API_URL", default_value = "http://localhost:5000")]
    api_url: String,

    /// API token of the calling user
    #[arg(long, env = "DCI_TOKEN", hide_env_values = true)]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Ask the server for a new job
    Schedule {
        /// Remote CI identifier
        #[arg(long)]
        remoteci: String,
        /// Topic identifier
        #[arg(long)]
        topic: String,
    },
    /// Re-run a job with its latest components
    Recheck {
        /// Job ID
        id: String,
    },
    /// List jobs
    List {
        /// Filter as `column:value`
        #[arg(long = "where")]
        filter: Option<String>,
        /// Sort keys, `-` prefix for descending
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Show job details
    Show {
        /// Job ID
        id: String,
        /// Related resources to inline
        #[arg(long)]
        embed: Option<String>,
    },
    /// Update the status or comment of a job
    Update {
        /// Job ID
        id: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Attach a file to a job
    Upload {
        /// Job ID
        id: String,
        /// File to upload
        path: PathBuf,
        /// Name stored on the server, defaults to the file name
        #[arg(long)]
        name: Option<String>,
        /// Content type, guessed from the extension when omitted
        #[arg(long)]
        mime: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_url, &cli.token)?;

    match cli.command {
        Commands::Jobs { command } => match command {
            JobCommands::Schedule { remoteci, topic } => {
                commands::jobs::schedule(&client, &remoteci, &topic).await?;
            }
            JobCommands::Recheck { id } => {
                commands::jobs::recheck(&client, &id).await?;
            }
            JobCommands::List {
                filter,
                sort,
                limit,
                offset,
            } => {
                commands::jobs::list(&client, filter, sort, limit, offset).await?;
            }
            JobCommands::Show { id, embed } => {
                commands::jobs::show(&client, &id, embed).await?;
            }
            JobCommands::Update {
                id,
                status,
                comment,
            } => {
                commands::jobs::update(&client, &id, status, comment).await?;
            }
            JobCommands::Upload {
                id,
                path,
                name,
                mime,
            } => {
                commands::jobs::upload(&client, &id, &path, name, mime).await?;
            }
        },
    }

    Ok(())
}
