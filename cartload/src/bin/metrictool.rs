//! Maintenance tool for the hosted metrics account the injector pushes to.

#![allow(clippy::print_stdout)]

use std::env;

use cartload::metrics_api::{Client, Config};
use clap::{Parser, Subcommand};
use tokio::runtime::Builder;
use tracing::warn;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Metrics API error: {0}")]
    Api(#[from] cartload::metrics_api::Error),
    #[error("Missing credentials: pass --email/--token or set {0}")]
    MissingCredentials(&'static str),
}

const EMAIL_VAR: &str = "METRICTOOL_EMAIL";
const TOKEN_VAR: &str = "METRICTOOL_TOKEN";

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// base URL of the metrics API
    #[clap(long)]
    base_url: Option<String>,
    /// account email, falls back to METRICTOOL_EMAIL
    #[clap(long)]
    email: Option<String>,
    /// API token, falls back to METRICTOOL_TOKEN
    #[clap(long)]
    token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every metric name on the account
    List,
    /// Delete the named metrics, one request per metric
    Delete {
        /// metric names to delete
        names: Vec<String>,
    },
    /// Delete every metric whose name starts with a prefix
    Purge {
        /// the prefix to match
        #[clap(long)]
        prefix: String,
    },
}

fn credential(flag: Option<String>, var: &'static str) -> Result<String, Error> {
    match flag {
        Some(value) => Ok(value),
        None => env::var(var).map_err(|_| Error::MissingCredentials(var)),
    }
}

async fn inner_main(client: Client, command: Commands) -> Result<(), Error> {
    match command {
        Commands::List => {
            for name in client.list_metric_names().await? {
                println!("{name}");
            }
        }
        Commands::Delete { names } => {
            delete_all(&client, names).await?;
        }
        Commands::Purge { prefix } => {
            let names: Vec<String> = client
                .list_metric_names()
                .await?
                .into_iter()
                .filter(|name| name.starts_with(&prefix))
                .collect();
            println!("purging {} metrics under '{prefix}'", names.len());
            delete_all(&client, names).await?;
        }
    }
    Ok(())
}

async fn delete_all(client: &Client, names: Vec<String>) -> Result<(), Error> {
    for name in names {
        let status = client.delete_metric(&name).await?;
        if status.is_success() {
            println!("deleted '{name}': {status}");
        } else {
            warn!(metric = name, %status, "delete refused");
            println!("failed to delete '{name}': {status}");
        }
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .finish()
        .init();

    let cli = Cli::parse();
    let config = Config {
        base_url: cli
            .base_url
            .unwrap_or_else(|| "https://metrics-api.librato.com".to_string()),
        email: credential(cli.email, EMAIL_VAR)?,
        token: credential(cli.token, TOKEN_VAR)?,
    };
    let client = Client::new(config)?;

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(inner_main(client, cli.command))
}
