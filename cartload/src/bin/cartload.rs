use std::{env, io::Read};

use cartload::{
    config::Config,
    exporter::{Exporter, GraphiteTransport},
};
use cartload_throttle::Throttle;
use clap::Parser;
use time::OffsetDateTime;
use tokio::{runtime::Builder, task::JoinSet};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to parse cartload config: {0}")]
    Config(#[from] cartload::config::Error),
    #[error("Scenario generation failed: {0}")]
    Series(#[from] cartload_series::Error),
    #[error("Export failed: {0}")]
    Exporter(#[from] cartload::exporter::Error),
    #[error("Export task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn default_config_path() -> String {
    "/etc/cartload/cartload.yaml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// validate the configuration file and exit
    #[clap(long)]
    config_check: bool,
}

fn load_config_contents(config_path: &str) -> Result<String, Error> {
    if let Ok(env_var_value) = env::var("CARTLOAD_CONFIG") {
        debug!("Using config from env var 'CARTLOAD_CONFIG'");
        Ok(env_var_value)
    } else {
        debug!("Attempting to open configuration file at: {}", config_path);
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .open(config_path)
            .map_err(|err| {
                error!("Could not read config file '{}': {}", config_path, err);
                err
            })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(contents)
    }
}

async fn inner_main(config: Config) -> Result<(), Error> {
    let now = OffsetDateTime::now_utc();
    let family = cartload_series::scenario::build(&config.scenario, now)?;
    info!(
        host = config.exporter.host,
        series = family.len(),
        "injecting scenario into Graphite"
    );

    // Each series gets its own connection and its own throttle; there is no
    // ordering dependency between series, only within one.
    let mut handles: JoinSet<Result<(), Error>> = JoinSet::new();
    for series in family {
        let exporter_config = config.exporter.clone();
        handles.spawn(async move {
            let transport = GraphiteTransport::connect(&exporter_config, series.name()).await?;
            let throttle = Throttle::new_with_config(exporter_config.throttle_config());
            let mut exporter = Exporter::new(
                transport,
                throttle,
                exporter_config.batch_size,
                exporter_config.metric_prefix.clone(),
            );
            let summary = exporter.export(&series).await?;
            info!(
                series = series.name(),
                points = summary.points,
                "series injected"
            );
            Ok(())
        });
    }

    let mut first_failure: Option<Error> = None;
    while let Some(res) = handles.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!("series export failed: {err}");
                first_failure.get_or_insert(err);
            }
            Err(err) => {
                error!("export task panicked: {err}");
                first_failure.get_or_insert(Error::Join(err));
            }
        }
    }

    match first_failure {
        Some(err) => Err(err),
        None => {
            info!("all series injected");
            Ok(())
        }
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .finish()
        .init();

    let cli = Cli::parse();
    let contents = load_config_contents(&cli.config_path)?;
    let config = Config::from_yaml(&contents)?;
    if cli.config_check {
        info!("Configuration file is valid");
        return Ok(());
    }

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(inner_main(config))
}
