//! rackd: the rack control plane binary.
//!
//! Assembles the background workers against one cloud tenant:
//! - custom-resource worker
//! - cluster monitor
//! - autoscaler and spot replacer
//! - stack and task event ingesters
//!
//! # Usage
//!
//! ```text
//! rackd daemon --provider local
//! rackd service monitor
//! rackd fixture convox.yml --app myapp
//! rackd env encrypt --key arn:aws:kms:us-east-1:123456789012:key/abc < .env
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use rack_core::RackConfig;

mod commands;
mod daemon;

use daemon::{Provider, Worker};

#[derive(Parser)]
#[command(name = "rackd", about = "Rack control plane daemon", version)]
struct Cli {
    /// TOML config file; environment variables override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cloud backend.
    #[arg(long, global = true, value_enum, default_value = "local")]
    provider: Provider,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run every background worker until interrupted.
    Daemon,
    /// Run a single worker in the foreground.
    Service {
        #[arg(value_enum)]
        worker: Worker,
    },
    /// Print the template synthesised for a manifest.
    Fixture {
        /// Path to the manifest.
        manifest: PathBuf,
        #[arg(long, default_value = "app")]
        app: String,
        /// Render as a bound app sharing rack-wide balancer names.
        #[arg(long)]
        bound: bool,
        /// Build id the images are tagged with.
        #[arg(long)]
        build: Option<String>,
        /// Release id written into the template.
        #[arg(long, default_value = commands::FIXTURE_RELEASE)]
        release: String,
    },
    /// Seal or open an env file from stdin to stdout.
    Env {
        #[arg(value_enum)]
        action: commands::EnvAction,
        /// Master key ARN.
        #[arg(long)]
        key: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rack=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RackConfig> {
    let config = match path {
        Some(path) => RackConfig::from_file(path)?.merge_env()?,
        None => RackConfig::from_env()?,
    };
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Daemon => daemon::run(config, cli.provider, &Worker::ALL).await,
        Command::Service { worker } => daemon::run(config, cli.provider, &[worker]).await,
        Command::Fixture {
            manifest,
            app,
            bound,
            build,
            release,
        } => {
            let data = std::fs::read_to_string(&manifest)?;
            let template =
                commands::fixture(&config, &data, &app, bound, build.as_deref(), &release)?;
            println!("{template}");
            Ok(())
        }
        Command::Env { action, key } => {
            let cloud = daemon::cloud(&config, cli.provider)?;
            commands::env(&cloud, action, &key).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}
