//! `niimprint`: scan for, inspect and print to Niimbot label printers.

mod commands;
mod config;
mod render;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use niimbot::{BleTransport, PrinterSession, SimulatedPrinter, Transport};
use tracing_subscriber::EnvFilter;

use crate::commands::PrintArgs;
use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "niimprint", version, about = "Niimbot label printer tool")]
struct Cli {
    /// Printer model, matched against the advertised name (d110, b1, ...)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Use a simulated printer instead of Bluetooth
    #[arg(long, global = true)]
    dry_run: bool,

    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List nearby Bluetooth devices
    Scan,
    /// Show printer status, loaded label and device info
    Info {
        /// Skip the cloud label catalogue lookup
        #[arg(long)]
        no_cloud: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a PNG or JPEG image
    Print {
        image: PathBuf,
        /// Print density (1-5)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=5))]
        density: Option<u8>,
        /// Number of copies
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        quantity: Option<u16>,
        /// Fit the image to a named label size, e.g. "50mm x 14mm"
        #[arg(short, long)]
        label: Option<String>,
        /// Print the image as-is instead of turning it a quarter clockwise
        #[arg(long)]
        no_rotate: bool,
        /// Luma threshold below which a pixel prints
        #[arg(long, default_value_t = render::DEFAULT_THRESHOLD)]
        threshold: u8,
    },
}

impl Cli {
    /// Command-line flags win over environment configuration.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.model = model.to_ascii_lowercase();
        }
        if self.dry_run {
            config.dry_run_mode = true;
        }
        match &self.command {
            Command::Info { no_cloud: true, .. } => config.cloud_lookup = false,
            Command::Print {
                density, quantity, ..
            } => {
                if let Some(d) = density {
                    config.density = Some(*d);
                }
                if let Some(q) = quantity {
                    config.quantity = *q;
                }
            }
            _ => {}
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    config::load_dotenv();
    let mut config = AppConfig::load()?;
    cli.apply(&mut config);
    tracing::debug!(?config, "Configuration loaded");

    if config.dry_run_mode {
        tracing::info!(model = %config.model, "Dry-run mode: using simulated printer");
        let session = PrinterSession::new(SimulatedPrinter::dry_run(&config.model), config.session_config());
        run(&session, &cli.command, &config).await
    } else {
        let transport = BleTransport::new()
            .await
            .context("Bluetooth is not available")?;
        let session = PrinterSession::new(transport, config.session_config());
        run(&session, &cli.command, &config).await
    }
}

async fn run<T: Transport>(
    session: &PrinterSession<T>,
    command: &Command,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let result = match command {
        Command::Scan => commands::scan(session).await,
        Command::Info { json, .. } => commands::info(session, config, *json).await,
        Command::Print {
            image,
            label,
            no_rotate,
            threshold,
            ..
        } => {
            let args = PrintArgs {
                image,
                label: label.as_deref(),
                rotate: !no_rotate,
                threshold: *threshold,
            };
            commands::print(session, config, args).await
        }
    };
    session.disconnect().await;
    result
}
