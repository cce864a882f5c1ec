//! Quixote Mock HTTP Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use quixote::xml::ConfigParser;
use quixote::{Configuration, MockServer, RequestLogReader, RequestLogWriter};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "quixote",
    about = "Mock HTTP server - canned responses and request recording",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, required_unless_present_any = ["print_config", "replay"])]
    config: Option<PathBuf>,

    /// Append every received request to this binary log
    #[arg(short = 'o', long, value_name = "FILE")]
    request_log: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Print the records of a request log as JSON lines and exit
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so --print-config and --replay output stays clean
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        print!("{}", quixote::xml::to_string(&Configuration::default())?);
        return Ok(());
    }

    if let Some(path) = &args.replay {
        return replay(path);
    }

    let path = args
        .config
        .as_ref()
        .context("a configuration file is required")?;
    info!(path = %path.display(), "Loading configuration");
    let file = File::open(path)
        .with_context(|| format!("failed to open configuration {}", path.display()))?;
    let parsed = ConfigParser::new().parse_with_status(
        &path.display().to_string(),
        BufReader::new(file),
        |status| {
            if status.is_error() {
                error!("{}", status);
            } else {
                warn!("{}", status);
            }
        },
    );

    if args.validate {
        let config = parsed?;
        println!(
            "Configuration is valid ({} responses defined)",
            config.responses.len()
        );
        return Ok(());
    }
    let config = parsed?;

    let server = MockServer::create_for_configuration(&config).await?;

    if let Some(log_path) = &args.request_log {
        let writer = Arc::new(RequestLogWriter::open(log_path).with_context(|| {
            format!("failed to open request log {}", log_path.display())
        })?);
        info!(path = %log_path.display(), "Recording requests");
        server.set_request_callback(move |record| {
            if let Err(e) = writer.append(record) {
                error!(error = %e, "Failed to append to request log");
            }
        })?;
    }

    info!(uri = %server.uri(), responses = config.responses.len(), "Serving");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.close();

    Ok(())
}

fn replay(path: &Path) -> Result<()> {
    let reader = RequestLogReader::open(path)
        .with_context(|| format!("failed to open request log {}", path.display()))?;
    for record in reader {
        match record {
            Ok(record) => println!("{}", serde_json::to_string(&record)?),
            Err(quixote::error::RequestLogError::Truncated { expected, actual }) => {
                warn!(expected, actual, "Request log ends with a torn record");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
