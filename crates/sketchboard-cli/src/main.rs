//! Sketchboard command line client.

mod join;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sketchboard_core::relay::RelayConfig;
use sketchboard_core::{ImportReport, Session};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "sketchboard", about = "Join and inspect Sketchboard canvases", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Join a canvas, dispatching JSON events read from stdin
    Join(JoinArgs),

    /// Print the canonical export of an event log
    Normalize {
        /// NDJSON event log
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Websocket,
    Stream,
}

#[derive(Debug, clap::Args)]
pub struct JoinArgs {
    /// `ws://` URL, or `host:port` for the stream transport
    #[arg(long)]
    pub url: String,

    /// Canvas to register for
    #[arg(long)]
    pub canvas: String,

    /// Peer id used for new shape ids (random if omitted)
    #[arg(long)]
    pub peer: Option<String>,

    #[arg(long, value_enum, default_value_t = TransportArg::Websocket)]
    pub transport: TransportArg,

    /// Log file imported on start and written on exit
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Directory for periodic log snapshots, one file per canvas
    #[arg(long)]
    pub autosave_dir: Option<PathBuf>,

    /// JSON file with relay settings
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Join(args) => {
            let config = load_config(args.config.as_deref())?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("starting runtime")?;
            runtime.block_on(join::run(args, config))
        }
        Command::Normalize { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let (export, report) = normalize(&text)?;
            if report.skipped > 0 {
                log::warn!("Skipped {} malformed lines", report.skipped);
            }
            print!("{export}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    let Some(path) = path else {
        return Ok(RelayConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Replay `text` into a fresh session and export the result.
fn normalize(text: &str) -> anyhow::Result<(String, ImportReport)> {
    let mut session = Session::new("normalize");
    let report = session.import_log(text)?;
    Ok((session.export_log()?, report))
}
