//! testclusters CLI
//!
//! Runs a single test node described by a TOML manifest, summarizes node
//! logs and sweeps processes left behind by crashed runs.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use testclusters_core::config::{FixtureConfig, LogFormat, NodeManifest};
use testclusters_core::log_tail;
use testclusters_core::logging::init_logging;
use testclusters_core::reaper::{PidFileReaper, reap_orphans};
use testclusters_core::Node;

#[derive(Parser)]
#[command(name = "testclusters", version, about = "Ephemeral Elasticsearch test nodes")]
struct Cli {
    /// Harness configuration (TOML)
    #[arg(long, global = true, env = "TESTCLUSTERS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format, overrides the configuration file
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a node from a manifest, wait until it is ready and keep it
    /// running until Ctrl-C or the hold time elapses
    Run {
        manifest: PathBuf,

        /// Stop the node after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        hold_secs: Option<u64>,
    },

    /// Summarize errors, warnings and the tail of a node log
    Summarize {
        log: PathBuf,

        /// Trailing messages to keep
        #[arg(long)]
        lines: Option<usize>,
    },

    /// Kill processes recorded in a reaper directory
    Reap { dir: PathBuf },
}

#[derive(Serialize)]
struct RunningNode<'a> {
    node: &'a str,
    working_dir: String,
    http: Vec<String>,
    transport: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FixtureConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => FixtureConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_logging(&config.logging).context("initializing logging")?;

    let result = match cli.command {
        Command::Run {
            manifest,
            hold_secs,
        } => run(&config, &manifest, hold_secs.map(Duration::from_secs), cli.json).await,
        Command::Summarize { log, lines } => summarize(&config, &log, lines, cli.json),
        Command::Reap { dir } => reap(dir, cli.json).await,
    };

    if let Err(err) = &result {
        if let Some(remediation) = err
            .downcast_ref::<testclusters_core::Error>()
            .and_then(testclusters_core::Error::remediation)
        {
            eprintln!("{}", remediation.render_plain());
        }
    }
    result
}

async fn run(
    config: &FixtureConfig,
    manifest_path: &Path,
    hold: Option<Duration>,
    json: bool,
) -> anyhow::Result<()> {
    let manifest = NodeManifest::load_from(manifest_path)
        .with_context(|| format!("loading manifest {}", manifest_path.display()))?;
    let spec = manifest.to_spec()?;

    let mut node = Node::new(spec, &manifest.base_dir, config.clone());
    if let Some(dir) = &manifest.reaper_dir {
        node = node.with_reaper(Arc::new(PidFileReaper::new(dir)));
    }
    node.freeze()?;

    if let Err(err) = start_and_wait(&node).await {
        // Keep the original error; teardown problems are only logged.
        if let Err(stop_err) = node.stop(true).await {
            tracing::warn!(node = %node, error = %stop_err, "Teardown after failed start also failed");
        }
        return Err(err).with_context(|| format!("starting {node}"));
    }

    let running = RunningNode {
        node: node.id(),
        working_dir: node.paths().working_dir.display().to_string(),
        http: node.all_http_socket_uri()?,
        transport: node.all_transport_port_uri()?,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&running)?);
    } else {
        println!("{} is ready", running.node);
        println!("  working dir: {}", running.working_dir);
        println!("  http:        {}", running.http.join(", "));
        println!("  transport:   {}", running.transport.join(", "));
    }

    match hold {
        Some(hold) => {
            tokio::select! {
                () = tokio::time::sleep(hold) => {}
                res = tokio::signal::ctrl_c() => res.context("waiting for Ctrl-C")?,
            }
        }
        None => tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?,
    }

    node.stop(true).await?;
    Ok(())
}

async fn start_and_wait(node: &Node) -> testclusters_core::Result<()> {
    node.start().await?;
    node.wait_for_ready().await
}

fn summarize(
    config: &FixtureConfig,
    log: &Path,
    lines: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let summary = log_tail::summarize(
        log,
        lines.unwrap_or(config.tail.lines),
        &config.tail.ignore,
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if summary.is_empty() {
        println!("{} is empty", log.display());
    } else {
        print!("{}", summary.render("Log summary", &log.display().to_string()));
    }
    Ok(())
}

async fn reap(dir: PathBuf, json: bool) -> anyhow::Result<()> {
    let report = reap_orphans(dir).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "scanned {} pid files, killed {} processes {:?}",
            report.scanned, report.killed, report.killed_pids
        );
        for error in &report.errors {
            eprintln!("  {error}");
        }
    }
    Ok(())
}
