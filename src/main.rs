//! RIR CLI - Look up delegated address space by country or by address.

use anyhow::{Context, Result};
use clap::Parser;
use rir_stats::{
    Config, FileProvider, ParseStats, Query, QueryEngine, QueryResult, RecordSet, ResourceType,
    load_all, provider::providers_from_config,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// RIR - Query the delegation statistics of the regional internet registries
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Two-letter country code (ISO 3166) whose IPv4 blocks to list
    #[arg(short, long, conflicts_with = "query", required_unless_present = "query")]
    country: Option<String>,

    /// IP address to resolve to a country
    #[arg(short, long)]
    query: Option<String>,

    /// Print the number of usable hosts instead of the blocks (with --country)
    #[arg(short = 'n', long, requires = "country")]
    hosts: bool,

    /// Parse local delegation files instead of fetching from the registries
    #[arg(short, long)]
    file: Vec<PathBuf>,

    /// Number of sections each file is parsed in (overrides config)
    #[arg(long)]
    sections: Option<usize>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(sections) = args.sections {
        config.sections = sections;
    }
    config.validate().context("Invalid configuration")?;

    let query = Query::from_inputs(args.country.as_deref(), args.query.as_deref(), args.hosts)?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!("Cannot listen for Ctrl+C: {}", e),
        }
    });

    let stats = Arc::new(ParseStats::new());
    let loaded = if args.file.is_empty() {
        let providers = providers_from_config(&config)?;
        load_all(providers, config.read_options(), Arc::clone(&stats), shutdown_rx).await?
    } else {
        let providers = args.file.iter().map(FileProvider::new).collect();
        load_all(providers, config.read_options(), Arc::clone(&stats), shutdown_rx).await?
    };
    debug!("{}", stats.summary());
    for (name, records) in &loaded {
        debug!(
            "{} ({}): {} ASN, {} IPv4, {} IPv6 records declared; {} IP and {} ASN records read",
            name,
            records.registry(),
            records.declared_count(ResourceType::Asn),
            records.declared_count(ResourceType::Ipv4),
            records.declared_count(ResourceType::Ipv6),
            records.ips.len(),
            records.asns.len()
        );
    }

    let sets: Vec<RecordSet> = loaded.into_iter().map(|(_, records)| records).collect();
    let result = QueryEngine::new(&sets).run(&query);
    println!("{}", render(&result, args.json)?);

    Ok(())
}

/// Format a query result for stdout.
fn render(result: &QueryResult, json: bool) -> Result<String> {
    if json {
        serde_json::to_string_pretty(result).context("Failed to serialize result")
    } else {
        Ok(result.lines().join("\n"))
    }
}
