//! asnmap - Bulk IP to ASN mapping with BGP neighbor discovery.
//!
//! This is the command-line interface for the asnmap library.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use asnmap::{
    AnalysisReport, Analyzer, AnalyzerConfig, AnalyzerConfigBuilder, AnalyzerError, ResultCache,
    SourceId,
};
use clap::Parser;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Number of ASNs shown in the text summary
const TOP_ASNS: usize = 10;

/// Exit code after an interrupted run
const EXIT_INTERRUPTED: i32 = 130;

/// Get the version string for asnmap
fn get_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(env!("CARGO_PKG_VERSION"), "-UNRELEASED")
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Command-line arguments for the ASN mapper.
#[derive(Parser, Debug)]
#[clap(author, version, about = "Bulk IP to ASN mapping with BGP neighbor discovery", long_about = None)]
struct Args {
    /// IP addresses to resolve
    ips: Vec<String>,

    /// Read IP addresses from a file, one per line ('#' starts a comment)
    #[clap(short = 'f', long)]
    input: Option<PathBuf>,

    /// Comma-separated IP to ASN sources in priority order
    /// (team_cymru, ipapi, ipinfo, ripe_ncc)
    #[clap(short, long)]
    sources: Option<String>,

    /// Neighbor graph expansion depth
    #[clap(short = 'd', long)]
    max_depth: Option<u32>,

    /// Concurrent lookups per stage
    #[clap(short, long)]
    workers: Option<usize>,

    /// Retries per lookup for transient failures
    #[clap(long)]
    max_retries: Option<u32>,

    /// TOML configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Cache snapshot to resume from and save to
    #[clap(long)]
    cache: Option<PathBuf>,

    /// Skip neighbor graph discovery
    #[clap(long)]
    no_graph: bool,

    /// Fetch holder details for every graph node, not only resolved ASNs
    #[clap(long)]
    enrich_nodes: bool,

    /// Token for ipinfo.io
    #[clap(long, env = "IPINFO_TOKEN", hide_env_values = true)]
    ipinfo_token: Option<String>,

    /// Output the full report in JSON format
    #[clap(long)]
    json: bool,

    /// Enable verbose logging (use -vv for per-lookup detail)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    match runtime.block_on(async_main(args)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "warn,asnmap=info",
        _ => "info,asnmap=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

async fn async_main(args: Args) -> Result<i32> {
    let config = build_config(&args)?;

    let ips = collect_ips(&args)?;
    if ips.is_empty() {
        anyhow::bail!("no valid IP addresses given");
    }

    let cache = match &args.cache {
        Some(path) if path.exists() => {
            let cache = ResultCache::load_json(path)
                .with_context(|| format!("failed to load cache from {}", path.display()))?;
            if cache.is_empty() {
                warn!(path = %path.display(), "cache file holds no entries");
            } else {
                let stats = cache.stats();
                info!(
                    ips = stats.ips,
                    holders = stats.holders,
                    neighbors = stats.neighbors,
                    "resuming from cache"
                );
            }
            cache
        }
        _ => ResultCache::new(),
    };

    let analyzer = match Analyzer::with_cache(config, cache) {
        Ok(analyzer) => analyzer,
        Err(AnalyzerError::Config(msg)) => {
            eprintln!("Error: Invalid configuration - {}", msg);
            eprintln!("Run 'asnmap --help' for usage information.");
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    let cancel = analyzer.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing in-flight lookups...");
            cancel.cancel();
        }
    });

    if !args.json {
        println!(
            "asnmap {}: {} unique IPs via {}",
            get_version(),
            ips.len(),
            analyzer
                .config()
                .source_priority
                .iter()
                .map(SourceId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let outcome = analyzer.run(&ips).await;

    // Saved even after an error or interrupt so the next run can resume
    if let Some(path) = &args.cache {
        save_cache(&analyzer, path)?;
    }

    let report = match outcome {
        Ok(report) => report,
        Err(AnalyzerError::Config(msg)) => {
            eprintln!("Error: Invalid configuration - {}", msg);
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display_text_results(&report);
    }

    if analyzer.cancellation_token().is_cancelled() {
        return Ok(EXIT_INTERRUPTED);
    }
    Ok(0)
}

/// Layer command-line flags over the configuration file
fn build_config(args: &Args) -> Result<AnalyzerConfig> {
    let base = match &args.config {
        Some(path) => AnalyzerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AnalyzerConfig::default(),
    };

    let mut builder = AnalyzerConfigBuilder::from_config(base);
    if let Some(sources) = &args.sources {
        builder = builder.source_priority(parse_sources(sources)?);
    }
    if let Some(depth) = args.max_depth {
        builder = builder.max_depth(depth);
    }
    if let Some(workers) = args.workers {
        builder = builder.workers(workers);
    }
    if let Some(retries) = args.max_retries {
        builder = builder.max_retries(retries);
    }
    if args.no_graph {
        builder = builder.build_graph(false);
    }
    if args.enrich_nodes {
        builder = builder.enrich_graph_nodes(true);
    }
    if let Some(token) = &args.ipinfo_token {
        builder = builder.ipinfo_token(token.clone());
    }

    builder
        .build()
        .map_err(|msg| anyhow::anyhow!("Invalid configuration - {}", msg))
}

fn parse_sources(list: &str) -> Result<Vec<SourceId>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<SourceId>().map_err(anyhow::Error::msg))
        .collect()
}

/// Gather IPs from arguments and the input file, skipping invalid entries
fn collect_ips(args: &Args) -> Result<Vec<IpAddr>> {
    let mut raw: Vec<String> = args.ips.clone();
    if let Some(path) = &args.input {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        raw.extend(
            text.lines()
                .map(|line| line.split('#').next().unwrap_or("").trim())
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }

    let mut ips = Vec::with_capacity(raw.len());
    for entry in raw {
        match entry.parse::<IpAddr>() {
            Ok(ip) => ips.push(ip),
            Err(_) => warn!("skipping invalid IP address: {}", entry),
        }
    }
    ips.sort_unstable();
    ips.dedup();
    Ok(ips)
}

fn save_cache(analyzer: &Analyzer, path: &Path) -> Result<()> {
    let cache = analyzer.cache();
    cache
        .save_json(path)
        .with_context(|| format!("failed to save cache to {}", path.display()))?;
    info!(entries = cache.stats().total(), path = %path.display(), "cache saved");
    Ok(())
}

/// Display the report summary in text format
fn display_text_results(report: &AnalysisReport) {
    let resolved = report.resolutions.len() - report.unresolved().len();
    println!(
        "\nResolved {}/{} IPs to {} ASNs",
        resolved,
        report.resolutions.len(),
        report.records.len()
    );

    let top = report.top_asns(TOP_ASNS);
    if !top.is_empty() {
        println!("\nTop {} ASNs:", top.len());
        for (asn, count) in top {
            let holder = report
                .records
                .get(&asn)
                .and_then(|r| r.holder.as_deref().or(r.org.as_deref()))
                .unwrap_or("Unknown");
            println!("  AS{}: {} IPs - {}", asn, count, holder);
        }
    }

    let unresolved = report.unresolved();
    if !unresolved.is_empty() {
        println!("\nUnresolved ({}):", unresolved.len());
        for result in unresolved {
            let reason = result
                .error
                .as_ref()
                .map_or_else(|| "no data".to_string(), ToString::to_string);
            println!("  {}: {}", result.ip, reason);
        }
    }

    if !report.graph.nodes().is_empty() {
        println!(
            "\nNeighbor graph: {} ASNs, {} adjacencies",
            report.graph.node_count(),
            report.graph.edge_count()
        );
    }
}
