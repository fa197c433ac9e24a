//! CLI entry point for the litfetch tool.

use std::collections::HashSet;
use std::io::{self, IsTerminal, Read, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use litfetch_core::{
    CancelFlag, FetchConfig, FetchRequest, MultiSourceFetcher, enrich_metadata,
};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// Exit code when some inputs could not be resolved.
const EXIT_PARTIAL: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Results go to stdout; logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut config = match &args.config {
        Some(path) => FetchConfig::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => FetchConfig::default(),
    };
    args.apply_to(&mut config);
    config.validate().context("invalid configuration")?;

    let input_text = if !args.inputs.is_empty() {
        args.inputs.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        buffer
    } else {
        info!("No input provided. Pass DOIs as arguments or pipe them via stdin.");
        info!("Example: echo '10.1038/nature12373' | litfetch");
        return Ok(ExitCode::SUCCESS);
    };

    let requests = parse_inputs(&input_text, &config);
    if requests.is_empty() {
        info!("No valid DOIs or title queries found in input");
        return Ok(ExitCode::SUCCESS);
    }

    let fetcher = MultiSourceFetcher::from_config(&config)
        .await
        .context("failed to initialize fetcher")?;
    info!(
        requests = requests.len(),
        providers = ?fetcher.provider_ids(),
        "resolving metadata"
    );

    let report = enrich_metadata(&fetcher, requests, &CancelFlag::new()).await;

    let mut stdout = io::stdout().lock();
    for result in report.resolved.iter().chain(&report.exhausted) {
        let line = serde_json::to_string(result).context("failed to encode result")?;
        writeln!(stdout, "{line}").context("failed to write result")?;
    }
    stdout.flush().context("failed to flush stdout")?;

    info!(
        resolved = report.resolved.len(),
        exhausted = report.exhausted.len(),
        cache_hits = report.cache_stats.hits,
        cache_hit_rate = report.cache_stats.hit_rate(),
        provider_calls = fetcher.stats().provider_calls(),
        "Lookup complete"
    );

    if report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL))
    }
}

/// Turns input lines into requests, skipping blanks, comments, invalid
/// entries and duplicates.
fn parse_inputs(text: &str, config: &FetchConfig) -> Vec<FetchRequest> {
    let mut seen = HashSet::new();
    let mut requests = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed = match line.strip_prefix("title:") {
            Some(title) => FetchRequest::title_query(title, None),
            None => FetchRequest::doi(line),
        };
        match parsed {
            Ok(request) => {
                if seen.insert(request.key()) {
                    requests.push(request.with_timeout(config.fetch.request_timeout()));
                } else {
                    debug!(input = line, "duplicate input skipped");
                }
            }
            Err(error) => warn!(input = line, error = %error, "Skipped unrecognized input"),
        }
    }

    requests
}
