//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use litfetch_core::FetchConfig;

/// Resolve bibliographic metadata for DOIs across several providers.
///
/// Reads DOIs (or `title:` queries) from arguments or stdin and prints one
/// JSON result per line. Lookups are cached, rate limited, retried and
/// failed over between Semantic Scholar, Crossref and Europe PMC.
#[derive(Parser, Debug)]
#[command(name = "litfetch")]
#[command(author, version, about)]
pub struct Args {
    /// DOIs, DOI URLs or `title:<text>` queries (reads stdin when omitted)
    pub inputs: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Path to a TOML config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maximum concurrent lookups (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum retries per provider for transient failures (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Location of the response cache database
    #[arg(long, value_name = "FILE")]
    pub cache_path: Option<PathBuf>,

    /// Disable the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Disable provider health tracking (never blacklist)
    #[arg(long)]
    pub no_health: bool,

    /// Global request budget per minute across all providers (1-6000)
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u32).range(1..=6000))]
    pub rate_limit: Option<u32>,

    /// Contact email sent to providers (Crossref polite pool)
    #[arg(long, value_name = "EMAIL")]
    pub mailto: Option<String>,
}

impl Args {
    /// Applies flag overrides on top of file configuration.
    pub fn apply_to(&self, config: &mut FetchConfig) {
        if let Some(concurrency) = self.concurrency {
            config.fetch.max_concurrency = usize::from(concurrency);
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = u32::from(max_retries);
        }
        if let Some(path) = &self.cache_path {
            config.cache.path.clone_from(path);
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if self.no_health {
            config.health.enabled = false;
        }
        if let Some(rate_limit) = self.rate_limit {
            config.limiter.max_per_minute = rate_limit;
        }
        if let Some(mailto) = &self.mailto {
            config.providers.user_agent_mailto = Some(mailto.clone());
        }
    }
}
