use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

use patchnar::{process, RewriteConfig, Stats};

/// Rewrite store paths inside a NAR stream.
///
/// Reads a NAR from standard input and writes the rewritten NAR to
/// standard output; diagnostics go to standard error.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Installation prefix prepended to store paths
    #[arg(long, value_name = "PATH")]
    prefix: String,

    /// Replacement C library store path
    #[arg(long, value_name = "PATH", requires = "old_glibc")]
    glibc: Option<String>,

    /// Original C library store path to substitute
    #[arg(long = "old-glibc", value_name = "PATH", requires = "glibc")]
    old_glibc: Option<String>,

    /// File of "OLD_PATH NEW_PATH" basename mappings, one per line
    #[arg(long, value_name = "FILE")]
    mappings: Vec<PathBuf>,

    /// Single "OLD_PATH NEW_PATH" mapping
    #[arg(long = "self-mapping", value_name = "MAP")]
    self_mapping: Vec<String>,

    /// Extra path pattern that also receives the prefix inside script
    /// strings (may be given multiple times)
    #[arg(long = "add-prefix-to", value_name = "PATH")]
    add_prefix_to: Vec<String>,

    /// Number of files rewritten concurrently
    #[arg(long, value_name = "N", default_value_t = 8)]
    jobs: usize,

    /// Log every rewrite decision to standard error
    #[arg(long)]
    debug: bool,
}

fn build_config(args: &Args) -> Result<RewriteConfig, patchnar::ConfigError> {
    let mut config = RewriteConfig::new(args.prefix.as_str());
    if let (Some(old), Some(new)) = (&args.old_glibc, &args.glibc) {
        config.set_libroot(old.as_str(), new.as_str());
    }
    for path in &args.mappings {
        // A missing mappings file degrades the rewrite but does not
        // invalidate the stream.
        if let Err(err) = config.load_mappings(path) {
            warn!(%err, "ignoring mappings file");
        }
    }
    for mapping in &args.self_mapping {
        config.add_self_mapping(mapping)?;
    }
    for pattern in &args.add_prefix_to {
        config.add_prefix_pattern(pattern.as_str());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::Layer::default()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    debug!(?args, "starting");

    let stats = Arc::new(Stats::new());
    let result = process(
        tokio::io::stdin(),
        tokio::io::stdout(),
        Arc::new(config),
        Arc::clone(&stats),
        args.jobs,
    )
    .await;

    match result {
        Ok(()) => {
            stats.log_summary();
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "stream failed");
            ExitCode::FAILURE
        }
    }
}
