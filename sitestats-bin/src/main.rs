//! `sitestats` extracts monthly visit counts for a list of domains
//! from the Similarweb API and stores them as a CSV report. Responses
//! are cached on disk, requests are rate limited and transient errors
//! are retried, so large domain lists survive flaky networks without
//! burning API quota.
//!
//! The sitestats binary is a wrapper around sitestats-lib, which
//! provides the rate-limited, cached fetching.
//!
//! Fetch the last six months for two domains:
//!
//! ```sh
//! sitestats --last-months 6 example.com example.org
//! ```
//!
//! Fetch a fixed date range for all domains in a file:
//!
//! ```sh
//! sitestats --domains-file domains.csv --start-date 2023-01 --end-date 2023-06
//! ```
//!
//! Split traffic by country:
//!
//! ```sh
//! sitestats --country us,gb,de example.com
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Error, Result, bail};
use clap::Parser;
use log::{error, warn};
use sitestats_lib::{Cache, FetcherBuilder};

#[cfg(feature = "native-tls")]
use openssl_sys as _; // required for vendored-openssl feature

mod api;
mod commands;
mod dates;
mod domains;
mod logging;
mod options;
mod progress;
mod verbosity;
mod writer;

use crate::api::SimilarwebApi;
use crate::commands::CommandParams;
use crate::logging::init_logging;
use crate::options::{
    Config, SITESTATS_CACHE_FILE, SITESTATS_CONFIG_FILE, SitestatsOptions,
};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator. For now, 1 acts as a catch-all for everything
    // non-fetch related (including config errors), until we find a way to
    // structure the error code handling better.
    #[allow(unused)]
    UnexpectedFailure = 1,
    Aborted = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    // See: https://doc.rust-lang.org/stable/std/process/fn.exit.html
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<SitestatsOptions> {
    let mut opts = SitestatsOptions::parse();

    init_logging(&opts.config.verbose);

    // Load a potentially existing config file and merge it into the config from
    // the CLI
    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // If no config file was explicitly provided, we try to load the default
        // config file from the current directory if the file exists. This will
        // raise an error if the file is invalid, just like the explicitly
        // provided config file.
        let default_config = PathBuf::from(SITESTATS_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    Ok(opts)
}

/// Open the response cache. Starting without a cache is always
/// possible, so open errors only cost a warning.
async fn load_cache(cfg: &Config) -> Cache {
    if cfg.no_cache {
        return Cache::disabled();
    }

    let path = cfg
        .cache_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(SITESTATS_CACHE_FILE));

    match Cache::open(&path).await {
        Ok(cache) => cache,
        Err(e) => {
            warn!(
                "Error while opening cache `{}`: {e}. Continuing without.",
                path.display()
            );
            Cache::disabled()
        }
    }
}

/// Set up runtime and call the sitestats entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e}");
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = match opts.config.threads {
        Some(threads) => {
            // We define our own runtime instead of the `tokio::main` attribute
            // since we want to make the number of threads configurable
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(threads)
                .enable_all()
                .build()?
        }
        None => tokio::runtime::Runtime::new()?,
    };

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Parse seconds into a `Duration`
const fn parse_duration_secs(secs: usize) -> Duration {
    Duration::from_secs(secs as u64)
}

/// Check if the given error can be traced back to an `io::ErrorKind`
/// This is helpful for troubleshooting the root cause of an error.
/// Code is taken from the anyhow documentation.
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Run sitestats on the given domains
async fn run(opts: &SitestatsOptions) -> Result<i32> {
    let domains = opts.domains()?;
    if domains.is_empty() {
        bail!("No domains to fetch");
    }

    let Some(api_key) = opts.config.api_key.clone() else {
        bail!("No API key given. Set --api-key or the SITESTATS_API_KEY environment variable");
    };

    if opts.config.last_months == 0 {
        bail!("--last-months must be at least 1");
    }

    let cache = load_cache(&opts.config).await;

    // Sub-day cache ages round up; eviction granularity is one day
    let max_cache_age_days =
        i64::try_from(opts.config.max_cache_age.as_secs().div_ceil(86400)).unwrap_or(i64::MAX);

    let fetcher = FetcherBuilder::builder()
        .cache(cache)
        .user_agent(opts.config.user_agent.clone())
        .requests_per_window(opts.config.max_requests)
        .max_attempts(opts.config.max_attempts)
        .retry_wait_time(parse_duration_secs(opts.config.retry_wait_time))
        .timeout(parse_duration_secs(opts.config.timeout))
        .max_cache_age_days(max_cache_age_days)
        .build()
        .fetcher()?;

    let api = SimilarwebApi::new(&opts.config.host, api_key)?;

    let params = CommandParams {
        fetcher,
        api,
        domains,
        cfg: opts.config.clone(),
    };

    let result = commands::fetch(&params).await;

    // The cache only persists on close, so this runs even when the
    // fetch failed
    if let Err(e) = params.fetcher.close().await {
        warn!("Error while closing the fetcher: {e}");
    }

    let exit_code = result?;
    Ok(exit_code as i32)
}
