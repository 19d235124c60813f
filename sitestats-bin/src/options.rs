use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use const_format::{concatcp, formatcp};
use secrecy::SecretString;
use serde::Deserialize;
use sitestats_lib::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUESTS_PER_WINDOW, DEFAULT_RETRY_WAIT_TIME_SECS,
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};

use crate::verbosity::Verbosity;

pub(crate) const SITESTATS_CACHE_FILE: &str = ".sitestats-cache.db";
pub(crate) const SITESTATS_CONFIG_FILE: &str = "sitestats.toml";

const DEFAULT_HOST: &str = "https://api.similarweb.com";
const DEFAULT_COUNTRY: &str = "world";
const DEFAULT_LAST_MONTHS: usize = 1;
const DEFAULT_MAX_CACHE_AGE: &str = "50d";

// this exists because clap requires `&str` type values for defaults
// whereas serde expects owned `String` types
// (we can't use e.g. `TIMEOUT` or `timeout()` which gets created for serde)
const LAST_MONTHS_STR: &str = concatcp!(DEFAULT_LAST_MONTHS);
const MAX_ATTEMPTS_STR: &str = concatcp!(DEFAULT_MAX_ATTEMPTS);
const MAX_CACHE_AGE_STR: &str = concatcp!(DEFAULT_MAX_CACHE_AGE);
const MAX_REQUESTS_STR: &str = concatcp!(DEFAULT_REQUESTS_PER_WINDOW);
const RETRY_WAIT_TIME_STR: &str = concatcp!(DEFAULT_RETRY_WAIT_TIME_SECS);
const TIMEOUT_STR: &str = concatcp!(DEFAULT_TIMEOUT_SECS);

// We use a custom help message here because we want to show the default
// value of the config file, but also be able to check if the user has
// provided a custom value. If they didn't, we won't throw an error if
// the file doesn't exist.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    SITESTATS_CONFIG_FILE,
);
const HELP_MSG_CACHE_FILE: &str = formatcp!(
    "Path of the response cache database\n\n[default: {}]",
    SITESTATS_CACHE_FILE,
);

macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    countries: Vec<String> = vec![DEFAULT_COUNTRY.to_string()];
    host: String = DEFAULT_HOST.to_string();
    last_months: usize = DEFAULT_LAST_MONTHS;
    max_attempts: u64 = DEFAULT_MAX_ATTEMPTS;
    max_cache_age: Duration = humantime::parse_duration(DEFAULT_MAX_CACHE_AGE).unwrap();
    max_requests: usize = DEFAULT_REQUESTS_PER_WINDOW;
    retry_wait_time: usize = DEFAULT_RETRY_WAIT_TIME_SECS;
    timeout: usize = DEFAULT_TIMEOUT_SECS;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// sitestats pulls monthly visit counts for a set of websites from the
/// Similarweb API and writes them to a CSV report.
///
/// Responses are cached in a local SQLite database, requests are rate
/// limited and transient server errors are retried, so repeat runs and
/// flaky networks don't burn through the API quota.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct SitestatsOptions {
    /// Domains to fetch statistics for
    #[arg(
        name = "domains",
        required_unless_present = "domains_file",
        long_help = "Domains to fetch statistics for (e.g. `example.com`).

Full URLs are accepted as well; the scheme, a leading `www.` and any
path are stripped before the domain is sent to the API. Alternatively,
use `--domains-file` to read the domains from a file."
    )]
    raw_domains: Vec<String>,

    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

impl SitestatsOptions {
    /// All requested domains, cleaned for the API: the ones given on the
    /// command line plus the ones read from `--domains-file`
    pub(crate) fn domains(&self) -> Result<Vec<String>> {
        let mut domains = crate::domains::clean_all(&self.raw_domains);
        if let Some(path) = &self.config.domains_file {
            domains.extend(crate::domains::load_domains_file(path)?);
        }
        Ok(domains)
    }
}

/// The main configuration for sitestats
#[allow(clippy::struct_excessive_bools)]
#[derive(Parser, Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Read domains from the given file.
    #[arg(
        long,
        value_name = "PATH",
        long_help = "Read domains from the given file.

The file is read as CSV; every cell that looks like a domain or URL is
used, everything else is skipped. A plain list with one domain per line
works as well."
    )]
    #[serde(default)]
    pub(crate) domains_file: Option<PathBuf>,

    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Do not show progress bar.
    /// This is recommended for non-interactive shells (e.g. for continuous integration)
    #[arg(long, verbatim_doc_comment)]
    #[serde(default)]
    pub(crate) no_progress: bool,

    /// Similarweb API key, sent with every metered request
    #[arg(long, env = "SITESTATS_API_KEY", hide_env_values = true)]
    #[serde(default)]
    pub(crate) api_key: Option<SecretString>,

    /// Base URL of the API
    #[arg(long, value_name = "URL", default_value = DEFAULT_HOST)]
    #[serde(default = "host")]
    pub(crate) host: String,

    /// Country to report visits for; can be given multiple times.
    /// Takes an ISO 3166-1 alpha-2 code or `world` for the worldwide total
    #[arg(
        long = "country",
        value_name = "CODE",
        value_delimiter = ',',
        default_value = DEFAULT_COUNTRY,
        verbatim_doc_comment
    )]
    #[serde(default = "countries")]
    pub(crate) countries: Vec<String>,

    /// First month of the report period (e.g. `2023-01`)
    #[arg(long, value_name = "YYYY-MM", requires = "end_date")]
    #[serde(default)]
    pub(crate) start_date: Option<String>,

    /// Last month of the report period (e.g. `2023-06`)
    #[arg(long, value_name = "YYYY-MM", requires = "start_date")]
    #[serde(default)]
    pub(crate) end_date: Option<String>,

    /// Number of most recent months to report when no explicit period is
    /// given. The most recent month with data is taken from the API
    #[arg(long, value_name = "COUNT", default_value = &LAST_MONTHS_STR)]
    #[serde(default = "last_months")]
    pub(crate) last_months: usize,

    /// Maximum number of requests sent per second
    #[arg(short = 'r', long, default_value = &MAX_REQUESTS_STR)]
    #[serde(default = "max_requests")]
    pub(crate) max_requests: usize,

    /// Total number of attempts per request, including the first one
    #[arg(long, default_value = &MAX_ATTEMPTS_STR)]
    #[serde(default = "max_attempts")]
    pub(crate) max_attempts: u64,

    /// Base wait time in seconds between attempts, scaled by Fibonacci backoff
    #[arg(long, default_value = &RETRY_WAIT_TIME_STR)]
    #[serde(default = "retry_wait_time")]
    pub(crate) retry_wait_time: usize,

    /// Request timeout in seconds
    #[arg(short, long, default_value = &TIMEOUT_STR)]
    #[serde(default = "timeout")]
    pub(crate) timeout: usize,

    /// Do not read or store responses in the cache
    #[arg(short = 'n', long)]
    #[serde(default)]
    pub(crate) no_cache: bool,

    #[arg(long, value_name = "PATH")]
    #[arg(help = HELP_MSG_CACHE_FILE)]
    #[serde(default)]
    pub(crate) cache_file: Option<PathBuf>,

    /// Discard all cached responses older than this duration
    #[arg(
        long,
        value_name = "DURATION",
        value_parser = humantime::parse_duration,
        default_value = &MAX_CACHE_AGE_STR
    )]
    #[serde(default = "max_cache_age")]
    #[serde(with = "humantime_serde")]
    pub(crate) max_cache_age: Duration,

    /// Directory to store the results in.
    /// Defaults to the directory of the domains file, or the current directory
    #[arg(short, long, value_name = "DIR", verbatim_doc_comment)]
    #[serde(default)]
    pub(crate) output_dir: Option<PathBuf>,

    /// User agent to send with every request
    #[arg(long, value_name = "NAME", default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Number of threads to utilize.
    /// Defaults to number of cores available to the system
    #[arg(long, value_name = "NUMBER", verbatim_doc_comment)]
    #[serde(default)]
    pub(crate) threads: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        // If the config file has a value for the API key, but the CLI
        // doesn't, use the key from the config file.
        // This is outside of fold_in! because SecretBox doesn't implement Eq.
        if self.api_key.is_none() && toml.api_key.is_some() {
            self.api_key = toml.api_key;
        }

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..api_key,

                // Keys with defaults to assign
                cache_file: None,
                countries: vec![DEFAULT_COUNTRY.to_string()],
                domains_file: None,
                end_date: None,
                host: DEFAULT_HOST,
                last_months: DEFAULT_LAST_MONTHS,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                max_cache_age: humantime::parse_duration(DEFAULT_MAX_CACHE_AGE).unwrap(),
                max_requests: DEFAULT_REQUESTS_PER_WINDOW,
                no_cache: false,
                no_progress: false,
                output_dir: None,
                retry_wait_time: DEFAULT_RETRY_WAIT_TIME_SECS,
                start_date: None,
                threads: None,
                timeout: DEFAULT_TIMEOUT_SECS,
                user_agent: DEFAULT_USER_AGENT,
                verbose: Verbosity::default(),
            }
        }
    }
}
