//! A `--verbose`/`--quiet` flag pair for the CLI, counted per occurrence.
//!
//! The default level is `Info`. Every `-v` raises the level by one step
//! and every `-q` lowers it, so `-q` shows warnings and errors only
//! while `-vv` enables trace output.

use std::fmt;

use log::{Level, LevelFilter};
use serde::Deserialize;

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Verbosity {
    /// More output per occurrence
    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "quiet",
    )]
    verbose: u8,

    /// Less output per occurrence
    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "verbose",
    )]
    quiet: u8,
}

impl Verbosity {
    /// Get the log level.
    pub(crate) const fn log_level(&self) -> Level {
        level_enum(self.verbosity())
    }

    /// Get the log level filter.
    pub(crate) fn log_level_filter(&self) -> LevelFilter {
        level_enum(self.verbosity()).to_level_filter()
    }

    #[allow(clippy::cast_possible_wrap)]
    const fn verbosity(&self) -> i8 {
        level_value(Level::Info) - (self.quiet as i8) + (self.verbose as i8)
    }
}

// A level in the config file is given as a name like "warn" or
// "debug" rather than a pair of counters
impl<'de> Deserialize<'de> for Verbosity {
    #[allow(clippy::cast_sign_loss)]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let level = match s.to_lowercase().as_str() {
            "error" => Level::Error,
            "warn" | "warning" => Level::Warn,
            "info" => Level::Info,
            "debug" => Level::Debug,
            "trace" => Level::Trace,
            level => {
                return Err(serde::de::Error::custom(format!(
                    "invalid log level `{level}`"
                )))
            }
        };
        Ok(Verbosity {
            verbose: level_value(level) as u8,
            quiet: 0,
        })
    }
}

const fn level_value(level: Level) -> i8 {
    match level {
        Level::Error => 0,
        Level::Warn => 1,
        Level::Info => 2,
        Level::Debug => 3,
        Level::Trace => 4,
    }
}

const fn level_enum(verbosity: i8) -> Level {
    match verbosity {
        i8::MIN..=0 => Level::Error,
        1 => Level::Warn,
        2 => Level::Info,
        3 => Level::Debug,
        _ => Level::Trace,
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verbose)
    }
}
