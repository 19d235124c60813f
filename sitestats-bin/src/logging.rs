use std::io::Write;

use env_logger::{Builder, Env};
use log::LevelFilter;

use crate::verbosity::Verbosity;

/// Initialize the logging system with the given verbosity level.
pub(crate) fn init_logging(verbose: &Verbosity) {
    // Set a base level for all modules to `warn`, which is a reasonable
    // default. It will be overridden by RUST_LOG if it's set.
    let env = Env::default().filter_or("RUST_LOG", "warn");

    let mut builder = Builder::from_env(env);
    builder
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false);

    if std::env::var("RUST_LOG").is_err() {
        // Adjust the base log level filter based on the verbosity from
        // the CLI. This applies to all modules not explicitly mentioned
        // in RUST_LOG.
        let level_filter = verbose.log_level_filter();

        builder.filter_level(LevelFilter::Info);

        // More specific filters for our own crates, so that `-v` does
        // not drown the output in debug logs of the HTTP stack
        builder
            .filter_module("sitestats", level_filter)
            .filter_module("sitestats_lib", level_filter);
    }

    builder.format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()));

    builder.init();
}
