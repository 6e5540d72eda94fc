
//! Logging setup: stderr plus a log file in the output directory, both
//! through `log4rs` with a shared pattern.

use std::path::Path;

use anyhow::{Context, Result};
use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

const LOG_FILE: &str = "graphmer.log";

/// Configure logging to stderr and `<out_dir>/graphmer.log`.
pub fn setup_logger(out_dir: &Path) -> Result<()> {
    let level = LevelFilter::Info;
    let pattern = "[{d(%Y-%m-%d %H:%M:%S)}] {h({l})}: {m}{n}";

    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .target(Target::Stderr)
        .build();

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build(out_dir.join(LOG_FILE))
        .context("failed to open log file")?;

    let config = Config::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("stderr", Box::new(stderr)),
        )
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("logfile", Box::new(logfile)),
        )
        .build(
            Root::builder()
                .appender("stderr")
                .appender("logfile")
                .build(LevelFilter::Trace),
        )
        .context("failed to configure logger")?;

    log4rs::init_config(config).context("failed to initialize logger")?;
    Ok(())
}
