use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::EnvFilter;

pub fn setup_logging(verbose_level: u8, to_stdout: bool) {
    let subscriber = subscriber_builder(verbose_level);

    // The replay transcript goes to stdout, so logs default to stderr
    if to_stdout {
        subscriber.with_writer(io::stdout).init();
    } else {
        subscriber.with_writer(io::stderr).init();
    }
}

/// Log to a file, e.g. while the console is used for interactive approvals
pub fn setup_logging_to_file(verbose_level: u8, log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    subscriber_builder(verbose_level)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn subscriber_builder(verbose_level: u8) -> SubscriberBuilder<DefaultFields, Format, EnvFilter> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
}

fn env_filter(verbose_level: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        // Use RUST_LOG if set
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_directives(verbose_level))
    }
}

/// Map verbosity count to filters
fn filter_directives(verbose_level: u8) -> &'static str {
    match verbose_level {
        0 => "warn,assistant_turn=info,turn_replay=info",
        1 => "info,assistant_turn=debug,turn_replay=debug",
        _ => "debug,assistant_turn=trace,turn_replay=trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert_eq!(filter_directives(0), "warn,assistant_turn=info,turn_replay=info");
        assert!(filter_directives(1).contains("assistant_turn=debug"));
        assert!(filter_directives(7).contains("assistant_turn=trace"));
    }
}
