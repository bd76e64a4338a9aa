//! CLI argument definitions for licensecheck-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Input value that selects standard input.
pub const STDIN_MARKER: &str = "-";

/// License scanning consumer for build-state-change events.
///
/// Reads bus messages as JSON lines (`{"id", "topic", "body"}`), checks out
/// the source of every finished build, scans its archives and writes one
/// result bundle per build.
#[derive(Parser, Debug)]
#[command(name = "licensecheck-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to licensecheck.toml configuration file.
    ///
    /// Built-in defaults (plus environment overrides) are used when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and exit without consuming events.
    #[arg(long)]
    pub validate: bool,

    /// JSON-lines message stream to consume (`-` for stdin).
    #[arg(short, long, default_value = STDIN_MARKER, conflicts_with = "once")]
    pub input: String,

    /// Process a single message file and exit.
    #[arg(long, value_name = "MESSAGE_JSON")]
    pub once: Option<PathBuf>,
}

impl DaemonCli {
    /// Whether events are read from standard input.
    pub fn reads_stdin(&self) -> bool {
        self.input == STDIN_MARKER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_stdin() {
        let cli = DaemonCli::try_parse_from(["licensecheck-daemon"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.reads_stdin());
        assert!(cli.once.is_none());
        assert!(!cli.validate);
    }

    #[test]
    fn parses_overrides() {
        let cli = DaemonCli::try_parse_from([
            "licensecheck-daemon",
            "--config",
            "/etc/licensecheck/licensecheck.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--input",
            "/var/spool/licensecheck/events.jsonl",
        ])
        .unwrap();
        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/etc/licensecheck/licensecheck.toml"))
        );
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(!cli.reads_stdin());
    }

    #[test]
    fn once_conflicts_with_input() {
        let result = DaemonCli::try_parse_from([
            "licensecheck-daemon",
            "--once",
            "message.json",
            "--input",
            "events.jsonl",
        ]);
        assert!(result.is_err());
    }
}
