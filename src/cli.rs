//! Command-line interface definition for daemoncore.
//!
//! This module defines the CLI structure using clap derive macros,
//! including all subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::LogLevel;

/// daemoncore - In-process daemon supervisor
///
/// Runs the configured daemons, including the Dynamic HTTP Interface, and
/// shuts them down in reverse order on a signal or a daemon failure.
#[derive(Debug, Parser)]
#[command(name = "daemoncore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "DAEMONCORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level forced by verbose/quiet flags, if any.
    ///
    /// Without flags the configured level applies.
    pub fn log_level(&self) -> Option<LogLevel> {
        if self.quiet {
            return Some(LogLevel::Error);
        }

        match self.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the daemons until a signal or a daemon failure
    Serve(ServeArgs),

    /// List the service codes registered from configuration
    Services,

    /// Configuration file operations
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Arguments for the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Plain HTTP listen address (host:port or :port)
    #[arg(long)]
    pub http_addr: Option<String>,

    /// HTTPS listen address (host:port or :port)
    #[arg(long)]
    pub https_addr: Option<String>,
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Validate the configuration file
    Validate,

    /// Show the effective configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_command() {
        let cli = Cli::parse_from(["daemoncore", "serve"]);

        match cli.command {
            Commands::Serve(args) => {
                assert!(args.http_addr.is_none());
                assert!(args.https_addr.is_none());
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_args() {
        let cli = Cli::parse_from([
            "daemoncore",
            "serve",
            "--http-addr",
            ":9090",
            "--https-addr",
            "127.0.0.1:9443",
        ]);

        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.http_addr.as_deref(), Some(":9090"));
                assert_eq!(args.https_addr.as_deref(), Some("127.0.0.1:9443"));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_services_command() {
        let cli = Cli::parse_from(["daemoncore", "services"]);
        assert!(matches!(cli.command, Commands::Services));
    }

    #[test]
    fn test_config_validate() {
        let cli = Cli::parse_from(["daemoncore", "config", "validate"]);

        match cli.command {
            Commands::Config(ConfigCommands::Validate) => {}
            _ => panic!("Expected Config Validate command"),
        }
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["daemoncore", "config", "show"]);

        match cli.command {
            Commands::Config(ConfigCommands::Show) => {}
            _ => panic!("Expected Config Show command"),
        }
    }

    #[test]
    fn test_global_config_option() {
        let cli = Cli::parse_from(["daemoncore", "-c", "/custom/config.yaml", "serve"]);

        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.yaml")));
    }

    #[test]
    fn test_verbose_levels() {
        let cli = Cli::parse_from(["daemoncore", "serve"]);
        assert_eq!(cli.log_level(), None);

        let cli = Cli::parse_from(["daemoncore", "-v", "serve"]);
        assert_eq!(cli.log_level(), Some(LogLevel::Debug));

        let cli = Cli::parse_from(["daemoncore", "-vv", "serve"]);
        assert_eq!(cli.log_level(), Some(LogLevel::Trace));

        let cli = Cli::parse_from(["daemoncore", "-vvv", "serve"]);
        assert_eq!(cli.log_level(), Some(LogLevel::Trace));
    }

    #[test]
    fn test_quiet_mode() {
        let cli = Cli::parse_from(["daemoncore", "-q", "serve"]);
        assert_eq!(cli.log_level(), Some(LogLevel::Error));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["daemoncore", "-q", "-v", "serve"]).is_err());
    }
}
