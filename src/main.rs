//! daemoncore - In-process daemon supervisor
//!
//! Entry point for the daemoncore application.

use clap::Parser;
use daemoncore::cache::WeatherCache;
use daemoncore::cli::{Cli, Commands, ConfigCommands, ServeArgs};
use daemoncore::config::Config;
use daemoncore::error::{exit_code, install_panic_hook};
use daemoncore::provider::build_registry;
use daemoncore::{CoreError, SupervisorExit};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let cli = Cli::parse();
    install_panic_hook();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install TLS crypto provider");
        return ExitCode::from(exit_code::GENERAL_ERROR as u8);
    }

    // Configuration drives logging, so a load failure is reported on stderr.
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Configuration is invalid: {}", e);
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    if let Err(e) = config.logging.init(cli.log_level()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(e.exit_code() as u8);
    }

    match run(&cli, config) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!(error_code = %e.code(), "{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

/// Main application logic. Returns the process exit code.
fn run(cli: &Cli, config: Config) -> daemoncore::Result<i32> {
    match &cli.command {
        Commands::Serve(args) => cmd_serve(config, args),
        Commands::Services => cmd_services(&config),
        Commands::Config(subcmd) => cmd_config(config, subcmd),
    }
}

/// Handle the `serve` command.
fn cmd_serve(mut config: Config, args: &ServeArgs) -> daemoncore::Result<i32> {
    if let Some(addr) = &args.http_addr {
        config.dhi.addr1 = Some(addr.clone());
    }
    if let Some(addr) = &args.https_addr {
        config.dhi.addr2 = Some(addr.clone());
    }

    tracing::info!(
        daemons = config.daemons.len(),
        http = ?config.dhi.addr1,
        https = ?config.dhi.addr2,
        "Starting daemoncore"
    );

    let runtime = tokio::runtime::Runtime::new()?;

    match runtime.block_on(daemoncore::serve(&config))? {
        SupervisorExit::DaemonFailed { name } => {
            tracing::error!(daemon = %name, "Stopped after daemon failure");
            Ok(exit_code::DAEMON_ERROR)
        }
        SupervisorExit::Signal | SupervisorExit::AllFinished => Ok(exit_code::SUCCESS),
    }
}

/// Handle the `services` command.
fn cmd_services(config: &Config) -> daemoncore::Result<i32> {
    let cache = Arc::new(WeatherCache::from_config(&config.cache));
    let registry = build_registry(&config.dhi, &config.weather, cache)?;

    if registry.is_empty() {
        println!("No services configured");
        return Ok(exit_code::SUCCESS);
    }

    println!("Configured Services:");
    for (code, shadowed) in registry.codes() {
        if shadowed {
            println!("  - {} (shadowed by a later entry)", code);
        } else {
            println!("  - {}", code);
        }
    }
    Ok(exit_code::SUCCESS)
}

/// Handle the `config` subcommand.
fn cmd_config(config: Config, subcmd: &ConfigCommands) -> daemoncore::Result<i32> {
    match subcmd {
        ConfigCommands::Validate => {
            println!("✓ Configuration is valid");
            tracing::debug!(?config, "Validated configuration");
            Ok(exit_code::SUCCESS)
        }
        ConfigCommands::Show => {
            let yaml = serde_yaml::to_string(&config).map_err(|e| {
                CoreError::config_with_source("Failed to serialize configuration", e)
            })?;
            println!("{}", yaml);
            Ok(exit_code::SUCCESS)
        }
    }
}

/// Load configuration with error handling.
fn load_config(cli: &Cli) -> daemoncore::Result<Config> {
    Config::load(cli.config.as_deref())
}
