//! hbthemeserver - theme resource server.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use theme_config_and_utils::{init_logging, parse_level, Config, LogConfig, Paths, SERVER_NAME};
use theme_lifecycle::START_ARG;

/// Theme server command-line interface.
#[derive(Parser)]
#[command(name = "hbthemeserver")]
#[command(about = "Shares theme icons, stylesheets and effects between applications")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (socket, logs, config). Defaults to ~/.themeserver
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Root directory holding the themes
    #[arg(long, global = true)]
    themes_dir: Option<PathBuf>,

    /// Serve the diagnostics protocol
    #[arg(long, global = true)]
    diagnostics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Start {
        /// Run in foreground and log to stderr as well
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the server
    Stop,
    /// Check server status
    Status,
}

/// Accept the single-dash start flag clients pass when spawning the server.
fn normalize_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .map(|arg| {
            if arg == START_ARG {
                "start".to_string()
            } else {
                arg
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_from(normalize_args(std::env::args()));

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(dir) = cli.themes_dir {
        config.themes_dir = Some(dir);
    }
    config.diagnostics |= cli.diagnostics;

    let serving = match cli.command {
        Some(Commands::Start { foreground }) => Some(foreground),
        // Default to start in foreground if no command given
        None => Some(true),
        Some(Commands::Stop) | Some(Commands::Status) => None,
    };

    // Stdout carries the readiness line only, so logs go to the file and,
    // in the foreground, to stderr.
    init_logging(&LogConfig {
        service_name: SERVER_NAME.to_string(),
        default_level: parse_level(&config.log_level).to_string(),
        log_path: serving.map(|_| paths.log_file(SERVER_NAME)),
        also_stderr: serving.unwrap_or(true),
    });

    match cli.command {
        Some(Commands::Stop) => app::stop_server(&paths, &config).await?,
        Some(Commands::Status) => app::check_status(&paths, &config).await?,
        _ => app::run_server(config, paths).await?,
    }

    Ok(())
}
