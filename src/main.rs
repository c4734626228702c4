use std::{io::IsTerminal, path::PathBuf, sync::Arc};

use chimera::{
    config::{FileWatchProvider, ProxyConfig, StaticProvider},
    mcp::ConfigProvider,
    observability::logging::{init_logging, parse_level, LoggingConfig},
    server::{self, ServeMode, ServerConfig},
};
use clap::Parser;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "chimera", version)]
#[command(about = "Aggregating MCP proxy: many backend MCP servers behind one session")]
struct Cli {
    /// Backend configuration file (.json, .yaml or .yml)
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Serve a single session on stdin/stdout instead of HTTP
    #[arg(long, default_value_t = false)]
    stdio: bool,

    /// Reload the backend configuration when the file changes
    #[arg(long, default_value_t = false)]
    watch: bool,

    #[arg(long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: String,

    #[arg(long, default_value_t = false)]
    log_json: bool,

    /// Also write daily-rotated log files to this directory
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging(LoggingConfig {
        level: parse_level(&cli.log_level).unwrap_or(Level::INFO),
        json_format: cli.log_json,
        log_dir: cli.log_dir.clone(),
        colorize: !cli.log_json && std::io::stderr().is_terminal(),
        ..Default::default()
    });

    let provider: Arc<dyn ConfigProvider> = if cli.watch {
        info!(path = %cli.config.display(), "Watching backend configuration");
        Arc::new(FileWatchProvider::start(&cli.config)?)
    } else {
        Arc::new(StaticProvider::from_config(&ProxyConfig::load(&cli.config)?))
    };

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        mode: if cli.stdio {
            ServeMode::Stdio
        } else {
            ServeMode::Http
        },
    };

    server::startup(config, provider).await
}
