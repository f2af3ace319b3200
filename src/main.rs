//! Main entry point for ipmask-proxy

use clap::{Parser, Subcommand};
use ipmask_proxy::{
    cli::{ConfigCommand, ServerArgs},
    init_logger_with_config, log_error, log_info, log_warning,
    runtime::run_with_runtime,
    ProxyConfig, ProxyServer,
};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ipmask-proxy")]
#[command(about = "An anonymizing HTTP forward proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server (default)
    #[command(name = "server")]
    Server(ServerArgs),

    /// Configuration file management
    #[command(name = "config")]
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config(ref command)) => {
            let _guard = init_logger_with_config(&cli_level(&cli).unwrap_or_else(|| "warn".to_string()), None);
            command.run()
        }
        Some(Commands::Server(ref args)) => run_server(&cli, args),
        None => run_server(&cli, &ServerArgs::default()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn cli_level(cli: &Cli) -> Option<String> {
    if cli.verbose {
        Some("debug".to_string())
    } else {
        cli.log_level.clone()
    }
}

fn run_server(cli: &Cli, args: &ServerArgs) -> anyhow::Result<()> {
    let loaded = args.load_config()?;
    let mut config: ProxyConfig = loaded.config;
    if let Some(level) = cli_level(cli) {
        config.log_level = level;
    }

    // Keep the guard alive so buffered file logs are flushed on exit
    let _guard = init_logger_with_config(&config.log_level, config.logging.file.as_deref());

    for warning in &loaded.warnings {
        log_warning!("⚠️  {}", warning);
    }
    for problem in config.validate() {
        log_warning!("⚠️  Configuration problem: {}", problem);
    }

    log_info!("🚀 Starting ipmask-proxy v{}", env!("CARGO_PKG_VERSION"));
    log_info!("📋 Server Configuration:");
    log_info!("   Listen: {}:{}", config.host, config.port);
    log_info!("   Timeout: {}s", config.timeout);
    log_info!("   Upstream proxy: {}", if config.upstream_proxy.is_some() { "configured" } else { "none" });
    log_info!("   Outbound auth: {}", if config.auth.is_some() { "enabled" } else { "disabled" });
    log_info!(
        "   Rate limiting: {}",
        if config.rate_limit_enabled {
            format!("{} requests/minute", config.requests_per_minute)
        } else {
            "disabled".to_string()
        }
    );
    log_info!("   Blocked domains: {}, allowed domains: {}", config.blocked_domains.len(), config.allowed_domains.len());

    let worker_threads = config.worker_threads;
    run_with_runtime(worker_threads, async move {
        let server = ProxyServer::with_config(&config)?;
        server.start().await
    })
}
