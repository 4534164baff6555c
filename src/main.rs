use clap::Parser;
use socklink::config::Config;
use socklink::server::{DefaultLinker, Server};
use socklink::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "Socklink")]
#[command(about = "Embeddable SOCKS5 proxy server", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Bind port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)?;
        println!("Edit the file and run: socklink --config {:?}", config_path);
        return Ok(());
    }

    init_logging(&args.log_level)?;

    info!("Socklink v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = if let Some(config_path) = args.config {
        info!("Loading configuration from: {:?}", config_path);
        Config::from_file(config_path)?
    } else {
        info!("No configuration file specified, using defaults");
        Config::default()
    };

    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.server.bind_port = port;
    }

    let server = Arc::new(build_server(&config));
    let bind_addr = config.bind_addr();

    let accept_loop = {
        let server = server.clone();
        tokio::spawn(async move { server.listen_and_run(&bind_addr).await })
    };

    tokio::select! {
        result = accept_loop => {
            if let Ok(Err(e)) = result {
                error!("Server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            if let Err(e) = server.close().await {
                warn!("Shutdown error: {}", e);
            }
            info!("Server shutdown complete");
        }
    }

    Ok(())
}

fn build_server(config: &Config) -> Server {
    let mut server = match config.auth.method.as_str() {
        "userpass" => {
            let users = config
                .auth
                .users
                .iter()
                .map(|u| (u.username.clone(), u.password.clone()))
                .collect();
            Server::with_users(users)
        }
        _ => Server::new(),
    };

    server.set_handshake_timeout(config.timeouts.handshake_secs.map(Duration::from_secs));
    if let Some(idle) = config.timeouts.idle_secs {
        server.set_linker(DefaultLinker::with_idle_timeout(Duration::from_secs(idle)));
    }

    server
}

fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| socklink::SocklinkError::Config(format!("Invalid log level: {}", e)))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    Ok(())
}
