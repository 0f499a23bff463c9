//! WireGuard Provisioning Daemon (wgprovd)
//!
//! Serves the HTTP control API and offers one-shot operator commands.
//!
//! # Usage
//!
//! ```bash
//! # Start the API server
//! wgprovd --config /etc/wgprov/wgprov.toml
//!
//! # Provision wg0 without going through the API
//! wgprovd provision wg0 --addr 10.0.0.1 --mask 24 --port 51820
//!
//! # Print a config file with the defaults
//! wgprovd default-config > wgprov.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libwgprov::api::{self, AppState, ProfileParams};
use libwgprov::keygen::key_text;
use libwgprov::provision::ProvisioningRequest;
use libwgprov::render::LifecycleHooks;
use libwgprov::validation::validate_config_value;
use libwgprov::WgprovConfig;
use std::io::Read;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// WireGuard Provisioning Daemon
#[derive(Parser, Debug)]
#[command(name = "wgprovd")]
#[command(version)]
#[command(about = "WireGuard provisioning daemon - key generation, config install and status over HTTP", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP control API (default)
    Serve {
        /// Address to bind, overrides server.bind_address
        #[arg(long)]
        address: Option<String>,
        /// Port to listen on, overrides server.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Generate keys and install a config for an interface
    Provision {
        /// Interface name
        name: String,
        /// Interface IP without prefix length
        #[arg(long)]
        addr: String,
        /// Prefix length
        #[arg(long)]
        mask: Option<String>,
        /// WireGuard listen port
        #[arg(long)]
        port: Option<String>,
        /// DNS server for the interface
        #[arg(long)]
        dns: Option<String>,
        /// Routing table: off, auto or a table number
        #[arg(long)]
        table: Option<String>,
    },
    /// Generate and print a key pair
    Genkey,
    /// Generate and print a preshared key
    Genpsk,
    /// Print the public key for a private key read from stdin
    Pubkey,
    /// Show all interfaces or one interface
    Show {
        /// Interface name
        name: Option<String>,
        /// Print only this field (public-key, listen-port, peers, ...)
        #[arg(long, requires = "name")]
        field: Option<String>,
    },
    /// Print the running configuration of an interface
    Showconf {
        /// Interface name
        name: String,
    },
    /// Print the default configuration
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => WgprovConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => WgprovConfig::default(),
    };

    let command = args.command.unwrap_or(Command::Serve {
        address: None,
        port: None,
    });

    match command {
        Command::DefaultConfig => {
            print!("{}", WgprovConfig::default().to_toml()?);
        }
        Command::Genkey => {
            let state = build_state(&config)?;
            let pair = state
                .keys()
                .generate_key_pair()
                .await
                .context("Key pair generation failed")?;
            println!("private key: {}", key_text(&pair.private_key));
            println!("public key: {}", key_text(&pair.public_key));
        }
        Command::Genpsk => {
            let state = build_state(&config)?;
            let psk = state
                .keys()
                .generate_preshared_key()
                .await
                .context("Preshared key generation failed")?;
            println!("preshared key: {}", key_text(&psk));
        }
        Command::Pubkey => {
            let state = build_state(&config)?;
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read private key from stdin")?;
            let private_key = input.trim();
            validate_config_value(private_key).context("Invalid private key")?;
            let public_key = state
                .keys()
                .generate_public_key(format!("{}\n", private_key).as_bytes())
                .await
                .context("Public key derivation failed")?;
            println!("public key: {}", key_text(&public_key));
        }
        Command::Show { name, field } => {
            let state = build_state(&config)?;
            let output = match (name, field) {
                (Some(name), Some(field)) => state.status().show_field(&name, &field).await,
                (Some(name), None) => state.status().show_interface(&name).await,
                (None, _) => state.status().list_interfaces().await,
            }
            .context("Status query failed")?;
            print!("{}", output);
        }
        Command::Showconf { name } => {
            let state = build_state(&config)?;
            let output = state
                .status()
                .show_config(&name)
                .await
                .context("Status query failed")?;
            print!("{}", output);
        }
        Command::Provision {
            name,
            addr,
            mask,
            port,
            dns,
            table,
        } => {
            check_privileges();
            let state = build_state(&config)?;
            let profile = ProfileParams {
                dns,
                table,
                hooks: LifecycleHooks::default(),
            }
            .into_profile()?;
            let request = ProvisioningRequest {
                name,
                address: addr,
                mask: mask.unwrap_or_else(|| config.defaults.mask.clone()),
                listen_port: port.unwrap_or_else(|| config.defaults.listen_port.to_string()),
                profile,
            };
            let provisioned = state
                .provisioner()
                .provision(request)
                .await
                .context("Provisioning failed")?;
            println!("{}", serde_json::to_string_pretty(&provisioned)?);
        }
        Command::Serve { address, port } => {
            let mut config = config;
            if let Some(address) = address {
                config.server.bind_address = address;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await?;
        }
    }

    Ok(())
}

fn build_state(config: &WgprovConfig) -> Result<AppState> {
    AppState::from_config(config).context("Failed to initialize config renderer")
}

async fn serve(config: WgprovConfig) -> Result<()> {
    info!("Starting WireGuard Provisioning Daemon (wgprovd)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    check_privileges();

    let state = build_state(&config)?;
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening on http://{}", addr);
    info!("Installing artifacts into {}", config.paths.install_dir.display());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("wgprovd stopped");
    Ok(())
}

/// Warn when the tools will likely need elevation
fn check_privileges() {
    #[cfg(target_os = "linux")]
    {
        let uid = unsafe { libc::geteuid() };
        if uid != 0 {
            warn!("Not running as root - wg and the install copy rely on the configured sudo prefix");
        }
    }
}

/// Initialize logging based on command-line arguments
fn init_logging(args: &Args) {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "wgprovd={},libwgprov={},tower_http={}",
            log_level, log_level, log_level
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

/// Resolve on SIGTERM or SIGINT
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                return wait_for_ctrl_c().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}
