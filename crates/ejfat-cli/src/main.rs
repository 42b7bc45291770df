//! lbctl: command line client for the EJFAT load balancer control plane.
//!
//! # Usage
//!
//! ```text
//! export EJFAT_URI=$(lbctl reserve --cp cp.example.org --token $ADMIN --name run42)
//! lbctl backend --name be-1 --address 10.0.0.20 --port 17750
//! lbctl status --cp cp.example.org --token $ADMIN --lb-id lb1 --format json
//! ```
//!
//! Logs go to stderr; stdout carries only command output so URIs can be
//! captured directly.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ejfat_cp::config::DEFAULT_CP_PORT;

mod commands;

#[derive(Parser)]
#[command(
    name = "lbctl",
    about = "EJFAT load balancer control plane client",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Control plane endpoint and admin credentials.
#[derive(Args, Debug, Clone)]
pub struct ControlPlaneArgs {
    /// Control plane host name or IP address.
    #[arg(long, default_value = "127.0.0.1")]
    pub cp: String,
    /// Control plane gRPC port.
    #[arg(long, default_value_t = DEFAULT_CP_PORT)]
    pub port: u16,
    /// Admin token.
    #[arg(long, env = "EJFAT_ADMIN_TOKEN")]
    pub token: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve an LB and print its ejfat:// URI.
    ///
    /// On failure prints `error = <reason>` instead and exits non-zero.
    Reserve {
        #[command(flatten)]
        cp: ControlPlaneArgs,
        /// Name of the LB to reserve.
        #[arg(long)]
        name: String,
        /// Reservation lifetime in seconds.
        #[arg(long, default_value = "3600")]
        lifetime: u64,
        /// Put the IPv6 data address in the URI.
        #[arg(long)]
        ipv6: bool,
    },
    /// Release a reserved LB.
    Free {
        #[command(flatten)]
        cp: ControlPlaneArgs,
        #[arg(long)]
        lb_id: String,
    },
    /// Show the backends registered with an LB.
    Status {
        #[command(flatten)]
        cp: ControlPlaneArgs,
        #[arg(long)]
        lb_id: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Print the token-less URI of an already reserved LB.
    Uri {
        #[command(flatten)]
        cp: ControlPlaneArgs,
        #[arg(long)]
        lb_id: String,
        #[arg(long)]
        ipv6: bool,
    },
    /// Register as a backend and report telemetry until Ctrl-C.
    ///
    /// Settings come from a config file's [control_plane] and [backend]
    /// sections, or from a reservation URI plus the flags below.
    Backend {
        /// ejfat.toml with [control_plane] and [backend] sections.
        #[arg(short, long, conflicts_with = "uri")]
        config: Option<PathBuf>,
        /// Reservation URI carrying the instance token.
        #[arg(long, env = "EJFAT_URI")]
        uri: Option<String>,
        /// Backend name, unique within the LB.
        #[arg(long)]
        name: Option<String>,
        /// Data receiving address.
        #[arg(long)]
        address: Option<String>,
        /// First data receiving UDP port.
        #[arg(long)]
        port: Option<u16>,
        /// Fill level to report, 0.0 to 1.0.
        #[arg(long, default_value = "0.0")]
        fill: f32,
        /// Reporting interval in milliseconds.
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
        /// Report ready regardless of local state.
        #[arg(long)]
        always_ready: bool,
    },
    /// Run a simulated control plane.
    Serve {
        /// ejfat.toml with a [server] section.
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "0.0.0.0")]
        listen: String,
        #[arg(long, default_value_t = DEFAULT_CP_PORT)]
        port: u16,
        #[arg(long, env = "EJFAT_ADMIN_TOKEN", default_value = "")]
        admin_token: String,
        /// Sync address handed to reservations; empty means the control plane's own.
        #[arg(long, default_value = "")]
        sync_address: String,
        #[arg(long, default_value = "")]
        data_ipv4: String,
        #[arg(long, default_value = "")]
        data_ipv6: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lbctl=info,ejfat_cp=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reserve {
            cp,
            name,
            lifetime,
            ipv6,
        } => commands::reserve::reserve(&cp, &name, lifetime, ipv6).await,
        Commands::Free { cp, lb_id } => commands::reserve::free(&cp, &lb_id).await,
        Commands::Status { cp, lb_id, format } => {
            commands::reserve::status(&cp, &lb_id, &format).await
        }
        Commands::Uri { cp, lb_id, ipv6 } => commands::reserve::uri(&cp, &lb_id, ipv6).await,
        Commands::Backend {
            config,
            uri,
            name,
            address,
            port,
            fill,
            interval_ms,
            always_ready,
        } => {
            let opts = commands::backend::BackendOpts {
                config,
                uri,
                name,
                address,
                port,
                fill,
                interval_ms,
                always_ready,
            };
            commands::backend::run(opts).await
        }
        Commands::Serve {
            config,
            listen,
            port,
            admin_token,
            sync_address,
            data_ipv4,
            data_ipv6,
        } => {
            let opts = commands::serve::ServeOpts {
                config,
                listen,
                port,
                admin_token,
                sync_address,
                data_ipv4,
                data_ipv6,
            };
            commands::serve::run(opts).await
        }
    }
}
