use std::path::PathBuf;

use ejfat_cp::{ControlPlaneServer, EjfatConfig, ServerConfig};
use tokio::sync::watch;
use tracing::info;

pub struct ServeOpts {
    pub config: Option<PathBuf>,
    pub listen: String,
    pub port: u16,
    pub admin_token: String,
    pub sync_address: String,
    pub data_ipv4: String,
    pub data_ipv6: String,
}

/// Settings from the `[server]` section of a config file, or from flags.
fn server_config(opts: &ServeOpts) -> anyhow::Result<ServerConfig> {
    if let Some(path) = &opts.config {
        return EjfatConfig::from_file(path)?.server_config();
    }
    Ok(ServerConfig {
        listen_address: opts.listen.clone(),
        listen_port: opts.port,
        admin_token: opts.admin_token.clone(),
        sync_address: opts.sync_address.clone(),
        data_ipv4: opts.data_ipv4.clone(),
        data_ipv6: opts.data_ipv6.clone(),
        ..ServerConfig::default()
    })
}

pub async fn run(opts: ServeOpts) -> anyhow::Result<()> {
    let config = server_config(&opts)?;
    let server = ControlPlaneServer::new(config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        let _ = shutdown_tx.send(true);
    });

    server.serve(shutdown_rx).await
}
