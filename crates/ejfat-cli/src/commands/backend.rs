use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use ejfat_cp::config::DEFAULT_DATA_PORT;
use ejfat_cp::{BackendClient, BackendConfig, EjfatConfig, EjfatUri, ReadinessPolicy};
use tracing::{info, warn};

pub struct BackendOpts {
    pub config: Option<PathBuf>,
    pub uri: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub fill: f32,
    pub interval_ms: u64,
    pub always_ready: bool,
}

/// Build the session settings from a config file or a reservation URI.
fn backend_config(opts: &BackendOpts) -> anyhow::Result<BackendConfig> {
    if opts.interval_ms == 0 {
        anyhow::bail!("--interval-ms must be at least 1");
    }

    let mut config = match (&opts.config, &opts.uri) {
        (Some(path), _) => EjfatConfig::from_file(path)
            .with_context(|| format!("reading {}", path.display()))?
            .backend_config()?,
        (None, Some(uri)) => {
            let uri: EjfatUri = uri.parse()?;
            anyhow::ensure!(
                uri.has_token(),
                "{uri} carries no instance token; use the URI printed by `lbctl reserve`"
            );
            let name = opts
                .name
                .clone()
                .context("--name is required with --uri")?;
            let address = opts
                .address
                .clone()
                .context("--address is required with --uri")?;
            BackendConfig::from_uri(&uri, name, address, opts.port.unwrap_or(DEFAULT_DATA_PORT))?
        }
        (None, None) => anyhow::bail!("either --config or --uri (or EJFAT_URI) is required"),
    };

    if opts.always_ready {
        config.readiness = ReadinessPolicy::AlwaysReady;
    }
    Ok(config)
}

pub async fn run(opts: BackendOpts) -> anyhow::Result<()> {
    let config = backend_config(&opts)?;
    let mut client = BackendClient::new(config);
    client.register().await?;

    let mut interval = tokio::time::interval(Duration::from_millis(opts.interval_ms));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Failed reports are retried on the next tick.
                if let Err(e) = client.send_state(opts.fill, 0.0, true).await {
                    warn!(error = %e, "state report failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    if let Err(e) = client.deregister().await {
        warn!(error = %e, "deregistration failed");
    }
    Ok(())
}
