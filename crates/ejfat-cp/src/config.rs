//! ejfat.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::server::ServerConfig;
use crate::session::BackendConfig;
use crate::types::{PortRange, ReadinessPolicy};

pub const DEFAULT_CP_PORT: u16 = 18347;
pub const DEFAULT_SYNC_PORT: u16 = 19523;
pub use crate::uri::DEFAULT_DATA_PORT;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EjfatConfig {
    pub control_plane: Option<ControlPlaneConfig>,
    pub backend: Option<BackendSection>,
    pub server: Option<ServerSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    pub address: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSection {
    pub name: String,
    pub lb_id: String,
    pub token: String,
    pub address: String,
    pub port: Option<u16>,
    /// Number of receiving ports, a power of two.
    pub port_range: Option<PortRange>,
    pub weight: Option<f32>,
    pub readiness: Option<ReadinessPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    pub listen_address: Option<String>,
    pub listen_port: Option<u16>,
    pub admin_token: String,
    pub sync_address: Option<String>,
    pub sync_port: Option<u16>,
    pub data_ipv4: Option<String>,
    pub data_ipv6: Option<String>,
    pub stale_after_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

impl EjfatConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EjfatConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Backend session settings. Needs both `[control_plane]` and `[backend]`.
    pub fn backend_config(&self) -> anyhow::Result<BackendConfig> {
        let cp = self
            .control_plane
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("missing [control_plane] section"))?;
        let be = self
            .backend
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("missing [backend] section"))?;

        Ok(BackendConfig {
            cp_address: cp.address.clone(),
            cp_port: cp.port.unwrap_or(DEFAULT_CP_PORT),
            lb_id: be.lb_id.clone(),
            token: be.token.clone(),
            name: be.name.clone(),
            weight: be.weight.unwrap_or(1.0),
            data_address: be.address.clone(),
            data_port: be.port.unwrap_or(DEFAULT_DATA_PORT),
            port_range: be.port_range.unwrap_or_default(),
            readiness: be.readiness.unwrap_or_default(),
        })
    }

    /// Simulated control plane settings, defaults filled in.
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let server = self
            .server
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("missing [server] section"))?;
        let defaults = ServerConfig::default();
        if server.sweep_interval_secs == Some(0) {
            anyhow::bail!("sweep_interval_secs must be at least 1");
        }

        Ok(ServerConfig {
            listen_address: server
                .listen_address
                .clone()
                .unwrap_or(defaults.listen_address),
            listen_port: server.listen_port.unwrap_or(defaults.listen_port),
            admin_token: server.admin_token.clone(),
            sync_address: server.sync_address.clone().unwrap_or_default(),
            sync_port: server.sync_port.unwrap_or(defaults.sync_port),
            data_ipv4: server.data_ipv4.clone().unwrap_or_default(),
            data_ipv6: server.data_ipv6.clone().unwrap_or_default(),
            stale_after: server
                .stale_after_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
            sweep_interval: server
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        })
    }
}
