//! gRPC channel handling shared by the clients.
//!
//! Connection failures are reported as `Status::unavailable` so every
//! public operation surfaces one failure variant per RPC, whether the call
//! failed to connect or the control plane rejected it.

use tonic::Status;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::proto::load_balancer_client::LoadBalancerClient;
use crate::resolve::endpoint_uri;

pub(crate) type LbClient = LoadBalancerClient<Channel>;

/// Open a channel to the control plane at `host:port`.
///
/// Emits no log output: the one-shot URI paths must stay silent on success.
pub(crate) async fn connect(host: &str, port: u16) -> Result<LbClient, Status> {
    let endpoint = endpoint_uri(host, port);
    let ep = Endpoint::from_shared(endpoint.clone())
        .map_err(|e| Status::invalid_argument(format!("invalid endpoint {endpoint}: {e}")))?;
    let channel = ep
        .connect()
        .await
        .map_err(|e| Status::unavailable(format!("connect to {endpoint}: {e}")))?;
    Ok(LoadBalancerClient::new(channel))
}

/// A lazily connected control plane client owned by one long-lived caller.
#[derive(Debug)]
pub(crate) struct Connection {
    host: String,
    port: u16,
    client: Option<LbClient>,
}

impl Connection {
    pub(crate) fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client: None,
        }
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// The cached client, connecting first if needed.
    pub(crate) async fn get(&mut self) -> Result<&mut LbClient, Status> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                let client = connect(&self.host, self.port).await?;
                debug!(host = %self.host, port = self.port, "connected to control plane");
                client
            }
        };
        Ok(self.client.insert(client))
    }

    /// Drop the cached channel so the next call reconnects.
    pub(crate) fn reset(&mut self) {
        self.client = None;
    }
}
