//! Simulated control plane: server side of the `LoadBalancer` service.
//!
//! Admits backends into reserved LB instances, records their telemetry and
//! answers reservation and status queries. A background sweep marks
//! backends inactive once they stop reporting and reaps expired
//! reservations together with their sessions.

pub mod instances;
pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::proto;
use crate::proto::load_balancer_server::{LoadBalancer, LoadBalancerServer};
use crate::resolve::uri_host;
use crate::time::{epoch_secs, now_timestamp};
use crate::types::PortRange;

pub use instances::{InstanceError, LbInstance, LbInstances};
pub use registry::{CALENDAR_SLOTS, IssuedSession, RegistryError, SessionRegistry, assign_slots};

/// Shortest liveness sweep period.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Settings for a simulated control plane.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub listen_address: String,
    pub listen_port: u16,
    /// Token authorizing reservations and any per-LB operation.
    pub admin_token: String,
    /// Sync endpoint handed out with each reservation. Left empty, clients
    /// fall back to the control plane's own address.
    pub sync_address: String,
    pub sync_port: u16,
    pub data_ipv4: String,
    pub data_ipv6: String,
    /// Silence after which a backend is marked inactive.
    pub stale_after: Duration,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: crate::config::DEFAULT_CP_PORT,
            admin_token: String::new(),
            sync_address: String::new(),
            sync_port: crate::config::DEFAULT_SYNC_PORT,
            data_ipv4: String::new(),
            data_ipv6: String::new(),
            stale_after: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", uri_host(&self.listen_address), self.listen_port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {addr}: {e}"))
    }
}

/// Result of one liveness sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Backends newly marked inactive.
    pub stale: Vec<String>,
    /// LB ids whose reservation expired.
    pub expired: Vec<String>,
}

/// gRPC implementation of the load balancer control plane.
#[derive(Clone)]
pub struct ControlPlaneServer {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    instances: Arc<LbInstances>,
}

impl ControlPlaneServer {
    pub fn new(config: ServerConfig) -> Self {
        let instances = Arc::new(LbInstances::new(config.admin_token.clone()));
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            instances,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn instances(&self) -> &LbInstances {
        &self.instances
    }

    /// Get the tonic service for mounting on a gRPC server.
    pub fn into_service(self) -> LoadBalancerServer<Self> {
        LoadBalancerServer::new(self)
    }

    /// Run one liveness pass.
    pub fn sweep(&self) -> SweepOutcome {
        self.sweep_at(epoch_secs())
    }

    fn sweep_at(&self, now_secs: i64) -> SweepOutcome {
        let expired = self.instances.reap_expired(now_secs);
        for lb_id in &expired {
            self.registry.remove_lb(lb_id);
        }
        let stale = self.registry.mark_stale(self.config.stale_after);
        SweepOutcome { stale, expired }
    }

    /// Sweep periodically until shutdown is signalled.
    pub async fn run_sweep(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        let mut interval = tokio::time::interval(period);
        info!(
            interval_ms = period.as_millis() as u64,
            stale_after_ms = self.config.stale_after.as_millis() as u64,
            "liveness sweep started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.sweep();
                    if !outcome.stale.is_empty() || !outcome.expired.is_empty() {
                        debug!(stale = outcome.stale.len(), expired = outcome.expired.len(), "sweep complete");
                    }
                }
                _ = shutdown.changed() => {
                    info!("liveness sweep shutting down");
                    break;
                }
            }
        }
    }

    /// Serve on the configured address with a background sweep, until
    /// shutdown is signalled.
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let addr = self.config.listen_addr()?;
        if self.config.admin_token.is_empty() {
            warn!("admin token is empty; any caller can reserve load balancers");
        }

        let sweeper = self.clone();
        let sweep_shutdown = shutdown.clone();
        let sweep_handle = tokio::spawn(async move {
            sweeper.run_sweep(sweep_shutdown).await;
        });

        info!(%addr, "control plane listening");
        let mut server_shutdown = shutdown;
        tonic::transport::Server::builder()
            .add_service(self.into_service())
            .serve_with_shutdown(addr, async move {
                let _ = server_shutdown.changed().await;
            })
            .await?;

        let _ = sweep_handle.await;
        info!("control plane stopped");
        Ok(())
    }

    /// Reject callers whose token does not cover `lb_id`.
    ///
    /// An expired reservation is treated as gone even before the sweep
    /// reaps it.
    fn authorize(&self, lb_id: &str, token: &str) -> Result<LbInstance, Status> {
        let instance = self.instances.get(lb_id)?;
        if instance.is_expired(epoch_secs()) {
            return Err(Status::not_found(format!(
                "reservation of load balancer {lb_id} has expired"
            )));
        }
        if !self.instances.authorizes(lb_id, token) {
            return Err(Status::permission_denied(format!(
                "token not valid for load balancer {lb_id}"
            )));
        }
        Ok(instance)
    }

    fn grant_reply(&self, lb_id: String, token: String) -> proto::ReserveLoadBalancerReply {
        proto::ReserveLoadBalancerReply {
            token,
            lb_id,
            sync_ip_address: self.config.sync_address.clone(),
            sync_udp_port: u32::from(self.config.sync_port),
            data_ipv4_address: self.config.data_ipv4.clone(),
            data_ipv6_address: self.config.data_ipv6.clone(),
        }
    }
}

impl From<RegistryError> for Status {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownSession(_) => Status::not_found(e.to_string()),
            RegistryError::WrongLoadBalancer(..) | RegistryError::BadToken(_) => {
                Status::permission_denied(e.to_string())
            }
            RegistryError::InvalidPort(_) => Status::invalid_argument(e.to_string()),
            RegistryError::Token(_) => Status::internal(e.to_string()),
        }
    }
}

impl From<InstanceError> for Status {
    fn from(e: InstanceError) -> Self {
        match e {
            InstanceError::BadToken => Status::permission_denied(e.to_string()),
            InstanceError::EmptyName | InstanceError::UntilInPast { .. } => {
                Status::invalid_argument(e.to_string())
            }
            InstanceError::NameTaken(_) => Status::already_exists(e.to_string()),
            InstanceError::UnknownLb(_) => Status::not_found(e.to_string()),
            InstanceError::Token(_) => Status::internal(e.to_string()),
        }
    }
}

#[tonic::async_trait]
impl LoadBalancer for ControlPlaneServer {
    async fn register(
        &self,
        request: Request<proto::RegisterRequest>,
    ) -> Result<Response<proto::RegisterReply>, Status> {
        let req = request.into_inner();
        self.authorize(&req.lb_id, &req.token)?;

        if req.name.is_empty() {
            return Err(Status::invalid_argument("backend name must not be empty"));
        }
        if !req.weight.is_finite() || req.weight < 0.0 {
            return Err(Status::invalid_argument(format!("invalid weight {}", req.weight)));
        }
        let port_range = PortRange::from_exponent(req.port_range).ok_or_else(|| {
            Status::invalid_argument(format!("invalid port range exponent {}", req.port_range))
        })?;
        if req.udp_port == 0 || req.udp_port > u32::from(u16::MAX) {
            return Err(Status::invalid_argument(format!("invalid udp port {}", req.udp_port)));
        }

        let session = self.registry.register(&req, port_range)?;
        Ok(Response::new(proto::RegisterReply {
            token: session.session_token,
            session_id: session.session_id,
        }))
    }

    async fn deregister(
        &self,
        request: Request<proto::DeregisterRequest>,
    ) -> Result<Response<proto::DeregisterReply>, Status> {
        let req = request.into_inner();
        self.registry
            .deregister(&req.session_id, &req.lb_id, &req.token)?;
        Ok(Response::new(proto::DeregisterReply {}))
    }

    async fn send_state(
        &self,
        request: Request<proto::SendStateRequest>,
    ) -> Result<Response<proto::SendStateReply>, Status> {
        let req = request.into_inner();
        self.registry.update(&req)?;
        Ok(Response::new(proto::SendStateReply {}))
    }

    async fn reserve_load_balancer(
        &self,
        request: Request<proto::ReserveLoadBalancerRequest>,
    ) -> Result<Response<proto::ReserveLoadBalancerReply>, Status> {
        let req = request.into_inner();
        let until = req
            .until
            .as_ref()
            .map(|ts| ts.seconds)
            .ok_or_else(|| Status::invalid_argument("reservation end time is required"))?;

        let instance = self
            .instances
            .reserve(&req.token, &req.name, until, epoch_secs())?;
        Ok(Response::new(self.grant_reply(instance.lb_id, instance.token)))
    }

    async fn free_load_balancer(
        &self,
        request: Request<proto::FreeLoadBalancerRequest>,
    ) -> Result<Response<proto::FreeLoadBalancerReply>, Status> {
        let req = request.into_inner();
        if self.instances.free(&req.token, &req.lb_id)?.is_some() {
            self.registry.remove_lb(&req.lb_id);
        }
        Ok(Response::new(proto::FreeLoadBalancerReply {}))
    }

    async fn load_balancer_status(
        &self,
        request: Request<proto::LoadBalancerStatusRequest>,
    ) -> Result<Response<proto::LoadBalancerStatusReply>, Status> {
        let req = request.into_inner();
        self.authorize(&req.lb_id, &req.token)?;

        let records = self.registry.snapshot(&req.lb_id);
        let slots = assign_slots(&records);
        let workers = records
            .iter()
            .zip(slots)
            .map(|(record, slots)| record.worker_status(slots))
            .collect();

        Ok(Response::new(proto::LoadBalancerStatusReply {
            timestamp: Some(now_timestamp()),
            workers,
        }))
    }

    async fn get_load_balancer(
        &self,
        request: Request<proto::GetLoadBalancerRequest>,
    ) -> Result<Response<proto::ReserveLoadBalancerReply>, Status> {
        let req = request.into_inner();
        let instance = self.authorize(&req.lb_id, &req.token)?;
        // Lookups never hand out the instance token.
        Ok(Response::new(self.grant_reply(instance.lb_id, String::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::timestamp_from_secs;

    fn server() -> ControlPlaneServer {
        ControlPlaneServer::new(ServerConfig {
            admin_token: "admin".into(),
            sync_address: "10.0.0.1".into(),
            sync_port: 18000,
            data_ipv4: "10.0.0.5".into(),
            data_ipv6: "fd00::5".into(),
            ..ServerConfig::default()
        })
    }

    async fn reserve(server: &ControlPlaneServer, name: &str) -> proto::ReserveLoadBalancerReply {
        server
            .reserve_load_balancer(Request::new(proto::ReserveLoadBalancerRequest {
                token: "admin".into(),
                name: name.into(),
                until: Some(timestamp_from_secs(epoch_secs() + 3600)),
            }))
            .await
            .unwrap()
            .into_inner()
    }

    fn register_request(lb_id: &str, token: &str, name: &str) -> proto::RegisterRequest {
        proto::RegisterRequest {
            token: token.into(),
            name: name.into(),
            lb_id: lb_id.into(),
            weight: 1.0,
            ip_address: "10.0.0.20".into(),
            udp_port: 17750,
            port_range: 2,
        }
    }

    #[tokio::test]
    async fn reserve_returns_configured_endpoints() {
        let server = server();
        let reply = reserve(&server, "test").await;
        assert_eq!(reply.lb_id, "lb1");
        assert_eq!(reply.sync_ip_address, "10.0.0.1");
        assert_eq!(reply.sync_udp_port, 18000);
        assert_eq!(reply.data_ipv4_address, "10.0.0.5");
        assert_eq!(reply.data_ipv6_address, "fd00::5");
        assert!(!reply.token.is_empty());
    }

    #[tokio::test]
    async fn reserve_status_codes() {
        let server = server();
        let past = server
            .reserve_load_balancer(Request::new(proto::ReserveLoadBalancerRequest {
                token: "admin".into(),
                name: "test".into(),
                until: Some(timestamp_from_secs(epoch_secs() - 10)),
            }))
            .await
            .unwrap_err();
        assert_eq!(past.code(), tonic::Code::InvalidArgument);

        let missing = server
            .reserve_load_balancer(Request::new(proto::ReserveLoadBalancerRequest {
                token: "admin".into(),
                name: "test".into(),
                until: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), tonic::Code::InvalidArgument);

        reserve(&server, "test").await;
        let taken = server
            .reserve_load_balancer(Request::new(proto::ReserveLoadBalancerRequest {
                token: "admin".into(),
                name: "test".into(),
                until: Some(timestamp_from_secs(epoch_secs() + 60)),
            }))
            .await
            .unwrap_err();
        assert_eq!(taken.code(), tonic::Code::AlreadyExists);
    }

    #[tokio::test]
    async fn register_accepts_instance_token() {
        let server = server();
        let lb = reserve(&server, "test").await;

        let reply = server
            .register(Request::new(register_request(&lb.lb_id, &lb.token, "be-1")))
            .await
            .unwrap()
            .into_inner();
        assert!(!reply.session_id.is_empty());

        let record = server.registry().get(&lb.lb_id, "be-1").unwrap();
        assert_eq!(record.port_range().port_count(), 4);
        assert_eq!(record.token(), lb.token);
    }

    #[tokio::test]
    async fn register_rejects_bad_token_and_unknown_lb() {
        let server = server();
        let lb = reserve(&server, "test").await;

        let denied = server
            .register(Request::new(register_request(&lb.lb_id, "nope", "be-1")))
            .await
            .unwrap_err();
        assert_eq!(denied.code(), tonic::Code::PermissionDenied);

        let unknown = server
            .register(Request::new(register_request("lb99", "admin", "be-1")))
            .await
            .unwrap_err();
        assert_eq!(unknown.code(), tonic::Code::NotFound);

        let mut bad_range = register_request(&lb.lb_id, "admin", "be-1");
        bad_range.port_range = 15;
        let invalid = server.register(Request::new(bad_range)).await.unwrap_err();
        assert_eq!(invalid.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn free_drops_sessions() {
        let server = server();
        let lb = reserve(&server, "test").await;
        server
            .register(Request::new(register_request(&lb.lb_id, "admin", "be-1")))
            .await
            .unwrap();

        server
            .free_load_balancer(Request::new(proto::FreeLoadBalancerRequest {
                token: "admin".into(),
                lb_id: lb.lb_id.clone(),
            }))
            .await
            .unwrap();
        assert_eq!(server.registry().session_count(), 0);

        // Second free is still fine.
        server
            .free_load_balancer(Request::new(proto::FreeLoadBalancerRequest {
                token: "admin".into(),
                lb_id: lb.lb_id.clone(),
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_reservation_rejected_before_sweep() {
        let server = server();
        let now = epoch_secs();
        let lb = server.instances().reserve("admin", "short", now - 5, now - 10).unwrap();

        let register = server
            .register(Request::new(register_request(&lb.lb_id, &lb.token, "be-1")))
            .await
            .unwrap_err();
        assert_eq!(register.code(), tonic::Code::NotFound);

        let status = server
            .load_balancer_status(Request::new(proto::LoadBalancerStatusRequest {
                token: "admin".into(),
                lb_id: lb.lb_id.clone(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let lookup = server
            .get_load_balancer(Request::new(proto::GetLoadBalancerRequest {
                token: "admin".into(),
                lb_id: lb.lb_id.clone(),
            }))
            .await
            .unwrap_err();
        assert_eq!(lookup.code(), tonic::Code::NotFound);
        assert_eq!(server.registry().session_count(), 0);
    }

    #[tokio::test]
    async fn zero_sweep_interval_is_clamped() {
        let server = ControlPlaneServer::new(ServerConfig {
            sweep_interval: Duration::ZERO,
            ..ServerConfig::default()
        });
        let (tx, rx) = watch::channel(false);

        let sweeper = server.clone();
        let handle = tokio::spawn(async move { sweeper.run_sweep(rx).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn get_load_balancer_hides_instance_token() {
        let server = server();
        let lb = reserve(&server, "test").await;
        let reply = server
            .get_load_balancer(Request::new(proto::GetLoadBalancerRequest {
                token: "admin".into(),
                lb_id: lb.lb_id.clone(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.lb_id, lb.lb_id);
        assert!(reply.token.is_empty());
        assert_eq!(reply.sync_ip_address, "10.0.0.1");
    }

    #[tokio::test]
    async fn status_lists_workers_with_slots() {
        let server = server();
        let lb = reserve(&server, "test").await;
        let session = server
            .register(Request::new(register_request(&lb.lb_id, "admin", "be-1")))
            .await
            .unwrap()
            .into_inner();
        server
            .send_state(Request::new(proto::SendStateRequest {
                token: session.token.clone(),
                lb_id: lb.lb_id.clone(),
                session_id: session.session_id.clone(),
                timestamp: Some(now_timestamp()),
                fill_percent: 0.25,
                control_signal: 0.1,
                is_ready: true,
            }))
            .await
            .unwrap();

        let status = server
            .load_balancer_status(Request::new(proto::LoadBalancerStatusRequest {
                token: "admin".into(),
                lb_id: lb.lb_id.clone(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(status.workers.len(), 1);
        let worker = &status.workers[0];
        assert_eq!(worker.name, "be-1");
        assert_eq!(worker.fill_percent, 0.25);
        assert_eq!(worker.slots_assigned, CALENDAR_SLOTS);
        assert!(worker.last_updated.is_some());
    }

    #[test]
    fn sweep_reaps_expired_reservations() {
        let server = server();
        let now = epoch_secs();
        let lb = server.instances().reserve("admin", "short", now + 1, now).unwrap();
        server
            .registry()
            .register(&register_request(&lb.lb_id, "admin", "be-1"), PortRange::SINGLE)
            .unwrap();

        assert_eq!(server.sweep_at(now), SweepOutcome::default());

        let outcome = server.sweep_at(now + 5);
        assert_eq!(outcome.expired, vec![lb.lb_id.clone()]);
        assert!(server.instances().is_empty());
        assert_eq!(server.registry().session_count(), 0);
    }

    #[test]
    fn listen_addr_brackets_ipv6() {
        let config = ServerConfig {
            listen_address: "::1".into(),
            listen_port: 18347,
            ..ServerConfig::default()
        };
        assert_eq!(config.listen_addr().unwrap().to_string(), "[::1]:18347");
    }
}
