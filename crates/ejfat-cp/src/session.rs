//! Backend session client: the data receiver's side of the control plane
//! protocol.
//!
//! A backend registers once, reports its fill level and control error
//! repeatedly, and deregisters at shutdown:
//!
//! ```text
//! Unregistered ──register()──▶ Registered ──deregister()──▶ Deregistered
//!                                  │  ▲
//!                                  └──┘ send_state()
//! ```
//!
//! Every method performs at most one RPC. Periodic reporting and retry
//! policy belong to the caller.

use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::proto;
use crate::time::now_timestamp;
use crate::transport::Connection;
use crate::types::{PortRange, ReadinessPolicy};
use crate::uri::EjfatUri;

/// Configuration for one backend session.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Control plane address (hostname or IP literal).
    pub cp_address: String,
    /// Control plane gRPC port.
    pub cp_port: u16,
    /// LB instance to join.
    pub lb_id: String,
    /// Admin or LB instance token presented at registration.
    pub token: String,
    /// Backend name, unique within the LB.
    pub name: String,
    /// Weight relative to the other backends in the LB's schedule density.
    pub weight: f32,
    /// Data-receiving address of this backend.
    pub data_address: String,
    /// First data-receiving UDP port.
    pub data_port: u16,
    pub port_range: PortRange,
    pub readiness: ReadinessPolicy,
}

impl BackendConfig {
    /// Seed a backend from a reservation URI.
    ///
    /// The URI supplies the control plane endpoint, LB id and instance token;
    /// the backend supplies its own name and data endpoint.
    pub fn from_uri(
        uri: &EjfatUri,
        name: impl Into<String>,
        data_address: impl Into<String>,
        data_port: u16,
    ) -> ClientResult<Self> {
        let token = uri
            .token
            .clone()
            .ok_or_else(|| ClientError::InvalidUri(format!("{uri} carries no instance token")))?;

        Ok(Self {
            cp_address: uri.cp_host.clone(),
            cp_port: uri.cp_port,
            lb_id: uri.lb_id.clone(),
            token,
            name: name.into(),
            weight: 1.0,
            data_address: data_address.into(),
            data_port,
            port_range: PortRange::SINGLE,
            readiness: ReadinessPolicy::default(),
        })
    }
}

/// Credentials issued by the control plane on registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub token: String,
}

/// Registration lifecycle of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unregistered,
    Registered(Session),
    Deregistered,
}

/// Telemetry reported on the next `send_state`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    /// Fraction of the receive queue holding unprocessed data.
    pub fill_percent: f32,
    /// Control loop error term, in units of queue fill.
    pub control_error: f32,
    /// Caller-supplied readiness, before the readiness policy is applied.
    pub ready: bool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            fill_percent: 0.0,
            control_error: 0.0,
            ready: true,
        }
    }
}

/// Client driving one backend's session with the control plane.
///
/// Not shareable across tasks; register N backends with N clients.
#[derive(Debug)]
pub struct BackendClient {
    config: BackendConfig,
    conn: Connection,
    state: SessionState,
    telemetry: Telemetry,
}

impl BackendClient {
    /// Create a client. No connection is made until the first RPC.
    pub fn new(config: BackendConfig) -> Self {
        let conn = Connection::new(config.cp_address.clone(), config.cp_port);
        Self {
            config,
            conn,
            state: SessionState::Unregistered,
            telemetry: Telemetry::default(),
        }
    }

    /// Register this backend and store the issued session.
    ///
    /// On failure the previous session state is left untouched.
    pub async fn register(&mut self) -> ClientResult<&Session> {
        let request = proto::RegisterRequest {
            token: self.config.token.clone(),
            name: self.config.name.clone(),
            lb_id: self.config.lb_id.clone(),
            weight: self.config.weight,
            ip_address: self.config.data_address.clone(),
            udp_port: u32::from(self.config.data_port),
            port_range: self.config.port_range.exponent(),
        };

        let client = self
            .conn
            .get()
            .await
            .map_err(ClientError::RegistrationFailed)?;

        let reply = match client.register(request).await {
            Ok(resp) => resp.into_inner(),
            Err(status) => {
                self.conn.reset();
                warn!(name = %self.config.name, lb_id = %self.config.lb_id, error = %status, "registration failed");
                return Err(ClientError::RegistrationFailed(status));
            }
        };

        info!(
            name = %self.config.name,
            lb_id = %self.config.lb_id,
            session_id = %reply.session_id,
            "registered with control plane"
        );

        self.state = SessionState::Registered(Session {
            id: reply.session_id,
            token: reply.token,
        });
        self.active_session()
    }

    /// Set the telemetry sent by the next report.
    pub fn update(&mut self, fill_percent: f32, control_error: f32, ready: bool) {
        self.telemetry = Telemetry {
            fill_percent,
            control_error,
            ready,
        };
    }

    /// Record new telemetry and report it.
    pub async fn send_state(
        &mut self,
        fill_percent: f32,
        control_error: f32,
        ready: bool,
    ) -> ClientResult<()> {
        self.update(fill_percent, control_error, ready);
        self.report().await
    }

    /// Report the current telemetry, stamped with the current wall clock.
    ///
    /// Fails with `NotRegistered` without touching the network unless a
    /// registration is active.
    pub async fn report(&mut self) -> ClientResult<()> {
        let session = self.active_session()?;

        let request = proto::SendStateRequest {
            token: session.token.clone(),
            lb_id: self.config.lb_id.clone(),
            session_id: session.id.clone(),
            timestamp: Some(now_timestamp()),
            fill_percent: self.telemetry.fill_percent,
            control_signal: self.telemetry.control_error,
            is_ready: self.config.readiness.apply(self.telemetry.ready),
        };

        let client = self
            .conn
            .get()
            .await
            .map_err(ClientError::StateUpdateFailed)?;

        if let Err(status) = client.send_state(request).await {
            self.conn.reset();
            warn!(name = %self.config.name, error = %status, "state update failed");
            return Err(ClientError::StateUpdateFailed(status));
        }

        debug!(
            name = %self.config.name,
            fill = self.telemetry.fill_percent,
            error = self.telemetry.control_error,
            "state sent"
        );
        Ok(())
    }

    /// End the session.
    ///
    /// A second call after a successful deregistration is a no-op. On
    /// failure the session stays registered so the caller may retry.
    pub async fn deregister(&mut self) -> ClientResult<()> {
        let session = match &self.state {
            SessionState::Registered(session) => session.clone(),
            SessionState::Deregistered => {
                debug!(name = %self.config.name, "already deregistered");
                return Ok(());
            }
            SessionState::Unregistered => {
                return Err(ClientError::NotRegistered(self.config.name.clone()));
            }
        };

        let request = proto::DeregisterRequest {
            token: session.token,
            lb_id: self.config.lb_id.clone(),
            session_id: session.id,
        };

        let client = self
            .conn
            .get()
            .await
            .map_err(ClientError::DeregistrationFailed)?;

        if let Err(status) = client.deregister(request).await {
            self.conn.reset();
            warn!(name = %self.config.name, error = %status, "deregistration failed");
            return Err(ClientError::DeregistrationFailed(status));
        }

        info!(name = %self.config.name, lb_id = %self.config.lb_id, "deregistered from control plane");
        self.state = SessionState::Deregistered;
        Ok(())
    }

    fn active_session(&self) -> ClientResult<&Session> {
        match &self.state {
            SessionState::Registered(session) => Ok(session),
            _ => Err(ClientError::NotRegistered(self.config.name.clone())),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The active session, if registered.
    pub fn session(&self) -> Option<&Session> {
        self.active_session().ok()
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.state, SessionState::Registered(_))
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn lb_id(&self) -> &str {
        &self.config.lb_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn test_config() -> BackendConfig {
        BackendConfig {
            // Nothing listens here; tests below must never connect.
            cp_address: "127.0.0.1".to_string(),
            cp_port: 1,
            lb_id: "lb7".to_string(),
            token: "admin".to_string(),
            name: "be-1".to_string(),
            weight: 1.0,
            data_address: "10.0.0.20".to_string(),
            data_port: 17750,
            port_range: PortRange::SINGLE,
            readiness: ReadinessPolicy::AsReported,
        }
    }

    #[test]
    fn client_starts_unregistered() {
        let client = BackendClient::new(test_config());
        assert_eq!(client.state(), &SessionState::Unregistered);
        assert!(client.session().is_none());
        assert_eq!(client.telemetry(), Telemetry::default());
    }

    #[test]
    fn update_sets_telemetry() {
        let mut client = BackendClient::new(test_config());
        client.update(0.4, -0.1, false);
        let t = client.telemetry();
        assert_eq!(t.fill_percent, 0.4);
        assert_eq!(t.control_error, -0.1);
        assert!(!t.ready);
    }

    #[tokio::test]
    async fn send_state_before_register_fails_fast() {
        let mut client = BackendClient::new(test_config());
        let err = client.send_state(0.5, 0.0, true).await.unwrap_err();
        assert!(matches!(err, ClientError::NotRegistered(ref n) if n == "be-1"));
        assert_eq!(err.kind(), ErrorKind::ProtocolPrecondition);
        assert!(!client.conn.is_connected());
    }

    #[tokio::test]
    async fn deregister_before_register_fails_fast() {
        let mut client = BackendClient::new(test_config());
        let err = client.deregister().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolPrecondition);
        assert!(!client.conn.is_connected());
    }

    #[tokio::test]
    async fn deregister_twice_is_noop() {
        let mut client = BackendClient::new(test_config());
        client.state = SessionState::Deregistered;
        client.deregister().await.unwrap();
        assert!(client.send_state(0.1, 0.0, true).await.is_err());
    }

    #[tokio::test]
    async fn failed_register_leaves_state_untouched() {
        let mut client = BackendClient::new(test_config());
        let err = client.register().await.unwrap_err();
        assert!(matches!(err, ClientError::RegistrationFailed(_)));
        assert_eq!(client.state(), &SessionState::Unregistered);
    }

    #[test]
    fn config_from_uri() {
        let uri: EjfatUri =
            "ejfat://tok123@10.0.0.1:18347/lb/lb7?data=10.0.0.5:19522&sync=10.0.0.1:18000"
                .parse()
                .unwrap();
        let config = BackendConfig::from_uri(&uri, "be-2", "10.0.0.21", 17750).unwrap();
        assert_eq!(config.cp_address, "10.0.0.1");
        assert_eq!(config.cp_port, 18347);
        assert_eq!(config.lb_id, "lb7");
        assert_eq!(config.token, "tok123");
        assert_eq!(config.name, "be-2");
    }

    #[test]
    fn config_from_lookup_uri_needs_token() {
        let uri: EjfatUri = "ejfat://10.0.0.1:18347/lb/lb7".parse().unwrap();
        assert!(BackendConfig::from_uri(&uri, "be-2", "10.0.0.21", 17750).is_err());
    }
}
