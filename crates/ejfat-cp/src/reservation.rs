//! LB reservation client: the administrator's side of the control plane
//! protocol.
//!
//! An `LbReservation` claims a whole LB instance until an expiry instant,
//! polls aggregate backend status, and frees the instance:
//!
//! ```text
//! Unreserved ──reserve()──▶ Active{until} ──free()──▶ Released
//!                              │  ▲
//!                              └──┘ status()
//! ```
//!
//! Validity is derived on every read: a reservation is live only while it
//! is `Active` and the wall clock has not passed `until`.
//!
//! One-shot variants ([`reserve_uri`], [`free_load_balancer`],
//! [`load_balancer_status`], [`get_lb_uri`]) open a channel, perform a
//! single RPC and drop it. The URI-producing ones resolve the control
//! plane address first and emit no log output on success, so their result
//! can be captured straight into a connection string.

use std::collections::HashMap;
use std::net::IpAddr;

use prost_types::Timestamp;
use serde::Serialize;
use tonic::Status;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::proto;
use crate::resolve::{AddressFamily, AddressResolver};
use crate::time::{epoch_secs, timestamp_from_secs, timestamp_millis};
use crate::transport::{Connection, connect};
use crate::uri::{DEFAULT_DATA_PORT, EjfatUri, HostPort};

/// Per-backend stats from the last status poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStats {
    pub fill_percent: f32,
    pub control_signal: f32,
    pub slots_assigned: u32,
    /// Timestamp carried by the backend's last report.
    #[serde(skip)]
    pub last_updated: Option<Timestamp>,
    /// `last_updated` in epoch milliseconds, 0 if never reported.
    pub update_time: i64,
}

impl ClientStats {
    /// Multi-line, indented description.
    pub fn describe(&self, indent: &str) -> String {
        format!(
            "{indent}fill % :         {}\n\
             {indent}control sig :    {}\n\
             {indent}slots assigned : {}\n\
             {indent}update time :    {}\n",
            self.fill_percent, self.control_signal, self.slots_assigned, self.update_time
        )
    }
}

impl From<&proto::WorkerStatus> for ClientStats {
    fn from(worker: &proto::WorkerStatus) -> Self {
        Self {
            fill_percent: worker.fill_percent,
            control_signal: worker.control_signal,
            slots_assigned: worker.slots_assigned,
            last_updated: worker.last_updated.clone(),
            update_time: worker.last_updated.as_ref().map(timestamp_millis).unwrap_or(0),
        }
    }
}

/// Replace the stats entry of every worker in a status reply.
///
/// Entries are overwritten whole, never merged, and never removed: a
/// backend that stops appearing keeps its last (stale) entry.
pub fn apply_status(stats: &mut HashMap<String, ClientStats>, reply: &proto::LoadBalancerStatusReply) {
    for worker in &reply.workers {
        stats.insert(worker.name.clone(), ClientStats::from(worker));
    }
}

/// Connection parameters granted by a reservation or lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub lb_id: String,
    /// Instance token; empty for lookups.
    pub instance_token: String,
    pub sync: HostPort,
    pub data_ipv4: String,
    pub data_ipv6: String,
}

impl Grant {
    /// Build from a reply, substituting `cp_address` for an empty or
    /// malformed sync address. Sync traffic originates on the control plane
    /// host.
    ///
    /// A sync port outside the UDP range is rejected as a malformed reply.
    pub fn from_reply(reply: proto::ReserveLoadBalancerReply, cp_address: &str) -> Result<Self, Status> {
        let sync_port = u16::try_from(reply.sync_udp_port).map_err(|_| {
            Status::invalid_argument(format!("sync port {} out of range", reply.sync_udp_port))
        })?;
        let sync_address = if reply.sync_ip_address.parse::<IpAddr>().is_ok() {
            reply.sync_ip_address
        } else {
            cp_address.to_string()
        };

        Ok(Self {
            lb_id: reply.lb_id,
            instance_token: reply.token,
            sync: HostPort::new(sync_address, sync_port),
            data_ipv4: reply.data_ipv4_address,
            data_ipv6: reply.data_ipv6_address,
        })
    }

    /// LB data address for `family`, falling back to IPv4.
    pub fn data_address(&self, family: AddressFamily) -> &str {
        match family {
            AddressFamily::V6 if !self.data_ipv6.is_empty() => &self.data_ipv6,
            _ => &self.data_ipv4,
        }
    }

    /// Connection URI for this grant. Carries the instance token when
    /// `with_token` is set and the grant has one. The `data` parameter is
    /// omitted when the control plane handed out no data address.
    pub fn uri(&self, cp_host: &str, cp_port: u16, family: AddressFamily, with_token: bool) -> EjfatUri {
        let token = (with_token && !self.instance_token.is_empty()).then(|| self.instance_token.clone());
        EjfatUri {
            token,
            cp_host: cp_host.to_string(),
            cp_port,
            lb_id: self.lb_id.clone(),
            data: Some(self.data_address(family))
                .filter(|addr| !addr.is_empty())
                .map(|addr| HostPort::new(addr, DEFAULT_DATA_PORT)),
            sync: Some(self.sync.clone()),
        }
    }
}

/// Lifecycle of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservationState {
    #[default]
    Unreserved,
    /// Granted, valid until the given epoch second.
    Active { until: i64 },
    /// Freed by this client.
    Released,
}

/// Client holding one LB reservation.
///
/// Not shareable across tasks.
#[derive(Debug)]
pub struct LbReservation {
    conn: Connection,
    lb_name: String,
    admin_token: String,
    /// Requested expiry, epoch seconds.
    until: i64,
    state: ReservationState,
    grant: Option<Grant>,
    client_stats: HashMap<String, ClientStats>,
}

impl LbReservation {
    /// Create a client. No connection is made until the first RPC.
    pub fn new(
        cp_address: impl Into<String>,
        cp_port: u16,
        lb_name: impl Into<String>,
        admin_token: impl Into<String>,
        until_secs: i64,
    ) -> Self {
        Self {
            conn: Connection::new(cp_address, cp_port),
            lb_name: lb_name.into(),
            admin_token: admin_token.into(),
            until: until_secs,
            state: ReservationState::Unreserved,
            grant: None,
            client_stats: HashMap::new(),
        }
    }

    /// Reserve the LB until the configured expiry.
    ///
    /// An expiry already in the past is rejected locally. On any failure the
    /// previous reservation state is left intact.
    pub async fn reserve(&mut self) -> ClientResult<&Grant> {
        if self.until <= epoch_secs() {
            return Err(ClientError::ReservationExpired {
                name: self.lb_name.clone(),
                until: self.until,
            });
        }

        let request = proto::ReserveLoadBalancerRequest {
            token: self.admin_token.clone(),
            name: self.lb_name.clone(),
            until: Some(timestamp_from_secs(self.until)),
        };

        let client = self
            .conn
            .get()
            .await
            .map_err(ClientError::ReservationFailed)?;

        let reply = match client.reserve_load_balancer(request).await {
            Ok(resp) => resp.into_inner(),
            Err(status) => {
                self.conn.reset();
                warn!(lb_name = %self.lb_name, error = %status, "reservation failed");
                return Err(ClientError::ReservationFailed(status));
            }
        };

        let grant = Grant::from_reply(reply, self.conn.host()).map_err(|status| {
            warn!(lb_name = %self.lb_name, error = %status, "malformed reservation reply");
            ClientError::ReservationFailed(status)
        })?;
        info!(
            lb_name = %self.lb_name,
            lb_id = %grant.lb_id,
            until = self.until,
            "reserved load balancer"
        );

        self.state = ReservationState::Active { until: self.until };
        Ok(self.grant.insert(grant))
    }

    /// Release the reservation.
    ///
    /// Freeing twice is harmless: the control plane treats it as a no-op.
    pub async fn free(&mut self) -> ClientResult<()> {
        let lb_id = self.granted_lb_id()?;

        let request = proto::FreeLoadBalancerRequest {
            token: self.admin_token.clone(),
            lb_id: lb_id.clone(),
        };

        let client = self.conn.get().await.map_err(ClientError::FreeFailed)?;

        if let Err(status) = client.free_load_balancer(request).await {
            self.conn.reset();
            warn!(%lb_id, error = %status, "free failed");
            return Err(ClientError::FreeFailed(status));
        }

        info!(%lb_id, lb_name = %self.lb_name, "freed load balancer");
        self.state = ReservationState::Released;
        Ok(())
    }

    /// Poll backend status and refresh the client stats map.
    ///
    /// Requires a live reservation; an elapsed one is rejected locally.
    pub async fn status(&mut self) -> ClientResult<&HashMap<String, ClientStats>> {
        let lb_id = self.granted_lb_id()?;
        match self.state {
            ReservationState::Active { .. } if self.reservation_elapsed() => {
                return Err(ClientError::ReservationExpired {
                    name: self.lb_name.clone(),
                    until: self.until,
                });
            }
            ReservationState::Active { .. } => {}
            _ => return Err(ClientError::NotReserved(self.lb_name.clone())),
        }

        let request = proto::LoadBalancerStatusRequest {
            token: self.admin_token.clone(),
            lb_id,
        };

        let client = self.conn.get().await.map_err(ClientError::StatusFailed)?;

        let reply = match client.load_balancer_status(request).await {
            Ok(resp) => resp.into_inner(),
            Err(status) => {
                self.conn.reset();
                warn!(lb_name = %self.lb_name, error = %status, "status query failed");
                return Err(ClientError::StatusFailed(status));
            }
        };

        debug!(lb_name = %self.lb_name, workers = reply.workers.len(), "status received");
        apply_status(&mut self.client_stats, &reply);
        Ok(&self.client_stats)
    }

    /// True once the wall clock is past the requested expiry.
    pub fn reservation_elapsed(&self) -> bool {
        epoch_secs() > self.until
    }

    /// True while a reservation is held and has not expired.
    pub fn reserved(&self) -> bool {
        matches!(self.state, ReservationState::Active { .. }) && !self.reservation_elapsed()
    }

    /// Connection URI for the held reservation.
    pub fn uri(&self, family: AddressFamily) -> ClientResult<EjfatUri> {
        let grant = self
            .grant
            .as_ref()
            .ok_or_else(|| ClientError::NotReserved(self.lb_name.clone()))?;
        Ok(grant.uri(self.conn.host(), self.conn.port(), family, true))
    }

    fn granted_lb_id(&self) -> ClientResult<String> {
        self.grant
            .as_ref()
            .map(|g| g.lb_id.clone())
            .ok_or_else(|| ClientError::NotReserved(self.lb_name.clone()))
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    pub fn grant(&self) -> Option<&Grant> {
        self.grant.as_ref()
    }

    pub fn lb_name(&self) -> &str {
        &self.lb_name
    }

    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    pub fn until(&self) -> i64 {
        self.until
    }

    pub fn cp_address(&self) -> &str {
        self.conn.host()
    }

    pub fn cp_port(&self) -> u16 {
        self.conn.port()
    }

    pub fn data_port(&self) -> u16 {
        DEFAULT_DATA_PORT
    }

    pub fn client_stats(&self) -> &HashMap<String, ClientStats> {
        &self.client_stats
    }
}

/// Reserve an LB in one call and return its token-bearing URI.
pub async fn reserve_uri(
    cp_address: &str,
    cp_port: u16,
    lb_name: &str,
    admin_token: &str,
    until_secs: i64,
    family: AddressFamily,
) -> ClientResult<EjfatUri> {
    if until_secs <= epoch_secs() {
        return Err(ClientError::ReservationExpired {
            name: lb_name.to_string(),
            until: until_secs,
        });
    }

    let cp_host = AddressResolver::new().resolve_for(cp_address, family).await?;
    let mut client = connect(&cp_host, cp_port)
        .await
        .map_err(ClientError::ReservationFailed)?;

    let reply = client
        .reserve_load_balancer(proto::ReserveLoadBalancerRequest {
            token: admin_token.to_string(),
            name: lb_name.to_string(),
            until: Some(timestamp_from_secs(until_secs)),
        })
        .await
        .map_err(ClientError::ReservationFailed)?
        .into_inner();

    let grant = Grant::from_reply(reply, &cp_host).map_err(ClientError::ReservationFailed)?;
    Ok(grant.uri(&cp_host, cp_port, family, true))
}

/// Look up an already reserved LB and return its token-less URI.
pub async fn get_lb_uri(
    cp_address: &str,
    cp_port: u16,
    lb_id: &str,
    admin_token: &str,
    family: AddressFamily,
) -> ClientResult<EjfatUri> {
    let cp_host = AddressResolver::new().resolve_for(cp_address, family).await?;
    let mut client = connect(&cp_host, cp_port)
        .await
        .map_err(ClientError::LookupFailed)?;

    let reply = client
        .get_load_balancer(proto::GetLoadBalancerRequest {
            token: admin_token.to_string(),
            lb_id: lb_id.to_string(),
        })
        .await
        .map_err(ClientError::LookupFailed)?
        .into_inner();

    let grant = Grant::from_reply(reply, &cp_host).map_err(ClientError::LookupFailed)?;
    Ok(grant.uri(&cp_host, cp_port, family, false))
}

/// Free an LB in one call.
pub async fn free_load_balancer(
    cp_address: &str,
    cp_port: u16,
    lb_id: &str,
    admin_token: &str,
) -> ClientResult<()> {
    let mut client = connect(cp_address, cp_port)
        .await
        .map_err(ClientError::FreeFailed)?;

    client
        .free_load_balancer(proto::FreeLoadBalancerRequest {
            token: admin_token.to_string(),
            lb_id: lb_id.to_string(),
        })
        .await
        .map_err(ClientError::FreeFailed)?;

    info!(%lb_id, "freed load balancer");
    Ok(())
}

/// Poll an LB's backend status in one call, replacing entries in `stats`.
pub async fn load_balancer_status(
    cp_address: &str,
    cp_port: u16,
    lb_id: &str,
    admin_token: &str,
    stats: &mut HashMap<String, ClientStats>,
) -> ClientResult<()> {
    let mut client = connect(cp_address, cp_port)
        .await
        .map_err(ClientError::StatusFailed)?;

    let reply = client
        .load_balancer_status(proto::LoadBalancerStatusRequest {
            token: admin_token.to_string(),
            lb_id: lb_id.to_string(),
        })
        .await
        .map_err(ClientError::StatusFailed)?
        .into_inner();

    apply_status(stats, &reply);
    Ok(())
}
