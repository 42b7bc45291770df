//! Session registry: tracks registered backends per LB.
//!
//! A concurrent mapping from LB id and backend name to session record,
//! indexed by session id for telemetry and deregistration. Everything
//! lives behind one lock so a status query sees a consistent snapshot.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::BackendRecord;
use crate::proto::{RegisterRequest, SendStateRequest};
use crate::time::epoch_millis;
use crate::types::PortRange;

/// Slots in an LB's schedule calendar.
pub const CALENDAR_SLOTS: u32 = 512;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session {0} does not belong to load balancer {1}")]
    WrongLoadBalancer(String, String),

    #[error("bad session token for session {0}")]
    BadToken(String),

    #[error("udp port {0} out of range")]
    InvalidPort(u32),

    #[error("token generation failed: {0}")]
    Token(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Default)]
struct Inner {
    /// lb_id → backend name → record.
    backends: HashMap<String, HashMap<String, BackendRecord>>,
    /// session_id → (lb_id, backend name).
    sessions: HashMap<String, (String, String)>,
}

/// Issued session credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub session_id: String,
    pub session_token: String,
}

/// Registered backends of every LB served by this control plane.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    next_session: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Register a backend and issue a fresh session.
    ///
    /// Registering a name that already holds a session replaces it; the old
    /// session id stops working.
    pub fn register(&self, req: &RegisterRequest, port_range: PortRange) -> RegistryResult<IssuedSession> {
        let udp_port = u16::try_from(req.udp_port).map_err(|_| RegistryError::InvalidPort(req.udp_port))?;
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed).to_string();
        let session_token = generate_token().map_err(RegistryError::Token)?;

        let record = BackendRecord::new(req, udp_port, port_range, session_id.clone(), session_token.clone());

        let mut inner = self.inner.write().expect("registry lock");
        let previous = inner
            .backends
            .entry(req.lb_id.clone())
            .or_default()
            .insert(req.name.clone(), record);
        if let Some(old) = previous {
            inner.sessions.remove(old.session_id());
            info!(name = %req.name, lb_id = %req.lb_id, old_session = %old.session_id(), "backend re-registered");
        }
        inner
            .sessions
            .insert(session_id.clone(), (req.lb_id.clone(), req.name.clone()));

        info!(name = %req.name, lb_id = %req.lb_id, %session_id, "backend registered");
        Ok(IssuedSession {
            session_id,
            session_token,
        })
    }

    /// Record a telemetry report.
    pub fn update(&self, state: &SendStateRequest) -> RegistryResult<()> {
        let mut inner = self.inner.write().expect("registry lock");
        let record = lookup_mut(&mut inner, &state.session_id, &state.lb_id, &state.token)?;
        record.update(state);
        debug!(name = %record.name(), fill = state.fill_percent, "state received");
        Ok(())
    }

    /// Remove a session.
    pub fn deregister(&self, session_id: &str, lb_id: &str, token: &str) -> RegistryResult<()> {
        let mut inner = self.inner.write().expect("registry lock");
        let name = lookup_mut(&mut inner, session_id, lb_id, token)?.name().to_string();

        inner.sessions.remove(session_id);
        if let Some(lb) = inner.backends.get_mut(lb_id) {
            lb.remove(&name);
            if lb.is_empty() {
                inner.backends.remove(lb_id);
            }
        }
        info!(%name, %lb_id, %session_id, "backend deregistered");
        Ok(())
    }

    /// Drop every session of an LB. Returns how many were removed.
    pub fn remove_lb(&self, lb_id: &str) -> usize {
        let mut inner = self.inner.write().expect("registry lock");
        let Some(lb) = inner.backends.remove(lb_id) else {
            return 0;
        };
        for record in lb.values() {
            inner.sessions.remove(record.session_id());
        }
        if !lb.is_empty() {
            info!(%lb_id, sessions = lb.len(), "dropped sessions of freed load balancer");
        }
        lb.len()
    }

    /// Clear the active flag of sessions whose last report arrived more than
    /// `stale_after` ago. Returns the names newly marked inactive.
    pub fn mark_stale(&self, stale_after: Duration) -> Vec<String> {
        let cutoff = epoch_millis() - stale_after.as_millis() as i64;
        let mut inner = self.inner.write().expect("registry lock");
        let mut stale = Vec::new();

        for record in inner.backends.values_mut().flat_map(|lb| lb.values_mut()) {
            if record.is_active() && record.local_time() < cutoff {
                record.set_active(false);
                warn!(name = %record.name(), lb_id = %record.lb_id(), "backend stopped reporting");
                stale.push(record.name().to_string());
            }
        }
        stale
    }

    /// Consistent snapshot of an LB's backends, sorted by name.
    pub fn snapshot(&self, lb_id: &str) -> Vec<BackendRecord> {
        let inner = self.inner.read().expect("registry lock");
        let mut records: Vec<BackendRecord> = inner
            .backends
            .get(lb_id)
            .map(|lb| lb.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.name().cmp(b.name()));
        records
    }

    /// Look up a backend by LB and name.
    pub fn get(&self, lb_id: &str, name: &str) -> Option<BackendRecord> {
        let inner = self.inner.read().expect("registry lock");
        inner.backends.get(lb_id)?.get(name).cloned()
    }

    /// Number of live sessions across all LBs.
    pub fn session_count(&self) -> usize {
        self.inner.read().expect("registry lock").sessions.len()
    }

    #[cfg(test)]
    pub(crate) fn with_record_mut(&self, lb_id: &str, name: &str, f: impl FnOnce(&mut BackendRecord)) {
        let mut inner = self.inner.write().expect("registry lock");
        if let Some(record) = inner.backends.get_mut(lb_id).and_then(|lb| lb.get_mut(name)) {
            f(record);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Slots assigned to each record: the calendar split by weight among
/// active, ready backends. Others get none.
pub fn assign_slots(records: &[BackendRecord]) -> Vec<u32> {
    let eligible = |r: &BackendRecord| r.is_active() && r.is_ready() && r.weight() > 0.0;
    let total: f64 = records
        .iter()
        .filter(|r| eligible(r))
        .map(|r| f64::from(r.weight()))
        .sum();

    records
        .iter()
        .map(|r| {
            if total > 0.0 && eligible(r) {
                (f64::from(CALENDAR_SLOTS) * f64::from(r.weight()) / total).round() as u32
            } else {
                0
            }
        })
        .collect()
}

fn lookup_mut<'a>(
    inner: &'a mut Inner,
    session_id: &str,
    lb_id: &str,
    token: &str,
) -> RegistryResult<&'a mut BackendRecord> {
    let (owner_lb, name) = inner
        .sessions
        .get(session_id)
        .ok_or_else(|| RegistryError::UnknownSession(session_id.to_string()))?;
    if owner_lb != lb_id {
        return Err(RegistryError::WrongLoadBalancer(
            session_id.to_string(),
            lb_id.to_string(),
        ));
    }
    let record = inner
        .backends
        .get_mut(lb_id)
        .and_then(|lb| lb.get_mut(name))
        .ok_or_else(|| RegistryError::UnknownSession(session_id.to_string()))?;
    if record.session_token() != token {
        return Err(RegistryError::BadToken(session_id.to_string()));
    }
    Ok(record)
}

/// 128 random bits, hex-encoded.
pub(crate) fn generate_token() -> Result<String, String> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).map_err(|e| e.to_string())?;
    Ok(hex::encode(bytes))
}
