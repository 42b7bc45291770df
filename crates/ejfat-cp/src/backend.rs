//! Session record: the control plane's view of one registered backend.
//!
//! Identity, endpoint and weight are fixed at registration. Telemetry
//! updates only touch the report fields. Both the backend-reported and the
//! locally observed report times are kept so clock skew between a backend
//! and the control plane stays diagnosable.

use prost_types::Timestamp;

use crate::proto::{RegisterRequest, SendStateRequest, WorkerStatus};
use crate::time::{epoch_millis, timestamp_millis};
use crate::types::PortRange;

/// Server-side state of a single registered backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRecord {
    // Set at registration.
    token: String,
    session_id: String,
    session_token: String,
    name: String,
    lb_id: String,
    weight: f32,
    ip_address: String,
    udp_port: u16,
    port_range: PortRange,

    // Last report.
    timestamp: Option<Timestamp>,
    /// `timestamp` in epoch milliseconds.
    time: i64,
    /// Epoch milliseconds when the last report arrived here.
    local_time: i64,
    fill_percent: f32,
    control_signal: f32,
    is_ready: bool,

    /// Reported on time. Cleared by the liveness sweep.
    is_active: bool,
}

impl BackendRecord {
    /// Build a record from a registration request and the issued session.
    ///
    /// The registration instant counts as the first local observation.
    pub fn new(
        req: &RegisterRequest,
        udp_port: u16,
        port_range: PortRange,
        session_id: String,
        session_token: String,
    ) -> Self {
        Self {
            token: req.token.clone(),
            session_id,
            session_token,
            name: req.name.clone(),
            lb_id: req.lb_id.clone(),
            weight: req.weight,
            ip_address: req.ip_address.clone(),
            udp_port,
            port_range,
            timestamp: None,
            time: 0,
            local_time: epoch_millis(),
            fill_percent: 0.0,
            control_signal: 0.0,
            is_ready: false,
            is_active: true,
        }
    }

    /// Record a telemetry report.
    ///
    /// A report without a timestamp keeps the previous reported time.
    pub fn update(&mut self, state: &SendStateRequest) {
        if let Some(ts) = &state.timestamp {
            self.time = timestamp_millis(ts);
            self.timestamp = Some(ts.clone());
        }
        self.local_time = epoch_millis();
        self.fill_percent = state.fill_percent;
        self.control_signal = state.control_signal;
        self.is_ready = state.is_ready;
        self.is_active = true;
    }

    /// Status entry for this backend.
    pub fn worker_status(&self, slots_assigned: u32) -> WorkerStatus {
        WorkerStatus {
            name: self.name.clone(),
            fill_percent: self.fill_percent,
            control_signal: self.control_signal,
            slots_assigned,
            last_updated: self.timestamp.clone(),
        }
    }

    /// Token presented at registration (admin or instance).
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lb_id(&self) -> &str {
        &self.lb_id
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn port_range(&self) -> PortRange {
        self.port_range
    }

    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.timestamp.as_ref()
    }

    /// Backend-reported time of the last report, epoch milliseconds.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Local arrival time of the last report, epoch milliseconds.
    pub fn local_time(&self) -> i64 {
        self.local_time
    }

    pub fn fill_percent(&self) -> f32 {
        self.fill_percent
    }

    pub fn control_signal(&self) -> f32 {
        self.control_signal
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    /// Milliseconds between the reported and observed times of the last
    /// report. Positive when the backend clock runs behind.
    pub fn clock_skew_millis(&self) -> Option<i64> {
        self.timestamp.as_ref().map(|_| self.local_time - self.time)
    }

    #[cfg(test)]
    pub(crate) fn set_local_time(&mut self, local_time: i64) {
        self.local_time = local_time;
    }
}
