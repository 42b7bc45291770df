//! Small domain types shared by clients, config and the control plane.

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Largest port range exponent (2^14 = 16384 ports).
pub const MAX_PORT_RANGE_EXPONENT: u8 = 14;

/// Power-of-two range of UDP ports a backend receives on, starting at its
/// base data port. Carried on the wire as the exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PortRange(u8);

impl PortRange {
    /// A single port.
    pub const SINGLE: PortRange = PortRange(0);

    /// Build from a port count, which must be a power of two in 1..=16384.
    pub fn from_port_count(count: u32) -> ClientResult<Self> {
        if !count.is_power_of_two() || count.trailing_zeros() > u32::from(MAX_PORT_RANGE_EXPONENT) {
            return Err(ClientError::InvalidPortRange(count));
        }
        Ok(PortRange(count.trailing_zeros() as u8))
    }

    /// Build from the wire exponent.
    pub fn from_exponent(exponent: i32) -> Option<Self> {
        (0..=i32::from(MAX_PORT_RANGE_EXPONENT))
            .contains(&exponent)
            .then_some(PortRange(exponent as u8))
    }

    pub fn exponent(self) -> i32 {
        i32::from(self.0)
    }

    /// Number of ports covered.
    pub fn port_count(self) -> u32 {
        1 << self.0
    }
}

impl TryFrom<u32> for PortRange {
    type Error = ClientError;

    fn try_from(count: u32) -> Result<Self, Self::Error> {
        PortRange::from_port_count(count)
    }
}

impl From<PortRange> for u32 {
    fn from(range: PortRange) -> u32 {
        range.port_count()
    }
}

/// How a backend's readiness flag is reported to the control plane.
///
/// Rapidly flapping readiness destabilizes the control plane's schedule
/// density, so operators may pin reports to ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessPolicy {
    /// Send the caller-supplied flag.
    #[default]
    AsReported,
    /// Always send ready, whatever the caller supplied.
    AlwaysReady,
}

impl ReadinessPolicy {
    /// The flag to put on the wire for a caller-supplied value.
    pub fn apply(self, ready: bool) -> bool {
        match self {
            ReadinessPolicy::AsReported => ready,
            ReadinessPolicy::AlwaysReady => true,
        }
    }
}
