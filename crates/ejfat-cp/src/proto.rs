//! Wire messages and generated gRPC stubs for the `loadbalancer.LoadBalancer`
//! service.
//!
//! Backends use `Register`, `SendState` and `Deregister`; administrators use
//! `ReserveLoadBalancer`, `FreeLoadBalancer`, `LoadBalancerStatus` and
//! `GetLoadBalancer`. `GetLoadBalancer` answers with the same message shape
//! as a reservation.

pub use prost_types::Timestamp;

/// Backend registration.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterRequest {
    /// Admin or LB instance token.
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub lb_id: String,
    #[prost(float, tag = "4")]
    pub weight: f32,
    #[prost(string, tag = "5")]
    pub ip_address: String,
    #[prost(uint32, tag = "6")]
    pub udp_port: u32,
    /// Port range exponent, see [`crate::PortRange`].
    #[prost(int32, tag = "7")]
    pub port_range: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterReply {
    /// Session token.
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub session_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeregisterRequest {
    /// Session token.
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub lb_id: String,
    #[prost(string, tag = "3")]
    pub session_id: String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct DeregisterReply {}

/// Periodic backend telemetry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendStateRequest {
    /// Session token.
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub lb_id: String,
    #[prost(string, tag = "3")]
    pub session_id: String,
    /// Backend wall clock when the report was taken.
    #[prost(message, optional, tag = "4")]
    pub timestamp: Option<Timestamp>,
    #[prost(float, tag = "5")]
    pub fill_percent: f32,
    #[prost(float, tag = "6")]
    pub control_signal: f32,
    #[prost(bool, tag = "7")]
    pub is_ready: bool,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SendStateReply {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReserveLoadBalancerRequest {
    /// Admin token.
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(message, optional, tag = "3")]
    pub until: Option<Timestamp>,
}

/// Connection parameters of a reserved LB instance.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReserveLoadBalancerReply {
    /// Instance token. Empty in `GetLoadBalancer` replies.
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub lb_id: String,
    #[prost(string, tag = "3")]
    pub sync_ip_address: String,
    #[prost(uint32, tag = "4")]
    pub sync_udp_port: u32,
    #[prost(string, tag = "5")]
    pub data_ipv4_address: String,
    #[prost(string, tag = "6")]
    pub data_ipv6_address: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FreeLoadBalancerRequest {
    /// Admin token.
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub lb_id: String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct FreeLoadBalancerReply {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadBalancerStatusRequest {
    /// Admin token.
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub lb_id: String,
}

/// Server-side view of one registered backend.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerStatus {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(float, tag = "2")]
    pub fill_percent: f32,
    #[prost(float, tag = "3")]
    pub control_signal: f32,
    #[prost(uint32, tag = "4")]
    pub slots_assigned: u32,
    /// Timestamp carried by the backend's last report.
    #[prost(message, optional, tag = "5")]
    pub last_updated: Option<Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadBalancerStatusReply {
    /// Control plane wall clock when the snapshot was taken.
    #[prost(message, optional, tag = "1")]
    pub timestamp: Option<Timestamp>,
    #[prost(message, repeated, tag = "2")]
    pub workers: Vec<WorkerStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetLoadBalancerRequest {
    /// Admin token.
    #[prost(string, tag = "1")]
    pub token: String,
    #[prost(string, tag = "2")]
    pub lb_id: String,
}

include!(concat!(env!("OUT_DIR"), "/loadbalancer.LoadBalancer.rs"));
