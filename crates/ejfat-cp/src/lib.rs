//! ejfat-cp: client side of the EJFAT load balancer control plane.
//!
//! Backends register with a reserved LB and stream fill-level telemetry;
//! administrators reserve, inspect and free LB instances. A simulated
//! control plane implementing the same gRPC service is included for local
//! runs and tests.
//!
//! # Architecture
//!
//! ```text
//! Administrator
//!   └── LbReservation / reserve_uri()
//!       ├── ReserveLoadBalancer() → lb id, instance token, sync + data endpoints
//!       ├── LoadBalancerStatus() → per-backend ClientStats
//!       └── FreeLoadBalancer()
//!            │
//!            ▼  ejfat://<token>@<cp>:<port>/lb/<id>?data=..&sync=..
//! Backend
//!   └── BackendClient
//!       ├── Register() → session id + session token
//!       ├── SendState() → fill, control error, readiness
//!       └── Deregister()
//!
//! Control Plane (simulated)
//!   └── ControlPlaneServer (gRPC)
//!       ├── LbInstances → reservations, tokens, expiry
//!       ├── SessionRegistry → session records per LB
//!       └── liveness sweep → marks silent backends inactive
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod proto;
pub mod reservation;
pub mod resolve;
pub mod server;
pub mod session;
pub mod time;
pub mod types;
pub mod uri;

mod transport;

pub use backend::BackendRecord;
pub use config::EjfatConfig;
pub use error::{ClientError, ClientResult, ErrorKind};
pub use reservation::{ClientStats, Grant, LbReservation, ReservationState};
pub use resolve::{AddressFamily, AddressResolver};
pub use server::{ControlPlaneServer, ServerConfig};
pub use session::{BackendClient, BackendConfig, Session, SessionState};
pub use types::{PortRange, ReadinessPolicy};
pub use uri::EjfatUri;
