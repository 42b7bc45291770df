//! Generates the `loadbalancer.LoadBalancer` gRPC client and server stubs.
//!
//! Message types are declared by hand with `prost` derives in
//! `src/proto.rs`, so the manual builder is used and no `protoc` is needed.

use tonic_build::manual::{Builder, Method, Service};

const RPCS: &[(&str, &str, &str, &str)] = &[
    ("register", "Register", "RegisterRequest", "RegisterReply"),
    ("deregister", "Deregister", "DeregisterRequest", "DeregisterReply"),
    ("send_state", "SendState", "SendStateRequest", "SendStateReply"),
    (
        "reserve_load_balancer",
        "ReserveLoadBalancer",
        "ReserveLoadBalancerRequest",
        "ReserveLoadBalancerReply",
    ),
    (
        "free_load_balancer",
        "FreeLoadBalancer",
        "FreeLoadBalancerRequest",
        "FreeLoadBalancerReply",
    ),
    (
        "load_balancer_status",
        "LoadBalancerStatus",
        "LoadBalancerStatusRequest",
        "LoadBalancerStatusReply",
    ),
    (
        "get_load_balancer",
        "GetLoadBalancer",
        "GetLoadBalancerRequest",
        "ReserveLoadBalancerReply",
    ),
];

fn main() {
    let mut service = Service::builder().name("LoadBalancer").package("loadbalancer");

    for (name, route, input, output) in RPCS {
        service = service.method(
            Method::builder()
                .name(*name)
                .route_name(*route)
                .input_type(format!("crate::proto::{input}"))
                .output_type(format!("crate::proto::{output}"))
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        );
    }

    Builder::new().compile(&[service.build()]);
    println!("cargo:rerun-if-changed=build.rs");
}
