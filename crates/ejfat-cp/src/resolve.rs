//! Address resolution for control plane and data endpoints.
//!
//! Turns a hostname into IPv4/IPv6 literals usable inside an `ejfat://`
//! URI. Names that are already literals are passed through untouched and
//! never reach the system resolver.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ClientError, ClientResult};

static IPV4_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])\.){3}(25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])$")
        .expect("valid IPv4 pattern")
});

static IPV6_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}$").expect("valid IPv6 pattern")
});

/// Address family requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    #[default]
    V4,
    V6,
}

impl AddressFamily {
    pub fn from_ipv6_flag(ipv6: bool) -> Self {
        if ipv6 { Self::V6 } else { Self::V4 }
    }
}

/// True if `s` is four dot-separated decimal octets, each 0–255.
pub fn is_ipv4_literal(s: &str) -> bool {
    IPV4_LITERAL.is_match(s)
}

/// True if `s` is eight colon-separated groups of 1–4 hex digits.
///
/// Compressed forms (`::1`) do not match.
pub fn is_ipv6_literal(s: &str) -> bool {
    IPV6_LITERAL.is_match(s)
}

/// True if `s` is an IP literal in either family.
pub fn is_ip_literal(s: &str) -> bool {
    is_ipv4_literal(s) || is_ipv6_literal(s)
}

/// Render a host for use in a URI authority, bracketing IPv6 literals.
pub fn uri_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// gRPC endpoint URI for a control plane.
pub fn endpoint_uri(host: &str, port: u16) -> String {
    format!("http://{}:{}", uri_host(host), port)
}

/// The first IPv4 and first IPv6 literal found for a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAddrs {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

impl ResolvedAddrs {
    /// Pick the literal for `family`, falling back to IPv4 when the
    /// requested family is unavailable.
    pub fn select(&self, family: AddressFamily) -> Option<&str> {
        let preferred = match family {
            AddressFamily::V4 => self.ipv4.as_deref(),
            AddressFamily::V6 => self.ipv6.as_deref(),
        };
        preferred.or(self.ipv4.as_deref())
    }
}

/// Source of host lookups.
pub trait HostLookup {
    /// Resolve `host` to any number of addresses, in resolver order.
    fn lookup(&self, host: &str) -> impl Future<Output = std::io::Result<Vec<IpAddr>>> + Send;
}

/// Family-agnostic lookup through the operating system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Resolves control plane hostnames to IP literals.
#[derive(Debug, Clone, Default)]
pub struct AddressResolver<L = SystemLookup> {
    lookup: L,
}

impl AddressResolver<SystemLookup> {
    pub fn new() -> Self {
        Self {
            lookup: SystemLookup,
        }
    }
}

impl<L: HostLookup> AddressResolver<L> {
    /// Create a resolver backed by a custom lookup.
    pub fn with_lookup(lookup: L) -> Self {
        Self { lookup }
    }

    /// Collect the IPv4 and IPv6 literals for `host`.
    ///
    /// A literal is returned as-is in its own family slot without a lookup.
    pub async fn resolve(&self, host: &str) -> ClientResult<ResolvedAddrs> {
        if is_ipv4_literal(host) {
            return Ok(ResolvedAddrs {
                ipv4: Some(host.to_string()),
                ipv6: None,
            });
        }
        if is_ipv6_literal(host) {
            return Ok(ResolvedAddrs {
                ipv4: None,
                ipv6: Some(host.to_string()),
            });
        }

        let addrs = self
            .lookup
            .lookup(host)
            .await
            .map_err(|source| ClientError::Resolve {
                host: host.to_string(),
                source,
            })?;

        let mut resolved = ResolvedAddrs::default();
        for addr in addrs {
            match addr {
                IpAddr::V4(v4) if resolved.ipv4.is_none() => resolved.ipv4 = Some(v4.to_string()),
                IpAddr::V6(v6) if resolved.ipv6.is_none() => resolved.ipv6 = Some(v6.to_string()),
                _ => {}
            }
        }
        Ok(resolved)
    }

    /// Resolve `host` to a single literal of the requested family.
    ///
    /// Literals are returned unchanged regardless of `family`.
    pub async fn resolve_for(&self, host: &str, family: AddressFamily) -> ClientResult<String> {
        if is_ip_literal(host) {
            return Ok(host.to_string());
        }
        let resolved = self.resolve(host).await?;
        resolved
            .select(family)
            .map(str::to_string)
            .ok_or_else(|| ClientError::NoAddress(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct FakeLookup {
        addrs: Vec<IpAddr>,
        calls: Arc<AtomicUsize>,
    }

    impl HostLookup for FakeLookup {
        async fn lookup(&self, _host: &str) -> std::io::Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.addrs.clone())
        }
    }

    #[test]
    fn ipv4_literal_pattern() {
        assert!(is_ipv4_literal("10.0.0.5"));
        assert!(is_ipv4_literal("255.255.255.255"));
        assert!(!is_ipv4_literal("256.1.1.1"));
        assert!(!is_ipv4_literal("10.0.0"));
        assert!(!is_ipv4_literal("cp.example.org"));
    }

    #[test]
    fn ipv6_literal_requires_eight_groups() {
        assert!(is_ipv6_literal("2001:db8:0:0:0:0:0:1"));
        assert!(is_ipv6_literal("fe80:0:0:0:abcd:ef01:2345:6789"));
        assert!(!is_ipv6_literal("::1"));
        assert!(!is_ipv6_literal("2001:db8::1"));
        assert!(!is_ipv6_literal("12345:0:0:0:0:0:0:1"));
    }

    #[test]
    fn uri_host_brackets_ipv6() {
        assert_eq!(uri_host("10.0.0.1"), "10.0.0.1");
        assert_eq!(uri_host("::1"), "[::1]");
        assert_eq!(uri_host("[::1]"), "[::1]");
        assert_eq!(endpoint_uri("cp", 18347), "http://cp:18347");
    }

    #[tokio::test]
    async fn literals_skip_lookup() {
        let lookup = FakeLookup::default();
        let calls = lookup.calls.clone();
        let resolver = AddressResolver::with_lookup(lookup);

        let v4 = resolver.resolve_for("10.1.2.3", AddressFamily::V6).await.unwrap();
        assert_eq!(v4, "10.1.2.3");
        let v6 = resolver
            .resolve_for("2001:db8:0:0:0:0:0:7", AddressFamily::V4)
            .await
            .unwrap();
        assert_eq!(v6, "2001:db8:0:0:0:0:0:7");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hostname_takes_first_of_each_family() {
        let lookup = FakeLookup {
            addrs: vec![
                IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            ],
            calls: Arc::default(),
        };
        let resolver = AddressResolver::with_lookup(lookup);

        let resolved = resolver.resolve("cp.example.org").await.unwrap();
        assert_eq!(resolved.ipv4.as_deref(), Some("10.0.0.1"));
        assert_eq!(resolved.ipv6.as_deref(), Some("2001:db8::1"));
        assert_eq!(resolved.select(AddressFamily::V6), Some("2001:db8::1"));
    }

    #[tokio::test]
    async fn missing_family_falls_back_to_ipv4() {
        let lookup = FakeLookup {
            addrs: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9))],
            calls: Arc::default(),
        };
        let resolver = AddressResolver::with_lookup(lookup);

        let addr = resolver.resolve_for("cp", AddressFamily::V6).await.unwrap();
        assert_eq!(addr, "192.168.1.9");
    }

    #[tokio::test]
    async fn ipv6_only_host_has_no_ipv4_fallback() {
        let lookup = FakeLookup {
            addrs: vec![IpAddr::V6(Ipv6Addr::LOCALHOST)],
            calls: Arc::default(),
        };
        let resolver = AddressResolver::with_lookup(lookup);

        let err = resolver.resolve_for("cp", AddressFamily::V4).await.unwrap_err();
        assert!(matches!(err, ClientError::NoAddress(_)));
    }
}
