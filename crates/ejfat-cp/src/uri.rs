//! `ejfat://` connection URIs.
//!
//! A reservation hands its connection parameters to data-plane senders and
//! backends as a single string:
//!
//! ```text
//! ejfat://<token>@<host>:<port>/lb/<lbId>?data=<addr>:<dataPort>&sync=<addr>:<syncPort>
//! ejfat://<host>:<port>/lb/<lbId>?data=<addr>:<dataPort>&sync=<addr>:<syncPort>
//! ```
//!
//! The first form carries the LB instance token and is produced by a
//! reservation; the second is produced by a lookup.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ClientError, ClientResult};
use crate::resolve::uri_host;

/// URI scheme prefix. Any legacy result string without it is a failure.
pub const SCHEME: &str = "ejfat://";

/// Well-known LB data port advertised in every URI.
pub const DEFAULT_DATA_PORT: u16 = 19522;

static URI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^ejfat://(?:(?P<token>[^@/]+)@)?(?P<host>\[[0-9a-fA-F:.]+\]|[^:/\[\]@]+):(?P<port>\d+)/lb/(?P<lb>[^?/]+)(?:\?(?P<query>.*))?$",
    )
    .expect("valid ejfat URI pattern")
});

/// An address and UDP port pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub address: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", uri_host(&self.address), self.port)
    }
}

impl FromStr for HostPort {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ClientError::InvalidUri(format!("missing port in {s}")))?;
        let port = port
            .parse()
            .map_err(|_| ClientError::InvalidUri(format!("bad port in {s}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ClientError::InvalidUri(format!("missing address in {s}")));
        }
        Ok(HostPort::new(host, port))
    }
}

/// Parsed form of an `ejfat://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EjfatUri {
    /// LB instance token; `None` for lookup URIs.
    pub token: Option<String>,
    pub cp_host: String,
    pub cp_port: u16,
    pub lb_id: String,
    pub data: Option<HostPort>,
    pub sync: Option<HostPort>,
}

impl EjfatUri {
    /// Whether this URI carries an instance token.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

impl fmt::Display for EjfatUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SCHEME)?;
        if let Some(token) = &self.token {
            write!(f, "{token}@")?;
        }
        write!(f, "{}:{}/lb/{}", uri_host(&self.cp_host), self.cp_port, self.lb_id)?;

        let mut sep = '?';
        if let Some(data) = &self.data {
            write!(f, "{sep}data={data}")?;
            sep = '&';
        }
        if let Some(sync) = &self.sync {
            write!(f, "{sep}sync={sync}")?;
        }
        Ok(())
    }
}

impl FromStr for EjfatUri {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = URI_PATTERN
            .captures(s.trim())
            .ok_or_else(|| ClientError::InvalidUri(s.to_string()))?;

        let cp_host = caps["host"]
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let cp_port = caps["port"]
            .parse()
            .map_err(|_| ClientError::InvalidUri(format!("bad control plane port in {s}")))?;

        let mut uri = EjfatUri {
            token: caps.name("token").map(|m| m.as_str().to_string()),
            cp_host,
            cp_port,
            lb_id: caps["lb"].to_string(),
            data: None,
            sync: None,
        };

        if let Some(query) = caps.name("query") {
            for pair in query.as_str().split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some(("data", value)) => uri.data = Some(value.parse()?),
                    Some(("sync", value)) => uri.sync = Some(value.parse()?),
                    _ => {}
                }
            }
        }

        Ok(uri)
    }
}

/// Render a URI result in the legacy string contract: the URI itself on
/// success, `error = <message>` on failure.
pub fn legacy_string(result: &ClientResult<EjfatUri>) -> String {
    match result {
        Ok(uri) => uri.to_string(),
        Err(e) => format!("error = {e}"),
    }
}

/// Whether a legacy result string denotes success.
pub fn is_uri(s: &str) -> bool {
    s.starts_with(SCHEME)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve_uri() -> EjfatUri {
        EjfatUri {
            token: Some("tok123".into()),
            cp_host: "129.57.177.2".into(),
            cp_port: 18347,
            lb_id: "lb7".into(),
            data: Some(HostPort::new("10.0.0.5", DEFAULT_DATA_PORT)),
            sync: Some(HostPort::new("10.0.0.1", 18000)),
        }
    }

    #[test]
    fn reserve_form_renders() {
        assert_eq!(
            reserve_uri().to_string(),
            "ejfat://tok123@129.57.177.2:18347/lb/lb7?data=10.0.0.5:19522&sync=10.0.0.1:18000"
        );
    }

    #[test]
    fn lookup_form_has_no_token() {
        let mut uri = reserve_uri();
        uri.token = None;
        assert_eq!(
            uri.to_string(),
            "ejfat://129.57.177.2:18347/lb/lb7?data=10.0.0.5:19522&sync=10.0.0.1:18000"
        );
    }

    #[test]
    fn parses_reserve_form() {
        let uri: EjfatUri =
            "ejfat://tok123@cp.example.org:18347/lb/lb7?data=10.0.0.5:19522&sync=10.0.0.1:18000"
                .parse()
                .unwrap();
        assert_eq!(uri.token.as_deref(), Some("tok123"));
        assert_eq!(uri.cp_host, "cp.example.org");
        assert_eq!(uri.cp_port, 18347);
        assert_eq!(uri.lb_id, "lb7");
        assert_eq!(uri.data, Some(HostPort::new("10.0.0.5", 19522)));
        assert_eq!(uri.sync, Some(HostPort::new("10.0.0.1", 18000)));
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let uri = EjfatUri {
            token: None,
            cp_host: "2001:db8::2".into(),
            cp_port: 18347,
            lb_id: "1".into(),
            data: Some(HostPort::new("2001:db8::5", DEFAULT_DATA_PORT)),
            sync: None,
        };
        let rendered = uri.to_string();
        assert_eq!(rendered, "ejfat://[2001:db8::2]:18347/lb/1?data=[2001:db8::5]:19522");
        assert_eq!(rendered.parse::<EjfatUri>().unwrap(), uri);
    }

    #[test]
    fn rejects_other_schemes() {
        assert!("http://cp:18347/lb/1".parse::<EjfatUri>().is_err());
        assert!("ejfat://cp/lb/1".parse::<EjfatUri>().is_err());
        assert!("ejfat://cp:18347/lb/1?data=10.0.0.1".parse::<EjfatUri>().is_err());
    }

    #[test]
    fn legacy_string_prefixes_errors() {
        let ok: ClientResult<EjfatUri> = Ok(reserve_uri());
        assert!(is_uri(&legacy_string(&ok)));

        let err: ClientResult<EjfatUri> = Err(ClientError::ReservationFailed(
            tonic::Status::permission_denied("bad admin token"),
        ));
        let s = legacy_string(&err);
        assert_eq!(s, "error = reservation failed: bad admin token");
        assert!(!is_uri(&s));
    }
}
