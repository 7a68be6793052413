use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, bail};


/// An [Address] identifies an endpoint a connection binds to or connects to. It is a pure value:
///  two addresses are the same endpoint iff they are equal, which is what connections and caches
///  rely on when they use addresses as set members and map keys.
///
/// The textual form is `scheme://host[:port]`, e.g. `tcp://127.0.0.1:5556` or `inproc://orders`.
///  Interpreting scheme and host is up to the transport that is handed the address.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Address {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Address {
        Address {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Address {
        Address::new("tcp", host, Some(port))
    }

    pub fn inproc(name: impl Into<String>) -> Address {
        Address::new("inproc", name, None)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self)
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s.split_once("://")
            .ok_or_else(|| anyhow!("address {:?} has no scheme", s))?;
        if scheme.is_empty() {
            bail!("address {:?} has an empty scheme", s);
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((_, "")) => bail!("address {:?} has an empty port", s),
            Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => {
                let port = port.parse::<u16>()
                    .map_err(|e| anyhow!("invalid port in address {:?}: {}", s, e))?;
                (host, Some(port))
            }
            _ => (rest, None),
        };
        if host.is_empty() {
            bail!("address {:?} has an empty host", s);
        }

        Ok(Address::new(scheme, host, port))
    }
}


/// Identifies a transport implementation. Factories are registered per transport kind, and a
///  routing names the transport kind to use together with the address.
///
/// Kinds are intended to be well-known constants, e.g.
/// ```
/// use pigeon::messaging::address::TransportKind;
/// const TCP: TransportKind = TransportKind::new("tcp");
/// ```
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TransportKind(&'static str);

impl TransportKind {
    pub const fn new(name: &'static str) -> TransportKind {
        TransportKind(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl Debug for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransportKind({:?})", self.0)
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::tcp("tcp://127.0.0.1:5556", Address::tcp("127.0.0.1", 5556))]
    #[case::inproc("inproc://orders", Address::inproc("orders"))]
    #[case::ipv6("tcp://[::1]:80", Address::tcp("[::1]", 80))]
    #[case::ipv6_no_port("udp://[::1]", Address::new("udp", "[::1]", None))]
    fn test_parse(#[case] s: &str, #[case] expected: Address) {
        let parsed: Address = s.parse().unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), s);
    }

    #[rstest]
    #[case::no_scheme("127.0.0.1:5556")]
    #[case::empty_scheme("://host")]
    #[case::empty_host("tcp://")]
    #[case::empty_host_with_port("tcp://:80")]
    #[case::port_overflow("tcp://host:70000")]
    #[case::empty_port("tcp://host:")]
    #[case::empty_port_ipv6("tcp://[::1]:")]
    fn test_parse_invalid(#[case] s: &str) {
        assert!(s.parse::<Address>().is_err());
    }

    #[test]
    fn test_value_equality() {
        let mut set = std::collections::BTreeSet::new();
        set.insert(Address::tcp("localhost", 1));
        set.insert("tcp://localhost:1".parse().unwrap());
        assert_eq!(set.len(), 1);
    }
}
