/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

//! Resolved addresses and the endpoint lists a resolver hands to the LB
//! policy.
//!
//! Name resolution itself happens elsewhere; this module only models its
//! output.  A resolver produces an ordered set of endpoints, each of which is
//! one or more addresses that reach the same logical backend.
use std::fmt::Display;
use std::fmt::Formatter;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::net::SocketAddr;
use std::net::SocketAddrV4;
use std::net::SocketAddrV6;

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use url::Url;

use crate::client::channel_args::ChannelArgs;
use crate::status::Status;

/// Address family tag for unix domain sockets.
pub const AF_UNIX: u16 = 1;
/// Address family tag for IPv4.
pub const AF_INET: u16 = 2;
/// Address family tag for IPv6.
pub const AF_INET6: u16 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("endpoint must contain at least one address")]
    EmptyEndpoint,
    #[error("unsupported address scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("invalid address {uri:?}: {reason}")]
    InvalidAddress { uri: String, reason: String },
}

/// A resolved address in a sockaddr-like binary form.
///
/// The layout is a big endian `u16` family tag followed by family specific
/// data:
///
/// * IPv4: `port: u16`, 4 address bytes.
/// * IPv6: `port: u16`, 16 address bytes, `scope_id: u32`.
/// * Unix: the socket path bytes.
///
/// Ordering and equality compare the raw bytes, which is stable for the life
/// of the process and is what subchannel keys are built on.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolvedAddress {
    bytes: Bytes,
}

impl ResolvedAddress {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let mut buf = BytesMut::with_capacity(24);
        match addr {
            SocketAddr::V4(v4) => {
                buf.put_u16(AF_INET);
                buf.put_u16(v4.port());
                buf.put_slice(&v4.ip().octets());
            }
            SocketAddr::V6(v6) => {
                buf.put_u16(AF_INET6);
                buf.put_u16(v6.port());
                buf.put_slice(&v6.ip().octets());
                buf.put_u32(v6.scope_id());
            }
        }
        ResolvedAddress {
            bytes: buf.freeze(),
        }
    }

    pub fn unix(path: &str) -> Self {
        let mut buf = BytesMut::with_capacity(2 + path.len());
        buf.put_u16(AF_UNIX);
        buf.put_slice(path.as_bytes());
        ResolvedAddress {
            bytes: buf.freeze(),
        }
    }

    /// Wraps raw bytes without validating them.  Accessors that need a
    /// particular family return `None` for bytes that do not match it.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        ResolvedAddress {
            bytes: bytes.into(),
        }
    }

    /// Parses an `ipv4:`, `ipv6:` or `unix:` URI.
    pub fn parse_uri(uri: &str) -> Result<Self, AddressError> {
        let invalid = |reason: &dyn Display| AddressError::InvalidAddress {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(uri).map_err(|e| invalid(&e))?;
        match url.scheme() {
            "ipv4" | "ipv6" => {
                let addr: SocketAddr = url.path().parse().map_err(|e| invalid(&e))?;
                match (url.scheme(), addr) {
                    ("ipv4", SocketAddr::V4(_)) | ("ipv6", SocketAddr::V6(_)) => {
                        Ok(Self::from_socket_addr(addr))
                    }
                    _ => Err(invalid(&"address does not match scheme")),
                }
            }
            "unix" => {
                if url.path().is_empty() {
                    return Err(invalid(&"empty path"));
                }
                Ok(Self::unix(url.path()))
            }
            other => Err(AddressError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn family(&self) -> Option<u16> {
        let b = self.bytes.get(0..2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let b = &self.bytes;
        let port = |b: &[u8]| u16::from_be_bytes([b[2], b[3]]);
        match self.family()? {
            AF_INET if b.len() == 8 => {
                let ip = Ipv4Addr::new(b[4], b[5], b[6], b[7]);
                Some(SocketAddr::V4(SocketAddrV4::new(ip, port(b))))
            }
            AF_INET6 if b.len() == 24 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&b[4..20]);
                let scope = u32::from_be_bytes([b[20], b[21], b[22], b[23]]);
                Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port(b),
                    0,
                    scope,
                )))
            }
            _ => None,
        }
    }

    pub fn unix_path(&self) -> Option<&str> {
        if self.family()? != AF_UNIX {
            return None;
        }
        std::str::from_utf8(&self.bytes[2..]).ok()
    }

    /// Formats the address as a URI, or `None` if the bytes are not a
    /// recognized family.
    pub fn to_uri(&self) -> Option<String> {
        if let Some(path) = self.unix_path() {
            return Some(format!("unix:{path}"));
        }
        match self.to_socket_addr()? {
            SocketAddr::V4(v4) => Some(format!("ipv4:{v4}")),
            SocketAddr::V6(v6) => Some(format!("ipv6:{v6}")),
        }
    }
}

impl From<SocketAddr> for ResolvedAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr)
    }
}

impl Display for ResolvedAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.to_uri() {
            Some(uri) => f.write_str(&uri),
            None => write!(f, "raw:{:02x?}", self.bytes.as_ref()),
        }
    }
}

impl std::fmt::Debug for ResolvedAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// An endpoint is a non-empty, ordered set of addresses which reference one
/// logical server, e.g. an IPv4 and an IPv6 address of the same host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddresses {
    addresses: Vec<ResolvedAddress>,
    args: ChannelArgs,
}

impl EndpointAddresses {
    pub fn new(addresses: Vec<ResolvedAddress>, args: ChannelArgs) -> Result<Self, AddressError> {
        if addresses.is_empty() {
            return Err(AddressError::EmptyEndpoint);
        }
        Ok(EndpointAddresses { addresses, args })
    }

    /// An endpoint with a single address.
    pub fn from_address(address: ResolvedAddress, args: ChannelArgs) -> Self {
        EndpointAddresses {
            addresses: vec![address],
            args,
        }
    }

    /// The first address of the endpoint.
    pub fn address(&self) -> &ResolvedAddress {
        &self.addresses[0]
    }

    pub fn addresses(&self) -> &[ResolvedAddress] {
        &self.addresses
    }

    pub fn args(&self) -> &ChannelArgs {
        &self.args
    }
}

impl Display for EndpointAddresses {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, a) in self.addresses.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{a}")?;
        }
        write!(f, "]")?;
        if !self.args.is_empty() {
            write!(f, " args={}", self.args)?;
        }
        Ok(())
    }
}

/// A restartable sequence of endpoints.
///
/// The sequence may be walked any number of times; each walk must yield the
/// same endpoints in the same order.
pub trait EndpointAddressesIterator: Send + Sync {
    fn for_each(&self, callback: &mut dyn FnMut(&EndpointAddresses));
}

/// An [`EndpointAddressesIterator`] over an owned list of endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointAddressesList {
    endpoints: Vec<EndpointAddresses>,
}

impl EndpointAddressesList {
    pub fn new(endpoints: Vec<EndpointAddresses>) -> Self {
        EndpointAddressesList { endpoints }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EndpointAddresses> {
        self.endpoints.iter()
    }
}

impl From<Vec<EndpointAddresses>> for EndpointAddressesList {
    fn from(endpoints: Vec<EndpointAddresses>) -> Self {
        Self::new(endpoints)
    }
}

impl FromIterator<EndpointAddresses> for EndpointAddressesList {
    fn from_iter<T: IntoIterator<Item = EndpointAddresses>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl EndpointAddressesIterator for EndpointAddressesList {
    fn for_each(&self, callback: &mut dyn FnMut(&EndpointAddresses)) {
        for endpoint in &self.endpoints {
            callback(endpoint);
        }
    }
}

/// An [`EndpointAddressesIterator`] yielding exactly one endpoint.
#[derive(Debug, Clone)]
pub struct SingleEndpointIterator {
    endpoint: EndpointAddresses,
}

impl SingleEndpointIterator {
    pub fn new(endpoint: EndpointAddresses) -> Self {
        SingleEndpointIterator { endpoint }
    }
}

impl EndpointAddressesIterator for SingleEndpointIterator {
    fn for_each(&self, callback: &mut dyn FnMut(&EndpointAddresses)) {
        callback(&self.endpoint);
    }
}

/// A resolution failure delivered in place of an endpoint list.
///
/// The wrapped status is never OK: [`EndpointListError::new`] refuses to
/// build an error out of a successful status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status}")]
pub struct EndpointListError {
    status: Status,
}

impl EndpointListError {
    /// Returns `None` if `status` is OK.
    pub fn new(status: Status) -> Option<Self> {
        if status.is_ok() {
            tracing::warn!("ignoring OK status supplied as an endpoint list error");
            return None;
        }
        Some(EndpointListError { status })
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn into_status(self) -> Status {
        self.status
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::status::StatusCode;

    #[test]
    fn parse_uri() {
        struct TestCase {
            input: &'static str,
            want_family: u16,
            want_uri: &'static str,
        }
        let test_cases = vec![
            TestCase {
                input: "ipv4:127.0.0.1:1024",
                want_family: AF_INET,
                want_uri: "ipv4:127.0.0.1:1024",
            },
            TestCase {
                input: "ipv6:[::1]:443",
                want_family: AF_INET6,
                want_uri: "ipv6:[::1]:443",
            },
            TestCase {
                input: "ipv6:[2001:db8::7]:50051",
                want_family: AF_INET6,
                want_uri: "ipv6:[2001:db8::7]:50051",
            },
            TestCase {
                input: "unix:/run/grpc.sock",
                want_family: AF_UNIX,
                want_uri: "unix:/run/grpc.sock",
            },
        ];

        for tc in test_cases {
            let addr = ResolvedAddress::parse_uri(tc.input).unwrap();
            assert_eq!(addr.family(), Some(tc.want_family), "{}", tc.input);
            assert_eq!(addr.to_uri().as_deref(), Some(tc.want_uri));
            assert_eq!(addr.to_string(), tc.want_uri);
        }
    }

    #[test]
    fn parse_uri_errors() {
        assert!(matches!(
            ResolvedAddress::parse_uri("dns:///grpc.io"),
            Err(AddressError::UnsupportedScheme(s)) if s == "dns"
        ));
        assert!(matches!(
            ResolvedAddress::parse_uri("ipv4:[::1]:80"),
            Err(AddressError::InvalidAddress { .. })
        ));
        assert!(matches!(
            ResolvedAddress::parse_uri("ipv4:localhost"),
            Err(AddressError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn byte_layout() {
        let addr = ResolvedAddress::from_socket_addr("127.0.0.1:1024".parse().unwrap());
        assert_eq!(addr.as_bytes(), &[0, 2, 0x04, 0x00, 127, 0, 0, 1]);
        let same = ResolvedAddress::from_bytes(addr.as_bytes().to_vec());
        assert_eq!(addr, same);
        assert_eq!(
            same.to_socket_addr(),
            Some("127.0.0.1:1024".parse().unwrap())
        );

        let truncated = ResolvedAddress::from_bytes(vec![0u8, 2, 4]);
        assert_eq!(truncated.to_socket_addr(), None);
        assert_eq!(truncated.to_uri(), None);
    }

    #[test]
    fn address_ordering_is_bytewise() {
        let a = ResolvedAddress::parse_uri("ipv4:127.0.0.1:1024").unwrap();
        let b = ResolvedAddress::parse_uri("ipv4:127.0.0.2:1024").unwrap();
        let c = ResolvedAddress::parse_uri("ipv6:[::1]:1024").unwrap();
        assert!(a < b);
        // Family sorts first.
        assert!(b < c);
    }

    #[test]
    fn endpoint_must_not_be_empty() {
        assert_eq!(
            EndpointAddresses::new(vec![], ChannelArgs::new()),
            Err(AddressError::EmptyEndpoint)
        );
    }

    #[test]
    fn endpoint_list_is_restartable() {
        let list: EndpointAddressesList = ["ipv4:10.0.0.1:80", "ipv4:10.0.0.2:80"]
            .iter()
            .map(|uri| {
                EndpointAddresses::from_address(
                    ResolvedAddress::parse_uri(uri).unwrap(),
                    ChannelArgs::new(),
                )
            })
            .collect();
        for _ in 0..2 {
            let mut seen = vec![];
            list.for_each(&mut |e| seen.push(e.address().to_string()));
            assert_eq!(seen, vec!["ipv4:10.0.0.1:80", "ipv4:10.0.0.2:80"]);
        }
    }

    #[test]
    fn endpoint_list_error_rejects_ok() {
        assert!(EndpointListError::new(Status::ok()).is_none());
        let err = EndpointListError::new(Status::unavailable("dns failure")).unwrap();
        assert_eq!(err.status().code(), StatusCode::Unavailable);
        assert_eq!(err.to_string(), "UNAVAILABLE: dns failure");
    }
}
