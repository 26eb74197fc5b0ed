//! Upload endpoint parsing shared by firmware and host targets.
//!
//! Endpoints are plain `http://host[:port][/path]` targets. The host may be a
//! dotted IPv4 address or a DNS name; resolution happens in the transport.

use core::fmt;

use heapless::String;
use winnow::ascii::{Caseless, dec_uint};
use winnow::combinator::{opt, preceded};
use winnow::token::{rest, take_while};
use winnow::{ModalResult, Parser};

/// Longest host name retained from the configured URL.
pub const MAX_HOST_LEN: usize = 64;
/// Longest request path retained from the configured URL.
pub const MAX_PATH_LEN: usize = 128;
/// Port used when the URL does not name one.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Parsed upload target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    host: String<MAX_HOST_LEN>,
    port: u16,
    path: String<MAX_PATH_LEN>,
}

/// Reasons an endpoint URL is rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EndpointError {
    /// Only plain `http://` targets are supported.
    UnsupportedScheme,
    /// The URL does not match `http://host[:port][/path]`.
    Malformed,
    /// The port is zero or not a valid 16-bit number.
    InvalidPort,
    HostTooLong,
    PathTooLong,
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::UnsupportedScheme => f.write_str("only http:// endpoints are supported"),
            EndpointError::Malformed => f.write_str("malformed endpoint url"),
            EndpointError::InvalidPort => f.write_str("invalid endpoint port"),
            EndpointError::HostTooLong => f.write_str("endpoint host too long"),
            EndpointError::PathTooLong => f.write_str("endpoint path too long"),
        }
    }
}

impl Endpoint {
    /// Parses an `http://host[:port][/path]` URL.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] when the scheme is not `http`, the URL is
    /// malformed, or a component exceeds its fixed capacity.
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        let url = url.trim();
        if url
            .get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
        {
            return Err(EndpointError::UnsupportedScheme);
        }

        let (host, port, path) = endpoint_url
            .parse(url)
            .map_err(|_| EndpointError::Malformed)?;

        let path = match path {
            "" => "/",
            p if p.starts_with(':') => return Err(EndpointError::InvalidPort),
            p if p.starts_with('/') && p.chars().all(|c| c.is_ascii_graphic()) => p,
            _ => return Err(EndpointError::Malformed),
        };
        let port = match port {
            None => DEFAULT_HTTP_PORT,
            Some(0) => return Err(EndpointError::InvalidPort),
            Some(port) => port,
        };

        Ok(Self {
            host: String::try_from(host).map_err(|_| EndpointError::HostTooLong)?,
            port,
            path: String::try_from(path).map_err(|_| EndpointError::PathTooLong)?,
        })
    }

    /// Host name or address as written in the URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Request target, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the host as an IPv4 address when it is written as one.
    pub fn ipv4(&self) -> Option<[u8; 4]> {
        let mut octets = [0u8; 4];
        let mut parts = self.host.split('.');
        for octet in &mut octets {
            let part = parts.next()?;
            if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            *octet = part.parse().ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(octets)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == DEFAULT_HTTP_PORT {
            write!(f, "http://{}{}", self.host, self.path)
        } else {
            write!(f, "http://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

fn endpoint_url<'s>(input: &mut &'s str) -> ModalResult<(&'s str, Option<u16>, &'s str)> {
    (
        preceded(Caseless("http://"), host_name),
        opt(preceded(':', dec_uint)),
        rest,
    )
        .parse_next(input)
}

fn host_name<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
    })
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_port_and_path() {
        let endpoint = Endpoint::parse("http://192.168.1.20:5000/upload").expect("valid url");
        assert_eq!(endpoint.host(), "192.168.1.20");
        assert_eq!(endpoint.port(), 5000);
        assert_eq!(endpoint.path(), "/upload");
        assert_eq!(endpoint.ipv4(), Some([192, 168, 1, 20]));
    }

    #[test]
    fn defaults_port_and_path() {
        let endpoint = Endpoint::parse("HTTP://images.example.net").expect("valid url");
        assert_eq!(endpoint.host(), "images.example.net");
        assert_eq!(endpoint.port(), DEFAULT_HTTP_PORT);
        assert_eq!(endpoint.path(), "/");
        assert_eq!(endpoint.ipv4(), None);
    }

    #[test]
    fn rejects_tls_and_garbage() {
        assert_eq!(
            Endpoint::parse("https://example.net/upload"),
            Err(EndpointError::UnsupportedScheme)
        );
        assert_eq!(
            Endpoint::parse("ftp://example.net"),
            Err(EndpointError::Malformed)
        );
        assert_eq!(
            Endpoint::parse("http://example.net:http/upload"),
            Err(EndpointError::InvalidPort)
        );
        assert_eq!(
            Endpoint::parse("http://example.net:0/"),
            Err(EndpointError::InvalidPort)
        );
        assert_eq!(
            Endpoint::parse("http://example.net/a b"),
            Err(EndpointError::Malformed)
        );
    }

    #[test]
    fn display_omits_default_port() {
        let plain = Endpoint::parse("http://example.net/upload").expect("valid url");
        let custom = Endpoint::parse("http://10.0.0.2:8080/upload").expect("valid url");

        let mut rendered: String<64> = String::new();
        fmt::write(&mut rendered, format_args!("{plain} {custom}")).expect("fits");
        assert_eq!(
            rendered.as_str(),
            "http://example.net/upload http://10.0.0.2:8080/upload"
        );
    }

    #[test]
    fn dotted_name_is_not_an_address() {
        let endpoint = Endpoint::parse("http://10.0.0.300/").expect("valid url");
        assert_eq!(endpoint.ipv4(), None);
        let endpoint = Endpoint::parse("http://10.0.0.1.2/").expect("valid url");
        assert_eq!(endpoint.ipv4(), None);
    }
}
