// ============================================
// File: crates/shroud-transport/src/socks5.rs
// ============================================
//! # SOCKS5 Tunnel Client
//!
//! ## Creation Reason
//! Anonymized destinations are only reachable through a local SOCKS5
//! proxy (a Tor daemon, typically). This module turns a stream connected
//! to the proxy into a stream connected to the destination.
//!
//! ## Main Functionality
//! - `connect`: No-auth greeting, CONNECT request, reply check
//!
//! ## Exchange (RFC 1928)
//! ```text
//! client                                   proxy
//!   │ 05 01 00                       ───►    │  greeting, no-auth only
//!   │ ◄───                       05 00       │
//!   │ 05 01 00 atyp addr port        ───►    │  CONNECT
//!   │ ◄───  05 rep 00 atyp bnd.addr bnd.port │
//! ```
//! Onion hosts are sent as domain names (atyp 3) so the proxy resolves
//! them; nothing is resolved locally.
//!
//! ## Last Modified
//! v0.1.0 - Initial SOCKS5 client

use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use shroud_common::PeerAddr;

use crate::error::{Result, TransportError};

// ============================================
// Constants
// ============================================

/// Protocol version byte.
pub const SOCKS_VERSION: u8 = 0x05;

/// "No authentication required" method.
pub const METHOD_NO_AUTH: u8 = 0x00;

/// "No acceptable methods" reply.
pub const METHOD_NOT_ACCEPTABLE: u8 = 0xff;

/// CONNECT command.
pub const CMD_CONNECT: u8 = 0x01;

/// Address type: IPv4.
pub const ATYP_IPV4: u8 = 0x01;

/// Address type: domain name.
pub const ATYP_DOMAIN: u8 = 0x03;

/// Address type: IPv6.
pub const ATYP_IPV6: u8 = 0x04;

/// Reply code: succeeded.
pub const REPLY_SUCCEEDED: u8 = 0x00;

// ============================================
// Client
// ============================================

/// Runs the SOCKS5 client exchange on `stream` for `target`.
///
/// On success the stream carries the destination's bytes.
///
/// # Errors
/// - `Proxy` if the proxy refuses, speaks another version or replies
///   with a failure code
/// - `Io` if the proxy closes the stream mid-exchange
pub async fn connect<S>(stream: &mut S, target: &PeerAddr) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, 1, METHOD_NO_AUTH])
        .await
        .map_err(|e| TransportError::io("sending SOCKS5 greeting", e))?;

    let mut choice = [0u8; 2];
    stream
        .read_exact(&mut choice)
        .await
        .map_err(|e| TransportError::io("reading SOCKS5 method choice", e))?;
    if choice[0] != SOCKS_VERSION {
        return Err(TransportError::proxy(format!(
            "unexpected SOCKS version {:#04x}",
            choice[0]
        )));
    }
    if choice[1] != METHOD_NO_AUTH {
        return Err(TransportError::proxy("proxy requires authentication"));
    }

    let request = connect_request(target)?;
    stream
        .write_all(&request)
        .await
        .map_err(|e| TransportError::io("sending SOCKS5 request", e))?;

    let mut head = [0u8; 4];
    stream
        .read_exact(&mut head)
        .await
        .map_err(|e| TransportError::io("reading SOCKS5 reply", e))?;
    if head[0] != SOCKS_VERSION {
        return Err(TransportError::proxy(format!(
            "unexpected SOCKS version {:#04x} in reply",
            head[0]
        )));
    }
    if head[1] != REPLY_SUCCEEDED {
        return Err(TransportError::proxy(reply_message(head[1])));
    }

    // Bound address is not used, but must be drained
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(|e| TransportError::io("reading SOCKS5 bound address", e))?;
            usize::from(len[0])
        }
        other => {
            return Err(TransportError::proxy(format!(
                "unknown address type {other:#04x} in reply"
            )))
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream
        .read_exact(&mut bound)
        .await
        .map_err(|e| TransportError::io("reading SOCKS5 bound address", e))?;

    debug!(%target, "SOCKS5 tunnel established");
    Ok(())
}

/// Builds the CONNECT request for `target`.
///
/// # Errors
/// `Proxy` if a host name is longer than 255 bytes.
pub fn connect_request(target: &PeerAddr) -> Result<Vec<u8>> {
    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    match target {
        PeerAddr::Ip(SocketAddr::V4(addr)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&addr.ip().octets());
        }
        PeerAddr::Ip(SocketAddr::V6(addr)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&addr.ip().octets());
        }
        PeerAddr::Onion { host, .. } => {
            let len = u8::try_from(host.len())
                .map_err(|_| TransportError::proxy("host name longer than 255 bytes"))?;
            request.push(ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&target.port().to_be_bytes());
    Ok(request)
}

/// Parses the destination of a CONNECT request body (`atyp addr port`).
///
/// Used by proxy-side code such as test harnesses.
///
/// # Errors
/// `Proxy` on an unknown address type or truncated body.
pub fn parse_destination(body: &[u8]) -> Result<PeerAddr> {
    let truncated = || TransportError::proxy("truncated CONNECT request");
    let (&atyp, rest) = body.split_first().ok_or_else(truncated)?;
    let addr_len = match atyp {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => 1 + usize::from(*rest.first().ok_or_else(truncated)?),
        other => {
            return Err(TransportError::proxy(format!(
                "unknown address type {other:#04x}"
            )))
        }
    };
    if rest.len() < addr_len + 2 {
        return Err(truncated());
    }
    let addr = &rest[..addr_len];
    let port = u16::from_be_bytes([rest[addr_len], rest[addr_len + 1]]);

    Ok(match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(addr);
            PeerAddr::Ip(SocketAddr::new(IpAddr::from(octets), port))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(addr);
            PeerAddr::Ip(SocketAddr::new(IpAddr::from(octets), port))
        }
        _ => PeerAddr::Onion {
            host: String::from_utf8_lossy(&addr[1..]).into_owned(),
            port,
        },
    })
}

/// Maps a SOCKS5 reply code to text.
#[must_use]
pub fn reply_message(code: u8) -> String {
    let text = match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown failure",
    };
    format!("{text} (reply {code:#04x})")
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_connect_request_onion() {
        let target: PeerAddr = "abcdef.onion:8333".parse().unwrap();
        let req = connect_request(&target).unwrap();
        assert_eq!(&req[..5], &[0x05, 0x01, 0x00, ATYP_DOMAIN, 12]);
        assert_eq!(&req[5..17], b"abcdef.onion");
        assert_eq!(&req[17..], &8333u16.to_be_bytes());
        assert_eq!(parse_destination(&req[3..]).unwrap(), target);
    }

    #[test]
    fn test_connect_request_ipv4() {
        let target: PeerAddr = "10.1.2.3:18444".parse().unwrap();
        let req = connect_request(&target).unwrap();
        assert_eq!(&req[3..8], &[ATYP_IPV4, 10, 1, 2, 3]);
        assert_eq!(parse_destination(&req[3..]).unwrap(), target);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(parse_destination(&[ATYP_IPV4, 1, 2]).unwrap_err().is_proxy_error());
        assert!(parse_destination(&[]).is_err());
    }

    #[tokio::test]
    async fn test_client_against_scripted_proxy() {
        let (mut client, mut proxy) = duplex(1024);
        let target: PeerAddr = "abcdef.onion:8333".parse().unwrap();

        let server = tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            proxy.write_all(&[0x05, 0x00]).await.unwrap();

            let mut req = vec![0u8; 19];
            proxy.read_exact(&mut req).await.unwrap();
            proxy
                .write_all(&[0x05, 0x00, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            proxy.write_all(b"payload").await.unwrap();
            parse_destination(&req[3..]).unwrap()
        });

        connect(&mut client, &target).await.unwrap();
        let mut rest = [0u8; 7];
        client.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"payload");
        assert_eq!(server.await.unwrap(), target);
    }

    #[tokio::test]
    async fn test_client_reports_failure_reply() {
        let (mut client, mut proxy) = duplex(1024);
        let target: PeerAddr = "10.0.0.1:8333".parse().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 3];
            proxy.read_exact(&mut buf).await.unwrap();
            proxy.write_all(&[0x05, 0x00]).await.unwrap();
            let mut req = [0u8; 10];
            proxy.read_exact(&mut req).await.unwrap();
            proxy.write_all(&[0x05, 0x04, 0x00, ATYP_IPV4]).await.unwrap();
        });

        let err = connect(&mut client, &target).await.unwrap_err();
        assert!(err.is_proxy_error());
        assert!(err.to_string().contains("host unreachable"));
    }
}
