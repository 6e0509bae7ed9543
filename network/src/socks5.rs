//! Byte-level SOCKS5 client, unauthenticated, hostname targets only.
//!
//! Spoken by the application layer over a stream the redirector has already
//! carried to the proxy. The hostname goes to the proxy verbatim (atyp 3),
//! so name resolution happens on the far side and never leaks locally.

use std::io::{Read, Write};

use crate::NetError;

const SOCKS_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const NO_AUTH: u8 = 0x00;
const ATYP_V4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

/// Ask the proxy to open a TCP connection to `host:port`.
///
/// On success the stream carries end-to-end application bytes. Every
/// deviation from the expected replies is an integrity violation that
/// abandons the stream.
pub fn establish<S: Read + Write>(stream: &mut S, host: &str, port: u16) -> Result<(), NetError> {
    if host.is_empty() {
        return Err(NetError::InvalidArgument("empty hostname"));
    }
    if host.len() > u8::MAX as usize {
        return Err(NetError::InvalidArgument("hostname longer than 255 bytes"));
    }

    greet(stream)?;
    request(stream, host, port)?;
    validate_reply(stream)
}

/// Version/method negotiation: offer exactly one method, no authentication.
fn greet<S: Read + Write>(stream: &mut S) -> Result<(), NetError> {
    stream.write_all(&[SOCKS_VERSION, 0x01, NO_AUTH])?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply)?;

    if reply[0] != SOCKS_VERSION {
        return Err(NetError::Protocol("proxy does not speak SOCKS5"));
    }
    if reply[1] != NO_AUTH {
        return Err(NetError::Protocol(
            "proxy refused unauthenticated access",
        ));
    }
    Ok(())
}

/// CONNECT request with a length-prefixed hostname target.
fn request<S: Write>(stream: &mut S, host: &str, port: u16) -> Result<(), NetError> {
    let mut message = Vec::with_capacity(7 + host.len());
    message.extend_from_slice(&[SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN]);
    message.push(host.len() as u8);
    message.extend_from_slice(host.as_bytes());
    message.extend_from_slice(&port.to_be_bytes());

    stream.write_all(&message)?;
    Ok(())
}

/// Read and check the proxy's reply, draining the bound address so the
/// stream starts clean.
fn validate_reply<S: Read>(stream: &mut S) -> Result<(), NetError> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head)?;

    if head[0] != SOCKS_VERSION {
        return Err(NetError::Protocol("reply from a non-SOCKS5 peer"));
    }
    if head[1] != 0x00 {
        return Err(NetError::Protocol("proxy could not reach the target"));
    }

    // Bound address: 4 or 16 fixed bytes, or length-prefixed for a domain,
    // then two port bytes. The content is irrelevant here.
    let addr_len = match head[3] {
        ATYP_V4 => 4,
        ATYP_V6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len)?;
            len[0] as usize
        }
        _ => return Err(NetError::Protocol("unknown address type in reply")),
    };

    let mut bound = [0u8; 255 + 2];
    stream.read_exact(&mut bound[..addr_len + 2])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::thread;

    /// A scripted proxy: asserts the client's bytes, answers from the
    /// script.
    fn with_mock_proxy(
        reply_greeting: Vec<u8>,
        reply_connect: Vec<u8>,
        run: impl FnOnce(&mut UnixStream) -> Result<(), NetError>,
    ) -> (Result<(), NetError>, Vec<u8>) {
        let (mut client, mut proxy) = UnixStream::pair().unwrap();

        let server = thread::spawn(move || {
            let mut greeting = [0u8; 3];
            proxy.read_exact(&mut greeting).unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            proxy.write_all(&reply_greeting).unwrap();
            if reply_greeting != [0x05, 0x00] {
                return Vec::new();
            }

            let mut head = [0u8; 5];
            proxy.read_exact(&mut head).unwrap();
            let mut rest = vec![0u8; head[4] as usize + 2];
            proxy.read_exact(&mut rest).unwrap();
            proxy.write_all(&reply_connect).unwrap();

            let mut request = head.to_vec();
            request.extend_from_slice(&rest);
            request
        });

        let result = run(&mut client);
        drop(client);
        (result, server.join().unwrap())
    }

    #[test]
    fn encodes_the_request_per_rfc() {
        let (result, request) = with_mock_proxy(
            vec![0x05, 0x00],
            vec![0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0],
            |stream| establish(stream, "example.com", 80),
        );

        result.unwrap();
        let mut expected = vec![0x05, 0x01, 0x00, 0x03, 11];
        expected.extend_from_slice(b"example.com");
        expected.extend_from_slice(&80u16.to_be_bytes());
        assert_eq!(request, expected);
    }

    #[test]
    fn accepts_v6_and_domain_bound_addresses() {
        let mut v6_reply = vec![0x05, 0x00, 0x00, 0x04];
        v6_reply.extend_from_slice(&[0u8; 18]);
        let (result, _) = with_mock_proxy(vec![0x05, 0x00], v6_reply, |stream| {
            establish(stream, "example.com", 443)
        });
        result.unwrap();

        let mut domain_reply = vec![0x05, 0x00, 0x00, 0x03, 4];
        domain_reply.extend_from_slice(b"exit");
        domain_reply.extend_from_slice(&[0x01, 0xBB]);
        let (result, _) = with_mock_proxy(vec![0x05, 0x00], domain_reply, |stream| {
            establish(stream, "example.com", 443)
        });
        result.unwrap();
    }

    #[test]
    fn rejects_a_proxy_that_wants_auth() {
        let (result, _) = with_mock_proxy(vec![0x05, 0xFF], Vec::new(), |stream| {
            establish(stream, "example.com", 80)
        });
        assert!(matches!(result, Err(NetError::Protocol(_))));
    }

    #[test]
    fn rejects_a_failed_connect_status() {
        let (result, _) = with_mock_proxy(
            vec![0x05, 0x00],
            vec![0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0],
            |stream| establish(stream, "example.com", 80),
        );
        assert!(matches!(result, Err(NetError::Protocol(_))));
    }

    #[test]
    fn rejects_oversized_hostnames() {
        let long = "x".repeat(256);
        let (mut a, _b) = UnixStream::pair().unwrap();
        assert!(matches!(
            establish(&mut a, &long, 80),
            Err(NetError::InvalidArgument(_))
        ));
    }
}
