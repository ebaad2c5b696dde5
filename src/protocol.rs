//! SOCKS4 / SOCKS4A wire codec.
//!
//! VN CD DSTPORT(2) DSTIP(4) USERID NUL, optionally followed by a second
//! NUL-terminated hostname when DSTIP is `0.0.0.X` with `X != 0` (SOCKS4A).

use url::Host;

const MIN_REQUEST_LEN: usize = 9;

/// Caps a request with no terminating NUL yet instead of growing unbounded.
pub const MAX_HANDSHAKE_BYTES: usize = 4096;

pub const MAX_HOSTNAME_LEN: usize = 255;

const SOCKS_VERSION: u8 = 4;
const COMMAND_CONNECT: u8 = 1;

/// The only status this core ever grants; anything else just closes.
const REPLY_GRANTED: u8 = 0x5A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Socks4,
    Socks4a,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub dst_port: u16,
    pub dst_ip: std::net::Ipv4Addr,
    pub variant: Variant,
    pub hostname: Option<String>,
}

impl Request {
    pub fn host(&self) -> Host<String> {
        match &self.hostname {
            Some(name) => Host::Domain(name.clone()),
            None => Host::Ipv4(self.dst_ip),
        }
    }

    /// Reply version byte is 0x00, not the request's 0x04.
    pub fn encode_reply(&self) -> [u8; 8] {
        let mut reply = [0u8; 8];
        reply[0] = 0x00;
        reply[1] = REPLY_GRANTED;
        reply[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        reply[4..8].copy_from_slice(&self.dst_ip.octets());
        reply
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes yet, caller retries once more arrive.
    Incomplete,
    Invalid(&'static str),
    /// Leading bytes consumed, alongside the parsed request.
    Ok(Request, usize),
}

/// Never mutates or truncates `buf`; caller advances past `consumed` bytes.
pub fn decode(buf: &[u8]) -> Decoded {
    if buf.len() > MAX_HANDSHAKE_BYTES {
        return Decoded::Invalid("handshake exceeds buffer cap");
    }
    if buf.len() < MIN_REQUEST_LEN {
        return Decoded::Incomplete;
    }

    let p1 = match buf[8..].iter().position(|&b| b == 0) {
        Some(offset) => 8 + offset,
        None => return Decoded::Incomplete,
    };

    let version = buf[0];
    let command = buf[1];
    let dst_port = u16::from_be_bytes([buf[2], buf[3]]);
    let dst_ip = std::net::Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);

    if version != SOCKS_VERSION {
        return Decoded::Invalid("bad version");
    }
    if command != COMMAND_CONNECT {
        return Decoded::Invalid("bad command");
    }

    let octets = dst_ip.octets();
    let is_socks4a = octets[0] == 0 && octets[1] == 0 && octets[2] == 0 && octets[3] != 0;

    if !is_socks4a {
        return Decoded::Ok(
            Request {
                dst_port,
                dst_ip,
                variant: Variant::Socks4,
                hostname: None,
            },
            p1 + 1,
        );
    }

    let p2 = match buf[p1 + 1..].iter().position(|&b| b == 0) {
        Some(offset) => p1 + 1 + offset,
        None => return Decoded::Incomplete,
    };

    let hostname_bytes = &buf[p1 + 1..p2];
    if hostname_bytes.is_empty() {
        return Decoded::Invalid("empty socks4a hostname");
    }
    if hostname_bytes.len() > MAX_HOSTNAME_LEN {
        return Decoded::Invalid("socks4a hostname too long");
    }
    let hostname = match std::str::from_utf8(hostname_bytes) {
        Ok(s) => s.to_string(),
        Err(_) => return Decoded::Invalid("socks4a hostname is not valid utf-8"),
    };

    Decoded::Ok(
        Request {
            dst_port,
            dst_ip,
            variant: Variant::Socks4a,
            hostname: Some(hostname),
        },
        p2 + 1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socks4_bytes(port: u16, ip: [u8; 4], userid: &[u8]) -> Vec<u8> {
        let mut buf = vec![4, 1];
        buf.extend_from_slice(&port.to_be_bytes());
        buf.extend_from_slice(&ip);
        buf.extend_from_slice(userid);
        buf.push(0);
        buf
    }

    fn socks4a_bytes(port: u16, x: u8, userid: &[u8], hostname: &[u8]) -> Vec<u8> {
        let mut buf = vec![4, 1];
        buf.extend_from_slice(&port.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, x]);
        buf.extend_from_slice(userid);
        buf.push(0);
        buf.extend_from_slice(hostname);
        buf.push(0);
        buf
    }

    #[test]
    fn eight_bytes_no_nul_is_incomplete() {
        let buf = [4, 1, 0, 80, 93, 184, 216, 34];
        assert_eq!(decode(&buf), Decoded::Incomplete);
    }

    #[test]
    fn socks4_connect_empty_userid() {
        let buf = socks4_bytes(80, [93, 184, 216, 34], b"");
        match decode(&buf) {
            Decoded::Ok(req, consumed) => {
                assert_eq!(consumed, buf.len());
                assert_eq!(req.dst_port, 80);
                assert_eq!(req.dst_ip, std::net::Ipv4Addr::new(93, 184, 216, 34));
                assert_eq!(req.variant, Variant::Socks4);
                assert_eq!(req.hostname, None);
                assert_eq!(
                    req.encode_reply(),
                    [0x00, 0x5A, 0x00, 0x50, 93, 184, 216, 34]
                );
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn socks4a_connect_resolves_hostname() {
        let buf = socks4a_bytes(80, 1, b"", b"example.com");
        match decode(&buf) {
            Decoded::Ok(req, consumed) => {
                assert_eq!(consumed, buf.len());
                assert_eq!(req.variant, Variant::Socks4a);
                assert_eq!(req.hostname.as_deref(), Some("example.com"));
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn bad_version_is_invalid() {
        let mut buf = socks4_bytes(80, [0, 0, 0, 1], b"");
        buf[0] = 5;
        assert_eq!(decode(&buf), Decoded::Invalid("bad version"));
    }

    #[test]
    fn bad_command_is_invalid() {
        let mut buf = socks4_bytes(80, [93, 184, 216, 34], b"");
        buf[1] = 2;
        assert_eq!(decode(&buf), Decoded::Invalid("bad command"));
    }

    #[test]
    fn dst_ip_all_zero_is_socks4_not_socks4a() {
        let buf = socks4_bytes(80, [0, 0, 0, 0], b"");
        match decode(&buf) {
            Decoded::Ok(req, _) => assert_eq!(req.variant, Variant::Socks4),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn socks4a_missing_second_nul_is_incomplete() {
        let mut buf = socks4a_bytes(80, 1, b"", b"example.com");
        buf.pop();
        assert_eq!(decode(&buf), Decoded::Incomplete);
    }

    #[test]
    fn socks4a_empty_hostname_is_invalid() {
        let buf = socks4a_bytes(80, 1, b"", b"");
        assert_eq!(decode(&buf), Decoded::Invalid("empty socks4a hostname"));
    }

    #[test]
    fn socks4a_hostname_too_long_is_invalid() {
        let hostname = vec![b'a'; MAX_HOSTNAME_LEN + 1];
        let buf = socks4a_bytes(80, 1, b"", &hostname);
        assert_eq!(
            decode(&buf),
            Decoded::Invalid("socks4a hostname too long")
        );
    }

    #[test]
    fn oversized_handshake_without_nul_is_invalid() {
        let buf = vec![4, 1, 0, 80, 0, 0, 0, 1]
            .into_iter()
            .chain(std::iter::repeat(b'x').take(MAX_HANDSHAKE_BYTES))
            .collect::<Vec<u8>>();
        assert_eq!(
            decode(&buf),
            Decoded::Invalid("handshake exceeds buffer cap")
        );
    }

    #[test]
    fn two_concatenated_requests_only_first_is_consumed() {
        let mut buf = socks4_bytes(80, [93, 184, 216, 34], b"");
        let tail = b"GET / HTTP/1.0\r\n\r\n".to_vec();
        buf.extend_from_slice(&tail);
        match decode(&buf) {
            Decoded::Ok(_, consumed) => {
                assert_eq!(consumed, buf.len() - tail.len());
                assert_eq!(&buf[consumed..], &tail[..]);
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn decoder_is_monotonic_on_partial_then_complete_input() {
        let full = socks4_bytes(80, [93, 184, 216, 34], b"");
        let partial = &full[..6];
        assert_eq!(decode(partial), Decoded::Incomplete);
        assert!(matches!(decode(&full), Decoded::Ok(_, _)));
    }
}
