//! PROXY protocol v1 framing (spec.md §6, peek-then-consume).
//!
//! A connection-accept-time concern the distilled spec names but doesn't
//! spell out (spec.md §8 scenario 6 exercises it); implemented here as a
//! pure function over a byte slice rather than against `Ring` directly,
//! since the caller needs to *peek* the header before deciding whether to
//! consume it — exactly the slice-in, length-out shape the teacher's
//! `decompressors.rs` `GzHeader::parse` uses for the same "peek a
//! self-describing prefix" problem.

use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyHeader {
    /// `PROXY UNKNOWN\r\n`: a proxied connection whose real endpoints the
    /// sender declines to disclose.
    Unknown,
    /// `PROXY TCP4|TCP6 src_ip dst_ip src_port dst_port\r\n`.
    Tcp {
        source: IpAddr,
        destination: IpAddr,
        source_port: u16,
        destination_port: u16,
    },
}

const SIGNATURE: &[u8] = b"PROXY ";
/// RFC-recommended worst case: `PROXY TCP6 <45> <45> <5> <5>\r\n`.
const MAX_HEADER_LEN: usize = 107;

/// Attempts to parse a PROXY protocol v1 header from the start of `buf`.
/// Returns `Some((header, consumed_len))` on success, `None` if `buf`
/// doesn't start with the signature at all (not a PROXY connection) *or*
/// doesn't yet contain a full line (caller should peek more and retry) —
/// callers distinguish the two with `looks_like_proxy_protocol`.
pub fn parse(buf: &[u8]) -> Option<(ProxyHeader, usize)> {
    if !buf.starts_with(SIGNATURE) {
        return None;
    }
    let search_len = buf.len().min(MAX_HEADER_LEN);
    let nl = buf[..search_len].iter().position(|&b| b == b'\n')?;
    if nl == 0 || buf[nl - 1] != b'\r' {
        return None;
    }
    let line = &buf[SIGNATURE.len()..nl - 1];
    let header = parse_line(line)?;
    Some((header, nl + 1))
}

/// Whether `buf`'s prefix could be the start of a PROXY protocol line, used
/// to decide whether to keep buffering before giving up and treating the
/// connection as a plain one.
pub fn looks_like_proxy_protocol(buf: &[u8]) -> bool {
    let n = buf.len().min(SIGNATURE.len());
    buf[..n] == SIGNATURE[..n]
}

fn parse_line(line: &[u8]) -> Option<ProxyHeader> {
    let text = std::str::from_utf8(line).ok()?;
    let mut fields = text.split(' ');
    match fields.next()? {
        "UNKNOWN" => Some(ProxyHeader::Unknown),
        "TCP4" | "TCP6" => {
            let source: IpAddr = fields.next()?.parse().ok()?;
            let destination: IpAddr = fields.next()?.parse().ok()?;
            let source_port: u16 = fields.next()?.parse().ok()?;
            let destination_port: u16 = fields.next()?.parse().ok()?;
            if fields.next().is_some() {
                return None;
            }
            Some(ProxyHeader::Tcp {
                source,
                destination,
                source_port,
                destination_port,
            })
        }
        _ => None,
    }
}

/// Renders a header this core would send when acting as the PROXY
/// protocol's sender (spec.md §6 "peek-then-consume framing" applies
/// symmetrically to the write side).
pub fn render(header: &ProxyHeader) -> Vec<u8> {
    match header {
        ProxyHeader::Unknown => b"PROXY UNKNOWN\r\n".to_vec(),
        ProxyHeader::Tcp {
            source,
            destination,
            source_port,
            destination_port,
        } => {
            let family = match (source, destination) {
                (IpAddr::V4(_), IpAddr::V4(_)) => "TCP4",
                _ => "TCP6",
            };
            format!(
                "PROXY {} {} {} {} {}\r\n",
                family, source, destination, source_port, destination_port
            )
            .into_bytes()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_tcp4_header() {
        let input = b"PROXY TCP4 192.168.0.1 192.168.0.11 56324 443\r\nGET / HTTP/1.1\r\n";
        let (header, len) = parse(input).unwrap();
        assert_eq!(
            header,
            ProxyHeader::Tcp {
                source: "192.168.0.1".parse().unwrap(),
                destination: "192.168.0.11".parse().unwrap(),
                source_port: 56324,
                destination_port: 443,
            }
        );
        assert_eq!(&input[len..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn parses_unknown_header() {
        let input = b"PROXY UNKNOWN\r\nrest";
        let (header, len) = parse(input).unwrap();
        assert_eq!(header, ProxyHeader::Unknown);
        assert_eq!(&input[len..], b"rest");
    }

    #[test]
    fn non_proxy_input_returns_none() {
        assert!(parse(b"GET / HTTP/1.1\r\n").is_none());
    }

    #[test]
    fn render_round_trips_through_parse() {
        let header = ProxyHeader::Tcp {
            source: "10.0.0.1".parse().unwrap(),
            destination: "10.0.0.2".parse().unwrap(),
            source_port: 1111,
            destination_port: 2222,
        };
        let rendered = render(&header);
        let (parsed, len) = parse(&rendered).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(len, rendered.len());
    }
}
