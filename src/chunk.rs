//! Chunked transfer-coding codec (spec.md §4.4 ChunkCodec).
//!
//! Decoding reuses the same "scan until terminator, advance the ring"
//! shape as `parser::scan_line`, since a chunk-size line is just another
//! CRLF-terminated line with a restricted alphabet. Encoding is grounded on
//! the teacher's `decompressors.rs` buffered-writer style: accumulate into a
//! `Vec<u8>`, then hand back one complete chunk at a time.

use crate::error::{Error, ParseKind, Result};
use crate::ring::Ring;

/// A single decoded chunk-size line (spec.md §4.4 "chunk-size" state).
pub enum ChunkSize {
    /// `size` bytes of chunk data follow, then a CRLF.
    Data(usize),
    /// The zero-length final chunk; trailers (if any) follow.
    Last,
}

/// Maximum chunk size accepted, per spec.md §4.4 "reject chunk sizes at or
/// above 16 MiB to bound memory use".
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Parses a chunk-size line starting at `start`: `hex-digits [ ";" ext ] CRLF`.
/// Returns `(ChunkSize, consumed_len)`, or `None` if more data is needed.
pub fn parse_chunk_size(ring: &Ring, start: usize) -> Result<Option<(ChunkSize, usize)>> {
    let mut cursor = start;
    let mut digits = 0usize;
    let mut value: u64 = 0;
    loop {
        let b = match ring.read_at(cursor) {
            Some(b) => b,
            None => return Ok(None),
        };
        match b.to_ascii_lowercase() {
            b'0'..=b'9' => {
                value = value * 16 + (b - b'0') as u64;
                digits += 1;
                cursor += 1;
            }
            b'a'..=b'f' => {
                value = value * 16 + (b - b'a' + 10) as u64;
                digits += 1;
                cursor += 1;
            }
            _ => break,
        }
        if value as usize > MAX_CHUNK_SIZE {
            return Err(Error::Parse {
                position: cursor,
                kind: ParseKind::ChunkSize,
            });
        }
    }
    if digits == 0 {
        return Err(Error::Parse {
            position: cursor,
            kind: ParseKind::ChunkSize,
        });
    }
    // Skip a chunk-extension (`;token[=value]`) without interpreting it.
    loop {
        match ring.read_at(cursor) {
            Some(b'\r') | Some(b'\n') => break,
            Some(_) => cursor += 1,
            None => return Ok(None),
        }
    }
    let (eol_len, _cr) = match match_crlf_or_lf(ring, cursor) {
        Some(v) => v,
        None => return Ok(None),
    };
    let total = cursor + eol_len - start;
    let kind = if value == 0 {
        ChunkSize::Last
    } else {
        ChunkSize::Data(value as usize)
    };
    Ok(Some((kind, total)))
}

/// Skips the CRLF that follows a chunk's data bytes. Returns the number of
/// bytes consumed, or `None` if more data is needed.
pub fn skip_chunk_crlf(ring: &Ring, start: usize) -> Option<usize> {
    match_crlf_or_lf(ring, start).map(|(len, _)| len)
}

fn match_crlf_or_lf(ring: &Ring, at: usize) -> Option<(usize, bool)> {
    match ring.read_at(at)? {
        b'\n' => Some((1, false)),
        b'\r' => match ring.read_at(at + 1)? {
            b'\n' => Some((2, true)),
            _ => None,
        },
        _ => None,
    }
}

/// Renders a chunk-size line for a chunk of `len` bytes: a fixed 6-hex-digit
/// size padded left with zeros, followed by `add_crlf + 1` CRLFs (spec.md
/// §4.4 `emit_chunk_size`). The fixed width lets a writer reserve an 8-byte
/// slot (6 digits + one CRLF) up front and backpatch it once the payload
/// length is known, which is exactly what `compress::run_chunk_pipeline`
/// does. `len` must fit in 6 hex digits (below `MAX_CHUNK_SIZE`).
pub fn emit_chunk_size(len: usize, add_crlf: usize) -> Vec<u8> {
    debug_assert!(len <= 0xFF_FFFF, "chunk size does not fit 6 hex digits");
    let mut out = format!("{:06x}", len).into_bytes();
    for _ in 0..=add_crlf {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// The terminal zero-length chunk plus an empty trailer block.
pub fn emit_last_chunk() -> &'static [u8] {
    b"0\r\n\r\n"
}

/// Copies trailer lines verbatim, up to and including the blank line that
/// ends them, without interpreting them as headers (spec.md §4.4
/// `forward_trailers`: trailers are opaque bytes the core passes through).
pub fn forward_trailers(ring: &Ring, start: usize) -> Option<(Vec<u8>, usize)> {
    let mut cursor = start;
    loop {
        let mut content_len = 0;
        loop {
            match ring.read_at(cursor)? {
                b'\n' => {
                    cursor += 1;
                    break;
                }
                b'\r' => {
                    cursor += if ring.read_at(cursor + 1)? == b'\n' { 2 } else { 1 };
                    break;
                }
                _ => {
                    cursor += 1;
                    content_len += 1;
                }
            }
        }
        if content_len == 0 {
            break;
        }
    }
    let total = cursor - start;
    Some((ring.copy_out(start, total), total))
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"0\r\n", 0)]
    #[case(b"a\r\n", 10)]
    #[case(b"1a\r\n", 26)]
    #[case(b"ff\r\n", 255)]
    fn parses_various_chunk_sizes(#[case] input: &[u8], #[case] expected: usize) {
        let mut ring = Ring::new(64, 8);
        ring.fill(input).unwrap();
        let (size, len) = parse_chunk_size(&ring, 0).unwrap().unwrap();
        let value = match size {
            ChunkSize::Last => 0,
            ChunkSize::Data(v) => v,
        };
        assert_eq!(value, expected);
        assert_eq!(len, input.len());
    }

    #[test]
    fn parses_simple_chunk_size() {
        let mut ring = Ring::new(64, 8);
        ring.fill(b"1a\r\n").unwrap();
        let (size, len) = parse_chunk_size(&ring, 0).unwrap().unwrap();
        assert!(matches!(size, ChunkSize::Data(26)));
        assert_eq!(len, 4);
    }

    #[test]
    fn parses_last_chunk() {
        let mut ring = Ring::new(64, 8);
        ring.fill(b"0\r\n").unwrap();
        let (size, len) = parse_chunk_size(&ring, 0).unwrap().unwrap();
        assert!(matches!(size, ChunkSize::Last));
        assert_eq!(len, 3);
    }

    #[test]
    fn parses_chunk_size_with_extension() {
        let mut ring = Ring::new(64, 8);
        ring.fill(b"4;foo=bar\r\n").unwrap();
        let (size, len) = parse_chunk_size(&ring, 0).unwrap().unwrap();
        assert!(matches!(size, ChunkSize::Data(4)));
        assert_eq!(len, 11);
    }

    #[test]
    fn rejects_oversized_chunk() {
        let mut ring = Ring::new(64, 8);
        ring.fill(b"ffffffff\r\n").unwrap();
        let err = parse_chunk_size(&ring, 0).unwrap_err();
        assert!(matches!(err, Error::Parse { kind: ParseKind::ChunkSize, .. }));
    }

    #[test]
    fn emits_fixed_width_hex_chunk_size() {
        assert_eq!(emit_chunk_size(26, 0), b"00001a\r\n");
        assert_eq!(emit_chunk_size(0, 0), b"000000\r\n");
    }

    #[test]
    fn emit_chunk_size_repeats_crlf_per_add_crlf() {
        assert_eq!(emit_chunk_size(1, 1), b"000001\r\n\r\n");
    }

    #[test]
    fn suspends_on_partial_chunk_size() {
        let mut ring = Ring::new(64, 8);
        ring.fill(b"1a").unwrap();
        assert!(parse_chunk_size(&ring, 0).unwrap().is_none());
    }
}
