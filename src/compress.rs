//! Response compression pipeline (spec.md §4.5 CompressionPipeline).
//!
//! Grounded on the teacher's `decompressors.rs` `BufWriter`/`Decompress`
//! trait split: one small trait per algorithm, a buffered `Cursor<Vec<u8>>`
//! sink underneath, `write`/`flush`/`finish` as the algorithm-agnostic
//! contract. Here the direction is reversed (encode, not decode) and the
//! sink is a plain growable `Vec<u8>` rather than a fixed `Cursor`, since an
//! encoder's output can legitimately be smaller or larger than its input
//! per call.

use crate::chunk;
use crate::config::CompressionConfig;
use crate::error::{Error, Result};
use crate::header_index::HeaderIndex;
use crate::ring::Ring;
use bstr::ByteSlice;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use std::io::Write;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Identity,
    Gzip,
    Deflate,
}

impl Algorithm {
    /// Maps a `Content-Encoding`/`Accept-Encoding` token to an algorithm,
    /// per spec.md §4.5 "algorithm registry". Unknown tokens map to
    /// `None`, not `Identity`, so the caller can distinguish "not offered"
    /// from "explicitly identity".
    pub fn from_token(token: &[u8]) -> Option<Algorithm> {
        let lower: Vec<u8> = token.iter().map(|b| b.to_ascii_lowercase()).collect();
        match lower.as_slice() {
            b"identity" => Some(Algorithm::Identity),
            b"gzip" | b"x-gzip" => Some(Algorithm::Gzip),
            b"deflate" => Some(Algorithm::Deflate),
            _ => None,
        }
    }

    pub fn content_encoding_token(self) -> &'static str {
        match self {
            Algorithm::Identity => "identity",
            Algorithm::Gzip => "gzip",
            Algorithm::Deflate => "deflate",
        }
    }
}

enum Inner {
    Identity,
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
}

/// A single response body's compressor: `init` then any number of
/// `add_data`/`flush`, then one `end` (spec.md §4.5 `init`/`add_data`/
/// `flush`/`reset`/`end` contract).
pub struct CompressionPipeline {
    inner: Inner,
    algorithm: Algorithm,
    level: u32,
    bytes_in: u64,
    bytes_out: u64,
}

impl CompressionPipeline {
    pub fn init(algorithm: Algorithm, level: u32) -> Self {
        let inner = match algorithm {
            Algorithm::Identity => Inner::Identity,
            Algorithm::Gzip => Inner::Gzip(GzEncoder::new(Vec::new(), Compression::new(level))),
            Algorithm::Deflate => {
                Inner::Deflate(DeflateEncoder::new(Vec::new(), Compression::new(level)))
            }
        };
        Self {
            inner,
            algorithm,
            level,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Feeds `data` through the pipeline and returns whatever compressed
    /// bytes are ready to forward. Identity returns `data` unchanged.
    pub fn add_data(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.bytes_in += data.len() as u64;
        let out = match &mut self.inner {
            Inner::Identity => data.to_vec(),
            Inner::Gzip(enc) => {
                enc.write_all(data)
                    .map_err(|_| Error::Compression("gzip write failed"))?;
                std::mem::take(enc.get_mut())
            }
            Inner::Deflate(enc) => {
                enc.write_all(data)
                    .map_err(|_| Error::Compression("deflate write failed"))?;
                std::mem::take(enc.get_mut())
            }
        };
        self.bytes_out += out.len() as u64;
        Ok(out)
    }

    /// Forces any buffered bytes out without ending the stream.
    pub fn flush(&mut self) -> Result<Vec<u8>> {
        match &mut self.inner {
            Inner::Identity => Ok(Vec::new()),
            Inner::Gzip(enc) => {
                enc.flush()
                    .map_err(|_| Error::Compression("gzip flush failed"))?;
                Ok(std::mem::take(enc.get_mut()))
            }
            Inner::Deflate(enc) => {
                enc.flush()
                    .map_err(|_| Error::Compression("deflate flush failed"))?;
                Ok(std::mem::take(enc.get_mut()))
            }
        }
    }

    /// Resets the pipeline to re-use for a new message on the same
    /// connection without reallocating (spec.md §4.5 `reset`).
    pub fn reset(&mut self) {
        *self = CompressionPipeline::init(self.algorithm, self.level);
    }

    /// Finalizes the stream, returning any trailing bytes (e.g. gzip's
    /// CRC32 + size footer).
    pub fn end(self) -> Result<Vec<u8>> {
        match self.inner {
            Inner::Identity => Ok(Vec::new()),
            Inner::Gzip(enc) => enc
                .finish()
                .map_err(|_| Error::Compression("gzip finish failed")),
            Inner::Deflate(enc) => enc
                .finish()
                .map_err(|_| Error::Compression("deflate finish failed")),
        }
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Ends the current stream and re-`init`s in place with the same
    /// algorithm/level, so one `CompressionPipeline` can serve a whole
    /// keep-alive connection across several response bodies (spec.md §4.5
    /// `reset`), while still giving the caller the trailing bytes of the
    /// stream that just ended.
    pub fn finish_and_reset(&mut self) -> Result<Vec<u8>> {
        let algorithm = self.algorithm;
        let level = self.level;
        let finished = std::mem::replace(self, CompressionPipeline::init(algorithm, level));
        finished.end()
    }
}

/// Runs the buffered response-body pipeline (spec.md §4.5 steps 1–6) over
/// one complete, already-dechunked response body: reserves the 8-byte
/// chunk-size slot, compresses the whole body through `pipeline`, then
/// backpatches the slot with the real compressed length and appends the
/// terminating `0\r\n\r\n`. Forwarding the unmodified headers ahead of this
/// is the caller's job, same as the rest of this crate's header handling.
pub fn run_chunk_pipeline(pipeline: &mut CompressionPipeline, body: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; 8];
    out.extend(pipeline.add_data(body)?);
    out.extend(pipeline.finish_and_reset()?);
    let payload_len = out.len() - 8;
    let slot = chunk::emit_chunk_size(payload_len, 0);
    out[..slot.len()].copy_from_slice(&slot);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(chunk::emit_last_chunk());
    Ok(out)
}

/// Picks a compression level from the current output rate and the
/// configured ceiling/floor, per spec.md §4.5 "rate-adaptive level
/// adjustment": throttle down when output is running hot, relax back up
/// once it cools off, never leaving `[min_level, max_level]`.
pub fn adapt_level(cfg: &CompressionConfig, current_level: u32, recent_rate_bytes_per_sec: u64) -> u32 {
    if recent_rate_bytes_per_sec >= cfg.rate_ceiling {
        current_level.saturating_sub(1).max(cfg.min_level)
    } else if recent_rate_bytes_per_sec <= cfg.rate_floor {
        (current_level + 1).min(cfg.max_level)
    } else {
        current_level
    }
}

/// Everything `select_algorithm` needs to apply spec.md §4.5's response
/// selection rules, gathered by the caller from the request/response
/// headers and status line rather than re-parsed here.
pub struct ResponseSelection<'a> {
    pub accept_encoding: Option<&'a [u8]>,
    /// Minor version digit, e.g. `1` for HTTP/1.1, `0` for HTTP/1.0.
    pub http_minor_version: u8,
    pub status: u16,
    /// `Content-Length`, if the response declared one.
    pub content_length: Option<usize>,
    pub is_chunked: bool,
    pub existing_content_encoding: Option<&'a [u8]>,
    pub cache_control: Option<&'a [u8]>,
    pub content_type: Option<&'a [u8]>,
}

fn has_no_transform(cache_control: &[u8]) -> bool {
    cache_control
        .split(|&b| b == b',')
        .any(|tok| tok.trim().eq_ignore_ascii_case(b"no-transform"))
}

/// Selects whether (and how) to compress a response, per spec.md §4.5
/// "selection rules (response)". Refuses when: no algorithm was offered;
/// HTTP version is below 1.1; status isn't 200; the body is empty and not
/// chunked; a `Content-Encoding` is already set; `Cache-Control:
/// no-transform` is present; `Content-Type` begins with "multipart"; a
/// configured type whitelist exists and the response type isn't in it; or
/// measured CPU idle is below the configured floor. Prefers `gzip` over
/// `deflate` when both are acceptable.
pub fn select_algorithm(cfg: &CompressionConfig, sel: &ResponseSelection, cpu_idle_pct: u8) -> Option<Algorithm> {
    if sel.http_minor_version < 1 {
        return None;
    }
    if sel.status != 200 {
        return None;
    }
    let has_body = sel.is_chunked || sel.content_length.unwrap_or(0) > 0;
    if !has_body {
        return None;
    }
    if let Some(existing) = sel.existing_content_encoding {
        if Algorithm::from_token(existing) != Some(Algorithm::Identity) {
            return None;
        }
    }
    if sel.cache_control.is_some_and(has_no_transform) {
        return None;
    }
    if sel.content_type.is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with(b"multipart")) {
        return None;
    }
    if let Some(whitelist) = &cfg.type_whitelist {
        let ct = sel.content_type.unwrap_or(b"");
        let base = ct.split(|&b| b == b';').next().unwrap_or(ct).trim();
        if !whitelist.iter().any(|allowed| base.eq_ignore_ascii_case(allowed.as_bytes())) {
            return None;
        }
    }
    if cfg.min_idle_pct > 0 && cpu_idle_pct < cfg.min_idle_pct {
        return None;
    }
    let offered = sel.accept_encoding?;
    let tokens: Vec<&[u8]> = offered.split(|&b| b == b',').map(|t| t.trim()).collect();
    let offers = |name: &[u8]| tokens.iter().any(|t| t.eq_ignore_ascii_case(name));
    if offers(b"gzip") {
        Some(Algorithm::Gzip)
    } else if offers(b"deflate") {
        Some(Algorithm::Deflate)
    } else {
        None
    }
}

/// Rewrites the response headers to reflect a chosen compression
/// algorithm, per spec.md §4.5 "on success": strips `Content-Length`, adds
/// `Transfer-Encoding: chunked`, and adds `Content-Encoding: <name>` unless
/// identity. Returns the cumulative displacement to apply to offsets held
/// past the header block.
pub fn apply_response_headers(ring: &mut Ring, headers: &mut HeaderIndex, sol: usize, algorithm: Algorithm) -> Result<isize> {
    let mut delta = 0isize;
    if let Some(ctx) = headers.find(ring, b"content-length", None) {
        delta += headers.remove_line(ring, ctx);
    }
    let mut line = b"Transfer-Encoding: chunked\r\n".to_vec();
    let at = sol + headers.end_offset();
    delta += ring.insert(at, &line)?;
    headers.push(line.len() - 2, true)?;
    if algorithm != Algorithm::Identity {
        line.clear();
        line.extend_from_slice(b"Content-Encoding: ");
        line.extend_from_slice(algorithm.content_encoding_token().as_bytes());
        line.extend_from_slice(b"\r\n");
        let at = sol + headers.end_offset();
        delta += ring.insert(at, &line)?;
        headers.push(line.len() - 2, true)?;
    }
    Ok(delta)
}

/// Known-bad legacy user agents (spec.md §4.5 "selection rules (request)"):
/// `Mozilla/4` disables compression outright; MSIE identifies itself
/// through the same token but is exempted from version 6 with SP2 onward,
/// and from version 7 onward unconditionally.
pub fn request_allows_compression(user_agent: &[u8]) -> bool {
    if !user_agent.contains_str("Mozilla/4") {
        return true;
    }
    if let Some(msie_at) = user_agent.find("MSIE ") {
        let rest = &user_agent[msie_at + "MSIE ".len()..];
        let major: u32 = rest
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .fold(0u32, |acc, &b| acc * 10 + (b - b'0') as u32);
        if major >= 7 {
            return true;
        }
        if major == 6 && user_agent.contains_str("SP2") {
            return true;
        }
    }
    false
}

/// Strips every `Accept-Encoding` header from a request (spec.md §4.5
/// "offload mode"), so the backend never compresses on its own. Returns the
/// cumulative displacement to apply to offsets held past the header block.
pub fn strip_accept_encoding(ring: &mut Ring, headers: &mut HeaderIndex) -> isize {
    let mut delta = 0isize;
    while let Some(ctx) = headers.find(ring, b"accept-encoding", None) {
        delta += headers.remove_line(ring, ctx);
    }
    delta
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_pipeline_passes_through() {
        let mut p = CompressionPipeline::init(Algorithm::Identity, 6);
        let out = p.add_data(b"hello").unwrap();
        assert_eq!(out, b"hello");
        assert!(p.end().unwrap().is_empty());
    }

    #[test]
    fn gzip_pipeline_round_trips_through_flate2_decoder() {
        let mut p = CompressionPipeline::init(Algorithm::Gzip, 6);
        let mut compressed = p.add_data(b"hello world").unwrap();
        compressed.extend(p.end().unwrap());
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    fn base_selection() -> ResponseSelection<'static> {
        ResponseSelection {
            accept_encoding: Some(b"deflate, gzip"),
            http_minor_version: 1,
            status: 200,
            content_length: Some(100),
            is_chunked: false,
            existing_content_encoding: None,
            cache_control: None,
            content_type: Some(b"text/html"),
        }
    }

    #[test]
    fn selects_gzip_over_deflate() {
        let cfg = CompressionConfig::default();
        let algo = select_algorithm(&cfg, &base_selection(), 100);
        assert_eq!(algo, Some(Algorithm::Gzip));
    }

    #[test]
    fn skips_compression_when_already_encoded() {
        let cfg = CompressionConfig::default();
        let sel = ResponseSelection { existing_content_encoding: Some(b"br"), ..base_selection() };
        assert_eq!(select_algorithm(&cfg, &sel, 100), None);
    }

    #[test]
    fn skips_compression_below_http_1_1() {
        let cfg = CompressionConfig::default();
        let sel = ResponseSelection { http_minor_version: 0, ..base_selection() };
        assert_eq!(select_algorithm(&cfg, &sel, 100), None);
    }

    #[test]
    fn skips_compression_for_no_transform() {
        let cfg = CompressionConfig::default();
        let sel = ResponseSelection { cache_control: Some(b"no-transform"), ..base_selection() };
        assert_eq!(select_algorithm(&cfg, &sel, 100), None);
    }

    #[test]
    fn skips_compression_for_multipart() {
        let cfg = CompressionConfig::default();
        let sel = ResponseSelection { content_type: Some(b"multipart/form-data; boundary=x"), ..base_selection() };
        assert_eq!(select_algorithm(&cfg, &sel, 100), None);
    }

    #[test]
    fn skips_compression_when_type_not_whitelisted() {
        let cfg = CompressionConfig { type_whitelist: Some(vec!["application/json".to_string()]), ..CompressionConfig::default() };
        assert_eq!(select_algorithm(&cfg, &base_selection(), 100), None);
    }

    #[test]
    fn allows_whitelisted_type() {
        let cfg = CompressionConfig { type_whitelist: Some(vec!["text/html".to_string()]), ..CompressionConfig::default() };
        assert_eq!(select_algorithm(&cfg, &base_selection(), 100), Some(Algorithm::Gzip));
    }

    #[test]
    fn skips_compression_when_cpu_too_busy() {
        let cfg = CompressionConfig { min_idle_pct: 20, ..CompressionConfig::default() };
        assert_eq!(select_algorithm(&cfg, &base_selection(), 10), None);
    }

    #[test]
    fn run_chunk_pipeline_produces_a_backpatched_chunk() {
        let mut pipeline = CompressionPipeline::init(Algorithm::Gzip, 6);
        let out = run_chunk_pipeline(&mut pipeline, b"hello world").unwrap();
        assert!(out.ends_with(chunk::emit_last_chunk()));
        let size_hex = std::str::from_utf8(&out[..6]).unwrap();
        let declared: usize = usize::from_str_radix(size_hex, 16).unwrap();
        let payload_len = out.len() - 8 - chunk::emit_last_chunk().len();
        assert_eq!(declared, payload_len);
    }

    #[test]
    fn legacy_mozilla_4_disables_compression() {
        assert!(!request_allows_compression(b"Mozilla/4.0 (compatible;)"));
    }

    #[test]
    fn msie_7_is_exempt_from_the_mozilla_4_rule() {
        assert!(request_allows_compression(b"Mozilla/4.0 (compatible; MSIE 7.0; Windows NT)"));
    }

    #[test]
    fn msie_6_without_sp2_is_not_exempt() {
        assert!(!request_allows_compression(b"Mozilla/4.0 (compatible; MSIE 6.0; Windows NT)"));
    }

    #[test]
    fn msie_6_with_sp2_is_exempt() {
        assert!(request_allows_compression(b"Mozilla/4.0 (compatible; MSIE 6.0; SP2; Windows NT)"));
    }

    #[test]
    fn strip_accept_encoding_removes_all_matching_headers() {
        let mut ring = Ring::new(256, 8);
        let mut idx = HeaderIndex::new(16);
        idx.start(0);
        for line in [&b"Accept-Encoding: gzip"[..], b"Host: x", b"Accept-Encoding: br"] {
            ring.fill(line).unwrap();
            ring.fill(b"\r\n").unwrap();
            idx.push(line.len(), true).unwrap();
        }
        strip_accept_encoding(&mut ring, &mut idx);
        assert!(idx.find(&ring, b"accept-encoding", None).is_none());
        assert!(idx.find(&ring, b"host", None).is_some());
    }

    #[test]
    fn adapt_level_throttles_down_when_hot() {
        let cfg = CompressionConfig::default();
        let level = adapt_level(&cfg, 6, cfg.rate_ceiling + 1);
        assert_eq!(level, 5);
    }

    #[test]
    fn adapt_level_relaxes_up_when_cold() {
        let cfg = CompressionConfig::default();
        let level = adapt_level(&cfg, 3, cfg.rate_floor - 1);
        assert_eq!(level, 4);
    }
}
