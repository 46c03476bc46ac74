//! Backend persistence cookie processing (spec.md §4.6 CookieProcessor).
//!
//! Request-side parsing follows the teacher's `headers.rs` style of
//! trimming around delimiters by hand rather than reaching for `nom` here,
//! since cookie pairs are a flat `;`-delimited list, not a recursive
//! grammar. The base64 30-bit date is encoded/decoded with `base64`
//! (already a teacher dependency via the pack) and `time` supplies the
//! wall-clock comparisons.

use crate::config::{CookieConfig, CookieMode};
use crate::header_index::{Context, HeaderIndex};
use crate::ring::Ring;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bstr::ByteSlice;
use time::OffsetDateTime;

/// One `name=value` pair from a `Cookie:` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCookie {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

/// Splits a `Cookie:` header value into pairs, skipping RFC 2965
/// `$`-prefixed attributes (`$Path`, `$Domain`, `$Version`).
pub fn parse_request_cookies(value: &[u8]) -> Vec<RequestCookie> {
    value
        .split(|&b| b == b';')
        .filter_map(|raw| {
            let pair = raw.trim();
            if pair.is_empty() || pair.starts_with(b"$") {
                return None;
            }
            let eq = pair.iter().position(|&b| b == b'=')?;
            Some(RequestCookie {
                name: pair[..eq].trim().to_vec(),
                value: pair[eq + 1..].trim().to_vec(),
            })
        })
        .collect()
}

/// The persistence cookie's value, decoded according to the configured
/// `CookieMode` (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistCookie {
    pub server_id: Vec<u8>,
    pub opaque: Option<Vec<u8>>,
    pub last_seen: Option<i64>,
    pub first_seen: Option<i64>,
}

/// Minutes since the Unix epoch, truncated to 30 bits of range (spec.md §9
/// note (c)): kept as `i64` throughout so the truncation only happens at
/// the encode boundary, never silently in the middle of a comparison.
fn minutes_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp() / 60
}

const DATE_BITS: u32 = 30;
const DATE_MASK: i64 = (1i64 << DATE_BITS) - 1;

fn encode_date(minutes: i64) -> String {
    let truncated = (minutes & DATE_MASK) as u32;
    URL_SAFE_NO_PAD.encode(truncated.to_be_bytes())
}

/// Decodes a base64 30-bit minute counter, widening it back against
/// `reference_minutes` (normally "now") so values near a 30-bit wraparound
/// boundary resolve to the closest real instant rather than jumping ~2044
/// years away.
fn decode_date(encoded: &[u8], reference_minutes: i64) -> Option<i64> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    if bytes.len() != 4 {
        return None;
    }
    let truncated = u32::from_be_bytes(bytes.try_into().ok()?) as i64 & DATE_MASK;
    let period = DATE_MASK + 1;
    let base = reference_minutes - (reference_minutes % period);
    let candidates = [base - period, base, base + period];
    candidates
        .into_iter()
        .map(|c| c + truncated)
        .min_by_key(|c| (c - reference_minutes).abs())
}

/// Parses a persistence cookie value per the configured mode.
pub fn parse_persist_cookie(cfg: &CookieConfig, value: &[u8]) -> Option<PersistCookie> {
    match cfg.mode {
        CookieMode::Ignore => None,
        CookieMode::Prefix => {
            let sep = value.iter().position(|&b| b == b'~')?;
            Some(PersistCookie {
                server_id: value[..sep].to_vec(),
                opaque: Some(value[sep + 1..].to_vec()),
                last_seen: None,
                first_seen: None,
            })
        }
        CookieMode::Passive | CookieMode::Insert | CookieMode::InsertIndirect | CookieMode::Rewrite => {
            let mut parts = value.split(|&b| b == b'|');
            let server_id = parts.next()?.to_vec();
            let now = minutes_now();
            let last_seen = parts.next().and_then(|p| decode_date(p, now));
            let first_seen = parts.next().and_then(|p| decode_date(p, now));
            Some(PersistCookie {
                server_id,
                opaque: None,
                last_seen,
                first_seen,
            })
        }
    }
}

/// Builds the `Set-Cookie` value for a chosen backend, in the format the
/// configured mode expects.
pub fn render_persist_cookie(cfg: &CookieConfig, server_id: &[u8], existing: Option<&PersistCookie>) -> Vec<u8> {
    let now = minutes_now();
    match cfg.mode {
        CookieMode::Ignore | CookieMode::Prefix => server_id.to_vec(),
        CookieMode::Passive | CookieMode::Insert | CookieMode::InsertIndirect | CookieMode::Rewrite => {
            let first_seen = existing.and_then(|c| c.first_seen).unwrap_or(now);
            let mut out = server_id.to_vec();
            out.push(b'|');
            out.extend(encode_date(now).into_bytes());
            out.push(b'|');
            out.extend(encode_date(first_seen).into_bytes());
            out
        }
    }
}

/// Whether a previously seen persistence cookie is stale enough that it
/// should no longer pin the connection to its recorded backend, per the
/// configured `maxlife`/`maxidle` (spec.md §4.6 "expiry/clock-drift
/// checks"). Tolerates up to one minute of clock drift in either
/// direction before treating a future-dated cookie as bogus.
pub fn is_stale(cfg: &CookieConfig, cookie: &PersistCookie) -> bool {
    let now = minutes_now();
    const DRIFT_TOLERANCE_MINUTES: i64 = 1;
    if let Some(maxidle) = cfg.maxidle {
        if let Some(last_seen) = cookie.last_seen {
            if now - last_seen > maxidle / 60 + DRIFT_TOLERANCE_MINUTES {
                return true;
            }
        }
    }
    if let Some(maxlife) = cfg.maxlife {
        if let Some(first_seen) = cookie.first_seen {
            if now - first_seen > maxlife / 60 + DRIFT_TOLERANCE_MINUTES {
                return true;
            }
        }
    }
    false
}

/// Outcome of scanning a request's `Cookie:` header for the configured
/// backend persistence name (spec.md §4.6 `CK_VALID`/`CK_INVALID`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieStatus {
    /// No persistence cookie pair was present at all.
    NotFound,
    /// Present and names a server that is known, up, and not stale.
    Valid,
    /// Present but names an unknown/down server, or has gone stale.
    Invalid,
}

/// Result of `process_request`.
#[derive(Debug, Clone, Default)]
pub struct RequestCookiePass {
    pub status: Option<CookieStatus>,
    pub server_id: Option<Vec<u8>>,
    /// Value captured under `CookieConfig::capture_name`, if configured and present.
    pub captured: Option<Vec<u8>>,
}

/// One `;`-delimited pair within a `Cookie:` (or `Set-Cookie:`) header
/// value, with its own span (relative to the header's value start) so a
/// caller can edit just that pair in place.
struct RawPair {
    start: usize,
    end: usize,
    name: Vec<u8>,
    value: Vec<u8>,
}

fn scan_pairs(raw: &[u8]) -> Vec<RawPair> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    loop {
        let end = raw[pos..].iter().position(|&b| b == b';').map(|p| pos + p).unwrap_or(raw.len());
        let segment = &raw[pos..end];
        let lead = segment.len() - segment.trim_start().len();
        let trimmed = segment.trim();
        if !trimmed.is_empty() {
            if let Some(eq) = trimmed.iter().position(|&b| b == b'=') {
                out.push(RawPair {
                    start: pos + lead,
                    end,
                    name: trimmed[..eq].trim().to_vec(),
                    value: trimmed[eq + 1..].trim().to_vec(),
                });
            }
        }
        if end >= raw.len() {
            break;
        }
        pos = end + 1;
    }
    out
}

/// Span (relative to the header value) to delete in order to remove the
/// pair occupying `[start, end)`, including exactly one adjoining `;`
/// separator — the same "take one neighboring delimiter" shape as
/// `HeaderIndex::remove`'s comma-list logic, applied to `;`-lists instead.
fn pair_deletion_span(raw: &[u8], start: usize, end: usize) -> (usize, usize) {
    let before = raw[..start].iter().rposition(|&b| b == b';');
    let after = raw[end..].iter().position(|&b| b == b';').map(|p| end + p);
    match (before, after) {
        (Some(b), Some(a)) => (b, a),
        (Some(b), None) => (b, raw.len()),
        (None, Some(a)) => (0, a + 1),
        (None, None) => (0, raw.len()),
    }
}

/// Request-side pass (spec.md §4.6): scans the `Cookie:` header in place
/// for the configured backend persistence name and, if configured, a
/// frontend capture name. For `InsertIndirect` mode, the persistence pair
/// the core itself inserted on a prior response is stripped back out
/// before the request reaches the backend. Edits the header in place via
/// `ring`/`headers`; returns the cumulative displacement the caller must
/// apply to any offset (such as a `Message`'s `eoh`/`next`) held past the
/// header block.
pub fn process_request(
    ring: &mut Ring,
    headers: &mut HeaderIndex,
    sol: usize,
    cfg: &CookieConfig,
    server_known: impl Fn(&[u8]) -> bool,
) -> (RequestCookiePass, isize) {
    let mut result = RequestCookiePass::default();
    if cfg.mode == CookieMode::Ignore && cfg.capture_name.is_none() {
        return (result, 0);
    }
    let ctx = match headers.find(ring, b"cookie", None) {
        Some(ctx) => ctx,
        None => return (result, 0),
    };
    let value_start = sol + ctx.val_offset;
    let value_len = ctx.vlen - ctx.tws;
    let raw = ring.copy_out(value_start, value_len);
    let pairs = scan_pairs(&raw);

    let mut persist_span: Option<(usize, usize)> = None;
    for p in &pairs {
        if p.name.starts_with(b"$") {
            continue; // RFC 2965 attribute, passed through untouched.
        }
        if cfg.mode != CookieMode::Ignore && p.name == cfg.name.as_bytes() {
            match parse_persist_cookie(cfg, &p.value) {
                Some(parsed) => {
                    let known = server_known(&parsed.server_id);
                    let stale = is_stale(cfg, &parsed);
                    result.status = Some(if known && !stale { CookieStatus::Valid } else { CookieStatus::Invalid });
                    result.server_id = Some(parsed.server_id);
                }
                None => result.status = Some(CookieStatus::Invalid),
            }
            persist_span = Some((p.start, p.end));
        }
        if let Some(capture) = &cfg.capture_name {
            if p.name == capture.as_bytes() {
                result.captured = Some(p.value.clone());
            }
        }
    }
    if cfg.mode == CookieMode::InsertIndirect {
        if let Some((start, end)) = persist_span {
            let (del_start, del_end) = pair_deletion_span(&raw, start, end);
            if del_end - del_start >= raw.len() {
                let delta = headers.remove_line(ring, ctx);
                return (result, delta);
            }
            let delta = ring.delete(value_start + del_start, del_end - del_start);
            headers.apply_value_edit(ctx, delta);
            return (result, delta);
        }
    }
    (result, 0)
}

/// Finds the `Set-Cookie`/`Set-Cookie2` header (there may be several) whose
/// first (name=value) pair names the backend persistence cookie.
fn find_named_set_cookie(ring: &Ring, headers: &HeaderIndex, sol: usize, name: &[u8]) -> Option<Context> {
    for header in [&b"set-cookie"[..], &b"set-cookie2"[..]] {
        let mut from = None;
        loop {
            let ctx = headers.find(ring, header, from)?;
            let value = ring.copy_out(sol + ctx.val_offset, ctx.vlen - ctx.tws);
            if let Some(eq) = value.iter().position(|&b| b == b'=') {
                if value[..eq].trim() == name {
                    return Some(ctx);
                }
            }
            from = Some(ctx);
        }
    }
    None
}

/// Appends a fresh header line at the end of the header block. Returns the
/// displacement the caller must apply to offsets held past it.
fn append_header(ring: &mut Ring, headers: &mut HeaderIndex, sol: usize, name: &str, value: &[u8]) -> Result<isize, crate::error::Error> {
    let at = sol + headers.end_offset();
    let mut line = format!("{}: ", name).into_bytes();
    line.extend_from_slice(value);
    line.extend_from_slice(b"\r\n");
    let delta = ring.insert(at, &line)?;
    headers.push(line.len() - 2, true)?;
    Ok(delta)
}

/// Response-side pass (spec.md §4.6): rewrites, inserts, or prefixes the
/// backend persistence cookie in the response's `Set-Cookie` header(s)
/// according to the configured mode. `Passive` and `Ignore` never write.
/// Returns the cumulative displacement the caller must apply to offsets
/// held past the header block.
pub fn process_response(
    ring: &mut Ring,
    headers: &mut HeaderIndex,
    sol: usize,
    cfg: &CookieConfig,
    server_id: &[u8],
    existing: Option<&PersistCookie>,
) -> Result<isize, crate::error::Error> {
    match cfg.mode {
        CookieMode::Ignore | CookieMode::Passive => Ok(0),
        CookieMode::Rewrite => {
            if let Some(ctx) = find_named_set_cookie(ring, headers, sol, cfg.name.as_bytes()) {
                let raw = ring.copy_out(sol + ctx.val_offset, ctx.vlen - ctx.tws);
                let eq = match raw.iter().position(|&b| b == b'=') {
                    Some(eq) => eq,
                    None => return Ok(0),
                };
                let value_end = raw[eq + 1..].iter().position(|&b| b == b';').map(|p| eq + 1 + p).unwrap_or(raw.len());
                let new_value = render_persist_cookie(cfg, server_id, existing);
                let abs_start = sol + ctx.val_offset + eq + 1;
                let abs_end = sol + ctx.val_offset + value_end;
                let delta = ring.replace(abs_start, abs_end, &new_value);
                headers.apply_value_edit(ctx, delta);
                Ok(delta)
            } else {
                let rendered = render_persist_cookie(cfg, server_id, existing);
                let mut value = cfg.name.clone().into_bytes();
                value.push(b'=');
                value.extend(rendered);
                append_header(ring, headers, sol, "Set-Cookie", &value)
            }
        }
        CookieMode::Insert | CookieMode::InsertIndirect => {
            let rendered = render_persist_cookie(cfg, server_id, existing);
            let mut value = cfg.name.clone().into_bytes();
            value.push(b'=');
            value.extend(rendered);
            append_header(ring, headers, sol, "Set-Cookie", &value)
        }
        CookieMode::Prefix => {
            let mut value = server_id.to_vec();
            value.push(b'~');
            value.extend_from_slice(existing.and_then(|c| c.opaque.as_deref()).unwrap_or(b""));
            if let Some(ctx) = find_named_set_cookie(ring, headers, sol, cfg.name.as_bytes()) {
                let raw = ring.copy_out(sol + ctx.val_offset, ctx.vlen - ctx.tws);
                let eq = match raw.iter().position(|&b| b == b'=') {
                    Some(eq) => eq,
                    None => return Ok(0),
                };
                let value_end = raw[eq + 1..].iter().position(|&b| b == b';').map(|p| eq + 1 + p).unwrap_or(raw.len());
                let abs_start = sol + ctx.val_offset + eq + 1;
                let abs_end = sol + ctx.val_offset + value_end;
                let delta = ring.replace(abs_start, abs_end, &value);
                headers.apply_value_edit(ctx, delta);
                Ok(delta)
            } else {
                let mut header_value = cfg.name.clone().into_bytes();
                header_value.push(b'=');
                header_value.extend(value);
                append_header(ring, headers, sol, "Set-Cookie", &header_value)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_cookie_header_skipping_dollar_attributes() {
        let cookies = parse_request_cookies(b"$Version=1; SESSIONID=abc123; $Path=/");
        assert_eq!(
            cookies,
            vec![RequestCookie {
                name: b"SESSIONID".to_vec(),
                value: b"abc123".to_vec(),
            }]
        );
    }

    #[test]
    fn prefix_mode_splits_on_tilde() {
        let cfg = CookieConfig {
            mode: CookieMode::Prefix,
            ..CookieConfig::default()
        };
        let parsed = parse_persist_cookie(&cfg, b"web1~opaque-part").unwrap();
        assert_eq!(parsed.server_id, b"web1");
        assert_eq!(parsed.opaque, Some(b"opaque-part".to_vec()));
    }

    #[test]
    fn passive_mode_round_trips_through_render_and_parse() {
        let cfg = CookieConfig {
            mode: CookieMode::Passive,
            ..CookieConfig::default()
        };
        let rendered = render_persist_cookie(&cfg, b"web1", None);
        let parsed = parse_persist_cookie(&cfg, &rendered).unwrap();
        assert_eq!(parsed.server_id, b"web1");
        assert!(parsed.last_seen.is_some());
        assert!(parsed.first_seen.is_some());
    }

    #[test]
    fn stale_cookie_detected_past_maxidle() {
        let cfg = CookieConfig {
            mode: CookieMode::Passive,
            maxidle: Some(60),
            ..CookieConfig::default()
        };
        let cookie = PersistCookie {
            server_id: b"web1".to_vec(),
            opaque: None,
            last_seen: Some(minutes_now() - 1000),
            first_seen: Some(minutes_now() - 1000),
        };
        assert!(is_stale(&cfg, &cookie));
    }

    #[test]
    fn fresh_cookie_is_not_stale() {
        let cfg = CookieConfig {
            mode: CookieMode::Passive,
            maxidle: Some(3600),
            ..CookieConfig::default()
        };
        let cookie = PersistCookie {
            server_id: b"web1".to_vec(),
            opaque: None,
            last_seen: Some(minutes_now()),
            first_seen: Some(minutes_now()),
        };
        assert!(!is_stale(&cfg, &cookie));
    }

    fn build_headers(ring: &mut Ring, idx: &mut HeaderIndex, lines: &[&[u8]]) {
        idx.start(0);
        for line in lines {
            ring.fill(line).unwrap();
            ring.fill(b"\r\n").unwrap();
            idx.push(line.len(), true).unwrap();
        }
    }

    #[test]
    fn process_request_marks_known_server_valid() {
        let mut ring = Ring::new(512, 16);
        let mut idx = HeaderIndex::new(16);
        let rendered = render_persist_cookie(&CookieConfig { mode: CookieMode::Passive, ..CookieConfig::default() }, b"web1", None);
        let mut line = b"Cookie: SRVID=".to_vec();
        line.extend(rendered);
        build_headers(&mut ring, &mut idx, &[&line]);
        let cfg = CookieConfig { mode: CookieMode::Passive, ..CookieConfig::default() };
        let (pass, delta) = process_request(&mut ring, &mut idx, 0, &cfg, |id| id == b"web1");
        assert_eq!(pass.status, Some(CookieStatus::Valid));
        assert_eq!(pass.server_id, Some(b"web1".to_vec()));
        assert_eq!(delta, 0);
    }

    #[test]
    fn process_request_insert_indirect_strips_pair_leaving_others() {
        let mut ring = Ring::new(512, 16);
        let mut idx = HeaderIndex::new(16);
        let cfg = CookieConfig { mode: CookieMode::InsertIndirect, ..CookieConfig::default() };
        let rendered = render_persist_cookie(&cfg, b"web1", None);
        let mut line = b"Cookie: lang=en; SRVID=".to_vec();
        line.extend(&rendered);
        line.extend_from_slice(b"; theme=dark");
        build_headers(&mut ring, &mut idx, &[&line]);
        let (pass, delta) = process_request(&mut ring, &mut idx, 0, &cfg, |id| id == b"web1");
        assert_eq!(pass.server_id, Some(b"web1".to_vec()));
        assert!(delta < 0);
        let ctx = idx.find(&ring, b"cookie", None).unwrap();
        let value = ring.copy_out(ctx.val_offset, ctx.vlen - ctx.tws);
        assert_eq!(value, b"lang=en; theme=dark");
    }

    #[test]
    fn process_response_inserts_set_cookie_when_absent() {
        let mut ring = Ring::new(512, 16);
        let mut idx = HeaderIndex::new(16);
        build_headers(&mut ring, &mut idx, &[b"Content-Type: text/html"]);
        let cfg = CookieConfig { mode: CookieMode::Insert, ..CookieConfig::default() };
        process_response(&mut ring, &mut idx, 0, &cfg, b"web1", None).unwrap();
        let ctx = idx.find(&ring, b"set-cookie", None).expect("set-cookie inserted");
        let value = ring.copy_out(ctx.val_offset, ctx.vlen - ctx.tws);
        assert!(value.starts_with(b"SRVID=web1|"));
    }

    #[test]
    fn process_response_rewrite_replaces_existing_server_id() {
        let mut ring = Ring::new(512, 16);
        let mut idx = HeaderIndex::new(16);
        let cfg = CookieConfig { mode: CookieMode::Rewrite, ..CookieConfig::default() };
        let rendered = render_persist_cookie(&cfg, b"web1", None);
        let mut line = b"Set-Cookie: SRVID=".to_vec();
        line.extend(rendered);
        build_headers(&mut ring, &mut idx, &[&line]);
        process_response(&mut ring, &mut idx, 0, &cfg, b"web2", None).unwrap();
        let ctx = idx.find(&ring, b"set-cookie", None).unwrap();
        let value = ring.copy_out(ctx.val_offset, ctx.vlen - ctx.tws);
        assert!(value.starts_with(b"SRVID=web2|"));
    }
}
