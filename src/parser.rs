//! Byte-driven, resumable HTTP/1.x message parser (spec.md §4.3).
//!
//! A hand-written FSM, not a grammar library, per spec.md §9 "Byte FSM vs
//! regex": it must resume mid-token across buffer wraps, which a one-shot
//! combinator parser over an owned slice cannot do cheaply. Grounded on the
//! overall shape of the teacher's `headers.rs` `Parser`/`Side` split
//! (request vs. response accept different line endings and separators) and
//! on `request.rs`'s pattern of storing parse progress (`next`) on the
//! message so a suspension can resume exactly where it left off.

use crate::chunk::{self, ChunkSize};
use crate::error::{Error, ParseKind, Result};
use crate::header_index::HeaderIndex;
use crate::ring::Ring;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    Request,
    Response,
}

/// High-level message lifecycle states (spec.md §3 "HTTP message").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgState {
    Before,
    StartLine,
    Headers,
    Body,
    ChunkSize,
    ChunkData,
    ChunkCrlf,
    Trailers,
    Done,
    Closing,
    Closed,
    Tunnel,
    Error,
}

/// Sub-phase of the request/status line FSM (spec.md §4.3's
/// `RQBEFORE -> RQMETH -> RQMETH_SP -> RQURI -> ... -> RQLINE_END`, mirrored
/// for responses as `RP*`). Kept separate from `MsgState` so resumption
/// mid-line doesn't require re-deriving it from already-consumed bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LinePhase {
    Before,
    Token1,
    Sp1,
    Token2,
    Sp2,
    Token3,
    End,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferMode {
    Unknown,
    Chunked,
    ContentLength(usize),
    CloseDelimited,
}

/// Per-direction HTTP message state (spec.md §3).
pub struct Message {
    pub state: MsgState,
    line_phase: LinePhase,
    /// Offset of the message's first byte, in `Ring` coordinates.
    pub sol: usize,
    /// Offset of the end of headers (the final CRLF), once known.
    pub eoh: Option<usize>,
    /// Offset of the first body byte, once known.
    pub sov: Option<usize>,
    /// Next unparsed byte, in `Ring` coordinates; this is the field that
    /// makes suspension resumable.
    pub next: usize,
    pub chunk_len: usize,
    pub body_len: usize,
    pub flags: u64,
    pub transfer: TransferMode,
    /// `(method_or_version, target_or_status, version_or_reason)` spans,
    /// relative to `sol`, once the start line has parsed.
    pub status_line_positions: Option<(core::ops::Range<usize>, core::ops::Range<usize>, core::ops::Range<usize>)>,
    pub error_position: Option<usize>,
    token1_start: Option<usize>,
    token1_end: Option<usize>,
    token2_start: Option<usize>,
    token2_end: Option<usize>,
    token3_start: Option<usize>,
    token3_end: Option<usize>,
    /// Entry index of the header currently being continued by an obsolete
    /// line fold, if any.
    folding_entry: Option<usize>,
}

impl Message {
    pub fn new(sol: usize) -> Self {
        Self {
            state: MsgState::Before,
            line_phase: LinePhase::Before,
            sol,
            eoh: None,
            sov: None,
            next: sol,
            chunk_len: 0,
            body_len: 0,
            flags: 0,
            transfer: TransferMode::Unknown,
            status_line_positions: None,
            error_position: None,
            token1_start: None,
            token1_end: None,
            token2_start: None,
            token2_end: None,
            token3_start: None,
            token3_end: None,
            folding_entry: None,
        }
    }
}

fn is_method_char(c: u8) -> bool {
    is_token(c)
}

fn is_token(c: u8) -> bool {
    match c {
        b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/' | b'[' | b']'
        | b'?' | b'=' | b'{' | b'}' | b' ' | b'\t' => false,
        0x00..=0x1f | 0x7f => false,
        _ => true,
    }
}

fn is_uri_char(c: u8, accept_invalid: bool) -> bool {
    if (0x21..=0x7e).contains(&c) {
        true
    } else {
        accept_invalid && c >= 0x80
    }
}

fn is_version_char(c: u8) -> bool {
    c.is_ascii_digit() || c == b'.' || c == b'/' || c == b'H' || c == b'T' || c == b'P'
}

/// Result of stepping the parser once.
pub enum StepOutcome {
    /// Ran out of input; `msg.state`/`msg.next` were saved for resumption.
    NeedMoreData,
    /// Reached `MsgState::Body` (headers fully parsed).
    HeadersDone,
    /// Reached `MsgState::Done` (whole message parsed, no/zero-length body).
    MessageDone,
}

pub struct Parser {
    pub side: Side,
    pub accept_invalid_http: bool,
}

impl Parser {
    pub fn new(side: Side, accept_invalid_http: bool) -> Self {
        Self {
            side,
            accept_invalid_http,
        }
    }

    fn fail(&self, msg: &mut Message, kind: ParseKind) -> Error {
        msg.state = MsgState::Error;
        msg.error_position = Some(msg.next);
        log::warn!(
            "{:?} message malformed at offset {} while parsing {}",
            self.side,
            msg.next,
            kind
        );
        Error::Parse {
            position: msg.next,
            kind,
        }
    }

    /// Drives `msg` forward as far as the currently available bytes in
    /// `ring` allow, stopping at headers-complete, message-complete, or
    /// out-of-data. Mutates `headers` in place as header lines are found.
    pub fn step(
        &self,
        msg: &mut Message,
        ring: &mut Ring,
        headers: &mut HeaderIndex,
    ) -> Result<StepOutcome> {
        loop {
            match msg.state {
                MsgState::Before | MsgState::StartLine => {
                    msg.state = MsgState::StartLine;
                    match self.parse_start_line(msg, ring)? {
                        Some(()) => {
                            headers.start(msg.next - msg.sol);
                            msg.state = MsgState::Headers;
                        }
                        None => return Ok(StepOutcome::NeedMoreData),
                    }
                }
                MsgState::Headers => match self.parse_headers(msg, ring, headers)? {
                    true => {
                        msg.sov = Some(msg.next);
                        msg.transfer = self.decide_transfer_mode(ring, headers, msg.sol)?;
                        match msg.transfer {
                            TransferMode::Chunked => msg.state = MsgState::ChunkSize,
                            TransferMode::ContentLength(n) => {
                                msg.chunk_len = n;
                                msg.state = MsgState::Body;
                            }
                            TransferMode::CloseDelimited | TransferMode::Unknown => {
                                msg.chunk_len = 0;
                                msg.state = MsgState::Body;
                            }
                        }
                        return Ok(StepOutcome::HeadersDone);
                    }
                    false => return Ok(StepOutcome::NeedMoreData),
                },
                MsgState::Body => match self.step_body(msg, ring)? {
                    Some(outcome) => return Ok(outcome),
                    None => return Ok(StepOutcome::NeedMoreData),
                },
                MsgState::ChunkSize => match chunk::parse_chunk_size(ring, msg.next)? {
                    Some((ChunkSize::Data(n), consumed)) => {
                        ring.advance(consumed);
                        msg.next += consumed;
                        msg.chunk_len = n;
                        msg.state = MsgState::ChunkData;
                    }
                    Some((ChunkSize::Last, consumed)) => {
                        ring.advance(consumed);
                        msg.next += consumed;
                        msg.state = MsgState::Trailers;
                    }
                    None => return Ok(StepOutcome::NeedMoreData),
                },
                MsgState::ChunkData => {
                    let take = ring.input_len().min(msg.chunk_len);
                    if take == 0 {
                        return Ok(StepOutcome::NeedMoreData);
                    }
                    ring.advance(take);
                    msg.next += take;
                    msg.chunk_len -= take;
                    msg.body_len += take;
                    if msg.chunk_len == 0 {
                        msg.state = MsgState::ChunkCrlf;
                    } else {
                        return Ok(StepOutcome::NeedMoreData);
                    }
                }
                MsgState::ChunkCrlf => match chunk::skip_chunk_crlf(ring, msg.next) {
                    Some(n) => {
                        ring.advance(n);
                        msg.next += n;
                        msg.state = MsgState::ChunkSize;
                    }
                    None => return Ok(StepOutcome::NeedMoreData),
                },
                MsgState::Trailers => match chunk::forward_trailers(ring, msg.next) {
                    Some((_trailer_bytes, consumed)) => {
                        ring.advance(consumed);
                        msg.next += consumed;
                        msg.state = MsgState::Done;
                        return Ok(StepOutcome::MessageDone);
                    }
                    None => return Ok(StepOutcome::NeedMoreData),
                },
                MsgState::Done => return Ok(StepOutcome::MessageDone),
                _ => return Ok(StepOutcome::MessageDone),
            }
        }
    }

    /// Advances a `BODY`-state message by whatever is available: a bounded
    /// run for `Content-Length`, an unbounded forward-everything run for
    /// close-delimited responses (terminated externally by
    /// `finish_close_delimited` once the connection actually closes).
    fn step_body(&self, msg: &mut Message, ring: &mut Ring) -> Result<Option<StepOutcome>> {
        if msg.transfer == TransferMode::CloseDelimited {
            let avail = ring.input_len();
            if avail == 0 {
                return Ok(None);
            }
            ring.advance(avail);
            msg.next += avail;
            msg.body_len += avail;
            return Ok(None);
        }
        if msg.chunk_len == 0 {
            msg.state = MsgState::Done;
            return Ok(Some(StepOutcome::MessageDone));
        }
        let take = ring.input_len().min(msg.chunk_len);
        if take == 0 {
            return Ok(None);
        }
        ring.advance(take);
        msg.next += take;
        msg.chunk_len -= take;
        msg.body_len += take;
        if msg.chunk_len == 0 {
            msg.state = MsgState::Done;
            return Ok(Some(StepOutcome::MessageDone));
        }
        Ok(None)
    }

    /// Decides body framing once headers are complete, per spec.md §6
    /// priority: `Transfer-Encoding: chunked`, then `Content-Length`, then
    /// close-delimited (responses only; a request with neither is assumed
    /// to carry no body).
    fn decide_transfer_mode(&self, ring: &Ring, headers: &HeaderIndex, sol: usize) -> Result<TransferMode> {
        if let Some(ctx) = headers.find(ring, b"transfer-encoding", None) {
            let value = ring.copy_out(sol + ctx.val_offset, ctx.vlen - ctx.tws);
            if value
                .split(|&b| b == b',')
                .any(|tok| tok.trim_ascii().eq_ignore_ascii_case(b"chunked"))
            {
                return Ok(TransferMode::Chunked);
            }
        }
        if let Some(ctx) = headers.find(ring, b"content-length", None) {
            let value = ring.copy_out(sol + ctx.val_offset, ctx.vlen - ctx.tws);
            let text = std::str::from_utf8(&value).map_err(|_| Error::InvalidUtf8)?;
            let n: usize = text.trim().parse().map_err(|_| Error::Parse {
                position: sol + ctx.val_offset,
                kind: ParseKind::Headers,
            })?;
            return Ok(TransferMode::ContentLength(n));
        }
        if self.side == Side::Response {
            return Ok(TransferMode::CloseDelimited);
        }
        Ok(TransferMode::ContentLength(0))
    }

    /// Parses one end-of-line token (`CRLF` for requests; `CRLF`, `LF`,
    /// `CR`, or `LF CR` for responses). Returns the byte length consumed,
    /// relative to `at`, or `None` if not enough data is available yet.
    fn match_eol(&self, ring: &Ring, at: usize) -> Option<(usize, bool)> {
        let b0 = ring.read_at(at)?;
        if b0 == b'\n' {
            return Some((1, false));
        }
        if b0 == b'\r' {
            let b1 = ring.read_at(at + 1)?;
            if b1 == b'\n' {
                return Some((2, true));
            }
            if self.side == Side::Response {
                return Some((1, false));
            }
            return None;
        }
        None
    }

    fn skip_leading_blank_lines(&self, msg: &mut Message, ring: &mut Ring) -> Result<()> {
        if ring.output_len() != 0 {
            return Ok(());
        }
        loop {
            match self.match_eol(ring, msg.next) {
                Some((len, _cr)) => {
                    ring.advance(len);
                    msg.next += len;
                    msg.sol = msg.next;
                }
                None => return Ok(()),
            }
        }
    }

    /// Parses the request-line / status-line. Returns `Some(())` once the
    /// line is fully parsed (and any HTTP/0.9 upgrade rewrite applied),
    /// `None` if more data is required.
    fn parse_start_line(&self, msg: &mut Message, ring: &mut Ring) -> Result<Option<()>> {
        self.skip_leading_blank_lines(msg, ring)?;
        loop {
            match msg.line_phase {
                LinePhase::Before => {
                    msg.token1_start = Some(msg.next);
                    msg.line_phase = LinePhase::Token1;
                }
                LinePhase::Token1 => loop {
                    let b = match ring.read_at(msg.next) {
                        Some(b) => b,
                        None => return Ok(None),
                    };
                    let ok = if self.side == Side::Request {
                        is_method_char(b)
                    } else {
                        is_version_char(b)
                    };
                    if b == b' ' {
                        msg.token1_end = Some(msg.next);
                        ring.advance(1);
                        msg.next += 1;
                        msg.line_phase = LinePhase::Sp1;
                        break;
                    } else if !ok {
                        return Err(self.fail(msg, ParseKind::RequestLine));
                    } else {
                        msg.next += 1;
                        ring.advance(1);
                    }
                },
                LinePhase::Sp1 => {
                    msg.token2_start = Some(msg.next);
                    msg.line_phase = LinePhase::Token2;
                }
                LinePhase::Token2 => loop {
                    let b = match ring.read_at(msg.next) {
                        Some(b) => b,
                        None => return Ok(None),
                    };
                    let ok = if self.side == Side::Request {
                        is_uri_char(b, self.accept_invalid_http)
                    } else {
                        b.is_ascii_digit()
                    };
                    if b == b' ' {
                        msg.token2_end = Some(msg.next);
                        msg.next += 1;
                        ring.advance(1);
                        msg.line_phase = LinePhase::Sp2;
                        break;
                    } else if b == b'\r' || b == b'\n' {
                        // No third token: HTTP/0.9 request, or a malformed status line.
                        msg.token2_end = Some(msg.next);
                        msg.line_phase = LinePhase::End;
                        break;
                    } else if !ok {
                        return Err(self.fail(msg, ParseKind::RequestLine));
                    } else {
                        msg.next += 1;
                        ring.advance(1);
                    }
                },
                LinePhase::Sp2 => {
                    msg.token3_start = Some(msg.next);
                    msg.line_phase = LinePhase::Token3;
                }
                LinePhase::Token3 => loop {
                    let b = match ring.read_at(msg.next) {
                        Some(b) => b,
                        None => return Ok(None),
                    };
                    let ok = if self.side == Side::Request {
                        is_version_char(b)
                    } else {
                        b != b'\r' && b != b'\n'
                    };
                    if b == b'\r' || b == b'\n' {
                        msg.token3_end = Some(msg.next);
                        msg.line_phase = LinePhase::End;
                        break;
                    } else if !ok {
                        return Err(self.fail(msg, ParseKind::RequestLine));
                    } else {
                        msg.next += 1;
                        ring.advance(1);
                    }
                },
                LinePhase::End => {
                    let (eol_len, _cr) = match self.match_eol(ring, msg.next) {
                        Some(v) => v,
                        None => return Ok(None),
                    };
                    ring.advance(eol_len);
                    msg.next += eol_len;
                    self.finish_start_line(msg, ring, eol_len)?;
                    msg.line_phase = LinePhase::Before;
                    return Ok(Some(()));
                }
            }
        }
    }

    fn finish_start_line(&self, msg: &mut Message, ring: &mut Ring, eol_len: usize) -> Result<()> {
        if self.side == Side::Request && msg.token3_start.is_none() {
            // HTTP/0.9: "METHOD SP URI CRLF" with no version. Upgrade to
            // HTTP/1.0 in place, per spec.md §4.3, and re-derive spans.
            if msg.token2_start == msg.token2_end {
                // URI missing entirely: give it a leading "/" first.
                let uri_at = msg.token2_start.unwrap();
                let delta = ring.insert(uri_at, b"/")?;
                msg.token2_end = Some((msg.token2_end.unwrap() as isize + delta) as usize);
                msg.next = (msg.next as isize + delta) as usize;
            }
            let insert_at = msg.next - eol_len;
            let delta = ring.insert(insert_at, b" HTTP/1.0")?;
            msg.next = (msg.next as isize + delta) as usize;
        }
        let t1 = msg.token1_start.unwrap()..msg.token1_end.unwrap();
        let t2 = msg.token2_start.unwrap()..msg.token2_end.unwrap_or(msg.token2_start.unwrap());
        let t3 = match (msg.token3_start, msg.token3_end) {
            (Some(s), Some(e)) => s..e,
            _ => msg.next..msg.next,
        };
        msg.status_line_positions = Some((t1, t2, t3));
        Ok(())
    }

    /// Scans forward from `start` for this line's terminator. Returns
    /// `(content_len, eol_len, cr)` once found, `None` if more data is
    /// needed.
    fn scan_line(&self, ring: &Ring, start: usize) -> Option<(usize, usize, bool)> {
        let mut cursor = start;
        loop {
            let b = ring.read_at(cursor)?;
            if b == b'\n' {
                return Some((cursor - start, 1, false));
            }
            if b == b'\r' {
                match ring.read_at(cursor + 1) {
                    Some(b'\n') => return Some((cursor - start, 2, true)),
                    Some(_) if self.side == Side::Response => return Some((cursor - start, 1, false)),
                    Some(_) => {
                        cursor += 1;
                        continue;
                    }
                    None => return None,
                }
            }
            cursor += 1;
        }
    }

    /// Parses header lines (including obsolete line folding) until the
    /// blank line that ends the header block. Returns `true` once done.
    fn parse_headers(
        &self,
        msg: &mut Message,
        ring: &mut Ring,
        headers: &mut HeaderIndex,
    ) -> Result<bool> {
        loop {
            // A line starting with SP/HT continues the previous header.
            let continues = matches!(ring.read_at(msg.next), Some(b' ') | Some(b'\t'));
            if continues && headers.len() > 0 {
                self.fold_continuation(msg, ring, headers)?;
                continue;
            }
            let line_start = msg.next;
            let (content_len, eol_len, cr) = match self.scan_line(ring, line_start) {
                Some(v) => v,
                None => return Ok(false),
            };
            if content_len == 0 {
                ring.advance(eol_len);
                msg.next += eol_len;
                msg.eoh = Some(msg.next);
                return Ok(true);
            }
            // A line with no colon is still indexed as a header with an
            // empty name (spec.md §4.2 `HeaderContext::find` simply won't
            // match it against a real name), rather than failing the
            // message outright.
            ring.advance(content_len + eol_len);
            msg.next += content_len + eol_len;
            let idx = headers.push(content_len, cr)?;
            msg.folding_entry = Some(idx);
        }
    }

    /// Merges an obsolete-folded continuation line into the previous
    /// header's value: its terminating CRLF (or LF) plus the continuation
    /// line's leading whitespace run are rewritten to a single space, per
    /// spec.md §4.3.
    fn fold_continuation(
        &self,
        msg: &mut Message,
        ring: &mut Ring,
        headers: &mut HeaderIndex,
    ) -> Result<()> {
        let entry_idx = match msg.folding_entry {
            Some(idx) => idx,
            None => return Err(self.fail(msg, ParseKind::Headers)),
        };
        // `msg.next` sits right after the previous line's CRLF, at the start
        // of this line's leading whitespace.
        let fold_start = msg.next - headers_eol_len_before(ring, msg.next);
        let mut ws_end = msg.next;
        while matches!(ring.read_at(ws_end), Some(b' ') | Some(b'\t')) {
            ws_end += 1;
        }
        if ring.read_at(ws_end).is_none() {
            return Ok(());
        }
        let (continuation_len, eol_len, cr) = match self.scan_line(ring, ws_end) {
            Some(v) => v,
            None => return Ok(()),
        };
        // Collapse the previous line's CRLF plus this line's leading
        // whitespace into a single space, joining the two lines.
        ring.replace(fold_start, ws_end, b" ");
        headers.adjust_len(entry_idx, (1 + continuation_len) as isize);
        headers.set_terminator(entry_idx, cr);
        // The continuation text and its own terminator are still unread
        // input right after the space we just wrote; commit them too.
        ring.advance(continuation_len + eol_len);
        msg.next = fold_start + 1 + continuation_len + eol_len;
        Ok(())
    }
}

/// Bytes occupied by the terminator ending immediately before `at`: looks
/// back for `\r\n` vs a lone `\n`.
fn headers_eol_len_before(ring: &Ring, at: usize) -> usize {
    if at >= 2 {
        if let (Some(b'\r'), Some(b'\n')) = (ring.read_at(at - 2), ring.read_at(at - 1)) {
            return 2;
        }
    }
    1
}

#[cfg(test)]
mod test {
    use super::*;

    fn run_to_headers_done(side: Side, input: &[u8]) -> (Message, Ring, HeaderIndex) {
        let mut ring = Ring::new(4096, 256);
        ring.fill(input).unwrap();
        let mut msg = Message::new(0);
        let mut headers = HeaderIndex::new(32);
        let parser = Parser::new(side, false);
        match parser.step(&mut msg, &mut ring, &mut headers).unwrap() {
            StepOutcome::HeadersDone => {}
            _ => panic!("expected headers to parse fully"),
        }
        (msg, ring, headers)
    }

    #[test]
    fn parses_simple_request_line_and_headers() {
        let (msg, ring, headers) =
            run_to_headers_done(Side::Request, b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(msg.state, MsgState::Body);
        let ctx = headers.find(&ring, b"host", None).expect("host header");
        assert_eq!(ring.copy_out(ctx.val_offset, ctx.vlen - ctx.tws), b"x");
    }

    #[test]
    fn upgrades_http09_request_to_http10() {
        let (msg, ring, _headers) = run_to_headers_done(Side::Request, b"GET /\r\n\r\n");
        let (_m, _t, version) = msg.status_line_positions.unwrap();
        assert_eq!(ring.copy_out(version.start, version.len()), b"HTTP/1.0");
    }

    #[test]
    fn suspends_on_partial_request_line() {
        let mut ring = Ring::new(256, 32);
        ring.fill(b"GET /a HTTP/1").unwrap();
        let mut msg = Message::new(0);
        let mut headers = HeaderIndex::new(16);
        let parser = Parser::new(Side::Request, false);
        match parser.step(&mut msg, &mut ring, &mut headers).unwrap() {
            StepOutcome::NeedMoreData => {}
            _ => panic!("expected suspension"),
        }
        assert_eq!(msg.state, MsgState::StartLine);
        ring.fill(b".1\r\nHost: x\r\n\r\n").unwrap();
        match parser.step(&mut msg, &mut ring, &mut headers).unwrap() {
            StepOutcome::HeadersDone => {}
            _ => panic!("expected completion after refill"),
        }
    }

    #[test]
    fn folds_obsolete_continuation_line() {
        let (_msg, ring, headers) = run_to_headers_done(
            Side::Request,
            b"GET /a HTTP/1.1\r\nX-Long: part-one\r\n part-two\r\n\r\n",
        );
        let ctx = headers.find(&ring, b"x-long", None).unwrap();
        assert_eq!(
            ring.copy_out(ctx.val_offset, ctx.vlen - ctx.tws),
            b"part-one part-two"
        );
    }

    #[test]
    fn parses_chunked_request_body_to_done() {
        let mut ring = Ring::new(4096, 256);
        ring.fill(b"GET /a HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n")
            .unwrap();
        let mut msg = Message::new(0);
        let mut headers = HeaderIndex::new(32);
        let parser = Parser::new(Side::Request, false);
        match parser.step(&mut msg, &mut ring, &mut headers).unwrap() {
            StepOutcome::HeadersDone => {}
            _ => panic!("expected headers to parse fully"),
        }
        assert_eq!(msg.state, MsgState::ChunkSize);
        match parser.step(&mut msg, &mut ring, &mut headers).unwrap() {
            StepOutcome::MessageDone => {}
            _ => panic!("expected message to complete"),
        }
        assert_eq!(msg.state, MsgState::Done);
        assert_eq!(msg.body_len, 5);
    }

    #[test]
    fn response_accepts_bare_cr_as_eol() {
        let (msg, ring, headers) =
            run_to_headers_done(Side::Response, b"HTTP/1.1 200 OK\rX-A: 1\r\r");
        assert_eq!(msg.state, MsgState::Body);
        let ctx = headers.find(&ring, b"x-a", None).unwrap();
        assert_eq!(ring.copy_out(ctx.val_offset, ctx.vlen - ctx.tws), b"1");
    }
}
