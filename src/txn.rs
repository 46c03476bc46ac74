//! Per-connection transaction state machine (spec.md §4.7
//! TransactionStateMachine).
//!
//! Owns one request `Message`/`HeaderIndex` and one response
//! `Message`/`HeaderIndex` (spec.md §3 "Transaction") plus the connection-mode
//! decision spec.md §4.7 describes as a precedence chain over per-header
//! signals. Grounded on the teacher's `Side`-parameterized `Parser` split in
//! `headers.rs`/`parser.rs` of this crate: a transaction just drives one
//! `Parser` per direction against its own `Ring`.

use crate::header_index::HeaderIndex;
use crate::parser::{Message, MsgState, Parser, Side, StepOutcome};
use crate::ring::Ring;
use crate::error::Result;

/// Connection-mode decision (spec.md §4.7).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionMode {
    KeepAlive,
    ServerClose,
    HttpClose,
    ForceClose,
    Tunnel,
}

/// Signals gathered from a single message's headers that feed the
/// connection-mode decision.
#[derive(Copy, Clone, Debug, Default)]
pub struct ConnectionSignals {
    pub connection_close: bool,
    pub connection_keep_alive: bool,
    pub http_1_0: bool,
    pub is_connect_2xx: bool,
    pub forced_close: bool,
}

/// Resolves the connection mode for the pair of signals observed so far,
/// applying spec.md §4.7's precedence: `FORCE_CLOSE > HTTP_CLOSE >
/// SERVER_CLOSE > KEEP_ALIVE > TUNNEL`. A higher-precedence signal always
/// overrides a lower one even when both fire on the same transaction — a
/// rule or header that forces the connection closed wins over an accepted
/// `CONNECT`, not the other way around.
pub fn resolve_connection_mode(request: ConnectionSignals, response: ConnectionSignals) -> ConnectionMode {
    if request.forced_close || response.forced_close {
        return ConnectionMode::ForceClose;
    }
    if request.connection_close || response.connection_close {
        return ConnectionMode::HttpClose;
    }
    let server_wants_close = response.http_1_0 && !response.connection_keep_alive;
    let client_wants_close = request.http_1_0 && !request.connection_keep_alive;
    if server_wants_close || client_wants_close {
        return ConnectionMode::ServerClose;
    }
    if request.connection_keep_alive || response.connection_keep_alive {
        return ConnectionMode::KeepAlive;
    }
    if request.is_connect_2xx || response.is_connect_2xx {
        return ConnectionMode::Tunnel;
    }
    ConnectionMode::KeepAlive
}

/// Lifecycle state of the transaction as a whole, distinct from either
/// message's own `MsgState` (spec.md §3 "Transaction" vs. "HTTP message").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxnState {
    Idle,
    RequestInProgress,
    WaitingForResponse,
    ResponseInProgress,
    Done,
    Tunnel,
    Closing,
    Closed,
    Error,
}

pub struct Transaction {
    pub state: TxnState,
    pub request: Message,
    pub request_headers: HeaderIndex,
    pub response: Message,
    pub response_headers: HeaderIndex,
    pub mode: ConnectionMode,
    use_proxy_connection_header: bool,
    request_parser: Parser,
    response_parser: Parser,
}

impl Transaction {
    pub fn new(accept_invalid_http: bool, max_headers: usize) -> Self {
        Self::with_config(accept_invalid_http, max_headers, false)
    }

    pub fn with_config(accept_invalid_http: bool, max_headers: usize, use_proxy_connection_header: bool) -> Self {
        Self {
            state: TxnState::Idle,
            request: Message::new(0),
            request_headers: HeaderIndex::new(max_headers),
            response: Message::new(0),
            response_headers: HeaderIndex::new(max_headers),
            mode: ConnectionMode::KeepAlive,
            use_proxy_connection_header,
            request_parser: Parser::new(Side::Request, accept_invalid_http),
            response_parser: Parser::new(Side::Response, accept_invalid_http),
        }
    }

    pub fn step_request(&mut self, ring: &mut Ring) -> Result<StepOutcome> {
        if self.state == TxnState::Idle {
            self.state = TxnState::RequestInProgress;
        }
        let outcome = self.request_parser.step(&mut self.request, ring, &mut self.request_headers)?;
        if let StepOutcome::HeadersDone = outcome {
            self.state = TxnState::WaitingForResponse;
        }
        Ok(outcome)
    }

    pub fn step_response(&mut self, ring: &mut Ring) -> Result<StepOutcome> {
        if self.state == TxnState::WaitingForResponse {
            self.state = TxnState::ResponseInProgress;
        }
        let outcome = self.response_parser.step(&mut self.response, ring, &mut self.response_headers)?;
        if let StepOutcome::HeadersDone = outcome {
            self.resolve_mode(ring);
            let use_px = self.use_proxy_connection_header;
            self.rewrite_connection_headers(ring, use_px)?;
        }
        Ok(outcome)
    }

    // `HeaderIndex` offsets are relative to the owning message's `sol`
    // (spec.md §4.2), so every read through it here adds `sol` back to get
    // a ring-absolute offset.
    fn connection_signals(&self, ring: &Ring, headers: &HeaderIndex, sol: usize, version: &[u8]) -> ConnectionSignals {
        let mut signals = ConnectionSignals {
            http_1_0: version.ends_with(b"1.0"),
            ..Default::default()
        };
        if let Some(ctx) = headers.find(ring, b"connection", None) {
            let value = ring.copy_out(sol + ctx.val_offset, ctx.vlen - ctx.tws);
            signals.connection_close = value.eq_ignore_ascii_case(b"close");
            signals.connection_keep_alive = value.eq_ignore_ascii_case(b"keep-alive");
        }
        signals
    }

    fn resolve_mode(&mut self, ring: &Ring) {
        let request_version = self
            .request
            .status_line_positions
            .as_ref()
            .map(|(_, _, version)| ring.copy_out(self.request.sol + version.start, version.len()))
            .unwrap_or_default();
        let response_version = self
            .response
            .status_line_positions
            .as_ref()
            .map(|(version, _, _)| ring.copy_out(self.response.sol + version.start, version.len()))
            .unwrap_or_default();
        let mut req = self.connection_signals(ring, &self.request_headers, self.request.sol, &request_version);
        let mut resp = self.connection_signals(ring, &self.response_headers, self.response.sol, &response_version);

        let is_connect = self
            .request
            .status_line_positions
            .as_ref()
            .map(|(method, _, _)| ring.copy_out(self.request.sol + method.start, method.len()))
            .map(|m| m.eq_ignore_ascii_case(b"connect"))
            .unwrap_or(false);
        let status_2xx = self
            .response
            .status_line_positions
            .as_ref()
            .map(|(_, status, _)| ring.copy_out(self.response.sol + status.start, status.len()))
            .map(|s| s.first() == Some(&b'2'))
            .unwrap_or(false);
        req.is_connect_2xx = is_connect && status_2xx;
        resp.is_connect_2xx = is_connect && status_2xx;

        let new_mode = resolve_connection_mode(req, resp);
        if new_mode != self.mode && new_mode != ConnectionMode::KeepAlive {
            log::debug!("connection mode downgraded from {:?} to {:?}", self.mode, new_mode);
        }
        self.mode = new_mode;
    }

    /// Resets both messages so the transaction can be reused for the next
    /// request/response pair on a keep-alive connection, per spec.md §4.7
    /// "resync rules". Returns `false` (caller must tear down the
    /// connection instead) for any mode other than `KeepAlive`.
    pub fn resync(&mut self, next_sol: usize) -> bool {
        if self.mode != ConnectionMode::KeepAlive {
            self.state = match self.mode {
                ConnectionMode::Tunnel => TxnState::Tunnel,
                _ => TxnState::Closing,
            };
            return false;
        }
        self.request = Message::new(next_sol);
        self.response = Message::new(next_sol);
        self.state = TxnState::Idle;
        true
    }

    pub fn is_request_done(&self) -> bool {
        matches!(self.request.state, MsgState::Done)
    }

    /// Returns `true` if the request carries an `Upgrade` token, in which
    /// case spec.md §4.7 says `Connection` must be left alone rather than
    /// rewritten to reflect the chosen mode.
    fn has_upgrade(&self, ring: &Ring) -> bool {
        self.request_headers.find(ring, b"upgrade", None).is_some()
    }

    /// Does the request target begin with neither `/` nor `*`? This is the
    /// `TX_USE_PX_CONN` detection rule (spec.md §6): an absolute-URI or
    /// authority-form target, the shape a request reaches a proxy with.
    fn wants_proxy_connection_header(&self, ring: &Ring) -> bool {
        let target = self
            .request
            .status_line_positions
            .as_ref()
            .map(|(_, target, _)| ring.copy_out(self.request.sol + target.start, target.len()))
            .unwrap_or_default();
        !target.starts_with(b"/") && !target.starts_with(b"*")
    }

    /// Applies spec.md §4.7's header-rewrite subsection once the connection
    /// mode is known: adds/removes `Connection` (or `Proxy-Connection`)
    /// tokens client→server, and downgrades a keep-alive `Connection`
    /// server→client to `close` when the chosen mode forces one. Leaves
    /// `Connection` untouched entirely when an `Upgrade` token is present.
    pub fn rewrite_connection_headers(&mut self, ring: &mut Ring, use_proxy_connection_header: bool) -> Result<()> {
        if self.has_upgrade(ring) {
            return Ok(());
        }
        let token: &[u8] = match self.mode {
            ConnectionMode::KeepAlive => b"keep-alive",
            _ => b"close",
        };
        let header_name: &[u8] = if use_proxy_connection_header && self.wants_proxy_connection_header(ring) {
            b"proxy-connection"
        } else {
            b"connection"
        };
        if let Some(ctx) = self.request_headers.find(ring, b"connection", None) {
            let delta = self.request_headers.remove_line(ring, ctx);
            self.request.next = (self.request.next as isize + delta) as usize;
            if let Some(eoh) = self.request.eoh {
                self.request.eoh = Some((eoh as isize + delta) as usize);
            }
        }
        if let Some(ctx) = self.request_headers.find(ring, b"proxy-connection", None) {
            let delta = self.request_headers.remove_line(ring, ctx);
            self.request.next = (self.request.next as isize + delta) as usize;
            if let Some(eoh) = self.request.eoh {
                self.request.eoh = Some((eoh as isize + delta) as usize);
            }
        }
        let at = self.request.sol + self.request_headers.end_offset();
        let display_name = if header_name == b"proxy-connection" {
            "Proxy-Connection"
        } else {
            "Connection"
        };
        let line = format!("{}: {}\r\n", display_name, String::from_utf8_lossy(token));
        let delta = ring.insert(at, line.as_bytes())?;
        self.request.next = (self.request.next as isize + delta) as usize;
        if let Some(eoh) = self.request.eoh {
            self.request.eoh = Some((eoh as isize + delta) as usize);
        }
        let entry_len = line.len() - "\r\n".len();
        self.request_headers.push(entry_len, true)?;

        // Server→client: downgrade an existing KAL token to close when the
        // chosen mode forces one; otherwise leave the response's own
        // Connection header alone.
        if self.mode != ConnectionMode::KeepAlive {
            if let Some(ctx) = self.response_headers.find(ring, b"connection", None) {
                let value = ring.copy_out(self.response.sol + ctx.val_offset, ctx.vlen - ctx.tws);
                if value.eq_ignore_ascii_case(b"keep-alive") {
                    let delta = ring.replace(self.response.sol + ctx.val_offset, self.response.sol + ctx.val_offset + ctx.vlen - ctx.tws, b"close");
                    self.response_headers.apply_value_edit(ctx, delta);
                }
            }
        }
        Ok(())
    }
}
