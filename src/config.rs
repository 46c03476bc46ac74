//! Plain-data tunables consumed by the core.
//!
//! Config *file* parsing is out of scope (spec.md §1); this struct only
//! models the values the rest of the crate treats as "configured" — built
//! with `Default` so callers can override only what they need, the way the
//! teacher's `decompressors::Options` is constructed.

/// How the core should behave on bytes it would otherwise reject.
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of each connection's two ring buffers, in bytes.
    pub ring_size: usize,
    /// Bytes at the tail of each ring reserved for in-place rewrites
    /// (spec.md §4.1); a new message may not begin parsing if doing so
    /// would let unparsed input cross into this margin.
    pub rewrite_reserve: usize,
    /// Maximum number of header index entries per message (spec.md §4.2).
    pub max_headers: usize,
    /// Accept request-target bytes >= 0x80 instead of erroring (spec.md §4.3).
    pub accept_invalid_http: bool,
    /// Compression rate ceiling/floor, bytes/sec, and level bounds (spec.md §4.5).
    pub compression: CompressionConfig,
    /// Backend persistence cookie configuration (spec.md §4.6).
    pub cookie: CookieConfig,
    /// Use `Proxy-Connection` instead of `Connection` when the request
    /// target does not begin with `/` or `*` (spec.md §6, `TX_USE_PX_CONN`).
    pub use_proxy_connection_header: bool,
    /// How long a TCP-content rule may stay MISS before being forced to FAIL
    /// (spec.md §4.8).
    pub inspect_delay_ms: u64,
    /// How long a tarpit action holds a connection before responding 500
    /// (spec.md §4.8 / GLOSSARY "Tarpit").
    pub tarpit_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_size: 16 * 1024,
            rewrite_reserve: 8 * 1024,
            max_headers: 128,
            accept_invalid_http: false,
            compression: CompressionConfig::default(),
            cookie: CookieConfig::default(),
            use_proxy_connection_header: false,
            inspect_delay_ms: 5_000,
            tarpit_timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompressionConfig {
    pub rate_ceiling: u64,
    pub rate_floor: u64,
    pub min_level: u32,
    pub max_level: u32,
    /// Minimum measured CPU idle percentage required to compress at all
    /// (spec.md §4.5 selection rules); `0` disables the check.
    pub min_idle_pct: u8,
    /// When set, only these `Content-Type` prefixes are compressed
    /// (spec.md §4.5 "configured type whitelist").
    pub type_whitelist: Option<Vec<String>>,
    /// Strips all `Accept-Encoding` request headers so the backend never
    /// compresses on its own, letting this core own compression instead
    /// (spec.md §4.5 "offload mode").
    pub offload_mode: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            rate_ceiling: 1_000_000,
            rate_floor: 100_000,
            min_level: 0,
            max_level: 9,
            min_idle_pct: 0,
            type_whitelist: None,
            offload_mode: false,
        }
    }
}

/// Backend persistence cookie behavior (spec.md §4.6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CookieMode {
    /// No persistence cookie processing.
    Ignore,
    /// Value is `SERVER_ID ~ OPAQUE`; the opaque suffix is preserved verbatim.
    Prefix,
    /// Value is `SERVER_ID[|LAST_SEEN[|FIRST_SEEN]]`, passively observed.
    Passive,
    /// Like Passive, but the core inserts the cookie when absent.
    Insert,
    /// Like Insert, but the inserted cookie is removed again before the
    /// request reaches the backend (insert+indirect, spec.md §4.6).
    InsertIndirect,
    /// Existing cookie values are rewritten to the chosen server's id.
    Rewrite,
}

#[derive(Clone, Debug)]
pub struct CookieConfig {
    pub mode: CookieMode,
    /// Name of the backend persistence cookie, e.g. `SRVID`.
    pub name: String,
    /// Name of the frontend capture cookie, if any (spec.md §4.6).
    pub capture_name: Option<String>,
    /// Seconds since the cookie's first-seen date after which it is stale.
    pub maxlife: Option<i64>,
    /// Seconds since the cookie's last-seen date after which it is stale.
    pub maxidle: Option<i64>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            mode: CookieMode::Ignore,
            name: String::from("SRVID"),
            capture_name: None,
            maxlife: None,
            maxidle: None,
        }
    }
}
