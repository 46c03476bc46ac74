//! Crate-wide error type.
//!
//! Mirrors the shape the teacher's `request.rs`/`headers.rs` import as
//! `crate::error::Result` — a single enum, no external error-derive crate.

use std::fmt;

/// The parsing phase during which a `Error::Parse` occurred, kept small so
/// logging and the phase mask in `txn` can consult it without re-deriving it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParseKind {
    RequestLine,
    StatusLine,
    Headers,
    ChunkSize,
    ChunkData,
    Trailers,
}

impl fmt::Display for ParseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseKind::RequestLine => "request-line",
            ParseKind::StatusLine => "status-line",
            ParseKind::Headers => "headers",
            ParseKind::ChunkSize => "chunk-size",
            ParseKind::ChunkData => "chunk-data",
            ParseKind::Trailers => "trailers",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum Error {
    /// A malformed message; `position` is the absolute offset of the first
    /// offending byte (spec.md §4.3 `err_pos`).
    Parse { position: usize, kind: ParseKind },
    /// A ring buffer operation would cross the reserved rewrite margin, or
    /// the message is bigger than the ring (spec.md §4.1).
    NoRoom,
    /// The header index arena has no free entries (spec.md §4.2).
    NoSpace,
    /// A compression algorithm failed to initialize, encode, or flush.
    Compression(&'static str),
    /// A header or cookie value was not valid UTF-8 where UTF-8 was required.
    InvalidUtf8,
    /// A rule or protocol invariant was violated (e.g. PROXY protocol framing).
    Policy(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse { position, kind } => {
                write!(f, "parse error in {} at offset {}", kind, position)
            }
            Error::NoRoom => write!(f, "ring buffer has no room for this operation"),
            Error::NoSpace => write!(f, "header index has no free entries"),
            Error::Compression(msg) => write!(f, "compression error: {}", msg),
            Error::InvalidUtf8 => write!(f, "invalid utf-8"),
            Error::Policy(msg) => write!(f, "policy violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
