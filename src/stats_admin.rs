//! Admin POST protocol (spec.md §6 external interfaces): a form-encoded
//! `b`/`action`/`s` command surface for enabling, disabling, stopping,
//! starting, or shutting down servers, answered with a 303 redirect
//! carrying a status token. Stats-page rendering itself is out of scope
//! (spec.md §1); this module only parses the admin command and builds the
//! response.
//!
//! Grounded on the teacher's `table.rs` `Table<T>`: an ordered,
//! case-insensitively searchable list of pairs, generalized here from
//! owned `Bstr` keys to plain `Vec<u8>`.

use crate::responses;

/// One `key=value` pair from an admin POST body, in the order received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Parses an admin command body of `application/x-www-form-urlencoded`-
/// shaped `key=value&key=value` pairs, without URL-decoding (spec.md §6
/// treats the admin surface as a separate, narrow protocol rather than a
/// full form decoder).
pub fn parse_fields(body: &[u8]) -> Vec<Field> {
    body.split(|&b| b == b'&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.iter().position(|&b| b == b'=') {
            Some(eq) => Field {
                key: pair[..eq].to_vec(),
                value: pair[eq + 1..].to_vec(),
            },
            None => Field {
                key: pair.to_vec(),
                value: Vec::new(),
            },
        })
        .collect()
}

/// Looks up the first field named `key`, case-insensitively.
pub fn find<'a>(fields: &'a [Field], key: &[u8]) -> Option<&'a Field> {
    fields.iter().find(|f| f.key.as_slice().eq_ignore_ascii_case(key))
}

/// Looks up every field named `key`, in order, case-insensitively.
fn find_all<'a>(fields: &'a [Field], key: &[u8]) -> Vec<&'a Field> {
    fields.iter().filter(|f| f.key.as_slice().eq_ignore_ascii_case(key)).collect()
}

/// `action` values spec.md §6 recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Disable,
    Enable,
    Stop,
    Start,
    Shutdown,
}

impl Action {
    fn parse(value: &[u8]) -> Option<Self> {
        match value {
            b"disable" => Some(Action::Disable),
            b"enable" => Some(Action::Enable),
            b"stop" => Some(Action::Stop),
            b"start" => Some(Action::Start),
            b"shutdown" => Some(Action::Shutdown),
            _ => None,
        }
    }
}

/// The status token appended to `Location` on the 303 response (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminStatus {
    /// The backend/action pair is not permitted for this admin session.
    Deny,
    /// Every named server was acted on successfully.
    Done,
    /// The command body itself was malformed (missing `b` or bad `action`).
    Errp,
    /// Too many servers were named in one command.
    Excd,
    /// No `s` fields were given at all.
    None,
    /// Some, but not all, named servers were acted on successfully.
    Part,
    /// The backend or a named server does not exist.
    Unkn,
}

impl AdminStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminStatus::Deny => "DENY",
            AdminStatus::Done => "DONE",
            AdminStatus::Errp => "ERRP",
            AdminStatus::Excd => "EXCD",
            AdminStatus::None => "NONE",
            AdminStatus::Part => "PART",
            AdminStatus::Unkn => "UNKN",
        }
    }
}

/// A parsed, not-yet-applied admin command: act with `action` on every
/// server in `servers`, within backend `backend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub backend: Vec<u8>,
    pub action: Action,
    pub servers: Vec<Vec<u8>>,
}

/// Maximum number of `s` fields accepted in one command, per spec.md §6's
/// `EXCD` status.
pub const MAX_SERVERS_PER_COMMAND: usize = 64;

/// Parses an admin POST body into a `Command`, or the terminal status to
/// answer with directly if the body itself is unusable.
pub fn parse_command(body: &[u8]) -> Result<Command, AdminStatus> {
    let fields = parse_fields(body);
    let backend = find(&fields, b"b").ok_or(AdminStatus::Errp)?.value.clone();
    let action = find(&fields, b"action")
        .and_then(|f| Action::parse(&f.value))
        .ok_or(AdminStatus::Errp)?;
    let servers: Vec<Vec<u8>> = find_all(&fields, b"s").into_iter().map(|f| f.value.clone()).collect();
    if servers.is_empty() {
        return Err(AdminStatus::None);
    }
    if servers.len() > MAX_SERVERS_PER_COMMAND {
        return Err(AdminStatus::Excd);
    }
    Ok(Command { backend, action, servers })
}

/// Applies `cmd` by calling `apply_one(backend, server, action)` for every
/// named server, and aggregates the outcome into the spec.md §6 status
/// vocabulary. The actual backend/server registry lives outside this core
/// (spec.md §1); `apply_one` is that external collaborator.
pub fn apply<F>(cmd: &Command, mut apply_one: F) -> AdminStatus
where
    F: FnMut(&[u8], &[u8], Action) -> bool,
{
    let mut ok = 0usize;
    for server in &cmd.servers {
        if apply_one(&cmd.backend, server, cmd.action) {
            ok += 1;
        }
    }
    if ok == 0 {
        AdminStatus::Unkn
    } else if ok == cmd.servers.len() {
        AdminStatus::Done
    } else {
        AdminStatus::Part
    }
}

/// Builds the 303 response for an admin POST: `Location: <uri>;st=<status>`,
/// per spec.md §6.
pub fn render_redirect(uri: &[u8], status: AdminStatus, keep_alive: bool) -> Vec<u8> {
    let mut location = uri.to_vec();
    location.extend_from_slice(b";st=");
    location.extend_from_slice(status.as_str().as_bytes());
    responses::redirect(303, &location, None, keep_alive).expect("303 is always renderable")
}

/// End-to-end handling of one admin POST body: parse, apply, respond.
pub fn handle<F>(body: &[u8], uri: &[u8], keep_alive: bool, apply_one: F) -> Vec<u8>
where
    F: FnMut(&[u8], &[u8], Action) -> bool,
{
    match parse_command(body) {
        Ok(cmd) => render_redirect(uri, apply(&cmd, apply_one), keep_alive),
        Err(status) => render_redirect(uri, status, keep_alive),
    }
}
