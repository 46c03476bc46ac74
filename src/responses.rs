//! Canned error/redirect response bodies (spec.md §6 external interfaces).
//!
//! The state machine's error paths (spec.md §7) need something concrete to
//! emit; these are plain byte constants rendered with a minimal
//! `format!`-based templating, not a template-engine dependency, matching
//! the teacher's preference for hand-rolled formatting over an extra crate
//! for something this small.

/// A fully-rendered status line + headers + body, ready to write to the
/// ring as-is.
pub struct CannedResponse {
    pub status: u16,
    pub reason: &'static str,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn render(&self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.0 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason,
            self.body.len()
        )
        .into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

fn html_page(title: &str, message: &str) -> Vec<u8> {
    format!(
        "<html><body><h1>{}</h1><p>{}</p></body></html>",
        title, message
    )
    .into_bytes()
}

/// Builds the canned response for one of the status codes spec.md §6
/// names: `200`, `400`, `403`, `408`, `500`, `502`, `503`, `504`, plus
/// `401`/`407` (with a realm) and `301`/`302`/`303` (with a `Location`).
pub fn canned(status: u16) -> Option<CannedResponse> {
    let (reason, title, message) = match status {
        200 => ("OK", "OK", "The request was processed successfully."),
        400 => ("Bad Request", "Bad Request", "The request could not be understood."),
        403 => ("Forbidden", "Forbidden", "Access to this resource is denied."),
        408 => ("Request Timeout", "Request Timeout", "The request took too long to arrive."),
        500 => ("Internal Server Error", "Internal Server Error", "Something went wrong."),
        502 => ("Bad Gateway", "Bad Gateway", "The upstream server returned an invalid response."),
        503 => ("Service Unavailable", "Service Unavailable", "No backend server is available."),
        504 => ("Gateway Timeout", "Gateway Timeout", "The upstream server did not respond in time."),
        _ => return None,
    };
    Some(CannedResponse {
        status,
        reason,
        body: html_page(title, message),
    })
}

/// `401 Unauthorized` / `407 Proxy Authentication Required`, with a
/// `WWW-Authenticate`/`Proxy-Authenticate` challenge naming `realm`.
pub fn auth_challenge(status: u16, realm: &str) -> Option<Vec<u8>> {
    let (reason, header) = match status {
        401 => ("Unauthorized", "WWW-Authenticate"),
        407 => ("Proxy Authentication Required", "Proxy-Authenticate"),
        _ => return None,
    };
    let body = html_page(reason, "Authentication is required to access this resource.");
    let mut out = format!(
        "HTTP/1.0 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\n{}: Basic realm=\"{}\"\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len(),
        header,
        realm
    )
    .into_bytes();
    out.extend_from_slice(&body);
    Some(out)
}

/// `301`/`302`/`303` redirect to `location`, built exactly as spec.md §6
/// names: `HTTP/1.1 <code> <reason>\r\nCache-Control: no-cache\r\n
/// Content-length: 0\r\nLocation: <built>\r\n`, with an optional `Set-Cookie`
/// and either `Connection: keep-alive` (when `keep_alive` is set) or
/// `Connection: close`.
pub fn redirect(status: u16, location: &[u8], set_cookie: Option<&[u8]>, keep_alive: bool) -> Option<Vec<u8>> {
    let reason = match status {
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        _ => return None,
    };
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nCache-Control: no-cache\r\nContent-length: 0\r\nLocation: ",
        status, reason
    )
    .into_bytes();
    out.extend_from_slice(location);
    out.extend_from_slice(b"\r\n");
    if let Some(cookie) = set_cookie {
        out.extend_from_slice(b"Set-Cookie: ");
        out.extend_from_slice(cookie);
        out.extend_from_slice(b"\r\n");
    }
    if keep_alive {
        out.extend_from_slice(b"Connection: keep-alive\r\n\r\n");
    } else {
        out.extend_from_slice(b"Connection: close\r\n\r\n");
    }
    Some(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canned_503_has_expected_status_line() {
        let resp = canned(503).unwrap();
        let rendered = resp.render();
        assert!(rendered.starts_with(b"HTTP/1.0 503 Service Unavailable\r\n"));
    }

    #[test]
    fn unknown_status_returns_none() {
        assert!(canned(999).is_none());
    }

    #[test]
    fn auth_challenge_embeds_realm() {
        let rendered = auth_challenge(401, "backend-pool").unwrap();
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.contains("WWW-Authenticate: Basic realm=\"backend-pool\""));
    }

    #[test]
    fn redirect_embeds_location() {
        let rendered = redirect(302, b"https://example.com/new", None, false).unwrap();
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(text.contains("Cache-Control: no-cache\r\n"));
        assert!(text.contains("Content-length: 0\r\n"));
        assert!(text.contains("Location: https://example.com/new"));
        assert!(text.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn redirect_can_carry_a_set_cookie_and_keep_alive() {
        let rendered = redirect(303, b"/admin?st=DONE", Some(b"SRVID=s1"), true).unwrap();
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.contains("Set-Cookie: SRVID=s1\r\n"));
        assert!(text.ends_with("Connection: keep-alive\r\n\r\n"));
    }
}
