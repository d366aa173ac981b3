// Explicit session state for the panel's cookie auth.
//
// The panel sets a `3x-ui` session cookie on login. Cookie propagation
// through the jar has proven unreliable across panel versions (some
// deployments emit Set-Cookie attributes reqwest's jar drops), so the
// captured cookie is retained here and sent explicitly on every request.

use std::time::Instant;

/// The session cookie name the panel issues on successful login.
pub const SESSION_COOKIE: &str = "3x-ui";

/// A captured panel session.
///
/// Acquired by [`PanelClient::login`](crate::PanelClient::login) and
/// invalidated on any 401 response. `cookie_header` is the full value
/// to send in the `Cookie` request header.
#[derive(Debug, Clone)]
pub struct PanelSession {
    pub cookie_header: String,
    pub acquired_at: Instant,
}

impl PanelSession {
    pub fn new(cookie_header: String) -> Self {
        Self {
            cookie_header,
            acquired_at: Instant::now(),
        }
    }

    /// Age of this session since login.
    pub fn age(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }
}

/// Extract the panel session cookie value from a `Set-Cookie` header line.
///
/// Format: `3x-ui=<value>; Path=/; Expires=...` -- the value may itself
/// contain `=`, so only the first separator splits.
pub(crate) fn session_cookie_from_set_cookie(line: &str) -> Option<String> {
    line.split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(&format!("{SESSION_COOKIE}=")))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_cookie_value() {
        let line = "3x-ui=abc=def; Path=/; Expires=Wed, 21 Oct 2026 07:28:00 GMT";
        assert_eq!(
            session_cookie_from_set_cookie(line).as_deref(),
            Some("abc=def")
        );
    }

    #[test]
    fn ignores_other_cookies() {
        assert_eq!(session_cookie_from_set_cookie("lang=en-US; Path=/"), None);
    }
}
