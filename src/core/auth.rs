//! Shared-secret bearer authentication.
use http::{HeaderMap, header::AUTHORIZATION};

/// Paths that never require credentials (orchestrator probes and scrapes).
pub const EXEMPT_PATHS: [&str; 3] = ["/healthz", "/readyz", "/metrics"];

/// Whether `path` belongs to the probe/scrape exemption set.
pub fn is_exempt_path(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path)
}

/// Outcome of checking a request against the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Auth is disabled or the path is exempt.
    Bypass,
    /// Credential matched.
    Authorized,
    /// Credential absent or wrong.
    Denied(AuthFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingCredential,
    MalformedCredential,
    InvalidToken,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::MissingCredential => "missing",
            AuthFailure::MalformedCredential => "malformed",
            AuthFailure::InvalidToken => "invalid",
        }
    }
}

/// Validates `Authorization: Bearer <token>` against one configured secret.
#[derive(Debug, Clone)]
pub struct AuthGate {
    token: Option<String>,
}

impl AuthGate {
    /// A gate that lets everything through.
    pub fn disabled() -> Self {
        Self { token: None }
    }

    /// A gate requiring `token` on every non-exempt path.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    pub fn check(&self, path: &str, headers: &HeaderMap) -> AuthDecision {
        let Some(expected) = self.token.as_deref() else {
            return AuthDecision::Bypass;
        };
        if is_exempt_path(path) {
            return AuthDecision::Bypass;
        }

        let Some(value) = headers.get(AUTHORIZATION) else {
            return AuthDecision::Denied(AuthFailure::MissingCredential);
        };
        let Ok(value) = value.to_str() else {
            return AuthDecision::Denied(AuthFailure::MalformedCredential);
        };

        match value.trim().strip_prefix("Bearer ") {
            Some(presented) if presented.trim() == expected => AuthDecision::Authorized,
            Some(_) => AuthDecision::Denied(AuthFailure::InvalidToken),
            None => AuthDecision::Denied(AuthFailure::MalformedCredential),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn test_disabled_gate_bypasses() {
        let gate = AuthGate::disabled();
        assert_eq!(
            gate.check("/api/v1/metrics/history", &HeaderMap::new()),
            AuthDecision::Bypass
        );
    }

    #[test]
    fn test_valid_bearer_token() {
        let gate = AuthGate::with_token("secret");
        assert_eq!(
            gate.check("/api/v1/metrics/history", &headers_with("Bearer secret")),
            AuthDecision::Authorized
        );
        assert_eq!(
            gate.check("/api/v1/metrics/history", &headers_with("  Bearer secret  ")),
            AuthDecision::Authorized
        );
    }

    #[test]
    fn test_missing_and_wrong_tokens() {
        let gate = AuthGate::with_token("secret");
        assert_eq!(
            gate.check("/api/v1/metrics/history", &HeaderMap::new()),
            AuthDecision::Denied(AuthFailure::MissingCredential)
        );
        assert_eq!(
            gate.check("/api/x", &headers_with("Bearer Secret")),
            AuthDecision::Denied(AuthFailure::InvalidToken)
        );
        assert_eq!(
            gate.check("/api/x", &headers_with("bearer secret")),
            AuthDecision::Denied(AuthFailure::MalformedCredential)
        );
        assert_eq!(
            gate.check("/api/x", &headers_with("Basic c2VjcmV0")),
            AuthDecision::Denied(AuthFailure::MalformedCredential)
        );
    }

    #[test]
    fn test_exempt_paths_need_no_credential() {
        let gate = AuthGate::with_token("secret");
        for path in EXEMPT_PATHS {
            assert_eq!(gate.check(path, &HeaderMap::new()), AuthDecision::Bypass);
        }
        assert_eq!(
            gate.check("/healthz/extra", &HeaderMap::new()),
            AuthDecision::Denied(AuthFailure::MissingCredential)
        );
    }
}
