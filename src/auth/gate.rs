//! Boundary facade for the HTTP layer.
//!
//! Handlers get one shared [`Gatekeeper`] and never see why a credential was
//! rejected: every failure mode collapses to "not signed in".

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{CookieConfig, RateLimitConfig, Settings};
use crate::error::GateResult;

use super::cookie::{find_cookie, format_clear_cookie, format_set_cookie};
use super::rate_limit::{Policy, RateLimiter, SweepHandle};
use super::secret::SessionSecret;
use super::token::{Subject, Token, TokenAuthenticator};

/// Which rate limit policy applies to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Login and registration.
    Login,
    /// JSON API endpoints.
    Api,
    /// Pages and everything else.
    General,
}

/// Limiter key: one bucket per policy per client.
pub type ClientBucket = (PolicyKind, String);

/// Session and admission control shared by all request handlers.
pub struct Gatekeeper {
    authenticator: TokenAuthenticator,
    limiter: Arc<RateLimiter<ClientBucket>>,
    token_ttl: Duration,
    policies: RateLimitConfig,
    cookie: CookieConfig,
}

impl Gatekeeper {
    /// Build a gatekeeper, resolving the session secret from the settings.
    pub fn from_settings(settings: &Settings) -> GateResult<Self> {
        let secret = SessionSecret::resolve(&settings.security)?;
        Self::new(&secret, settings)
    }

    /// Build a gatekeeper around an already loaded secret.
    ///
    /// Settings are validated here as well as in [`Settings::load`].
    pub fn new(secret: &SessionSecret, settings: &Settings) -> GateResult<Self> {
        settings.validate()?;

        if secret.is_insecure_fallback() {
            warn!("Session tokens are signed with the built-in fallback secret");
        }

        Ok(Self {
            authenticator: TokenAuthenticator::new(secret.as_bytes())?,
            limiter: Arc::new(RateLimiter::new()),
            token_ttl: Duration::from_secs(settings.security.token_ttl_hours.saturating_mul(3600)),
            policies: settings.rate_limit.clone(),
            cookie: settings.cookie.clone(),
        })
    }

    /// Issue a credential for `subject` and return the `Set-Cookie` value
    /// carrying it.
    pub fn start_session(&self, subject: impl Into<Subject>) -> GateResult<String> {
        let subject = subject.into();
        let credential = self.authenticator.issue(subject.clone(), self.token_ttl)?;
        debug!(%subject, "Issued session token");

        Ok(format_set_cookie(
            &self.cookie.name,
            &credential,
            self.cookie.max_age_seconds,
            self.cookie.secure,
        ))
    }

    /// Validate a credential. Any failure yields `None`.
    pub fn authenticate(&self, credential: &str) -> Option<Token> {
        match self.authenticator.validate(credential) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(error = %e, "Rejected session credential");
                None
            }
        }
    }

    /// Validate the session cookie found in a `Cookie` request header.
    pub fn authenticate_cookie_header(&self, header: &str) -> Option<Token> {
        find_cookie(header, &self.cookie.name).and_then(|value| self.authenticate(value))
    }

    /// The `Set-Cookie` value that logs the client out.
    pub fn end_session(&self) -> String {
        format_clear_cookie(&self.cookie.name)
    }

    /// Admit or reject a request from `client_key` under the `kind` policy.
    pub fn admit(&self, kind: PolicyKind, client_key: &str) -> bool {
        let admitted = self
            .limiter
            .admit(&(kind, client_key.to_string()), self.policy(kind));
        if !admitted {
            debug!(?kind, client = client_key, "Rate limit exceeded");
        }
        admitted
    }

    /// Requests `client_key` may still make under the `kind` policy.
    pub fn remaining(&self, kind: PolicyKind, client_key: &str) -> usize {
        self.limiter
            .remaining(&(kind, client_key.to_string()), self.policy(kind))
    }

    /// The configured policy for `kind`.
    pub fn policy(&self, kind: PolicyKind) -> Policy {
        let config = match kind {
            PolicyKind::Login => self.policies.login,
            PolicyKind::Api => self.policies.api,
            PolicyKind::General => self.policies.general,
        };
        Policy::from(config)
    }

    /// Start sweeping idle clients, once per longest configured window.
    pub fn start_sweeper(&self) -> SweepHandle {
        let interval = Duration::from_secs(self.policies.longest_window_seconds());
        self.limiter.start_sweep_task(interval)
    }

    /// Name of the session cookie.
    pub fn cookie_name(&self) -> &str {
        &self.cookie.name
    }

    /// The token authenticator behind this gatekeeper.
    pub fn authenticator(&self) -> &TokenAuthenticator {
        &self.authenticator
    }

    /// The shared rate limiter, keyed by policy and client.
    pub fn limiter(&self) -> &Arc<RateLimiter<ClientBucket>> {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_gatekeeper() -> Gatekeeper {
        let secret = SessionSecret::new("gate-test-secret").unwrap();
        Gatekeeper::new(&secret, &Settings::default()).unwrap()
    }

    fn credential_from(set_cookie: &str) -> String {
        let pair = set_cookie.split(';').next().unwrap();
        find_cookie(pair, "session").unwrap().to_string()
    }

    #[test]
    fn test_session_round_trip() {
        let gate = create_test_gatekeeper();

        let set_cookie = gate.start_session(42).unwrap();
        assert!(set_cookie.starts_with("session="));
        assert!(set_cookie.contains("Max-Age=604800"));

        let token = gate.authenticate(&credential_from(&set_cookie)).unwrap();
        assert_eq!(token.subject, Subject::Id(42));
    }

    #[test]
    fn test_cookie_header_lookup() {
        let gate = create_test_gatekeeper();
        let set_cookie = gate.start_session("alice").unwrap();
        let header = format!("theme=dark; session={}", credential_from(&set_cookie));

        let token = gate.authenticate_cookie_header(&header).unwrap();
        assert_eq!(token.subject, Subject::from("alice"));
        assert!(gate.authenticate_cookie_header("theme=dark").is_none());
    }

    #[test]
    fn test_every_failure_looks_the_same() {
        let gate = create_test_gatekeeper();
        let other = Gatekeeper::new(
            &SessionSecret::new("another-secret").unwrap(),
            &Settings::default(),
        )
        .unwrap();

        let foreign = credential_from(&other.start_session(1).unwrap());
        let expired = gate
            .authenticator()
            .issue_at(1, Duration::from_secs(1), 1_000)
            .unwrap();

        for credential in ["", "garbage", "a.b", foreign.as_str(), expired.as_str()] {
            assert!(gate.authenticate(credential).is_none());
        }
    }

    #[test]
    fn test_end_session() {
        let gate = create_test_gatekeeper();
        assert!(gate.end_session().starts_with("session=;"));
    }

    #[test]
    fn test_login_policy_is_strict() {
        let gate = create_test_gatekeeper();

        for _ in 0..5 {
            assert!(gate.admit(PolicyKind::Login, "203.0.113.7"));
        }
        assert!(!gate.admit(PolicyKind::Login, "203.0.113.7"));
        assert_eq!(gate.remaining(PolicyKind::Login, "203.0.113.7"), 0);

        // Other policies and other clients are unaffected
        assert!(gate.admit(PolicyKind::General, "203.0.113.7"));
        assert!(gate.admit(PolicyKind::Login, "203.0.113.8"));
        assert_eq!(gate.remaining(PolicyKind::General, "203.0.113.7"), 59);
    }

    #[test]
    fn test_policies_follow_settings() {
        let settings = Settings::from_toml(
            "[rate_limit.api]\nlimit = 2\nwindow_seconds = 10\n",
        )
        .unwrap();
        let gate = Gatekeeper::new(&SessionSecret::new("s").unwrap(), &settings).unwrap();

        assert_eq!(
            gate.policy(PolicyKind::Api),
            Policy::new(2, Duration::from_secs(10))
        );
        assert_eq!(gate.policy(PolicyKind::Login), Policy::login());
        assert_eq!(gate.policy(PolicyKind::General), Policy::general());
    }

    #[test]
    fn test_rejects_hand_built_zero_window() {
        let mut settings = Settings::default();
        settings.rate_limit.login.window_seconds = 0;
        settings.rate_limit.api.window_seconds = 0;
        settings.rate_limit.general.window_seconds = 0;

        let secret = SessionSecret::new("s").unwrap();
        assert!(matches!(
            Gatekeeper::new(&secret, &settings),
            Err(crate::error::GateError::Config { .. })
        ));
    }

    #[test]
    fn test_rejects_hand_built_zero_ttl() {
        let mut settings = Settings::default();
        settings.security.token_ttl_hours = 0;

        let secret = SessionSecret::new("s").unwrap();
        assert!(Gatekeeper::new(&secret, &settings).is_err());
    }

    #[tokio::test]
    async fn test_sweeper_starts_and_stops() {
        let gate = create_test_gatekeeper();
        gate.admit(PolicyKind::General, "198.51.100.1");

        let handle = gate.start_sweeper();
        handle.stop().await;

        // Nothing was old enough to reclaim.
        assert_eq!(gate.limiter().tracked_keys(), 1);
    }
}
