//! Authentication module.
//!
//! Handles signed session tokens, session secret loading, session cookies
//! and per-client rate limiting.

mod client_key;
mod cookie;
mod gate;
mod rate_limit;
mod secret;
mod token;

pub use client_key::client_key;
pub use cookie::{find_cookie, format_clear_cookie, format_set_cookie, SESSION_COOKIE_NAME};
pub use gate::{ClientBucket, Gatekeeper, PolicyKind};
pub use rate_limit::{Policy, RateLimiter, SweepHandle, MIN_SWEEP_INTERVAL};
pub use secret::{SessionSecret, INSECURE_FALLBACK_SECRET};
pub use token::{unix_now, Subject, Token, TokenAuthenticator, NONCE_LEN};
