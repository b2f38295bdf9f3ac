//! Session Gate Library
//!
//! Signed, stateless session tokens and per-client sliding window rate
//! limiting for server-rendered web applications. The HTTP layer calls in to
//! issue and validate credentials and to admit requests; everything else
//! (routing, templates, storage) lives outside this crate.

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;

pub use auth::{
    Gatekeeper, Policy, PolicyKind, RateLimiter, SessionSecret, Token, TokenAuthenticator,
};
pub use config::Settings;
pub use error::{GateError, GateResult, TokenErrorKind};
