//! HMAC-SHA256 signed session tokens.
//!
//! A credential is `base64url(json(token)) + "." + base64url(hmac(payload))`,
//! where the MAC covers the encoded payload string exactly as transmitted.
//! Encoding is URL-safe base64 with `=` padding; decoding also accepts
//! unpadded segments.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult, TokenErrorKind};

/// Random bytes per nonce (hex encoded on the wire).
pub const NONCE_LEN: usize = 16;

const SEPARATOR: char = '.';

const CREDENTIAL_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Identifier the token is issued for.
///
/// Opaque to this crate; on the wire it is a bare JSON number or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subject {
    Id(i64),
    Name(String),
}

impl From<i64> for Subject {
    fn from(id: i64) -> Self {
        Subject::Id(id)
    }
}

impl From<i32> for Subject {
    fn from(id: i32) -> Self {
        Subject::Id(i64::from(id))
    }
}

impl From<u32> for Subject {
    fn from(id: u32) -> Self {
        Subject::Id(i64::from(id))
    }
}

impl From<&str> for Subject {
    fn from(name: &str) -> Self {
        Subject::Name(name.to_string())
    }
}

impl From<String> for Subject {
    fn from(name: String) -> Self {
        Subject::Name(name)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Id(id) => write!(f, "{id}"),
            Subject::Name(name) => f.write_str(name),
        }
    }
}

/// Decoded session token.
///
/// Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Who the token was issued to.
    #[serde(rename = "user_id")]
    pub subject: Subject,
    /// Expiry as Unix seconds. The token is valid while `now <= expires_at`.
    pub expires_at: i64,
    /// Hex-encoded random nonce, unique per issuance.
    pub nonce: String,
}

/// Issues and validates signed credentials under one secret key.
pub struct TokenAuthenticator {
    key: hmac::Key,
    rng: SystemRandom,
}

impl TokenAuthenticator {
    /// Create an authenticator for the given secret.
    pub fn new(secret: &[u8]) -> GateResult<Self> {
        if secret.is_empty() {
            return Err(GateError::Config {
                message: "Session secret must not be empty".to_string(),
            });
        }

        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            rng: SystemRandom::new(),
        })
    }

    /// Issue a credential for `subject` that expires `ttl` from now.
    ///
    /// Expiry has second granularity; a fractional `ttl` is rounded up.
    pub fn issue(&self, subject: impl Into<Subject>, ttl: Duration) -> GateResult<String> {
        self.issue_at(subject, ttl, unix_now())
    }

    /// Issue a credential as if the current time were `now` (Unix seconds).
    pub fn issue_at(
        &self,
        subject: impl Into<Subject>,
        ttl: Duration,
        now: i64,
    ) -> GateResult<String> {
        if ttl.is_zero() {
            return Err(encoding_error("ttl must be positive"));
        }
        let whole_secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
        let ttl_secs = i64::try_from(whole_secs).unwrap_or(i64::MAX);

        let expires_at = now
            .checked_add(ttl_secs)
            .ok_or_else(|| encoding_error("expiry overflows the timestamp range"))?;

        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| encoding_error("system random source unavailable"))?;

        let token = Token {
            subject: subject.into(),
            expires_at,
            nonce: hex::encode(nonce),
        };

        let json = serde_json::to_vec(&token).map_err(|e| {
            GateError::token(TokenErrorKind::Encoding {
                message: e.to_string(),
            })
        })?;

        let payload = CREDENTIAL_B64.encode(json);
        let signature = self.sign(&payload);

        Ok(format!("{payload}{SEPARATOR}{signature}"))
    }

    /// Validate a credential against the current time.
    pub fn validate(&self, credential: &str) -> GateResult<Token> {
        self.validate_at(credential, unix_now())
    }

    /// Validate a credential as if the current time were `now` (Unix seconds).
    ///
    /// Checks, in order:
    /// 1. Credential has exactly two non-empty segments
    /// 2. Signature matches the encoded payload (constant time)
    /// 3. Payload decodes to a token
    /// 4. Token is not expired
    pub fn validate_at(&self, credential: &str, now: i64) -> GateResult<Token> {
        let (payload, signature) = credential
            .split_once(SEPARATOR)
            .ok_or_else(|| malformed("missing separator"))?;

        if signature.contains(SEPARATOR) {
            return Err(malformed("too many segments"));
        }
        if payload.is_empty() || signature.is_empty() {
            return Err(malformed("empty segment"));
        }

        let tag = CREDENTIAL_B64
            .decode(signature)
            .map_err(|_| GateError::token(TokenErrorKind::InvalidSignature))?;

        hmac::verify(&self.key, payload.as_bytes(), &tag)
            .map_err(|_| GateError::token(TokenErrorKind::InvalidSignature))?;

        let json = CREDENTIAL_B64
            .decode(payload)
            .map_err(|_| malformed("payload is not base64url"))?;

        let token: Token =
            serde_json::from_slice(&json).map_err(|_| malformed("payload is not a token"))?;

        if now > token.expires_at {
            return Err(GateError::token(TokenErrorKind::Expired {
                expired_at: token.expires_at,
            }));
        }

        Ok(token)
    }

    fn sign(&self, payload: &str) -> String {
        let tag = hmac::sign(&self.key, payload.as_bytes());
        CREDENTIAL_B64.encode(tag.as_ref())
    }
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator").finish_non_exhaustive()
    }
}

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn malformed(reason: &'static str) -> GateError {
    GateError::token(TokenErrorKind::Malformed { reason })
}

fn encoding_error(message: &str) -> GateError {
    GateError::token(TokenErrorKind::Encoding {
        message: message.to_string(),
    })
}
