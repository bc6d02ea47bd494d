//! Signed, expiring tokens for one-click e-mail actions.
//!
//! A token is `base64url(json(payload + exp)) "." base64url(hmac_sha256(secret, body))`.
//! The payload is a flat string map; `exp` is injected at signing time as epoch seconds.
//! Verification is stateless: there is no revocation list, so a token stays valid until
//! `exp` passes.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::clock::Clock;

/// Thirty days.
pub const DEFAULT_LINK_TTL_SECS: i64 = 60 * 60 * 24 * 30;

const EXP: &str = "exp";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("onboarding link secret is not configured")]
    MissingSecret,

    #[error("failed to encode link payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid HMAC key")]
    InvalidKey,
}

/// What a link authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Open,
    Click,
    Unsubscribe,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Open => "open",
            LinkKind::Click => "click",
            LinkKind::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(LinkKind::Open),
            "click" => Ok(LinkKind::Click),
            "unsubscribe" => Ok(LinkKind::Unsubscribe),
            _ => Err(()),
        }
    }
}

/// Decoded payload of a verified token, `exp` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkClaims(BTreeMap<String, String>);

impl LinkClaims {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn uid(&self) -> Option<&str> {
        self.get("uid")
    }

    pub fn eid(&self) -> Option<&str> {
        self.get("eid")
    }

    pub fn target(&self) -> Option<&str> {
        self.get("target")
    }

    pub fn kind(&self) -> Option<LinkKind> {
        self.get("kind").and_then(|k| k.parse().ok())
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.get(EXP).and_then(|v| v.parse().ok())
    }
}

#[derive(Clone)]
pub struct LinkSigner {
    secret: Option<Arc<[u8]>>,
    clock: Arc<dyn Clock>,
}

impl LinkSigner {
    pub fn new(secret: Option<String>, clock: Arc<dyn Clock>) -> Self {
        let secret = secret
            .filter(|s| !s.is_empty())
            .map(|s| Arc::from(s.into_bytes().into_boxed_slice()));
        Self { secret, clock }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Sign `payload` with an `exp` of now + `ttl_secs`. A caller-supplied `exp` is replaced.
    pub fn sign(
        &self,
        payload: &BTreeMap<String, String>,
        ttl_secs: i64,
    ) -> Result<String, TokenError> {
        let secret = self.secret()?;

        let exp = self.clock.now().timestamp().saturating_add(ttl_secs);
        let mut claims = payload.clone();
        claims.insert(EXP.to_string(), exp.to_string());

        // BTreeMap serializes with sorted keys, so equal payloads give equal bodies.
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = signature(secret, &body)?;

        Ok(format!("{body}.{signature}"))
    }

    /// `Ok(None)` for any malformed, tampered or expired token.
    pub fn verify(&self, token: &str) -> Result<Option<LinkClaims>, TokenError> {
        let secret = self.secret()?;

        let Some((body, provided)) = token.rsplit_once('.') else {
            return Ok(None);
        };
        if body.is_empty() || provided.is_empty() {
            return Ok(None);
        }

        let expected = signature(secret, body)?;
        if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            return Ok(None);
        }

        let Ok(raw) = URL_SAFE_NO_PAD.decode(body) else {
            return Ok(None);
        };
        let Ok(claims) = serde_json::from_slice::<BTreeMap<String, String>>(&raw) else {
            return Ok(None);
        };
        let claims = LinkClaims(claims);

        match claims.expires_at() {
            Some(exp) if self.clock.now().timestamp() <= exp => Ok(Some(claims)),
            _ => Ok(None),
        }
    }

    fn secret(&self) -> Result<&[u8], TokenError> {
        self.secret.as_deref().ok_or(TokenError::MissingSecret)
    }
}

impl fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSigner")
            .field("configured", &self.is_configured())
            .finish()
    }
}

fn signature(secret: &[u8], body: &str) -> Result<String, TokenError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|_| TokenError::InvalidKey)?;
    mac.update(body.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}
