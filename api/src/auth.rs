//! Bearer session tokens issued by the identity provider.
//!
//! Sign-in happens elsewhere; this service only checks the EdDSA signature and expiry of
//! the JWT and takes `sub` as the user id.

use std::{fs, path::Path};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::{config::ConfigError, error::AppError, models::session::Claims, AppState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
}

pub fn load_decoding_key(path: &Path) -> Result<DecodingKey, ConfigError> {
    let pem = fs::read(path).map_err(|e| ConfigError::Invalid {
        key: "SESSION_PUBLIC_KEY_PATH",
        reason: format!("{}: {e}", path.display()),
    })?;

    DecodingKey::from_ed_pem(&pem).map_err(|e| ConfigError::Invalid {
        key: "SESSION_PUBLIC_KEY_PATH",
        reason: e.to_string(),
    })
}

pub fn decode_session(token: &str, key: &DecodingKey) -> Result<AuthUser, AppError> {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = decode::<Claims>(token, key, &validation).map_err(|e| {
        tracing::debug!("Rejected session token: {}", e);
        AppError::Unauthorized
    })?;

    if data.claims.sub.is_empty() {
        return Err(AppError::Unauthorized);
    }

    Ok(AuthUser {
        uid: data.claims.sub,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthorized)?;

        decode_session(token, &state.decoding_key)
    }
}


#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::testing::{decoding_key, session_token, PRIVATE_PEM};
    use super::*;

    #[test]
    fn valid_token_yields_subject() {
        let user = decode_session(&session_token("user-42"), &decoding_key()).unwrap();
        assert_eq!(user.uid, "user-42");
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = Claims {
            sub: "user-42".into(),
            exp: (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(
            &Header::new(Algorithm::EdDSA),
            &claims,
            &EncodingKey::from_ed_pem(PRIVATE_PEM).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            decode_session(&token, &decoding_key()),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn hmac_signed_token_is_rejected() {
        let claims = Claims {
            sub: "user-42".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"guessable"),
        )
        .unwrap();

        assert!(decode_session(&token, &decoding_key()).is_err());
    }

    #[test]
    fn missing_key_file_is_a_configuration_error() {
        let Err(err) = load_decoding_key(Path::new("keys/does-not-exist.pem")) else {
            panic!("key loaded from a missing file");
        };
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
