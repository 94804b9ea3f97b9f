//! Operator capability tokens (HS256 JWT)

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use ra_core::error::AuthError;
use ra_core::time::current_time_millis;
use ra_core::{Principal, Role};

/// Claims carried by an operator token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Expiry, seconds since the Unix epoch
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
}

/// Issues and verifies operator tokens
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenAuthority {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Sign a token for a principal
    pub fn issue(&self, principal: &Principal) -> Result<String, AuthError> {
        let now = current_time_millis() / 1000;
        let claims = Claims {
            role: principal.role,
            user: principal.user.clone(),
            exp: now + self.ttl.as_secs(),
            iat: now,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }

    /// Verify signature and expiry, returning the principal
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let validation = Validation::new(Algorithm::HS256);
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Principal::new(data.claims.role, data.claims.user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority(secret: &str) -> TokenAuthority {
        TokenAuthority::new(secret, Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_then_verify() {
        let tokens = authority("secret");
        let principal = Principal::new(Role::Admin, Some("alice".to_string()));
        let token = tokens.issue(&principal).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), principal);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = authority("one")
            .issue(&Principal::new(Role::Operator, None))
            .unwrap();
        assert!(matches!(
            authority("two").verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let tokens = authority("secret");
        let past = current_time_millis() / 1000 - 3600;
        let claims = Claims {
            role: Role::Operator,
            user: None,
            exp: past,
            iat: past - 10,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(tokens.verify(&token).is_err());
    }

    #[test]
    fn test_unknown_role_rejected() {
        #[derive(Serialize)]
        struct Forged {
            role: &'static str,
            exp: u64,
        }
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &Forged {
                role: "root",
                exp: current_time_millis() / 1000 + 60,
            },
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(authority("secret").verify(&token).is_err());
    }

    #[test]
    fn test_empty_token() {
        assert_eq!(authority("s").verify("  "), Err(AuthError::MissingToken));
    }
}
