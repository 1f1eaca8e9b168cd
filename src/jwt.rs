//! Admin bearer tokens: HS256 JWTs carrying an email and a role claim.
//!
//! Tokens are minted out of band (ops tooling) from the same shared secret
//! the server holds; the server only ever verifies.

use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Custom claims carried by an admin token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    pub email: String,
    /// Must be exactly `"admin"` for privileged routes.
    pub role: String,
}

/// Shared HMAC key for admin tokens.
#[derive(Clone)]
pub struct AdminKey {
    key: HS256Key,
}

impl AdminKey {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: HS256Key::from_bytes(secret.as_bytes()),
        }
    }

    /// Verify a token and require the admin role. Any failure, including a
    /// valid token with the wrong role, is reported as the same error so the
    /// response does not leak which check tripped.
    pub fn verify_admin(&self, token: &str) -> Result<AdminClaims> {
        let claims = self
            .key
            .verify_token::<AdminClaims>(token, None)
            .map_err(|e| {
                tracing::debug!("admin token verification failed: {}", e);
                AppError::Unauthorized
            })?;
        if claims.custom.role != "admin" {
            return Err(AppError::Unauthorized);
        }
        Ok(claims.custom)
    }

    /// Mint a token. Used by the seeding path and tests.
    pub fn sign(&self, email: &str, role: &str, ttl_hours: u64) -> Result<String> {
        let claims = Claims::with_custom_claims(
            AdminClaims {
                email: email.to_string(),
                role: role.to_string(),
            },
            Duration::from_hours(ttl_hours),
        );
        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("token signing failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_admin() {
        let key = AdminKey::from_secret("unit-test-secret");
        let token = key.sign("ops@markfiller.app", "admin", 1).unwrap();
        let claims = key.verify_admin(&token).unwrap();
        assert_eq!(claims.email, "ops@markfiller.app");
    }

    #[test]
    fn test_rejects_wrong_role() {
        let key = AdminKey::from_secret("unit-test-secret");
        let token = key.sign("teacher@markfiller.app", "teacher", 1).unwrap();
        assert!(matches!(
            key.verify_admin(&token),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let key = AdminKey::from_secret("unit-test-secret");
        let other = AdminKey::from_secret("another-test-secret");
        let token = other.sign("ops@markfiller.app", "admin", 1).unwrap();
        assert!(matches!(
            key.verify_admin(&token),
            Err(AppError::Unauthorized)
        ));
    }
}
