use anyhow::Result;
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Lifetime of a session token handed out on register/login.
pub const SESSION_TTL: Duration = Duration::days(7);

/// Hash a password using argon2id with a random salt.
pub fn hash_password(pass: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an encoded hash.
pub fn verify_password(pass: &str, hash: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default()
            .verify_password(pass.as_bytes(), &parsed)
            .is_ok()
    } else {
        false
    }
}

/// Claims stored within session tokens.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub username: String,
    pub email: String,
    pub exp: usize,
}

/// Issue a session JWT for an account valid for the provided duration.
pub fn issue_jwt(
    secret: &[u8],
    account: Uuid,
    username: &str,
    email: &str,
    valid_for: Duration,
) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp().max(0) as usize;
    let claims = SessionClaims {
        sub: account,
        username: username.into(),
        email: email.into(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a JWT and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<SessionClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret), &validation)?;
    if data.claims.exp < OffsetDateTime::now_utc().unix_timestamp() as usize {
        anyhow::bail!("expired");
    }
    Ok(data.claims)
}

/// Extract the token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("secret1").unwrap();
        assert!(verify_password("secret1", &hash));
        assert!(!verify_password("bad", &hash));
        assert!(!verify_password("secret1", "not-a-hash"));
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("secret1").unwrap();
        let b = hash_password("secret1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn jwt_issue_and_verify() {
        let secret = b"secret";
        let id = Uuid::new_v4();
        let token = issue_jwt(secret, id, "alice", "a@x.io", Duration::seconds(60)).unwrap();
        let claims = verify_jwt(secret, &token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn jwt_expiry() {
        let secret = b"secret";
        let token =
            issue_jwt(secret, Uuid::new_v4(), "u", "u@x.io", Duration::seconds(-10)).unwrap();
        // Validation should fail because exp is in the past
        assert!(verify_jwt(secret, &token).is_err());
    }

    #[test]
    fn jwt_wrong_key() {
        let token = issue_jwt(b"one", Uuid::new_v4(), "u", "u@x.io", SESSION_TTL).unwrap();
        assert!(verify_jwt(b"two", &token).is_err());
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
