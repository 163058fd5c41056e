//! Access credentials for the external real-time media service.
//!
//! Tokens are HS256 JWTs signed with the media API secret, carrying a
//! `video` grant scoped to one room. Every room gets the same grant:
//! join, publish, subscribe and publish data.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::error::{BellError, BellResult};

/// Lifetime of an issued access credential.
pub const TOKEN_TTL: Duration = Duration::hours(1);

/// API key pair of the media service.
#[derive(Clone)]
pub struct MediaKeys {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for MediaKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaKeys")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

impl VideoGrant {
    pub fn participant(room: &str) -> Self {
        Self {
            room: room.to_string(),
            room_join: true,
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    keys: Option<MediaKeys>,
    ttl: Duration,
}

impl CredentialIssuer {
    pub fn new(keys: Option<MediaKeys>) -> Self {
        Self {
            keys,
            ttl: TOKEN_TTL,
        }
    }

    fn keys(&self) -> BellResult<&MediaKeys> {
        self.keys
            .as_ref()
            .filter(|k| !k.api_key.is_empty() && !k.api_secret.is_empty())
            .ok_or_else(|| {
                BellError::Configuration("MEDIA_API_KEY and MEDIA_API_SECRET must be set".into())
            })
    }

    /// Mint a token letting `participant` join `room`. Names are signed exactly as given.
    pub fn issue(&self, room: &str, participant: &str, metadata: Option<&Value>) -> BellResult<String> {
        if room.trim().is_empty() || participant.trim().is_empty() {
            return Err(BellError::validation(
                "roomName and participantName are required",
            ));
        }
        let keys = self.keys()?;
        let now = OffsetDateTime::now_utc();
        let claims = AccessClaims {
            iss: keys.api_key.clone(),
            sub: participant.to_string(),
            name: participant.to_string(),
            nbf: now.unix_timestamp(),
            exp: (now + self.ttl).unix_timestamp(),
            video: VideoGrant::participant(room),
            metadata: metadata.and_then(metadata_string),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(keys.api_secret.as_bytes()),
        )
        .map_err(|e| anyhow::anyhow!("signing access token: {e}"))?;
        debug!(room = %room, participant = %participant, "access token issued");
        Ok(token)
    }

    /// Verify a token signed with our keys and return its claims.
    pub fn decode(&self, token: &str) -> BellResult<AccessClaims> {
        let keys = self.keys()?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[keys.api_key.as_str()]);
        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(keys.api_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| BellError::Auth(format!("invalid access token: {e}")))?;
        Ok(data.claims)
    }
}

fn metadata_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issuer() -> CredentialIssuer {
        CredentialIssuer::new(Some(MediaKeys {
            api_key: "APIkey".into(),
            api_secret: "a-very-secret-value".into(),
        }))
    }

    #[test]
    fn claims_match_request() {
        let issuer = issuer();
        for (room, who) in [("demo", "alice"), ("stand-up", "Bob Smith")] {
            let token = issuer.issue(room, who, None).unwrap();
            let claims = issuer.decode(&token).unwrap();
            assert_eq!(claims.video, VideoGrant::participant(room));
            assert_eq!(claims.sub, who);
            assert_eq!(claims.name, who);
            assert_eq!(claims.iss, "APIkey");
            assert_eq!(claims.exp - claims.nbf, 3600);
            assert!(claims.metadata.is_none());
        }
    }

    #[test]
    fn metadata_is_passed_through() {
        let issuer = issuer();
        let token = issuer
            .issue("demo", "alice", Some(&json!("plain")))
            .unwrap();
        assert_eq!(issuer.decode(&token).unwrap().metadata.as_deref(), Some("plain"));
        let token = issuer
            .issue("demo", "alice", Some(&json!({"role": "host"})))
            .unwrap();
        assert_eq!(
            issuer.decode(&token).unwrap().metadata.as_deref(),
            Some(r#"{"role":"host"}"#)
        );
    }

    #[test]
    fn names_are_signed_verbatim() {
        let issuer = issuer();
        let token = issuer.issue(" Demo Room ", "  alice", None).unwrap();
        let claims = issuer.decode(&token).unwrap();
        assert_eq!(claims.video.room, " Demo Room ");
        assert_eq!(claims.sub, "  alice");
        assert_eq!(claims.name, "  alice");
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let issuer = issuer();
        assert!(matches!(
            issuer.issue("", "alice", None),
            Err(BellError::Validation(_))
        ));
        assert!(matches!(
            issuer.issue("demo", "   ", None),
            Err(BellError::Validation(_))
        ));
    }

    #[test]
    fn missing_keys_are_configuration_errors() {
        let issuer = CredentialIssuer::new(None);
        assert!(matches!(
            issuer.issue("demo", "alice", None),
            Err(BellError::Configuration(_))
        ));
    }

    #[test]
    fn foreign_tokens_are_rejected() {
        let other = CredentialIssuer::new(Some(MediaKeys {
            api_key: "APIkey".into(),
            api_secret: "another-secret".into(),
        }));
        let token = other.issue("demo", "alice", None).unwrap();
        assert!(matches!(issuer().decode(&token), Err(BellError::Auth(_))));
    }

    #[test]
    fn secret_is_redacted() {
        let dbg = format!("{:?}", issuer());
        assert!(!dbg.contains("a-very-secret-value"));
    }
}
