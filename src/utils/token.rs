use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

pub fn create_token(
    user_id: &str,
    secret: &[u8],
    expires_in_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    if user_id.is_empty() {
        return Err(jsonwebtoken::errors::ErrorKind::InvalidSubject.into());
    }

    let now = Utc::now();
    let claims = TokenClaims {
        sub: user_id.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::seconds(expires_in_seconds)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

pub fn decode_token<T: Into<String>>(
    token: T,
    secret: &[u8],
) -> Result<String, jsonwebtoken::errors::Error> {
    let decoded = decode::<TokenClaims>(
        &token.into(),
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )?;

    Ok(decoded.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_the_subject() {
        let secret = b"test-secret";
        let token = create_token("c6d1e6f8-0000-0000-0000-000000000001", secret, 60).unwrap();
        let sub = decode_token(token, secret).unwrap();
        assert_eq!(sub, "c6d1e6f8-0000-0000-0000-000000000001");
    }

    #[test]
    fn rejects_the_wrong_secret() {
        let token = create_token("user", b"secret-a", 60).unwrap();
        assert!(decode_token(token, b"secret-b").is_err());
    }

    #[test]
    fn rejects_an_empty_subject() {
        assert!(create_token("", b"secret", 60).is_err());
    }
}
