use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String, // admin user id
    pub email: Option<String>,
    pub role: String,
    pub exp: i64,
}

/// HS256 keys for the admin session cookie.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn sign_session(
        &self,
        user_id: &str,
        email: Option<&str>,
        role: &str,
        ttl_minutes: i64,
    ) -> Result<String, String> {
        let exp = Utc::now() + Duration::minutes(ttl_minutes);
        let claims = SessionClaims {
            sub: user_id.to_string(),
            email: email.map(str::to_string),
            role: role.to_string(),
            exp: exp.timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| e.to_string())
    }

    pub fn validate_session(&self, token: &str) -> Result<SessionClaims, String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|e| e.to_string())?;
        Ok(data.claims)
    }
}
