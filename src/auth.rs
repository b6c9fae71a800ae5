//! Admin API bearer tokens: HS256 JWTs bound to the configured audience
//! and issuer.

use std::time::{Duration, SystemTime, SystemTimeError, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::conf::ConfJwt;

pub type Result<T> = jsonwebtoken::errors::Result<T>;

/// Role allowed to use the admin API.
pub const ADMIN: &str = "ADMIN";

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    aud: String,
    iss: String,
    exp: u64,
}

impl Claims {
    pub fn new(
        sub: &str,
        role: &str,
        ttl: Duration,
        jwt_conf: &ConfJwt,
    ) -> std::result::Result<Self, SystemTimeError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let exp = now.saturating_add(ttl).as_secs();
        Ok(Self {
            sub: sub.to_string(),
            role: role.to_string(),
            aud: jwt_conf.audience.clone(),
            iss: jwt_conf.issuer.clone(),
            exp,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == ADMIN
    }

    pub fn to_str(&self, jwt_conf: &ConfJwt) -> Result<String> {
        let key = EncodingKey::from_secret(jwt_conf.secret.as_bytes());
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), self, &key)
    }

    pub fn from_str(token: &str, jwt_conf: &ConfJwt) -> Result<Self> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0; // "exp" should mean what it says.
        validation.set_audience(&[&jwt_conf.audience]);
        validation.set_issuer(&[&jwt_conf.issuer]);
        let key = DecodingKey::from_secret(jwt_conf.secret.as_bytes());
        let data = jsonwebtoken::decode::<Self>(token, &key, &validation)?;
        Ok(data.claims)
    }
}
