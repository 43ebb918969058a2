use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifetime, shared by the token `exp` and the cookie.
pub const SESSION_DAYS: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub exp: i64,
}

impl UserClaims {
    pub fn for_user(id: Uuid) -> Self {
        Self {
            sub: id.to_string(),
            exp: (Utc::now() + Duration::days(SESSION_DAYS)).timestamp(),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.sub.parse().ok()
    }
}

pub fn generate_token<K: AsRef<[u8]>>(
    claims: UserClaims,
    key: K,
) -> jsonwebtoken::errors::Result<String> {
    let key = EncodingKey::from_secret(key.as_ref());
    jsonwebtoken::encode(&Header::default(), &claims, &key)
}

pub fn process_token<K: AsRef<[u8]>>(
    token: &str,
    key: K,
) -> jsonwebtoken::errors::Result<TokenData<UserClaims>> {
    let key = DecodingKey::from_secret(key.as_ref());
    jsonwebtoken::decode::<UserClaims>(token, &key, &Validation::default())
}
