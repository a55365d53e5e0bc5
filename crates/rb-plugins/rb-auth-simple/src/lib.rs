//! # rb-auth-simple
//!
//! Argon2-based implementation of `AuthProvider`.
//! Users live in a `KeyValueStore` under `user:<username>`; sessions are
//! stateless HS256 tokens.

use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rb_core::error::{AppError, Result};
use rb_core::traits::{AuthProvider, KeyValueStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Credentials every anonymous account is registered with.
pub const ANON_EMAIL: &str = "anon@example.com";
pub const ANON_PASSWORD: &str = "password";

const NAMES: [&str; 12] = [
    "Alice", "Hatter", "Dormouse", "Caterpillar", "Duchess", "Gryphon",
    "Dodo", "Rabbit", "Knave", "Turtle", "Queen", "Cat",
];

const TITLES: [&str; 10] = [
    "Curious", "Mad", "Sleepy", "Grinning", "Late", "Mock",
    "Red", "White", "Lost", "Tiny",
];

#[derive(Debug, Serialize, Deserialize)]
struct StoredUser {
    email: String,
    username: String,
    password_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

pub struct SimpleAuthProvider {
    db: Arc<dyn KeyValueStore>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_ttl: Duration,
}

impl SimpleAuthProvider {
    /// `key` signs session tokens, which stay valid for `ttl_hours`.
    pub fn new(db: Arc<dyn KeyValueStore>, key: &[u8], ttl_hours: i64) -> Self {
        Self {
            db,
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            token_ttl: Duration::hours(ttl_hours),
        }
    }

    fn issue_token(&self, username: &str) -> Result<String> {
        let claims = Claims {
            sub: username.to_string(),
            exp: (Utc::now() + self.token_ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| AppError::storage(format!("signing token: {err}")))
    }

    async fn find_user(&self, username: &str) -> Result<StoredUser> {
        let doc = self.db.get(&user_key(username)).await?;
        Ok(serde_json::from_str(&doc)?)
    }
}

fn user_key(username: &str) -> String {
    format!("user:{username}")
}

fn validate_fields(email: &str, username: &str, password: &str) -> Result<()> {
    if email.chars().count() < 5 || username.chars().count() < 3 || password.is_empty() {
        return Err(AppError::validation("fields too short"));
    }
    if email.contains(':') || username.contains(':') {
        return Err(AppError::validation(
            "email or username contain invalid character ':'",
        ));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    getrandom::getrandom(&mut salt)
        .map_err(|err| AppError::storage(format!("no randomness for salt: {err}")))?;
    let salt = SaltString::encode_b64(&salt)
        .map_err(|err| AppError::storage(format!("encoding salt: {err}")))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::storage(format!("hashing password: {err}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Derives a readable username such as `"Mad Hatter 3fa9c1"` from `seed`.
pub fn generate_username(seed: i64) -> String {
    let digest = Sha256::digest(seed.to_be_bytes());
    let title = TITLES[digest[0] as usize % TITLES.len()];
    let name = NAMES[digest[1] as usize % NAMES.len()];
    let suffix = hex::encode(&digest[2..5]);
    format!("{title} {name} {suffix}")
}

#[async_trait]
impl AuthProvider for SimpleAuthProvider {
    async fn register(&self, email: &str, username: &str, password: &str) -> Result<String> {
        validate_fields(email, username, password)?;

        match self.db.get(&user_key(username)).await {
            Ok(_) => return Err(AppError::Conflict(format!("username '{username}' is taken"))),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let user = StoredUser {
            email: email.to_string(),
            username: username.to_string(),
            password_hash: hash_password(password)?,
        };
        self.db
            .set(&user_key(username), &serde_json::to_string(&user)?)
            .await?;

        info!(username, "user registered");
        self.issue_token(username)
    }

    async fn anonymous_register(&self) -> Result<(String, String)> {
        let seed = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let username = generate_username(seed);
        let token = self.register(ANON_EMAIL, &username, ANON_PASSWORD).await?;
        Ok((username, token))
    }

    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let user = self.find_user(username).await.map_err(|err| {
            debug!(username, "login lookup failed: {err}");
            AppError::Unauthorized("invalid username or password".to_string())
        })?;

        if !verify_password(password, &user.password_hash) {
            return Err(AppError::Unauthorized(
                "invalid username or password".to_string(),
            ));
        }
        self.issue_token(&user.username)
    }

    fn verify(&self, token: &str) -> Result<String> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.sub)
            .map_err(|err| AppError::Unauthorized(format!("token not valid: {err}")))
    }
}
