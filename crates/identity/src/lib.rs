use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::domain::{Caller, Role, UserId};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

mod roles;

pub use roles::{RoleDirectory, RoleTableError};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("session token rejected: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("identity provider credential rejected: {0}")]
    InvalidCredential(#[source] jsonwebtoken::errors::Error),
    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("token lifetime of {0} seconds is out of range")]
    InvalidTtl(i64),
    #[error("session of user {0} is signed out")]
    SignedOut(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { user_id: UserId, role: Role },
    SignedOut { user_id: UserId },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub caller: Caller,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Signs in the identity proven by a provider-issued `credential`, or a
    /// fresh anonymous identity when `None`.
    async fn sign_in(&self, credential: Option<&str>) -> Result<Session, IdentityError>;
    async fn sign_out(&self, user_id: &UserId) -> Result<(), IdentityError>;
    async fn authenticate(&self, token: &str) -> Result<Caller, IdentityError>;
    fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent>;
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub issuer: String,
    pub secret: String,
    pub ttl_seconds: i64,
    /// Key shared with the identity provider for its custom sign-in tokens.
    pub provider_secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    iss: String,
    sub: String,
    jti: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CustomClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// A verified session token: who it belongs to and which sign-in issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionToken {
    user_id: UserId,
    session_id: String,
}

/// `now + ttl_seconds`, rejecting non-positive or unrepresentable lifetimes.
fn expiry_after(now: DateTime<Utc>, ttl_seconds: i64) -> Result<DateTime<Utc>, IdentityError> {
    Duration::try_seconds(ttl_seconds)
        .filter(|ttl| *ttl > Duration::zero())
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or(IdentityError::InvalidTtl(ttl_seconds))
}

fn mint_session_token(
    cfg: &SessionConfig,
    user_id: &UserId,
    session_id: &str,
) -> Result<(String, DateTime<Utc>), IdentityError> {
    let now = Utc::now();
    let exp = expiry_after(now, cfg.ttl_seconds)?;
    let claims = SessionClaims {
        iss: cfg.issuer.clone(),
        sub: user_id.to_string(),
        jti: session_id.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )
    .map_err(IdentityError::Signing)?;
    Ok((token, exp))
}

fn verify_session_token(
    cfg: &SessionConfig,
    token: &str,
) -> Result<SessionToken, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[cfg.issuer.as_str()]);
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )?;
    Ok(SessionToken {
        user_id: UserId(data.claims.sub),
        session_id: data.claims.jti,
    })
}

/// Issues the short-lived credential an identity provider hands to a client
/// after proving who it is.
pub fn mint_custom_token(
    provider_secret: &str,
    user_id: &UserId,
    ttl_seconds: i64,
) -> Result<String, IdentityError> {
    let now = Utc::now();
    let claims = CustomClaims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: expiry_after(now, ttl_seconds)?.timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(provider_secret.as_bytes()),
    )
    .map_err(IdentityError::Signing)
}

fn verify_custom_token(
    provider_secret: &str,
    token: &str,
) -> Result<UserId, jsonwebtoken::errors::Error> {
    let data = decode::<CustomClaims>(
        token,
        &DecodingKey::from_secret(provider_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(UserId(data.claims.sub))
}

/// In-process provider: issues signed session tokens and maps identities to
/// roles through the static [`RoleDirectory`].
pub struct LocalIdentityProvider {
    config: SessionConfig,
    roles: RoleDirectory,
    /// Live session ids per user. Signing out drops every one of them.
    sessions: RwLock<HashMap<UserId, HashSet<String>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl LocalIdentityProvider {
    pub fn new(config: SessionConfig, roles: RoleDirectory) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            roles,
            sessions: RwLock::new(HashMap::new()),
            events,
        }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in(&self, credential: Option<&str>) -> Result<Session, IdentityError> {
        let user_id = match credential {
            Some(token) => verify_custom_token(&self.config.provider_secret, token)
                .map_err(IdentityError::InvalidCredential)?,
            None => UserId::generate(),
        };
        let role = self.roles.resolve(&user_id);
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let (token, expires_at) = mint_session_token(&self.config, &user_id, &session_id)?;

        self.sessions
            .write()
            .await
            .entry(user_id.clone())
            .or_default()
            .insert(session_id);
        info!(user_id = %user_id, role = %role, anonymous = credential.is_none(), "user signed in");
        let _ = self.events.send(AuthEvent::SignedIn {
            user_id: user_id.clone(),
            role,
        });

        Ok(Session {
            caller: Caller { user_id, role },
            token,
            expires_at,
        })
    }

    async fn sign_out(&self, user_id: &UserId) -> Result<(), IdentityError> {
        if self.sessions.write().await.remove(user_id).is_some() {
            info!(user_id = %user_id, "user signed out");
            let _ = self.events.send(AuthEvent::SignedOut {
                user_id: user_id.clone(),
            });
        }
        Ok(())
    }

    async fn authenticate(&self, token: &str) -> Result<Caller, IdentityError> {
        let SessionToken {
            user_id,
            session_id,
        } = verify_session_token(&self.config, token).map_err(IdentityError::InvalidToken)?;
        let live = self
            .sessions
            .read()
            .await
            .get(&user_id)
            .is_some_and(|ids| ids.contains(&session_id));
        if !live {
            debug!(user_id = %user_id, "token presented for an ended session");
            return Err(IdentityError::SignedOut(user_id));
        }
        let role = self.roles.resolve(&user_id);
        Ok(Caller { user_id, role })
    }

    fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
