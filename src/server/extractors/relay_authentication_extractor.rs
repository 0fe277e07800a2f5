use axum::Extension;
use axum::extract::{ConnectInfo, FromRequestParts, Query};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, Validation, errors::ErrorKind};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::{debug, error};

use crate::server::error::Error;
use crate::server::services::RelayServices;

#[derive(Deserialize)]
struct TokenQuery {
    // players like vlc can't set headers, so the bearer may ride the query
    token: Option<String>,
}

// only the userId claim matters here; exp is enforced by the validator
#[derive(Deserialize)]
struct BearerClaims {
    #[serde(rename = "userId")]
    user_id: serde_json::Value,
}

/// the authenticated caller as the relay sees it
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    /// raw bearer string, re-embedded into masked links so players stay authenticated
    pub token: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
}

impl AuthUser {
    /// coarse player identity: same ip + same user-agent looks like the same
    /// player re-requesting segments, not a second viewer. A heuristic, not
    /// an identity.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}",
            self.client_ip,
            self.user_agent.as_deref().unwrap_or("")
        )
    }
}

pub struct RelayAuthentication(pub AuthUser, pub RelayServices);

/// bearer authentication against the jwt shared with the account backend.
/// ip-guard checks come first: a blocked ip is refused before its credentials
/// are even looked at, and every auth outcome feeds back into the guard.
impl<S> FromRequestParts<S> for RelayAuthentication
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(services): Extension<RelayServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| Error::InternalServerErrorWithContext(err.to_string()))?;

        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        // client ip from X-Forwarded-For, X-Real-IP, or the connection itself
        let client_ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get("x-real-ip")
                    .and_then(|h| h.to_str().ok())
                    .map(|s| s.to_string())
            })
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ci| ci.0.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        if services.ip_guard.is_blocked(&client_ip) {
            debug!("refusing blocked ip {}", client_ip);
            return Err(Error::IpBlocked);
        }

        let header_token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(|raw| {
                raw.strip_prefix("Bearer ")
                    .or_else(|| raw.strip_prefix("bearer "))
                    .unwrap_or(raw)
                    .trim()
                    .to_string()
            });

        let query_token = Query::<TokenQuery>::from_request_parts(parts, state)
            .await
            .ok()
            .and_then(|Query(q)| q.token);

        let Some(token) = header_token.or(query_token).filter(|t| !t.is_empty()) else {
            services.ip_guard.register_failed_attempt(&client_ip);
            return Err(Error::Unauthorized);
        };

        let decoded = jsonwebtoken::decode::<BearerClaims>(
            &token,
            &DecodingKey::from_secret(services.config.jwt_secret.as_bytes()),
            &Validation::default(),
        );

        let claims = match decoded {
            Ok(data) => data.claims,
            Err(e) => {
                services.ip_guard.register_failed_attempt(&client_ip);
                return Err(match e.kind() {
                    ErrorKind::ExpiredSignature => Error::TokenExpired,
                    _ => {
                        error!("bearer verification failed: {}", e);
                        Error::Unauthorized
                    }
                });
            }
        };

        // userId may be a number or a string depending on the backend's orm
        let user_id = match &claims.user_id {
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => {
                services.ip_guard.register_failed_attempt(&client_ip);
                return Err(Error::Unauthorized);
            }
        };

        services.ip_guard.register_successful_auth(&client_ip);

        Ok(RelayAuthentication(
            AuthUser {
                user_id,
                token,
                client_ip,
                user_agent,
            },
            services,
        ))
    }
}
