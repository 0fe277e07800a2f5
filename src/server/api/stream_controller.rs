use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{Path, Query},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::server::error::{AppResult, Error};
use crate::server::extractors::{AuthUser, RelayAuthentication};
use crate::server::services::RelayServices;
use crate::server::services::stream_session_services::{AcquireDecision, StreamSessionService};
use crate::server::utils::stream_probe;

const MANIFEST_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const RELAY_USER_AGENT: &str = "VLC/3.0.0";
const MANIFEST_ACCEPT: &str =
    "application/vnd.apple.mpegurl, application/x-mpegURL, text/plain, */*";

#[derive(Deserialize)]
struct StreamQuery {
    // session hint handed out in rewritten manifests, lets the same player
    // keep its slot across segment fetches
    sid: Option<String>,
}

/// releases an admitted playback slot exactly once, on whichever path ends
/// the relay first - clean completion, client disconnect, or upstream error.
/// moving this into the response body ties the release to the connection.
struct SessionReleaseGuard {
    sessions: Arc<StreamSessionService>,
    user_id: String,
    sid: String,
}

impl Drop for SessionReleaseGuard {
    fn drop(&mut self) {
        self.sessions.release(&self.user_id, &self.sid);
    }
}

pub struct StreamController;

impl StreamController {
    pub fn app() -> Router {
        Router::new().route("/{token}", get(Self::relay))
    }

    /// the relay pipeline: decrypt the token, vet the upstream host, admit a
    /// session if this looks like playback, then either rewrite a manifest or
    /// pipe bytes straight through
    async fn relay(
        RelayAuthentication(user, services): RelayAuthentication,
        Path(token): Path<String>,
        Query(params): Query<StreamQuery>,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let upstream_url = match services.cipher.decrypt_token(&token) {
            Ok(url) => url,
            Err(e) => {
                // garbage tokens count as abuse, same as failed auth
                services.ip_guard.register_failed_attempt(&user.client_ip);
                return Err(e);
            }
        };

        if !services.allowlist.is_allowed(&upstream_url) {
            services.ip_guard.register_failed_attempt(&user.client_ip);
            warn!("refused non-allowlisted upstream for user {}", user.user_id);
            return Err(Error::UpstreamRefused);
        }

        let mut release_guard = None;
        let mut sid = String::new();

        if stream_probe::requires_admission(&upstream_url) {
            let hint = params.sid.as_deref().unwrap_or("");
            match services.sessions.try_acquire(
                &user.user_id,
                &upstream_url,
                &user.fingerprint(),
                hint,
            ) {
                AcquireDecision::Admitted { sid: granted, created } => {
                    if !created {
                        services.sessions.touch(&user.user_id, &granted);
                    }
                    // only raw ts relays hold one connection open for the whole
                    // watch - those release on close. Manifest and direct-video
                    // playback is a stream of short requests, the ttl sweep
                    // reclaims their slots.
                    if stream_probe::is_transport_stream_url(&upstream_url) {
                        release_guard = Some(SessionReleaseGuard {
                            sessions: services.sessions.clone(),
                            user_id: user.user_id.clone(),
                            sid: granted.clone(),
                        });
                    }
                    sid = granted;
                }
                AcquireDecision::Denied(reason) => {
                    debug!("admission denied for user {}: {}", user.user_id, reason);
                    return Err(Error::AdmissionDenied(format!(
                        "{reason}. close another player and retry"
                    )));
                }
            }
        }

        if stream_probe::is_manifest_url(&upstream_url) {
            Self::relay_manifest(&services, &user, &upstream_url, &sid).await
        } else {
            Self::relay_media(&services, &upstream_url, &headers, release_guard).await
        }
    }

    /// fetch the manifest as text and hand back the rewritten version - every
    /// reference in it now points at this proxy
    async fn relay_manifest(
        services: &RelayServices,
        user: &AuthUser,
        upstream_url: &str,
        sid: &str,
    ) -> AppResult<Response> {
        let response = services
            .http
            .get(upstream_url)
            .timeout(MANIFEST_FETCH_TIMEOUT)
            .header(header::USER_AGENT, RELAY_USER_AGENT)
            .header(header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await
            .map_err(|e| {
                error!("manifest fetch failed: {}", e);
                Error::UpstreamUnavailable
            })?;

        if !response.status().is_success() {
            // upstream error bodies are frequently provider html, never forward them
            warn!("manifest upstream returned {}", response.status());
            return Err(Error::UpstreamUnavailable);
        }

        let manifest = response.text().await.map_err(|e| {
            error!("failed to read manifest body: {}", e);
            Error::UpstreamUnavailable
        })?;

        let rewritten = services
            .rewriter
            .rewrite_manifest(&manifest, upstream_url, &user.token, sid);

        Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            rewritten,
        )
            .into_response())
    }

    /// byte-for-byte passthrough for segments, raw ts and direct video.
    /// Range headers are forwarded so seekable video stays seekable.
    async fn relay_media(
        services: &RelayServices,
        upstream_url: &str,
        request_headers: &HeaderMap,
        release_guard: Option<SessionReleaseGuard>,
    ) -> AppResult<Response> {
        let mut request = services
            .http
            .get(upstream_url)
            .header(header::USER_AGENT, RELAY_USER_AGENT)
            .header(header::ACCEPT, "*/*");

        if let Some(range) = request_headers.get(header::RANGE) {
            request = request.header(header::RANGE, range.clone());
        }

        // a fetch error drops the guard here and the admitted slot frees up
        let response = request.send().await.map_err(|e| {
            error!("media fetch failed: {}", e);
            Error::UpstreamUnavailable
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("media upstream returned {}", status);
            return Err(Error::UpstreamUnavailable);
        }

        let mut response_headers = HeaderMap::new();
        for name in [
            header::CONTENT_TYPE,
            header::ACCEPT_RANGES,
            header::CONTENT_RANGE,
        ] {
            if let Some(value) = response.headers().get(&name) {
                response_headers.insert(name, value.clone());
            }
        }

        // the guard rides inside the body stream: when axum drops the body -
        // client gone, upstream dead, or playback finished - the slot releases
        let body_stream = response.bytes_stream().map(move |chunk| {
            let _connection_scoped = &release_guard;
            chunk
        });

        Ok((status, response_headers, Body::from_stream(body_stream)).into_response())
    }
}
