use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub type AppResult<T> = Result<T, Error>;

/// everything a handler can fail with, mapped to a response at the boundary.
/// stream-path errors go out as plain text (players show those), api errors as json
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // malformed or undecryptable stream token, never retried
    #[error("invalid stream link")]
    InvalidToken,

    #[error("authentication required")]
    Unauthorized,

    #[error("token expired")]
    TokenExpired,

    // the ip reputation guard kicked in, self-heals after the block window
    #[error("access temporarily blocked")]
    IpBlocked,

    // decrypted url points at a host we don't relay for
    #[error("upstream refused")]
    UpstreamRefused,

    // session cap reached, message carries the user_limit/global_limit reason
    #[error("{0}")]
    AdmissionDenied(String),

    // upstream returned non-2xx or the fetch itself died - we never leak
    // the upstream body or url to the client
    #[error("stream unavailable")]
    UpstreamUnavailable,

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("internal server error")]
    InternalServerError,

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidToken | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized | Error::TokenExpired => StatusCode::UNAUTHORIZED,
            Error::IpBlocked | Error::UpstreamRefused => StatusCode::FORBIDDEN,
            Error::AdmissionDenied(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::InternalServerError | Error::InternalServerErrorWithContext(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    // players (vlc, hls.js) surface text bodies on stream endpoints, so those
    // variants skip the json envelope
    fn is_stream_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidToken
                | Error::UpstreamRefused
                | Error::AdmissionDenied(_)
                | Error::UpstreamUnavailable
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if self.is_stream_error() {
            (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                message,
            )
                .into_response()
        } else {
            (status, Json(json!({ "error": message }))).into_response()
        }
    }
}
