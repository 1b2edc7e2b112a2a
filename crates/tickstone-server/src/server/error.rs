//! Maps oracle errors onto HTTP responses.
//!
//! The body is always `{ "error": "<message>", "retryable": bool }` so
//! clients can decide whether to back off and retry without parsing the
//! message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tickstone::Error;

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    retryable: bool,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            Error::Invalidated { .. } => StatusCode::GONE,
            Error::DestinationUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Error::OutOfBounds { .. }
            | Error::StoreUnavailable { .. }
            | Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, "request failed: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        let cases = [
            (
                Error::OutOfBounds {
                    requested: 2,
                    last_returned: 1,
                    upper_limit: 1,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::InvalidArgument {
                    reason: "nope".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (Error::Invalidated { backup: 7 }, StatusCode::GONE),
            (
                Error::DestinationUnreachable {
                    reason: "down".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (Error::ServiceShutdown, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
