//! HTTP error responses

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use monaddit_ledger::LedgerError;
use serde_json::json;

/// Errors returned by API handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Malformed path, query or body
    #[error("{0}")]
    BadRequest(String),

    /// Client exceeded its request window
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Ledger(err) => ledger_status(err),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Ledger(err) => err.code(),
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(err) => err.is_retryable(),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Seconds for the `Retry-After` header
    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ if self.is_retryable() => Some(1),
            _ => None,
        }
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    use LedgerError::*;
    match err {
        NotFound { .. } => StatusCode::NOT_FOUND,
        InsufficientWalletBalance { .. } | InsufficientAvailableBalance { .. } | BelowMinimumStake { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        InvalidAmount(_) | InvalidAddress(_) | InvalidContent(_) | InvalidTransfer(_) | InvalidParams(_) => {
            StatusCode::BAD_REQUEST
        }
        DuplicateContent(_)
        | NotWithdrawable { .. }
        | BondNotChallengeable { .. }
        | AlreadyResolved(_)
        | NothingToClaim(_)
        | StaleEpoch { .. } => StatusCode::CONFLICT,
        NotOwner { .. } => StatusCode::FORBIDDEN,
        Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "retryable": self.is_retryable(),
            }
        });
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs() {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// JSON body extractor answering with [`ApiError`] on rejection
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Path extractor answering with [`ApiError`] on rejection
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Query extractor answering with [`ApiError`] on rejection
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (LedgerError::NotFound { kind: "bond", id: "9".into() }, StatusCode::NOT_FOUND),
            (
                LedgerError::InsufficientAvailableBalance { requested: 2, available: 1 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (LedgerError::InvalidAddress("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::DuplicateContent("c".into()), StatusCode::CONFLICT),
            (LedgerError::StaleEpoch { epoch: 1, last: 1 }, StatusCode::CONFLICT),
            (
                LedgerError::NotOwner { caller: "a".into(), resource: "bond 1".into() },
                StatusCode::FORBIDDEN,
            ),
            (LedgerError::Busy { resource: "bond 1".into() }, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_busy_sets_retry_after() {
        let response = ApiError::from(LedgerError::Busy { resource: "account".into() }).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");

        let response = ApiError::BadRequest("nope".into()).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_rate_limited_response() {
        let err = ApiError::RateLimited { retry_after_secs: 42 };
        assert_eq!(err.code(), "RATE_LIMITED");
        assert!(err.is_retryable());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
