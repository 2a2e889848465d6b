use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::pages;
use crate::error::{ProviderError, ResolveError, StoreError};

/// Failures surfaced to the browser by gateway routes.
///
/// Each renders a short error page; details only go to the log.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing authorization code")]
    MissingCode,

    #[error("missing ticket")]
    MissingTicket,

    #[error("unknown or expired ticket")]
    UnknownTicket,

    #[error("ticket not authorized yet")]
    TicketPending,

    #[error("DingTalk authentication failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl GatewayError {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            Self::MissingCode => (StatusCode::BAD_REQUEST, "Missing authorization code."),
            Self::MissingTicket => (StatusCode::BAD_REQUEST, "Missing ticket."),
            Self::UnknownTicket => (StatusCode::NOT_FOUND, "This login ticket is unknown or has expired."),
            Self::TicketPending => (StatusCode::CONFLICT, "This login ticket has not been authorized yet."),
            Self::Provider(_) => (StatusCode::UNAUTHORIZED, "DingTalk authorization failed."),
            Self::Resolve(ResolveError::Permission { .. }) => (
                StatusCode::FORBIDDEN,
                "Your DingTalk account is not linked to a ZenTao account.",
            ),
            Self::Resolve(_) | Self::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed, please try again later.",
            ),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(error = %self, "gateway internal error");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "gateway request rejected");
        }
        (status, pages::error_page(message)).into_response()
    }
}
