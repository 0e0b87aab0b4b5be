use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity provider error codes surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthErrorCode {
    /// Sign-in attempted from an origin that is not allowed.
    UnauthorizedDomain,
    /// The user closed the sign-in popup before finishing.
    PopupClosedByUser,
    /// A newer sign-in popup request replaced this one.
    CancelledPopupRequest,
    /// The browser blocked the sign-in popup.
    PopupBlocked,
    /// Wrong username or password.
    InvalidCredentials,
    /// Self-service registration is turned off.
    RegistrationDisabled,
    /// Session token is unknown or expired.
    SessionExpired,
    /// No bearer token on the request.
    MissingToken,
    /// Any other provider failure.
    Unknown,
}

impl AuthErrorCode {
    /// Parse a provider code, with or without the `auth/` prefix.
    pub fn from_code(code: &str) -> Self {
        match code.trim().trim_start_matches("auth/") {
            "unauthorized-domain" => Self::UnauthorizedDomain,
            "popup-closed-by-user" => Self::PopupClosedByUser,
            "cancelled-popup-request" => Self::CancelledPopupRequest,
            "popup-blocked" => Self::PopupBlocked,
            "invalid-credentials" | "wrong-password" | "user-not-found" => {
                Self::InvalidCredentials
            }
            "registration-disabled" | "operation-not-allowed" => Self::RegistrationDisabled,
            "session-expired" | "user-token-expired" => Self::SessionExpired,
            "missing-token" => Self::MissingToken,
            _ => Self::Unknown,
        }
    }

    /// Provider code string.
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::UnauthorizedDomain => "unauthorized-domain",
            Self::PopupClosedByUser => "popup-closed-by-user",
            Self::CancelledPopupRequest => "cancelled-popup-request",
            Self::PopupBlocked => "popup-blocked",
            Self::InvalidCredentials => "invalid-credentials",
            Self::RegistrationDisabled => "registration-disabled",
            Self::SessionExpired => "session-expired",
            Self::MissingToken => "missing-token",
            Self::Unknown => "unknown",
        }
    }

    /// Message shown to the user for this code.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UnauthorizedDomain => {
                "This domain is not authorized for sign-in. Contact the administrator."
            }
            Self::PopupClosedByUser => "The sign-in window was closed before finishing.",
            Self::CancelledPopupRequest => "Only one sign-in window can be open at a time.",
            Self::PopupBlocked => "The sign-in window was blocked. Allow popups and try again.",
            Self::InvalidCredentials => "Invalid username or password.",
            Self::RegistrationDisabled => "Registration is disabled on this server.",
            Self::SessionExpired => "Your session has expired. Please sign in again.",
            Self::MissingToken => "You need to sign in first.",
            Self::Unknown => "Authentication failed. Please try again.",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::UnauthorizedDomain | Self::RegistrationDisabled => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Required input missing or malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Record not found (or owned by someone else).
    #[error("Book not found: {0}")]
    NotFound(String),

    /// One metadata source could not be used for a query.
    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable {
        /// Source name.
        source_name: String,
        /// What went wrong.
        reason: String,
    },

    /// Both sources failed on the primary query.
    #[error("Search failed: {0}")]
    SearchFailed(String),

    /// Create, update or delete failed in the store.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Identity provider failure.
    #[error("Authentication error: {0}")]
    Auth(AuthErrorCode),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Build a `SourceUnavailable` error.
    pub fn source_unavailable(source_name: &str, reason: impl std::fmt::Display) -> Self {
        AppError::SourceUnavailable {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Message safe to show to the end user.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Auth(code) => code.user_message().to_string(),
            AppError::SearchFailed(_) => {
                "Could not search for books. Please try again.".to_string()
            }
            AppError::Persistence(_) => {
                "Could not save your changes. Please try again.".to_string()
            }
            AppError::Internal(_) | AppError::Io(_) | AppError::Config(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SourceUnavailable { .. } | AppError::SearchFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Auth(code) => code.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %self, "Request error");

        (status, self.user_message()).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
