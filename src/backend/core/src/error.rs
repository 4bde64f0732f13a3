//! Error handling for Bastion Core.
//!
//! Permission outcomes are never errors: "no" is a boolean answer. This module
//! covers everything else:
//! - Missing request context (401 / 404 from the guards)
//! - Explicit access refusals raised by the context layer (403)
//! - Policy store and tenant directory failures (5xx)
//! - Engine initialization failures, shared by every waiting caller
//!
//! # Usage
//!
//! ```rust,ignore
//! use bastion_core::error::{AuthzError, Result};
//!
//! async fn load(store: Arc<dyn PolicyStore>) -> Result<PolicyEngine> {
//!     PolicyEngine::load(store).await.map_err(AuthzError::into_initialization)
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Bastion operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication/Authorization (4000-4099)
    Unauthorized,
    Forbidden,

    // Lookup (4040-4049)
    UserNotFound,
    OrganizationNotFound,
    ProjectNotFound,
    TokenNotFound,

    // Validation (4100-4199)
    InvalidInput,
    InvalidRole,
    InvalidResource,
    InvalidAction,

    // Policy store (2000-2099)
    StoreUnavailable,
    StoreQueryFailed,
    MutationFailed,

    // Engine lifecycle (2100-2199)
    InitializationFailed,

    // Configuration (5000-5099)
    ConfigurationError,

    // Internal (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::Unauthorized => 4000,
            Self::Forbidden => 4001,

            Self::UserNotFound => 4040,
            Self::OrganizationNotFound => 4041,
            Self::ProjectNotFound => 4042,
            Self::TokenNotFound => 4043,

            Self::InvalidInput => 4100,
            Self::InvalidRole => 4101,
            Self::InvalidResource => 4102,
            Self::InvalidAction => 4103,

            Self::StoreUnavailable => 2000,
            Self::StoreQueryFailed => 2001,
            Self::MutationFailed => 2002,

            Self::InitializationFailed => 2100,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,

            Self::UserNotFound
            | Self::OrganizationNotFound
            | Self::ProjectNotFound
            | Self::TokenNotFound => StatusCode::NOT_FOUND,

            Self::InvalidInput | Self::InvalidRole | Self::InvalidResource | Self::InvalidAction => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            Self::StoreUnavailable | Self::InitializationFailed => StatusCode::SERVICE_UNAVAILABLE,

            Self::StoreQueryFailed
            | Self::MutationFailed
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable | Self::StoreQueryFailed | Self::InitializationFailed
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            2000..=2099 => "store",
            2100..=2199 => "lifecycle",
            4000..=4039 => "authentication",
            4040..=4099 => "lookup",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Client-side errors are logged at debug level; everything else is
    /// an infrastructure problem.
    pub const fn is_client_error(&self) -> bool {
        self.numeric_code() >= 4000 && self.numeric_code() < 5000
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

type SharedSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for Bastion Core.
///
/// Cheap to clone: the source is reference counted so that a single failed
/// engine load can be handed to every caller that was waiting on it.
#[derive(Debug, Clone)]
pub struct AuthzError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// The source error that caused this error
    source: Option<SharedSource>,
}

impl fmt::Display for AuthzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl std::error::Error for AuthzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl AuthzError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// No authenticated user could be resolved for the request (401).
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// An identified user was refused (403).
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn organization_not_found(organization_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::OrganizationNotFound,
            format!("Organization not found: {}", organization_id),
        )
    }

    pub fn project_not_found(project_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ProjectNotFound,
            format!("Project not found: {}", project_id),
        )
    }

    pub fn token_not_found(token_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::TokenNotFound,
            format!("Auth token not found: {}", token_id),
        )
    }

    /// Create a validation error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// The engine could not be loaded; no decision is possible.
    pub fn initialization<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::with_internal(
            ErrorCode::InitializationFailed,
            "Policy engine is not available",
            source.to_string(),
        )
        .with_source(source)
    }

    /// A write to the policy store was rejected; the in-memory index is untouched.
    pub fn mutation<E>(operation: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::with_internal(
            ErrorCode::MutationFailed,
            "Failed to persist policy change",
            format!("{}: {}", operation, source),
        )
        .with_source(source)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Re-code an error raised while loading the engine as
    /// [`ErrorCode::InitializationFailed`]. The original error was already
    /// counted when it was created, so no metric is recorded here.
    pub fn into_initialization(mut self) -> Self {
        if self.code == ErrorCode::InitializationFailed {
            return self;
        }
        let cause = match self.internal_message.take() {
            Some(internal) => format!("{}: {}", self.code, internal),
            None => format!("{}: {}", self.code, self.user_message),
        };
        self.code = ErrorCode::InitializationFailed;
        self.user_message = Cow::Borrowed("Policy engine is not available");
        self.internal_message = Some(cause);
        self
    }

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging & Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error at a level matching its class.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        if self.code.is_client_error() {
            tracing::debug!(
                error_code = %code,
                category = category,
                http_status = status,
                user_message = %self.user_message,
                "Request rejected"
            );
        } else if self.is_retryable() {
            warn!(
                error_code = %code,
                category = category,
                http_status = status,
                user_message = %self.user_message,
                internal_message = ?self.internal_message,
                "Retryable infrastructure error"
            );
        } else {
            error!(
                error_code = %code,
                category = category,
                http_status = status,
                user_message = %self.user_message,
                internal_message = ?self.internal_message,
                source = ?self.source,
                "Infrastructure error"
            );
        }
    }

    fn record_metrics(&self) {
        counter!(
            crate::telemetry::metrics::ERRORS_TOTAL,
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&AuthzError> for ErrorResponse {
    fn from(error: &AuthzError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for AuthzError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => (
                ErrorCode::StoreUnavailable,
                "Policy store is unavailable",
            ),
            _ => (ErrorCode::StoreQueryFailed, "Policy store query failed"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for AuthzError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<crate::rbac::models::ParseError> for AuthzError {
    fn from(error: crate::rbac::models::ParseError) -> Self {
        use crate::rbac::models::ParseError;

        let code = match &error {
            ParseError::Role(_) => ErrorCode::InvalidRole,
            ParseError::Resource(_) => ErrorCode::InvalidResource,
            ParseError::Action(_) => ErrorCode::InvalidAction,
            ParseError::Scope(_) | ParseError::EmptyDomain => ErrorCode::InvalidInput,
        };
        Self::new(code, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_codes_map_to_http_status() {
        assert_eq!(ErrorCode::Unauthorized.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Forbidden.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::OrganizationNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::ProjectNotFound.http_status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_infrastructure_errors_are_5xx() {
        for code in [
            ErrorCode::StoreUnavailable,
            ErrorCode::StoreQueryFailed,
            ErrorCode::MutationFailed,
            ErrorCode::InitializationFailed,
        ] {
            assert!(code.http_status().is_server_error(), "{code} should be 5xx");
            assert!(!code.is_client_error());
        }
    }

    #[test]
    fn test_into_initialization_recodes_without_nesting() {
        let err = AuthzError::new(ErrorCode::StoreUnavailable, "database unreachable")
            .into_initialization();
        assert_eq!(err.code(), ErrorCode::InitializationFailed);
        assert_eq!(err.user_message(), "Policy engine is not available");
        assert_eq!(
            err.internal_message(),
            Some("StoreUnavailable: database unreachable")
        );

        let again = err.clone().into_initialization();
        assert_eq!(again.internal_message(), err.internal_message());
    }

    #[test]
    fn test_categories() {
        assert_eq!(ErrorCode::Unauthorized.category(), "authentication");
        assert_eq!(ErrorCode::ProjectNotFound.category(), "lookup");
        assert_eq!(ErrorCode::InvalidRole.category(), "validation");
        assert_eq!(ErrorCode::MutationFailed.category(), "store");
        assert_eq!(ErrorCode::InitializationFailed.category(), "lifecycle");
    }

    #[test]
    fn test_clone_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = AuthzError::initialization(io);
        let cloned = err.clone();

        assert_eq!(cloned.code(), ErrorCode::InitializationFailed);
        assert!(std::error::Error::source(&cloned).is_some());
        assert_eq!(cloned.internal_message(), Some("refused"));
    }

    #[test]
    fn test_display_includes_internal() {
        let err = AuthzError::internal("boom");
        assert_eq!(
            err.to_string(),
            "[InternalError] An internal error occurred (internal: boom)"
        );
    }

    #[test]
    fn test_error_response_envelope() {
        let err = AuthzError::project_not_found("proj-1");
        let response = ErrorResponse::from(&err);
        assert!(!response.success);
        assert_eq!(response.error.code, ErrorCode::ProjectNotFound);
        assert_eq!(response.error.numeric_code, 4042);
        assert_eq!(response.error.message, "Project not found: proj-1");
    }
}
