//! Error handling subsystem. Implements a custom Error type shared by every
//! crate in the workspace, mapped to both HTTP responses and task-retry
//! decisions.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Core errors
	NotFound,
	PermissionDenied,
	Unauthorized, // 401 - missing/invalid auth token
	DbError,
	Parse,

	// Input validation and constraints
	ValidationError(String), // 400 - invalid input data
	Conflict(String),        // 409 - constraint violation (cross-tenant overwrite, etc)
	UnsupportedVerb(String), // 501 - activity verb outside the supported set

	// Federation-specific
	Unroutable(String), // no protocol claimed or could fetch this id
	Blocklisted(String),

	// Network and external services
	NetworkError(String), // transient remote failure during fetch/send
	Gateway(String),      // remote returned a definitive failure during protocol discovery
	Timeout,

	// System and configuration
	ConfigError(String),        // missing or invalid configuration
	ServiceUnavailable(String), // temporary system failures
	Internal(String),           // internal invariant violations, for debugging

	// externals
	Io(std::io::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
	error: String,
}

impl Error {
	/// Whether a task runner should retry the operation that produced this
	/// error, as opposed to recording a terminal failure immediately.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Error::NetworkError(_) | Error::Timeout | Error::ServiceUnavailable(_) | Error::DbError
		)
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		tracing::warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let (status, message) = match self {
			Error::NotFound => (StatusCode::NOT_FOUND, "resource not found".to_string()),
			Error::PermissionDenied => {
				(StatusCode::FORBIDDEN, "permission denied".to_string())
			}
			Error::Unauthorized => {
				(StatusCode::UNAUTHORIZED, "authentication required or invalid".to_string())
			}
			Error::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
			Error::Conflict(msg) => (StatusCode::CONFLICT, msg),
			Error::UnsupportedVerb(verb) => {
				(StatusCode::NOT_IMPLEMENTED, format!("unsupported verb: {verb}"))
			}
			Error::Unroutable(id) => {
				(StatusCode::NOT_FOUND, format!("couldn't determine protocol for {id}"))
			}
			Error::Blocklisted(id) => (StatusCode::FORBIDDEN, format!("blocklisted: {id}")),
			Error::Timeout => (StatusCode::REQUEST_TIMEOUT, "request timeout".to_string()),
			Error::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
			// Server errors (5xx) - no internal detail exposure
			Error::DbError => {
				tracing::error!("db error");
				(StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
			}
			Error::Internal(msg) => {
				tracing::error!("internal error: {}", msg);
				(StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
			}
			Error::Parse => (StatusCode::BAD_REQUEST, "malformed payload".to_string()),
			Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string()),
			Error::NetworkError(_) => {
				(StatusCode::BAD_GATEWAY, "upstream network error".to_string())
			}
			Error::Gateway(_) => (StatusCode::BAD_GATEWAY, "upstream gateway error".to_string()),
			Error::ConfigError(_) => {
				tracing::error!("config error");
				(StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
			}
		};

		(status, Json(ErrorResponse { error: message })).into_response()
	}
}

impl From<std::num::ParseIntError> for Error {
	fn from(err: std::num::ParseIntError) -> Self {
		tracing::warn!("parse int error: {}", err);
		Error::Parse
	}
}

impl From<std::time::SystemTimeError> for Error {
	fn from(err: std::time::SystemTimeError) -> Self {
		tracing::warn!("system time error: {}", err);
		Error::ServiceUnavailable("system time error".into())
	}
}

impl From<axum::Error> for Error {
	fn from(err: axum::Error) -> Self {
		tracing::warn!("axum error: {}", err);
		Error::NetworkError("axum error".into())
	}
}

impl From<axum::http::Error> for Error {
	fn from(err: axum::http::Error) -> Self {
		tracing::warn!("http error: {}", err);
		Error::NetworkError("http error".into())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		tracing::warn!("json error: {}", err);
		Error::Parse
	}
}

impl From<url::ParseError> for Error {
	fn from(err: url::ParseError) -> Self {
		tracing::warn!("url parse error: {}", err);
		Error::ValidationError(format!("invalid url: {err}"))
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		tracing::warn!("tokio join error: {}", err);
		Error::ServiceUnavailable("task execution failed".into())
	}
}

/// Locks a `std::sync::Mutex`/`RwLock`, converting poisoning into
/// `Error::Internal` with a bit of context about which lock failed.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex.lock().map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
	($mutex:expr, $context:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal(format!("mutex poisoned: {}", $context)))
	};
}

// vim: ts=4
