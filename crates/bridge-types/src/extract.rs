//! Axum extractors shared by the HTTP surface: request-id propagation and the
//! task-dispatcher authentication check required on the queue endpoints.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::Error;

/// Implemented by the application state so the [`DispatcherAuth`] extractor
/// can find the shared secret without depending on the concrete `App` type.
pub trait HasDispatcherSecret {
	fn dispatcher_secret(&self) -> &str;
}

impl<T: HasDispatcherSecret + ?Sized> HasDispatcherSecret for std::sync::Arc<T> {
	fn dispatcher_secret(&self) -> &str {
		(**self).dispatcher_secret()
	}
}

const DISPATCHER_HEADER: &str = "x-bridge-dispatcher-secret";

/// Proves a request to `/queue/receive` or `/queue/send` originated from the
/// task dispatcher rather than an arbitrary caller, per the external
/// interfaces contract: those endpoints MUST reject anyone else.
#[derive(Clone, Copy, Debug)]
pub struct DispatcherAuth;

impl<S> FromRequestParts<S> for DispatcherAuth
where
	S: HasDispatcherSecret + Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
		let got = parts
			.headers
			.get(DISPATCHER_HEADER)
			.and_then(|v| v.to_str().ok())
			.ok_or(Error::Unauthorized)?;

		if got == state.dispatcher_secret() {
			Ok(DispatcherAuth)
		} else {
			Err(Error::Unauthorized)
		}
	}
}

/// Request id for tracing/log correlation, set by middleware and read back
/// out by handlers that want to echo it.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

#[derive(Clone, Debug)]
pub struct OptionalRequestId(pub Option<String>);

impl<S> FromRequestParts<S> for OptionalRequestId
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let req_id = parts.extensions.get::<RequestId>().map(|r| r.0.clone());
		Ok(OptionalRequestId(req_id))
	}
}


// vim: ts=4
