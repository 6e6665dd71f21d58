//! Request-id tagging: every inbound request gets a correlation id, echoed
//! back on the response and attached as a tracing span field so the queue
//! and redirect handlers' logs can be tied back to the request that caused
//! them.

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use axum::middleware::Next;
use bridge_types::extract::RequestId;
use tracing::Instrument;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn request_id(mut req: Request<Body>, next: Next) -> Response<Body> {
	let id = req
		.headers()
		.get(REQUEST_ID_HEADER)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string)
		.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

	req.extensions_mut().insert(RequestId(id.clone()));
	let span = tracing::info_span!("request", request_id = %id);

	let mut response = next.run(req).instrument(span).await;
	if let Ok(value) = HeaderValue::from_str(&id) {
		response.headers_mut().insert(REQUEST_ID_HEADER, value);
	}
	response
}

// vim: ts=4
