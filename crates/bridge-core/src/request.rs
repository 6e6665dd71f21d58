//! Outbound HTTP client used by the fetch/load engine and the delivery
//! pipeline. A thin wrapper around `hyper` + `hyper-rustls` with a fixed
//! per-request timeout, so a single slow remote can't stall a task-runner
//! worker indefinitely.

use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::{body::Bytes, Method, StatusCode};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::time::timeout;

use bridge_types::prelude::*;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn to_boxed<B>(body: B) -> BoxBody<Bytes, Error>
where
	B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
	B::Error: Send + 'static,
{
	body.map_err(|_| Error::NetworkError("body stream error".into())).boxed()
}

/// Outcome of a remote fetch, distinguishing transient network failure
/// (should retry) from a definitive response the caller must interpret.
pub struct FetchResponse {
	pub status: StatusCode,
	pub content_type: Option<Box<str>>,
	pub body: Bytes,
}

#[derive(Clone)]
pub struct HttpClient {
	client: Client<HttpsConnector<HttpConnector>, BoxBody<Bytes, Error>>,
}

impl HttpClient {
	pub fn new() -> ClResult<Self> {
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.map_err(|_| Error::ConfigError("no native root CA certificates found".into()))?
			.https_or_http()
			.enable_http1()
			.enable_http2()
			.build();
		Ok(Self { client: Client::builder(TokioExecutor::new()).build(connector) })
	}

	async fn send(&self, req: hyper::Request<BoxBody<Bytes, Error>>) -> ClResult<FetchResponse> {
		let res = timeout(REQUEST_TIMEOUT, self.client.request(req))
			.await
			.map_err(|_| Error::Timeout)?
			.map_err(|e| Error::NetworkError(e.to_string()))?;

		let status = res.status();
		let content_type =
			res.headers().get(hyper::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(Box::from);
		let body = timeout(REQUEST_TIMEOUT, res.into_body().collect())
			.await
			.map_err(|_| Error::Timeout)?
			.map_err(|_| Error::NetworkError("body collection error".into()))?
			.to_bytes();

		Ok(FetchResponse { status, content_type, body })
	}

	/// `GET url`, with an optional `Accept` header for content negotiation
	/// against protocols that serve different representations by media type.
	pub async fn get(&self, url: &str, accept: Option<&str>) -> ClResult<FetchResponse> {
		let mut builder = hyper::Request::builder().method(Method::GET).uri(url);
		if let Some(accept) = accept {
			builder = builder.header(hyper::header::ACCEPT, accept);
		}
		let req = builder.body(to_boxed(Empty::new()))?;
		self.send(req).await
	}

	pub async fn get_json<Res: DeserializeOwned>(&self, url: &str, accept: &str) -> ClResult<Res> {
		let res = self.get(url, Some(accept)).await?;
		if !res.status.is_success() {
			return Err(match res.status {
				StatusCode::NOT_FOUND => Error::NotFound,
				StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Error::PermissionDenied,
				code => Error::Gateway(format!("unexpected status {code} from {url}")),
			});
		}
		serde_json::from_slice(&res.body).map_err(Error::from)
	}

	/// `POST url` with a JSON body and the given content type, returning the
	/// raw response for callers that need to inspect status codes (delivery
	/// distinguishes retryable failures from permanent rejections).
	pub async fn post_json(&self, url: &str, content_type: &str, body: &impl Serialize) -> ClResult<FetchResponse> {
		let payload = serde_json::to_vec(body)?;
		let req = hyper::Request::builder()
			.method(Method::POST)
			.uri(url)
			.header(hyper::header::CONTENT_TYPE, content_type)
			.body(to_boxed(Full::from(payload)))?;
		self.send(req).await
	}
}

// vim: ts=4
