//! axum router: task-dispatcher endpoints, the redirect/conneg endpoint, and
//! health/readiness probes.

use axum::extract::{Form, Path as AxumPath, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use bridge_core::app::App;
use bridge_core::scheduler::Task;
use bridge_federation::prelude::{redirect, RedirectOutcome, ReceiveTask, SendTask};
use bridge_types::extract::DispatcherAuth;
use bridge_types::model::Activity;
use bridge_types::prelude::*;

pub fn router(state: App) -> Router {
	Router::new()
		.route("/healthz", get(healthz))
		.route("/readyz", get(readyz))
		.route("/queue/receive", post(queue_receive))
		.route("/queue/send", post(queue_send))
		.route("/r/{*url}", get(redirect_handler))
		.layer(axum::middleware::from_fn(crate::middleware::request_id))
		.with_state(state)
}

async fn healthz() -> &'static str {
	"ok"
}

async fn readyz(State(state): State<App>) -> Result<&'static str, Error> {
	// Any round-trip to the store, success or empty, proves the connection
	// is live; only a store-level error should fail readiness.
	state.store.get_object("readyz-probe").await?;
	Ok("ok")
}

#[derive(Deserialize)]
struct ReceiveForm {
	source_protocol: Box<str>,
	/// The id the originating plugin authenticated the sender as; must match
	/// the activity's actor for the receive pipeline to accept it.
	authed_as: Box<str>,
	/// The inbound activity, canonicalized to JSON by the caller (the task
	/// dispatcher re-encodes whatever the originating plugin received).
	activity: String,
}

async fn queue_receive(
	State(state): State<App>,
	_auth: DispatcherAuth,
	Form(form): Form<ReceiveForm>,
) -> Result<StatusCode, Error> {
	let activity: Activity = serde_json::from_str(&form.activity)?;
	let task = ReceiveTask::new(form.source_protocol, form.authed_as, activity);

	if state.config.local_development {
		task.run(&state).await?;
	} else {
		state.scheduler.task(task).now().await?;
	}
	Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct SendForm {
	object_id: Box<str>,
	protocol: Box<str>,
	uri: Box<str>,
}

async fn queue_send(
	State(state): State<App>,
	_auth: DispatcherAuth,
	Form(form): Form<SendForm>,
) -> Result<StatusCode, Error> {
	let target = Target::new(form.protocol, form.uri);
	let task = SendTask::new(form.object_id, target);

	if state.config.local_development {
		task.run(&state).await?;
	} else {
		state.scheduler.task(task).now().await?;
	}
	Ok(StatusCode::ACCEPTED)
}

async fn redirect_handler(
	State(state): State<App>,
	AxumPath(url): AxumPath<String>,
	RawQuery(query): RawQuery,
	headers: HeaderMap,
) -> Result<Response, Error> {
	let registry = state.ext::<bridge_federation::prelude::ProtocolRegistry>()?;
	let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());

	match redirect(&state, registry, &url, query.as_deref(), accept).await? {
		RedirectOutcome::Redirect { location, alternate } => {
			let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
			response.headers_mut().insert(
				header::LOCATION,
				HeaderValue::from_str(&location).map_err(|_| Error::ValidationError("invalid redirect location".into()))?,
			);
			response.headers_mut().insert(
				header::LINK,
				HeaderValue::from_str(&format!("<{alternate}>; rel=\"alternate\""))
					.map_err(|_| Error::ValidationError("invalid alternate link".into()))?,
			);
			Ok(response)
		}
		RedirectOutcome::Serve(activity) => {
			let mut response = Json(activity).into_response();
			response.headers_mut().insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
			response.headers_mut().insert(header::VARY, HeaderValue::from_static("Accept"));
			Ok(response)
		}
	}
}


// vim: ts=4
