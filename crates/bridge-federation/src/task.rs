//! The two task kinds the durable scheduler runs: `ReceiveTask` turns an
//! inbound activity into store updates and a set of delivery targets;
//! `SendTask` delivers one object to one target.
//!
//! Both expect a [`ProtocolRegistry`] to be reachable via
//! [`bridge_core::app::AppState::ext`] — the server wires one in at startup
//! with `AppBuilder::extension`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bridge_core::prelude::App;
use bridge_core::scheduler::{Task, TaskId};
use bridge_types::model::Activity;
use bridge_types::prelude::*;

use crate::dedup::Dedup;
use crate::ids::translate_ids;
use crate::protocol::ProtocolRegistry;
use crate::receive::receive;

#[derive(Serialize, Deserialize)]
struct ReceivePayload {
	source_protocol: Box<str>,
	authed_as: Box<str>,
	activity: Activity,
}

/// Processes one inbound activity and schedules a `SendTask` per computed
/// delivery target, plus one more per synthesized side-effect activity
/// (an `accept`, a reciprocal follow-back, a copy teardown).
#[derive(Debug)]
pub struct ReceiveTask {
	source_protocol: Box<str>,
	authed_as: Box<str>,
	activity: Activity,
}

impl ReceiveTask {
	pub fn new(source_protocol: impl Into<Box<str>>, authed_as: impl Into<Box<str>>, activity: Activity) -> Arc<Self> {
		Arc::new(Self { source_protocol: source_protocol.into(), authed_as: authed_as.into(), activity })
	}
}

#[async_trait]
impl Task<App> for ReceiveTask {
	fn kind() -> &'static str {
		"federation_receive"
	}

	fn build(_id: TaskId, context: &str) -> ClResult<Arc<dyn Task<App>>> {
		let payload: ReceivePayload =
			serde_json::from_str(context).map_err(|e| Error::Internal(format!("bad receive task payload: {e}")))?;
		Ok(Arc::new(ReceiveTask {
			source_protocol: payload.source_protocol,
			authed_as: payload.authed_as,
			activity: payload.activity,
		}))
	}

	fn serialize(&self) -> String {
		let payload = ReceivePayload {
			source_protocol: self.source_protocol.clone(),
			authed_as: self.authed_as.clone(),
			activity: self.activity.clone(),
		};
		serde_json::to_string(&payload).unwrap_or_default()
	}

	fn kind_of(&self) -> &'static str {
		Self::kind()
	}

	async fn run(&self, state: &App) -> ClResult<()> {
		let registry: &ProtocolRegistry = state.ext()?;
		let dedup: &Dedup = state.ext()?;
		let Some(received) =
			receive(state, registry, dedup, &self.source_protocol, &self.authed_as, self.activity.clone(), false).await?
		else {
			return Ok(());
		};

		for target in received.targets {
			state
				.scheduler
				.task(SendTask::new(received.object.id.clone(), target))
				.with_retry(bridge_core::scheduler::RetryPolicy::default())
				.now()
				.await?;
		}
		for (object, targets) in received.extra_sends {
			for target in targets {
				state
					.scheduler
					.task(SendTask::new(object.id.clone(), target))
					.with_retry(bridge_core::scheduler::RetryPolicy::default())
					.now()
					.await?;
			}
		}
		Ok(())
	}
}

/// Delivers the object at `object_id` to `target`, then moves `target`
/// from `undelivered` to `delivered` in the stored object.
///
/// Permanent delivery failure (retries exhausted) is recorded in the
/// task store's own error log; it isn't mirrored back into the object's
/// `failed` list, since the scheduler doesn't expose a final-failure hook
/// to tasks — only a retryable `Err` or success.
#[derive(Debug)]
pub struct SendTask {
	object_id: Box<str>,
	target: Target,
}

impl SendTask {
	pub fn new(object_id: impl Into<Box<str>>, target: Target) -> Arc<Self> {
		Arc::new(Self { object_id: object_id.into(), target })
	}
}

#[derive(Serialize, Deserialize)]
struct SendPayload {
	object_id: Box<str>,
	target: Target,
}

#[async_trait]
impl Task<App> for SendTask {
	fn kind() -> &'static str {
		"federation_send"
	}

	fn build(_id: TaskId, context: &str) -> ClResult<Arc<dyn Task<App>>> {
		let payload: SendPayload =
			serde_json::from_str(context).map_err(|e| Error::Internal(format!("bad send task payload: {e}")))?;
		Ok(Arc::new(SendTask { object_id: payload.object_id, target: payload.target }))
	}

	fn serialize(&self) -> String {
		let payload = SendPayload { object_id: self.object_id.clone(), target: self.target.clone() };
		serde_json::to_string(&payload).unwrap_or_default()
	}

	fn kind_of(&self) -> &'static str {
		Self::kind()
	}

	async fn run(&self, state: &App) -> ClResult<()> {
		let registry: &ProtocolRegistry = state.ext()?;
		let protocol = registry.by_label(&self.target.protocol)?;

		let mut object = state.store.get_object(&self.object_id).await?.ok_or(Error::NotFound)?;
		let activity = object.our_as1.clone().ok_or_else(|| Error::Internal(format!("object {} has no content to deliver", self.object_id)))?;
		let activity = translate_ids(state, registry, &activity, &self.target.protocol).await?;

		protocol.deliver(&state.http, &self.target.uri, &activity).await?;

		object.undelivered.retain(|t| t != &self.target);
		if !object.delivered.contains(&self.target) {
			object.delivered.push(self.target.clone());
		}
		object.recompute_status();
		state.store.put_object(&object).await
	}
}

// vim: ts=4
