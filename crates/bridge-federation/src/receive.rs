//! Receive pipeline (§4.4): turns an inbound activity from a source
//! protocol into store updates (the object itself, follow-edge changes,
//! user enablement) and the set of delivery targets the task runner should
//! fan out to.

use bridge_core::prelude::App;
use bridge_types::model::{Follower, FollowerStatus, IdOrObject, Object, ObjectStatus, SUPPORTED_VERBS, User, Verb};
use bridge_types::prelude::*;
use bridge_types::store::FollowerFilter;

use crate::dedup::Dedup;
use crate::ids::{bot_actor_protocol, host_of, normalize_sender};
use crate::protocol::ProtocolRegistry;
use crate::targets::targets;

/// Outcome of [`receive`]: the persisted object and its delivery targets,
/// plus any synthetic objects (an `accept`, a reciprocal `follow`, a
/// copy-deletion) the pipeline produced as a side effect and that need
/// their own `send` tasks scheduled. Synthetic objects are delivered
/// directly rather than looped back through `receive`, since plugins (and
/// the pipeline itself) must not call `receive` recursively (§6).
pub struct Received {
	pub object: Object,
	pub targets: Vec<Target>,
	pub extra_sends: Vec<(Object, Vec<Target>)>,
}

/// Processes one inbound activity. Idempotent: receiving the same activity
/// id twice updates the same stored `Object` rather than duplicating it,
/// and a bit-identical replay is a pure no-op (testable property 5).
///
/// `authed_as` is the principal id the task dispatcher attests sent this
/// activity; it must name a principal of `source_protocol` and match the
/// activity's own `actor`, or the request is rejected as unauthorized.
/// `internal` bypasses both checks and the domain blocklist, for activities
/// the bridge synthesizes itself.
pub async fn receive(
	state: &App,
	registry: &ProtocolRegistry,
	dedup: &Dedup,
	source_protocol: &str,
	authed_as: &str,
	mut activity: bridge_types::model::Activity,
	internal: bool,
) -> ClResult<Option<Received>> {
	// 1. Identity.
	let id = activity.id().ok_or_else(|| Error::ValidationError("activity has no id".into()))?.to_string();

	// 2. Blocklist.
	if !internal && state.config.is_blocklisted_domain(&host_of(&id)) {
		return Err(Error::Blocklisted(id));
	}

	// 3. Dedup. Bare objects (no verb) always proceed: the pipeline needs
	// to detect content changes on them, which an id-only cache can't see.
	if activity.verb.is_some() && dedup.check_and_insert(&id) {
		return Ok(None);
	}

	// 5. Normalization: rewrite the sender identity fields to their
	// canonical form for the source protocol, inverting any copy wrapping,
	// before the authorization check below keys off the actor id.
	activity = normalize_sender(state, registry, &activity, source_protocol).await?;

	// 4. Authorization, checked against the normalized actor id: a
	// legitimately copy-wrapped actor id must compare equal to `authed_as`
	// once it's been rewritten back into its canonical source-protocol form.
	let actor_id = activity
		.actor_id()
		.or_else(|| activity.author.as_ref().map(IdOrObject::id))
		.ok_or_else(|| Error::ValidationError(format!("activity {id} has no actor")))?
		.to_string();
	if !internal {
		let actor_protocol = registry.for_id(&actor_id)?;
		if actor_protocol.label() != source_protocol {
			return Err(Error::PermissionDenied);
		}
		if actor_id != authed_as {
			return Err(Error::PermissionDenied);
		}
	}

	// 6. Principal load.
	let mut actor_user = state.store.get_user(&actor_id).await?.unwrap_or_else(|| User::new(actor_id.clone(), source_protocol));
	if actor_user.is_blocked() {
		return Ok(None);
	}

	// 7. Persist, with the cross-tenant-overwrite guard from §5: a
	// stored object already attributed to a different actor can't be
	// silently overwritten by this one.
	let mut object = state.store.get_object(&id).await?.unwrap_or_else(|| Object::new(id.as_str()));
	let previous_actor = object.our_as1.as_ref().and_then(|a| a.actor_id()).map(str::to_string);
	if !object.new && previous_actor.as_deref().is_some_and(|prev| prev != actor_id) {
		return Err(Error::Conflict(format!("object {id} is owned by a different actor")));
	}
	let previously_stored = object.our_as1.as_ref().map(serde_json::to_value).transpose()?;
	object.new = previously_stored.is_none();
	object.changed = !object.new && previously_stored != Some(serde_json::to_value(&activity)?);

	// 8. Wrap a bare object in a synthetic activity; verb-bearing input
	// skips straight through. A `post` is synthesized unless a prior
	// `create` already completed for this object — not merely whether the
	// object is new, so a create that never finished delivering gets
	// re-synthesized rather than silently dropped.
	let prior_create_completed =
		object.our_as1.as_ref().is_some_and(|prev| prev.verb == Some(Verb::Post)) && object.status == ObjectStatus::Complete;
	let verb = match activity.verb {
		Some(v) => v,
		None => {
			if !activity.object_type.map(|t| t.is_bare_object()).unwrap_or(false) {
				return Err(Error::ValidationError(format!("object {id} has no verb and isn't a bare object")));
			}
			let synthesized = if object.changed || activity.object_type.is_some_and(|t| t.is_actor()) {
				Verb::Update
			} else if !prior_create_completed {
				Verb::Post
			} else {
				return Ok(None);
			};
			activity.verb = Some(synthesized);
			activity.actor = Some(actor_id.as_str().into());
			activity.object = Some(bridge_types::model::IdOrObject::Object(Box::new(activity.clone())));
			synthesized
		}
	};

	// 9. Type gate.
	if !SUPPORTED_VERBS.contains(&verb) {
		return Err(Error::UnsupportedVerb(format!("{verb:?}")));
	}

	object.source_protocol = Some(source_protocol.into());
	object.our_as1 = Some(activity.clone());
	object.updated = Timestamp::now();

	// 10. Link owners.
	object.users.insert(actor_id.as_str().into());
	if let Some(inner) = activity.object.as_ref().and_then(IdOrObject::as_object) {
		if let Some(owner) = inner.actor_id().or_else(|| inner.author.as_ref().map(IdOrObject::id)) {
			object.users.insert(owner.into());
		}
	}

	actor_user.protocol = source_protocol.into();
	state.store.put_user(&actor_user).await?;

	// 11. Dispatch per verb.
	let mut extra_sends = Vec::new();
	match verb {
		Verb::Follow => extra_sends.extend(handle_follow(state, registry, &activity, &actor_id, source_protocol).await?),
		Verb::StopFollowing | Verb::Undo => handle_unfollow(state, &activity, &actor_id).await?,
		Verb::Delete => handle_delete(state, &activity).await?,
		Verb::Block => {
			if let Some(target) = activity.object_id() {
				if let Some(abbrev) = bot_actor_protocol(&state.config.super_domain, target) {
					if let Ok(bot_protocol) = registry.by_abbrev(&abbrev) {
						let label = bot_protocol.label();
						actor_user.enabled_protocols.remove(label);
						let copy = actor_user.copy_in(label).cloned();
						actor_user.copies.retain(|c| c.protocol.as_ref() != label);
						state.store.put_user(&actor_user).await?;
						if let Some(copy) = copy {
							extra_sends.extend(maybe_delete_copy(state, registry, &actor_id, &copy).await?);
						}
						object.recompute_status();
						state.store.put_object(&object).await?;
						return Ok(Some(Received { object, targets: Vec::new(), extra_sends }));
					}
				}
			}
		}
		Verb::Post => {
			if activity.to.len() == 1 && activity.cc.is_empty() {
				if let Some(abbrev) = bot_actor_protocol(&state.config.super_domain, &activity.to[0]) {
					if let Ok(bot_protocol) = registry.by_abbrev(&abbrev) {
						let label = bot_protocol.label();
						let command = activity.content.as_deref().unwrap_or_default().trim().to_lowercase();
						match command.as_str() {
							"yes" | "ok" => {
								actor_user.enabled_protocols.insert(label.into());
								state.store.put_user(&actor_user).await?;
								extra_sends.extend(
									schedule_reciprocal_follow(
										state,
										&state.config.super_domain,
										&abbrev,
										label,
										&actor_id,
										source_protocol,
									)
									.await?,
								);
							}
							"no" => {
								actor_user.enabled_protocols.remove(label);
								state.store.put_user(&actor_user).await?;
							}
							_ => {}
						}
						object.recompute_status();
						state.store.put_object(&object).await?;
						return Ok(Some(Received { object, targets: Vec::new(), extra_sends }));
					}
				}
			}
		}
		_ => {}
	}

	let plan = targets(state, registry, &activity, &actor_id, source_protocol).await?;
	for key in &plan.notify {
		object.notify.insert(key.clone());
	}
	for key in &plan.feed {
		object.feed.insert(key.clone());
	}
	object.undelivered = plan.targets.clone();
	object.delivered.retain(|t| !object.undelivered.contains(t));
	object.failed.retain(|t| !object.undelivered.contains(t));
	object.recompute_status();
	object.validate_invariants()?;

	state.store.put_object(&object).await?;

	Ok(Some(Received { object, targets: plan.targets, extra_sends }))
}

/// Synthesizes and schedules a `Follow` object from the bridge's bot actor
/// for `abbrev`/`label` back to `follower_id`, per the DM-command and
/// bot-follow control flows (S4).
async fn schedule_reciprocal_follow(
	state: &App,
	super_domain: &str,
	abbrev: &str,
	label: &str,
	follower_id: &str,
	follower_protocol: &str,
) -> ClResult<Vec<(Object, Vec<Target>)>> {
	let bot_id = crate::ids::bot_actor_id(super_domain, abbrev);
	let mut edge = Follower::new(bot_id.clone(), follower_id);
	edge.status = FollowerStatus::Active;
	state.store.put_follower(&edge).await?;

	let follow_id: Box<str> = format!("{follower_id}#bridge-follow-back").into();
	let follow_activity = bridge_types::model::Activity {
		id: Some(follow_id.clone()),
		verb: Some(Verb::Follow),
		actor: Some(bot_id.as_ref().into()),
		object: Some(follower_id.into()),
		object_type: Some(bridge_types::model::ObjectType::Activity),
		..Default::default()
	};
	let mut object = Object::new(follow_id);
	object.source_protocol = Some(label.into());
	object.our_as1 = Some(follow_activity);
	let target = Target::new(follower_protocol, follower_id);
	object.undelivered.push(target.clone());
	object.recompute_status();
	state.store.put_object(&object).await?;
	Ok(vec![(object, vec![target])])
}

/// `maybe_delete_copy` (§4.4): emits a synthetic `delete` addressed to the
/// copy's own endpoint, so a disabled or blocking protocol's mirror of this
/// user is torn down there too.
async fn maybe_delete_copy(
	state: &App,
	registry: &ProtocolRegistry,
	origin_user_id: &str,
	copy: &Target,
) -> ClResult<Vec<(Object, Vec<Target>)>> {
	let Ok(protocol) = registry.by_label(&copy.protocol) else { return Ok(Vec::new()) };
	if !protocol.has_copies() {
		return Ok(Vec::new());
	}

	let delete_id: Box<str> = format!("{origin_user_id}#bridge-copy-delete").into();
	let delete_activity = bridge_types::model::Activity {
		id: Some(delete_id.clone()),
		verb: Some(Verb::Delete),
		actor: Some(origin_user_id.into()),
		object: Some(copy.uri.as_ref().into()),
		..Default::default()
	};
	let mut object = Object::new(delete_id);
	object.source_protocol = Some(copy.protocol.clone());
	object.our_as1 = Some(delete_activity);
	let target = Target::new(copy.protocol.clone(), copy.uri.clone());
	object.undelivered.push(target.clone());
	object.recompute_status();
	state.store.put_object(&object).await?;
	Ok(vec![(object, vec![target])])
}

/// Upserts an active `Follower` edge for each followee named in a `follow`
/// activity, enabling the bridged protocol and scheduling a reciprocal
/// follow-back when the followee is the bridge's own bot actor, and
/// synthesizing an `accept` for followees whose protocol doesn't expect an
/// explicit one of its own (§4.4's follow handler).
async fn handle_follow(
	state: &App,
	registry: &ProtocolRegistry,
	activity: &bridge_types::model::Activity,
	actor_id: &str,
	source_protocol: &str,
) -> ClResult<Vec<(Object, Vec<Target>)>> {
	let target_id = activity.object_id().ok_or_else(|| Error::ValidationError("follow has no object".into()))?.to_string();

	if let Some(protocol) = bot_actor_protocol(&state.config.super_domain, &target_id) {
		let mut follower_user = state.store.get_user(actor_id).await?.unwrap_or_else(|| User::new(actor_id, source_protocol));
		follower_user.enabled_protocols.insert(protocol.clone());
		state.store.put_user(&follower_user).await?;
	}

	let mut follower = state
		.store
		.get_follower(actor_id, &target_id)
		.await?
		.unwrap_or_else(|| Follower::new(actor_id, target_id.as_str()));
	follower.status = FollowerStatus::Active;
	follower.follow = activity.id().map(Box::from);
	follower.updated = Timestamp::now();
	state.store.put_follower(&follower).await?;

	let mut extra = Vec::new();
	if let Ok(followee_protocol) = registry.for_id(&target_id) {
		if !followee_protocol.has_follow_accepts() {
			let accept_id: Box<str> = format!("{}#accept", activity.id().unwrap_or_default()).into();
			let accept_activity = bridge_types::model::Activity {
				id: Some(accept_id.clone()),
				verb: Some(Verb::Accept),
				actor: Some(target_id.as_str().into()),
				object: activity.id.clone().map(IdOrObject::Id),
				..Default::default()
			};
			let mut object = Object::new(accept_id);
			object.source_protocol = Some(followee_protocol.label().into());
			object.our_as1 = Some(accept_activity);
			let target = Target::new(source_protocol, actor_id);
			object.undelivered.push(target.clone());
			object.recompute_status();
			state.store.put_object(&object).await?;
			extra.push((object, vec![target]));
		}
	}
	Ok(extra)
}

async fn handle_unfollow(state: &App, activity: &bridge_types::model::Activity, actor_id: &str) -> ClResult<()> {
	let Some(target_id) = activity.object_id() else { return Ok(()) };
	if let Some(mut follower) = state.store.get_follower(actor_id, target_id).await? {
		follower.status = FollowerStatus::Inactive;
		follower.updated = Timestamp::now();
		state.store.put_follower(&follower).await?;
	}
	Ok(())
}

/// A `delete` whose object is an actor deactivates every Follower edge
/// touching that actor in either direction (testable property 4, S3);
/// otherwise it just marks the referenced object deleted.
async fn handle_delete(state: &App, activity: &bridge_types::model::Activity) -> ClResult<()> {
	let Some(target_id) = activity.object_id() else { return Ok(()) };
	state.store.delete_object(target_id).await?;

	let as_follower = state.store.list_followers(target_id, FollowerFilter { active_only: true }).await?;
	let as_followee = state.store.list_following(target_id, FollowerFilter { active_only: true }).await?;
	for mut edge in as_follower.into_iter().chain(as_followee) {
		edge.status = FollowerStatus::Inactive;
		edge.updated = Timestamp::now();
		state.store.put_follower(&edge).await?;
	}
	Ok(())
}


// vim: ts=4
