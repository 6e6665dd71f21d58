//! Delivery planner: turns an activity's audience (`to`/`cc`, reply
//! parents, and the author's followers when addressed publicly) into the
//! concrete `(protocol, uri)` pairs the task runner delivers to.

use bridge_core::prelude::App;
use bridge_types::model::{Activity, Follower, Object, PUBLIC_AUDIENCE, Verb};
use bridge_types::prelude::*;
use bridge_types::store::FollowerFilter;

use crate::ids::{host_of, object_copy_protocols, unbridge_id};
use crate::protocol::ProtocolRegistry;

/// Verbs that fan out to the actor's followers when addressed publicly.
/// Follows/accepts/likes are always point-to-point and never fan out.
const FOLLOWER_FANOUT_VERBS: &[Verb] = &[Verb::Post, Verb::Update, Verb::Delete, Verb::Share];

/// Output of [`targets`]: the concrete delivery targets plus the user-key
/// sets the caller should merge into the object's `notify`/`feed` fields.
#[derive(Default)]
pub struct TargetPlan {
	pub targets: Vec<Target>,
	pub notify: Vec<Box<str>>,
	pub feed: Vec<Box<str>>,
}

fn recipient_uri_to_target(state: &App, protocol_label: &str, recipient: &str) -> ClResult<Target> {
	let uri = match unbridge_id(&state.config.super_domain, recipient)? {
		Some((_, native)) => native,
		None => recipient.into(),
	};
	Ok(Target::new(protocol_label, uri))
}

/// Computes delivery targets for `activity`, authored by `author_id` and
/// received from `source_protocol`.
///
/// - Direct recipients in `to`/`cc` (other than the public-audience
///   pseudo-id) are always candidates.
/// - A reply is restricted to the parent's native protocol plus any
///   protocol the parent has a recorded copy in (§4.6 step 2); a
///   self-reply additionally fans out to the author's followers.
/// - A non-reply public post fans out to the author's active followers for
///   the verbs that carry content (`post`, `update`, `delete`, `share`).
/// - No target ever names `source_protocol`: an activity never round-trips
///   back to the protocol it arrived from.
/// - A limited-domain protocol's targets are dropped unless that protocol
///   already follows the author back — the anti-spam carve-out for
///   push-style protocols.
pub async fn targets(
	state: &App,
	registry: &ProtocolRegistry,
	activity: &Activity,
	author_id: &str,
	source_protocol: &str,
) -> ClResult<TargetPlan> {
	let mut plan = TargetPlan::default();

	let reply_parent = match &activity.in_reply_to {
		Some(reply) => state.store.get_object(reply.id()).await?,
		None => None,
	};
	let is_reply = activity.in_reply_to.is_some();
	let reply_protocols = reply_parent.as_ref().map(object_copy_protocols);
	let is_self_reply = match &reply_parent {
		Some(parent) => parent.our_as1.as_ref().and_then(|a| a.actor_id()) == Some(author_id),
		None => false,
	};

	let mut recipients: Vec<Box<str>> =
		activity.to.iter().chain(activity.cc.iter()).filter(|r| r.as_ref() != PUBLIC_AUDIENCE).cloned().collect();
	let reply_parent_author =
		reply_parent.as_ref().and_then(|p| p.our_as1.as_ref().and_then(|a| a.actor_id())).map(Box::from);

	let is_public = activity.to.iter().chain(activity.cc.iter()).any(|r| r.as_ref() == PUBLIC_AUDIENCE);
	let mut followers: Vec<Follower> = Vec::new();
	let wants_follower_fanout =
		activity.verb.is_some_and(|v| FOLLOWER_FANOUT_VERBS.contains(&v)) && (!is_reply || is_self_reply);
	if is_public && wants_follower_fanout && (!is_reply || reply_protocols.as_ref().is_some_and(|p| !p.is_empty())) {
		followers = state.store.list_followers(author_id, FollowerFilter { active_only: true }).await?;
	}

	recipients.sort();
	recipients.dedup();

	for recipient in recipients {
		// Already accounted for by the reply-parent-author check below, and
		// re-adding it as a generic direct target would double-count it.
		if reply_parent_author.as_deref() == Some(recipient.as_ref()) {
			continue;
		}
		let protocol = match registry.for_id(&recipient) {
			Ok(p) => p,
			Err(_) => continue,
		};
		if protocol.label() == source_protocol {
			continue;
		}
		if state.config.is_blocklisted_domain(&host_of(&recipient)) {
			continue;
		}
		if let Some(allowed) = &reply_protocols {
			if !allowed.contains(protocol.label()) {
				continue;
			}
		}
		if state.config.is_limited_domain(protocol.label()) {
			let has_active_follow = state.store.get_follower(&recipient, author_id).await?.is_some_and(|f| f.is_active());
			if !has_active_follow {
				continue;
			}
		}

		plan.targets.push(recipient_uri_to_target(state, protocol.label(), &recipient)?);
		plan.notify.push(recipient);
	}

	if let Some(author) = reply_parent_author {
		if let Ok(protocol) = registry.for_id(&author) {
			if protocol.label() != source_protocol && !state.config.is_blocklisted_domain(&host_of(&author)) {
				plan.targets.push(recipient_uri_to_target(state, protocol.label(), &author)?);
				plan.notify.push(author);
			}
		}
	}

	for follower in &followers {
		let protocol = match registry.for_id(&follower.from) {
			Ok(p) => p,
			Err(_) => continue,
		};
		if protocol.label() == source_protocol {
			continue;
		}
		if state.config.is_limited_domain(protocol.label()) {
			continue;
		}
		plan.targets.push(recipient_uri_to_target(state, protocol.label(), &follower.from)?);
		plan.notify.push(follower.from.clone());
		plan.feed.push(follower.from.clone());
	}

	plan.targets.sort();
	plan.targets.dedup();
	plan.notify.sort();
	plan.notify.dedup();
	plan.feed.sort();
	plan.feed.dedup();
	Ok(plan)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::Protocol;
	use async_trait::async_trait;
	use bridge_core::app::AppBuilder;
	use bridge_core::config::Config;
	use bridge_core::scheduler::InMemoryTaskStore;
	use bridge_store_memory::MemoryStore;
	use bridge_types::model::{Activity, ObjectType};
	use bridge_types::store::Store;
	use std::sync::Arc;

	struct Web;
	#[async_trait]
	impl Protocol for Web {
		fn label(&self) -> &'static str {
			"web"
		}
		fn abbrev(&self) -> &'static str {
			"web"
		}
		fn owns_id(&self, id: &str) -> bool {
			id.starts_with("https://")
		}
		fn owns_handle(&self, _handle: &str) -> bool {
			true
		}
		async fn fetch(&self, _http: &bridge_core::request::HttpClient, id: &str) -> ClResult<Activity> {
			Ok(Activity { id: Some(id.into()), ..Default::default() })
		}
		async fn deliver(&self, _http: &bridge_core::request::HttpClient, _target: &str, _activity: &Activity) -> ClResult<()> {
			Ok(())
		}
	}

	struct Fed;
	#[async_trait]
	impl Protocol for Fed {
		fn label(&self) -> &'static str {
			"fed"
		}
		fn abbrev(&self) -> &'static str {
			"fe"
		}
		fn owns_id(&self, id: &str) -> bool {
			id.starts_with("fed:")
		}
		fn owns_handle(&self, _handle: &str) -> bool {
			false
		}
		async fn fetch(&self, _http: &bridge_core::request::HttpClient, id: &str) -> ClResult<Activity> {
			Ok(Activity { id: Some(id.into()), ..Default::default() })
		}
		async fn deliver(&self, _http: &bridge_core::request::HttpClient, _target: &str, _activity: &Activity) -> ClResult<()> {
			Ok(())
		}
	}

	fn test_config(limited: &[&str]) -> Config {
		Config {
			primary_domain: "bridge.example".into(),
			super_domain: "bridge.example".into(),
			other_domains: Box::new([]),
			local_domains: Box::new([]),
			domain_blocklist: Box::new([]),
			limited_domains: limited.iter().map(|s| Box::from(*s)).collect(),
			object_size_cap: 1 << 20,
			refresh_age_secs: 3600,
			seen_ids_capacity: 1000,
			protocol_resolution_capacity: 1000,
			key_fetch_cache_capacity: 100,
			listen_addr: "127.0.0.1:0".into(),
			database_url: "sqlite::memory:".into(),
			dispatcher_secret: "s".into(),
			local_development: true,
		}
	}

	fn registry() -> ProtocolRegistry {
		let mut reg = ProtocolRegistry::new(16);
		reg.register(Arc::new(Web));
		reg.register(Arc::new(Fed));
		reg
	}

	#[tokio::test]
	async fn direct_recipients_are_always_included() {
		let store = MemoryStore::new();
		let state = AppBuilder::new(test_config(&[]), store, InMemoryTaskStore::new()).build().unwrap();
		let reg = registry();

		let activity = Activity { to: vec!["https://instance/users/bob".into()], ..Default::default() };
		let plan = targets(&state, &reg, &activity, "https://instance/users/alice", "web").await.unwrap();
		assert_eq!(plan.targets.len(), 1);
		assert_eq!(plan.targets[0].uri.as_ref(), "https://instance/users/bob");
	}

	#[tokio::test]
	async fn same_protocol_as_the_source_never_round_trips() {
		let store = MemoryStore::new();
		let state = AppBuilder::new(test_config(&[]), store, InMemoryTaskStore::new()).build().unwrap();
		let reg = registry();

		let activity = Activity { to: vec!["https://instance/users/bob".into()], ..Default::default() };
		let plan = targets(&state, &reg, &activity, "https://instance/users/alice", "web").await.unwrap();
		assert!(plan.targets.iter().all(|t| t.protocol.as_ref() != "web"));
	}

	#[tokio::test]
	async fn public_post_fans_out_to_followers() {
		let store = MemoryStore::new();
		store.put_follower(&Follower::new("fed:bob", "https://instance/users/alice")).await.unwrap();
		let state = AppBuilder::new(test_config(&[]), store, InMemoryTaskStore::new()).build().unwrap();
		let reg = registry();

		let activity = Activity {
			verb: Some(Verb::Post),
			object_type: Some(ObjectType::Note),
			to: vec![PUBLIC_AUDIENCE.into()],
			..Default::default()
		};
		let plan = targets(&state, &reg, &activity, "https://instance/users/alice", "web").await.unwrap();
		assert_eq!(plan.targets.len(), 1);
		assert_eq!(plan.targets[0].protocol.as_ref(), "fed");
		assert!(plan.feed.contains(&Box::from("fed:bob")));
	}

	#[tokio::test]
	async fn self_reply_fans_out_but_cross_protocol_reply_does_not() {
		let store = MemoryStore::new();
		store.put_follower(&Follower::new("fed:bob", "https://instance/users/alice")).await.unwrap();

		let mut parent = Object::new("https://instance/post/1");
		parent.source_protocol = Some("web".into());
		parent.our_as1 =
			Some(Activity { id: Some("https://instance/post/1".into()), actor: Some("https://instance/users/alice".into()), ..Default::default() });
		store.put_object(&parent).await.unwrap();

		let state = AppBuilder::new(test_config(&[]), store, InMemoryTaskStore::new()).build().unwrap();
		let reg = registry();

		let reply = Activity {
			verb: Some(Verb::Post),
			object_type: Some(ObjectType::Comment),
			in_reply_to: Some("https://instance/post/1".into()),
			to: vec![PUBLIC_AUDIENCE.into()],
			..Default::default()
		};
		let plan = targets(&state, &reg, &reply, "https://instance/users/alice", "web").await.unwrap();
		assert!(plan.targets.iter().any(|t| t.protocol.as_ref() == "fed"), "self-reply should still reach followers");
	}

	#[tokio::test]
	async fn reply_to_another_actor_is_restricted_to_the_parents_protocols() {
		let store = MemoryStore::new();
		let mut parent = Object::new("fed:post/1");
		parent.source_protocol = Some("fed".into());
		parent.our_as1 = Some(Activity { id: Some("fed:post/1".into()), actor: Some("fed:carol".into()), ..Default::default() });
		store.put_object(&parent).await.unwrap();
		store.put_follower(&Follower::new("fed:bob", "https://instance/users/alice")).await.unwrap();

		let state = AppBuilder::new(test_config(&[]), store, InMemoryTaskStore::new()).build().unwrap();
		let reg = registry();

		let reply = Activity {
			verb: Some(Verb::Post),
			object_type: Some(ObjectType::Comment),
			in_reply_to: Some("fed:post/1".into()),
			to: vec!["fed:carol".into(), PUBLIC_AUDIENCE.into()],
			..Default::default()
		};
		let plan = targets(&state, &reg, &reply, "https://instance/users/alice", "web").await.unwrap();
		assert_eq!(plan.targets.len(), 1, "only the parent's own protocol should receive the reply");
		assert_eq!(plan.targets[0].protocol.as_ref(), "fed");
	}

	#[tokio::test]
	async fn limited_domain_target_requires_an_active_follow_back() {
		let store = MemoryStore::new();
		let state = AppBuilder::new(test_config(&["web"]), store, InMemoryTaskStore::new()).build().unwrap();
		let reg = registry();

		let activity = Activity { to: vec!["https://instance/users/bob".into()], ..Default::default() };
		let plan = targets(&state, &reg, &activity, "fed:alice", "fed").await.unwrap();
		assert!(plan.targets.is_empty(), "no follow-back edge yet, target should be dropped");

		state.store.put_follower(&Follower::new("https://instance/users/bob", "fed:alice")).await.unwrap();
		let plan = targets(&state, &reg, &activity, "fed:alice", "fed").await.unwrap();
		assert_eq!(plan.targets.len(), 1);
	}
}

// vim: ts=4
