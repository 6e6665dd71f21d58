//! Identifier translation: minting a bridge-owned id for a user or object
//! of one protocol so another protocol can address it, and reversing the
//! process when a bridged id comes back in.
//!
//! Every bridged identifier has the shape
//! `https://<abbrev>.<super-domain>/r/<percent-encoded native id>`, so
//! translation is symmetric and doesn't need a persistent mapping table.

use bridge_core::prelude::App;
use bridge_types::model::{Activity, IdOrObject, ObjectType, Verb};
use bridge_types::prelude::*;

use crate::protocol::{HandleStyle, ProtocolRegistry};

fn percent_encode(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	for byte in input.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
			_ => out.push_str(&format!("%{byte:02X}")),
		}
	}
	out
}

fn percent_decode(input: &str) -> ClResult<String> {
	let bytes = input.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			let hex = input
				.get(i + 1..i + 3)
				.ok_or_else(|| Error::ValidationError("truncated percent-encoding".into()))?;
			let byte = u8::from_str_radix(hex, 16)
				.map_err(|_| Error::ValidationError("invalid percent-encoding".into()))?;
			out.push(byte);
			i += 3;
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}
	String::from_utf8(out).map_err(|_| Error::ValidationError("percent-decoded id is not valid utf-8".into()))
}

/// Mints the id `other_protocol` users see for a native id owned by
/// `native_protocol_abbrev`.
pub fn bridge_id(super_domain: &str, native_protocol_abbrev: &str, native_id: &str) -> Box<str> {
	format!("https://{native_protocol_abbrev}.{super_domain}/r/{}", percent_encode(native_id)).into_boxed_str()
}

/// The native protocol abbreviation and id a bridge-minted id was minted
/// for, or `None` if `id` isn't one of ours.
pub fn unbridge_id(super_domain: &str, id: &str) -> ClResult<Option<(Box<str>, Box<str>)>> {
	let Ok(url) = url::Url::parse(id) else { return Ok(None) };
	let Some(host) = url.host_str() else { return Ok(None) };

	let Some(abbrev) = host.strip_suffix(&format!(".{super_domain}")) else { return Ok(None) };
	if abbrev.is_empty() || abbrev.contains('.') {
		return Ok(None);
	}

	let Some(encoded) = url.path().strip_prefix("/r/") else { return Ok(None) };
	let native_id = percent_decode(encoded)?;
	Ok(Some((abbrev.into(), native_id.into_boxed_str())))
}

/// Translates a user id from `from`'s namespace to how `to` should address
/// it, per §4.2: identity within a protocol, a stored copy lookup in
/// either direction for push-style (`HAS_COPIES`) protocols, and a
/// deterministic subdomain-wrap fallback otherwise.
///
/// Returns `None` when `to` uses copies but the user has no copy there yet
/// — the id is untranslatable until one is created, rather than silently
/// wrapped.
pub async fn translate_user_id(
	state: &App,
	registry: &ProtocolRegistry,
	id: &str,
	from: &str,
	to: &str,
) -> ClResult<Option<Box<str>>> {
	if from == to {
		return Ok(Some(id.into()));
	}

	let to_protocol = registry.by_label(to)?;
	if to_protocol.has_copies() {
		let copy = state.store.get_user(id).await?.and_then(|u| u.copy_in(to).map(|t| t.uri.clone()));
		return Ok(copy);
	}

	let from_protocol = registry.by_label(from)?;
	if from_protocol.has_copies() {
		let reverse = state.store.find_user_by_copy(from, id).await?.map(|u| u.id);
		if reverse.is_some() {
			return Ok(reverse);
		}
	}

	Ok(Some(bridge_id(&state.config.super_domain, from_protocol.abbrev(), id)))
}

/// Translates an object id the same way [`translate_user_id`] does, except
/// the "copy" for an object is a protocol-native representation recorded
/// in `Object::native` rather than a `User::copies` entry.
pub async fn translate_object_id(
	state: &App,
	registry: &ProtocolRegistry,
	id: &str,
	from: &str,
	to: &str,
) -> ClResult<Option<Box<str>>> {
	if from == to {
		return Ok(Some(id.into()));
	}

	if let Some(object) = state.store.get_object(id).await? {
		if let Some(copy_id) = object.native.get(to).and_then(|v| v.get("id")).and_then(|v| v.as_str()) {
			return Ok(Some(copy_id.into()));
		}
	}

	let from_protocol = registry.by_label(from)?;
	Ok(Some(bridge_id(&state.config.super_domain, from_protocol.abbrev(), id)))
}

/// Translates a handle from `from`'s native shape into the form `to`
/// displays it in, per §4.2. Basic mode picks one of three literal forms
/// keyed on the destination's [`HandleStyle`]; enhanced mode instead
/// returns the origin-native handle unchanged once the bridge owns the
/// origin instance's own DNS, since the destination can then resolve it
/// directly without going through the bridge at all.
pub fn translate_handle(
	state: &App,
	registry: &ProtocolRegistry,
	handle: &str,
	from: &str,
	to: &str,
	enhanced: bool,
) -> ClResult<Box<str>> {
	if from == to {
		return Ok(handle.into());
	}

	let (user, instance) = handle.split_once('@').unwrap_or(("", handle));
	if enhanced && state.config.owns_domain(instance) {
		return Ok(handle.into());
	}

	let from_protocol = registry.by_label(from)?;
	let to_protocol = registry.by_label(to)?;
	Ok(match to_protocol.handle_style() {
		HandleStyle::Web => format!("https://{instance}/@{user}").into_boxed_str(),
		HandleStyle::ActorInbox => {
			format!("@{handle}@{}.{}", from_protocol.abbrev(), state.config.super_domain).into_boxed_str()
		}
		HandleStyle::DidRepo => {
			let normalized = handle.replace('@', "").replace('.', "-");
			format!("{normalized}.{}.{}", from_protocol.abbrev(), state.config.super_domain).into_boxed_str()
		}
	})
}

/// Resolves `id`'s source protocol and translates it to `dest` (§4.5), as
/// a user id or an object id depending on `as_user`. An id whose source
/// protocol can't be resolved passes through unchanged — there's nothing
/// to rewrite it into.
async fn translate_one(
	state: &App,
	registry: &ProtocolRegistry,
	id: &str,
	dest: &str,
	as_user: bool,
) -> ClResult<Box<str>> {
	let Ok(source) = registry.for_id(id) else { return Ok(id.into()) };
	let from = source.label();
	if from == dest {
		return Ok(id.into());
	}
	let translated =
		if as_user { translate_user_id(state, registry, id, from, dest).await? } else { translate_object_id(state, registry, id, from, dest).await? };
	Ok(translated.unwrap_or_else(|| id.into()))
}

/// True if `obj` carries nothing but an id — the Rust analogue of AS1's
/// `{"id": X}` singleton dict, collapsed back to a bare id reference after
/// translation (§4.5).
fn is_singleton_id(obj: &Activity) -> bool {
	obj.verb.is_none()
		&& obj.object_type.is_none()
		&& obj.actor.is_none()
		&& obj.author.is_none()
		&& obj.object.is_none()
		&& obj.in_reply_to.is_none()
		&& obj.to.is_empty()
		&& obj.cc.is_empty()
		&& obj.tags.is_empty()
		&& obj.display_name.is_none()
		&& obj.summary.is_none()
		&& obj.content.is_none()
		&& obj.image.is_none()
		&& obj.url.is_none()
}

/// Translates one `actor`/`author`/`object`/`inReplyTo`-shaped field
/// (§4.5): a bare id is translated directly; an embedded object has its
/// own `id`/`actor`/`author` translated in turn (but not descended into
/// further — the pipeline never nests these more than one level deep) and
/// is collapsed back to a bare id if nothing else survives on it.
async fn translate_field(
	state: &App,
	registry: &ProtocolRegistry,
	value: IdOrObject,
	dest: &str,
	as_user: bool,
) -> ClResult<IdOrObject> {
	match value {
		IdOrObject::Id(id) => Ok(IdOrObject::Id(translate_one(state, registry, &id, dest, as_user).await?)),
		IdOrObject::Object(mut inner) => {
			let inner_as_user = as_user || inner.object_type.is_some_and(ObjectType::is_actor);
			if let Some(id) = &inner.id {
				inner.id = Some(translate_one(state, registry, id, dest, inner_as_user).await?);
			}
			if let Some(actor) = &inner.actor {
				inner.actor = Some(IdOrObject::Id(translate_one(state, registry, actor.id(), dest, true).await?));
			}
			if let Some(author) = &inner.author {
				inner.author = Some(IdOrObject::Id(translate_one(state, registry, author.id(), dest, true).await?));
			}
			if is_singleton_id(&inner) {
				Ok(IdOrObject::Id(inner.id.clone().unwrap_or_default()))
			} else {
				Ok(IdOrObject::Object(inner))
			}
		}
	}
}

/// Normalizes only the sender identity fields (`actor`/`author`) of
/// `activity` into their canonical form for `dest`, inverting any copy
/// wrapping (§4.4 step 5). Unlike [`translate_ids`], this never touches
/// `object`/`inReplyTo`/mention urls: those may legitimately name an entity
/// native to a protocol other than `dest`, and forcing them into `dest`'s
/// namespace would corrupt a cross-protocol reference rather than canonicalize
/// it. Used by the receive pipeline before the `actor == authed_as` check,
/// which must compare in canonical form.
pub async fn normalize_sender(state: &App, registry: &ProtocolRegistry, activity: &Activity, dest: &str) -> ClResult<Activity> {
	let mut out = activity.clone();
	if let Some(actor) = out.actor.take() {
		out.actor = Some(translate_field(state, registry, actor, dest, true).await?);
	}
	if let Some(author) = out.author.take() {
		out.author = Some(translate_field(state, registry, author, dest, true).await?);
	}
	Ok(out)
}

/// Rewrites every id-bearing field of `activity` into `dest`'s namespace,
/// on a copy (§4.5): `id`, `actor`, `author`, `object` (and its own
/// `id`/`actor`/`author`), `inReplyTo`, and `mention` tag urls. `actor`/
/// `author`/mentions are always actor-kind; `object` is actor-kind only
/// for `follow`/`stop-following`/`undo`, whose object is the followee
/// rather than content; everything else is an object id. Order of rewrites
/// doesn't matter — each field is independent of the others.
pub async fn translate_ids(
	state: &App,
	registry: &ProtocolRegistry,
	activity: &Activity,
	dest: &str,
) -> ClResult<Activity> {
	let mut out = activity.clone();

	let root_is_actor = out.object_type.is_some_and(ObjectType::is_actor);
	if let Some(id) = &out.id {
		out.id = Some(translate_one(state, registry, id, dest, root_is_actor).await?);
	}
	if let Some(actor) = out.actor.take() {
		out.actor = Some(translate_field(state, registry, actor, dest, true).await?);
	}
	if let Some(author) = out.author.take() {
		out.author = Some(translate_field(state, registry, author, dest, true).await?);
	}
	let object_is_actor_kind = matches!(out.verb, Some(Verb::Follow) | Some(Verb::StopFollowing) | Some(Verb::Undo));
	if let Some(object) = out.object.take() {
		out.object = Some(translate_field(state, registry, object, dest, object_is_actor_kind).await?);
	}
	if let Some(reply) = out.in_reply_to.take() {
		out.in_reply_to = Some(translate_field(state, registry, reply, dest, false).await?);
	}
	for tag in &mut out.tags {
		if tag.object_type == Some(ObjectType::Mention) {
			if let Some(url) = &tag.url {
				tag.url = Some(translate_one(state, registry, url, dest, true).await?);
			}
		}
	}

	Ok(out)
}

/// The bridge's own addressable control-endpoint actor for `abbrev`, e.g.
/// `https://ap.bridge.example/`. `Protocol::for_id`'s own-DNS exception
/// (§4.1 step 1) and the `post`/`block`/`follow` control-command handling
/// in the receive pipeline both key off this id shape.
pub fn bot_actor_id(super_domain: &str, abbrev: &str) -> Box<str> {
	format!("https://{abbrev}.{super_domain}/").into_boxed_str()
}

/// The protocol abbreviation a bot-actor id names, or `None` if `id` isn't
/// one of the bridge's own bot actors.
pub fn bot_actor_protocol(super_domain: &str, id: &str) -> Option<Box<str>> {
	let url = url::Url::parse(id).ok()?;
	let host = url.host_str()?;
	let abbrev = host.strip_suffix(&format!(".{super_domain}"))?;
	if abbrev.is_empty() || abbrev.contains('.') {
		return None;
	}
	matches!(url.path(), "/" | "").then(|| abbrev.into())
}

/// Best-effort host extraction, used by the blocklist check; ids that
/// aren't parseable URLs (bare protocol-native ids) simply never match a
/// domain blocklist entry.
pub fn host_of(uri: &str) -> String {
	url::Url::parse(uri).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default()
}

/// The set of protocols `object` is known to have a presence in: its own
/// source protocol plus any protocol a copy was recorded under. Used by the
/// delivery planner to restrict a reply's audience to the parent's
/// bridged protocols (§4.6 step 2).
pub fn object_copy_protocols(object: &bridge_types::model::Object) -> std::collections::BTreeSet<Box<str>> {
	let mut protocols: std::collections::BTreeSet<Box<str>> = object.native.keys().cloned().collect();
	if let Some(source) = &object.source_protocol {
		protocols.insert(source.clone());
	}
	protocols
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bridging_and_unbridging_round_trips() {
		let native = "https://instance.example/users/alice";
		let bridged = bridge_id("bridge.example", "ap", native);
		assert_eq!(bridged.as_ref(), "https://ap.bridge.example/r/https%3A%2F%2Finstance.example%2Fusers%2Falice");

		let (abbrev, recovered) = unbridge_id("bridge.example", &bridged).unwrap().unwrap();
		assert_eq!(abbrev.as_ref(), "ap");
		assert_eq!(recovered.as_ref(), native);
	}

	#[test]
	fn a_foreign_id_is_not_recognized_as_bridged() {
		assert!(unbridge_id("bridge.example", "https://instance.example/users/alice").unwrap().is_none());
	}

	use crate::protocol::Protocol;
	use async_trait::async_trait;
	use bridge_core::app::AppBuilder;
	use bridge_core::config::Config;
	use bridge_core::scheduler::InMemoryTaskStore;
	use bridge_store_memory::MemoryStore;
	use bridge_types::model::{Tag, User};
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

	struct PushProtocol;
	#[async_trait]
	impl Protocol for PushProtocol {
		fn label(&self) -> &'static str {
			"push"
		}
		fn abbrev(&self) -> &'static str {
			"pu"
		}
		fn owns_id(&self, id: &str) -> bool {
			id.starts_with("push:")
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
		fn has_copies(&self) -> bool {
			true
		}
	}

	fn test_state() -> (App, ProtocolRegistry) {
		let config = Config {
			primary_domain: "bridge.example".into(),
			super_domain: "bridge.example".into(),
			other_domains: Box::new([]),
			local_domains: Box::new([]),
			domain_blocklist: Box::new([]),
			limited_domains: Box::new([]),
			object_size_cap: 1 << 20,
			refresh_age_secs: 3600,
			seen_ids_capacity: 1000,
			protocol_resolution_capacity: 1000,
			key_fetch_cache_capacity: 100,
			listen_addr: "127.0.0.1:0".into(),
			database_url: "sqlite::memory:".into(),
			dispatcher_secret: "s".into(),
			local_development: true,
		};
		let state = AppBuilder::new(config, MemoryStore::new(), InMemoryTaskStore::new()).build().unwrap();
		let mut registry = ProtocolRegistry::new(16);
		registry.register(Arc::new(Web));
		registry.register(Arc::new(PushProtocol));
		(state, registry)
	}

	#[tokio::test]
	async fn same_protocol_translation_is_identity() {
		let (state, registry) = test_state();
		let id = translate_user_id(&state, &registry, "https://instance/alice", "web", "web").await.unwrap();
		assert_eq!(id.unwrap().as_ref(), "https://instance/alice");
	}

	#[tokio::test]
	async fn copy_based_translation_round_trips_both_directions() {
		let (state, registry) = test_state();
		let mut user = User::new("https://instance/alice", "web");
		user.copies.push(Target::new("push", "push:alice"));
		state.store.put_user(&user).await.unwrap();

		let forward = translate_user_id(&state, &registry, "https://instance/alice", "web", "push").await.unwrap();
		assert_eq!(forward.unwrap().as_ref(), "push:alice");

		let backward = translate_user_id(&state, &registry, "push:alice", "push", "web").await.unwrap();
		assert_eq!(backward.unwrap().as_ref(), "https://instance/alice");
	}

	#[tokio::test]
	async fn missing_copy_on_a_push_destination_is_untranslatable() {
		let (state, registry) = test_state();
		let result = translate_user_id(&state, &registry, "https://instance/bob", "web", "push").await.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test]
	async fn two_pull_style_protocols_fall_back_to_the_subdomain_wrap() {
		struct OtherPull;
		#[async_trait]
		impl Protocol for OtherPull {
			fn label(&self) -> &'static str {
				"other"
			}
			fn abbrev(&self) -> &'static str {
				"ot"
			}
			fn owns_id(&self, id: &str) -> bool {
				id.starts_with("other:")
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

		let (state, mut registry) = test_state();
		registry.register(Arc::new(OtherPull));

		let id = translate_user_id(&state, &registry, "https://instance/alice", "web", "other").await.unwrap().unwrap();
		assert_eq!(id.as_ref(), bridge_id("bridge.example", "web", "https://instance/alice").as_ref());
	}

	#[tokio::test]
	async fn translate_handle_is_identity_within_a_protocol() {
		let (state, registry) = test_state();
		let handle = translate_handle(&state, &registry, "alice@instance", "web", "web", false).unwrap();
		assert_eq!(handle.as_ref(), "alice@instance");
	}

	#[test]
	fn translate_handle_wraps_for_an_actor_inbox_destination() {
		let (state, registry) = test_state();
		let handle = translate_handle(&state, &registry, "alice@instance", "web", "push", false).unwrap();
		assert_eq!(handle.as_ref(), "@alice@instance@web.bridge.example");
	}

	#[test]
	fn translate_handle_reconstructs_a_web_profile_url() {
		struct OtherWeb;
		#[async_trait]
		impl Protocol for OtherWeb {
			fn label(&self) -> &'static str {
				"otherweb"
			}
			fn abbrev(&self) -> &'static str {
				"ow"
			}
			fn owns_id(&self, id: &str) -> bool {
				id.starts_with("otherweb:")
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
			fn handle_style(&self) -> HandleStyle {
				HandleStyle::Web
			}
		}

		let (state, mut registry) = test_state();
		registry.register(Arc::new(OtherWeb));

		let handle = translate_handle(&state, &registry, "alice@instance", "push", "otherweb", false).unwrap();
		assert_eq!(handle.as_ref(), "https://instance/@alice");
	}

	#[test]
	fn translate_handle_uses_the_dotted_form_for_did_repo_destinations() {
		struct DidStyle;
		#[async_trait]
		impl Protocol for DidStyle {
			fn label(&self) -> &'static str {
				"didstyle"
			}
			fn abbrev(&self) -> &'static str {
				"ds"
			}
			fn owns_id(&self, id: &str) -> bool {
				id.starts_with("did:")
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
			fn handle_style(&self) -> HandleStyle {
				HandleStyle::DidRepo
			}
		}

		let (state, mut registry) = test_state();
		registry.register(Arc::new(DidStyle));

		let handle = translate_handle(&state, &registry, "alice@instance.example", "web", "didstyle", false).unwrap();
		assert_eq!(handle.as_ref(), "aliceinstance-example.web.bridge.example");
	}

	#[test]
	fn enhanced_mode_passes_through_a_handle_on_a_bridge_owned_domain() {
		let (state, registry) = test_state();
		let handle = translate_handle(&state, &registry, "alice@bridge.example", "web", "push", true).unwrap();
		assert_eq!(handle.as_ref(), "alice@bridge.example");
	}

	#[tokio::test]
	async fn translate_ids_rewrites_id_actor_and_object() {
		let (state, registry) = test_state();
		let mut user = User::new("https://instance/alice", "web");
		user.copies.push(Target::new("push", "push:alice"));
		state.store.put_user(&user).await.unwrap();

		let activity = Activity {
			id: Some("https://instance/post/1".into()),
			object_type: Some(ObjectType::Note),
			verb: Some(Verb::Post),
			actor: Some("https://instance/alice".into()),
			object: Some(IdOrObject::Id("https://instance/post/1".into())),
			..Default::default()
		};

		let translated = translate_ids(&state, &registry, &activity, "push").await.unwrap();
		let wrapped_id = bridge_id("bridge.example", "web", "https://instance/post/1");
		assert_eq!(translated.id.as_deref(), Some(wrapped_id.as_ref()));
		assert_eq!(translated.actor_id(), Some("push:alice"));
		assert_eq!(translated.object_id(), Some(wrapped_id.as_ref()));
	}

	#[tokio::test]
	async fn translate_ids_treats_a_follow_object_as_an_actor_id() {
		let (state, registry) = test_state();
		let activity = Activity {
			id: Some("https://instance/follow/1".into()),
			verb: Some(Verb::Follow),
			actor: Some("https://instance/alice".into()),
			object: Some(IdOrObject::Id("https://instance/bob".into())),
			..Default::default()
		};

		let mut user = User::new("https://instance/bob", "web");
		user.copies.push(Target::new("push", "push:bob"));
		state.store.put_user(&user).await.unwrap();

		let translated = translate_ids(&state, &registry, &activity, "push").await.unwrap();
		assert_eq!(translated.object_id(), Some("push:bob"));
	}

	#[tokio::test]
	async fn translate_ids_collapses_an_embedded_singleton_object_to_a_bare_id() {
		let (state, registry) = test_state();
		let activity = Activity {
			id: Some("https://instance/post/2".into()),
			object_type: Some(ObjectType::Note),
			verb: Some(Verb::Post),
			actor: Some("https://instance/alice".into()),
			object: Some(IdOrObject::Object(Box::new(Activity {
				id: Some("https://instance/post/2".into()),
				..Default::default()
			}))),
			..Default::default()
		};

		let translated = translate_ids(&state, &registry, &activity, "push").await.unwrap();
		match translated.object {
			Some(IdOrObject::Id(_)) => {}
			other => panic!("expected a collapsed bare id, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn translate_ids_rewrites_mention_tag_urls() {
		let (state, registry) = test_state();
		let mut user = User::new("https://instance/bob", "web");
		user.copies.push(Target::new("push", "push:bob"));
		state.store.put_user(&user).await.unwrap();

		let activity = Activity {
			id: Some("https://instance/post/3".into()),
			object_type: Some(ObjectType::Note),
			verb: Some(Verb::Post),
			actor: Some("https://instance/alice".into()),
			tags: vec![Tag { object_type: Some(ObjectType::Mention), url: Some("https://instance/bob".into()) }],
			..Default::default()
		};

		let translated = translate_ids(&state, &registry, &activity, "push").await.unwrap();
		assert_eq!(translated.tags[0].url.as_deref(), Some("push:bob"));
	}

	#[tokio::test]
	async fn translate_ids_leaves_ids_already_in_the_destination_namespace_untouched() {
		let (state, registry) = test_state();
		let activity = Activity {
			id: Some("push:post1".into()),
			object_type: Some(ObjectType::Note),
			verb: Some(Verb::Post),
			actor: Some("push:alice".into()),
			..Default::default()
		};

		let translated = translate_ids(&state, &registry, &activity, "push").await.unwrap();
		assert_eq!(translated.id.as_deref(), Some("push:post1"));
		assert_eq!(translated.actor_id(), Some("push:alice"));
	}
}

// vim: ts=4
