//! The `Protocol` abstraction and a registry that resolves an id or handle
//! to the protocol that owns it.
//!
//! Concrete protocols (the website-centric W, the actor-inbox F, the
//! DID-repo A, and anything a plugin adds) implement this trait; the
//! registry and the rest of the pipeline only ever see `Arc<dyn Protocol>`.

use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use bridge_core::request::HttpClient;
use bridge_types::model::Activity;
use bridge_types::prelude::*;

/// The handle shape a protocol displays and expects, consulted by
/// [`crate::ids::translate_handle`] (§4.2). Most bridged protocols speak an
/// actor-inbox-style `user@instance` handle, the default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleStyle {
	/// Handles are reconstructed as a profile url, `https://<instance>/@<user>`.
	Web,
	/// `user@instance`, the common case.
	ActorInbox,
	/// Dot-joined, `@`-free form used by did-repo/nostr-style protocols.
	DidRepo,
}

/// A bridgeable social protocol. Implementations carry no state beyond what
/// they need to recognize their own identifiers and speak their own wire
/// format; the registry handles caching and tie-breaking, the loader and
/// delivery planner handle everything protocol-agnostic.
#[async_trait]
pub trait Protocol: Send + Sync {
	/// Stable machine label used as a map key and in persisted data
	/// (`Object::source_protocol`, `User::protocol`, `Target::protocol`).
	fn label(&self) -> &'static str;

	/// Short subdomain-safe abbreviation used when minting bridge-owned ids,
	/// e.g. `"ap"` for `https://ap.bridge.example/...`.
	fn abbrev(&self) -> &'static str;

	/// Whether `id` is a native identifier for this protocol.
	fn owns_id(&self, id: &str) -> bool;

	/// Whether `handle` (a `user@domain`-style or bare-domain user handle)
	/// belongs to this protocol.
	fn owns_handle(&self, handle: &str) -> bool;

	/// Fetches and translates the object at `id` to the canonical activity
	/// model. Wire format and auth are entirely this protocol's concern.
	async fn fetch(&self, http: &HttpClient, id: &str) -> ClResult<Activity>;

	/// Delivers `activity` to `target`, returning `Ok(())` only once the
	/// remote has durably accepted it.
	async fn deliver(&self, http: &HttpClient, target: &str, activity: &Activity) -> ClResult<()>;

	/// Push-style protocols (§4.1's `HAS_COPIES`) require a mirror ("copy")
	/// of a user to be proactively created on this protocol before it can
	/// be addressed; translating an id to such a protocol has to consult
	/// the user's stored copy rather than a deterministic wrap. Defaults to
	/// `false`, the common case for pull-style protocols.
	fn has_copies(&self) -> bool {
		false
	}

	/// Whether this protocol's `follow` verb expects an explicit `accept`
	/// activity in response. Protocols that don't (`false`) get one
	/// synthesized on their behalf by the receive pipeline's follow
	/// handler.
	fn has_follow_accepts(&self) -> bool {
		false
	}

	/// The handle shape this protocol expects a translated handle to take.
	/// Defaults to [`HandleStyle::ActorInbox`], the common case.
	fn handle_style(&self) -> HandleStyle {
		HandleStyle::ActorInbox
	}
}

/// Resolves an id or handle to the protocol that owns it, trying
/// registered protocols in registration order and caching the result.
///
/// Registration order is the tie-break: earlier-registered protocols win
/// when more than one claims an id, so deployments register their most
/// authoritative protocol first.
pub struct ProtocolRegistry {
	protocols: Vec<Arc<dyn Protocol>>,
	id_cache: Mutex<LruCache<Box<str>, usize>>,
}

impl ProtocolRegistry {
	pub fn new(cache_capacity: usize) -> Self {
		let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
		Self { protocols: Vec::new(), id_cache: Mutex::new(LruCache::new(capacity)) }
	}

	pub fn register(&mut self, protocol: Arc<dyn Protocol>) {
		self.protocols.push(protocol);
	}

	pub fn by_label(&self, label: &str) -> ClResult<Arc<dyn Protocol>> {
		self.protocols
			.iter()
			.find(|p| p.label() == label)
			.cloned()
			.ok_or_else(|| Error::Unroutable(format!("no protocol registered for label {label}")))
	}

	/// Resolves a bot-actor subdomain abbreviation (see [`crate::ids::bot_actor_id`])
	/// back to the protocol it names.
	pub fn by_abbrev(&self, abbrev: &str) -> ClResult<Arc<dyn Protocol>> {
		self.protocols
			.iter()
			.find(|p| p.abbrev() == abbrev)
			.cloned()
			.ok_or_else(|| Error::Unroutable(format!("no protocol registered for abbrev {abbrev}")))
	}

	/// Resolves `id` to the protocol that owns it. Unroutable if no
	/// registered protocol claims it.
	pub fn for_id(&self, id: &str) -> ClResult<Arc<dyn Protocol>> {
		if let Some(&idx) = self.id_cache.lock().get(id) {
			if let Some(p) = self.protocols.get(idx) {
				return Ok(p.clone());
			}
		}

		for (idx, protocol) in self.protocols.iter().enumerate() {
			if protocol.owns_id(id) {
				self.id_cache.lock().put(id.into(), idx);
				return Ok(protocol.clone());
			}
		}

		Err(Error::Unroutable(id.to_string()))
	}

	pub fn for_handle(&self, handle: &str) -> ClResult<Arc<dyn Protocol>> {
		self.protocols
			.iter()
			.find(|p| p.owns_handle(handle))
			.cloned()
			.ok_or_else(|| Error::Unroutable(handle.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

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
			id.starts_with("https://") && !id.contains("/users/")
		}
		fn owns_handle(&self, handle: &str) -> bool {
			!handle.contains('@')
		}
		async fn fetch(&self, _http: &HttpClient, _id: &str) -> ClResult<Activity> {
			Err(Error::Unroutable("fetch not implemented in test protocol".into()))
		}
		async fn deliver(&self, _http: &HttpClient, _target: &str, _activity: &Activity) -> ClResult<()> {
			Ok(())
		}
	}

	struct ActivityPub;
	#[async_trait]
	impl Protocol for ActivityPub {
		fn label(&self) -> &'static str {
			"activitypub"
		}
		fn abbrev(&self) -> &'static str {
			"ap"
		}
		fn owns_id(&self, id: &str) -> bool {
			id.contains("/users/")
		}
		fn owns_handle(&self, handle: &str) -> bool {
			handle.contains('@')
		}
		async fn fetch(&self, _http: &HttpClient, _id: &str) -> ClResult<Activity> {
			Err(Error::Unroutable("fetch not implemented in test protocol".into()))
		}
		async fn deliver(&self, _http: &HttpClient, _target: &str, _activity: &Activity) -> ClResult<()> {
			Ok(())
		}
	}

	fn registry() -> ProtocolRegistry {
		let mut reg = ProtocolRegistry::new(16);
		reg.register(Arc::new(Web));
		reg.register(Arc::new(ActivityPub));
		reg
	}

	#[test]
	fn resolves_to_the_first_protocol_that_claims_the_id() {
		let reg = registry();
		assert_eq!(reg.for_id("https://example.com/post/1").unwrap().label(), "web");
		assert_eq!(reg.for_id("https://instance/users/alice").unwrap().label(), "activitypub");
	}

	#[test]
	fn unclaimed_id_is_unroutable() {
		let reg = registry();
		assert!(matches!(reg.for_id("gopher://nowhere"), Err(Error::Unroutable(_))));
	}

	#[test]
	fn resolves_handles_by_shape() {
		let reg = registry();
		assert_eq!(reg.for_handle("alice@instance").unwrap().label(), "activitypub");
		assert_eq!(reg.for_handle("example.com").unwrap().label(), "web");
	}
}

// vim: ts=4
