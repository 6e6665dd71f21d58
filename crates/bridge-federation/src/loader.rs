//! Fetch/load engine: turns an id into a persisted, up-to-date `Object`,
//! deciding whether a cached copy is fresh enough or a remote refetch is
//! required.

use bridge_core::prelude::App;
use bridge_types::model::Object;
use bridge_types::prelude::*;

use crate::protocol::ProtocolRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteMode {
	/// Always refetch, regardless of what's cached.
	Always,
	/// Never fetch; fail with `NotFound` if nothing is cached.
	Never,
	/// Fetch only if nothing is cached or the cached copy is older than the
	/// configured refresh age.
	Auto,
}

/// Loads the object at `id`, consulting the store first and falling back to
/// a protocol-native fetch per `remote`. On a successful fetch the object is
/// re-persisted and `changed` is set if the canonical form differs from
/// what was stored.
pub async fn load(state: &App, registry: &ProtocolRegistry, id: &str, remote: RemoteMode) -> ClResult<Object> {
	let cached = state.store.get_object(id).await?;

	let needs_fetch = match remote {
		RemoteMode::Always => true,
		RemoteMode::Never => false,
		RemoteMode::Auto => match &cached {
			None => true,
			Some(obj) => obj.updated.age_secs() > state.config.refresh_age_secs,
		},
	};

	if !needs_fetch {
		return cached.ok_or(Error::NotFound);
	}

	let protocol = registry.for_id(id)?;
	let activity = protocol.fetch(&state.http, id).await?;

	let serialized_len = serde_json::to_vec(&activity)?.len();
	if serialized_len > state.config.object_size_cap {
		return Err(Error::ValidationError(format!(
			"fetched object {id} is {serialized_len} bytes, exceeding the {}-byte cap",
			state.config.object_size_cap
		)));
	}

	let was_cached = cached.is_some();
	let mut object = cached.unwrap_or_else(|| Object::new(id));
	let changed = object.our_as1.as_ref().map(|prev| serde_json::to_value(prev).ok())
		!= Some(serde_json::to_value(&activity).ok());

	object.source_protocol = Some(protocol.label().into());
	object.our_as1 = Some(activity);
	object.updated = Timestamp::now();
	object.new = !was_cached;
	object.changed = changed;

	state.store.put_object(&object).await?;
	Ok(object)
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
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	struct CountingWeb {
		fetches: AtomicUsize,
	}

	#[async_trait]
	impl Protocol for CountingWeb {
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
		async fn fetch(&self, _http: &bridge_core::request::HttpClient, id: &str) -> ClResult<bridge_types::model::Activity> {
			self.fetches.fetch_add(1, Ordering::SeqCst);
			Ok(bridge_types::model::Activity { id: Some(id.into()), ..Default::default() })
		}
		async fn deliver(
			&self,
			_http: &bridge_core::request::HttpClient,
			_target: &str,
			_activity: &bridge_types::model::Activity,
		) -> ClResult<()> {
			Ok(())
		}
	}

	fn test_config() -> Config {
		Config {
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
		}
	}

	#[tokio::test]
	async fn auto_mode_skips_fetch_when_cache_is_fresh() {
		let store = MemoryStore::new();
		let task_store = InMemoryTaskStore::new();
		let state = AppBuilder::new(test_config(), store, task_store).build().unwrap();

		let web = Arc::new(CountingWeb { fetches: AtomicUsize::new(0) });
		let mut registry = ProtocolRegistry::new(16);
		registry.register(web.clone());

		let id = "https://example.com/post/1";
		load(&state, &registry, id, RemoteMode::Always).await.unwrap();
		assert_eq!(web.fetches.load(Ordering::SeqCst), 1);

		load(&state, &registry, id, RemoteMode::Auto).await.unwrap();
		assert_eq!(web.fetches.load(Ordering::SeqCst), 1, "fresh cache shouldn't trigger a refetch");
	}

	#[tokio::test]
	async fn never_mode_fails_on_a_cold_cache() {
		let store = MemoryStore::new();
		let task_store = InMemoryTaskStore::new();
		let state = AppBuilder::new(test_config(), store, task_store).build().unwrap();
		let registry = ProtocolRegistry::new(16);

		let result = load(&state, &registry, "https://example.com/post/1", RemoteMode::Never).await;
		assert!(matches!(result, Err(Error::NotFound)));
	}
}

// vim: ts=4
