//! Builds the application state from environment configuration, choosing
//! in-memory adapters under `LOCAL_DEVELOPMENT=1` and the durable sqlite
//! adapters otherwise.

use std::path::Path;
use std::sync::Arc;

use bridge_core::app::{App, AppBuilder};
use bridge_core::config::Config;
use bridge_core::scheduler::TaskStore;
use bridge_federation::prelude::{Dedup, ReceiveTask, SendTask};
use bridge_types::prelude::*;
use bridge_types::store::Store;

use crate::protocols::build_registry;

/// Loads configuration, wires up storage and the protocol registry, and
/// starts the scheduler. Fails fast on misconfiguration or a storage
/// backend that can't be reached.
pub async fn bootstrap() -> ClResult<App> {
	let config = Config::from_env()?;
	bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: Config) -> ClResult<App> {
	let registry = build_registry(&config);
	let dedup = Dedup::new(config.seen_ids_capacity);

	let (store, task_store): (Arc<dyn Store>, Arc<dyn TaskStore<App>>) = if config.local_development {
		info!("local development mode: using in-memory storage");
		(bridge_store_memory::MemoryStore::new(), bridge_core::scheduler::InMemoryTaskStore::new())
	} else {
		let sqlite = Arc::new(bridge_store_sqlite::SqliteStore::new(Path::new(config.database_url.as_ref())).await?);
		(sqlite.clone(), sqlite)
	};

	let state = AppBuilder::new(config, store, task_store).extension(registry).extension(dedup).build()?;

	state.scheduler.register::<ReceiveTask>()?;
	state.scheduler.register::<SendTask>()?;

	Ok(state)
}

// vim: ts=4
