//! Application state shared across the HTTP surface and the task runner.

use std::sync::Arc;

use bridge_types::extract::HasDispatcherSecret;
use bridge_types::prelude::*;
use bridge_types::store::Store;

use crate::config::Config;
use crate::extensions::Extensions;
use crate::request::HttpClient;
use crate::scheduler::Scheduler;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	pub scheduler: Arc<Scheduler<App>>,
	pub store: Arc<dyn Store>,
	pub http: HttpClient,
	pub config: Config,

	/// Type-erased slot for protocol-registry and cache state owned by the
	/// federation crate, so this crate doesn't depend on it.
	pub extensions: Extensions,
}

impl AppState {
	pub fn ext<T: Send + Sync + 'static>(&self) -> ClResult<&T> {
		self.extensions
			.get::<T>()
			.ok_or_else(|| Error::Internal(format!("extension {} not registered", std::any::type_name::<T>())))
	}
}

impl HasDispatcherSecret for AppState {
	fn dispatcher_secret(&self) -> &str {
		&self.config.dispatcher_secret
	}
}

/// The state handle threaded through axum handlers and scheduled tasks.
pub type App = Arc<AppState>;

/// Builds an [`AppState`] from a config and the adapters chosen by the
/// binary (`store-sqlite` in production, `store-memory` under
/// `--local-development` or in tests).
pub struct AppBuilder {
	config: Config,
	store: Arc<dyn Store>,
	task_store: Arc<dyn crate::scheduler::TaskStore<App>>,
	extensions: Extensions,
}

impl AppBuilder {
	pub fn new(config: Config, store: Arc<dyn Store>, task_store: Arc<dyn crate::scheduler::TaskStore<App>>) -> Self {
		Self { config, store, task_store, extensions: Extensions::new() }
	}

	/// Registers federation-crate state (protocol registry, caches) before
	/// the app state is finalized, so handlers see it via [`AppState::ext`].
	pub fn extension<T: Send + Sync + 'static>(mut self, value: T) -> Self {
		self.extensions.insert(value);
		self
	}

	pub fn build(self) -> ClResult<App> {
		let http = HttpClient::new()?;
		let scheduler = Scheduler::new(self.task_store);

		let state: App = Arc::new(AppState {
			scheduler,
			store: self.store,
			http,
			config: self.config,
			extensions: self.extensions,
		});

		state.scheduler.start(state.clone());
		Ok(state)
	}
}

// vim: ts=4
