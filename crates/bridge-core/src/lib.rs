//! Application plumbing for the federation bridge: state, configuration,
//! the durable task scheduler, and an outbound HTTP client. Protocol logic
//! lives in the federation crate; this crate knows nothing about
//! activities, only about running and persisting work.

pub mod app;
pub mod config;
pub mod extensions;
pub mod request;
pub mod scheduler;

pub mod prelude {
	pub use crate::app::{App, AppBuilder, AppState};
	pub use crate::config::Config;
	pub use bridge_types::prelude::*;
}

// vim: ts=4
