//! HTTP surface and task-runner wiring for the federation bridge binary.
//! `bootstrap` builds an `App` from environment configuration and the
//! configured protocol set; `routes` exposes it over axum.

pub mod bootstrap;
pub mod middleware;
pub mod protocols;
pub mod routes;

pub mod prelude {
	pub use bridge_core::prelude::*;
}

// vim: ts=4
