//! The protocol abstraction, identifier translation, and the
//! receive/deliver pipeline connecting bridged social protocols.
//!
//! [`protocol`] defines the `Protocol` trait and the registry that resolves
//! an id or handle to the protocol owning it. [`ids`] mints and reverses
//! bridge-owned identifiers. [`loader`] fetches and caches objects.
//! [`targets`] plans delivery audiences. [`receive`] is the entry point for
//! an inbound activity. [`redirect`] backs the public `/r/<url>` endpoint.
//! [`task`] wires the pipeline into the durable scheduler.

pub mod dedup;
pub mod ids;
pub mod loader;
pub mod protocol;
pub mod receive;
pub mod redirect;
pub mod targets;
pub mod task;

pub mod prelude {
	pub use crate::dedup::Dedup;
	pub use crate::ids::{bridge_id, unbridge_id};
	pub use crate::loader::{load, RemoteMode};
	pub use crate::protocol::{Protocol, ProtocolRegistry};
	pub use crate::receive::{receive, Received};
	pub use crate::redirect::{redirect, RedirectOutcome};
	pub use crate::task::{ReceiveTask, SendTask};
}

// vim: ts=4
