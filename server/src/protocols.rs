//! Protocol registration point. Concrete protocol plugins (wire formats for
//! actor-inbox federation, DID-repo networks, and so on) are out of scope
//! here — this only builds the empty registry they plug into.

use bridge_core::config::Config;
use bridge_federation::prelude::ProtocolRegistry;

pub fn build_registry(config: &Config) -> ProtocolRegistry {
	ProtocolRegistry::new(config.protocol_resolution_capacity)
}

// vim: ts=4
