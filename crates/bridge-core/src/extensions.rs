//! Type-erased extension map for [`crate::app::AppState`].
//!
//! Lets the federation crate and protocol plugins register their own state
//! (the protocol registry, caches) without coupling `AppState` to their
//! concrete types.

use std::any::{Any, TypeId};
use std::collections::HashMap;

pub struct Extensions {
	map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
	pub fn new() -> Self {
		Self { map: HashMap::new() }
	}

	pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) {
		self.map.insert(TypeId::of::<T>(), Box::new(val));
	}

	pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
		self.map.get(&TypeId::of::<T>())?.downcast_ref::<T>()
	}
}

impl Default for Extensions {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_a_registered_value() {
		let mut ext = Extensions::new();
		ext.insert(42u32);
		ext.insert("hello".to_string());
		assert_eq!(ext.get::<u32>(), Some(&42));
		assert_eq!(ext.get::<String>(), Some(&"hello".to_string()));
		assert_eq!(ext.get::<i64>(), None);
	}
}

// vim: ts=4
