//! The receive pipeline's seen-ids cache (§4.4 step 3, §5 "Locks"): a
//! bounded LRU behind a single mutex, consulted so a replayed activity id
//! short-circuits to a no-op instead of re-running the full pipeline.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

pub struct Dedup {
	seen: Mutex<LruCache<Box<str>, ()>>,
}

impl Dedup {
	pub fn new(capacity: usize) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
		Self { seen: Mutex::new(LruCache::new(capacity)) }
	}

	/// Records `id` as seen, returning whether it already was. Testable
	/// property 5: replaying the same activity id is a no-op after the
	/// first time it's observed.
	pub fn check_and_insert(&self, id: &str) -> bool {
		let mut seen = self.seen.lock();
		if seen.contains(id) {
			true
		} else {
			seen.put(id.into(), ());
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn the_second_sighting_of_an_id_is_reported_as_seen() {
		let dedup = Dedup::new(16);
		assert!(!dedup.check_and_insert("https://inst/post/1"));
		assert!(dedup.check_and_insert("https://inst/post/1"));
	}

	#[test]
	fn capacity_evicts_the_oldest_entry() {
		let dedup = Dedup::new(1);
		assert!(!dedup.check_and_insert("a"));
		assert!(!dedup.check_and_insert("b"));
		assert!(!dedup.check_and_insert("a"), "evicted by b, so a looks unseen again");
	}
}

// vim: ts=4
