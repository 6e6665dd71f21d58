//! Value types used throughout the bridge that aren't part of the activity
//! model itself: timestamps, protocol targets, and PATCH semantics.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::SystemTime;

// Timestamp //
//***********//
#[derive(Clone, Copy, Debug, Default, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64)
	}

	pub fn from_now(delta: i64) -> Timestamp {
		Timestamp(Self::now().0 + delta)
	}

	pub fn add_seconds(&self, seconds: i64) -> Timestamp {
		Timestamp(self.0 + seconds)
	}

	/// Age of this timestamp in seconds, relative to now. Negative for
	/// timestamps in the future.
	pub fn age_secs(&self) -> i64 {
		Self::now().0 - self.0
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl PartialEq for Timestamp {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Timestamp {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.0.cmp(&other.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

// Target //
//********//
/// A single delivery or reference endpoint: a protocol label paired with the
/// uri that addresses something in that protocol.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
	pub protocol: Box<str>,
	pub uri: Box<str>,
}

impl Target {
	pub fn new(protocol: impl Into<Box<str>>, uri: impl Into<Box<str>>) -> Self {
		Target { protocol: protocol.into(), uri: uri.into() }
	}
}

impl std::fmt::Display for Target {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.protocol, self.uri)
	}
}

// Patch<T> - For PATCH semantics //
//**********************************//
/// Three-state field update used by partial-update store calls:
/// - `Undefined`: field absent from the request, leave the stored value alone
/// - `Null`: field explicitly cleared
/// - `Value(T)`: field set to this value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Patch<T> {
	#[default]
	Undefined,
	Null,
	Value(T),
}

impl<T> Patch<T> {
	pub fn is_undefined(&self) -> bool {
		matches!(self, Patch::Undefined)
	}

	pub fn value(&self) -> Option<&T> {
		match self {
			Patch::Value(v) => Some(v),
			_ => None,
		}
	}

	pub fn map<U, F>(self, f: F) -> Patch<U>
	where
		F: FnOnce(T) -> U,
	{
		match self {
			Patch::Undefined => Patch::Undefined,
			Patch::Null => Patch::Null,
			Patch::Value(v) => Patch::Value(f(v)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timestamp_ordering() {
		let a = Timestamp(10);
		let b = Timestamp(20);
		assert!(a < b);
		assert_eq!(a.add_seconds(10), b);
	}

	#[test]
	fn target_equality_is_field_wise() {
		let a = Target::new("f", "https://inst/alice");
		let b = Target::new("f", "https://inst/alice");
		let c = Target::new("a", "https://inst/alice");
		assert_eq!(a, b);
		assert_ne!(a, c);
	}

	#[test]
	fn patch_default_is_undefined() {
		let p: Patch<Box<str>> = Patch::default();
		assert!(p.is_undefined());
	}
}

// vim: ts=4
