//! The canonical activity model (`Activity`) and the three persisted entities
//! built on top of it (`Object`, `User`, `Follower`).
//!
//! Every bridged protocol's native wire format is translated to and from
//! `Activity` at the plugin boundary; everything inside the router operates
//! on this type only.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::{ClResult, Error};
use crate::types::{Target, Timestamp};

/// Either a bare id reference or a fully embedded record. Most AS1 fields
/// accept both forms and the router treats them uniformly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdOrObject {
	Id(Box<str>),
	Object(Box<Activity>),
}

impl IdOrObject {
	pub fn id(&self) -> &str {
		match self {
			IdOrObject::Id(id) => id,
			IdOrObject::Object(obj) => obj.id.as_deref().unwrap_or_default(),
		}
	}

	pub fn as_object(&self) -> Option<&Activity> {
		match self {
			IdOrObject::Object(obj) => Some(obj),
			IdOrObject::Id(_) => None,
		}
	}

	pub fn is_bare_id(&self) -> bool {
		matches!(self, IdOrObject::Id(_))
	}
}

impl From<&str> for IdOrObject {
	fn from(id: &str) -> Self {
		IdOrObject::Id(id.into())
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectType {
	Activity,
	Note,
	Article,
	Comment,
	Person,
	Application,
	Group,
	Organization,
	Service,
	Mention,
}

impl ObjectType {
	pub fn is_actor(self) -> bool {
		matches!(
			self,
			ObjectType::Person
				| ObjectType::Application
				| ObjectType::Group
				| ObjectType::Organization
				| ObjectType::Service
		)
	}

	/// A "bare object" is content with no verb: a note/article/comment, or an
	/// actor profile posted directly rather than wrapped in an activity.
	pub fn is_bare_object(self) -> bool {
		matches!(self, ObjectType::Note | ObjectType::Article | ObjectType::Comment) || self.is_actor()
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verb {
	Post,
	Update,
	Delete,
	Follow,
	StopFollowing,
	Accept,
	Like,
	Share,
	Block,
	Undo,
}

pub const SUPPORTED_VERBS: &[Verb] = &[
	Verb::Post,
	Verb::Update,
	Verb::Delete,
	Verb::Follow,
	Verb::StopFollowing,
	Verb::Accept,
	Verb::Like,
	Verb::Share,
	Verb::Block,
	Verb::Undo,
];

/// A mention or other tagged reference carried in an activity's `tags[]`.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tag {
	#[serde(rename = "objectType")]
	pub object_type: Option<ObjectType>,
	pub url: Option<Box<str>>,
}

/// The canonical AS1-like activity record. Any id-bearing field may carry
/// either a bare id or a fully embedded record; see [`IdOrObject`].
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Activity {
	pub id: Option<Box<str>>,
	#[serde(rename = "objectType")]
	pub object_type: Option<ObjectType>,
	pub verb: Option<Verb>,

	pub actor: Option<IdOrObject>,
	pub author: Option<IdOrObject>,
	pub object: Option<IdOrObject>,

	#[serde(rename = "inReplyTo")]
	pub in_reply_to: Option<IdOrObject>,
	#[serde(default)]
	pub to: Vec<Box<str>>,
	#[serde(default)]
	pub cc: Vec<Box<str>>,
	#[serde(default)]
	pub tags: Vec<Tag>,

	#[serde(rename = "displayName")]
	pub display_name: Option<Box<str>>,
	pub summary: Option<Box<str>>,
	pub content: Option<Box<str>>,
	pub image: Option<Box<str>>,
	pub url: Option<Box<str>>,
}

impl Activity {
	/// `obj.as1.id` in the spec's terms: the activity's own id, falling back
	/// to nothing if it was never set.
	pub fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	pub fn actor_id(&self) -> Option<&str> {
		self.actor.as_ref().map(IdOrObject::id)
	}

	pub fn object_id(&self) -> Option<&str> {
		self.object.as_ref().map(IdOrObject::id)
	}

	pub fn is_bare_object(&self) -> bool {
		self.verb.is_none() && self.object_type.map(ObjectType::is_bare_object).unwrap_or(false)
	}
}

/// The well-known pseudo-id meaning "any recipient"; excluded from
/// single-recipient DM detection and from direct-target scanning.
pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Lifecycle status of a persisted [`Object`]. See the module doc for the
/// invariants relating this to `undelivered`/`delivered`/`failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
	New,
	#[serde(rename = "in progress")]
	InProgress,
	Complete,
	Failed,
	Ignored,
}

/// The persisted form of an activity or a bare object, plus its federation
/// delivery bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Object {
	pub id: Box<str>,
	pub source_protocol: Option<Box<str>>,
	pub our_as1: Option<Activity>,
	/// Opaque protocol-native representations, keyed by protocol label.
	#[serde(default)]
	pub native: HashMap<Box<str>, serde_json::Value>,

	#[serde(default)]
	pub users: BTreeSet<Box<str>>,
	#[serde(default)]
	pub notify: BTreeSet<Box<str>>,
	#[serde(default)]
	pub feed: BTreeSet<Box<str>>,

	pub status: ObjectStatus,
	#[serde(default)]
	pub undelivered: Vec<Target>,
	#[serde(default)]
	pub delivered: Vec<Target>,
	#[serde(default)]
	pub failed: Vec<Target>,

	pub deleted: bool,
	pub updated: Timestamp,

	/// True if this `Object` was freshly created by the current `load`/receive
	/// call rather than read from storage. Not persisted.
	#[serde(skip)]
	pub new: bool,
	/// True if a refetch produced content differing from the previously
	/// stored canonical form. Not persisted.
	#[serde(skip)]
	pub changed: bool,
}

impl Object {
	pub fn new(id: impl Into<Box<str>>) -> Self {
		Object {
			id: id.into(),
			source_protocol: None,
			our_as1: None,
			native: HashMap::new(),
			users: BTreeSet::new(),
			notify: BTreeSet::new(),
			feed: BTreeSet::new(),
			status: ObjectStatus::New,
			undelivered: Vec::new(),
			delivered: Vec::new(),
			failed: Vec::new(),
			deleted: false,
			updated: Timestamp::now(),
			new: true,
			changed: false,
		}
	}

	/// Recomputes `status` from the three target lists per the invariant in
	/// the data model: complete if fully delivered, failed if every target
	/// failed, ignored if there was never anything to deliver.
	pub fn recompute_status(&mut self) {
		if !self.undelivered.is_empty() {
			self.status = ObjectStatus::InProgress;
		} else if !self.delivered.is_empty() {
			self.status = ObjectStatus::Complete;
		} else if !self.failed.is_empty() {
			self.status = ObjectStatus::Failed;
		} else {
			self.status = ObjectStatus::Ignored;
		}
	}

	/// Validates the invariants from the data model section: the three
	/// target lists are pairwise disjoint (on `undelivered`) and `status`
	/// matches the rule used by [`Self::recompute_status`].
	pub fn validate_invariants(&self) -> ClResult<()> {
		let undelivered: BTreeSet<&Target> = self.undelivered.iter().collect();
		let delivered: BTreeSet<&Target> = self.delivered.iter().collect();
		let failed: BTreeSet<&Target> = self.failed.iter().collect();

		if !undelivered.is_disjoint(&delivered) {
			return Err(Error::Internal(format!(
				"object {}: undelivered and delivered overlap",
				self.id
			)));
		}
		if !undelivered.is_disjoint(&failed) {
			return Err(Error::Internal(format!(
				"object {}: undelivered and failed overlap",
				self.id
			)));
		}

		let expected = match self.status {
			ObjectStatus::Complete => self.undelivered.is_empty() && !self.delivered.is_empty(),
			ObjectStatus::Failed => {
				self.undelivered.is_empty() && self.delivered.is_empty() && !self.failed.is_empty()
			}
			ObjectStatus::Ignored => {
				self.undelivered.is_empty() && self.delivered.is_empty() && self.failed.is_empty()
			}
			ObjectStatus::New | ObjectStatus::InProgress => true,
		};
		if !expected {
			return Err(Error::Internal(format!(
				"object {}: status {:?} inconsistent with target lists",
				self.id, self.status
			)));
		}
		Ok(())
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
	Blocked,
}

/// A bridged user, either directly enrolled or discovered on first
/// reference from some other user's activity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
	pub id: Box<str>,
	pub protocol: Box<str>,
	pub handle: Option<Box<str>>,
	#[serde(default)]
	pub copies: Vec<Target>,
	#[serde(default)]
	pub enabled_protocols: BTreeSet<Box<str>>,
	pub status: Option<UserStatus>,
	pub use_instead: Option<Box<str>>,
	pub manual_opt_out: bool,
	pub direct: bool,
}

impl User {
	pub fn new(id: impl Into<Box<str>>, protocol: impl Into<Box<str>>) -> Self {
		User {
			id: id.into(),
			protocol: protocol.into(),
			handle: None,
			copies: Vec::new(),
			enabled_protocols: BTreeSet::new(),
			status: None,
			use_instead: None,
			manual_opt_out: false,
			direct: false,
		}
	}

	pub fn is_blocked(&self) -> bool {
		self.manual_opt_out || matches!(self.status, Some(UserStatus::Blocked))
	}

	/// The copy target this user has in `protocol`, if any.
	pub fn copy_in(&self, protocol: &str) -> Option<&Target> {
		self.copies.iter().find(|t| t.protocol.as_ref() == protocol)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowerStatus {
	Active,
	Inactive,
}

/// A directed follow relationship. Invariant: at most one active edge per
/// ordered (from, to) pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Follower {
	pub from: Box<str>,
	pub to: Box<str>,
	pub status: FollowerStatus,
	/// Id of the `Follow` object that created or most recently touched this
	/// edge.
	pub follow: Option<Box<str>>,
	pub updated: Timestamp,
}

impl Follower {
	pub fn new(from: impl Into<Box<str>>, to: impl Into<Box<str>>) -> Self {
		Follower {
			from: from.into(),
			to: to.into(),
			status: FollowerStatus::Active,
			follow: None,
			updated: Timestamp::now(),
		}
	}

	pub fn is_active(&self) -> bool {
		self.status == FollowerStatus::Active
	}
}


// vim: ts=4
