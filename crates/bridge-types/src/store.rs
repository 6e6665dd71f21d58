//! Persistence contract for the three entities the router operates on:
//! objects, users, and follow edges. Adapters (`store-memory`, `store-sqlite`)
//! implement [`Store`]; the router and federation pipeline depend only on
//! the trait.

use async_trait::async_trait;

use crate::error::ClResult;
use crate::model::{Follower, Object, User};

/// Filter for [`Store::list_followers`]/[`Store::list_following`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FollowerFilter {
	pub active_only: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
	async fn get_object(&self, id: &str) -> ClResult<Option<Object>>;
	/// Upserts by `id`. Callers are expected to have already merged
	/// `new`/`changed` bookkeeping into the record they pass in.
	async fn put_object(&self, object: &Object) -> ClResult<()>;
	async fn delete_object(&self, id: &str) -> ClResult<()>;

	async fn get_user(&self, id: &str) -> ClResult<Option<User>>;
	async fn put_user(&self, user: &User) -> ClResult<()>;
	/// Looks up the local user whose `copies` list contains `(protocol, uri)`.
	/// Backs the reverse half of copy-based id translation (§4.2(c)).
	async fn find_user_by_copy(&self, protocol: &str, uri: &str) -> ClResult<Option<User>>;

	async fn get_follower(&self, from: &str, to: &str) -> ClResult<Option<Follower>>;
	async fn put_follower(&self, follower: &Follower) -> ClResult<()>;
	/// Edges where `to == actor_id`, i.e. `actor_id`'s followers.
	async fn list_followers(&self, actor_id: &str, filter: FollowerFilter) -> ClResult<Vec<Follower>>;
	/// Edges where `from == actor_id`, i.e. who `actor_id` follows.
	async fn list_following(&self, actor_id: &str, filter: FollowerFilter) -> ClResult<Vec<Follower>>;
}

// vim: ts=4
