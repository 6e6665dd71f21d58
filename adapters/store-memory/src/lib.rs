//! Non-durable [`Store`] backed by in-process maps. Used by the test
//! harness and by `--local-development` deployments where persistence
//! across restarts doesn't matter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use bridge_types::error::ClResult;
use bridge_types::model::{Follower, Object, User};
use bridge_types::store::{FollowerFilter, Store};

#[derive(Default)]
pub struct MemoryStore {
	objects: RwLock<HashMap<Box<str>, Object>>,
	users: RwLock<HashMap<Box<str>, User>>,
	followers: RwLock<HashMap<(Box<str>, Box<str>), Follower>>,
}

impl MemoryStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn get_object(&self, id: &str) -> ClResult<Option<Object>> {
		Ok(self.objects.read().get(id).cloned())
	}

	async fn put_object(&self, object: &Object) -> ClResult<()> {
		self.objects.write().insert(object.id.clone(), object.clone());
		Ok(())
	}

	async fn delete_object(&self, id: &str) -> ClResult<()> {
		if let Some(object) = self.objects.write().get_mut(id) {
			object.deleted = true;
		}
		Ok(())
	}

	async fn get_user(&self, id: &str) -> ClResult<Option<User>> {
		Ok(self.users.read().get(id).cloned())
	}

	async fn put_user(&self, user: &User) -> ClResult<()> {
		self.users.write().insert(user.id.clone(), user.clone());
		Ok(())
	}

	async fn find_user_by_copy(&self, protocol: &str, uri: &str) -> ClResult<Option<User>> {
		Ok(self.users.read().values().find(|u| u.copy_in(protocol).is_some_and(|t| t.uri.as_ref() == uri)).cloned())
	}

	async fn get_follower(&self, from: &str, to: &str) -> ClResult<Option<Follower>> {
		Ok(self.followers.read().get(&(from.into(), to.into())).cloned())
	}

	async fn put_follower(&self, follower: &Follower) -> ClResult<()> {
		self.followers.write().insert((follower.from.clone(), follower.to.clone()), follower.clone());
		Ok(())
	}

	async fn list_followers(&self, actor_id: &str, filter: FollowerFilter) -> ClResult<Vec<Follower>> {
		Ok(self
			.followers
			.read()
			.values()
			.filter(|f| f.to.as_ref() == actor_id && (!filter.active_only || f.is_active()))
			.cloned()
			.collect())
	}

	async fn list_following(&self, actor_id: &str, filter: FollowerFilter) -> ClResult<Vec<Follower>> {
		Ok(self
			.followers
			.read()
			.values()
			.filter(|f| f.from.as_ref() == actor_id && (!filter.active_only || f.is_active()))
			.cloned()
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn round_trips_an_object() {
		let store = MemoryStore::new();
		let obj = Object::new("https://inst/note/1");
		store.put_object(&obj).await.unwrap();
		let got = store.get_object("https://inst/note/1").await.unwrap().unwrap();
		assert_eq!(got.id.as_ref(), "https://inst/note/1");

		store.delete_object("https://inst/note/1").await.unwrap();
		assert!(store.get_object("https://inst/note/1").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn lists_followers_and_following_separately() {
		let store = MemoryStore::new();
		store.put_follower(&Follower::new("alice", "bob")).await.unwrap();
		store.put_follower(&Follower::new("carol", "bob")).await.unwrap();

		let bobs_followers = store.list_followers("bob", FollowerFilter::default()).await.unwrap();
		assert_eq!(bobs_followers.len(), 2);

		let alices_following = store.list_following("alice", FollowerFilter::default()).await.unwrap();
		assert_eq!(alices_following.len(), 1);
		assert_eq!(alices_following[0].to.as_ref(), "bob");
	}
}

// vim: ts=4
