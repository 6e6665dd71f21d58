//! SQLite-backed [`Store`] and [`TaskStore`] implementation for the
//! federation bridge: a single-tenant database holding objects, users,
//! follower edges, and the durable task queue.

mod schema;
mod task;
mod utils;

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool};
use sqlx::Row;

use bridge_types::model::{Follower, FollowerStatus, Object, ObjectStatus, User, UserStatus};
use bridge_types::prelude::*;
use bridge_types::store::{FollowerFilter, Store};

use utils::{collect_res, inspect};

#[derive(Debug)]
pub struct SqliteStore {
	db: SqlitePool,
	dbr: SqlitePool,
}

impl SqliteStore {
	pub async fn new(path: impl AsRef<Path>) -> ClResult<Self> {
		tokio::fs::create_dir_all(path.as_ref())
			.await
			.inspect_err(|err| warn!("failed to create database directory: {err:#?}"))
			.or(Err(Error::DbError))?;
		let db_path = path.as_ref().join("bridge.db");
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(&db_path)
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);

		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts.clone())
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		let dbr = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts.read_only(true))
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		schema::init_db(&db).await.inspect_err(inspect).or(Err(Error::DbError))?;

		Ok(Self { db, dbr })
	}

	pub(crate) fn pool(&self) -> &SqlitePool {
		&self.db
	}
}

fn status_to_char(status: ObjectStatus) -> char {
	match status {
		ObjectStatus::New => 'N',
		ObjectStatus::InProgress => 'I',
		ObjectStatus::Complete => 'C',
		ObjectStatus::Failed => 'F',
		ObjectStatus::Ignored => 'G',
	}
}

fn status_from_char(c: char) -> ClResult<ObjectStatus> {
	Ok(match c {
		'N' => ObjectStatus::New,
		'I' => ObjectStatus::InProgress,
		'C' => ObjectStatus::Complete,
		'F' => ObjectStatus::Failed,
		'G' => ObjectStatus::Ignored,
		other => return Err(Error::Internal(format!("unknown object status char {other}"))),
	})
}

fn csv_from_set(set: &BTreeSet<Box<str>>) -> String {
	set.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(",")
}

fn set_from_csv(s: &str) -> BTreeSet<Box<str>> {
	s.split(',').filter(|s| !s.is_empty()).map(Box::from).collect()
}

fn row_to_object(row: sqlx::sqlite::SqliteRow) -> Result<Object, sqlx::Error> {
	let our_as1: Option<String> = row.try_get("our_as1")?;
	let native: Option<String> = row.try_get("native")?;
	let undelivered: Option<String> = row.try_get("undelivered")?;
	let delivered: Option<String> = row.try_get("delivered")?;
	let failed: Option<String> = row.try_get("failed")?;
	let status: String = row.try_get("status")?;
	let updated: i64 = row.try_get("updated")?;

	Ok(Object {
		id: row.try_get::<String, _>("id")?.into_boxed_str(),
		source_protocol: row.try_get::<Option<String>, _>("source_protocol")?.map(String::into_boxed_str),
		our_as1: our_as1.and_then(|s| serde_json::from_str(&s).ok()),
		native: native.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
		users: set_from_csv(&row.try_get::<Option<String>, _>("users")?.unwrap_or_default()),
		notify: set_from_csv(&row.try_get::<Option<String>, _>("notify")?.unwrap_or_default()),
		feed: set_from_csv(&row.try_get::<Option<String>, _>("feed")?.unwrap_or_default()),
		status: status_from_char(status.chars().next().unwrap_or('N')).unwrap_or(ObjectStatus::New),
		undelivered: undelivered.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
		delivered: delivered.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
		failed: failed.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
		deleted: row.try_get("deleted")?,
		updated: Timestamp(updated),
		new: false,
		changed: false,
	})
}

fn row_to_user(row: sqlx::sqlite::SqliteRow) -> Result<User, sqlx::Error> {
	let copies: Option<String> = row.try_get("copies")?;
	let status: Option<String> = row.try_get("status")?;

	Ok(User {
		id: row.try_get::<String, _>("id")?.into_boxed_str(),
		protocol: row.try_get::<String, _>("protocol")?.into_boxed_str(),
		handle: row.try_get::<Option<String>, _>("handle")?.map(String::into_boxed_str),
		copies: copies.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
		enabled_protocols: set_from_csv(&row.try_get::<Option<String>, _>("enabled_protocols")?.unwrap_or_default()),
		status: status.and_then(|s| if s == "blocked" { Some(UserStatus::Blocked) } else { None }),
		use_instead: row.try_get::<Option<String>, _>("use_instead")?.map(String::into_boxed_str),
		manual_opt_out: row.try_get("manual_opt_out")?,
		direct: row.try_get("direct")?,
	})
}

fn row_to_follower(row: sqlx::sqlite::SqliteRow) -> Result<Follower, sqlx::Error> {
	let status: String = row.try_get("status")?;
	let updated: i64 = row.try_get("updated")?;
	Ok(Follower {
		from: row.try_get::<String, _>("from_id")?.into_boxed_str(),
		to: row.try_get::<String, _>("to_id")?.into_boxed_str(),
		status: if status == "active" { FollowerStatus::Active } else { FollowerStatus::Inactive },
		follow: row.try_get::<Option<String>, _>("follow")?.map(String::into_boxed_str),
		updated: Timestamp(updated),
	})
}

#[async_trait]
impl Store for SqliteStore {
	async fn get_object(&self, id: &str) -> ClResult<Option<Object>> {
		let res = sqlx::query(
			"SELECT id, source_protocol, our_as1, native, users, notify, feed, status, undelivered, delivered, failed, deleted, updated
			FROM objects WHERE id = ?",
		)
		.bind(id)
		.fetch_optional(&self.dbr)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

		match res {
			Some(row) => Ok(Some(row_to_object(row).map_err(|_| Error::DbError)?)),
			None => Ok(None),
		}
	}

	async fn put_object(&self, object: &Object) -> ClResult<()> {
		let our_as1 = serde_json::to_string(&object.our_as1)?;
		let native = serde_json::to_string(&object.native)?;
		let undelivered = serde_json::to_string(&object.undelivered)?;
		let delivered = serde_json::to_string(&object.delivered)?;
		let failed = serde_json::to_string(&object.failed)?;
		let status = status_to_char(object.status).to_string();

		sqlx::query(
			"INSERT INTO objects (id, source_protocol, our_as1, native, users, notify, feed, status, undelivered, delivered, failed, deleted, updated)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				source_protocol=excluded.source_protocol, our_as1=excluded.our_as1, native=excluded.native,
				users=excluded.users, notify=excluded.notify, feed=excluded.feed, status=excluded.status,
				undelivered=excluded.undelivered, delivered=excluded.delivered, failed=excluded.failed,
				deleted=excluded.deleted, updated=excluded.updated",
		)
		.bind(object.id.as_ref())
		.bind(object.source_protocol.as_deref())
		.bind(our_as1)
		.bind(native)
		.bind(csv_from_set(&object.users))
		.bind(csv_from_set(&object.notify))
		.bind(csv_from_set(&object.feed))
		.bind(status)
		.bind(undelivered)
		.bind(delivered)
		.bind(failed)
		.bind(object.deleted)
		.bind(object.updated.0)
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
		Ok(())
	}

	async fn delete_object(&self, id: &str) -> ClResult<()> {
		sqlx::query("UPDATE objects SET deleted = 1 WHERE id = ?")
			.bind(id)
			.execute(&self.db)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		Ok(())
	}

	async fn get_user(&self, id: &str) -> ClResult<Option<User>> {
		let res = sqlx::query(
			"SELECT id, protocol, handle, copies, enabled_protocols, status, use_instead, manual_opt_out, direct
			FROM users WHERE id = ?",
		)
		.bind(id)
		.fetch_optional(&self.dbr)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

		match res {
			Some(row) => Ok(Some(row_to_user(row).map_err(|_| Error::DbError)?)),
			None => Ok(None),
		}
	}

	async fn put_user(&self, user: &User) -> ClResult<()> {
		let copies = serde_json::to_string(&user.copies)?;
		let status = user.status.map(|_| "blocked");

		let mut tx = self.db.begin().await.inspect_err(inspect).map_err(|_| Error::DbError)?;

		sqlx::query(
			"INSERT INTO users (id, protocol, handle, copies, enabled_protocols, status, use_instead, manual_opt_out, direct)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				protocol=excluded.protocol, handle=excluded.handle, copies=excluded.copies,
				enabled_protocols=excluded.enabled_protocols, status=excluded.status,
				use_instead=excluded.use_instead, manual_opt_out=excluded.manual_opt_out, direct=excluded.direct",
		)
		.bind(user.id.as_ref())
		.bind(user.protocol.as_ref())
		.bind(user.handle.as_deref())
		.bind(copies)
		.bind(csv_from_set(&user.enabled_protocols))
		.bind(status)
		.bind(user.use_instead.as_deref())
		.bind(user.manual_opt_out)
		.bind(user.direct)
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

		sqlx::query("DELETE FROM user_copies WHERE user_id = ?")
			.bind(user.id.as_ref())
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		for copy in &user.copies {
			sqlx::query("INSERT OR IGNORE INTO user_copies (user_id, protocol, uri) VALUES (?, ?, ?)")
				.bind(user.id.as_ref())
				.bind(copy.protocol.as_ref())
				.bind(copy.uri.as_ref())
				.execute(&mut *tx)
				.await
				.inspect_err(inspect)
				.map_err(|_| Error::DbError)?;
		}

		tx.commit().await.inspect_err(inspect).map_err(|_| Error::DbError)?;
		Ok(())
	}

	async fn find_user_by_copy(&self, protocol: &str, uri: &str) -> ClResult<Option<User>> {
		let user_id: Option<String> = sqlx::query_scalar("SELECT user_id FROM user_copies WHERE protocol = ? AND uri = ?")
			.bind(protocol)
			.bind(uri)
			.fetch_optional(&self.dbr)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;

		match user_id {
			Some(id) => self.get_user(&id).await,
			None => Ok(None),
		}
	}

	async fn get_follower(&self, from: &str, to: &str) -> ClResult<Option<Follower>> {
		let res = sqlx::query("SELECT from_id, to_id, status, follow, updated FROM followers WHERE from_id = ? AND to_id = ?")
			.bind(from)
			.bind(to)
			.fetch_optional(&self.dbr)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;

		match res {
			Some(row) => Ok(Some(row_to_follower(row).map_err(|_| Error::DbError)?)),
			None => Ok(None),
		}
	}

	async fn put_follower(&self, follower: &Follower) -> ClResult<()> {
		let status = if follower.is_active() { "active" } else { "inactive" };
		sqlx::query(
			"INSERT INTO followers (from_id, to_id, status, follow, updated) VALUES (?, ?, ?, ?, ?)
			ON CONFLICT(from_id, to_id) DO UPDATE SET status=excluded.status, follow=excluded.follow, updated=excluded.updated",
		)
		.bind(follower.from.as_ref())
		.bind(follower.to.as_ref())
		.bind(status)
		.bind(follower.follow.as_deref())
		.bind(follower.updated.0)
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
		Ok(())
	}

	async fn list_followers(&self, actor_id: &str, filter: FollowerFilter) -> ClResult<Vec<Follower>> {
		let mut query = sqlx::QueryBuilder::new(
			"SELECT from_id, to_id, status, follow, updated FROM followers WHERE to_id = ",
		);
		query.push_bind(actor_id);
		if filter.active_only {
			query.push(" AND status = 'active'");
		}
		let res = query.build().fetch_all(&self.dbr).await.inspect_err(inspect).map_err(|_| Error::DbError)?;
		collect_res(res.into_iter().map(row_to_follower))
	}

	async fn list_following(&self, actor_id: &str, filter: FollowerFilter) -> ClResult<Vec<Follower>> {
		let mut query = sqlx::QueryBuilder::new(
			"SELECT from_id, to_id, status, follow, updated FROM followers WHERE from_id = ",
		);
		query.push_bind(actor_id);
		if filter.active_only {
			query.push(" AND status = 'active'");
		}
		let res = query.build().fetch_all(&self.dbr).await.inspect_err(inspect).map_err(|_| Error::DbError)?;
		collect_res(res.into_iter().map(row_to_follower))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	async fn store() -> (SqliteStore, TempDir) {
		let dir = TempDir::new().unwrap();
		let store = SqliteStore::new(dir.path()).await.unwrap();
		(store, dir)
	}

	#[tokio::test]
	async fn round_trips_an_object() {
		let (store, _dir) = store().await;
		let mut object = Object::new("https://instance/post/1");
		object.undelivered.push(Target::new("web", "https://instance/users/bob"));
		object.recompute_status();
		store.put_object(&object).await.unwrap();

		let loaded = store.get_object("https://instance/post/1").await.unwrap().unwrap();
		assert_eq!(loaded.status, ObjectStatus::InProgress);
		assert_eq!(loaded.undelivered.len(), 1);
	}

	#[tokio::test]
	async fn follower_filter_narrows_to_active() {
		let (store, _dir) = store().await;
		let mut inactive = Follower::new("https://a/alice", "https://b/bob");
		inactive.status = FollowerStatus::Inactive;
		store.put_follower(&inactive).await.unwrap();
		store.put_follower(&Follower::new("https://c/carol", "https://b/bob")).await.unwrap();

		let all = store.list_followers("https://b/bob", FollowerFilter { active_only: false }).await.unwrap();
		assert_eq!(all.len(), 2);
		let active = store.list_followers("https://b/bob", FollowerFilter { active_only: true }).await.unwrap();
		assert_eq!(active.len(), 1);
		assert_eq!(active[0].from.as_ref(), "https://c/carol");
	}
}

// vim: ts=4
