//! Database schema initialization: creates tables and indexes for objects,
//! users, followers, and the durable task scheduler.

use sqlx::SqlitePool;

pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Objects
	//*********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS objects (
			id text NOT NULL,
			source_protocol text,
			our_as1 text,
			native text,
			users text,
			notify text,
			feed text,
			status text NOT NULL,
			undelivered text,
			delivered text,
			failed text,
			deleted boolean NOT NULL DEFAULT 0,
			updated integer NOT NULL,
			PRIMARY KEY(id)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_status ON objects(status)")
		.execute(&mut *tx)
		.await?;

	// Users
	//*******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS users (
			id text NOT NULL,
			protocol text NOT NULL,
			handle text,
			copies text,
			enabled_protocols text,
			status text,
			use_instead text,
			manual_opt_out boolean NOT NULL DEFAULT 0,
			direct boolean NOT NULL DEFAULT 0,
			PRIMARY KEY(id)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_handle ON users(handle)")
		.execute(&mut *tx)
		.await?;

	// Secondary index for User.copies: one row per (user, copy-protocol,
	// copy-uri), rebuilt on every put_user so lookups by copy target don't
	// require scanning and JSON-decoding every user row.
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS user_copies (
			user_id text NOT NULL,
			protocol text NOT NULL,
			uri text NOT NULL,
			PRIMARY KEY(user_id, protocol, uri)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_copies_uri ON user_copies(protocol, uri)")
		.execute(&mut *tx)
		.await?;

	// Followers
	//***********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS followers (
			from_id text NOT NULL,
			to_id text NOT NULL,
			status text NOT NULL,
			follow text,
			updated integer NOT NULL,
			PRIMARY KEY(from_id, to_id)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_followers_to ON followers(to_id, status)")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_followers_from ON followers(from_id, status)")
		.execute(&mut *tx)
		.await?;

	// Task scheduler
	//****************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS tasks (
			task_id integer NOT NULL,
			kind text NOT NULL,
			key text,
			status char(1) NOT NULL DEFAULT 'P',		-- 'P': pending, 'F': finished, 'E': error
			created_at integer NOT NULL DEFAULT (unixepoch()),
			next_at integer,
			retry text,
			cron text,
			input text NOT NULL,
			output text,
			error text,
			PRIMARY KEY(task_id)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_kind_key ON tasks(kind, key) WHERE status='P'")
		.execute(&mut *tx)
		.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS task_dependencies (
			task_id integer NOT NULL,
			dep_id integer NOT NULL,
			PRIMARY KEY(task_id, dep_id)
		) WITHOUT ROWID",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_dependencies_dep_id ON task_dependencies(dep_id)")
		.execute(&mut *tx)
		.await?;

	tx.commit().await?;
	Ok(())
}

// vim: ts=4
