//! `TaskStore<App>` implementation: durable persistence for the scheduler's
//! pending/running task queue and their dependency edges.

use async_trait::async_trait;
use sqlx::Row;

use bridge_core::app::App;
use bridge_core::scheduler::{RetryPolicy, TaskData, TaskId, TaskMeta, TaskStatus, TaskStore};
use bridge_types::prelude::*;

use crate::utils::{collect_res, inspect, parse_u64_list};
use crate::SqliteStore;

fn status_from_char(c: char) -> TaskStatus {
	match c {
		'F' => TaskStatus::Completed,
		'E' => TaskStatus::Failed,
		_ => TaskStatus::Pending,
	}
}

fn serialize_retry(retry: &RetryPolicy, retry_count: u16) -> String {
	format!("{},{},{},{}", retry_count, retry.wait_min_max.0, retry.wait_min_max.1, retry.times)
}

#[async_trait]
impl TaskStore<App> for SqliteStore {
	async fn add(&self, task: &TaskMeta<App>, key: Option<&str>) -> ClResult<TaskId> {
		let mut tx = self.pool().begin().await.map_err(|_| Error::DbError)?;

		let retry = task.retry.as_ref().map(|r| serialize_retry(r, 0));
		let cron = task.cron.as_ref().map(|c| c.to_cron_string());

		let res = sqlx::query(
			"INSERT INTO tasks (kind, key, status, next_at, retry, cron, input) VALUES (?, ?, 'P', ?, ?, ?, ?) RETURNING task_id",
		)
		.bind(task.task.kind_of())
		.bind(key)
		.bind(task.next_at.map(|t| t.0))
		.bind(retry)
		.bind(cron)
		.bind(task.task.serialize())
		.fetch_one(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
		let task_id: i64 = res.try_get(0).map_err(|_| Error::DbError)?;

		for dep in &task.deps {
			sqlx::query("INSERT INTO task_dependencies (task_id, dep_id) VALUES (?, ?)")
				.bind(task_id)
				.bind(*dep as i64)
				.execute(&mut *tx)
				.await
				.inspect_err(inspect)
				.map_err(|_| Error::DbError)?;
		}
		tx.commit().await.map_err(|_| Error::DbError)?;
		Ok(task_id as TaskId)
	}

	async fn finished(&self, id: TaskId, output: &str) -> ClResult<()> {
		sqlx::query("UPDATE tasks SET status='F', output=?, next_at=NULL WHERE task_id=? AND status='P'")
			.bind(output)
			.bind(id as i64)
			.execute(self.pool())
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		sqlx::query("DELETE FROM task_dependencies WHERE dep_id=?")
			.bind(id as i64)
			.execute(self.pool())
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		Ok(())
	}

	async fn load(&self) -> ClResult<Vec<TaskData>> {
		let res = sqlx::query(
			"SELECT t.task_id, t.kind, t.status, t.next_at, t.retry, t.cron, t.input,
			string_agg(td.dep_id, ',') as deps
			FROM tasks t
			LEFT JOIN task_dependencies td ON td.task_id = t.task_id
			WHERE t.status = 'P'
			GROUP BY t.task_id",
		)
		.fetch_all(self.pool())
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

		collect_res(res.into_iter().map(|row| {
			let deps: Option<String> = row.try_get("deps")?;
			let status: String = row.try_get("status")?;
			Ok(TaskData {
				id: row.try_get::<i64, _>("task_id")? as TaskId,
				kind: row.try_get::<String, _>("kind")?.into_boxed_str(),
				status: status_from_char(status.chars().next().unwrap_or('P')),
				input: row.try_get::<String, _>("input")?.into_boxed_str(),
				deps: deps.map(|s| parse_u64_list(&s)).unwrap_or_default(),
				retry_data: row.try_get::<Option<String>, _>("retry")?.map(String::into_boxed_str),
				cron_data: row.try_get::<Option<String>, _>("cron")?.map(String::into_boxed_str),
				next_at: row.try_get::<Option<i64>, _>("next_at")?.map(Timestamp),
			})
		}))
	}

	async fn update_task_error(&self, task_id: TaskId, output: &str, next_at: Option<Timestamp>) -> ClResult<()> {
		match next_at {
			Some(next_at) => {
				sqlx::query("UPDATE tasks SET error=?, next_at=? WHERE task_id=? AND status='P'")
					.bind(output)
					.bind(next_at.0)
					.bind(task_id as i64)
					.execute(self.pool())
					.await
			}
			None => {
				sqlx::query("UPDATE tasks SET error=?, status='E', next_at=NULL WHERE task_id=? AND status='P'")
					.bind(output)
					.bind(task_id as i64)
					.execute(self.pool())
					.await
			}
		}
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
		Ok(())
	}

	async fn find_by_key(&self, key: &str) -> ClResult<Option<(TaskId, TaskData)>> {
		let res = sqlx::query(
			"SELECT t.task_id, t.kind, t.status, t.next_at, t.retry, t.cron, t.input,
			string_agg(td.dep_id, ',') as deps
			FROM tasks t
			LEFT JOIN task_dependencies td ON td.task_id = t.task_id
			WHERE t.status = 'P' AND t.key = ?
			GROUP BY t.task_id
			LIMIT 1",
		)
		.bind(key)
		.fetch_optional(self.pool())
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

		let Some(row) = res else { return Ok(None) };
		let task_id: i64 = row.try_get("task_id").map_err(|_| Error::DbError)?;
		let deps: Option<String> = row.try_get("deps").map_err(|_| Error::DbError)?;
		let status: String = row.try_get("status").map_err(|_| Error::DbError)?;
		let data = TaskData {
			id: task_id as TaskId,
			kind: row.try_get::<String, _>("kind").map_err(|_| Error::DbError)?.into_boxed_str(),
			status: status_from_char(status.chars().next().unwrap_or('P')),
			input: row.try_get::<String, _>("input").map_err(|_| Error::DbError)?.into_boxed_str(),
			deps: deps.map(|s| parse_u64_list(&s)).unwrap_or_default(),
			retry_data: row.try_get::<Option<String>, _>("retry").map_err(|_| Error::DbError)?.map(String::into_boxed_str),
			cron_data: row.try_get::<Option<String>, _>("cron").map_err(|_| Error::DbError)?.map(String::into_boxed_str),
			next_at: row.try_get::<Option<i64>, _>("next_at").map_err(|_| Error::DbError)?.map(Timestamp),
		};
		Ok(Some((task_id as TaskId, data)))
	}

	async fn update_task(&self, id: TaskId, task: &TaskMeta<App>) -> ClResult<()> {
		let mut tx = self.pool().begin().await.map_err(|_| Error::DbError)?;

		let retry = task.retry.as_ref().map(|r| serialize_retry(r, 0));
		let cron = task.cron.as_ref().map(|c| c.to_cron_string());

		sqlx::query("UPDATE tasks SET input=?, next_at=?, retry=?, cron=? WHERE task_id=?")
			.bind(task.task.serialize())
			.bind(task.next_at.map(|t| t.0))
			.bind(retry)
			.bind(cron)
			.bind(id as i64)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;

		sqlx::query("DELETE FROM task_dependencies WHERE task_id=?")
			.bind(id as i64)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		for dep in &task.deps {
			sqlx::query("INSERT INTO task_dependencies (task_id, dep_id) VALUES (?, ?)")
				.bind(id as i64)
				.bind(*dep as i64)
				.execute(&mut *tx)
				.await
				.inspect_err(inspect)
				.map_err(|_| Error::DbError)?;
		}
		tx.commit().await.map_err(|_| Error::DbError)?;
		Ok(())
	}
}


// vim: ts=4
