//! Durable task scheduler: dependencies, retries with exponential backoff,
//! cron recurrence, and pluggable persistence via [`TaskStore`].
//!
//! The federation pipeline schedules `ReceiveTask`/`SendTask` work here
//! instead of running it inline, so a crash mid-delivery resumes from
//! whatever the store last persisted rather than silently dropping work.

use async_trait::async_trait;
use itertools::Itertools;
use std::{
	collections::{BTreeMap, HashMap},
	fmt::Debug,
	sync::{Arc, Mutex, RwLock},
};

use chrono::{DateTime, Utc};
use croner::Cron;
use std::str::FromStr;

use bridge_types::prelude::*;
use bridge_types::lock;

pub type TaskId = u64;

/// Cron schedule wrapper, stores the source expression alongside the parsed
/// form so it round-trips through persistence.
#[derive(Debug, Clone)]
pub struct CronSchedule {
	expr: Box<str>,
	cron: Cron,
}

impl CronSchedule {
	pub fn parse(expr: &str) -> ClResult<Self> {
		let cron = Cron::from_str(expr)
			.map_err(|e| Error::ValidationError(format!("invalid cron expression: {e}")))?;
		Ok(Self { expr: expr.into(), cron })
	}

	pub fn next_execution(&self, after: Timestamp) -> ClResult<Timestamp> {
		let dt = DateTime::<Utc>::from_timestamp(after.0, 0).unwrap_or_else(Utc::now);
		self.cron
			.find_next_occurrence(&dt, false)
			.map(|next| Timestamp(next.timestamp()))
			.map_err(|e| {
				error!("failed to find next cron occurrence for '{}': {}", self.expr, e);
				Error::ValidationError(format!("cron next_execution failed: {e}"))
			})
	}

	pub fn to_cron_string(&self) -> String {
		self.expr.to_string()
	}
}

impl PartialEq for CronSchedule {
	fn eq(&self, other: &Self) -> bool {
		self.expr == other.expr
	}
}

impl Eq for CronSchedule {}

/// A unit of background work. Implementors are registered with a
/// [`Scheduler`] by kind so tasks loaded from the store can be rebuilt from
/// their serialized form without a central match statement.
#[async_trait]
pub trait Task<S: Clone>: Send + Sync + Debug {
	fn kind() -> &'static str
	where
		Self: Sized;
	fn build(id: TaskId, context: &str) -> ClResult<Arc<dyn Task<S>>>
	where
		Self: Sized;
	fn serialize(&self) -> String;
	async fn run(&self, state: &S) -> ClResult<()>;

	fn kind_of(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
	Pending,
	Completed,
	Failed,
}

pub struct TaskData {
	pub id: TaskId,
	pub kind: Box<str>,
	pub status: TaskStatus,
	pub input: Box<str>,
	pub deps: Box<[TaskId]>,
	pub retry_data: Option<Box<str>>,
	pub cron_data: Option<Box<str>>,
	pub next_at: Option<Timestamp>,
}

/// Persistence for tasks. The in-process [`InMemoryTaskStore`] is used by
/// tests and by `--local-development` deployments; durable adapters persist
/// `TaskMeta` so pending work survives a restart.
#[async_trait]
pub trait TaskStore<S: Clone>: Send + Sync {
	async fn add(&self, task: &TaskMeta<S>, key: Option<&str>) -> ClResult<TaskId>;
	async fn finished(&self, id: TaskId, output: &str) -> ClResult<()>;
	async fn load(&self) -> ClResult<Vec<TaskData>>;
	async fn update_task_error(
		&self,
		task_id: TaskId,
		output: &str,
		next_at: Option<Timestamp>,
	) -> ClResult<()>;
	async fn find_by_key(&self, key: &str) -> ClResult<Option<(TaskId, TaskData)>>;
	async fn update_task(&self, id: TaskId, task: &TaskMeta<S>) -> ClResult<()>;
}

/// Non-durable store for tests and `--local-development`: tasks are run
/// in-process and never survive a restart.
pub struct InMemoryTaskStore {
	last_id: Mutex<TaskId>,
}

impl InMemoryTaskStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self { last_id: Mutex::new(0) })
	}
}

#[async_trait]
impl<S: Clone> TaskStore<S> for InMemoryTaskStore {
	async fn add(&self, _task: &TaskMeta<S>, _key: Option<&str>) -> ClResult<TaskId> {
		let mut last_id = lock!(self.last_id)?;
		*last_id += 1;
		Ok(*last_id)
	}

	async fn finished(&self, _id: TaskId, _output: &str) -> ClResult<()> {
		Ok(())
	}

	async fn load(&self) -> ClResult<Vec<TaskData>> {
		Ok(vec![])
	}

	async fn update_task_error(
		&self,
		_task_id: TaskId,
		_output: &str,
		_next_at: Option<Timestamp>,
	) -> ClResult<()> {
		Ok(())
	}

	async fn find_by_key(&self, _key: &str) -> ClResult<Option<(TaskId, TaskData)>> {
		Ok(None)
	}

	async fn update_task(&self, _id: TaskId, _task: &TaskMeta<S>) -> ClResult<()> {
		Ok(())
	}
}

type TaskBuilder<S> = dyn Fn(TaskId, &str) -> ClResult<Arc<dyn Task<S>>> + Send + Sync;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub wait_min_max: (u64, u64),
	pub times: u16,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { wait_min_max: (60, 3600), times: 10 }
	}
}

impl RetryPolicy {
	pub fn new(wait_min_max: (u64, u64), times: u16) -> Self {
		Self { wait_min_max, times }
	}

	/// Exponential backoff: `min * 2^attempt`, capped at `max`.
	pub fn calculate_backoff(&self, attempt_count: u16) -> u64 {
		let (min, max) = self.wait_min_max;
		let backoff = min * (1u64 << u64::from(attempt_count));
		backoff.min(max)
	}

	pub fn should_retry(&self, attempt_count: u16) -> bool {
		attempt_count < self.times
	}
}

/// Fluent API for scheduling a task: `scheduler.task(t).schedule_after(60).with_retry(policy).schedule()`.
pub struct TaskSchedulerBuilder<'a, S: Clone> {
	scheduler: &'a Scheduler<S>,
	task: Arc<dyn Task<S>>,
	key: Option<String>,
	next_at: Option<Timestamp>,
	deps: Vec<TaskId>,
	retry: Option<RetryPolicy>,
	cron: Option<CronSchedule>,
}

impl<'a, S: Clone + Send + Sync + 'static> TaskSchedulerBuilder<'a, S> {
	fn new(scheduler: &'a Scheduler<S>, task: Arc<dyn Task<S>>) -> Self {
		Self { scheduler, task, key: None, next_at: None, deps: Vec::new(), retry: None, cron: None }
	}

	pub fn key(mut self, key: impl Into<String>) -> Self {
		self.key = Some(key.into());
		self
	}

	pub fn schedule_at(mut self, timestamp: Timestamp) -> Self {
		self.next_at = Some(timestamp);
		self
	}

	pub fn schedule_after(mut self, seconds: i64) -> Self {
		self.next_at = Some(Timestamp::from_now(seconds));
		self
	}

	pub fn depend_on(mut self, deps: Vec<TaskId>) -> Self {
		self.deps = deps;
		self
	}

	pub fn depends_on(mut self, dep: TaskId) -> Self {
		self.deps.push(dep);
		self
	}

	pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
		self.retry = Some(policy);
		self
	}

	/// Schedule with a cron expression, e.g. `.cron("0 9 * * *")` for 9am daily.
	pub fn cron(mut self, expr: impl Into<String>) -> Self {
		if let Ok(cron_schedule) = CronSchedule::parse(&expr.into()) {
			self.next_at = cron_schedule.next_execution(Timestamp::now()).ok();
			self.cron = Some(cron_schedule);
		}
		self
	}

	pub fn daily_at(mut self, hour: u8, minute: u8) -> Self {
		if hour <= 23 && minute <= 59 {
			let expr = format!("{minute} {hour} * * *");
			if let Ok(cron_schedule) = CronSchedule::parse(&expr) {
				self.next_at = cron_schedule.next_execution(Timestamp::now()).ok();
				self.cron = Some(cron_schedule);
			}
		}
		self
	}

	pub async fn now(self) -> ClResult<TaskId> {
		self.schedule().await
	}

	pub async fn after(mut self, seconds: i64) -> ClResult<TaskId> {
		self.next_at = Some(Timestamp::from_now(seconds));
		self.schedule().await
	}

	pub async fn schedule(self) -> ClResult<TaskId> {
		self.scheduler
			.schedule_task_impl(
				self.task,
				self.key.as_deref(),
				self.next_at,
				if self.deps.is_empty() { None } else { Some(self.deps) },
				self.retry,
				self.cron,
			)
			.await
	}
}

#[derive(Debug, Clone)]
pub struct TaskMeta<S: Clone> {
	pub task: Arc<dyn Task<S>>,
	pub next_at: Option<Timestamp>,
	pub deps: Vec<TaskId>,
	retry_count: u16,
	pub retry: Option<RetryPolicy>,
	pub cron: Option<CronSchedule>,
}

type TaskBuilderRegistry<S> = HashMap<&'static str, Box<TaskBuilder<S>>>;
type ScheduledTaskMap<S> = BTreeMap<(Timestamp, TaskId), TaskMeta<S>>;

#[derive(Clone)]
pub struct Scheduler<S: Clone> {
	task_builders: Arc<RwLock<TaskBuilderRegistry<S>>>,
	store: Arc<dyn TaskStore<S>>,
	tasks_running: Arc<Mutex<HashMap<TaskId, TaskMeta<S>>>>,
	tasks_waiting: Arc<Mutex<HashMap<TaskId, TaskMeta<S>>>>,
	task_dependents: Arc<Mutex<HashMap<TaskId, Vec<TaskId>>>>,
	tasks_scheduled: Arc<Mutex<ScheduledTaskMap<S>>>,
	tx_finish: flume::Sender<TaskId>,
	rx_finish: flume::Receiver<TaskId>,
	notify_schedule: Arc<tokio::sync::Notify>,
}

impl<S: Clone + Send + Sync + 'static> Scheduler<S> {
	pub fn new(store: Arc<dyn TaskStore<S>>) -> Arc<Self> {
		let (tx_finish, rx_finish) = flume::unbounded();
		Arc::new(Self {
			task_builders: Arc::new(RwLock::new(HashMap::new())),
			store,
			tasks_running: Arc::new(Mutex::new(HashMap::new())),
			tasks_waiting: Arc::new(Mutex::new(HashMap::new())),
			task_dependents: Arc::new(Mutex::new(HashMap::new())),
			tasks_scheduled: Arc::new(Mutex::new(BTreeMap::new())),
			tx_finish,
			rx_finish,
			notify_schedule: Arc::new(tokio::sync::Notify::new()),
		})
	}

	/// Spawns the three background loops: finish-event handling, the
	/// schedule-time waiter, and an initial load from the store.
	pub fn start(&self, state: S) {
		let schedule = self.clone();
		let stat = state.clone();
		let rx_finish = self.rx_finish.clone();

		tokio::spawn(async move {
			while let Ok(id) = rx_finish.recv_async().await {
				debug!("completed task {} (notified)", id);

				let task_meta_opt = {
					let tasks_running = match schedule.tasks_running.lock() {
						Ok(guard) => guard,
						Err(poisoned) => poisoned.into_inner(),
					};
					tasks_running.get(&id).cloned()
				};

				let Some(task_meta) = task_meta_opt else {
					warn!("completed task {} not found in running queue", id);
					continue;
				};

				let mut transition_ok = false;

				if let Some(ref cron) = task_meta.cron {
					match cron.next_execution(Timestamp::now()) {
						Ok(next_at) => {
							info!("recurring task {} completed, next execution at {}", id, next_at);
							let mut updated_meta = task_meta.clone();
							updated_meta.next_at = Some(next_at);

							if let Err(e) = schedule.store.update_task(id, &updated_meta).await {
								error!("failed to update recurring task {} next_at: {}", id, e);
							}

							match schedule.tasks_running.lock() {
								Ok(mut r) => { r.remove(&id); }
								Err(p) => { p.into_inner().remove(&id); }
							}

							match schedule.add_queue(id, updated_meta).await {
								Ok(_) => transition_ok = true,
								Err(e) => error!("failed to reschedule recurring task {}: {}", id, e),
							}
						}
						Err(e) => {
							error!("failed to calculate next execution for task {}: {} - not rescheduling", id, e);
							if let Err(e) = schedule.store.finished(id, "").await {
								error!("failed to mark task {} as finished: {}", id, e);
							}
						}
					}
				} else {
					match schedule.store.finished(id, "").await {
						Ok(()) => transition_ok = true,
						Err(e) => error!("failed to mark task {} as finished: {}", id, e),
					}
				}

				if transition_ok {
					match schedule.tasks_running.lock() {
						Ok(mut r) => { r.remove(&id); }
						Err(p) => { p.into_inner().remove(&id); }
					}
				}

				match schedule.release_dependents(id) {
					Ok(ready_to_spawn) => {
						for (dep_id, dep_task_meta) in ready_to_spawn {
							match schedule.tasks_running.lock() {
								Ok(mut r) => { r.insert(dep_id, dep_task_meta.clone()); }
								Err(p) => { p.into_inner().insert(dep_id, dep_task_meta.clone()); }
							}
							schedule.spawn_task(stat.clone(), dep_task_meta.task.clone(), dep_id, dep_task_meta);
						}
					}
					Err(e) => error!("failed to release dependents of task {}: {}", id, e),
				}
			}
		});

		let schedule = self.clone();
		tokio::spawn(async move {
			loop {
				let is_empty = match schedule.tasks_scheduled.lock() {
					Ok(guard) => guard.is_empty(),
					Err(p) => p.into_inner().is_empty(),
				};
				if is_empty {
					schedule.notify_schedule.notified().await;
				}
				let time = Timestamp::now();
				if let Some((timestamp, _id)) = loop {
					let mut tasks_scheduled = match schedule.tasks_scheduled.lock() {
						Ok(guard) => guard,
						Err(p) => p.into_inner(),
					};
					let Some((&(timestamp, id), _)) = tasks_scheduled.first_key_value() else {
						break None;
					};
					if timestamp <= Timestamp::now() {
						debug!("spawning task id {} (from schedule)", id);
						let Some(task) = tasks_scheduled.remove(&(timestamp, id)) else {
							error!("task disappeared while being removed from schedule");
							break None;
						};
						drop(tasks_scheduled);
						let mut tasks_running = match schedule.tasks_running.lock() {
							Ok(guard) => guard,
							Err(p) => p.into_inner(),
						};
						tasks_running.insert(id, task.clone());
						drop(tasks_running);
						schedule.spawn_task(state.clone(), task.task.clone(), id, task);
					} else {
						break Some((timestamp, id));
					}
				} {
					let diff = timestamp.0 - time.0;
					let wait = tokio::time::Duration::from_secs(u64::try_from(diff).unwrap_or_default());
					tokio::select! {
						() = tokio::time::sleep(wait) => (), () = schedule.notify_schedule.notified() => ()
					};
				}
			}
		});

		let schedule = self.clone();
		tokio::spawn(async move {
			let _ignore_err = schedule.load().await;
		});
	}

	fn register_builder(&self, name: &'static str, builder: &'static TaskBuilder<S>) -> ClResult<&Self> {
		let mut task_builders =
			self.task_builders.write().map_err(|_| Error::Internal("task_builders RwLock poisoned".into()))?;
		task_builders.insert(name, Box::new(builder));
		Ok(self)
	}

	pub fn register<T: Task<S>>(&self) -> ClResult<&Self> {
		info!("registering task type {}", T::kind());
		self.register_builder(T::kind(), &|id: TaskId, params: &str| T::build(id, params))?;
		Ok(self)
	}

	pub fn task(&self, task: Arc<dyn Task<S>>) -> TaskSchedulerBuilder<'_, S> {
		TaskSchedulerBuilder::new(self, task)
	}

	async fn schedule_task_impl(
		&self,
		task: Arc<dyn Task<S>>,
		key: Option<&str>,
		next_at: Option<Timestamp>,
		deps: Option<Vec<TaskId>>,
		retry: Option<RetryPolicy>,
		cron: Option<CronSchedule>,
	) -> ClResult<TaskId> {
		let task_meta =
			TaskMeta { task: task.clone(), next_at, deps: deps.unwrap_or_default(), retry_count: 0, retry, cron };

		if let Some(key) = key {
			if let Some((existing_id, existing_data)) = self.store.find_by_key(key).await? {
				let new_serialized = task.serialize();
				let existing_serialized = existing_data.input.as_ref();

				if new_serialized == existing_serialized {
					info!("recurring task '{}' already exists with identical parameters (id={})", key, existing_id);
					self.store.update_task(existing_id, &task_meta).await?;
					self.add_queue(existing_id, task_meta).await?;
					return Ok(existing_id);
				}
				info!("updating recurring task '{}' (id={}) - parameters changed", key, existing_id);
				self.remove_from_queues(existing_id)?;
				self.store.update_task(existing_id, &task_meta).await?;
				self.add_queue(existing_id, task_meta).await?;
				return Ok(existing_id);
			}
		}

		let id = self.store.add(&task_meta, key).await?;
		self.add_queue(id, task_meta).await
	}

	pub async fn add(&self, task: Arc<dyn Task<S>>) -> ClResult<TaskId> {
		self.task(task).now().await
	}

	pub async fn add_queue(&self, id: TaskId, task_meta: TaskMeta<S>) -> ClResult<TaskId> {
		{
			let mut running = lock!(self.tasks_running)?;
			if let Some(existing_meta) = running.get_mut(&id) {
				debug!("task {} is already running, updating metadata for next run", id);
				*existing_meta = task_meta;
				return Ok(id);
			}
		}

		{
			let mut scheduled = lock!(self.tasks_scheduled)?;
			if let Some(key) = scheduled.iter().find(|((_, tid), _)| *tid == id).map(|((ts, tid), _)| (*ts, *tid)) {
				scheduled.remove(&key);
			}
		}
		{
			let mut waiting = lock!(self.tasks_waiting)?;
			waiting.remove(&id);
		}

		let deps = task_meta.deps.clone();

		if !deps.is_empty() && task_meta.next_at.is_some() {
			warn!("task {} has both dependencies and scheduled time - placing in waiting queue", id);
			lock!(self.tasks_waiting)?.insert(id, task_meta);
			for dep in deps {
				lock!(self.task_dependents)?.entry(dep).or_default().push(id);
			}
			return Ok(id);
		}

		if deps.is_empty() && task_meta.next_at.unwrap_or(Timestamp(0)) < Timestamp::now() {
			lock!(self.tasks_scheduled)?.insert((Timestamp(0), id), task_meta);
			self.notify_schedule.notify_one();
		} else if let Some(next_at) = task_meta.next_at {
			lock!(self.tasks_scheduled)?.insert((next_at, id), task_meta);
			self.notify_schedule.notify_one();
		} else {
			lock!(self.tasks_waiting)?.insert(id, task_meta);
			for dep in deps {
				lock!(self.task_dependents)?.entry(dep).or_default().push(id);
			}
		}
		Ok(id)
	}

	fn remove_from_queues(&self, task_id: TaskId) -> ClResult<Option<TaskMeta<S>>> {
		if let Some(task_meta) = lock!(self.tasks_waiting)?.remove(&task_id) {
			return Ok(Some(task_meta));
		}
		{
			let mut scheduled = lock!(self.tasks_scheduled)?;
			if let Some(key) =
				scheduled.iter().find(|((_, id), _)| *id == task_id).map(|((ts, id), _)| (*ts, *id))
			{
				if let Some(task_meta) = scheduled.remove(&key) {
					return Ok(Some(task_meta));
				}
			}
		}
		if let Some(task_meta) = lock!(self.tasks_running)?.remove(&task_id) {
			warn!("removed task {} from running queue during update", task_id);
			return Ok(Some(task_meta));
		}
		Ok(None)
	}

	fn release_dependents(&self, completed_task_id: TaskId) -> ClResult<Vec<(TaskId, TaskMeta<S>)>> {
		let dependents = {
			let mut deps_map = lock!(self.task_dependents)?;
			deps_map.remove(&completed_task_id).unwrap_or_default()
		};

		if dependents.is_empty() {
			return Ok(Vec::new());
		}

		let mut ready_to_spawn = Vec::new();

		for dependent_id in dependents {
			{
				let mut waiting = lock!(self.tasks_waiting)?;
				if let Some(task_meta) = waiting.get_mut(&dependent_id) {
					task_meta.deps.retain(|x| *x != completed_task_id);
					if task_meta.deps.is_empty() {
						if let Some(task_to_spawn) = waiting.remove(&dependent_id) {
							ready_to_spawn.push((dependent_id, task_to_spawn));
						}
					}
					continue;
				}
			}

			{
				let mut scheduled = lock!(self.tasks_scheduled)?;
				if let Some(scheduled_key) =
					scheduled.iter().find(|((_, id), _)| *id == dependent_id).map(|((ts, id), _)| (*ts, *id))
				{
					if let Some(task_meta) = scheduled.get_mut(&scheduled_key) {
						task_meta.deps.retain(|x| *x != completed_task_id);
					}
					continue;
				}
			}

			warn!("dependent task {} of completed task {} not found in any queue", dependent_id, completed_task_id);
		}

		Ok(ready_to_spawn)
	}

	async fn load(&self) -> ClResult<()> {
		let tasks = self.store.load().await?;
		debug!("loaded {} tasks from store", tasks.len());
		for t in tasks {
			if t.status != TaskStatus::Pending {
				continue;
			}
			let task = {
				let builder_map =
					self.task_builders.read().map_err(|_| Error::Internal("task_builders RwLock poisoned".into()))?;
				let builder = builder_map
					.get(t.kind.as_ref())
					.ok_or_else(|| Error::Internal(format!("task builder not registered: {}", t.kind)))?;
				builder(t.id, &t.input)?
			};
			let (retry_count, retry) = match t.retry_data {
				Some(retry_str) => {
					let (retry_count, retry_min, retry_max, retry_times) = retry_str
						.split(',')
						.collect_tuple()
						.ok_or_else(|| Error::Internal("invalid retry policy format".into()))?;
					let retry_count: u16 =
						retry_count.parse().map_err(|_| Error::Internal("retry count must be u16".into()))?;
					let retry = RetryPolicy {
						wait_min_max: (
							retry_min.parse().map_err(|_| Error::Internal("retry_min must be u64".into()))?,
							retry_max.parse().map_err(|_| Error::Internal("retry_max must be u64".into()))?,
						),
						times: retry_times.parse().map_err(|_| Error::Internal("retry times must be u64".into()))?,
					};
					(retry_count, Some(retry))
				}
				None => (0, None),
			};
			let cron = t.cron_data.as_ref().and_then(|cron_str| CronSchedule::parse(cron_str).ok());

			let task_meta =
				TaskMeta { task, next_at: t.next_at, deps: t.deps.into(), retry_count, retry, cron };
			self.add_queue(t.id, task_meta).await?;
		}
		Ok(())
	}

	fn spawn_task(&self, state: S, task: Arc<dyn Task<S>>, id: TaskId, task_meta: TaskMeta<S>) {
		let tx_finish = self.tx_finish.clone();
		let store = self.store.clone();
		let scheduler = self.clone();
		tokio::spawn(async move {
			match task.run(&state).await {
				Ok(()) => {
					debug!("task {} completed successfully", id);
					tx_finish.send(id).unwrap_or(());
				}
				Err(e) => {
					if let Some(retry_policy) = &task_meta.retry {
						if retry_policy.should_retry(task_meta.retry_count) {
							let backoff = retry_policy.calculate_backoff(task_meta.retry_count);
							let next_at = Timestamp::from_now(backoff.cast_signed());

							info!(
								"task {} failed (attempt {}/{}), retrying in {}s: {}",
								id, task_meta.retry_count + 1, retry_policy.times, backoff, e
							);

							store.update_task_error(id, &e.to_string(), Some(next_at)).await.unwrap_or(());

							match scheduler.tasks_running.lock() {
								Ok(mut r) => { r.remove(&id); }
								Err(p) => { p.into_inner().remove(&id); }
							}

							let mut retry_meta = task_meta.clone();
							retry_meta.retry_count += 1;
							retry_meta.next_at = Some(next_at);
							scheduler.add_queue(id, retry_meta).await.unwrap_or(id);
						} else {
							error!("task {} failed after {} retries: {}", id, task_meta.retry_count, e);
							store.update_task_error(id, &e.to_string(), None).await.unwrap_or(());
							tx_finish.send(id).unwrap_or(());
						}
					} else {
						error!("task {} failed: {}", id, e);
						store.update_task_error(id, &e.to_string(), None).await.unwrap_or(());
						tx_finish.send(id).unwrap_or(());
					}
				}
			}
		});
	}

	/// Snapshot of queue sizes and detected anomalies, served from `/readyz`.
	pub fn health_check(&self) -> ClResult<SchedulerHealth> {
		let waiting_count = lock!(self.tasks_waiting)?.len();
		let scheduled_count = lock!(self.tasks_scheduled)?.len();
		let running_count = lock!(self.tasks_running)?.len();
		let dependents_count = lock!(self.task_dependents)?.len();

		let mut stuck_tasks = Vec::new();
		let mut tasks_with_missing_deps = Vec::new();

		{
			let waiting = lock!(self.tasks_waiting)?;
			for (id, task_meta) in waiting.iter() {
				if task_meta.deps.is_empty() {
					stuck_tasks.push(*id);
					warn!("scheduler health: task {} in waiting with no dependencies", id);
					continue;
				}
				for dep in &task_meta.deps {
					let dep_exists = self.tasks_running.lock().ok().is_some_and(|r| r.contains_key(dep))
						|| self.tasks_waiting.lock().ok().is_some_and(|w| w.contains_key(dep))
						|| self
							.tasks_scheduled
							.lock()
							.ok()
							.is_some_and(|s| s.iter().any(|((_, task_id), _)| task_id == dep));

					if !dep_exists {
						tasks_with_missing_deps.push((*id, *dep));
						warn!("scheduler health: task {} depends on non-existent task {}", id, dep);
					}
				}
			}
		}

		Ok(SchedulerHealth {
			waiting: waiting_count,
			scheduled: scheduled_count,
			running: running_count,
			dependents: dependents_count,
			stuck_tasks,
			tasks_with_missing_deps,
		})
	}
}

#[derive(Debug, Clone)]
pub struct SchedulerHealth {
	pub waiting: usize,
	pub scheduled: usize,
	pub running: usize,
	pub dependents: usize,
	pub stuck_tasks: Vec<TaskId>,
	pub tasks_with_missing_deps: Vec<(TaskId, TaskId)>,
}

#[cfg(test)]
mod tests {
	use super::*;

	type State = Arc<Mutex<Vec<u8>>>;

	#[derive(Debug)]
	struct TestTask {
		num: u8,
	}

	impl TestTask {
		fn new(num: u8) -> Arc<Self> {
			Arc::new(Self { num })
		}
	}

	#[async_trait]
	impl Task<State> for TestTask {
		fn kind() -> &'static str {
			"test"
		}

		fn build(_id: TaskId, ctx: &str) -> ClResult<Arc<dyn Task<State>>> {
			let num: u8 = ctx.parse().map_err(|_| Error::Internal("test task context must be u8".into()))?;
			Ok(TestTask::new(num))
		}

		fn serialize(&self) -> String {
			self.num.to_string()
		}

		fn kind_of(&self) -> &'static str {
			"test"
		}

		async fn run(&self, state: &State) -> ClResult<()> {
			tokio::time::sleep(std::time::Duration::from_millis(50)).await;
			state.lock().unwrap().push(self.num);
			Ok(())
		}
	}

	#[derive(Debug, Clone)]
	struct FailingTask {
		id: u8,
		fail_count: u8,
		attempt: Arc<Mutex<u8>>,
	}

	impl FailingTask {
		fn new(id: u8, fail_count: u8) -> Arc<Self> {
			Arc::new(Self { id, fail_count, attempt: Arc::new(Mutex::new(0)) })
		}
	}

	#[async_trait]
	impl Task<State> for FailingTask {
		fn kind() -> &'static str {
			"failing"
		}

		fn build(_id: TaskId, ctx: &str) -> ClResult<Arc<dyn Task<State>>> {
			let (id, fail_count) = ctx
				.split(',')
				.collect_tuple()
				.ok_or_else(|| Error::Internal("failing task context must have 2 parts".into()))?;
			Ok(FailingTask::new(
				id.parse().map_err(|_| Error::Internal("id must be u8".into()))?,
				fail_count.parse().map_err(|_| Error::Internal("fail_count must be u8".into()))?,
			))
		}

		fn serialize(&self) -> String {
			format!("{},{}", self.id, self.fail_count)
		}

		fn kind_of(&self) -> &'static str {
			"failing"
		}

		async fn run(&self, state: &State) -> ClResult<()> {
			let mut attempt = self.attempt.lock().unwrap();
			*attempt += 1;
			if *attempt <= self.fail_count {
				return Err(Error::ServiceUnavailable(format!("task {} failed", self.id)));
			}
			state.lock().unwrap().push(self.id);
			Ok(())
		}
	}

	#[tokio::test]
	async fn runs_independent_tasks_then_their_dependent() {
		let store: Arc<dyn TaskStore<State>> = InMemoryTaskStore::new();
		let state: State = Arc::new(Mutex::new(Vec::new()));
		let scheduler = Scheduler::new(store);
		scheduler.start(state.clone());
		scheduler.register::<TestTask>().unwrap();

		let id1 = scheduler.task(TestTask::new(1)).now().await.unwrap();
		let id2 = scheduler.task(TestTask::new(2)).now().await.unwrap();
		scheduler.task(TestTask::new(3)).depend_on(vec![id1, id2]).schedule().await.unwrap();

		tokio::time::sleep(std::time::Duration::from_millis(400)).await;

		let st = state.lock().unwrap();
		assert_eq!(st.len(), 3);
		assert_eq!(*st.last().unwrap(), 3);
	}

	#[tokio::test]
	async fn retries_with_backoff_until_success() {
		let store: Arc<dyn TaskStore<State>> = InMemoryTaskStore::new();
		let state: State = Arc::new(Mutex::new(Vec::new()));
		let scheduler = Scheduler::new(store);
		scheduler.start(state.clone());
		scheduler.register::<FailingTask>().unwrap();

		let failing_task = FailingTask::new(42, 2);
		let retry_policy = RetryPolicy { wait_min_max: (1, 3600), times: 3 };
		scheduler.task(failing_task).with_retry(retry_policy).schedule().await.unwrap();

		tokio::time::sleep(std::time::Duration::from_secs(6)).await;

		let st = state.lock().unwrap();
		assert_eq!(st.as_slice(), &[42]);
	}

	#[test]
	fn backoff_is_exponential_and_capped() {
		let policy = RetryPolicy::new((10, 100), 5);
		assert_eq!(policy.calculate_backoff(0), 10);
		assert_eq!(policy.calculate_backoff(1), 20);
		assert_eq!(policy.calculate_backoff(3), 80);
		assert_eq!(policy.calculate_backoff(10), 100);
	}
}

// vim: ts=4
