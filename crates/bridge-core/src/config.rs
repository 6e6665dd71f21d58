//! Layered configuration: environment variables with typed, validated
//! defaults. Loaded once at startup so a misconfiguration fails fast instead
//! of surfacing deep inside a task handler.

use bridge_types::error::{ClResult, Error};

const DEFAULT_OBJECT_SIZE_CAP: usize = 1 << 20; // 1 MiB
const DEFAULT_REFRESH_AGE_SECS: i64 = 30 * 24 * 3600; // 30 days
const DEFAULT_SEEN_IDS_CAPACITY: usize = 100_000;
const DEFAULT_PROTOCOL_RESOLUTION_CAPACITY: usize = 100_000;
const DEFAULT_KEY_FETCH_CACHE_CAPACITY: usize = 100;

/// Everything the bridge needs to know about its own deployment: which
/// domains it owns, which it distrusts, and the tuning knobs for the
/// fetch/load engine and its caches.
#[derive(Debug, Clone)]
pub struct Config {
	/// The bridge's own primary domain, e.g. `bridge.example`.
	pub primary_domain: Box<str>,
	/// Domain under which per-protocol subdomains are minted, e.g.
	/// `bridge.example` used as `<abbrev>.bridge.example`.
	pub super_domain: Box<str>,
	/// Additional domains this deployment also answers on.
	pub other_domains: Box<[Box<str>]>,
	/// Domains treated as local even though they aren't the primary domain.
	pub local_domains: Box<[Box<str>]>,
	/// Domains whose ids are always rejected at the blocklist step.
	pub domain_blocklist: Box<[Box<str>]>,
	/// Domains/protocols that require an existing follow before non-reply
	/// delivery is attempted (the push-protocol spam carve-out).
	pub limited_domains: Box<[Box<str>]>,

	/// Reject fetched objects whose serialized form exceeds this size.
	pub object_size_cap: usize,
	/// Cached objects older than this are refreshed on `remote=auto` loads.
	pub refresh_age_secs: i64,

	pub seen_ids_capacity: usize,
	pub protocol_resolution_capacity: usize,
	pub key_fetch_cache_capacity: usize,

	/// Address the HTTP surface listens on.
	pub listen_addr: Box<str>,
	/// Directory holding the sqlite database file; ignored under
	/// `local_development`, where storage is entirely in-memory.
	pub database_url: Box<str>,
	/// Shared secret the task dispatcher must present on `/queue/*` calls.
	pub dispatcher_secret: Box<str>,
	/// Bypass the durable queues and invoke task handlers inline; for tests
	/// and local development only.
	pub local_development: bool,
}

fn env_var(key: &str) -> Option<String> {
	std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_list(key: &str) -> Vec<Box<str>> {
	env_var(key)
		.map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(Box::from).collect())
		.unwrap_or_default()
}

fn env_usize(key: &str, default: usize) -> ClResult<usize> {
	match env_var(key) {
		None => Ok(default),
		Some(v) => v.parse().map_err(|_| Error::ConfigError(format!("{key} must be a positive integer"))),
	}
}

impl Config {
	/// Loads configuration from the process environment, falling back to
	/// defaults for everything except the values that have no safe default
	/// (`PRIMARY_DOMAIN`, `DISPATCHER_SECRET`).
	pub fn from_env() -> ClResult<Self> {
		let primary_domain = env_var("PRIMARY_DOMAIN")
			.ok_or_else(|| Error::ConfigError("PRIMARY_DOMAIN is required".into()))?
			.into_boxed_str();
		let super_domain =
			env_var("SUPER_DOMAIN").unwrap_or_else(|| primary_domain.to_string()).into_boxed_str();
		let dispatcher_secret = env_var("DISPATCHER_SECRET")
			.ok_or_else(|| Error::ConfigError("DISPATCHER_SECRET is required".into()))?
			.into_boxed_str();

		let config = Config {
			primary_domain,
			super_domain,
			other_domains: env_list("OTHER_DOMAINS").into(),
			local_domains: env_list("LOCAL_DOMAINS").into(),
			domain_blocklist: env_list("DOMAIN_BLOCKLIST").into(),
			limited_domains: env_list("LIMITED_DOMAINS").into(),
			object_size_cap: env_usize("OBJECT_SIZE_CAP", DEFAULT_OBJECT_SIZE_CAP)?,
			refresh_age_secs: env_var("REFRESH_AGE_SECS")
				.map(|v| v.parse::<i64>())
				.transpose()
				.map_err(|_| Error::ConfigError("REFRESH_AGE_SECS must be an integer".into()))?
				.unwrap_or(DEFAULT_REFRESH_AGE_SECS),
			seen_ids_capacity: env_usize("SEEN_IDS_CAPACITY", DEFAULT_SEEN_IDS_CAPACITY)?,
			protocol_resolution_capacity: env_usize(
				"PROTOCOL_RESOLUTION_CAPACITY",
				DEFAULT_PROTOCOL_RESOLUTION_CAPACITY,
			)?,
			key_fetch_cache_capacity: env_usize(
				"KEY_FETCH_CACHE_CAPACITY",
				DEFAULT_KEY_FETCH_CACHE_CAPACITY,
			)?,
			listen_addr: env_var("LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:8080".into()).into(),
			database_url: env_var("DATABASE_URL").unwrap_or_else(|| "./data".into()).into(),
			dispatcher_secret,
			local_development: env_var("LOCAL_DEVELOPMENT").as_deref() == Some("1"),
		};

		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> ClResult<()> {
		if self.primary_domain.is_empty() {
			return Err(Error::ConfigError("PRIMARY_DOMAIN must not be empty".into()));
		}
		if self.object_size_cap == 0 {
			return Err(Error::ConfigError("OBJECT_SIZE_CAP must be positive".into()));
		}
		if self.refresh_age_secs < 0 {
			return Err(Error::ConfigError("REFRESH_AGE_SECS must not be negative".into()));
		}
		Ok(())
	}

	/// True if `domain` is this deployment's own domain or one of its
	/// declared aliases.
	pub fn owns_domain(&self, domain: &str) -> bool {
		domain == self.primary_domain.as_ref()
			|| domain == self.super_domain.as_ref()
			|| self.other_domains.iter().any(|d| d.as_ref() == domain)
			|| self.local_domains.iter().any(|d| d.as_ref() == domain)
	}

	pub fn is_blocklisted_domain(&self, domain: &str) -> bool {
		self.domain_blocklist.iter().any(|d| d.as_ref() == domain)
	}

	pub fn is_limited_domain(&self, domain: &str) -> bool {
		self.limited_domains.iter().any(|d| d.as_ref() == domain)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base_config() -> Config {
		Config {
			primary_domain: "bridge.example".into(),
			super_domain: "bridge.example".into(),
			other_domains: Box::new([]),
			local_domains: Box::new([]),
			domain_blocklist: Box::new(["evil.example".into()]),
			limited_domains: Box::new(["atproto".into()]),
			object_size_cap: DEFAULT_OBJECT_SIZE_CAP,
			refresh_age_secs: DEFAULT_REFRESH_AGE_SECS,
			seen_ids_capacity: DEFAULT_SEEN_IDS_CAPACITY,
			protocol_resolution_capacity: DEFAULT_PROTOCOL_RESOLUTION_CAPACITY,
			key_fetch_cache_capacity: DEFAULT_KEY_FETCH_CACHE_CAPACITY,
			listen_addr: "127.0.0.1:8080".into(),
			database_url: "sqlite::memory:".into(),
			dispatcher_secret: "s3cr3t".into(),
			local_development: true,
		}
	}

	#[test]
	fn owns_domain_checks_all_domain_sets() {
		let cfg = base_config();
		assert!(cfg.owns_domain("bridge.example"));
		assert!(!cfg.owns_domain("elsewhere.example"));
	}

	#[test]
	fn blocklist_and_limited_domain_checks() {
		let cfg = base_config();
		assert!(cfg.is_blocklisted_domain("evil.example"));
		assert!(!cfg.is_blocklisted_domain("bridge.example"));
		assert!(cfg.is_limited_domain("atproto"));
	}
}

// vim: ts=4
