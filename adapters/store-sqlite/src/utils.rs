//! Shared helpers: SQL error mapping and small parsing utilities used
//! across the store and task-store modules.

use bridge_types::prelude::*;

/// Parse a comma-separated list of task ids, as stored by `string_agg`.
pub(crate) fn parse_u64_list(s: &str) -> Box<[u64]> {
	s.split(',').filter_map(|s| s.trim().parse().ok()).collect::<Vec<_>>().into_boxed_slice()
}

/// Log database error for debugging.
pub(crate) fn inspect(err: &sqlx::Error) {
	warn!("db error: {err:#?}");
}

/// Collect an iterator of query results, translating errors.
pub(crate) fn collect_res<T>(iter: impl Iterator<Item = Result<T, sqlx::Error>>) -> ClResult<Vec<T>> {
	let mut items = Vec::new();
	for item in iter {
		items.push(item.inspect_err(inspect).map_err(|_| Error::DbError)?);
	}
	Ok(items)
}

// vim: ts=4
