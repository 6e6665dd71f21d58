//! The `/r/<url>` redirect and content-negotiation endpoint: given an
//! arbitrary URL, either 301-redirect to it (adding a `rel=alternate` link
//! back to the bridged representation) or serve the bridged activity
//! directly when the client asked for an activity media type.

use bridge_core::prelude::App;
use bridge_types::prelude::*;

use crate::loader::{load, RemoteMode};
use crate::protocol::ProtocolRegistry;

/// Domains the bridge is permitted to redirect to, beyond the protocols'
/// own recognized hosts. Mirrors a narrow allowlist some bridged consumer
/// apps require before they'll follow a redirect at all.
const REDIRECT_ALLOWLIST: &[&str] = &["bsky.app"];

pub enum RedirectOutcome {
	/// 301 redirect to `location`, with the bridged representation linked
	/// via a `Link: <...>; rel="alternate"` header for clients that prefer
	/// to negotiate instead of following the redirect.
	Redirect { location: Box<str>, alternate: Box<str> },
	/// The client asked for an activity representation directly (via
	/// `Accept`); served inline instead of redirecting.
	Serve(bridge_types::model::Activity),
}

fn wants_activity(accept: &str) -> bool {
	const ACTIVITY_MEDIA_TYPES: &[&str] =
		&["application/activity+json", "application/ld+json", "application/json"];
	ACTIVITY_MEDIA_TYPES.iter().any(|mt| accept.contains(mt))
}

/// Repairs a single missing slash after the scheme, the one malformation
/// observed in the wild (`https:/example.com/...`) that would otherwise
/// produce a relative-looking, unparseable URL.
fn repair_scheme_slashes(to: &str) -> String {
	if let Some(rest) = to.strip_prefix("https:/").filter(|r| !r.starts_with('/')) {
		format!("https://{rest}")
	} else if let Some(rest) = to.strip_prefix("http:/").filter(|r| !r.starts_with('/')) {
		format!("http://{rest}")
	} else {
		to.to_string()
	}
}

/// Handles a request to `/r/<to>[?query]`. `query` is reattached to `to`
/// verbatim (it belongs to the destination, not to this endpoint).
pub async fn redirect(
	state: &App,
	registry: &ProtocolRegistry,
	to: &str,
	query: Option<&str>,
	accept: Option<&str>,
) -> ClResult<RedirectOutcome> {
	let repaired = repair_scheme_slashes(to);
	let full = match query {
		Some(q) if !q.is_empty() => format!("{repaired}?{q}"),
		_ => repaired,
	};

	let url = url::Url::parse(&full)?;
	let host = url.host_str().ok_or_else(|| Error::ValidationError("redirect target has no host".into()))?;

	let protocol = registry.for_id(&full);
	let recognized = protocol.is_ok() || REDIRECT_ALLOWLIST.contains(&host);
	if !recognized {
		return Err(Error::Blocklisted(host.to_string()));
	}
	if state.config.is_blocklisted_domain(host) {
		return Err(Error::Blocklisted(host.to_string()));
	}

	if accept.is_some_and(wants_activity) {
		let object = load(state, registry, &full, RemoteMode::Auto).await?;
		let activity =
			object.our_as1.ok_or_else(|| Error::NotFound)?;
		return Ok(RedirectOutcome::Serve(activity));
	}

	Ok(RedirectOutcome::Redirect { location: full.into_boxed_str(), alternate: to.into() })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn repairs_a_single_missing_slash_after_the_scheme() {
		assert_eq!(repair_scheme_slashes("https:/example.com/post/1"), "https://example.com/post/1");
		assert_eq!(repair_scheme_slashes("https://example.com/post/1"), "https://example.com/post/1");
		assert_eq!(repair_scheme_slashes("http:/example.com"), "http://example.com");
	}

	#[test]
	fn recognizes_activity_accept_headers() {
		assert!(wants_activity("application/activity+json"));
		assert!(wants_activity("text/html, application/ld+json;q=0.9"));
		assert!(!wants_activity("text/html"));
	}
}

// vim: ts=4
