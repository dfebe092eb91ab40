//! Route matching logic.
//!
//! # Responsibilities
//! - Select the first route whose prefix is a literal prefix of the path
//! - Signal "no match" so the caller can fall through to local handling
//!
//! # Design Decisions
//! - Path matching is byte-wise and case-sensitive
//! - No globbing, no regex, no segment awareness: `/server` matches `/serverless`
//! - Declaration order is the only tie-break

use crate::routing::table::{Route, RouteTable};

/// Return the first route whose prefix starts `path`, if any.
pub fn match_route<'t>(table: &'t RouteTable, path: &str) -> Option<&'t Route> {
    table
        .routes()
        .iter()
        .find(|route| path.as_bytes().starts_with(route.prefix().as_bytes()))
}
