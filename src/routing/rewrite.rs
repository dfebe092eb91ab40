//! Path rewriting applied after a route matches.
//!
//! # Responsibilities
//! - Compile rewrite rules from configuration (fail fast on bad patterns)
//! - Apply a route's rule to the inbound path
//! - Normalize the result into a valid origin-form path
//!
//! # Design Decisions
//! - Rewriting is pure: no I/O, no shared state, same input same output
//! - Only the path is rewritten; the query string is carried separately
//! - Regex rules replace the first match only

use std::fmt;

use axum::http::uri::PathAndQuery;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::routing::table::Route;

/// Rewrite rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteSpec {
    /// Remove a literal leading prefix.
    StripPrefix(String),
    /// Regex search and replace of the first match.
    Replace { pattern: String, replacement: String },
}

/// Errors raised while compiling or applying a rewrite rule.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("invalid rewrite pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("strip_prefix rule must not be empty")]
    EmptyPrefix,

    #[error("rewrite of `{input}` produced an invalid path `{output}`")]
    InvalidPath { input: String, output: String },
}

/// A compiled path rewrite function.
pub trait PathRewrite: Send + Sync + fmt::Debug {
    /// Produce the outbound path for an inbound path.
    fn apply(&self, path: &str) -> String;
}

/// Removes a literal prefix when present.
#[derive(Debug, Clone)]
pub struct StripPrefix {
    prefix: String,
}

impl StripPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl PathRewrite for StripPrefix {
    fn apply(&self, path: &str) -> String {
        path.strip_prefix(self.prefix.as_str())
            .unwrap_or(path)
            .to_string()
    }
}

/// Replaces the first match of a regex.
#[derive(Debug, Clone)]
pub struct RegexReplace {
    pattern: Regex,
    replacement: String,
}

impl RegexReplace {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, RewriteError> {
        let compiled = Regex::new(pattern).map_err(|source| RewriteError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: compiled,
            replacement: replacement.into(),
        })
    }
}

impl PathRewrite for RegexReplace {
    fn apply(&self, path: &str) -> String {
        self.pattern
            .replace(path, self.replacement.as_str())
            .into_owned()
    }
}

impl RewriteSpec {
    /// Compile the rule into an executable rewrite.
    pub fn compile(&self) -> Result<Box<dyn PathRewrite>, RewriteError> {
        match self {
            RewriteSpec::StripPrefix(prefix) => {
                if prefix.is_empty() {
                    return Err(RewriteError::EmptyPrefix);
                }
                Ok(Box::new(StripPrefix::new(prefix.clone())))
            }
            RewriteSpec::Replace {
                pattern,
                replacement,
            } => Ok(Box::new(RegexReplace::new(pattern, replacement.clone())?)),
        }
    }
}

/// Compute the outbound path for `path` under `route`.
///
/// Without a rule the path is returned unchanged. With a rule, an empty result
/// becomes `/` and a result missing its leading slash gets one, so that
/// `/serverfoo` stripped of `/server` forwards as `/foo`.
pub fn rewrite(route: &Route, path: &str) -> Result<String, RewriteError> {
    let Some(rule) = route.rewrite() else {
        return Ok(path.to_string());
    };

    let mut output = rule.apply(path);
    if !output.starts_with('/') {
        output.insert(0, '/');
    }

    // Query strings travel separately, so a `?` here would corrupt the URI.
    if output.contains('?') || output.parse::<PathAndQuery>().is_err() {
        return Err(RewriteError::InvalidPath {
            input: path.to_string(),
            output,
        });
    }

    Ok(output)
}
