//! Route table construction and storage.
//!
//! # Responsibilities
//! - Compile authored `RouteSpec`s into immutable `Route`s
//! - Reject empty prefixes, unparseable upstreams, bad rewrite rules
//! - Reject identical prefixes declared with conflicting WebSocket flags
//! - Preserve declaration order exactly as authored
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - No sorting: callers order specific prefixes before general ones
//! - Reload builds a fresh table; the server swaps the whole `Arc`

use std::collections::HashMap;
use std::str::FromStr;

use axum::http::uri::Authority;
use url::Url;

use crate::config::loader::ConfigError;
use crate::config::validation::ValidationError;
use crate::routing::rewrite::PathRewrite;

pub use crate::config::schema::RouteSpec;

/// A compiled forwarding rule.
#[derive(Debug)]
pub struct Route {
    name: String,
    prefix: String,
    authority: Authority,
    websocket: bool,
    rewrite_ws_origin: bool,
    preserve_host: bool,
    rewrite: Option<Box<dyn PathRewrite>>,
}

impl Route {
    /// Display name (defaults to the prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Upstream `host[:port]`.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn is_websocket(&self) -> bool {
        self.websocket
    }

    pub fn rewrite_ws_origin(&self) -> bool {
        self.rewrite_ws_origin
    }

    pub fn preserve_host(&self) -> bool {
        self.preserve_host
    }

    pub fn rewrite(&self) -> Option<&dyn PathRewrite> {
        self.rewrite.as_deref()
    }

    /// The upstream's own origin, used when rewriting the handshake `Origin`.
    pub fn upstream_origin(&self) -> String {
        format!("http://{}", self.authority)
    }
}

/// Ordered, immutable set of routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table from authored specs, in order.
    pub fn load(specs: &[RouteSpec]) -> Result<Self, ConfigError> {
        let routes = compile_routes(specs).map_err(ConfigError::Validation)?;
        Ok(Self { routes })
    }

    /// Routes in declaration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Compile every spec, collecting all errors instead of stopping at the first.
pub(crate) fn compile_routes(specs: &[RouteSpec]) -> Result<Vec<Route>, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut routes = Vec::with_capacity(specs.len());
    let mut seen: HashMap<&str, bool> = HashMap::new();

    for (index, spec) in specs.iter().enumerate() {
        if spec.prefix.is_empty() {
            errors.push(ValidationError::EmptyPrefix { index });
            continue;
        }

        match seen.get(spec.prefix.as_str()) {
            Some(&websocket) if websocket != spec.websocket => {
                errors.push(ValidationError::ConflictingWebSocket {
                    prefix: spec.prefix.clone(),
                });
                continue;
            }
            Some(_) => {
                tracing::warn!(
                    prefix = %spec.prefix,
                    index,
                    "Duplicate route prefix is unreachable"
                );
            }
            None => {
                seen.insert(spec.prefix.as_str(), spec.websocket);
            }
        }

        if spec.rewrite_ws_origin && !spec.websocket {
            tracing::warn!(
                prefix = %spec.prefix,
                "rewrite_ws_origin has no effect on a non-websocket route"
            );
        }

        let authority = match parse_upstream(&spec.upstream) {
            Ok(authority) => authority,
            Err(reason) => {
                errors.push(ValidationError::InvalidUpstream {
                    prefix: spec.prefix.clone(),
                    upstream: spec.upstream.clone(),
                    reason,
                });
                continue;
            }
        };

        let rewrite = match spec.rewrite.as_ref().map(|rule| rule.compile()).transpose() {
            Ok(rewrite) => rewrite,
            Err(source) => {
                errors.push(ValidationError::Rewrite {
                    prefix: spec.prefix.clone(),
                    source,
                });
                continue;
            }
        };

        routes.push(Route {
            name: spec.name.clone().unwrap_or_else(|| spec.prefix.clone()),
            prefix: spec.prefix.clone(),
            authority,
            websocket: spec.websocket,
            rewrite_ws_origin: spec.rewrite_ws_origin,
            preserve_host: spec.preserve_host,
            rewrite,
        });
    }

    if errors.is_empty() {
        Ok(routes)
    } else {
        Err(errors)
    }
}

/// Accept `host:port` or an `http://` / `ws://` URL without a path.
pub fn parse_upstream(target: &str) -> Result<Authority, String> {
    if target.is_empty() {
        return Err("upstream must not be empty".to_string());
    }

    if !target.contains("://") {
        return Authority::from_str(target).map_err(|e| e.to_string());
    }

    let url = Url::parse(target).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "ws" => {}
        other => return Err(format!("unsupported scheme `{other}`")),
    }
    if !matches!(url.path(), "" | "/") || url.query().is_some() {
        return Err("upstream must not carry a path or query".to_string());
    }
    let host = url
        .host_str()
        .ok_or_else(|| "upstream has no host".to_string())?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Authority::from_str(&authority).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::rewrite::RewriteSpec;

    fn spec(prefix: &str, websocket: bool) -> RouteSpec {
        RouteSpec {
            prefix: prefix.into(),
            upstream: "127.0.0.1:8080".into(),
            websocket,
            ..RouteSpec::default()
        }
    }

    #[test]
    fn preserves_declaration_order() {
        let table = RouteTable::load(&[spec("/b", false), spec("/a", false), spec("/", false)])
            .unwrap();
        let prefixes: Vec<_> = table.routes().iter().map(Route::prefix).collect();
        assert_eq!(prefixes, vec!["/b", "/a", "/"]);
    }

    #[test]
    fn rejects_empty_prefix() {
        let err = RouteTable::load(&[spec("", false)]).unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(matches!(errors[0], ValidationError::EmptyPrefix { index: 0 }))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_conflicting_websocket_flags() {
        let err = RouteTable::load(&[spec("/ws", true), spec("/ws", false)]).unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert!(matches!(
                &errors[0],
                ValidationError::ConflictingWebSocket { prefix } if prefix == "/ws"
            )),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_prefix_with_same_flag_is_allowed() {
        let table = RouteTable::load(&[spec("/api", false), spec("/api", false)]).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn malformed_rewrite_is_fatal() {
        let mut bad = spec("/api", false);
        bad.rewrite = Some(RewriteSpec::Replace {
            pattern: "[".into(),
            replacement: String::new(),
        });
        assert!(RouteTable::load(&[bad]).is_err());
    }

    #[test]
    fn upstream_forms() {
        assert_eq!(parse_upstream("localhost:8080").unwrap().as_str(), "localhost:8080");
        assert_eq!(parse_upstream("ws://localhost:8080").unwrap().as_str(), "localhost:8080");
        assert_eq!(parse_upstream("http://backend").unwrap().as_str(), "backend");
        assert!(parse_upstream("https://localhost:8443").is_err());
        assert!(parse_upstream("http://localhost:8080/api").is_err());
        assert!(parse_upstream("").is_err());
    }

    #[test]
    fn name_defaults_to_prefix() {
        let mut named = spec("/result", false);
        named.name = Some("results".into());
        let table = RouteTable::load(&[spec("/server", false), named]).unwrap();
        assert_eq!(table.routes()[0].name(), "/server");
        assert_eq!(table.routes()[1].name(), "results");
    }

    #[test]
    fn upstream_origin_uses_authority() {
        let table = RouteTable::load(&[spec("/ws", true)]).unwrap();
        assert_eq!(table.routes()[0].upstream_origin(), "http://127.0.0.1:8080");
    }
}
