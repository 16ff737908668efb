//! The Operation Router's route table (part of C11): matches an inbound
//! operation event's `path` against an ordered table to find which
//! subsystem services it. Supports prefix and exact-path matching, first
//! match wins, with the legacy flat `{"query": "..."}` event shape accepted
//! as an alias for a Snowflake query when no route matches.

use serde_json::Value;

/// How a route's `path` is matched against an event's `path` attribute.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Prefix(String),
    Equals(String),
}

impl PathMatcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathMatcher::Equals(exact) => path == exact,
        }
    }
}

/// Which subsystem a matched route hands the operation to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Snowflake,
    Storage,
    Health,
    Logs,
    Metrics,
    PushMetrics,
    Upgrade,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub matcher: PathMatcher,
    pub kind: RouteKind,
}

/// An ordered table of routes, checked top to bottom; the first match wins.
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// The table the Operation Router is wired with in production: every
    /// path named in the admin/warehouse contract (health/metrics scrape
    /// routes are handled separately by the HTTP surface, not through this
    /// table).
    pub fn default_routes() -> Self {
        Self::new(vec![
            Route {
                matcher: PathMatcher::Prefix("/api/v1/agent/execute/snowflake".to_owned()),
                kind: RouteKind::Snowflake,
            },
            Route {
                matcher: PathMatcher::Prefix("/api/v1/agent/execute/storage".to_owned()),
                kind: RouteKind::Storage,
            },
            Route {
                matcher: PathMatcher::Equals("/api/v1/test/health".to_owned()),
                kind: RouteKind::Health,
            },
            Route {
                matcher: PathMatcher::Equals("/api/v1/snowflake/logs".to_owned()),
                kind: RouteKind::Logs,
            },
            Route {
                matcher: PathMatcher::Equals("/api/v1/snowflake/metrics".to_owned()),
                kind: RouteKind::Metrics,
            },
            Route {
                matcher: PathMatcher::Equals("push_metrics".to_owned()),
                kind: RouteKind::PushMetrics,
            },
            Route {
                matcher: PathMatcher::Equals("/api/v1/upgrade".to_owned()),
                kind: RouteKind::Upgrade,
            },
        ])
    }

    /// Resolves the route for `event`: route table first by `path`, then the
    /// legacy flat `query` key aliased to a Snowflake query.
    pub fn resolve(&self, event: &Value) -> Option<RouteKind> {
        if let Some(path) = event.get("path").and_then(Value::as_str) {
            for route in &self.routes {
                if route.matcher.matches(path) {
                    return Some(route.kind);
                }
            }
        }

        if event.get("query").and_then(Value::as_str).is_some() {
            return Some(RouteKind::Snowflake);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(vec![
            Route {
                matcher: PathMatcher::Equals("/healthcheck".to_owned()),
                kind: RouteKind::Health,
            },
            Route {
                matcher: PathMatcher::Prefix("/queries/".to_owned()),
                kind: RouteKind::Snowflake,
            },
        ])
    }

    #[test]
    fn exact_match_wins_over_later_prefix_routes() {
        let event = serde_json::json!({"path": "/healthcheck"});
        assert_eq!(table().resolve(&event), Some(RouteKind::Health));
    }

    #[test]
    fn prefix_match_resolves_nested_paths() {
        let event = serde_json::json!({"path": "/queries/snowflake/123"});
        assert_eq!(table().resolve(&event), Some(RouteKind::Snowflake));
    }

    #[test]
    fn legacy_flat_query_shape_falls_back_to_snowflake() {
        let event = serde_json::json!({"query": "SELECT 1"});
        assert_eq!(table().resolve(&event), Some(RouteKind::Snowflake));
    }

    #[test]
    fn unmatched_event_resolves_to_none() {
        let event = serde_json::json!({"path": "/unknown"});
        assert_eq!(table().resolve(&event), None);
    }

    #[test]
    fn first_match_wins_when_routes_overlap() {
        let routes = RouteTable::new(vec![
            Route {
                matcher: PathMatcher::Prefix("/a".to_owned()),
                kind: RouteKind::Snowflake,
            },
            Route {
                matcher: PathMatcher::Prefix("/a/b".to_owned()),
                kind: RouteKind::Storage,
            },
        ]);
        let event = serde_json::json!({"path": "/a/b/c"});
        assert_eq!(routes.resolve(&event), Some(RouteKind::Snowflake));
    }

    #[test]
    fn default_routes_dispatch_to_the_documented_subsystems() {
        let routes = RouteTable::default_routes();
        assert_eq!(
            routes.resolve(&serde_json::json!({"path": "/api/v1/agent/execute/snowflake/query"})),
            Some(RouteKind::Snowflake)
        );
        assert_eq!(
            routes.resolve(&serde_json::json!({"path": "/api/v1/agent/execute/storage/read"})),
            Some(RouteKind::Storage)
        );
        assert_eq!(
            routes.resolve(&serde_json::json!({"path": "/api/v1/test/health"})),
            Some(RouteKind::Health)
        );
        assert_eq!(
            routes.resolve(&serde_json::json!({"path": "/api/v1/upgrade"})),
            Some(RouteKind::Upgrade)
        );
    }
}
