//! Path-prefix route table.

use crate::cache::CacheValid;
use crate::config::RouteConfig;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    prefix: String,
    strip_prefix: bool,
    cache_valid: CacheValid,
}

/// Where a request path goes and which cache defaults it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub upstream_path: String,
    pub cache_valid: Option<CacheValid>,
    /// Prefix of the matched route, if any.
    pub route: Option<String>,
}

/// Routes ordered longest prefix first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let mut table = routes
            .iter()
            .map(|r| {
                Ok(Route {
                    prefix: r.prefix.clone(),
                    strip_prefix: r.strip_prefix,
                    cache_valid: r.cache_valid()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        table.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes: table })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Configured prefixes, longest first.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.prefix.as_str())
    }

    /// Match `path` against the longest configured prefix.
    ///
    /// Unmatched paths are forwarded unchanged with no cache defaults.
    pub fn resolve(&self, path: &str) -> Resolved {
        let Some(route) = self.routes.iter().find(|r| path.starts_with(&r.prefix)) else {
            return Resolved {
                upstream_path: path.to_string(),
                cache_valid: None,
                route: None,
            };
        };
        let upstream_path = if route.strip_prefix {
            let rest = &path[route.prefix.len()..];
            if rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{rest}")
            }
        } else {
            path.to_string()
        };
        Resolved {
            upstream_path,
            cache_valid: (!route.cache_valid.is_empty()).then(|| route.cache_valid.clone()),
            route: Some(route.prefix.clone()),
        }
    }
}
