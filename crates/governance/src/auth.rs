//! Request identity resolution
//!
//! Providers are looked up by name in an `AuthProviderRegistry` built once
//! at startup and handed to the HTTP layer.

use axum::http::HeaderMap;
use governance_trait::{Actor, RoleBinding};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{GovernanceError, Result};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const PLATFORM_ADMIN_HEADER: &str = "x-platform-admin";
pub const ENVIRONMENTS_HEADER: &str = "x-environments";

/// Turns request headers into an actor
pub trait AuthProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the request carries no identity
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Actor>>;
}

/// Trusts identity headers set by an upstream proxy.
///
/// `x-environments` lists the environments the caller's role binding
/// allows: absent means no binding at all, `*` or an empty value an
/// unrestricted binding, otherwise a comma-separated list. A list with no
/// entries, such as `" , "`, is treated like an absent header.
#[derive(Debug, Clone, Default)]
pub struct HeaderAuthProvider;

impl AuthProvider for HeaderAuthProvider {
    fn name(&self) -> &str {
        "header"
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Actor>> {
        let Some(id) = header_str(headers, ACTOR_ID_HEADER)? else {
            return Ok(None);
        };
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }

        let admin = header_str(headers, PLATFORM_ADMIN_HEADER)?
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        if admin {
            return Ok(Some(Actor::platform_admin(id)));
        }

        let bindings = match header_str(headers, ENVIRONMENTS_HEADER)? {
            None => Vec::new(),
            Some(value) if value.trim().is_empty() || value.trim() == "*" => {
                vec![RoleBinding::new("header", &[])]
            }
            Some(value) => {
                let envs: Vec<&str> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .collect();
                if envs.is_empty() {
                    // Only separators: no binding, so nothing is visible
                    Vec::new()
                } else {
                    vec![RoleBinding::new("header", &envs)]
                }
            }
        };
        Ok(Some(Actor::new(id, &bindings)))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| GovernanceError::InvalidRequest(format!("invalid {} header", name)))
        })
        .transpose()
}

/// Named auth providers
#[derive(Clone, Default)]
pub struct AuthProviderRegistry {
    providers: HashMap<String, Arc<dyn AuthProvider>>,
}

impl AuthProviderRegistry {
    /// A registry holding the built-in providers
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(HeaderAuthProvider));
        registry
    }

    /// Register a provider under its own name, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn AuthProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use governance_trait::{Environment, VisibilityPolicy};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_missing_identity() {
        let provider = HeaderAuthProvider;
        assert!(provider.authenticate(&HeaderMap::new()).unwrap().is_none());
        assert!(provider
            .authenticate(&headers(&[(ACTOR_ID_HEADER, "  ")]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_environment_header() {
        let provider = HeaderAuthProvider;

        let actor = provider
            .authenticate(&headers(&[(ACTOR_ID_HEADER, "alice")]))
            .unwrap()
            .unwrap();
        assert!(actor.visibility.is_deny_all());

        let actor = provider
            .authenticate(&headers(&[(ACTOR_ID_HEADER, "alice"), (ENVIRONMENTS_HEADER, "*")]))
            .unwrap()
            .unwrap();
        assert_eq!(actor.visibility, VisibilityPolicy::Unrestricted);

        let actor = provider
            .authenticate(&headers(&[
                (ACTOR_ID_HEADER, "alice"),
                (ENVIRONMENTS_HEADER, "test"),
            ]))
            .unwrap()
            .unwrap();
        assert!(actor.visibility.allows(Environment::Test));
        assert!(!actor.visibility.allows(Environment::Prod));
        assert!(!actor.platform_admin);
    }

    #[test]
    fn test_separator_only_environment_header_denies_all() {
        for value in [" , ", ",", ",,  ,"] {
            let actor = HeaderAuthProvider
                .authenticate(&headers(&[(ACTOR_ID_HEADER, "alice"), (ENVIRONMENTS_HEADER, value)]))
                .unwrap()
                .unwrap();
            assert!(actor.visibility.is_deny_all(), "{:?} must deny all", value);
        }
    }

    #[test]
    fn test_admin_header() {
        let actor = HeaderAuthProvider
            .authenticate(&headers(&[
                (ACTOR_ID_HEADER, "root"),
                (PLATFORM_ADMIN_HEADER, "true"),
            ]))
            .unwrap()
            .unwrap();
        assert!(actor.platform_admin);
    }

    struct StaticProvider;

    impl AuthProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        fn authenticate(&self, _headers: &HeaderMap) -> Result<Option<Actor>> {
            Ok(Some(Actor::platform_admin("svc")))
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = AuthProviderRegistry::with_builtins();
        assert!(registry.get("header").is_some());
        assert!(registry.get("static").is_none());

        registry.register(Arc::new(StaticProvider));
        assert_eq!(registry.names(), vec!["header".to_string(), "static".to_string()]);
        let actor = registry
            .get("static")
            .unwrap()
            .authenticate(&HeaderMap::new())
            .unwrap();
        assert_eq!(actor.map(|a| a.id), Some("svc".to_string()));
    }
}
