use ahash::AHashMap;
use std::hash::Hash;
use std::{error::Error, fmt};

use crate::utils::CancelToken;

const ERR_MSG_NO_HANDLER: &str = "no handler registered for key";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MuxError {
    HandlerNotFound,
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxError::HandlerNotFound => write!(f, "{ERR_MSG_NO_HANDLER}"),
        }
    }
}

impl Error for MuxError {}

/// Request wrapper used when one pair serves several logical operations:
/// a routing key, caller metadata available to key resolution, and the
/// payload proper.
pub struct MuxRequest<K, M, T> {
    pub key: K,
    pub meta: M,
    pub data: T,
}

type BoxRule<K, M> = Box<dyn Fn(K, &M) -> K + Send + Sync>;
type BoxRoute<T, U> = Box<dyn Fn(&CancelToken, T) -> anyhow::Result<U> + Send + Sync>;

/// Read-only table of key-resolution rules.
///
/// A rule maps a partially specified key (say `/segment/{tier}`) to a fully
/// defined one using the request metadata, allowing fine-grained handler
/// selection. Keys without a rule resolve to themselves.
pub struct Resolver<K, M> {
    rules: AHashMap<K, BoxRule<K, M>>,
}

impl<K: Eq + Hash, M> Resolver<K, M> {
    pub fn new() -> Self {
        Self {
            rules: AHashMap::new(),
        }
    }

    /// Register a resolution rule for `key`.
    pub fn rule(mut self, key: K, f: impl Fn(K, &M) -> K + Send + Sync + 'static) -> Self {
        self.rules.insert(key, Box::new(f));
        self
    }

    pub fn resolve(&self, key: K, meta: &M) -> K {
        match self.rules.get(&key) {
            Some(f) => f(key, meta),
            None => key,
        }
    }
}

impl<K: Eq + Hash, M> Default for Resolver<K, M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Key-based handler table, usable as the handler of a pair.
///
/// Dispatch looks the key up directly first; on a miss the key is resolved
/// against the request metadata and looked up once more. Routes registered
/// under partially specified keys are therefore reachable only through the
/// resolver.
pub struct MuxHandler<K, M, T, U> {
    routes: AHashMap<K, BoxRoute<T, U>>,
    resolver: Option<Resolver<K, M>>,
}

impl<K, M, T, U> MuxHandler<K, M, T, U>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            routes: AHashMap::new(),
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver<K, M>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register the handler for a fully defined key.
    pub fn route(
        mut self,
        key: K,
        handler: impl Fn(&CancelToken, T) -> anyhow::Result<U> + Send + Sync + 'static,
    ) -> Self {
        self.routes.insert(key, Box::new(handler));
        self
    }

    pub fn handle(&self, cancel: &CancelToken, req: MuxRequest<K, M, T>) -> anyhow::Result<U> {
        if let Some(handler) = self.routes.get(&req.key) {
            return handler(cancel, req.data);
        }

        if let Some(resolver) = &self.resolver {
            let resolved = resolver.resolve(req.key.clone(), &req.meta);
            if let Some(handler) = self.routes.get(&resolved) {
                return handler(cancel, req.data);
            }
        }

        Err(MuxError::HandlerNotFound.into())
    }
}

impl<K, M, T, U> Default for MuxHandler<K, M, T, U>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancelToken {
        CancelToken::new_root()
    }

    #[test]
    fn routes_by_exact_key() {
        let mux: MuxHandler<&str, (), i32, i32> = MuxHandler::new()
            .route("/square", |_, v| Ok(v * v))
            .route("/cube", |_, v| Ok(v * v * v));

        let out = mux
            .handle(
                &token(),
                MuxRequest {
                    key: "/cube",
                    meta: (),
                    data: 4,
                },
            )
            .expect("routed");
        assert_eq!(out, 64);
    }

    #[test]
    fn resolves_parameterised_keys() {
        let resolver: Resolver<String, String> = Resolver::new().rule(
            "/segment/{tier}".to_string(),
            |_, tier: &String| format!("/segment/{tier}"),
        );

        let mux: MuxHandler<String, String, i32, &'static str> = MuxHandler::new()
            .with_resolver(resolver)
            .route("/segment/premier".to_string(), |_, _| Ok("premier rate"));

        let out = mux
            .handle(
                &token(),
                MuxRequest {
                    key: "/segment/{tier}".to_string(),
                    meta: "premier".to_string(),
                    data: 0,
                },
            )
            .expect("resolved route");
        assert_eq!(out, "premier rate");
    }

    #[test]
    fn unknown_key_is_a_typed_miss() {
        let mux: MuxHandler<&str, (), i32, i32> = MuxHandler::new().route("/known", |_, v| Ok(v));

        let err = mux
            .handle(
                &token(),
                MuxRequest {
                    key: "/unknown",
                    meta: (),
                    data: 1,
                },
            )
            .expect_err("must miss");
        assert_eq!(
            err.downcast_ref::<MuxError>(),
            Some(&MuxError::HandlerNotFound)
        );
    }
}
