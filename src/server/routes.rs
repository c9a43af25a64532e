//! Prefix route table.
//!
//! Lookups are lock-free: readers load an immutable snapshot while writers
//! build a modified copy and swap it in, so a lookup sees either the table
//! before a change or after it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::server::handler::RouteTarget;

/// Orders prefixes longest first, then lexicographically, so the first
/// matching key in iteration order is the one that wins.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RouteKey(String);

impl Ord for RouteKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .len()
            .cmp(&self.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for RouteKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type Snapshot = BTreeMap<RouteKey, RouteTarget>;

/// A resolved route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub prefix: String,
    pub target: RouteTarget,
}

#[derive(Default)]
pub struct RouteTable {
    routes: ArcSwap<Snapshot>,
    // Serializes writers so concurrent registrations do not lose each other.
    write_lock: Mutex<()>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `target` under `prefix`, returning the target it replaced.
    pub fn register(&self, prefix: impl Into<String>, target: RouteTarget) -> Option<RouteTarget> {
        let prefix = prefix.into();
        tracing::debug!(prefix = %prefix, "registering route");

        self.update(|routes| routes.insert(RouteKey(prefix), target))
    }

    pub fn unregister(&self, prefix: &str) -> Option<RouteTarget> {
        self.update(|routes| routes.remove(&RouteKey(prefix.to_string())))
    }

    /// Finds the longest registered prefix of `uri`.
    pub fn resolve(&self, uri: &str) -> Option<RouteMatch> {
        let routes = self.routes.load();
        routes
            .iter()
            .find(|(key, _)| uri.starts_with(key.0.as_str()))
            .map(|(key, target)| RouteMatch {
                prefix: key.0.clone(),
                target: target.clone(),
            })
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.routes.load().keys().map(|k| k.0.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }

    fn update<R>(&self, change: impl FnOnce(&mut Snapshot) -> R) -> R {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Snapshot::clone(&self.routes.load());
        let result = change(&mut next);
        self.routes.store(Arc::new(next));
        result
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("prefixes", &self.prefixes())
            .finish()
    }
}
