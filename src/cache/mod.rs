//! In-process cache of each company's visible module set

use crate::domain::StringUuid;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CachedModules {
    modules: HashSet<StringUuid>,
    expires_at: Instant,
}

/// Per-company visible module cache.
///
/// Owned by whoever builds the services and shared through `Arc`; never a
/// process global. A `None` TTL turns every lookup into a miss. An entry
/// lives for the TTL or its own `max_age`, whichever is shorter.
#[derive(Debug)]
pub struct VisibleModulesCache {
    ttl: Option<Duration>,
    entries: Mutex<HashMap<StringUuid, CachedModules>>,
}

impl VisibleModulesCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    /// Fresh cached set for `company_id`, evicting it if stale.
    pub async fn get(&self, company_id: StringUuid) -> Option<HashSet<StringUuid>> {
        self.ttl?;
        let mut entries = self.entries.lock().await;
        match entries.get(&company_id) {
            Some(cached) if Instant::now() < cached.expires_at => Some(cached.modules.clone()),
            Some(_) => {
                entries.remove(&company_id);
                None
            }
            None => None,
        }
    }

    pub async fn put(
        &self,
        company_id: StringUuid,
        modules: HashSet<StringUuid>,
        max_age: Option<Duration>,
    ) {
        let Some(ttl) = self.ttl else {
            return;
        };
        let lifetime = max_age.map_or(ttl, |age| age.min(ttl));
        if lifetime.is_zero() {
            return;
        }
        self.entries.lock().await.insert(
            company_id,
            CachedModules {
                modules,
                expires_at: Instant::now() + lifetime,
            },
        );
    }

    /// Drop the entry for one company (its subscription changed).
    pub async fn invalidate(&self, company_id: StringUuid) {
        self.entries.lock().await.remove(&company_id);
    }

    /// Drop everything (the expiry sweep touched an unknown set of companies).
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

impl Default for VisibleModulesCache {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(60)))
    }
}
