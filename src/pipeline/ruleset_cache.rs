//! Process-wide spam ruleset cache.
//!
//! The ruleset lives in object storage; a parameter holds its key. The
//! compiled rules are cached with their load time and reloaded once older
//! than the TTL. A failed load yields an empty ruleset (nothing is flagged by
//! patterns) and is not cached, so the next call tries again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::pipeline::rules::{CompiledRules, SpamRuleSet};
use crate::storage::BlobStore;
use crate::store::ParameterStore;

/// Default time-to-live for a loaded ruleset.
pub const DEFAULT_RULESET_TTL: Duration = Duration::from_secs(300);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct CachedRules {
    rules: Arc<CompiledRules>,
    loaded_at: DateTime<Utc>,
}

/// Lazily loaded, TTL-refreshed ruleset.
pub struct RulesetCache {
    params: Arc<dyn ParameterStore>,
    blobs: Arc<dyn BlobStore>,
    param_name: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<CachedRules>>,
}

impl RulesetCache {
    pub fn new(
        params: Arc<dyn ParameterStore>,
        blobs: Arc<dyn BlobStore>,
        param_name: impl Into<String>,
    ) -> Self {
        Self {
            params,
            blobs,
            param_name: param_name.into(),
            ttl: DEFAULT_RULESET_TTL,
            clock: Arc::new(SystemClock),
            cached: RwLock::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current rules, reloading if the cached copy is missing or expired.
    ///
    /// Concurrent callers may both reload; the last one to finish wins.
    pub async fn get(&self) -> Arc<CompiledRules> {
        let now = self.clock.now();
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref()
                && self.is_fresh(entry.loaded_at, now)
            {
                return Arc::clone(&entry.rules);
            }
        }

        match self.load().await {
            Ok(rules) => {
                let rules = Arc::new(rules);
                *self.cached.write().await = Some(CachedRules {
                    rules: Arc::clone(&rules),
                    loaded_at: now,
                });
                rules
            }
            Err(reason) => {
                error!(param = %self.param_name, error = %reason, "Failed to load spam ruleset");
                Arc::new(CompiledRules::empty())
            }
        }
    }

    fn is_fresh(&self, loaded_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - loaded_at).to_std() {
            Ok(age) => age < self.ttl,
            // Clock went backwards; keep what we have.
            Err(_) => true,
        }
    }

    async fn load(&self) -> Result<CompiledRules, String> {
        let key = self
            .params
            .get_parameter(&self.param_name)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("parameter {} is not set", self.param_name))?;

        let bytes = self.blobs.get(&key).await.map_err(|e| e.to_string())?;
        let content = String::from_utf8(bytes).map_err(|e| e.to_string())?;

        let compiled = SpamRuleSet::parse(&content).compile();
        info!(
            key = %key,
            rules = compiled.len(),
            skipped = compiled.skipped(),
            "Spam ruleset loaded"
        );
        Ok(compiled)
    }
}
