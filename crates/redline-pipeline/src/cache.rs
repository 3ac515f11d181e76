//! Result cache: LRU order, TTL expiry, and a byte budget.
//!
//! Keys are fingerprints of everything that determines a model's answer, so a
//! prompt change (bumping `prompt_version`) orphans old entries instead of
//! serving them. Callers always receive clones; entries never leave the cache
//! by reference.
//!
//! Sizes are estimates (serialised JSON length plus key length). They only
//! need to be consistent, not exact.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use redline_core::{AnalysisResult, Tier};
use ring::digest;
use serde::Serialize;
use tracing::debug;

use crate::config::CacheConfig;
use crate::prompt::PromptContext;

/// Monotonic time source, injectable so expiry can be tested without sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Duration) {
        self.millis.store(to.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Deterministic cache key for one analysis.
///
/// The text and prompt context are hashed with SHA-256; tier, prompt version
/// and temperature are appended in the clear so keys stay debuggable.
pub fn fingerprint(
    text: &str,
    context: &PromptContext,
    tier: Tier,
    prompt_version: &str,
    temperature: f32,
) -> String {
    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(text.as_bytes());
    ctx.update(&[0]);
    if let Ok(json) = serde_json::to_vec(context) {
        ctx.update(&json);
    }
    let hash = hex::encode(ctx.finish());
    format!("{hash}:{tier}:{prompt_version}:{temperature:.2}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Entries refused because they alone exceed the byte budget.
    pub rejected: u64,
    pub entries: usize,
    pub bytes: usize,
}

#[derive(Debug)]
struct Entry {
    result: AnalysisResult,
    inserted_at: Duration,
    bytes: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    /// Least recently used at the front.
    order: VecDeque<String>,
    total_bytes: usize,
    stats: CacheStats,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.bytes;
        self.order.retain(|k| k != key);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let Some(oldest) = self.order.pop_front() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&oldest) {
            self.total_bytes -= entry.bytes;
            self.stats.evictions += 1;
            debug!(key = %oldest, bytes = entry.bytes, "evicted cache entry");
        }
        true
    }
}

/// Thread-safe LRU + TTL + byte-budget cache of analysis results.
///
/// Every operation takes one short lock, so concurrent `get`/`set` calls
/// cannot corrupt the LRU order or the byte total.
#[derive(Debug)]
pub struct ResultCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::default()))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &Entry, now: Duration) -> bool {
        now.saturating_sub(entry.inserted_at) >= self.config.ttl()
    }

    /// A copy of the cached result, or `None` if absent or expired. Expired
    /// entries are removed on the spot.
    pub fn get(&self, key: &str) -> Option<AnalysisResult> {
        let now = self.clock.now();
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            state.remove(key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return None;
        }

        state.touch(key);
        state.stats.hits += 1;
        state.entries.get(key).map(|e| e.result.clone())
    }

    /// Store a copy of `result` under `key`, evicting least-recently-used
    /// entries as needed. Returns `false` when the entry alone exceeds the
    /// byte budget and was not stored.
    pub fn set(&self, key: &str, result: &AnalysisResult) -> bool {
        let bytes = estimate_size(key, result);
        let mut state = self.lock();

        if bytes > self.config.max_bytes {
            state.stats.rejected += 1;
            debug!(bytes, max_bytes = self.config.max_bytes, "result too large to cache");
            return false;
        }

        state.remove(key);
        while !state.entries.is_empty()
            && (state.entries.len() >= self.config.max_entries
                || state.total_bytes + bytes > self.config.max_bytes)
        {
            if !state.evict_lru() {
                break;
            }
        }

        state.entries.insert(
            key.to_string(),
            Entry {
                result: result.clone(),
                inserted_at: self.clock.now(),
                bytes,
            },
        );
        state.order.push_back(key.to_string());
        state.total_bytes += bytes;
        true
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        state.stats.expirations += expired.len() as u64;
        if !expired.is_empty() {
            debug!(removed = expired.len(), "pruned expired cache entries");
        }
        expired.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
        state.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            bytes: state.total_bytes,
            ..state.stats
        }
    }
}

fn estimate_size(key: &str, result: &AnalysisResult) -> usize {
    key.len() + serde_json::to_vec(result).map(|v| v.len()).unwrap_or(0)
}
