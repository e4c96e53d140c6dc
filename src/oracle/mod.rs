//! Size estimation
//!
//! The [`SizeOracle`] trait is the seam between the databases and whatever
//! turns a model id into a parameter count. Implementations never fail: every
//! outcome, including network errors, is reported as a [`SizeResult`].

pub mod config_estimator;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::types::size::{SizeOutcome, SizeResult};

pub use config_estimator::HubConfigEstimator;

/// Size oracle trait - all estimators must implement this
#[async_trait]
pub trait SizeOracle: Send + Sync {
    /// Estimate the size of `model_id`
    ///
    /// `allow_fallback` permits the expensive path that needs real weights.
    /// Without it such models are reported as `NeedsWeights`.
    async fn estimate(&self, model_id: &str, allow_fallback: bool) -> SizeResult;
}

/// Memoizing wrapper around another oracle
///
/// `NeedsWeights` results are not cached so a later call with fallback
/// allowed still reaches the inner oracle.
pub struct CachedOracle<O> {
    inner: O,
    cache: DashMap<String, SizeResult>,
}

impl<O: SizeOracle> CachedOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl<O: SizeOracle> SizeOracle for CachedOracle<O> {
    async fn estimate(&self, model_id: &str, allow_fallback: bool) -> SizeResult {
        if let Some(hit) = self.cache.get(model_id) {
            return hit.value().clone();
        }

        let result = self.inner.estimate(model_id, allow_fallback).await;
        if !matches!(result.outcome, SizeOutcome::NeedsWeights { .. }) {
            self.cache.insert(model_id.to_string(), result.clone());
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Oracle answering from a fixed table and counting calls
    #[derive(Default)]
    pub struct ScriptedOracle {
        sizes: HashMap<String, f64>,
        needs_weights: HashSet<String>,
        delays: HashMap<String, Duration>,
        panic_once: Mutex<HashSet<String>>,
        calls: AtomicUsize,
        fallback_calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_size(mut self, model_id: &str, size: f64) -> Self {
            self.sizes.insert(model_id.to_string(), size);
            self
        }

        /// The model only resolves when fallback is allowed
        pub fn with_weights_only(mut self, model_id: &str, size: f64) -> Self {
            self.needs_weights.insert(model_id.to_string());
            self.sizes.insert(model_id.to_string(), size);
            self
        }

        pub fn with_delay(mut self, model_id: &str, delay: Duration) -> Self {
            self.delays.insert(model_id.to_string(), delay);
            self
        }

        /// The first estimation of `model_id` panics
        pub fn with_panic_once(self, model_id: &str) -> Self {
            self.panic_once
                .lock()
                .expect("panic_once mutex poisoned")
                .insert(model_id.to_string());
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn fallback_calls(&self) -> usize {
            self.fallback_calls.load(Ordering::SeqCst)
        }

        /// Most estimations that were running at the same time
        pub fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        /// Model ids in the order their estimations started
        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().expect("seen mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl SizeOracle for ScriptedOracle {
        async fn estimate(&self, model_id: &str, allow_fallback: bool) -> SizeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if allow_fallback {
                self.fallback_calls.fetch_add(1, Ordering::SeqCst);
            }
            self.seen
                .lock()
                .expect("seen mutex poisoned")
                .push(model_id.to_string());

            let panics = self
                .panic_once
                .lock()
                .expect("panic_once mutex poisoned")
                .remove(model_id);
            if panics {
                panic!("scripted failure for {}", model_id);
            }

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(model_id) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.needs_weights.contains(model_id) && !allow_fallback {
                return SizeResult::needs_weights(model_id, None);
            }
            match self.sizes.get(model_id) {
                Some(size) => SizeResult::ok(model_id, *size),
                None => SizeResult::unsupported(model_id, "unknown model"),
            }
        }
    }
}
