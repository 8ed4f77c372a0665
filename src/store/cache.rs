//! In-process sample cache
//!
//! Keeps the most recent samples per source in bounded ring buffers so window
//! reads skip the storage round-trip. The cache tracks the earliest instant
//! from which it holds every sample (`complete_from`); a read reaching further
//! back falls through to the backing store, so results never differ from an
//! uncached read. Assumes this process is the only writer to the backing store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{SampleStore, StoreError};
use crate::config::window_offset;
use crate::models::{now_millis, NewSample, Sample};

pub struct CachedSampleStore {
    inner: Arc<dyn SampleStore>,
    capacity_per_source: usize,
    horizon: chrono::Duration,
    state: RwLock<CacheState>,
}

#[derive(Default)]
struct CacheState {
    buffers: HashMap<String, VecDeque<Sample>>,
    /// None until primed; reads fall through while unset
    complete_from: Option<DateTime<Utc>>,
}

impl CacheState {
    /// Append a sample, then trim its queue to capacity and every queue to
    /// the horizon behind it.
    fn push(&mut self, sample: Sample, capacity: usize, horizon: chrono::Duration) {
        let cutoff = sample.timestamp - horizon;
        let queue = self
            .buffers
            .entry(sample.source.clone())
            .or_insert_with(VecDeque::new);
        queue.push_back(sample);

        let mut evicted_up_to: Option<DateTime<Utc>> = None;
        while queue.len() > capacity {
            match queue.pop_front() {
                Some(front) => {
                    evicted_up_to = evicted_up_to.max(Some(front.timestamp));
                }
                None => break,
            }
        }
        self.raise_coverage(evicted_up_to);
        self.evict_before(cutoff);
    }

    /// Drop samples older than `cutoff` from every source, removing queues
    /// left empty. Returns the number of samples dropped.
    fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted_up_to: Option<DateTime<Utc>> = None;
        let mut dropped = 0;
        self.buffers.retain(|_, queue| {
            while queue.front().map_or(false, |front| front.timestamp < cutoff) {
                if let Some(front) = queue.pop_front() {
                    evicted_up_to = evicted_up_to.max(Some(front.timestamp));
                    dropped += 1;
                }
            }
            !queue.is_empty()
        });
        self.raise_coverage(evicted_up_to);
        dropped
    }

    // Anything at or before an evicted timestamp may now be missing.
    fn raise_coverage(&mut self, evicted_up_to: Option<DateTime<Utc>>) {
        if let (Some(evicted), Some(complete)) = (evicted_up_to, self.complete_from.as_mut()) {
            let floor = evicted + chrono::Duration::milliseconds(1);
            if floor > *complete {
                *complete = floor;
            }
        }
    }

    fn collect_since(&self, since: DateTime<Utc>) -> Vec<Sample> {
        let mut out: Vec<Sample> = self
            .buffers
            .values()
            .flat_map(|q| q.iter().filter(|s| s.timestamp >= since).cloned())
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        out
    }
}

impl CachedSampleStore {
    pub fn new(inner: Arc<dyn SampleStore>, capacity_per_source: usize, horizon: Duration) -> Self {
        Self {
            inner,
            capacity_per_source: capacity_per_source.max(1),
            horizon: window_offset(horizon),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Load the horizon from the backing store. Call before accepting traffic;
    /// samples recorded through this wrapper while priming are kept.
    pub async fn prime(&self) -> Result<usize, StoreError> {
        let since = now_millis() - self.horizon;
        let loaded = self.inner.samples_since(since).await?;
        let count = loaded.len();
        let max_loaded_id = loaded.iter().map(|s| s.id).max().unwrap_or(i64::MIN);

        let mut state = self.state.write();
        let concurrent: Vec<Sample> = state
            .buffers
            .drain()
            .flat_map(|(_, q)| q.into_iter())
            .filter(|s| s.id > max_loaded_id)
            .collect();

        state.complete_from = Some(since);
        for sample in loaded.into_iter().chain(concurrent) {
            state.push(sample, self.capacity_per_source, self.horizon);
        }

        info!(
            samples = count,
            sources = state.buffers.len(),
            "Sample cache primed"
        );
        Ok(count)
    }

    /// Trim every source to the horizon behind the current time. Sources
    /// that stopped reporting are dropped here even without new pushes.
    pub fn evict_expired(&self) -> usize {
        let cutoff = now_millis() - self.horizon;
        self.state.write().evict_before(cutoff)
    }

    pub fn tracked_sources(&self) -> usize {
        self.state.read().buffers.len()
    }

    pub fn horizon(&self) -> Duration {
        self.horizon.to_std().unwrap_or_default()
    }

    pub fn cached_len(&self) -> usize {
        self.state.read().buffers.values().map(|q| q.len()).sum()
    }

    pub fn complete_from(&self) -> Option<DateTime<Utc>> {
        self.state.read().complete_from
    }
}

#[async_trait]
impl SampleStore for CachedSampleStore {
    async fn record_sample(&self, sample: NewSample) -> Result<Sample, StoreError> {
        let stored = self.inner.record_sample(sample).await?;
        self.state
            .write()
            .push(stored.clone(), self.capacity_per_source, self.horizon);
        Ok(stored)
    }

    async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<Sample>, StoreError> {
        let cached = {
            let state = self.state.read();
            match state.complete_from {
                Some(complete) if since >= complete => Some(state.collect_since(since)),
                _ => None,
            }
        };

        match cached {
            Some(samples) => Ok(samples),
            None => {
                debug!(since = %since, "Window reaches past cache coverage, reading store");
                self.inner.samples_since(since).await
            }
        }
    }
}
