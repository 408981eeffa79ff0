//! Output caching: the process-wide budget and each filter's retained streams.
//!
//! Filters never decide on their own to keep output. Every freshly produced
//! stream goes through [`FilterCache::store`] (via `Filter::cache_as_needed`),
//! which checks the filter's local switch, the size estimate, and the shared
//! [`CacheBudget`] before marking the stream cached.

use crate::config::CacheConfig;
use crate::pipeline::stream::{Stream, StreamRef};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Fallback when available memory cannot be determined.
pub const DEFAULT_ASSUMED_RAM_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// What happens once the budget cannot fit a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Stop caching anything further until the next refresh begins.
    #[default]
    DisableWhenFull,
    /// Skip only the stream that did not fit; smaller ones may still be kept.
    SkipOversized,
}

impl CachePolicy {
    fn to_u8(self) -> u8 {
        match self {
            CachePolicy::DisableWhenFull => 0,
            CachePolicy::SkipOversized => 1,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => CachePolicy::SkipOversized,
            _ => CachePolicy::DisableWhenFull,
        }
    }
}

/// Outcome of asking the budget for room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Retain the stream; `reserved` bytes were charged.
    Accept { reserved: u64 },
    Reject,
}

/// Shared memory budget for all filter caches.
///
/// Accounting is atomic so the budget can be consulted from the refresh
/// worker while the UI adjusts limits.
#[derive(Debug)]
pub struct CacheBudget {
    enabled: AtomicBool,
    percent_bits: AtomicU32,
    total_ram: u64,
    used: AtomicU64,
    exhausted: AtomicBool,
    policy: AtomicU8,
}

impl CacheBudget {
    pub fn new(percent_of_ram: f32, total_ram: u64, policy: CachePolicy) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            percent_bits: AtomicU32::new(percent_of_ram.clamp(0.0, 100.0).to_bits()),
            total_ram,
            used: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
            policy: AtomicU8::new(policy.to_u8()),
        }
    }

    /// Budget with effectively no ceiling.
    pub fn unlimited() -> Self {
        Self::new(100.0, u64::MAX, CachePolicy::SkipOversized)
    }

    /// Budget that refuses everything.
    pub fn disabled() -> Self {
        let budget = Self::new(0.0, 0, CachePolicy::DisableWhenFull);
        budget.set_enabled(false);
        budget
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let total = config
            .assumed_ram_bytes
            .unwrap_or_else(detect_available_ram);
        let budget = Self::new(config.percent_of_ram, total, config.policy);
        budget.set_enabled(config.enabled);
        budget
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn percent(&self) -> f32 {
        f32::from_bits(self.percent_bits.load(Ordering::Relaxed))
    }

    pub fn set_percent(&self, percent_of_ram: f32) {
        self.percent_bits
            .store(percent_of_ram.clamp(0.0, 100.0).to_bits(), Ordering::Relaxed);
    }

    pub fn policy(&self) -> CachePolicy {
        CachePolicy::from_u8(self.policy.load(Ordering::Relaxed))
    }

    pub fn set_policy(&self, policy: CachePolicy) {
        self.policy.store(policy.to_u8(), Ordering::Relaxed);
    }

    pub fn limit_bytes(&self) -> u64 {
        if self.total_ram == u64::MAX && self.percent() >= 100.0 {
            return u64::MAX;
        }
        (self.total_ram as f64 * self.percent() as f64 / 100.0) as u64
    }

    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.limit_bytes().saturating_sub(self.used_bytes())
    }

    /// True once a refusal under `DisableWhenFull` shut caching off.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Called when a refresh begins; lifts a previous refresh's shutoff.
    pub fn begin_cycle(&self) {
        self.exhausted.store(false, Ordering::Relaxed);
    }

    /// Ask for room for `estimate` bytes. `None` means the filter cannot
    /// say; such streams are retained without being charged.
    pub fn try_reserve(&self, estimate: Option<usize>) -> CacheDecision {
        if !self.is_enabled() {
            return CacheDecision::Reject;
        }
        let policy = self.policy();
        if policy == CachePolicy::DisableWhenFull && self.is_exhausted() {
            return CacheDecision::Reject;
        }
        let Some(bytes) = estimate else {
            return CacheDecision::Accept { reserved: 0 };
        };
        let bytes = bytes as u64;
        let limit = self.limit_bytes();
        let reserved = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= limit)
            });
        match reserved {
            Ok(_) => CacheDecision::Accept { reserved: bytes },
            Err(_) => {
                if policy == CachePolicy::DisableWhenFull {
                    self.exhausted.store(true, Ordering::Relaxed);
                }
                CacheDecision::Reject
            }
        }
    }

    pub fn release(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        // Saturate rather than wrap if accounting ever drifts
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self::new(50.0, DEFAULT_ASSUMED_RAM_BYTES, CachePolicy::default())
    }
}

/// Best-effort available memory, from `/proc/meminfo` where present.
pub fn detect_available_ram() -> u64 {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|info| {
            info.lines()
                .find(|l| l.starts_with("MemAvailable:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
        })
        .map(|kb| kb * 1024)
        .unwrap_or(DEFAULT_ASSUMED_RAM_BYTES)
}

/// Streams retained by one filter from its last successful refresh.
#[derive(Debug)]
pub struct FilterCache {
    enabled: bool,
    valid: bool,
    /// False once any stream of the current refresh was refused.
    complete: bool,
    contents: Vec<StreamRef>,
    reserved_bytes: u64,
}

impl FilterCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            valid: false,
            complete: true,
            contents: Vec::new(),
            reserved_bytes: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool, budget: &CacheBudget) {
        self.enabled = enabled;
        if !enabled {
            self.clear(budget);
        }
    }

    /// Contents can stand in for a refresh.
    pub fn is_valid(&self) -> bool {
        self.enabled && self.valid
    }

    pub fn contents(&self) -> &[StreamRef] {
        &self.contents
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes
    }

    /// Retain `stream` if the local switch and the budget allow it.
    pub(crate) fn store(
        &mut self,
        mut stream: Stream,
        estimate: Option<usize>,
        budget: &CacheBudget,
    ) -> StreamRef {
        if !self.enabled {
            return Arc::new(stream);
        }
        match budget.try_reserve(estimate) {
            CacheDecision::Accept { reserved } => {
                stream.mark_cached();
                let stream = Arc::new(stream);
                self.reserved_bytes += reserved;
                self.contents.push(Arc::clone(&stream));
                tracing::debug!(
                    "Cached {} stream ({} bytes charged, {} used)",
                    stream.kind(),
                    reserved,
                    budget.used_bytes()
                );
                stream
            }
            CacheDecision::Reject => {
                self.complete = false;
                tracing::debug!(
                    "Cache budget refused {} stream (estimate {:?})",
                    stream.kind(),
                    estimate
                );
                Arc::new(stream)
            }
        }
    }

    /// Drop stale contents before the filter recomputes.
    pub(crate) fn begin_refresh(&mut self, budget: &CacheBudget) {
        self.clear(budget);
        self.complete = true;
    }

    /// The refresh succeeded; contents are reusable if nothing was refused.
    pub(crate) fn finish_refresh(&mut self, budget: &CacheBudget) {
        if self.enabled && self.complete {
            self.valid = true;
        } else {
            self.clear(budget);
        }
    }

    pub(crate) fn clear(&mut self, budget: &CacheBudget) {
        budget.release(self.reserved_bytes);
        self.reserved_bytes = 0;
        self.contents.clear();
        self.valid = false;
    }
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new(true)
    }
}
