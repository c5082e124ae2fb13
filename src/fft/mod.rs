//! FFT transform management: plan caching, forward/inverse transforms,
//! and the pulse-synthesis primitive built on top of them.

mod utils;

pub use utils::{is_power_of_2, next_composite_size, next_power_of_2, zero_pad};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rustfft::{num_complex::Complex64, Fft, FftPlanner};

use crate::config::FftConfig;
use crate::error::{NexusSynthError, Result};

/// Direction of a cached transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Inverse,
}

/// Cache key for a plan: `(size, direction, real_input)`.
type PlanKey = (usize, Direction, bool);

/// A cached transform plan. `backend_handle` is reference-counted so an
/// in-flight transform holding a clone survives eviction from the cache.
#[derive(Clone)]
pub struct FftPlan {
    pub fft_size: usize,
    pub direction: Direction,
    pub real_input: bool,
    backend_handle: Arc<dyn Fft<f64>>,
    usage_count: u64,
    last_used: Instant,
}

impl FftPlan {
    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }
}

/// Runtime statistics for the plan cache and transform throughput.
#[derive(Debug, Clone)]
pub struct FftStats {
    pub transforms_performed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_transform_time: Duration,
    pub memory_usage_bytes: usize,
    pub peak_memory_mb: f64,
    pub backend_name: &'static str,
    pub multithreading_active: bool,
}

impl FftStats {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

impl Default for FftStats {
    fn default() -> Self {
        Self {
            transforms_performed: 0,
            cache_hits: 0,
            cache_misses: 0,
            total_transform_time: Duration::ZERO,
            memory_usage_bytes: 0,
            peak_memory_mb: 0.0,
            backend_name: "rustfft",
            multithreading_active: false,
        }
    }
}

struct CacheEntry {
    plan: FftPlan,
}

/// Provides low-latency forward/inverse FFTs with plan reuse and the
/// spectrum-to-pulse primitive used once per synthesized pulse.
///
/// The plan cache and the statistics are behind independent mutexes per
/// the concurrency design: evicting a plan while a transform holding its
/// `Arc` is in flight never invalidates that transform.
pub struct FftTransformManager {
    config: FftConfig,
    cache: Mutex<HashMap<PlanKey, CacheEntry>>,
    planner: Mutex<FftPlanner<f64>>,
    stats: Mutex<FftStats>,
}

impl FftTransformManager {
    pub fn new(config: FftConfig) -> Result<Self> {
        config.validate()?;
        let mut stats = FftStats::default();
        stats.multithreading_active = config.enable_multithreading;
        Ok(Self {
            config,
            cache: Mutex::new(HashMap::new()),
            planner: Mutex::new(FftPlanner::new()),
            stats: Mutex::new(stats),
        })
    }

    pub fn config(&self) -> &FftConfig {
        &self.config
    }

    pub fn stats(&self) -> FftStats {
        self.stats.lock().unwrap().clone()
    }

    /// Warms the cache for a list of sizes in both directions.
    pub fn precompute_plans(&self, sizes: &[usize]) {
        for &size in sizes {
            let _ = self.plan_for(size, Direction::Forward, false);
            let _ = self.plan_for(size, Direction::Inverse, false);
        }
    }

    fn plan_for(&self, size: usize, direction: Direction, real_input: bool) -> Result<Arc<dyn Fft<f64>>> {
        if size == 0 {
            return Err(NexusSynthError::invalid_parameters("FFT size must be nonzero"));
        }
        let key = (size, direction, real_input);
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get_mut(&key) {
                entry.plan.usage_count += 1;
                entry.plan.last_used = Instant::now();
                self.stats.lock().unwrap().cache_hits += 1;
                return Ok(entry.plan.backend_handle.clone());
            }
        }
        self.stats.lock().unwrap().cache_misses += 1;
        let handle: Arc<dyn Fft<f64>> = {
            let mut planner = self.planner.lock().unwrap();
            match direction {
                Direction::Forward => planner.plan_fft_forward(size),
                Direction::Inverse => planner.plan_fft_inverse(size),
            }
        };
        if self.config.enable_plan_caching {
            self.insert_plan(key, handle.clone());
        }
        Ok(handle)
    }

    fn insert_plan(&self, key: PlanKey, handle: Arc<dyn Fft<f64>>) {
        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= self.config.max_cache_size {
            self.evict_lru(&mut cache);
        }
        cache.insert(
            key,
            CacheEntry {
                plan: FftPlan {
                    fft_size: key.0,
                    direction: key.1,
                    real_input: key.2,
                    backend_handle: handle,
                    usage_count: 1,
                    last_used: Instant::now(),
                },
            },
        );
    }

    /// Evicts least-recently-used plans down to
    /// `max_cache_size * cache_cleanup_threshold`.
    fn evict_lru(&self, cache: &mut HashMap<PlanKey, CacheEntry>) {
        let target =
            ((self.config.max_cache_size as f64) * self.config.cache_cleanup_threshold).floor() as usize;
        let mut entries: Vec<PlanKey> = cache.keys().copied().collect();
        entries.sort_by_key(|k| cache[k].plan.last_used);
        while cache.len() > target && !entries.is_empty() {
            let victim = entries.remove(0);
            cache.remove(&victim);
            log::debug!("evicted FFT plan for key {victim:?} from cache");
        }
    }

    /// Full complex forward FFT; returns `None` on zero/empty input
    /// without touching `output`.
    pub fn forward_fft(&self, input: &[f64]) -> Option<Vec<Complex64>> {
        if input.is_empty() {
            return None;
        }
        let start = Instant::now();
        let plan = self.plan_for(input.len(), Direction::Forward, true).ok()?;
        let mut buffer: Vec<Complex64> = input.iter().map(|&x| Complex64::new(x, 0.0)).collect();
        plan.process(&mut buffer);
        self.record_transform(start.elapsed());
        Some(buffer)
    }

    /// Complex-to-complex forward FFT.
    pub fn forward_fft_complex(&self, input: &[Complex64]) -> Option<Vec<Complex64>> {
        if input.is_empty() {
            return None;
        }
        let start = Instant::now();
        let plan = self.plan_for(input.len(), Direction::Forward, false).ok()?;
        let mut buffer = input.to_vec();
        plan.process(&mut buffer);
        self.record_transform(start.elapsed());
        Some(buffer)
    }

    /// Reconstructs a real signal of length `n` from a half-spectrum of
    /// length `half_len = n/2 + 1`, enforcing conjugate symmetry:
    /// index 0 and (if `n` even) index `n/2` have their imaginary part
    /// forced to zero, remaining bins are mirrored conjugates, and any
    /// bin beyond `half_spectrum.len()` is zero-filled.
    pub fn inverse_fft(&self, half_spectrum: &[Complex64], n: usize) -> Option<Vec<f64>> {
        if n == 0 {
            return None;
        }
        let full = Self::expand_conjugate_symmetric(half_spectrum, n);
        let complex = self.inverse_fft_complex(&full)?;
        Some(complex.iter().map(|c| c.re).collect())
    }

    fn expand_conjugate_symmetric(half_spectrum: &[Complex64], n: usize) -> Vec<Complex64> {
        let half_len = n / 2 + 1;
        let mut full = vec![Complex64::new(0.0, 0.0); n];
        for k in 0..half_len {
            full[k] = if k < half_spectrum.len() { half_spectrum[k] } else { Complex64::new(0.0, 0.0) };
        }
        full[0].im = 0.0;
        if n % 2 == 0 {
            full[n / 2].im = 0.0;
        }
        for m in half_len..n {
            full[m] = full[n - m].conj();
        }
        full
    }

    /// Complex-to-complex inverse FFT (backend-normalized by 1/N).
    pub fn inverse_fft_complex(&self, input: &[Complex64]) -> Option<Vec<Complex64>> {
        if input.is_empty() {
            return None;
        }
        let start = Instant::now();
        let n = input.len();
        let plan = self.plan_for(n, Direction::Inverse, false).ok()?;
        let mut buffer = input.to_vec();
        plan.process(&mut buffer);
        let scale = 1.0 / n as f64;
        for c in buffer.iter_mut() {
            *c *= scale;
        }
        self.record_transform(start.elapsed());
        Some(buffer)
    }

    /// Composes [`Self::inverse_fft`] with optional peak normalization:
    /// `pulse *= 1 / max|pulse|` when the peak exceeds `1e-10`.
    pub fn synthesize_pulse_from_spectrum(
        &self,
        half_spectrum: &[Complex64],
        fft_size: usize,
        normalize: bool,
    ) -> Option<Vec<f64>> {
        let mut pulse = self.inverse_fft(half_spectrum, fft_size)?;
        if normalize {
            let peak = pulse.iter().fold(0.0f64, |acc, &x| acc.max(x.abs()));
            if peak > 1e-10 {
                let scale = 1.0 / peak;
                for x in pulse.iter_mut() {
                    *x *= scale;
                }
            }
        }
        Some(pulse)
    }

    fn record_transform(&self, elapsed: Duration) {
        let mut stats = self.stats.lock().unwrap();
        stats.transforms_performed += 1;
        stats.total_transform_time += elapsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_signal() {
        let manager = FftTransformManager::new(FftConfig::default()).unwrap();
        let input = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let spectrum = manager.forward_fft(&input).unwrap();
        let half: Vec<Complex64> = spectrum[..(input.len() / 2 + 1)].to_vec();
        let recovered = manager.inverse_fft(&half, input.len()).unwrap();
        for (a, b) in input.iter().zip(recovered.iter()) {
            assert!((a - b).abs() < 1e-9, "expected {a}, got {b}");
        }
    }

    #[test]
    fn empty_input_fails_without_panicking() {
        let manager = FftTransformManager::new(FftConfig::default()).unwrap();
        assert!(manager.forward_fft(&[]).is_none());
        assert!(manager.inverse_fft(&[], 0).is_none());
    }

    #[test]
    fn plan_cache_evicts_lru() {
        let mut cfg = FftConfig::default();
        cfg.max_cache_size = 4;
        cfg.cache_cleanup_threshold = 0.75;
        let manager = FftTransformManager::new(cfg).unwrap();
        for size in [64usize, 128, 256, 512, 1024] {
            manager.forward_fft(&vec![0.0; size]).unwrap();
        }
        let cache = manager.cache.lock().unwrap();
        let keys: Vec<usize> = cache.keys().map(|k| k.0).collect();
        assert!(!keys.contains(&64), "expected size 64 evicted, cache has {keys:?}");
    }

    #[test]
    fn repeated_sizes_raise_hit_ratio() {
        let manager = FftTransformManager::new(FftConfig::default()).unwrap();
        for _ in 0..4 {
            manager.forward_fft(&vec![0.0; 256]).unwrap();
        }
        let ratio = manager.stats().cache_hit_ratio();
        assert!(ratio >= 0.7, "hit ratio too low: {ratio}");
    }

    #[test]
    fn synthesize_pulse_normalizes_to_unit_peak() {
        let manager = FftTransformManager::new(FftConfig::default()).unwrap();
        let half = vec![Complex64::new(100.0, 0.0); 5];
        let pulse = manager.synthesize_pulse_from_spectrum(&half, 8, true).unwrap();
        let peak = pulse.iter().fold(0.0f64, |acc, &x| acc.max(x.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
    }
}
