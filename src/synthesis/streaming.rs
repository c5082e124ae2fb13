//! Decouples the caller supplying parameter frames from the caller
//! reading synthesized samples, at a configurable target latency, and
//! the [`StreamingEngine`] wrapper that ties this layer to
//! [`PbpSynthesisEngine`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::StreamingConfig;
use crate::ring_buffer::RingBuffer;
use crate::synthesis::PbpSynthesisEngine;
use crate::types::{ParameterFrame, StreamingFrame};

/// Real-time streaming telemetry.
#[derive(Debug, Clone, Default)]
pub struct StreamingStats {
    pub current_latency_ms: f64,
    pub average_latency_ms: f64,
    pub peak_latency_ms: f64,
    pub input_buffer_utilization: f64,
    pub output_buffer_utilization: f64,
    pub processing_time_ms: f64,
    pub cpu_usage_percent: f64,
    pub frames_processed: u64,
    pub buffer_underruns: u64,
    pub buffer_overflows: u64,
    pub dropouts_detected: u64,
    pub session_start_time: Option<Instant>,
    pub total_processing_time_ms: f64,
}

/// Floors below which adaptive shrinking never goes, per spec.
const MIN_INPUT_FRAMES: usize = 256;
const MIN_OUTPUT_SAMPLES: usize = 1024;

struct Shared {
    config: Mutex<StreamingConfig>,
    samples_per_frame: Mutex<usize>,
    frame_period_ms: Mutex<f64>,
    stats: Mutex<StreamingStats>,
    shutdown: AtomicBool,
    wake: Condvar,
    wake_lock: Mutex<bool>,
    recent_cycle_times: Mutex<VecDeque<Duration>>,
    last_resize_check: Mutex<Instant>,
}

/// Owns the input/output ring buffers and (optionally) a background
/// worker thread that drains frames into synthesized samples.
///
/// The rings are held behind an extra layer of indirection
/// (`Mutex<Arc<RingBuffer<T>>>`) so that adaptive resizing can swap in a
/// freshly allocated ring without the background worker ever observing a
/// torn buffer: the worker re-fetches its `Arc` clone once per cycle, so
/// a resize takes effect on the next iteration rather than invalidating
/// an in-flight push/pop.
pub struct StreamingBufferManager {
    shared: Arc<Shared>,
    input_ring: Arc<Mutex<Arc<RingBuffer<StreamingFrame>>>>,
    output_ring: Arc<Mutex<Arc<RingBuffer<f64>>>>,
    worker: Option<JoinHandle<()>>,
}

impl StreamingBufferManager {
    pub fn new(config: StreamingConfig) -> crate::error::Result<Self> {
        config.validate()?;
        let input_ring = Arc::new(Mutex::new(Arc::new(RingBuffer::new(config.input_buffer_size))));
        let output_ring = Arc::new(Mutex::new(Arc::new(RingBuffer::new(config.output_buffer_size))));
        let shared = Arc::new(Shared {
            config: Mutex::new(config),
            samples_per_frame: Mutex::new(0),
            frame_period_ms: Mutex::new(5.0),
            stats: Mutex::new(StreamingStats::default()),
            shutdown: AtomicBool::new(false),
            wake: Condvar::new(),
            wake_lock: Mutex::new(false),
            recent_cycle_times: Mutex::new(VecDeque::with_capacity(10)),
            last_resize_check: Mutex::new(Instant::now()),
        });
        Ok(Self { shared, input_ring, output_ring, worker: None })
    }

    /// Computes `round(sample_rate * frame_period_ms / 1000)`; call once
    /// the sample rate and frame period are known from the engine.
    pub fn set_samples_per_frame(&self, sample_rate: u32, frame_period_ms: f64) {
        let spf = ((sample_rate as f64) * frame_period_ms / 1000.0).round() as usize;
        *self.shared.samples_per_frame.lock().unwrap() = spf;
        *self.shared.frame_period_ms.lock().unwrap() = frame_period_ms;
    }

    pub fn stats(&self) -> StreamingStats {
        self.shared.stats.lock().unwrap().clone()
    }

    /// Starts the background worker if `enable_background_processing` is
    /// set. `synthesize` converts one frame into samples.
    pub fn start<F>(&mut self, synthesize: F)
    where
        F: Fn(&StreamingFrame) -> Vec<f64> + Send + 'static,
    {
        let background = self.shared.config.lock().unwrap().enable_background_processing;
        self.shared.stats.lock().unwrap().session_start_time = Some(Instant::now());
        if !background {
            return;
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        let input_ring = self.input_ring.clone();
        let output_ring = self.output_ring.clone();
        self.worker = Some(std::thread::spawn(move || {
            worker_loop(shared, input_ring, output_ring, synthesize);
        }));
    }

    /// Idempotent: sets the shutdown flag, wakes the worker, and joins it.
    pub fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Enqueues a frame, applying overflow protection if configured.
    pub fn queue_input_frame(&self, frame: StreamingFrame) {
        let ring = self.input_ring.lock().unwrap().clone();
        if ring.push(frame.clone()) {
            self.shared.wake.notify_one();
            return;
        }
        let overflow_protection = self.shared.config.lock().unwrap().enable_overflow_protection;
        if overflow_protection {
            let _ = ring.pop();
            self.shared.stats.lock().unwrap().buffer_overflows += 1;
            if ring.push(frame) {
                self.shared.wake.notify_one();
            }
        } else {
            log::warn!("input ring full and overflow protection disabled; dropping frame");
        }
    }

    /// Reads up to `n` samples into `dest`, applying underrun/dropout
    /// protection if configured. Returns the number of samples actually
    /// produced (always `n` when underrun protection is enabled).
    pub fn read_output_samples(&self, dest: &mut [f64]) -> usize {
        let config = self.shared.config.lock().unwrap().clone();
        let ring = self.output_ring.lock().unwrap().clone();
        let available = ring.len();

        if config.enable_dropout_detection && available < config.dropout_threshold_samples {
            self.shared.stats.lock().unwrap().dropouts_detected += 1;
            for d in dest.iter_mut() {
                *d = 0.0;
            }
            return if config.enable_underrun_protection { dest.len() } else { 0 };
        }

        let mut read = 0;
        while read < dest.len() {
            match ring.pop() {
                Some(sample) => {
                    dest[read] = sample;
                    read += 1;
                }
                None => break,
            }
        }
        if read < dest.len() {
            if config.enable_underrun_protection {
                for d in dest.iter_mut().skip(read) {
                    *d = 0.0;
                }
                self.shared.stats.lock().unwrap().buffer_underruns += 1;
                return dest.len();
            }
        }
        read
    }

    /// Current input ring capacity (frames), reflecting any adaptive resize.
    pub fn input_buffer_capacity(&self) -> usize {
        self.input_ring.lock().unwrap().capacity()
    }

    /// Current output ring capacity (samples), reflecting any adaptive resize.
    pub fn output_buffer_capacity(&self) -> usize {
        self.output_ring.lock().unwrap().capacity()
    }

    /// Updates the end-to-end latency target the adaptive buffering policy
    /// grows/shrinks the rings against.
    pub fn set_target_latency_ms(&self, latency_ms: f64) {
        self.shared.config.lock().unwrap().target_latency_ms = latency_ms;
    }
}

impl Drop for StreamingBufferManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Streaming-mode wrapper: owns a [`PbpSynthesisEngine`] and the
/// [`StreamingBufferManager`] that decouples frame production from audio
/// consumption. The engine is the owner here, never the other way
/// around, so dropping a `StreamingEngine` tears down the worker first.
pub struct StreamingEngine {
    engine: Arc<Mutex<PbpSynthesisEngine>>,
    manager: StreamingBufferManager,
}

impl StreamingEngine {
    pub fn new(engine: PbpSynthesisEngine, streaming_config: StreamingConfig) -> crate::error::Result<Self> {
        let manager = StreamingBufferManager::new(streaming_config)?;
        let (sample_rate, frame_period_ms) = {
            let cfg = engine.config();
            (cfg.sample_rate, cfg.frame_period_ms)
        };
        manager.set_samples_per_frame(sample_rate, frame_period_ms);
        Ok(Self { engine: Arc::new(Mutex::new(engine)), manager })
    }

    /// Starts the background worker, wiring it to call back into the
    /// owned [`PbpSynthesisEngine`] for each popped frame.
    pub fn start_realtime_streaming(&mut self) {
        let engine = self.engine.clone();
        self.manager.start(move |frame| {
            engine.lock().unwrap().synthesize_streaming_frame(frame).unwrap_or_else(|err| {
                log::warn!("streaming frame synthesis failed: {err}");
                Vec::new()
            })
        });
    }

    pub fn stop_realtime_streaming(&mut self) {
        self.manager.stop();
    }

    /// Drains an entire analyzed utterance into per-frame `StreamingFrame`s
    /// and queues them on the input ring, one at a time.
    pub fn queue_world_parameters(&self, frame: &ParameterFrame) -> crate::error::Result<()> {
        frame.validate()?;
        for t in 0..frame.length() {
            let streaming_frame = StreamingFrame {
                f0: frame.f0[t],
                spectrum: frame.spectrum[t].clone(),
                aperiodicity: frame.aperiodicity[t].clone(),
                timestamp: t as f64 * frame.frame_period_ms / 1000.0,
                frame_index: t as u64,
                is_voiced: frame.f0[t] > 0.0,
                ..Default::default()
            };
            self.manager.queue_input_frame(streaming_frame);
        }
        Ok(())
    }

    pub fn queue_streaming_frame(&self, frame: StreamingFrame) {
        self.manager.queue_input_frame(frame);
    }

    pub fn read_realtime_audio(&self, dest: &mut [f64]) -> usize {
        self.manager.read_output_samples(dest)
    }

    pub fn get_streaming_stats(&self) -> StreamingStats {
        self.manager.stats()
    }

    pub fn set_realtime_latency_target(&self, latency_ms: f64) {
        self.manager.set_target_latency_ms(latency_ms);
    }
}

fn worker_loop<F>(
    shared: Arc<Shared>,
    input_ring: Arc<Mutex<Arc<RingBuffer<StreamingFrame>>>>,
    output_ring: Arc<Mutex<Arc<RingBuffer<f64>>>>,
    synthesize: F,
) where
    F: Fn(&StreamingFrame) -> Vec<f64>,
{
    while !shared.shutdown.load(Ordering::SeqCst) {
        let current_input = input_ring.lock().unwrap().clone();
        let frame = match current_input.pop() {
            Some(frame) => frame,
            None => {
                let guard = shared.wake_lock.lock().unwrap();
                let _ = shared.wake.wait_timeout(guard, Duration::from_micros(100)).unwrap();
                continue;
            }
        };

        let cycle_start = Instant::now();
        let samples = synthesize(&frame);
        let current_output = output_ring.lock().unwrap().clone();
        let mut dropped = 0usize;
        for sample in samples {
            if !current_output.push(sample) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::warn!("output ring full: dropped {dropped} synthesized samples");
        }

        let cycle_time = cycle_start.elapsed();
        record_cycle(&shared, cycle_time);

        {
            let mut stats = shared.stats.lock().unwrap();
            stats.frames_processed += 1;
            stats.processing_time_ms = cycle_time.as_secs_f64() * 1000.0;
            stats.total_processing_time_ms += stats.processing_time_ms;
        }

        maybe_resize_buffers(&shared, &input_ring, &output_ring);
    }
}

fn record_cycle(shared: &Arc<Shared>, cycle_time: Duration) {
    let mut history = shared.recent_cycle_times.lock().unwrap();
    if history.len() >= 10 {
        history.pop_front();
    }
    history.push_back(cycle_time);
}

/// Every >= 1s, grows or shrinks the rings per the adaptive buffering
/// policy: mean of the last 10 cycle times vs. `target_latency_ms`, and
/// a CPU-usage estimate of `clamp(mean_cycle_time / frame_period, 0, 1)`.
fn maybe_resize_buffers(
    shared: &Arc<Shared>,
    input_ring: &Arc<Mutex<Arc<RingBuffer<StreamingFrame>>>>,
    output_ring: &Arc<Mutex<Arc<RingBuffer<f64>>>>,
) {
    let config = shared.config.lock().unwrap().clone();
    if !config.enable_adaptive_buffering {
        return;
    }
    {
        let mut last_check = shared.last_resize_check.lock().unwrap();
        if last_check.elapsed() < Duration::from_secs(1) {
            return;
        }
        *last_check = Instant::now();
    }

    let history = shared.recent_cycle_times.lock().unwrap();
    if history.is_empty() {
        return;
    }
    let mean_cycle = history.iter().sum::<Duration>() / (history.len() as u32);
    drop(history);
    let mean_latency_ms = mean_cycle.as_secs_f64() * 1000.0;

    let frame_period_ms = (*shared.frame_period_ms.lock().unwrap()).max(1e-6);
    let cpu_usage = (mean_latency_ms / frame_period_ms).clamp(0.0, 1.0);

    {
        let mut stats = shared.stats.lock().unwrap();
        stats.average_latency_ms = mean_latency_ms;
        stats.current_latency_ms = mean_latency_ms;
        stats.cpu_usage_percent = cpu_usage * 100.0;
        if mean_latency_ms > stats.peak_latency_ms {
            stats.peak_latency_ms = mean_latency_ms;
        }
    }

    let grow = mean_latency_ms > config.target_latency_ms || cpu_usage > config.cpu_usage_threshold;
    let shrink = mean_latency_ms < 0.5 * config.target_latency_ms && cpu_usage < 0.5;

    if grow {
        resize_ring(input_ring, |cap| cap + cap / 4);
        resize_ring(output_ring, |cap| cap + cap / 4);
        log::debug!("adaptive buffering: growing rings (mean_latency={mean_latency_ms:.2}ms, cpu={cpu_usage:.2})");
    } else if shrink {
        resize_ring(input_ring, |cap| (cap - cap / 10).max(MIN_INPUT_FRAMES));
        resize_ring(output_ring, |cap| (cap - cap / 10).max(MIN_OUTPUT_SAMPLES));
        log::debug!("adaptive buffering: shrinking rings (mean_latency={mean_latency_ms:.2}ms, cpu={cpu_usage:.2})");
    }
}

/// Drains `ring` into a freshly sized replacement and swaps it in. Items
/// beyond the new capacity (only possible when shrinking below the
/// current backlog) are dropped, matching the overflow-protection policy.
fn resize_ring<T: Default + Clone>(ring: &Arc<Mutex<Arc<RingBuffer<T>>>>, grow: impl Fn(usize) -> usize) {
    let mut guard = ring.lock().unwrap();
    let new_capacity = grow(guard.capacity());
    if new_capacity == guard.capacity() {
        return;
    }
    let fresh = RingBuffer::new(new_capacity);
    while let Some(item) = guard.pop() {
        if !fresh.push(item) {
            break;
        }
    }
    *guard = Arc::new(fresh);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_and_background_synthesis_round_trips() {
        let mut manager = StreamingBufferManager::new(StreamingConfig::default()).unwrap();
        manager.start(|frame| vec![frame.f0; 4]);
        manager.queue_input_frame(StreamingFrame { f0: 42.0, ..Default::default() });
        std::thread::sleep(Duration::from_millis(50));
        let mut buf = [0.0; 4];
        let read = manager.read_output_samples(&mut buf);
        assert_eq!(read, 4);
        assert_eq!(buf, [42.0; 4]);
        manager.stop();
    }

    #[test]
    fn underrun_protection_zero_fills() {
        let mut cfg = StreamingConfig::default();
        cfg.enable_background_processing = false;
        let manager = StreamingBufferManager::new(cfg).unwrap();
        let mut buf = [1.0; 8];
        let read = manager.read_output_samples(&mut buf);
        assert_eq!(read, 8);
        assert_eq!(buf, [0.0; 8]);
        assert_eq!(manager.stats().buffer_underruns, 1);
    }

    #[test]
    fn adaptive_resize_grows_rings_past_target_latency() {
        let cfg = StreamingConfig::default();
        let manager = StreamingBufferManager::new(cfg.clone()).unwrap();
        let before_in = manager.input_buffer_capacity();
        let before_out = manager.output_buffer_capacity();

        *manager.shared.frame_period_ms.lock().unwrap() = 1.0;
        {
            let mut history = manager.shared.recent_cycle_times.lock().unwrap();
            for _ in 0..10 {
                history.push_back(Duration::from_millis(50));
            }
        }
        *manager.shared.last_resize_check.lock().unwrap() = Instant::now() - Duration::from_secs(2);

        maybe_resize_buffers(&manager.shared, &manager.input_ring, &manager.output_ring);

        assert!(manager.input_buffer_capacity() > before_in);
        assert!(manager.output_buffer_capacity() > before_out);
        assert!(manager.stats().cpu_usage_percent > 0.0);
    }

    #[test]
    fn adaptive_resize_respects_floors_when_shrinking() {
        let cfg = StreamingConfig::default();
        let manager = StreamingBufferManager::new(cfg).unwrap();

        *manager.shared.frame_period_ms.lock().unwrap() = 1000.0;
        {
            let mut history = manager.shared.recent_cycle_times.lock().unwrap();
            for _ in 0..10 {
                history.push_back(Duration::from_micros(1));
            }
        }
        *manager.shared.last_resize_check.lock().unwrap() = Instant::now() - Duration::from_secs(2);

        for _ in 0..50 {
            maybe_resize_buffers(&manager.shared, &manager.input_ring, &manager.output_ring);
            *manager.shared.last_resize_check.lock().unwrap() = Instant::now() - Duration::from_secs(2);
        }

        assert!(manager.input_buffer_capacity() >= MIN_INPUT_FRAMES);
        assert!(manager.output_buffer_capacity() >= MIN_OUTPUT_SAMPLES);
    }

    fn test_engine(bins: usize) -> PbpSynthesisEngine {
        use crate::config::{FftConfig, SynthesisConfig};
        let mut cfg = SynthesisConfig::default();
        cfg.fft_size = (bins - 1) * 2;
        cfg.hop_size = 8;
        let fft = crate::fft::FftTransformManager::new(FftConfig::default()).unwrap();
        PbpSynthesisEngine::new(cfg, fft).unwrap()
    }

    #[test]
    fn queue_world_parameters_drains_every_frame() {
        let bins = 9;
        let mut engine = StreamingEngine::new(test_engine(bins), StreamingConfig::default()).unwrap();
        let parameter_frame = ParameterFrame {
            sample_rate: 44100,
            frame_period_ms: 5.0,
            fft_size: (bins - 1) * 2,
            f0: vec![220.0, 0.0, 180.0],
            spectrum: vec![vec![1.0; bins]; 3],
            aperiodicity: vec![vec![0.1; bins]; 3],
        };
        engine.queue_world_parameters(&parameter_frame).unwrap();
        assert_eq!(engine.manager.input_ring.lock().unwrap().len(), 3);
    }

    #[test]
    fn streaming_engine_round_trips_audio() {
        let bins = 9;
        let mut engine = StreamingEngine::new(test_engine(bins), StreamingConfig::default()).unwrap();
        engine.start_realtime_streaming();
        engine.queue_streaming_frame(StreamingFrame {
            f0: 220.0,
            spectrum: vec![1.0; bins],
            aperiodicity: vec![0.1; bins],
            is_voiced: true,
            ..Default::default()
        });
        std::thread::sleep(Duration::from_millis(50));
        let mut buf = [0.0; 8];
        let read = engine.read_realtime_audio(&mut buf);
        assert_eq!(read, 8);
        engine.stop_realtime_streaming();
    }

    #[test]
    fn set_realtime_latency_target_updates_manager_config() {
        let bins = 9;
        let engine = StreamingEngine::new(test_engine(bins), StreamingConfig::default()).unwrap();
        engine.set_realtime_latency_target(42.0);
        assert_eq!(engine.manager.shared.config.lock().unwrap().target_latency_ms, 42.0);
    }
}
