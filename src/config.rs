//! Configuration types for the synthesis core.
//!
//! Each struct carries a `Default` impl with the literal defaults from the
//! original analysis/synthesis engine and a `validate` method enforcing the
//! `InvalidConfiguration` rules.

use crate::error::{NexusSynthError, Result};

/// Window family selectable for PbP synthesis; mirrors
/// [`crate::window::OptimalWindowType`] but kept separate here so
/// `SynthesisConfig` stays a plain data struct independent of the window
/// module's richer enum (adaptive variants are selected by
/// `enable_adaptive_windowing`, not by this field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    Hann,
    Hamming,
    Blackman,
    BlackmanHarris,
    Gaussian,
    Tukey,
    Kaiser,
    Nuttall,
}

impl Default for WindowType {
    fn default() -> Self {
        WindowType::Hann
    }
}

/// Configuration for the pulse-by-pulse synthesis engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisConfig {
    pub sample_rate: u32,
    pub frame_period_ms: f64,
    pub fft_size: usize,
    pub hop_size: usize,
    pub max_harmonics: usize,
    pub harmonic_amplitude_threshold: f64,
    pub window_type: WindowType,
    pub window_length_factor: f64,
    pub enable_adaptive_windowing: bool,
    pub minimize_pre_echo: bool,
    pub optimize_spectral_leakage: bool,
    pub side_lobe_suppression_db: f64,
    pub enable_anti_aliasing: bool,
    pub noise_floor: f64,
    pub enable_phase_randomization: bool,
    pub use_fast_fft: bool,
    pub synthesis_threads: usize,
    pub buffer_size: usize,
    pub latency_target_ms: f64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_period_ms: 5.0,
            fft_size: 1024,
            hop_size: 220,
            max_harmonics: 80,
            harmonic_amplitude_threshold: 1e-6,
            window_type: WindowType::Hann,
            window_length_factor: 1.0,
            enable_adaptive_windowing: false,
            minimize_pre_echo: true,
            optimize_spectral_leakage: true,
            side_lobe_suppression_db: -60.0,
            enable_anti_aliasing: true,
            noise_floor: 1e-4,
            enable_phase_randomization: false,
            use_fast_fft: true,
            synthesis_threads: 1,
            buffer_size: 4096,
            latency_target_ms: 20.0,
        }
    }
}

impl SynthesisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(NexusSynthError::invalid_configuration("sample_rate must be positive"));
        }
        if self.fft_size == 0 {
            return Err(NexusSynthError::invalid_configuration("fft_size must be nonzero"));
        }
        if self.hop_size > self.fft_size {
            log::warn!(
                "hop_size ({}) exceeds fft_size ({}): adjacent pulses will not overlap",
                self.hop_size,
                self.fft_size
            );
        }
        if self.latency_target_ms <= 0.0 {
            return Err(NexusSynthError::invalid_configuration("latency_target_ms must be positive"));
        }
        Ok(())
    }
}

/// FFT backend selection. Only [`FftBackend::RustFft`] is actually wired
/// to a transform implementation; the remaining variants exist for
/// interface completeness with the analysis engine this core was modeled
/// on and always fall back to `RustFft`, logging a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftBackend {
    RustFft,
    Fftw,
    Mkl,
    CudaFft,
    Auto,
}

impl Default for FftBackend {
    fn default() -> Self {
        FftBackend::Auto
    }
}

/// Configuration for [`crate::fft::FftTransformManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct FftConfig {
    pub backend: FftBackend,
    pub enable_plan_caching: bool,
    pub enable_multithreading: bool,
    pub max_cache_size: usize,
    pub prefer_real_fft: bool,
    pub cache_cleanup_threshold: f64,
    pub enable_simd_optimization: bool,
    pub thread_count: usize,
}

impl Default for FftConfig {
    fn default() -> Self {
        Self {
            backend: FftBackend::Auto,
            enable_plan_caching: true,
            enable_multithreading: false,
            max_cache_size: 32,
            prefer_real_fft: true,
            cache_cleanup_threshold: 0.8,
            enable_simd_optimization: true,
            thread_count: 1,
        }
    }
}

impl FftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size == 0 {
            return Err(NexusSynthError::invalid_configuration("max_cache_size must be positive"));
        }
        if !(0.0..=1.0).contains(&self.cache_cleanup_threshold) {
            return Err(NexusSynthError::invalid_configuration(
                "cache_cleanup_threshold must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Configuration for [`crate::synthesis::streaming::StreamingBufferManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingConfig {
    pub input_buffer_size: usize,
    pub output_buffer_size: usize,
    pub ring_buffer_size: usize,
    pub target_latency_ms: f64,
    pub max_latency_ms: f64,
    pub prefill_frames: usize,
    pub enable_background_processing: bool,
    pub processing_thread_priority: i32,
    pub enable_adaptive_buffering: bool,
    pub enable_underrun_protection: bool,
    pub enable_overflow_protection: bool,
    pub cpu_usage_threshold: f64,
    pub enable_jitter_compensation: bool,
    pub enable_dropout_detection: bool,
    pub dropout_threshold_samples: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            input_buffer_size: 256,
            output_buffer_size: 4096,
            ring_buffer_size: 8192,
            target_latency_ms: 20.0,
            max_latency_ms: 100.0,
            prefill_frames: 4,
            enable_background_processing: true,
            processing_thread_priority: 0,
            enable_adaptive_buffering: true,
            enable_underrun_protection: true,
            enable_overflow_protection: true,
            cpu_usage_threshold: 0.8,
            enable_jitter_compensation: true,
            enable_dropout_detection: true,
            dropout_threshold_samples: 128,
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_buffer_size == 0 || self.output_buffer_size == 0 {
            return Err(NexusSynthError::invalid_configuration("buffer sizes must be positive"));
        }
        if self.target_latency_ms >= self.max_latency_ms {
            return Err(NexusSynthError::invalid_configuration(
                "target_latency_ms must be less than max_latency_ms",
            ));
        }
        Ok(())
    }
}

/// Configuration for [`crate::stats::hmm::PhonemeHmm`] Baum-Welch training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingConfig {
    pub max_iterations: usize,
    pub convergence_threshold: f64,
    pub parameter_threshold: f64,
    pub convergence_window: usize,
    pub use_validation_set: bool,
    pub validation_split: f64,
    pub verbose: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 1e-4,
            parameter_threshold: 1e-5,
            convergence_window: 5,
            use_validation_set: false,
            validation_split: 0.1,
            verbose: false,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(NexusSynthError::invalid_configuration("max_iterations must be positive"));
        }
        if self.convergence_window == 0 {
            return Err(NexusSynthError::invalid_configuration(
                "convergence_window must be positive",
            ));
        }
        if self.use_validation_set && !(0.0..1.0).contains(&self.validation_split) {
            return Err(NexusSynthError::invalid_configuration(
                "validation_split must be in [0, 1)",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SynthesisConfig::default().validate().is_ok());
        assert!(FftConfig::default().validate().is_ok());
        assert!(StreamingConfig::default().validate().is_ok());
        assert!(TrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_latency_inversion() {
        let mut cfg = StreamingConfig::default();
        cfg.target_latency_ms = cfg.max_latency_ms;
        assert!(cfg.validate().is_err());
    }
}
