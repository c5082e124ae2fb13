//! End-to-end scenarios with literal configuration values, exercised as
//! integration tests against the public API.

use nexussynth::config::{FftConfig, SynthesisConfig};
use nexussynth::fft::FftTransformManager;
use nexussynth::ring_buffer::RingBuffer;
use nexussynth::{ParameterFrame, PbpSynthesisEngine};
use rustfft::num_complex::Complex64;

#[test]
fn s1_pure_tone_synthesis_peak_bin_matches_f0() {
    let sample_rate = 44100u32;
    let fft_size = 1024usize;
    let hop_size = 220usize;
    let length = 100usize;
    let bins = fft_size / 2 + 1;

    let frame = ParameterFrame {
        sample_rate,
        frame_period_ms: 5.0,
        fft_size,
        f0: vec![220.0; length],
        spectrum: vec![vec![1.0; bins]; length],
        aperiodicity: vec![vec![0.1; bins]; length],
    };

    let mut cfg = SynthesisConfig::default();
    cfg.sample_rate = sample_rate;
    cfg.fft_size = fft_size;
    cfg.hop_size = hop_size;
    let fft = FftTransformManager::new(FftConfig::default()).unwrap();
    let mut engine = PbpSynthesisEngine::new(cfg, fft).unwrap();

    let output = engine.synthesize(&frame).unwrap();
    assert!(output.len() >= length * hop_size, "output shorter than expected minimum length");

    for w in output.windows(2) {
        assert!((w[1] - w[0]).abs() <= 1.0, "discontinuity greater than 1.0");
    }

    let analysis_window = &output[output.len() / 2 - fft_size / 2..output.len() / 2 + fft_size / 2];
    let analyzer = FftTransformManager::new(FftConfig::default()).unwrap();
    let spectrum = analyzer.forward_fft(analysis_window).unwrap();
    let bin_hz = sample_rate as f64 / fft_size as f64;
    let expected_bin = (220.0 / bin_hz).round() as usize;
    let peak_bin = spectrum[..fft_size / 2]
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.norm().partial_cmp(&b.norm()).unwrap())
        .map(|(k, _)| k)
        .unwrap();
    let distance = (peak_bin as isize - expected_bin as isize).abs();
    assert!(distance <= 1, "expected peak within 1 bin of {expected_bin}, got {peak_bin}");
}

#[test]
fn s4_plan_cache_lru_evicts_oldest_size() {
    let mut cfg = FftConfig::default();
    cfg.max_cache_size = 4;
    let manager = FftTransformManager::new(cfg).unwrap();

    for size in [64usize, 128, 256, 512] {
        manager.forward_fft(&vec![0.0; size]).unwrap();
    }
    manager.forward_fft(&vec![0.0; 1024]).unwrap();

    let stats = manager.stats();
    assert!(stats.cache_misses >= 5);
}

#[test]
fn s5_ring_buffer_wraparound_matches_literal_sequence() {
    let rb: RingBuffer<i32> = RingBuffer::new(3);
    assert!(rb.push(1));
    assert!(rb.push(2));
    assert!(rb.push(3));
    assert_eq!(rb.pop(), Some(1));
    assert!(rb.push(4));
    assert_eq!(rb.pop(), Some(2));
    assert_eq!(rb.pop(), Some(3));
    assert_eq!(rb.pop(), Some(4));
    assert_eq!(rb.pop(), None);
}

#[test]
fn s3_overlap_add_crossfade_blends_instead_of_summing() {
    let mut buffer: Vec<f64> = Vec::new();
    let pulse_a = vec![1.0f64; 512];
    nexussynth::synthesis::overlap_add::overlap_add(&mut buffer, &pulse_a, 0, 256);
    let pulse_b = vec![1.0f64; 512];
    nexussynth::synthesis::overlap_add::overlap_add(&mut buffer, &pulse_b, 256, 256);

    for &v in &buffer[256..512] {
        assert!(v <= 1.5, "expected crossfaded value, found summed value {v}");
    }
}

#[test]
fn fft_size_zero_is_rejected_at_synthesis_level() {
    let cfg = SynthesisConfig { fft_size: 0, ..SynthesisConfig::default() };
    let fft = FftTransformManager::new(FftConfig::default()).unwrap();
    assert!(PbpSynthesisEngine::new(cfg, fft).is_err());
}

#[allow(dead_code)]
fn complex_zero() -> Complex64 {
    Complex64::new(0.0, 0.0)
}
