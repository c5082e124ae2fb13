//! Data augmentation: pitch shift, time stretch, noise injection, and
//! spectral tilt, gated by a reproducibility-preserving quality check.

use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg32;

use crate::types::ParameterFrame;

/// Per-transform enable flags and ranges. Quality-gate thresholds are
/// fixed constants per the component design, not configurable here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentationConfig {
    pub preserve_original: bool,
    pub enable_pitch_shift: bool,
    pub min_pitch_shift: f64,
    pub max_pitch_shift: f64,
    pub enable_time_stretch: bool,
    pub min_time_stretch: f64,
    pub max_time_stretch: f64,
    pub enable_noise_injection: bool,
    pub noise_probability: f64,
    pub noise_variance_db: f64,
    pub enable_spectral_tilt: bool,
    pub spectral_tilt_range: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            preserve_original: true,
            enable_pitch_shift: true,
            min_pitch_shift: -2.0,
            max_pitch_shift: 2.0,
            enable_time_stretch: true,
            min_time_stretch: 0.9,
            max_time_stretch: 1.1,
            enable_noise_injection: true,
            noise_probability: 0.3,
            noise_variance_db: -20.0,
            enable_spectral_tilt: true,
            spectral_tilt_range: 3.0,
        }
    }
}

/// One augmented frame tagged with the transform that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedFrame {
    pub frame: ParameterFrame,
    pub transform: String,
}

/// Quality-gate metrics computed against the original frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityMetrics {
    pub spectral_distortion: f64,
    pub f0_continuity: f64,
    pub dynamic_range_ratio: f64,
}

impl QualityMetrics {
    pub fn accepted(&self) -> bool {
        self.spectral_distortion < 2.0
            && self.f0_continuity > 0.7
            && self.dynamic_range_ratio > 0.5
            && self.dynamic_range_ratio < 2.0
    }
}

/// Produces augmented variants of a [`ParameterFrame`], driven end to end
/// by a single explicitly-seeded PRNG for reproducibility.
pub struct DataAugmentor {
    config: AugmentationConfig,
    rng: Pcg32,
}

impl DataAugmentor {
    pub fn new(config: AugmentationConfig, seed: u32) -> Self {
        Self { config, rng: Pcg32::seed_from_u64(seed as u64) }
    }

    pub fn set_seed(&mut self, seed: u32) {
        self.rng = Pcg32::seed_from_u64(seed as u64);
    }

    /// Applies every enabled transform independently, returning one
    /// augmented frame per enabled transform (plus the original first, if
    /// `preserve_original` is set), filtered by the quality gate.
    pub fn augment(&mut self, frame: &ParameterFrame) -> Vec<AugmentedFrame> {
        let mut out = Vec::new();
        if self.config.preserve_original {
            out.push(AugmentedFrame { frame: frame.clone(), transform: "original".to_string() });
        }

        if self.config.enable_pitch_shift {
            let semitones = self.rng.gen_range(self.config.min_pitch_shift..=self.config.max_pitch_shift);
            let shifted = pitch_shift(frame, semitones);
            self.push_if_accepted(&mut out, frame, shifted, format!("pitch_shift({semitones:.2})"));
        }

        if self.config.enable_time_stretch {
            let ratio = self.rng.gen_range(self.config.min_time_stretch..=self.config.max_time_stretch);
            let stretched = time_stretch(frame, ratio);
            self.push_if_accepted(&mut out, frame, stretched, format!("time_stretch({ratio:.2})"));
        }

        if self.config.enable_noise_injection && self.rng.gen_bool(self.config.noise_probability) {
            let noisy = self.inject_noise(frame);
            self.push_if_accepted(&mut out, frame, noisy, "noise_injection".to_string());
        }

        if self.config.enable_spectral_tilt {
            let tilt_db = self.rng.gen_range(-self.config.spectral_tilt_range..=self.config.spectral_tilt_range);
            let tilted = spectral_tilt(frame, tilt_db);
            self.push_if_accepted(&mut out, frame, tilted, format!("spectral_tilt({tilt_db:.2}dB)"));
        }

        out
    }

    fn push_if_accepted(
        &self,
        out: &mut Vec<AugmentedFrame>,
        original: &ParameterFrame,
        candidate: ParameterFrame,
        transform: String,
    ) {
        let metrics = quality_metrics(original, &candidate);
        if metrics.accepted() {
            out.push(AugmentedFrame { frame: candidate, transform });
        } else {
            log::debug!("augmentation '{transform}' rejected by quality gate: {metrics:?}");
        }
    }

    fn inject_noise(&mut self, frame: &ParameterFrame) -> ParameterFrame {
        let db_draw: f64 = Normal::new(self.config.noise_variance_db, 5.0).unwrap().sample(&mut self.rng);
        let db = db_draw.clamp(self.config.noise_variance_db - 10.0, self.config.noise_variance_db + 10.0);
        let variance = 10f64.powf(db / 20.0);
        let spectrum_std = variance.sqrt();
        let aperiodicity_std = (0.1 * variance).sqrt();

        let mut augmented = frame.clone();
        for frame_spectrum in augmented.spectrum.iter_mut() {
            for bin in frame_spectrum.iter_mut() {
                *bin += self.rng.sample::<f64, _>(Normal::new(0.0, spectrum_std).unwrap());
            }
        }
        for frame_aperiodicity in augmented.aperiodicity.iter_mut() {
            for bin in frame_aperiodicity.iter_mut() {
                *bin = (*bin + self.rng.sample::<f64, _>(Normal::new(0.0, aperiodicity_std).unwrap()))
                    .clamp(0.0, 1.0);
            }
        }
        augmented
    }
}

/// Multiplies voiced F0 by `2^(s/12)`, clamped to `[50, 1000]` Hz.
/// Spectrum and aperiodicity are intentionally left untouched (see
/// the open-question note in the design ledger).
fn pitch_shift(frame: &ParameterFrame, semitones: f64) -> ParameterFrame {
    let factor = 2f64.powf(semitones / 12.0);
    let mut out = frame.clone();
    for f0 in out.f0.iter_mut() {
        if *f0 > 0.0 {
            *f0 = (*f0 * factor).clamp(50.0, 1000.0);
        }
    }
    out
}

/// Resamples each per-frame sequence to length `floor(L/r)` by linear
/// interpolation along the time axis.
fn time_stretch(frame: &ParameterFrame, ratio: f64) -> ParameterFrame {
    let original_len = frame.length();
    let new_len = ((original_len as f64) / ratio).floor() as usize;
    if new_len == 0 {
        return frame.clone();
    }
    let sample_at = |i: usize| -> f64 {
        if new_len <= 1 {
            0.0
        } else {
            i as f64 * (original_len - 1) as f64 / (new_len - 1) as f64
        }
    };
    let interpolate = |series: &[f64], pos: f64| -> f64 {
        let lower = pos.floor() as usize;
        let upper = (lower + 1).min(series.len() - 1);
        let frac = pos - lower as f64;
        series[lower] * (1.0 - frac) + series[upper] * frac
    };

    let mut f0 = Vec::with_capacity(new_len);
    let mut spectrum = Vec::with_capacity(new_len);
    let mut aperiodicity = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let pos = sample_at(i);
        f0.push(interpolate(&frame.f0, pos));
        let bins = frame.spectrum[0].len();
        let lower = pos.floor() as usize;
        let upper = (lower + 1).min(original_len - 1);
        let frac = pos - lower as f64;
        let s: Vec<f64> = (0..bins)
            .map(|k| frame.spectrum[lower][k] * (1.0 - frac) + frame.spectrum[upper][k] * frac)
            .collect();
        let a: Vec<f64> = (0..bins)
            .map(|k| frame.aperiodicity[lower][k] * (1.0 - frac) + frame.aperiodicity[upper][k] * frac)
            .collect();
        spectrum.push(s);
        aperiodicity.push(a);
    }

    ParameterFrame {
        sample_rate: frame.sample_rate,
        frame_period_ms: frame.frame_period_ms,
        fft_size: frame.fft_size,
        f0,
        spectrum,
        aperiodicity,
    }
}

/// Adds `t * (f/Nyquist)` dB to each log-spectrum bin.
fn spectral_tilt(frame: &ParameterFrame, tilt_db: f64) -> ParameterFrame {
    let bins = frame.fft_size / 2 + 1;
    let mut out = frame.clone();
    for frame_spectrum in out.spectrum.iter_mut() {
        for (k, bin) in frame_spectrum.iter_mut().enumerate() {
            let nyquist_fraction = k as f64 / bins.max(1) as f64;
            *bin += tilt_db * nyquist_fraction;
        }
    }
    out
}

fn quality_metrics(original: &ParameterFrame, augmented: &ParameterFrame) -> QualityMetrics {
    let n = original.length().min(augmented.length());
    let spectral_distortion = if n == 0 {
        0.0
    } else {
        let mut total = 0.0;
        for t in 0..n {
            let diff_sq: f64 = original.spectrum[t]
                .iter()
                .zip(augmented.spectrum[t].iter())
                .map(|(&a, &b)| (a - b).powi(2))
                .sum();
            total += (diff_sq / original.spectrum[t].len().max(1) as f64).sqrt();
        }
        total / n as f64
    };

    let mut voiced_pairs = 0usize;
    let mut continuous_pairs = 0usize;
    for t in 1..augmented.length() {
        let prev = augmented.f0[t - 1];
        let curr = augmented.f0[t];
        if prev > 0.0 && curr > 0.0 {
            voiced_pairs += 1;
            let ratio = curr / prev;
            if (0.8..=1.25).contains(&ratio) {
                continuous_pairs += 1;
            }
        }
    }
    let f0_continuity = if voiced_pairs == 0 { 1.0 } else { continuous_pairs as f64 / voiced_pairs as f64 };

    let range = |frame: &ParameterFrame| -> f64 {
        let mut max = f64::MIN;
        let mut min = f64::MAX;
        for frame_spectrum in &frame.spectrum {
            for &v in frame_spectrum {
                max = max.max(v);
                min = min.min(v);
            }
        }
        (max - min).max(1e-9)
    };
    let dynamic_range_ratio = range(augmented) / range(original);

    QualityMetrics { spectral_distortion, f0_continuity, dynamic_range_ratio }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(length: usize) -> ParameterFrame {
        ParameterFrame {
            sample_rate: 44100,
            frame_period_ms: 5.0,
            fft_size: 8,
            f0: (0..length).map(|i| 200.0 + i as f64).collect(),
            spectrum: vec![vec![1.0; 5]; length],
            aperiodicity: vec![vec![0.1; 5]; length],
        }
    }

    #[test]
    fn pitch_shift_ratio_matches_semitone_formula() {
        let frame = sample_frame(10);
        let shifted = pitch_shift(&frame, 12.0);
        for (orig, new) in frame.f0.iter().zip(shifted.f0.iter()) {
            if *orig > 0.0 && *new < 1000.0 && *new > 50.0 {
                let ratio = new / orig;
                assert!((ratio - 2.0).abs() < 0.01, "ratio {ratio} should be ~2.0");
            }
        }
    }

    #[test]
    fn time_stretch_produces_floor_length() {
        let frame = sample_frame(100);
        let stretched = time_stretch(&frame, 2.0);
        assert_eq!(stretched.length(), 50);
    }

    #[test]
    fn reproducible_with_same_seed() {
        let frame = sample_frame(20);
        let mut a = DataAugmentor::new(AugmentationConfig::default(), 42);
        let mut b = DataAugmentor::new(AugmentationConfig::default(), 42);
        let out_a = a.augment(&frame);
        let out_b = b.augment(&frame);
        assert_eq!(out_a.len(), out_b.len());
        for (x, y) in out_a.iter().zip(out_b.iter()) {
            assert_eq!(x.transform, y.transform);
        }
    }

    #[test]
    fn original_is_emitted_first_when_preserved() {
        let frame = sample_frame(10);
        let mut augmentor = DataAugmentor::new(AugmentationConfig::default(), 7);
        let out = augmentor.augment(&frame);
        assert_eq!(out[0].transform, "original");
    }
}
