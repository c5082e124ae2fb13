//! Shared data types that flow between the analysis boundary and the
//! synthesis/statistics core.

use crate::error::{NexusSynthError, Result};

/// Analysis output for an entire utterance: per-frame F0, spectral
/// envelope and aperiodicity, produced once by the external analyzer and
/// consumed read-only by synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterFrame {
    pub sample_rate: u32,
    pub frame_period_ms: f64,
    pub fft_size: usize,
    pub f0: Vec<f64>,
    pub spectrum: Vec<Vec<f64>>,
    pub aperiodicity: Vec<Vec<f64>>,
}

impl ParameterFrame {
    pub fn length(&self) -> usize {
        self.f0.len()
    }

    fn bin_count(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Checks the invariants from the data model: equal-length per-frame
    /// vectors and a bin count of `fft_size / 2 + 1` in every frame.
    pub fn validate(&self) -> Result<()> {
        let length = self.f0.len();
        if self.spectrum.len() != length || self.aperiodicity.len() != length {
            return Err(NexusSynthError::invalid_parameters(format!(
                "frame vector length mismatch: f0={}, spectrum={}, aperiodicity={}",
                length,
                self.spectrum.len(),
                self.aperiodicity.len()
            )));
        }
        let expected_bins = self.bin_count();
        for (t, (s, a)) in self.spectrum.iter().zip(self.aperiodicity.iter()).enumerate() {
            if s.len() != expected_bins || a.len() != expected_bins {
                return Err(NexusSynthError::invalid_parameters(format!(
                    "frame {t} has {} spectrum bins / {} aperiodicity bins, expected {expected_bins}",
                    s.len(),
                    a.len()
                )));
            }
        }
        for &f0 in &self.f0 {
            if f0.is_nan() || f0 < 0.0 {
                return Err(NexusSynthError::invalid_parameters("f0 values must be non-negative and finite"));
            }
        }
        Ok(())
    }
}

/// A single synthesis instruction for one pulse: sliced per-frame data
/// from a [`ParameterFrame`] plus the scalar parameters controlling where
/// and how the pulse is placed.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseParams {
    pub f0: f64,
    pub spectrum: Vec<f64>,
    pub aperiodicity: Vec<f64>,
    pub pulse_position: f64,
    pub amplitude_scale: f64,
    pub pitch_shift: f64,
    pub formant_shift: f64,
    pub harmonic_phases: Option<Vec<f64>>,
}

/// One frame of real-time streaming input.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingFrame {
    pub f0: f64,
    pub spectrum: Vec<f64>,
    pub aperiodicity: Vec<f64>,
    pub timestamp: f64,
    pub frame_index: u64,
    pub amplitude_scale: f64,
    pub pitch_shift: f64,
    pub formant_shift: f64,
    pub is_voiced: bool,
    pub enable_anti_aliasing: bool,
}

impl Default for StreamingFrame {
    fn default() -> Self {
        Self {
            f0: 0.0,
            spectrum: Vec::new(),
            aperiodicity: Vec::new(),
            timestamp: 0.0,
            frame_index: 0,
            amplitude_scale: 1.0,
            pitch_shift: 0.0,
            formant_shift: 0.0,
            is_voiced: false,
            enable_anti_aliasing: true,
        }
    }
}

/// Optional external voice-type classifier output, consumed by UTAU flag
/// conversion's voice-type heuristics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceClassifierOutput {
    pub f0_mean: f64,
    pub spectral_centroid: f64,
    pub harmonic_richness: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> ParameterFrame {
        ParameterFrame {
            sample_rate: 44100,
            frame_period_ms: 5.0,
            fft_size: 4,
            f0: vec![220.0, 0.0],
            spectrum: vec![vec![1.0; 3], vec![1.0; 3]],
            aperiodicity: vec![vec![0.1; 3], vec![0.1; 3]],
        }
    }

    #[test]
    fn validates_well_formed_frame() {
        assert!(sample_frame().validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_bin_count() {
        let mut frame = sample_frame();
        frame.spectrum[0] = vec![1.0; 2];
        assert!(frame.validate().is_err());
    }

    #[test]
    fn rejects_negative_f0() {
        let mut frame = sample_frame();
        frame.f0[0] = -1.0;
        assert!(frame.validate().is_err());
    }
}
