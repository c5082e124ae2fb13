//! Opaque-implementation split for the external source-filter analyzer:
//! a small trait standing in for a native-library handle, so the core
//! never needs pointer-to-impl plumbing of its own.

use crate::error::Result;

/// Extracts F0, spectral envelope, and aperiodicity from a waveform. No
/// implementation ships in this crate; callers supply their own analyzer
/// (e.g. a WORLD-style vocoder front end) via `Arc<dyn SourceFilterAnalyzer>`.
pub trait SourceFilterAnalyzer: Send + Sync {
    fn extract_f0(&self, waveform: &[f64], sample_rate: u32) -> Result<Vec<f64>>;
    fn extract_spectrum(&self, waveform: &[f64], sample_rate: u32, fft_size: usize) -> Result<Vec<Vec<f64>>>;
    fn extract_aperiodicity(&self, waveform: &[f64], sample_rate: u32, fft_size: usize) -> Result<Vec<Vec<f64>>>;
}

#[cfg(test)]
pub(crate) struct NullAnalyzer;

#[cfg(test)]
impl SourceFilterAnalyzer for NullAnalyzer {
    fn extract_f0(&self, _waveform: &[f64], _sample_rate: u32) -> Result<Vec<f64>> {
        Err(crate::error::NexusSynthError::backend_unavailable("no analyzer configured"))
    }

    fn extract_spectrum(&self, _waveform: &[f64], _sample_rate: u32, _fft_size: usize) -> Result<Vec<Vec<f64>>> {
        Err(crate::error::NexusSynthError::backend_unavailable("no analyzer configured"))
    }

    fn extract_aperiodicity(&self, _waveform: &[f64], _sample_rate: u32, _fft_size: usize) -> Result<Vec<Vec<f64>>> {
        Err(crate::error::NexusSynthError::backend_unavailable("no analyzer configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_analyzer_reports_backend_unavailable() {
        let analyzer = NullAnalyzer;
        let err = analyzer.extract_f0(&[], 44100).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::BackendUnavailable);
    }
}
