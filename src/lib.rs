//! NexusSynth core: pulse-by-pulse vocal resynthesis, FFT transform
//! management, and the statistical model layer (GMM/HMM) behind a
//! UTAU-compatible resampler.
//!
//! This crate implements the synthesis and modeling core only. Audio
//! file I/O, the source-filter analyzer, configuration file formats, and
//! any GPU backend are external collaborators; see [`analyzer`] for the
//! trait boundary the core expects an analyzer to satisfy.

pub mod analyzer;
pub mod augment;
pub mod config;
pub mod error;
pub mod fft;
pub mod flags;
pub mod ring_buffer;
pub mod stats;
pub mod synthesis;
pub mod types;
pub mod utils;
pub mod window;

pub use config::{FftBackend, FftConfig, StreamingConfig, SynthesisConfig, TrainingConfig, WindowType};
pub use error::{ErrorKind, NexusSynthError, Result};
pub use fft::FftTransformManager;
pub use synthesis::{
    streaming::{StreamingBufferManager, StreamingEngine},
    PbpSynthesisEngine, SynthesisStats,
};
pub use types::{ParameterFrame, PulseParams, StreamingFrame, VoiceClassifierOutput};
