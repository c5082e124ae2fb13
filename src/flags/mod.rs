//! UTAU resampler flag (`g`, `t`, `bre`, `bri`) to synthesis parameter
//! conversion, including cross-flag interactions and voice-type-aware
//! adjustments.

use crate::types::VoiceClassifierOutput;

/// Voice archetype used to select a multiplicative adjustment table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceType {
    MaleAdult,
    FemaleAdult,
    Child,
    Robotic,
    Whisper,
    Growl,
    Unknown,
}

/// Per-flag sensitivities and safety ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagConversionConfig {
    pub g_sensitivity: f64,
    pub t_sensitivity: f64,
    pub bre_sensitivity: f64,
    pub bri_sensitivity: f64,
    pub enable_cross_flag_interactions: bool,
    pub formant_shift_range: (f64, f64),
    pub tension_range: (f64, f64),
    pub breathiness_range: (f64, f64),
    pub brightness_range: (f64, f64),
}

impl Default for FlagConversionConfig {
    fn default() -> Self {
        Self {
            g_sensitivity: 1.0,
            t_sensitivity: 1.0,
            bre_sensitivity: 1.0,
            bri_sensitivity: 1.0,
            enable_cross_flag_interactions: true,
            formant_shift_range: (0.5, 2.0),
            tension_range: (-1.0, 1.0),
            breathiness_range: (0.0, 1.0),
            brightness_range: (0.3, 2.0),
        }
    }
}

/// Raw UTAU flags (`g,t,bri in [-100,100]`, `bre in [0,100]`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtauFlags {
    pub g: i32,
    pub t: i32,
    pub bre: i32,
    pub bri: i32,
}

/// Synthesis-ready parameters produced from UTAU flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisParameters {
    pub formant_shift_factor: f64,
    pub tension_factor: f64,
    pub breathiness_level: f64,
    pub brightness_gain: f64,
    pub harmonic_emphasis: f64,
    pub spectral_tilt: f64,
}

impl Default for SynthesisParameters {
    fn default() -> Self {
        Self {
            formant_shift_factor: 1.0,
            tension_factor: 0.0,
            breathiness_level: 0.0,
            brightness_gain: 1.0,
            harmonic_emphasis: 0.0,
            spectral_tilt: 0.0,
        }
    }
}

/// Multiplicative adjustment applied per voice type before safety limiting.
struct VoiceTypeAdjustment {
    formant_shift: f64,
    tension: f64,
    breathiness: f64,
    brightness: f64,
}

fn voice_type_adjustment(voice_type: VoiceType) -> VoiceTypeAdjustment {
    match voice_type {
        VoiceType::MaleAdult => VoiceTypeAdjustment { formant_shift: 0.95, tension: 1.0, breathiness: 0.9, brightness: 0.95 },
        VoiceType::FemaleAdult => VoiceTypeAdjustment { formant_shift: 1.05, tension: 1.0, breathiness: 1.0, brightness: 1.05 },
        VoiceType::Child => VoiceTypeAdjustment { formant_shift: 1.2, tension: 1.1, breathiness: 1.0, brightness: 1.15 },
        VoiceType::Robotic => VoiceTypeAdjustment { formant_shift: 1.0, tension: 1.3, breathiness: 0.2, brightness: 1.1 },
        VoiceType::Whisper => VoiceTypeAdjustment { formant_shift: 1.0, tension: 0.7, breathiness: 1.6, brightness: 0.9 },
        VoiceType::Growl => VoiceTypeAdjustment { formant_shift: 0.9, tension: 1.4, breathiness: 0.8, brightness: 0.85 },
        VoiceType::Unknown => VoiceTypeAdjustment { formant_shift: 1.0, tension: 1.0, breathiness: 1.0, brightness: 1.0 },
    }
}

/// Converts UTAU flags plus a base F0 into synthesis parameters.
pub fn convert_flags(
    flags: UtauFlags,
    base_f0: f64,
    voice_type: VoiceType,
    config: &FlagConversionConfig,
) -> SynthesisParameters {
    let freq_scaling = 1.0 + 0.2 * (base_f0.max(1.0) / 110.0).log2();

    let mut params = SynthesisParameters::default();
    params.formant_shift_factor =
        1.0 + (flags.g as f64 / 100.0) * 0.5 * config.g_sensitivity * freq_scaling;
    params.tension_factor = ((1.5 * (flags.t as f64 / 100.0) * config.t_sensitivity).tanh()).clamp(-1.0, 1.0);
    params.breathiness_level = ((flags.bre as f64 / 100.0) * 0.8 * config.bre_sensitivity).clamp(0.0, 1.0);
    params.brightness_gain = 1.0 + (flags.bri as f64 / 100.0) * 0.6 * config.bri_sensitivity;

    if config.enable_cross_flag_interactions {
        apply_cross_flag_interactions(&mut params, flags);
    }

    let adjustment = voice_type_adjustment(voice_type);
    params.formant_shift_factor *= adjustment.formant_shift;
    params.tension_factor *= adjustment.tension;
    params.breathiness_level *= adjustment.breathiness;
    params.brightness_gain *= adjustment.brightness;

    soften_inconsistent_combinations(&mut params);
    clamp_to_ranges(&mut params, config);

    params
}

fn apply_cross_flag_interactions(params: &mut SynthesisParameters, flags: UtauFlags) {
    if flags.g > 30 && flags.t > 30 {
        params.harmonic_emphasis += 0.2;
        params.spectral_tilt += 1.0;
    }
    if flags.bre > 50 && flags.t > 40 {
        params.breathiness_level *= 0.7;
        params.tension_factor *= 0.8;
    }
    if flags.bri.abs() > 30 && flags.g.abs() > 20 {
        params.formant_shift_factor += (flags.bri as f64 / 100.0) * (flags.g as f64 / 100.0) * 0.15;
    }
    if flags.bre > 30 && flags.bri != 0 {
        params.brightness_gain *= 1.0 - (flags.bre as f64 / 100.0) * 0.2;
    }
}

/// Softens (rather than rejects) implausible parameter combinations:
/// high breathiness paired with high harmonic emphasis, or extreme
/// formant shift paired with high brightness.
fn soften_inconsistent_combinations(params: &mut SynthesisParameters) {
    if params.breathiness_level > 0.7 && params.harmonic_emphasis > 0.3 {
        params.harmonic_emphasis *= 0.6;
    }
    if (params.formant_shift_factor - 1.0).abs() > 0.4 && params.brightness_gain > 1.3 {
        params.brightness_gain = 1.0 + (params.brightness_gain - 1.0) * 0.6;
    }
}

fn clamp_to_ranges(params: &mut SynthesisParameters, config: &FlagConversionConfig) {
    params.formant_shift_factor = params.formant_shift_factor.clamp(config.formant_shift_range.0, config.formant_shift_range.1);
    params.tension_factor = params.tension_factor.clamp(config.tension_range.0, config.tension_range.1);
    params.breathiness_level = params.breathiness_level.clamp(config.breathiness_range.0, config.breathiness_range.1);
    params.brightness_gain = params.brightness_gain.clamp(config.brightness_range.0, config.brightness_range.1);
}

/// Heuristic voice-type detection from classifier output.
pub fn detect_voice_type(classifier: VoiceClassifierOutput) -> VoiceType {
    let f0 = classifier.f0_mean;
    let centroid = classifier.spectral_centroid;
    let hnr = classifier.harmonic_richness;

    if f0 < 120.0 {
        VoiceType::MaleAdult
    } else if f0 > 350.0 && centroid > 3000.0 {
        VoiceType::Child
    } else if f0 > 250.0 && f0 <= 350.0 {
        VoiceType::FemaleAdult
    } else if hnr < 0.3 {
        VoiceType::Whisper
    } else if hnr > 0.9 && centroid < 1500.0 {
        VoiceType::Growl
    } else {
        VoiceType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_flags_produce_identity_parameters() {
        let flags = UtauFlags { g: 0, t: 0, bre: 0, bri: 0 };
        let params = convert_flags(flags, 220.0, VoiceType::Unknown, &FlagConversionConfig::default());
        assert!((params.formant_shift_factor - 1.0).abs() < 1e-9);
        assert!((params.tension_factor).abs() < 1e-9);
        assert!((params.breathiness_level).abs() < 1e-9);
        assert!((params.brightness_gain - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cross_flag_interaction_raises_harmonic_emphasis() {
        let flags = UtauFlags { g: 50, t: 50, bre: 0, bri: 0 };
        let params = convert_flags(flags, 220.0, VoiceType::Unknown, &FlagConversionConfig::default());
        assert!(params.harmonic_emphasis > 0.0);
        assert!(params.spectral_tilt > 0.0);
    }

    #[test]
    fn detects_male_voice_from_low_f0() {
        let classifier = VoiceClassifierOutput { f0_mean: 100.0, spectral_centroid: 1000.0, harmonic_richness: 0.5 };
        assert_eq!(detect_voice_type(classifier), VoiceType::MaleAdult);
    }

    #[test]
    fn detects_whisper_from_low_hnr() {
        let classifier = VoiceClassifierOutput { f0_mean: 200.0, spectral_centroid: 1800.0, harmonic_richness: 0.1 };
        assert_eq!(detect_voice_type(classifier), VoiceType::Whisper);
    }
}
