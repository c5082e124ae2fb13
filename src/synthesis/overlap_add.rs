//! Overlap-add with raised-cosine crossfade at pulse boundaries.

use std::f64::consts::PI;

/// Adds a windowed pulse into `buffer` at (possibly fractional, truncated
/// to its integer part by the caller) position `pos`, crossfading against
/// existing energy rather than simply summing, per the continuity
/// guarantee in the component design.
pub fn overlap_add(buffer: &mut Vec<f64>, pulse: &[f64], pos: isize, overlap_length: usize) {
    let p_len = pulse.len() as isize;
    if p_len == 0 {
        return;
    }
    let want_end = pos + p_len;
    if want_end > buffer.len() as isize {
        buffer.resize(want_end as usize, 0.0);
    }
    let start = pos.max(0);
    let end = want_end.min(buffer.len() as isize);
    if end <= start {
        return;
    }
    let start = start as usize;
    let end = end as usize;
    let pulse_offset = (start as isize - pos) as usize;

    let has_existing_energy = buffer[start..end].iter().any(|&x| x.abs() > 1e-10);
    let region_len = end - start;
    let l = overlap_length.min(pulse.len()).min(region_len);

    if !has_existing_energy || l == 0 {
        for i in 0..region_len {
            buffer[start + i] += pulse[pulse_offset + i];
        }
        return;
    }

    for i in 0..l {
        let smooth = if l > 1 { 0.5 * (1.0 - (PI * i as f64 / (l - 1) as f64).cos()) } else { 1.0 };
        let existing = buffer[start + i];
        let new = pulse[pulse_offset + i];
        buffer[start + i] = existing * (1.0 - smooth) + new * smooth;
    }
    for i in l..region_len {
        buffer[start + i] += pulse[pulse_offset + i];
    }
}

/// Applies a cosine fade of `fade_len` samples to the start and end of
/// `signal` to remove boundary clicks: `0.5 * (1 - cos(pi * fade))`.
pub fn fade_edges(signal: &mut [f64], fade_len: usize) {
    let n = signal.len();
    let fade_len = fade_len.min(n / 2);
    for i in 0..fade_len {
        let fade = i as f64 / fade_len as f64;
        let gain = 0.5 * (1.0 - (PI * fade).cos());
        signal[i] *= gain;
        signal[n - 1 - i] *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_overlap_writes_directly() {
        let mut buf = vec![0.0; 10];
        overlap_add(&mut buf, &[1.0, 2.0, 3.0], 5, 8);
        assert_eq!(&buf[5..8], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn overlap_blends_then_adds_tail() {
        let mut buf = vec![1.0; 512];
        buf.resize(768, 0.0);
        let pulse = vec![1.0; 512];
        overlap_add(&mut buf, &pulse, 256, 256);
        // middle region (indices 256..512) should be a monotonic blend
        // from existing (1.0) toward new (1.0): both are 1.0 here so the
        // blended region must stay at 1.0, not sum to 2.0.
        for &v in &buf[256..512] {
            assert!((v - 1.0).abs() < 1e-9, "expected blended value ~1.0, got {v}");
        }
    }

    #[test]
    fn fade_edges_zeroes_endpoints() {
        let mut signal = vec![1.0; 64];
        fade_edges(&mut signal, 32);
        assert!(signal[0].abs() < 1e-6);
        assert!((signal[63] - 1.0).abs() < 1e-2);
    }
}
