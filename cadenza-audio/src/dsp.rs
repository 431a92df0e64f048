//! Small sample-buffer helpers shared by the backends and callers.

/// Clamps every sample to `[-1.0, 1.0]`.
pub fn clip(samples: &mut [f32]) {
    for sample in samples.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

/// Scales every sample by `volume`, clamped to `[0.0, 2.0]` (1.0 = unity).
pub fn apply_volume(samples: &mut [f32], volume: f32) {
    let volume = volume.clamp(0.0, 2.0);
    for sample in samples.iter_mut() {
        *sample *= volume;
    }
}

/// Weighted mix of `src` into `dst`: `dst * (1 - ratio) + src * ratio`,
/// with `ratio` clamped to `[0.0, 1.0]`. Slices must be the same length.
pub fn mix_into(dst: &mut [f32], src: &[f32], ratio: f32) {
    debug_assert_eq!(dst.len(), src.len());
    let ratio = ratio.clamp(0.0, 1.0);
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = *d * (1.0 - ratio) + s * ratio;
    }
}

/// Linear fade from silence over the whole slice.
pub fn fade_in(samples: &mut [f32]) {
    let len = samples.len();
    if len == 0 {
        return;
    }
    for (i, sample) in samples.iter_mut().enumerate() {
        *sample *= i as f32 / len as f32;
    }
}

/// Linear fade to silence over the whole slice.
pub fn fade_out(samples: &mut [f32]) {
    let len = samples.len();
    if len == 0 {
        return;
    }
    for (i, sample) in samples.iter_mut().enumerate() {
        *sample *= (len - i) as f32 / len as f32;
    }
}

/// Zeroes the slice.
pub fn silence(samples: &mut [f32]) {
    samples.fill(0.0);
}

/// Root-mean-square level of the slice, 0.0 for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Largest absolute sample value in the slice.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_bounds() {
        let mut samples = [1.5, -2.0, 0.25];
        clip(&mut samples);
        assert_eq!(samples, [1.0, -1.0, 0.25]);
    }

    #[test]
    fn test_volume_and_mix() {
        let mut a = [0.5, -0.5];
        apply_volume(&mut a, 0.5);
        assert_eq!(a, [0.25, -0.25]);

        let mut dst = [0.2, 0.4];
        mix_into(&mut dst, &[0.4, 0.0], 0.5);
        assert!((dst[0] - 0.3).abs() < 1e-6);
        assert!((dst[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_volume_clamps_to_zero_and_double() {
        let mut muted = [0.5, -0.5];
        apply_volume(&mut muted, -1.0);
        assert_eq!(muted, [0.0, 0.0]);

        let mut boosted = [0.25, -0.25];
        apply_volume(&mut boosted, 10.0);
        assert_eq!(boosted, [0.5, -0.5]);
    }

    #[test]
    fn test_mix_ratio_clamps_to_unit_range() {
        // Ratio above 1 mixes to pure source.
        let mut dst = [0.1, 0.2];
        mix_into(&mut dst, &[0.8, -0.8], 3.0);
        assert_eq!(dst, [0.8, -0.8]);

        // Ratio below 0 leaves the destination alone.
        let mut dst = [0.1, 0.2];
        mix_into(&mut dst, &[0.8, -0.8], -3.0);
        assert_eq!(dst, [0.1, 0.2]);
    }

    #[test]
    fn test_fades_are_monotone_at_ends() {
        let mut up = [1.0_f32; 8];
        fade_in(&mut up);
        assert_eq!(up[0], 0.0);
        assert!(up[7] < 1.0);
        assert!(up.windows(2).all(|w| w[0] <= w[1]));

        let mut down = [1.0_f32; 8];
        fade_out(&mut down);
        assert_eq!(down[0], 1.0);
        assert!(down.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_levels() {
        let mut samples = [0.5_f32; 4];
        assert!((rms(&samples) - 0.5).abs() < 1e-6);
        assert_eq!(peak(&samples), 0.5);
        silence(&mut samples);
        assert_eq!(rms(&samples), 0.0);
        assert_eq!(peak(&[]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }
}
