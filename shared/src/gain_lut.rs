//! Digital-gain lookup table for low-light preview boosting.
//!
//! The camera approximates extra sensitivity digitally: a precomputed
//! 256-entry table maps raw 8-bit intensity to a brightness-boosted
//! intensity and is applied per channel to preview frames. Building the
//! table is the expensive part; applying it is a straight index per byte,
//! cheap enough to run on every Nth frame of the live stream.

use image::RgbImage;

/// Normalized intensity at or below which output is forced to zero.
pub const BLACK_LEVEL: f64 = 0.028;

/// Gamma applied after black-level subtraction.
pub const GAMMA: f64 = 0.7;

/// Legal range for the digital gain factor.
pub const GAIN_FACTOR_RANGE: (f64, f64) = (1.0, 80.0);

/// Build the 256-entry gain table for the given gain factor.
///
/// For input intensity `i`, normalized `p = i/255`:
/// - `p <= BLACK_LEVEL` maps to 0 (noise floor suppression),
/// - otherwise `((p - bl) / (1 - bl))^GAMMA * factor`, rescaled to
///   `[0, 255]` and clamped.
///
/// The factor is clamped to [`GAIN_FACTOR_RANGE`] before use.
pub fn build_gain_lut(factor: f64) -> [u8; 256] {
    let factor = factor.clamp(GAIN_FACTOR_RANGE.0, GAIN_FACTOR_RANGE.1);
    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let p = i as f64 / 255.0;
        if p <= BLACK_LEVEL {
            continue;
        }
        let adjusted = ((p - BLACK_LEVEL) / (1.0 - BLACK_LEVEL)).powf(GAMMA) * factor;
        *entry = (adjusted * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Remap every color channel of `frame` through `lut` in place.
pub fn apply_gain_lut(frame: &mut RgbImage, lut: &[u8; 256]) {
    for pixel in frame.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = lut[*channel as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_lut_zeroes_below_black_level() {
        let lut = build_gain_lut(4.0);
        for i in 0..256usize {
            if i as f64 / 255.0 <= BLACK_LEVEL {
                assert_eq!(lut[i], 0, "entry {i} should be below the black level");
            } else {
                assert!(lut[i] > 0, "entry {i} should be above the black level");
            }
        }
    }

    #[test]
    fn test_lut_is_non_decreasing() {
        for factor in [1.0, 2.0, 8.0, 80.0] {
            let lut = build_gain_lut(factor);
            for window in lut.windows(2) {
                assert!(
                    window[1] >= window[0],
                    "LUT for factor {factor} decreased: {} -> {}",
                    window[0],
                    window[1]
                );
            }
        }
    }

    #[test]
    fn test_unity_factor_reaches_full_scale() {
        let lut = build_gain_lut(1.0);
        assert_eq!(lut[255], 255);
    }

    #[test]
    fn test_higher_factor_brightens() {
        let low = build_gain_lut(1.0);
        let high = build_gain_lut(8.0);
        // Mid-tone should be lifted, saturated end stays clamped
        assert!(high[64] > low[64]);
        assert_eq!(high[255], 255);
    }

    #[test]
    fn test_factor_is_clamped() {
        assert_eq!(build_gain_lut(0.1), build_gain_lut(1.0));
        assert_eq!(build_gain_lut(500.0), build_gain_lut(80.0));
    }

    #[test]
    fn test_apply_remaps_all_channels() {
        let lut = build_gain_lut(2.0);
        let mut frame = RgbImage::from_pixel(4, 4, Rgb([0, 64, 200]));
        apply_gain_lut(&mut frame, &lut);
        for pixel in frame.pixels() {
            assert_eq!(pixel.0, [lut[0], lut[64], lut[200]]);
        }
    }
}
