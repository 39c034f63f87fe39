//! Pure conversions between camera hardware units and UI-facing units.
//!
//! The control layer works in ISO values, shutter-speed strings and a
//! logarithmic exposure slider; the camera works in analog gain and
//! microseconds. These functions are the exact mapping between the two and
//! are deliberately free of any device state.

/// Slider range for the logarithmic exposure control.
pub const EXPOSURE_SLIDER_MAX: u32 = 1000;

/// Exposure range reachable through the slider, in microseconds.
pub const SLIDER_MICROS_RANGE: (u64, u64) = (100, 200_000_000);

/// Convert an analog gain value to its displayed ISO equivalent.
pub fn gain_to_iso(gain: f64) -> u32 {
    (gain * 100.0).round() as u32
}

/// Convert a displayed ISO value back to analog gain, clamped to the
/// range the sensor accepts.
pub fn iso_to_gain(iso: u32) -> f64 {
    (iso as f64 / 100.0).clamp(1.0, 16.0)
}

/// Map a slider position in `[0, 1000]` to an exposure in microseconds.
///
/// The mapping is logarithmic so the slider covers 100 µs to 200 s with
/// usable resolution at the short end:
/// `us = 100 * exp(ln(200_000_000 / 100) * slider / 1000)`.
pub fn slider_to_micros(slider: u32) -> u64 {
    let (min_us, max_us) = SLIDER_MICROS_RANGE;
    let span = (max_us as f64 / min_us as f64).ln();
    let fraction = slider.min(EXPOSURE_SLIDER_MAX) as f64 / EXPOSURE_SLIDER_MAX as f64;
    let micros = (min_us as f64 * (span * fraction).exp()).round() as u64;
    micros.clamp(min_us, max_us)
}

/// Format an exposure in microseconds as a photographic shutter speed.
///
/// Sub-second exposures render as a fraction (`"1/250s"`), longer ones as
/// whole seconds (`"4s"`).
pub fn micros_to_shutter_string(micros: u64) -> String {
    let seconds = micros as f64 / 1_000_000.0;
    if seconds < 1.0 {
        format!("1/{}s", (1.0 / seconds).round() as u64)
    } else {
        format!("{}s", seconds.floor() as u64)
    }
}
