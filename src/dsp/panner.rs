//! Equal-power stereo panning

use std::f32::consts::FRAC_PI_2;

/// Left/right gains for a mono source at `pan` in [-1, 1]
#[inline]
pub fn equal_power_gains(pan: f32) -> (f32, f32) {
    let x = (pan.clamp(-1.0, 1.0) + 1.0) * 0.5;
    ((x * FRAC_PI_2).cos(), (x * FRAC_PI_2).sin())
}

/// Pan one frame
///
/// Mono input (`right == None`) is spread with equal-power gains. Stereo
/// input keeps both channels and folds the far side toward the pan
/// direction, so a centered pan is an identity.
#[inline]
pub fn pan_frame(left: f32, right: Option<f32>, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    match right {
        None => {
            let (gl, gr) = equal_power_gains(pan);
            (left * gl, left * gr)
        }
        Some(right) => {
            if pan <= 0.0 {
                let x = (pan + 1.0) * FRAC_PI_2;
                (left + right * x.cos(), right * x.sin())
            } else {
                let x = pan * FRAC_PI_2;
                (left * x.cos(), right + left * x.sin())
            }
        }
    }
}
