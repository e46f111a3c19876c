//! Soft-clip waveshaping
//!
//! Transfer curve generation and a table-driven wave-shaper. The curve
//! `y = (1 + k)x / (1 + k|x|)` with `k = 2 * amount` is odd, monotonic and
//! maps [-1, 1] onto [-1, 1], compressing peaks instead of truncating them.

/// Soft-clip transfer function for a single input
#[inline]
pub fn soft_clip(x: f32, amount: f32) -> f32 {
    let k = 2.0 * amount;
    (1.0 + k) * x / (1.0 + k * x.abs())
}

/// Build a soft-clip lookup curve with `samples` points over [-1, 1]
///
/// `amount` is clamped to (0, 1]; at least two points are produced.
pub fn soft_clip_curve(amount: f32, samples: usize) -> Vec<f32> {
    let amount = amount.clamp(f32::EPSILON, 1.0);
    let samples = samples.max(2);
    let last = (samples - 1) as f32;
    (0..samples)
        .map(|i| {
            let x = i as f32 * 2.0 / last - 1.0;
            soft_clip(x, amount)
        })
        .collect()
}

/// Table-driven wave-shaper
///
/// Inputs outside [-1, 1] are held at the curve's end points.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveShaper {
    curve: Vec<f32>,
}

impl WaveShaper {
    pub fn new(curve: Vec<f32>) -> Self {
        Self { curve }
    }

    pub fn curve(&self) -> &[f32] {
        &self.curve
    }

    /// Shape a single sample with linear interpolation between curve points
    #[inline]
    pub fn shape(&self, x: f32) -> f32 {
        match self.curve.len() {
            0 => x,
            1 => self.curve[0],
            n => {
                let pos = (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * (n - 1) as f32;
                let idx = (pos.floor() as usize).min(n - 2);
                let frac = pos - idx as f32;
                self.curve[idx] + (self.curve[idx + 1] - self.curve[idx]) * frac
            }
        }
    }

    /// Shape a slice in place
    pub fn process(&self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.shape(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test_case(0.1)]
    #[test_case(0.5)]
    #[test_case(1.0)]
    fn test_curve_is_odd_and_monotonic(amount: f32) {
        let curve = soft_clip_curve(amount, 1025);
        for w in curve.windows(2) {
            assert!(w[1] > w[0]);
        }
        let n = curve.len();
        for i in 0..n {
            assert_relative_eq!(curve[i], -curve[n - 1 - i], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_curve_end_points() {
        let curve = soft_clip_curve(0.5, 2048);
        assert_relative_eq!(curve[0], -1.0, epsilon = 1e-6);
        assert_relative_eq!(curve[2047], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_soft_clip_formula() {
        // k = 1: y = 2x / (1 + |x|)
        assert_relative_eq!(soft_clip(0.5, 0.5), 1.0 / 1.5, epsilon = 1e-6);
        assert_relative_eq!(soft_clip(0.0, 0.5), 0.0);
    }

    #[test]
    fn test_degenerate_sizes() {
        assert_eq!(soft_clip_curve(0.5, 0).len(), 2);
        assert_eq!(soft_clip_curve(0.0, 8).len(), 8);
    }

    #[test]
    fn test_shaper_matches_formula_between_points() {
        let shaper = WaveShaper::new(soft_clip_curve(0.5, 4096));
        for &x in &[-0.9_f32, -0.3, 0.0, 0.25, 0.7] {
            assert_relative_eq!(shaper.shape(x), soft_clip(x, 0.5), epsilon = 1e-3);
        }
    }

    #[test]
    fn test_shaper_holds_out_of_range() {
        let shaper = WaveShaper::new(soft_clip_curve(0.5, 64));
        assert_relative_eq!(shaper.shape(3.0), 1.0, epsilon = 1e-6);
        assert_relative_eq!(shaper.shape(-3.0), -1.0, epsilon = 1e-6);
    }
}
