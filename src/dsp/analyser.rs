//! Analyser tap
//!
//! Keeps the most recent `fft_size` samples and produces byte snapshots:
//! time domain centered at 128, and a Blackman-windowed magnitude spectrum
//! in dB, smoothed over time and scaled into [min_db, max_db] -> [0, 255].

use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Ring-buffered analyser state
pub struct Analyser {
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    ring: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for Analyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("min_db", &self.min_db)
            .field("max_db", &self.max_db)
            .finish()
    }
}

impl Analyser {
    /// `fft_size` is rounded up to a power of two
    pub fn new(fft_size: usize, smoothing: f32, min_db: f32, max_db: f32) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / fft_size as f32;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        Self {
            fft_size,
            smoothing: smoothing.clamp(0.0, 0.99),
            min_db,
            max_db,
            ring: vec![0.0; fft_size],
            write_pos: 0,
            window,
            smoothed: vec![0.0; fft_size / 2],
            fft,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of spectrum bins
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Append mono samples
    pub fn push(&mut self, samples: &[f32]) {
        for &s in samples {
            self.ring[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// Oldest-to-newest view of the ring
    fn ordered(&self) -> impl Iterator<Item = f32> + '_ {
        self.ring[self.write_pos..]
            .iter()
            .chain(&self.ring[..self.write_pos])
            .copied()
    }

    /// Fill `out` with time-domain bytes (128 = silence)
    pub fn time_domain_bytes(&self, out: &mut [u8]) {
        for (byte, sample) in out.iter_mut().zip(self.ordered()) {
            *byte = (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8;
        }
    }

    /// Fill `out` with spectrum bytes; updates the smoothing state
    pub fn frequency_bytes(&mut self, out: &mut [u8]) {
        let mut spectrum: Vec<Complex<f32>> = self
            .ordered()
            .zip(&self.window)
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut spectrum);

        let scale = 1.0 / self.fft_size as f32;
        let tau = self.smoothing;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(&spectrum) {
            let magnitude = bin.norm() * scale;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
        }

        let range = self.max_db - self.min_db;
        for (byte, &magnitude) in out.iter_mut().zip(&self.smoothed) {
            let db = if magnitude > 0.0 {
                20.0 * magnitude.log10()
            } else {
                self.min_db
            };
            *byte = (255.0 * (db - self.min_db) / range).clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_size_rounded() {
        let analyser = Analyser::new(1000, 0.8, -100.0, -30.0);
        assert_eq!(analyser.fft_size(), 1024);
        assert_eq!(analyser.frequency_bin_count(), 512);
    }

    #[test]
    fn test_silence_is_centered() {
        let analyser = Analyser::new(64, 0.0, -100.0, -30.0);
        let mut out = [0u8; 64];
        analyser.time_domain_bytes(&mut out);
        assert!(out.iter().all(|&b| b == 128));
    }

    #[test]
    fn test_time_domain_orders_oldest_first() {
        let mut analyser = Analyser::new(32, 0.0, -100.0, -30.0);
        let mut samples = vec![0.0; 32];
        samples[31] = 0.5;
        analyser.push(&samples);
        let mut out = [0u8; 32];
        analyser.time_domain_bytes(&mut out);
        assert_eq!(out[31], 192);
        assert_eq!(out[0], 128);
    }

    #[test]
    fn test_sine_peaks_in_its_bin() {
        let mut analyser = Analyser::new(1024, 0.0, -100.0, -30.0);
        // Bin 64 of 1024 at 48 kHz is 3000 Hz.
        let samples: Vec<f32> = (0..1024)
            .map(|i| (2.0 * PI * 64.0 * i as f32 / 1024.0).sin())
            .collect();
        analyser.push(&samples);
        let mut out = vec![0u8; 512];
        analyser.frequency_bytes(&mut out);
        let peak = out
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert!((63..=65).contains(&peak), "peak bin {peak}");
        assert_eq!(out[400], 0);
    }

    #[test]
    fn test_short_output_buffer() {
        let mut analyser = Analyser::new(64, 0.5, -100.0, -30.0);
        analyser.push(&[0.25; 64]);
        let mut out = [7u8; 4];
        analyser.frequency_bytes(&mut out);
        analyser.time_domain_bytes(&mut out);
        assert_eq!(out[0], 160);
    }
}
