use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Single-sided amplitude spectrum of fixed-length real windows.
pub struct Spectrum {
    fft: Arc<dyn Fft<f64>>,
    len: usize,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    energy: Vec<f64>,
}

impl Spectrum {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(len);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            len,
            buffer: vec![Complex::new(0.0, 0.0); len],
            scratch,
            energy: vec![0.0; len / 2 + 1],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Frequency resolution in Hz for the given sample rate.
    pub fn bin_width(&self, sample_rate: f64) -> f64 {
        sample_rate / self.len as f64
    }

    /// Amplitude per bin (`0..=len/2`) of `window`.
    pub fn energy(&mut self, window: &[i16]) -> &[f64] {
        debug_assert_eq!(window.len(), self.len);
        for (slot, &s) in self.buffer.iter_mut().zip(window) {
            *slot = Complex::new(s as f64, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let l = self.len as f64;
        self.energy[0] = self.buffer[0].norm() / l;
        for i in 1..self.energy.len() {
            self.energy[i] = if i < self.len / 2 || self.len % 2 == 1 {
                2.0 * self.buffer[i].norm() / l
            } else {
                // Nyquist bin of an even-length transform
                self.buffer[i].norm() / l
            };
        }
        &self.energy
    }

    /// Frequency in Hz of the strongest bin of `window`.
    pub fn peak_frequency(&mut self, window: &[i16], sample_rate: f64) -> f64 {
        let bin = arg_max(self.energy(window));
        sample_rate * bin as f64 / self.len as f64
    }
}

/// Index of the first maximum; 0 for an empty slice.
pub fn arg_max(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_pure_tone_peak() {
        let fs = 44100.0;
        let len = 882;
        let tone: Vec<i16> = (0..len)
            .map(|i| (10000.0 * (2.0 * PI * 2500.0 * i as f64 / fs).sin()) as i16)
            .collect();
        let mut spectrum = Spectrum::new(len);
        assert_eq!(spectrum.bin_width(fs), 50.0);
        assert_eq!(spectrum.peak_frequency(&tone, fs), 2500.0);
    }

    #[test]
    fn test_silence_peaks_at_dc() {
        let mut spectrum = Spectrum::new(64);
        assert_eq!(spectrum.peak_frequency(&[0; 64], 8000.0), 0.0);
    }

    #[test]
    fn test_arg_max_first_wins() {
        assert_eq!(arg_max(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(arg_max(&[]), 0);
    }
}
