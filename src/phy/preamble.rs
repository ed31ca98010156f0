use std::f64::consts::PI;

use tracing::{debug, trace};

use super::ring_buffer::RingBuffer;
use super::spectrum::Spectrum;
use crate::config::LinkConfig;

/// Linear chirp from `f_start` to `f_end` Hz lasting `frames` samples at
/// `fs`, scaled to `amplitude` (fraction of full scale).
///
/// `θ(i) = 2π·(k/2/fs²·i² + f0/fs·i)` with `k` the sweep rate in Hz/s.
pub fn chirp(f_start: f64, f_end: f64, frames: usize, fs: f64, amplitude: f64) -> Vec<i16> {
    let duration = frames as f64 / fs;
    let chirp_rate = (f_end - f_start) / duration;
    let a_max = amplitude * i16::MAX as f64;
    (0..frames)
        .map(|i| {
            let i = i as f64;
            let theta = 2.0 * PI * (chirp_rate / 2.0 / fs / fs * i * i + f_start / fs * i);
            (a_max * theta.sin()).round() as i16
        })
        .collect()
}

/// Outcome of one detector run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub detected: bool,
    /// Offset of the chirp end from the current tail, in samples. Negative
    /// while the end of the chirp has not arrived yet.
    pub correction_samples: i64,
    pub freq_shift: f64,
    pub variance: f64,
}

impl Detection {
    fn miss(freq_shift: f64, variance: f64) -> Self {
        Self {
            detected: false,
            correction_samples: 0,
            freq_shift,
            variance,
        }
    }
}

/// Generates the chirp preamble and recognises it in captured audio.
///
/// The detector splits the most recent `slice_num` slices of the capture
/// history, takes the dominant frequency of each (edges trimmed), and checks
/// how well that trajectory follows the chirp once a constant offset seen in
/// the newest slice is removed. A constant offset is what a clock mismatch
/// or an early look at the sweep both produce, so the offset doubles as the
/// alignment estimate.
pub struct PreambleCodec {
    fs: f64,
    start_freq: f64,
    end_freq: f64,
    chirp_rate: f64,
    amplitude: f64,
    frames: usize,
    slice_num: usize,
    slice_width: usize,
    slice_inner_width: usize,
    cutoff_variance: f64,
    window: Vec<i16>,
    spectrum: Spectrum,
}

impl PreambleCodec {
    pub fn new(config: &LinkConfig) -> Self {
        let slice_width = config.slice_width();
        let slice_inner_width = config.slice_inner_width();
        let analysed = slice_width - 2 * slice_inner_width;
        Self {
            fs: config.sample_rate as f64,
            start_freq: config.preamble.start_freq,
            end_freq: config.preamble.end_freq,
            chirp_rate: config.chirp_rate(),
            amplitude: config.preamble.amplitude,
            frames: config.preamble_samples(),
            slice_num: config.preamble.slice_num,
            slice_width,
            slice_inner_width,
            cutoff_variance: config.preamble.cutoff_variance,
            window: vec![0; analysed],
            spectrum: Spectrum::new(analysed),
        }
    }

    /// Preamble waveform; deterministic in the configured parameters.
    pub fn generate(&self) -> Vec<i16> {
        chirp(
            self.start_freq,
            self.end_freq,
            self.frames,
            self.fs,
            self.amplitude,
        )
    }

    pub fn len(&self) -> usize {
        self.frames
    }

    /// Samples of history a detector run inspects.
    pub fn span(&self) -> usize {
        self.slice_num * self.slice_width
    }


    /// Expected frequency at the middle of slice `i`, counting back from a
    /// tail sitting exactly on the chirp end.
    fn expected_frequency(&self, i: usize) -> f64 {
        self.end_freq - (i as f64 + 0.5) * self.slice_width as f64 * self.chirp_rate / self.fs
    }

    /// Runs the detector over the newest `span()` samples of `ring`.
    /// Returns a miss while the ring holds less than that.
    pub fn detect(&mut self, ring: &RingBuffer<i16>) -> Detection {
        if ring.len() < self.span() {
            return Detection::miss(0.0, f64::INFINITY);
        }

        let count = self.window.len();
        let mut variance = 0.0;
        let mut freq_shift = 0.0;
        for i in 0..self.slice_num {
            ring.copy_stride_right(
                i * self.slice_width + self.slice_inner_width,
                count,
                &mut self.window,
            );
            let max_energy_freq = self
                .spectrum
                .peak_frequency(&self.window, self.fs);
            let avg_freq = self.expected_frequency(i);
            if i == 0 {
                freq_shift = max_energy_freq - avg_freq;
                continue;
            }
            let delta = (avg_freq - max_energy_freq + freq_shift) / avg_freq;
            variance += delta * delta;
        }
        trace!(variance, freq_shift, "preamble detector");

        if variance < self.cutoff_variance {
            let correction_samples = (freq_shift / self.chirp_rate * self.fs).ceil() as i64;
            debug!(
                "Preamble detected (variance={:.4}, shift={:.1} Hz, correction={} samples)",
                variance, freq_shift, correction_samples
            );
            Detection {
                detected: true,
                correction_samples,
                freq_shift,
                variance,
            }
        } else {
            Detection::miss(freq_shift, variance)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(samples: &[i16], capacity: usize) -> RingBuffer<i16> {
        let mut ring = RingBuffer::new(capacity);
        ring.extend_from_slice(samples);
        ring
    }

    #[test]
    fn test_chirp_shape() {
        let config = LinkConfig::default();
        let codec = PreambleCodec::new(&config);
        let samples = codec.generate();
        assert_eq!(samples.len(), 35280);
        assert_eq!(samples[0], 0);
        assert!(samples.iter().any(|&s| s > 32000));
        assert_eq!(samples, codec.generate());
    }

    #[test]
    fn test_detects_aligned_chirp() {
        let config = LinkConfig::default();
        let mut codec = PreambleCodec::new(&config);
        let ring = ring_with(&codec.generate(), 40000);

        let detection = codec.detect(&ring);
        assert!(detection.detected, "{detection:?}");
        assert!(detection.correction_samples.abs() <= 1, "{detection:?}");
    }

    #[test]
    fn test_silence_is_not_detected() {
        let config = LinkConfig::default();
        let mut codec = PreambleCodec::new(&config);
        let ring = ring_with(&vec![0; 20000], 20000);
        assert!(!codec.detect(&ring).detected);
    }

    #[test]
    fn test_pure_tone_is_not_detected() {
        let config = LinkConfig::default();
        let mut codec = PreambleCodec::new(&config);
        let tone = chirp(3000.0, 3000.0, 20000, 44100.0, 0.8);
        let ring = ring_with(&tone, 20000);
        assert!(!codec.detect(&ring).detected);
    }

    #[test]
    fn test_short_history_is_a_miss() {
        let config = LinkConfig::default();
        let mut codec = PreambleCodec::new(&config);
        let ring = ring_with(&codec.generate()[..1000], 40000);
        assert!(!codec.detect(&ring).detected);
    }
}
