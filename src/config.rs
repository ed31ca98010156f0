use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::utils::consts::*;

/// Converts a duration in milliseconds to a sample count, rounding up.
///
/// Integer math keeps both peers on exactly the same counts.
pub fn ms_to_samples(ms: u64, sample_rate: u32) -> usize {
    ((ms * sample_rate as u64).div_ceil(1000)) as usize
}

/// Chirp preamble shape and detector tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreambleConfig {
    pub start_freq: f64,
    pub end_freq: f64,
    pub duration_ms: u64,
    pub amplitude: f64,
    pub slice_duration_ms: u64,
    pub slice_inner_duration_ms: u64,
    pub slice_num: usize,
    pub cutoff_variance: f64,
}

impl Default for PreambleConfig {
    fn default() -> Self {
        Self {
            start_freq: PREAMBLE_START_FREQ,
            end_freq: PREAMBLE_END_FREQ,
            duration_ms: PREAMBLE_DURATION_MS,
            amplitude: PREAMBLE_AMPLITUDE,
            slice_duration_ms: SLICE_DURATION_MS,
            slice_inner_duration_ms: SLICE_INNER_DURATION_MS,
            slice_num: SLICE_NUM,
            cutoff_variance: CUTOFF_VARIANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationConfig {
    pub symbol_duration_ms: u64,
    pub edge_fraction: f64,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        Self {
            symbol_duration_ms: SYMBOL_DURATION_MS,
            edge_fraction: SYMBOL_EDGE_FRACTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacConfig {
    pub max_retransmissions: u32,
    pub ack_timeout_ms: u64,
    pub max_payload: usize,
    pub delivery_queue_len: usize,
    pub reception_buffer_bytes: usize,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            max_retransmissions: MAX_RETRANSMISSIONS,
            ack_timeout_ms: ACK_TIMEOUT_MS,
            max_payload: MAX_FRAME_DATA_SIZE,
            delivery_queue_len: DELIVERY_QUEUE_LEN,
            reception_buffer_bytes: RECEPTION_BUFFER_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub guard_ms: u64,
    pub pacing_poll_ms: u64,
    pub capture_read_timeout_ms: u64,
    pub line_buffer_samples: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            guard_ms: GUARD_DURATION_MS,
            pacing_poll_ms: PACING_POLL_MS,
            capture_read_timeout_ms: CAPTURE_READ_TIMEOUT_MS,
            line_buffer_samples: DEFAULT_LINE_BUFFER_SAMPLES,
        }
    }
}

/// Link parameters shared by both peers. Nothing here is negotiated, so
/// the two ends must load identical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub sample_rate: u32,
    pub preamble: PreambleConfig,
    pub modulation: ModulationConfig,
    pub mac: MacConfig,
    pub transport: TransportConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            preamble: PreambleConfig::default(),
            modulation: ModulationConfig::default(),
            mac: MacConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl LinkConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: LinkConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(LinkError::InvalidConfig(msg.to_string()));
        let p = &self.preamble;

        if self.sample_rate == 0 {
            return invalid("sample rate must be positive");
        }
        if !(p.end_freq > p.start_freq && p.start_freq > 0.0) {
            return invalid("preamble must sweep upwards from a positive frequency");
        }
        if p.end_freq >= self.sample_rate as f64 / 2.0 {
            return invalid("preamble end frequency must stay below Nyquist");
        }
        if p.duration_ms == 0 || !(0.0..=1.0).contains(&p.amplitude) {
            return invalid("preamble needs a duration and an amplitude in [0, 1]");
        }
        if p.slice_num < 2 {
            return invalid("detection needs at least two slices");
        }
        // Checked in samples: rounding up can eat a window the millisecond
        // values leave open.
        if 2 * self.slice_inner_width() >= self.slice_width() {
            return invalid("slice trimming leaves nothing to analyse");
        }
        if self.detection_span() > self.preamble_samples() {
            return invalid("detection span is longer than the preamble");
        }
        if self.samples_per_symbol() < 4 {
            return invalid("symbol duration too short");
        }
        if !(0.0..0.5).contains(&self.modulation.edge_fraction) {
            return invalid("symbol edge fraction must be in [0, 0.5)");
        }
        if self.mac.max_payload == 0 || self.mac.max_payload > u16::MAX as usize {
            return invalid("max payload must fit the 16-bit length field");
        }
        if self.mac.ack_timeout_ms == 0 || self.mac.ack_timeout_ms > MAX_TIMEOUT_MS {
            return invalid("ACK timeout must be between 1 ms and one hour");
        }
        if self.transport.capture_read_timeout_ms > MAX_TIMEOUT_MS
            || self.transport.pacing_poll_ms > MAX_TIMEOUT_MS
        {
            return invalid("transport timeouts must not exceed one hour");
        }
        if self.mac.delivery_queue_len == 0 {
            return invalid("delivery queue must hold at least one payload");
        }
        if self.transport.line_buffer_samples == 0 {
            return invalid("line buffer must hold at least one sample");
        }
        Ok(())
    }

    /// Sweep rate of the chirp in Hz per second.
    pub fn chirp_rate(&self) -> f64 {
        let p = &self.preamble;
        (p.end_freq - p.start_freq) * 1000.0 / p.duration_ms as f64
    }

    pub fn preamble_samples(&self) -> usize {
        ms_to_samples(self.preamble.duration_ms, self.sample_rate)
    }

    pub fn slice_width(&self) -> usize {
        ms_to_samples(self.preamble.slice_duration_ms, self.sample_rate)
    }

    pub fn slice_inner_width(&self) -> usize {
        ms_to_samples(self.preamble.slice_inner_duration_ms, self.sample_rate)
    }

    /// Samples the detector looks back over on every run.
    pub fn detection_span(&self) -> usize {
        self.slice_width() * self.preamble.slice_num
    }

    pub fn samples_per_symbol(&self) -> usize {
        ms_to_samples(self.modulation.symbol_duration_ms, self.sample_rate)
    }

    pub fn guard_samples(&self) -> usize {
        ms_to_samples(self.transport.guard_ms, self.sample_rate)
    }

    /// Capture reads are one detection slice wide.
    pub fn capture_chunk(&self) -> usize {
        self.slice_width()
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.mac.ack_timeout_ms)
    }

    pub fn pacing_poll(&self) -> Duration {
        Duration::from_millis(self.transport.pacing_poll_ms)
    }

    pub fn capture_read_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.capture_read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_sample_counts() {
        let config = LinkConfig::default();
        assert_eq!(config.preamble_samples(), 35280);
        assert_eq!(config.slice_width(), 1764);
        assert_eq!(config.slice_inner_width(), 441);
        assert_eq!(config.samples_per_symbol(), 1764);
        assert_eq!(config.guard_samples(), 13230);
        assert_eq!(config.chirp_rate(), 5000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ms_to_samples_rounds_up() {
        assert_eq!(ms_to_samples(1, 44100), 45);
        assert_eq!(ms_to_samples(0, 44100), 0);
        assert_eq!(ms_to_samples(1000, 48000), 48000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LinkConfig =
            serde_json::from_str(r#"{"mac": {"ack_timeout_ms": 250}}"#).unwrap();
        assert_eq!(config.mac.ack_timeout_ms, 250);
        assert_eq!(config.mac.max_retransmissions, MAX_RETRANSMISSIONS);
        assert_eq!(config.sample_rate, SAMPLE_RATE);
    }

    #[test]
    fn test_validate_checks_derived_windows() {
        // 40 ms and 10 ms both round up to a single sample at 10 Hz.
        let mut config = LinkConfig::default();
        config.sample_rate = 10;
        config.preamble.start_freq = 1.0;
        config.preamble.end_freq = 4.0;
        config.preamble.duration_ms = 8000;
        assert_eq!(config.slice_width(), 1);
        assert_eq!(config.slice_inner_width(), 1);
        assert!(matches!(
            config.validate(),
            Err(LinkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_bounds_timeouts() {
        let mut config = LinkConfig::default();
        config.mac.ack_timeout_ms = u64::MAX;
        assert!(config.validate().is_err());
        config.mac.ack_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.mac.ack_timeout_ms = MAX_TIMEOUT_MS;
        assert!(config.validate().is_ok());

        config.transport.capture_read_timeout_ms = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_sweep() {
        let mut config = LinkConfig::default();
        config.preamble.end_freq = 500.0;
        assert!(matches!(
            config.validate(),
            Err(LinkError::InvalidConfig(_))
        ));
    }
}
