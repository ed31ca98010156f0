use tracing::{debug, trace, warn};

use super::preamble::PreambleCodec;
use super::ring_buffer::RingBuffer;
use super::symbol::{Demodulator, unpack};
use crate::config::LinkConfig;

/// Reads the total wire length of a frame from its first `header_len`
/// bytes, or `None` when the header is not plausible.
pub type LengthProbe = fn(&[u8]) -> Option<usize>;

enum RxState {
    Scanning,
    Receiving {
        /// Absolute index of the first data sample.
        data_start: u64,
        symbols: Vec<u16>,
        bytes: Vec<u8>,
        expected: Option<usize>,
    },
}

/// Turns a continuous capture stream into raw frame byte strings.
///
/// While scanning it runs the preamble detector once per slice of new
/// samples. A detection fixes where the data begins; from there each symbol
/// window is demodulated as soon as it is complete, the header tells how many
/// bytes to expect, and the receiver goes back to scanning.
pub struct PhyReceiver {
    preamble: PreambleCodec,
    demodulator: Demodulator,
    ring: RingBuffer<i16>,
    window: Vec<i16>,
    state: RxState,

    position: u64,
    since_check: usize,
    fresh: usize,

    slice_width: usize,
    header_len: usize,
    frame_len: LengthProbe,
    max_frame_len: usize,
}

impl PhyReceiver {
    pub fn new(
        config: &LinkConfig,
        header_len: usize,
        frame_len: LengthProbe,
        max_frame_len: usize,
    ) -> Self {
        let preamble = PreambleCodec::new(config);
        let demodulator = Demodulator::new(config);
        let sps = demodulator.samples_per_symbol();
        // Detection can fire a whole preamble ahead of the data or a slice
        // after it; keep enough history for either.
        let capacity = preamble.len() + preamble.span() + 4 * sps;
        let window = vec![0; demodulator.inner_width()];

        debug!(
            "PhyReceiver initialized: span={} samples, {} samples/symbol, ring={}",
            preamble.span(),
            sps,
            capacity
        );

        Self {
            preamble,
            demodulator,
            ring: RingBuffer::new(capacity),
            window,
            state: RxState::Scanning,
            position: 0,
            since_check: 0,
            fresh: 0,
            slice_width: config.slice_width(),
            header_len,
            frame_len,
            max_frame_len,
        }
    }

    pub fn is_synchronized(&self) -> bool {
        matches!(self.state, RxState::Receiving { .. })
    }

    /// Feeds captured samples; returns every frame completed by them.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &sample in samples {
            self.ring.put(sample);
            self.position += 1;
            self.since_check += 1;
            self.fresh += 1;

            match self.state {
                RxState::Scanning => self.scan(),
                RxState::Receiving { .. } => {
                    if let Some(frame) = self.receive() {
                        frames.push(frame);
                    }
                }
            }
        }
        frames
    }

    fn scan(&mut self) {
        if self.since_check < self.slice_width || self.fresh < self.preamble.span() {
            return;
        }
        self.since_check = 0;

        let detection = self.preamble.detect(&self.ring);
        if !detection.detected {
            return;
        }

        let data_start = self.position as i64 - detection.correction_samples;
        let sps = self.demodulator.samples_per_symbol() as i64;
        let oldest = self.position as i64 - self.ring.len() as i64;
        if data_start < oldest + sps {
            warn!(
                "Preamble end {} already left the capture history, ignoring detection",
                data_start
            );
            return;
        }

        debug!(
            "Synchronized at sample {}, data starts at {}",
            self.position, data_start
        );
        self.state = RxState::Receiving {
            data_start: data_start as u64,
            symbols: Vec::new(),
            bytes: Vec::new(),
            expected: None,
        };
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        let sps = self.demodulator.samples_per_symbol() as u64;
        let edge = self.demodulator.edge();
        let position = self.position;

        let RxState::Receiving {
            data_start,
            symbols,
            bytes,
            expected,
        } = &mut self.state
        else {
            return None;
        };

        loop {
            let window_end = *data_start + (symbols.len() as u64 + 1) * sps;
            if window_end > position {
                return None;
            }

            let rbegin = (position - window_end) as usize + edge;
            self.ring
                .copy_stride_right(rbegin, self.window.len(), &mut self.window);
            let symbol = self.demodulator.detect_inner(&self.window);
            trace!(symbol, "symbol demodulated");
            symbols.push(symbol);

            if symbols.len() % 2 == 0 {
                let n = symbols.len();
                bytes.extend(unpack(symbols[n - 2], symbols[n - 1]));
            }

            if expected.is_none() && bytes.len() >= self.header_len {
                match (self.frame_len)(&bytes[..self.header_len]) {
                    Some(len) if len >= self.header_len && len <= self.max_frame_len => {
                        trace!(len, "frame length from header");
                        *expected = Some(len);
                    }
                    other => {
                        warn!(
                            "Implausible frame header (length {:?}), returning to search",
                            other
                        );
                        self.state = RxState::Scanning;
                        self.fresh = 0;
                        self.since_check = 0;
                        return None;
                    }
                }
            }

            if let Some(len) = *expected {
                if bytes.len() >= len {
                    let mut frame = std::mem::take(bytes);
                    frame.truncate(len);
                    debug!("Frame received: {} bytes", len);
                    self.state = RxState::Scanning;
                    self.fresh = 0;
                    self.since_check = 0;
                    return Some(frame);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::symbol::Modulator;

    // Two-byte header holding the total length, big-endian.
    fn probe(header: &[u8]) -> Option<usize> {
        Some(u16::from_be_bytes([header[0], header[1]]) as usize)
    }

    fn burst(config: &LinkConfig, body: &[u8]) -> Vec<i16> {
        let mut wire = ((body.len() + 2) as u16).to_be_bytes().to_vec();
        wire.extend_from_slice(body);
        let mut samples = vec![0i16; config.guard_samples()];
        samples.extend(PreambleCodec::new(config).generate());
        samples.extend(Modulator::new(config).modulate(&wire));
        samples
    }

    #[test]
    fn test_receives_single_burst() {
        let config = LinkConfig::default();
        let mut rx = PhyReceiver::new(&config, 2, probe, 512);
        let samples = burst(&config, b"hello, chirp");

        let frames = rx.push(&samples);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][2..], b"hello, chirp");
        assert!(!rx.is_synchronized());
    }

    #[test]
    fn test_chunked_input_with_leading_noise() {
        use rand::Rng;
        let config = LinkConfig::default();
        let mut rx = PhyReceiver::new(&config, 2, probe, 512);
        let mut rng = rand::rng();

        let mut samples: Vec<i16> = (0..7777).map(|_| rng.random_range(-300..300)).collect();
        samples.extend(burst(&config, b"first"));
        samples.extend(vec![0; 5000]);
        samples.extend(burst(&config, b"second frame"));
        samples.extend(vec![0; 3000]);

        let mut frames = Vec::new();
        for chunk in samples.chunks(1000) {
            frames.extend(rx.push(chunk));
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][2..], b"first");
        assert_eq!(&frames[1][2..], b"second frame");
    }

    #[test]
    fn test_implausible_length_resets() {
        let config = LinkConfig::default();
        let mut rx = PhyReceiver::new(&config, 2, probe, 8);
        let frames = rx.push(&burst(&config, b"far too long for the limit"));
        assert!(frames.is_empty());
        assert!(!rx.is_synchronized());
    }
}
