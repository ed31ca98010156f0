// Amplitude-level symbol coding: every 3 bytes become two 12-bit symbols,
// each held as a constant PCM level for one symbol period.

use crate::config::LinkConfig;

/// Largest 12-bit symbol value.
pub const SYMBOL_MAX: u16 = 0x0FFF;

const SYMBOL_OFFSET: i32 = 2048;
const LEVEL_STEP: i32 = 16;

/// Packs `(b1, b2, b3)` into two 12-bit symbols.
pub fn pack(b1: u8, b2: u8, b3: u8) -> [u16; 2] {
    let sym1 = (b1 as u16) << 4 | (b2 as u16) >> 4;
    let sym2 = ((b2 & 0x0F) as u16) << 8 | b3 as u16;
    [sym1, sym2]
}

pub fn unpack(sym1: u16, sym2: u16) -> [u8; 3] {
    [
        (sym1 >> 4) as u8,
        ((sym1 & 0x0F) << 4 | (sym2 >> 8) & 0x0F) as u8,
        (sym2 & 0xFF) as u8,
    ]
}

/// PCM level carrying `symbol`, centred around zero.
pub fn symbol_level(symbol: u16) -> i16 {
    ((symbol.min(SYMBOL_MAX) as i32 - SYMBOL_OFFSET) * LEVEL_STEP) as i16
}

/// Nearest symbol for a measured mean level.
pub fn level_symbol(level: f64) -> u16 {
    let symbol = (level / LEVEL_STEP as f64).round() as i32 + SYMBOL_OFFSET;
    symbol.clamp(0, SYMBOL_MAX as i32) as u16
}

/// Samples needed to carry `bytes` bytes once padded to whole symbol pairs.
pub fn samples_for_bytes(bytes: usize, samples_per_symbol: usize) -> usize {
    bytes.div_ceil(3) * 2 * samples_per_symbol
}

pub struct Modulator {
    samples_per_symbol: usize,
}

impl Modulator {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            samples_per_symbol: config.samples_per_symbol(),
        }
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.samples_per_symbol
    }

    /// Zero-pads `payload` to a multiple of 3 bytes and holds each packed
    /// symbol for one symbol period.
    pub fn modulate(&self, payload: &[u8]) -> Vec<i16> {
        let mut out =
            Vec::with_capacity(samples_for_bytes(payload.len(), self.samples_per_symbol));
        for chunk in payload.chunks(3) {
            let b = |i: usize| chunk.get(i).copied().unwrap_or(0);
            for symbol in pack(b(0), b(1), b(2)) {
                out.extend(std::iter::repeat_n(
                    symbol_level(symbol),
                    self.samples_per_symbol,
                ));
            }
        }
        out
    }
}

/// Recovers symbols from level-coded windows. Each window is averaged over
/// its interior so edge smearing and misalignment up to the trimmed margin
/// do not leak into the decision.
pub struct Demodulator {
    samples_per_symbol: usize,
    edge: usize,
}

impl Demodulator {
    pub fn new(config: &LinkConfig) -> Self {
        let samples_per_symbol = config.samples_per_symbol();
        let edge = (samples_per_symbol as f64 * config.modulation.edge_fraction) as usize;
        Self {
            samples_per_symbol,
            edge: edge.min((samples_per_symbol - 1) / 2),
        }
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.samples_per_symbol
    }

    /// Samples skipped at both ends of a symbol window.
    pub fn edge(&self) -> usize {
        self.edge
    }

    /// Length of the interior a symbol decision is made over.
    pub fn inner_width(&self) -> usize {
        self.samples_per_symbol - 2 * self.edge
    }

    /// Symbol carried by an already-trimmed interior window.
    pub fn detect_inner(&self, inner: &[i16]) -> u16 {
        if inner.is_empty() {
            return 0;
        }
        let sum: f64 = inner.iter().map(|&s| s as f64).sum();
        level_symbol(sum / inner.len() as f64)
    }

    /// Symbol carried by one full symbol window.
    pub fn detect_symbol(&self, window: &[i16]) -> u16 {
        let end = window.len().saturating_sub(self.edge);
        let start = self.edge.min(end);
        self.detect_inner(&window[start..end])
    }

    /// Demodulates whole symbol periods of `samples`, returning the padded
    /// byte stream. A trailing unpaired symbol is dropped.
    pub fn demodulate(&self, samples: &[i16]) -> Vec<u8> {
        let symbols: Vec<u16> = samples
            .chunks_exact(self.samples_per_symbol)
            .map(|window| self.detect_symbol(window))
            .collect();
        symbols
            .chunks_exact(2)
            .flat_map(|pair| unpack(pair[0], pair[1]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn codec() -> (Modulator, Demodulator) {
        let config = LinkConfig::default();
        (Modulator::new(&config), Demodulator::new(&config))
    }

    #[test]
    fn test_pack_bit_layout() {
        assert_eq!(pack(0xAB, 0xCD, 0xEF), [0xABC, 0xDEF]);
        assert_eq!(unpack(0xABC, 0xDEF), [0xAB, 0xCD, 0xEF]);
        assert_eq!(pack(0xFF, 0xFF, 0xFF), [SYMBOL_MAX, SYMBOL_MAX]);
    }

    #[test]
    fn test_level_extremes() {
        assert_eq!(symbol_level(0), i16::MIN);
        assert_eq!(symbol_level(SYMBOL_MAX), 32752);
        assert_eq!(level_symbol(i16::MIN as f64), 0);
        assert_eq!(level_symbol(40000.0), SYMBOL_MAX);
    }

    #[test]
    fn test_padding_to_three_bytes() {
        let (modulator, demodulator) = codec();
        let sps = modulator.samples_per_symbol();

        assert_eq!(modulator.modulate(b"abc").len(), 2 * sps);
        assert_eq!(modulator.modulate(b"abcd").len(), 4 * sps);

        let bytes = demodulator.demodulate(&modulator.modulate(b"abcd"));
        assert_eq!(bytes, b"abcd\0\0");
    }

    #[test]
    fn test_random_payload_round_trip() {
        let (modulator, demodulator) = codec();
        let mut rng = rand::rng();
        for len in [0usize, 1, 2, 3, 5, 64, 101] {
            let payload: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            let bytes = demodulator.demodulate(&modulator.modulate(&payload));
            assert_eq!(bytes.len(), len.div_ceil(3) * 3);
            assert_eq!(&bytes[..len], payload.as_slice());
            assert!(bytes[len..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_survives_noise_and_misalignment() {
        let (modulator, demodulator) = codec();
        let payload = b"noisy \x00\x00 channel";
        let mut samples = modulator.modulate(payload);
        let mut rng = rand::rng();
        for s in samples.iter_mut() {
            *s = s.saturating_add(rng.random_range(-60..=60));
        }
        // Shift by a fifth of a symbol; the trimmed edges absorb it.
        let shift = demodulator.samples_per_symbol() / 5;
        let mut shifted = vec![0i16; shift];
        shifted.extend_from_slice(&samples[..samples.len() - shift]);

        let bytes = demodulator.demodulate(&shifted);
        assert_eq!(&bytes[..payload.len()], payload);
    }
}
