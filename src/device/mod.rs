//! Audio transport seam: the MAC and PHY only ever see blocking PCM16 mono
//! lines opened through [`AudioTransport`].

pub mod jack;
pub mod sim;

use std::fmt;
use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use crate::config::LinkConfig;
use crate::error::Result;
use crate::utils::consts::BITS_PER_SAMPLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub signed: bool,
    pub big_endian: bool,
}

impl AudioFormat {
    /// Signed 16-bit mono at `sample_rate`.
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            bits_per_sample: BITS_PER_SAMPLE,
            channels: 1,
            signed: true,
            big_endian: false,
        }
    }

    pub fn for_link(config: &LinkConfig) -> Self {
        Self::pcm16_mono(config.sample_rate)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit {}, {} ch, {}",
            self.sample_rate,
            self.bits_per_sample,
            if self.signed { "signed" } else { "unsigned" },
            self.channels,
            if self.big_endian { "BE" } else { "LE" }
        )
    }
}

/// Lifecycle shared by playback and capture lines.
pub trait Line: Send {
    fn start(&mut self) -> Result<()>;
    /// Blocks until queued audio has been played (playback) or discards
    /// pending input (capture).
    fn drain(&mut self) -> Result<()>;
    fn close(&mut self);
}

pub trait PlaybackLine: Line {
    /// Total buffer capacity in samples.
    fn buffer_size(&self) -> usize;
    /// Samples that can be written right now without blocking.
    fn available(&self) -> usize;
    /// Queues samples, returning how many were accepted.
    fn write(&mut self, samples: &[i16]) -> Result<usize>;
}

pub trait CaptureLine: Line {
    /// Fills `buffer` with captured samples, returning how many were read.
    /// May return fewer than requested (including zero) after a bounded wait.
    fn read(&mut self, buffer: &mut [i16]) -> Result<usize>;
}

pub trait AudioTransport {
    type Playback: PlaybackLine + 'static;
    type Capture: CaptureLine + 'static;

    fn open_playback(&self, format: &AudioFormat) -> Result<Self::Playback>;
    fn open_capture(&self, format: &AudioFormat) -> Result<Self::Capture>;
}

/// Started line that is drained and closed when dropped, whichever way the
/// owner exits.
pub struct LineGuard<L: Line> {
    line: L,
    name: &'static str,
}

impl<L: Line> LineGuard<L> {
    pub fn start(mut line: L, name: &'static str) -> Result<Self> {
        if let Err(err) = line.start() {
            line.close();
            return Err(err);
        }
        debug!("{} line started", name);
        Ok(Self { line, name })
    }
}

impl<L: Line> Deref for LineGuard<L> {
    type Target = L;

    fn deref(&self) -> &L {
        &self.line
    }
}

impl<L: Line> DerefMut for LineGuard<L> {
    fn deref_mut(&mut self) -> &mut L {
        &mut self.line
    }
}

impl<L: Line> Drop for LineGuard<L> {
    fn drop(&mut self) {
        if let Err(err) = self.line.drain() {
            warn!("Failed to drain {} line: {}", self.name, err);
        }
        self.line.close();
        debug!("{} line closed", self.name);
    }
}
