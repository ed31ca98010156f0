//! In-memory audio link between two endpoints. Whatever one side plays is
//! what the other side captures, sample for sample, with optional muting to
//! emulate lost transmissions and a level offset to emulate damaged ones.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::trace;

use super::{AudioFormat, AudioTransport, CaptureLine, Line, PlaybackLine};
use crate::error::{LinkError, Result};

/// One end of a simulated duplex link.
pub struct SimTransport {
    sample_rate: u32,
    buffer_size: usize,
    read_timeout: Duration,
    outgoing: Sender<Vec<i16>>,
    incoming: Receiver<Vec<i16>>,
    mute: Arc<AtomicUsize>,
    distortion: Arc<Mutex<Distortion>>,
}

/// Pending level offset: after `skip` samples, `count` samples get `offset`
/// added.
#[derive(Debug, Default, Clone, Copy)]
struct Distortion {
    skip: usize,
    count: usize,
    offset: i16,
}

impl Distortion {
    fn apply(&mut self, chunk: &mut [i16]) {
        let start = self.skip.min(chunk.len());
        self.skip -= start;
        let end = start + self.count.min(chunk.len() - start);
        self.count -= end - start;
        for sample in &mut chunk[start..end] {
            *sample = sample.saturating_add(self.offset);
        }
    }
}

/// Builds two connected endpoints running at `sample_rate`.
pub fn duplex_pair(sample_rate: u32) -> (SimTransport, SimTransport) {
    let (a_tx, b_rx) = crossbeam_channel::unbounded();
    let (b_tx, a_rx) = crossbeam_channel::unbounded();
    let end = |outgoing, incoming| SimTransport {
        sample_rate,
        buffer_size: crate::utils::consts::DEFAULT_LINE_BUFFER_SAMPLES,
        read_timeout: Duration::from_millis(crate::utils::consts::CAPTURE_READ_TIMEOUT_MS),
        outgoing,
        incoming,
        mute: Arc::new(AtomicUsize::new(0)),
        distortion: Arc::new(Mutex::new(Distortion::default())),
    };
    (end(a_tx, a_rx), end(b_tx, b_rx))
}

impl SimTransport {
    /// Replaces the next `samples` samples this end plays with silence.
    pub fn mute_next(&self, samples: usize) {
        self.mute.fetch_add(samples, Ordering::SeqCst);
    }

    /// Adds `offset` to `count` samples this end plays, starting `skip`
    /// samples from now. Replaces any distortion still pending.
    pub fn distort_next(&self, skip: usize, count: usize, offset: i16) {
        *self
            .distortion
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Distortion {
            skip,
            count,
            offset,
        };
    }

    fn check_format(&self, format: &AudioFormat) -> Result<()> {
        let wanted = AudioFormat::pcm16_mono(self.sample_rate);
        let ok = format.sample_rate == wanted.sample_rate
            && format.bits_per_sample == wanted.bits_per_sample
            && format.channels == wanted.channels
            && format.signed;
        if ok {
            Ok(())
        } else {
            Err(LinkError::UnsupportedAudioFormat {
                format: *format,
                reason: format!("simulated link carries {wanted}"),
            })
        }
    }
}

impl AudioTransport for SimTransport {
    type Playback = SimPlayback;
    type Capture = SimCapture;

    fn open_playback(&self, format: &AudioFormat) -> Result<SimPlayback> {
        self.check_format(format)?;
        Ok(SimPlayback {
            outgoing: self.outgoing.clone(),
            mute: self.mute.clone(),
            distortion: self.distortion.clone(),
            buffer_size: self.buffer_size,
            open: false,
        })
    }

    fn open_capture(&self, format: &AudioFormat) -> Result<SimCapture> {
        self.check_format(format)?;
        Ok(SimCapture {
            incoming: self.incoming.clone(),
            pending: VecDeque::new(),
            read_timeout: self.read_timeout,
            open: false,
        })
    }
}

pub struct SimPlayback {
    outgoing: Sender<Vec<i16>>,
    mute: Arc<AtomicUsize>,
    distortion: Arc<Mutex<Distortion>>,
    buffer_size: usize,
    open: bool,
}

impl Line for SimPlayback {
    fn start(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

impl PlaybackLine for SimPlayback {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    // The simulated device plays instantly, so the buffer is always empty.
    fn available(&self) -> usize {
        self.buffer_size
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        if !self.open {
            return Err(LinkError::Transport("write to a closed line".into()));
        }
        let n = samples.len().min(self.buffer_size);
        let mut chunk = samples[..n].to_vec();

        let muted = self
            .mute
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |m| {
                Some(m.saturating_sub(n))
            })
            .unwrap_or(0)
            .min(n);
        if muted > 0 {
            trace!(muted, "muting simulated playback");
            chunk[..muted].fill(0);
        }
        self.distortion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(&mut chunk);

        // A vanished peer behaves like nobody listening.
        let _ = self.outgoing.send(chunk);
        Ok(n)
    }
}

pub struct SimCapture {
    incoming: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    read_timeout: Duration,
    open: bool,
}

impl Line for SimCapture {
    fn start(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

impl CaptureLine for SimCapture {
    fn read(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if !self.open {
            return Err(LinkError::Transport("read from a closed line".into()));
        }
        while self.pending.len() < buffer.len() {
            match self.incoming.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => break,
            }
        }
        if self.pending.is_empty() {
            match self.incoming.recv_timeout(self.read_timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(self.read_timeout),
            }
        }

        let n = buffer.len().min(self.pending.len());
        for (slot, sample) in buffer.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_pair() -> (SimPlayback, SimCapture) {
        let (a, b) = duplex_pair(44100);
        let format = AudioFormat::pcm16_mono(44100);
        let mut play = a.open_playback(&format).unwrap();
        let mut cap = b.open_capture(&format).unwrap();
        play.start().unwrap();
        cap.start().unwrap();
        (play, cap)
    }

    #[test]
    fn test_samples_cross_the_link() {
        let (mut play, mut cap) = open_pair();
        assert_eq!(play.write(&[1, 2, 3, 4, 5]).unwrap(), 5);

        let mut buf = [0i16; 3];
        assert_eq!(cap.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(cap.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(cap.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_mute_blanks_exact_sample_count() {
        let (a, b) = duplex_pair(44100);
        let format = AudioFormat::pcm16_mono(44100);
        let mut play = a.open_playback(&format).unwrap();
        let mut cap = b.open_capture(&format).unwrap();
        play.start().unwrap();
        cap.start().unwrap();

        a.mute_next(4);
        play.write(&[9, 9, 9]).unwrap();
        play.write(&[9, 9, 9]).unwrap();

        let mut buf = [7i16; 6];
        assert_eq!(cap.read(&mut buf).unwrap(), 6);
        assert_eq!(buf, [0, 0, 0, 0, 9, 9]);
    }

    #[test]
    fn test_distortion_spans_writes() {
        let (play_end, b) = duplex_pair(44100);
        let format = AudioFormat::pcm16_mono(44100);
        let mut play = play_end.open_playback(&format).unwrap();
        let mut cap = b.open_capture(&format).unwrap();
        play.start().unwrap();
        cap.start().unwrap();

        play_end.distort_next(2, 3, 100);
        play.write(&[1, 1, 1]).unwrap();
        play.write(&[i16::MAX, 1, 1]).unwrap();

        let mut buf = [0i16; 6];
        assert_eq!(cap.read(&mut buf).unwrap(), 6);
        assert_eq!(buf, [1, 1, 101, i16::MAX, 101, 1]);
    }

    #[test]
    fn test_rejects_foreign_format() {
        let (a, _b) = duplex_pair(44100);
        let err = a
            .open_playback(&AudioFormat::pcm16_mono(48000))
            .err()
            .unwrap();
        assert!(matches!(err, LinkError::UnsupportedAudioFormat { .. }));
    }
}
