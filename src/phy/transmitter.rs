use std::borrow::Cow;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, trace};

use super::preamble::PreambleCodec;
use super::symbol::Modulator;
use crate::config::LinkConfig;
use crate::device::PlaybackLine;
use crate::error::{LinkError, Result};

/// Writes `samples` in chunks sized to the device's free space, sleeping
/// between chunks until the device has drained below half of its buffer.
pub fn write_paced<L: PlaybackLine + ?Sized>(
    line: &mut L,
    samples: &[i16],
    poll: Duration,
) -> Result<()> {
    let half = line.buffer_size() / 2;
    let mut offset = 0;
    while offset < samples.len() {
        let room = line.available().min(samples.len() - offset);
        if room > 0 {
            let accepted = line.write(&samples[offset..offset + room])?;
            if accepted < room {
                return Err(LinkError::BufferOverrun {
                    offered: room,
                    accepted,
                });
            }
            offset += accepted;
        }
        if offset < samples.len() {
            while line.available() < half.max(1) {
                thread::sleep(poll);
            }
        }
    }
    Ok(())
}

/// One audio-producing stage: waits for the line to be handed over, plays
/// its samples, hands the line to the next stage.
fn run_stage<'l, 'd, L, F>(
    name: &'static str,
    turn: Receiver<&'l mut L>,
    next: Sender<&'l mut L>,
    prepare: F,
    poll: Duration,
) -> Result<()>
where
    L: PlaybackLine + ?Sized,
    F: FnOnce() -> Cow<'d, [i16]>,
{
    let samples = prepare();
    // An upstream failure drops the line; that stage reports the error.
    let Ok(line) = turn.recv() else {
        return Ok(());
    };
    trace!(stage = name, samples = samples.len(), "stage playing");
    write_paced(line, &samples, poll)?;
    let _ = next.send(line);
    Ok(())
}

/// Frames raw bytes for the air: guard silence, chirp preamble, data
/// symbols and one symbol of trailing silence so the receiver's last
/// window completes even when its alignment runs a little late.
pub struct Transmitter {
    preamble: Vec<i16>,
    modulator: Modulator,
    guard_samples: usize,
    poll: Duration,
}

impl Transmitter {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            preamble: PreambleCodec::new(config).generate(),
            modulator: Modulator::new(config),
            guard_samples: config.guard_samples(),
            poll: config.pacing_poll(),
        }
    }

    /// Data symbols followed by the trailing silence.
    fn data_samples(&self, wire: &[u8]) -> Vec<i16> {
        let mut data = self.modulator.modulate(wire);
        data.resize(data.len() + self.modulator.samples_per_symbol(), 0);
        data
    }

    /// Complete waveform for `wire` as one buffer, for offline use.
    pub fn render(&self, wire: &[u8]) -> Vec<i16> {
        let data = self.data_samples(wire);
        let mut out = Vec::with_capacity(self.guard_samples + self.preamble.len() + data.len());
        out.resize(self.guard_samples, 0);
        out.extend_from_slice(&self.preamble);
        out.extend(data);
        out
    }

    /// Length in samples of the transmission of `wire_len` bytes.
    pub fn burst_len(&self, wire_len: usize) -> usize {
        let sps = self.modulator.samples_per_symbol();
        self.guard_samples
            + self.preamble.len()
            + super::symbol::samples_for_bytes(wire_len, sps)
            + sps
    }

    /// Plays `wire` on `line` through the guard, preamble and data stages.
    ///
    /// Each stage runs on its own thread and may prepare its samples early,
    /// but only the stage currently holding the line writes to it.
    pub fn transmit<L: PlaybackLine + ?Sized>(&self, line: &mut L, wire: &[u8]) -> Result<()> {
        debug!(
            "Transmitting {} bytes ({} samples)",
            wire.len(),
            self.burst_len(wire.len())
        );
        let poll = self.poll;

        thread::scope(|s| {
            let (start, guard_turn) = bounded::<&mut L>(0);
            let (guard_done, preamble_turn) = bounded::<&mut L>(0);
            let (preamble_done, data_turn) = bounded::<&mut L>(0);
            let (data_done, finished) = bounded::<&mut L>(0);

            let guard_samples = self.guard_samples;
            let stages = [
                s.spawn(move || {
                    run_stage(
                        "guard",
                        guard_turn,
                        guard_done,
                        || Cow::Owned(vec![0; guard_samples]),
                        poll,
                    )
                }),
                s.spawn(move || {
                    run_stage(
                        "preamble",
                        preamble_turn,
                        preamble_done,
                        || Cow::Borrowed(self.preamble.as_slice()),
                        poll,
                    )
                }),
                s.spawn(move || {
                    run_stage(
                        "data",
                        data_turn,
                        data_done,
                        || Cow::Owned(self.data_samples(wire)),
                        poll,
                    )
                }),
            ];

            let handed_over = start.send(line).is_ok();
            drop(start);
            let completed = handed_over && finished.recv().is_ok();

            let mut outcome = Ok(());
            for (stage, name) in stages.into_iter().zip(["guard", "preamble", "data"]) {
                let result = stage
                    .join()
                    .unwrap_or_else(|_| Err(LinkError::Transport(format!("{name} stage panicked"))));
                if outcome.is_ok() {
                    outcome = result;
                }
            }
            match outcome {
                Ok(()) if !completed => Err(LinkError::Transport("transmit pipeline aborted".into())),
                other => other,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Line;

    /// Playback line with a fixed-size buffer drained by a fixed amount on
    /// every `available` poll, recording what was written.
    struct SlowLine {
        capacity: usize,
        queued: std::cell::Cell<usize>,
        drain_per_poll: usize,
        written: Vec<i16>,
        max_write: usize,
    }

    impl SlowLine {
        fn new(capacity: usize, drain_per_poll: usize) -> Self {
            Self {
                capacity,
                queued: std::cell::Cell::new(0),
                drain_per_poll,
                written: Vec::new(),
                max_write: 0,
            }
        }
    }

    impl Line for SlowLine {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn drain(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    impl PlaybackLine for SlowLine {
        fn buffer_size(&self) -> usize {
            self.capacity
        }
        fn available(&self) -> usize {
            let q = self.queued.get().saturating_sub(self.drain_per_poll);
            self.queued.set(q);
            self.capacity - q
        }
        fn write(&mut self, samples: &[i16]) -> Result<usize> {
            let free = self.capacity - self.queued.get();
            assert!(samples.len() <= free, "overran the device buffer");
            self.queued.set(self.queued.get() + samples.len());
            self.max_write = self.max_write.max(samples.len());
            self.written.extend_from_slice(samples);
            Ok(samples.len())
        }
    }

    #[test]
    fn test_paced_write_never_overruns() {
        let mut line = SlowLine::new(256, 16);
        let samples: Vec<i16> = (0..5000).map(|i| i as i16).collect();
        write_paced(&mut line, &samples, Duration::from_micros(10)).unwrap();
        assert_eq!(line.written, samples);
        assert!(line.max_write <= 256);
    }

    #[test]
    fn test_short_write_is_an_overrun() {
        struct Stingy;
        impl Line for Stingy {
            fn start(&mut self) -> Result<()> {
                Ok(())
            }
            fn drain(&mut self) -> Result<()> {
                Ok(())
            }
            fn close(&mut self) {}
        }
        impl PlaybackLine for Stingy {
            fn buffer_size(&self) -> usize {
                100
            }
            fn available(&self) -> usize {
                100
            }
            fn write(&mut self, samples: &[i16]) -> Result<usize> {
                Ok(samples.len() / 2)
            }
        }
        let err = write_paced(&mut Stingy, &[1; 60], Duration::from_millis(1)).unwrap_err();
        assert!(matches!(
            err,
            LinkError::BufferOverrun {
                offered: 60,
                accepted: 30
            }
        ));
    }

    #[test]
    fn test_stages_play_in_order() {
        let config = LinkConfig::default();
        let tx = Transmitter::new(&config);
        let mut line = SlowLine::new(4096, 4096);
        let wire = b"staged";

        tx.transmit(&mut line, wire).unwrap();

        assert_eq!(line.written, tx.render(wire));
        assert_eq!(line.written.len(), tx.burst_len(wire.len()));
        let guard = config.guard_samples();
        assert!(line.written[..guard].iter().all(|&s| s == 0));
        assert_eq!(
            &line.written[guard..guard + config.preamble_samples()],
            PreambleCodec::new(&config).generate().as_slice()
        );
    }
}
