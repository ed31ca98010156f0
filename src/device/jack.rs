//! JACK-backed audio transport. One client carries both directions; the
//! realtime callback only moves samples between the ports and two shared
//! queues, the lines do the rest on ordinary threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::{AudioFormat, AudioTransport, CaptureLine, Line, PlaybackLine};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::utils::consts::{INPUT_PORT_NAME, JACK_CLIENT_NAME, OUTPUT_PORT_NAME};

type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

const POLL: Duration = Duration::from_millis(1);

fn lock(queue: &SampleQueue) -> MutexGuard<'_, VecDeque<f32>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

fn jack_err(context: &str, err: ::jack::Error) -> LinkError {
    LinkError::Transport(format!("{}: {}", context, err))
}

fn to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn to_pcm(sample: f32) -> i16 {
    (sample * 32767.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn print_jack_info(client: &::jack::Client) -> (usize, usize) {
    let sample_rate = client.sample_rate();
    let buffer_size = client.buffer_size();
    info!("JACK Server Info:");
    info!("  Sample Rate: {} Hz", sample_rate);
    info!("  Buffer Size: {} samples", buffer_size);
    info!(
        "  Buffer Duration: {:.2} ms",
        (buffer_size as f64 / sample_rate as f64) * 1000.0
    );
    (sample_rate as usize, buffer_size as usize)
}

/// Wires our ports to the first physical capture and playback ports.
pub fn connect_system_ports(client: &::jack::Client, in_port_name: &str, out_port_name: &str) {
    let physical_inputs = client.ports(
        None,
        None,
        ::jack::PortFlags::IS_INPUT | ::jack::PortFlags::IS_PHYSICAL,
    );
    let physical_outputs = client.ports(
        None,
        None,
        ::jack::PortFlags::IS_OUTPUT | ::jack::PortFlags::IS_PHYSICAL,
    );
    debug!(
        "{} physical inputs, {} physical outputs",
        physical_inputs.len(),
        physical_outputs.len()
    );

    if let Some(mic) = physical_outputs.first() {
        match client.connect_ports_by_name(mic, in_port_name) {
            Ok(_) => info!("Connected capture: {} -> {}", mic, in_port_name),
            Err(e) => error!("Failed connecting {} -> {}: {}", mic, in_port_name, e),
        }
    }
    if let Some(speaker) = physical_inputs.first() {
        match client.connect_ports_by_name(out_port_name, speaker) {
            Ok(_) => info!("Connected playback: {} -> {}", out_port_name, speaker),
            Err(e) => error!("Failed connecting {} -> {}: {}", out_port_name, speaker, e),
        }
    }
    if physical_inputs.is_empty() || physical_outputs.is_empty() {
        warn!("Missing physical input or output ports");
    }
}

/// Realtime side: fills the output port from the playback queue (silence
/// when it runs dry) and appends the input port to the capture queue while
/// a capture line is running.
struct Bridge {
    in_port: ::jack::Port<::jack::AudioIn>,
    out_port: ::jack::Port<::jack::AudioOut>,
    playback: SampleQueue,
    capture: SampleQueue,
    capturing: Arc<AtomicBool>,
    capture_limit: usize,
}

impl ::jack::ProcessHandler for Bridge {
    fn process(&mut self, _: &::jack::Client, ps: &::jack::ProcessScope) -> ::jack::Control {
        let out_buffer = self.out_port.as_mut_slice(ps);
        {
            let mut queue = lock(&self.playback);
            for slot in out_buffer.iter_mut() {
                *slot = queue.pop_front().unwrap_or(0.0);
            }
        }

        if self.capturing.load(Ordering::Relaxed) {
            let mut queue = lock(&self.capture);
            queue.extend(self.in_port.as_slice(ps).iter().copied());
            let excess = queue.len().saturating_sub(self.capture_limit);
            queue.drain(..excess);
        }
        ::jack::Control::Continue
    }
}

pub struct JackTransport {
    _client: ::jack::AsyncClient<(), Bridge>,
    sample_rate: u32,
    buffer_size: usize,
    read_timeout: Duration,
    playback: SampleQueue,
    capture: SampleQueue,
    capturing: Arc<AtomicBool>,
}

impl JackTransport {
    /// Connects to a running JACK server. The server must already run at the
    /// link's sample rate; no resampling is done.
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let (client, status) =
            ::jack::Client::new(JACK_CLIENT_NAME, ::jack::ClientOptions::NO_START_SERVER)
                .map_err(|e| jack_err("opening JACK client", e))?;
        debug!("JACK client status: {:?}", status);
        let (server_rate, _) = print_jack_info(&client);

        if server_rate != config.sample_rate as usize {
            return Err(LinkError::UnsupportedAudioFormat {
                format: AudioFormat::for_link(config),
                reason: format!("JACK server runs at {} Hz", server_rate),
            });
        }

        let in_port = client
            .register_port(INPUT_PORT_NAME, ::jack::AudioIn::default())
            .map_err(|e| jack_err("registering input port", e))?;
        let out_port = client
            .register_port(OUTPUT_PORT_NAME, ::jack::AudioOut::default())
            .map_err(|e| jack_err("registering output port", e))?;
        let in_port_name = in_port
            .name()
            .map_err(|e| jack_err("naming input port", e))?;
        let out_port_name = out_port
            .name()
            .map_err(|e| jack_err("naming output port", e))?;

        let playback: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let capture: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let capturing = Arc::new(AtomicBool::new(false));
        let bridge = Bridge {
            in_port,
            out_port,
            playback: playback.clone(),
            capture: capture.clone(),
            capturing: capturing.clone(),
            capture_limit: config.sample_rate as usize * 10,
        };

        let active = client
            .activate_async((), bridge)
            .map_err(|e| jack_err("activating JACK client", e))?;
        connect_system_ports(active.as_client(), &in_port_name, &out_port_name);

        Ok(Self {
            _client: active,
            sample_rate: config.sample_rate,
            buffer_size: config.transport.line_buffer_samples,
            read_timeout: config.capture_read_timeout(),
            playback,
            capture,
            capturing,
        })
    }

    fn check_format(&self, format: &AudioFormat) -> Result<()> {
        if *format == AudioFormat::pcm16_mono(self.sample_rate) {
            Ok(())
        } else {
            Err(LinkError::UnsupportedAudioFormat {
                format: *format,
                reason: format!(
                    "JACK lines carry {}",
                    AudioFormat::pcm16_mono(self.sample_rate)
                ),
            })
        }
    }
}

impl AudioTransport for JackTransport {
    type Playback = JackPlayback;
    type Capture = JackCapture;

    fn open_playback(&self, format: &AudioFormat) -> Result<JackPlayback> {
        self.check_format(format)?;
        Ok(JackPlayback {
            queue: self.playback.clone(),
            buffer_size: self.buffer_size,
            sample_rate: self.sample_rate,
            open: false,
        })
    }

    fn open_capture(&self, format: &AudioFormat) -> Result<JackCapture> {
        self.check_format(format)?;
        Ok(JackCapture {
            queue: self.capture.clone(),
            capturing: self.capturing.clone(),
            read_timeout: self.read_timeout,
        })
    }
}

pub struct JackPlayback {
    queue: SampleQueue,
    buffer_size: usize,
    sample_rate: u32,
    open: bool,
}

impl Line for JackPlayback {
    fn start(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let queued = lock(&self.queue).len();
        // Twice the queued audio plus a second of slack for a stalled server.
        let budget = Duration::from_secs_f64(2.0 * queued as f64 / self.sample_rate as f64 + 1.0);
        let deadline = Instant::now() + budget;
        while !lock(&self.queue).is_empty() {
            if Instant::now() > deadline {
                return Err(LinkError::Transport(
                    "JACK stopped consuming playback".into(),
                ));
            }
            thread::sleep(POLL);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        lock(&self.queue).clear();
    }
}

impl PlaybackLine for JackPlayback {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn available(&self) -> usize {
        self.buffer_size.saturating_sub(lock(&self.queue).len())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        if !self.open {
            return Err(LinkError::Transport("write to a closed line".into()));
        }
        let mut queue = lock(&self.queue);
        let n = samples
            .len()
            .min(self.buffer_size.saturating_sub(queue.len()));
        queue.extend(samples[..n].iter().map(|&s| to_float(s)));
        Ok(n)
    }
}

pub struct JackCapture {
    queue: SampleQueue,
    capturing: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl Line for JackCapture {
    fn start(&mut self) -> Result<()> {
        lock(&self.queue).clear();
        self.capturing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        lock(&self.queue).clear();
        Ok(())
    }

    fn close(&mut self) {
        self.capturing.store(false, Ordering::Relaxed);
    }
}

impl CaptureLine for JackCapture {
    fn read(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if !self.capturing.load(Ordering::Relaxed) {
            return Err(LinkError::Transport("read from a closed line".into()));
        }
        let deadline = Instant::now() + self.read_timeout;
        loop {
            {
                let mut queue = lock(&self.queue);
                if queue.len() >= buffer.len() || (!queue.is_empty() && Instant::now() >= deadline)
                {
                    let n = buffer.len().min(queue.len());
                    for (slot, sample) in buffer.iter_mut().zip(queue.drain(..n)) {
                        *slot = to_pcm(sample);
                    }
                    return Ok(n);
                }
            }
            if Instant::now() >= deadline {
                return Ok(0);
            }
            thread::sleep(POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion() {
        assert_eq!(to_pcm(to_float(0)), 0);
        assert_eq!(to_pcm(to_float(12345)), 12345);
        assert_eq!(to_pcm(to_float(i16::MIN)), i16::MIN + 1);
        assert_eq!(to_pcm(2.0), i16::MAX);
        assert_eq!(to_pcm(-2.0), i16::MIN);
    }
}
