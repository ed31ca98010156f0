use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, trace, warn};

use super::arq::{Arq, ArqAction, ArqEvent, MacState};
use super::frame::{Frame, FrameType, HEADER_LEN, StationId};
use crate::config::LinkConfig;
use crate::device::{AudioFormat, AudioTransport, CaptureLine, LineGuard, PlaybackLine};
use crate::error::{LinkError, Result};
use crate::phy::{PhyReceiver, Transmitter};

/// Payload handed to the upper layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub src: StationId,
    /// Type byte of the data frame (never 0).
    pub kind: u8,
    pub payload: Vec<u8>,
}

/// Outcome of an acknowledged send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub seq: u8,
    pub retransmissions: u32,
}

struct TxRequest {
    wire: Vec<u8>,
    done: Option<Sender<Result<()>>>,
}

#[derive(Clone)]
struct Status(Arc<Mutex<MacState>>);

impl Status {
    fn lock(&self) -> MutexGuard<'_, MacState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self) -> MacState {
        *self.lock()
    }

    fn set(&self, state: MacState) {
        let mut current = self.lock();
        if *current != state {
            trace!("MAC state {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Receive-side transitions only apply while the sender is not in an
    /// exchange.
    fn set_rx(&self, state: MacState) {
        let mut current = self.lock();
        if matches!(
            *current,
            MacState::Idle | MacState::RxFrame | MacState::RxFrameAck
        ) {
            *current = state;
        }
    }
}

/// Acknowledged point-to-point link over an audio transport.
///
/// Two workers own the lines: the transmit worker plays queued frames one at
/// a time, the receive worker reads the capture line continuously, ACKs and
/// delivers data frames addressed to this station and forwards ACKs to the
/// sender. `send` runs the ARQ exchange on the caller's thread.
pub struct MacLayer {
    config: LinkConfig,
    station: StationId,
    status: Status,
    arq: Arq,
    next_seq: u8,

    tx_requests: Option<Sender<TxRequest>>,
    acks: Receiver<(StationId, u8)>,
    deliveries: Receiver<Delivery>,
    received: Arc<Mutex<Vec<u8>>>,

    running: Arc<AtomicBool>,
    tx_handle: Option<JoinHandle<()>>,
    rx_handle: Option<JoinHandle<()>>,
}

impl MacLayer {
    /// Opens both lines on `transport` and starts the workers. Format and
    /// device errors surface here and are fatal.
    pub fn start<T: AudioTransport>(
        config: LinkConfig,
        station: StationId,
        transport: &T,
    ) -> Result<Self> {
        config.validate()?;
        let format = AudioFormat::for_link(&config);

        let playback = LineGuard::start(transport.open_playback(&format)?, "playback")?;
        let capture = LineGuard::start(transport.open_capture(&format)?, "capture")?;

        let (tx_requests, tx_queue) = crossbeam_channel::unbounded::<TxRequest>();
        let (ack_tx, acks) = crossbeam_channel::unbounded();
        let (delivery_tx, deliveries) = crossbeam_channel::bounded(config.mac.delivery_queue_len);
        let status = Status(Arc::new(Mutex::new(MacState::Idle)));
        let received = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let transmitter = Transmitter::new(&config);
        let tx_handle = thread::Builder::new()
            .name(format!("mac-tx-{}", station))
            .spawn(move || tx_worker(playback, transmitter, tx_queue))?;

        let worker = RxWorker {
            station,
            receiver: PhyReceiver::new(
                &config,
                HEADER_LEN,
                Frame::wire_len_from_header,
                Frame::max_wire_len(config.mac.max_payload),
            ),
            chunk: config.capture_chunk(),
            tx_requests: tx_requests.clone(),
            acks: ack_tx,
            deliveries: delivery_tx,
            received: received.clone(),
            reception_limit: config.mac.reception_buffer_bytes,
            status: status.clone(),
            running: running.clone(),
            last_seq: HashMap::new(),
        };
        let rx_handle = match thread::Builder::new()
            .name(format!("mac-rx-{}", station))
            .spawn(move || worker.run(capture))
        {
            Ok(handle) => handle,
            Err(err) => {
                drop(tx_requests);
                let _ = tx_handle.join();
                return Err(err.into());
            }
        };

        info!("MAC layer up: station {}", station);
        Ok(Self {
            arq: Arq::new(config.mac.max_retransmissions),
            config,
            station,
            status,
            next_seq: 0,
            tx_requests: Some(tx_requests),
            acks,
            deliveries,
            received,
            running,
            tx_handle: Some(tx_handle),
            rx_handle: Some(rx_handle),
        })
    }

    pub fn station(&self) -> StationId {
        self.station
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> MacState {
        self.status.get()
    }

    /// Clears `LinkError` so the link can be used again.
    pub fn reset_link(&mut self) {
        self.arq.reset();
        while self.acks.try_recv().is_ok() {}
        self.status.set(MacState::Idle);
        info!("Link reset");
    }

    /// Channel of payloads received from peers, in arrival order. While it
    /// is full, new data frames are left unacknowledged so their senders
    /// retransmit later.
    pub fn deliveries(&self) -> Receiver<Delivery> {
        self.deliveries.clone()
    }

    /// The most recent delivered payload bytes, concatenated, up to the
    /// configured reception buffer size.
    pub fn received_bytes(&self) -> Vec<u8> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sends `payload` to `dest` as a data frame of type `kind` and blocks
    /// until it is acknowledged or the retransmission budget runs out.
    pub fn send(&mut self, dest: StationId, kind: u8, payload: &[u8]) -> Result<SendReport> {
        let max = self.config.mac.max_payload;
        if payload.len() > max {
            return Err(LinkError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        if self.status.get() == MacState::LinkError {
            return Err(LinkError::LinkDown {
                retransmissions: self.arq.retransmissions(),
            });
        }

        let seq = self.next_seq;
        let frame = Frame::new_data(dest, self.station, kind, seq, payload.to_vec())?;
        self.next_seq = self.next_seq.wrapping_add(1);
        let wire = frame.encode();
        debug!(
            "Sending frame seq={} to {} ({} payload bytes)",
            seq,
            dest,
            payload.len()
        );

        // ACKs left over from an earlier exchange must not satisfy this one.
        while self.acks.try_recv().is_ok() {}

        let timeout = self.config.ack_timeout();
        let mut timer: Option<(u64, Instant)> = None;
        let mut actions = self.arq.on_event(ArqEvent::Send);
        loop {
            for action in actions {
                match action {
                    ArqAction::Transmit => {
                        self.status.set(MacState::TxFrame);
                        if let Err(err) = self.transmit(wire.clone()) {
                            error!("Transmission failed: {}", err);
                            self.arq.reset();
                            self.status.set(MacState::LinkError);
                            return Err(err);
                        }
                    }
                    ArqAction::StartTimer(id) => timer = Some((id, Instant::now() + timeout)),
                    ArqAction::CancelTimer => timer = None,
                    ArqAction::Acknowledged { retransmissions } => {
                        self.status.set(MacState::Idle);
                        debug!(
                            "Frame seq={} acknowledged after {} retransmissions",
                            seq, retransmissions
                        );
                        return Ok(SendReport {
                            seq,
                            retransmissions,
                        });
                    }
                    ArqAction::GiveUp { retransmissions } => {
                        self.status.set(MacState::LinkError);
                        error!(
                            "Link down: frame seq={} unacknowledged after {} retransmissions",
                            seq, retransmissions
                        );
                        return Err(LinkError::LinkDown { retransmissions });
                    }
                }
            }

            let Some((id, deadline)) = timer else {
                return Err(LinkError::Transport("ARQ waiting without a timer".into()));
            };
            let wait = deadline.saturating_duration_since(Instant::now());
            actions = match self.acks.recv_timeout(wait) {
                Ok((src, ack_seq)) if src == dest && ack_seq == seq => {
                    self.arq.on_event(ArqEvent::AckReceived)
                }
                Ok((src, ack_seq)) => {
                    debug!("Ignoring ACK seq={} from {}", ack_seq, src);
                    Vec::new()
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("ACK timeout for frame seq={}", seq);
                    self.status.set(MacState::AckTimeout);
                    self.arq.on_event(ArqEvent::Timeout(id))
                }
                Err(RecvTimeoutError::Disconnected) => return Err(LinkError::Shutdown),
            };
        }
    }

    /// Queues `wire` on the transmit worker and waits until it has been
    /// written to the line.
    fn transmit(&self, wire: Vec<u8>) -> Result<()> {
        let requests = self.tx_requests.as_ref().ok_or(LinkError::Shutdown)?;
        let (done, finished) = crossbeam_channel::bounded(1);
        requests
            .send(TxRequest {
                wire,
                done: Some(done),
            })
            .map_err(|_| LinkError::Shutdown)?;
        finished.recv().map_err(|_| LinkError::Shutdown)?
    }

    /// Stops the workers; both lines are drained and closed.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.rx_handle.take() {
            if handle.join().is_err() {
                error!("Receive worker panicked");
            }
        }
        // The receive worker held the other sender; the queue closes now.
        self.tx_requests = None;
        if let Some(handle) = self.tx_handle.take() {
            if handle.join().is_err() {
                error!("Transmit worker panicked");
            }
        }
        debug!("MAC layer stopped: station {}", self.station);
    }
}

impl Drop for MacLayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tx_worker<P: PlaybackLine>(
    mut line: LineGuard<P>,
    transmitter: Transmitter,
    queue: Receiver<TxRequest>,
) {
    for request in queue.iter() {
        let result = transmitter.transmit(&mut *line, &request.wire);
        if let Err(err) = &result {
            error!("Playback failed: {}", err);
        }
        match request.done {
            Some(done) => {
                let _ = done.send(result);
            }
            None => trace!("ACK played"),
        }
    }
    debug!("Transmit worker exiting");
}

struct RxWorker {
    station: StationId,
    receiver: PhyReceiver,
    chunk: usize,
    tx_requests: Sender<TxRequest>,
    acks: Sender<(StationId, u8)>,
    deliveries: Sender<Delivery>,
    received: Arc<Mutex<Vec<u8>>>,
    reception_limit: usize,
    status: Status,
    running: Arc<AtomicBool>,
    /// Last data sequence number delivered per peer.
    last_seq: HashMap<StationId, u8>,
}

impl RxWorker {
    fn run<C: CaptureLine>(mut self, mut line: LineGuard<C>) {
        let mut buffer = vec![0i16; self.chunk];
        while self.running.load(Ordering::SeqCst) {
            let n = match line.read(&mut buffer) {
                Ok(n) => n,
                Err(err) => {
                    error!("Capture failed: {}", err);
                    self.status.set(MacState::LinkError);
                    break;
                }
            };
            if n == 0 {
                continue;
            }

            let was_synchronized = self.receiver.is_synchronized();
            let frames = self.receiver.push(&buffer[..n]);
            if !was_synchronized && self.receiver.is_synchronized() {
                self.status.set_rx(MacState::RxFrame);
            }
            for raw in frames {
                self.handle(&raw);
            }
            if !self.receiver.is_synchronized() {
                self.status.set_rx(MacState::Idle);
            }
        }
        debug!("Receive worker exiting");
    }

    fn handle(&mut self, raw: &[u8]) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Discarding frame: {}", err);
                return;
            }
        };
        if frame.dest() != self.station {
            trace!("Frame for {} ignored", frame.dest());
            return;
        }

        match frame.frame_type() {
            FrameType::Ack => {
                debug!("ACK seq={} from {}", frame.seq(), frame.src());
                let _ = self.acks.send((frame.src(), frame.seq()));
            }
            FrameType::Data(kind) => {
                let src = frame.src();
                let seq = frame.seq();
                self.status.set_rx(MacState::RxFrameAck);

                if self.last_seq.get(&src) == Some(&seq) {
                    debug!("Duplicate frame seq={} from {}, re-acknowledging", seq, src);
                } else {
                    let payload = frame.into_payload();
                    debug!(
                        "Frame seq={} from {}: {} bytes",
                        seq,
                        src,
                        payload.len()
                    );
                    let kept = (self.reception_limit > 0).then(|| payload.clone());
                    if let Err(TrySendError::Full(_)) =
                        self.deliveries.try_send(Delivery { src, kind, payload })
                    {
                        warn!(
                            "Delivery queue full, leaving frame seq={} from {} unacknowledged",
                            seq, src
                        );
                        return;
                    }
                    self.last_seq.insert(src, seq);
                    if let Some(bytes) = kept {
                        self.keep_received(&bytes);
                    }
                }

                let ack = Frame::new_ack(src, self.station, seq);
                let _ = self.tx_requests.send(TxRequest {
                    wire: ack.encode(),
                    done: None,
                });
            }
        }
    }

    fn keep_received(&self, bytes: &[u8]) {
        let mut received = self.received.lock().unwrap_or_else(PoisonError::into_inner);
        received.extend_from_slice(bytes);
        let excess = received.len().saturating_sub(self.reception_limit);
        received.drain(..excess);
    }
}
