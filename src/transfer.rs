use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mac::{MacLayer, StationId};
use crate::ui::progress::{ProgressManager, templates};

/// Frame type used for file chunks.
pub const FILE_CHUNK_KIND: u8 = 1;

const RECEIVE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: usize,
    pub frames: usize,
    pub retransmissions: u32,
}

/// Sends the file at `path` to `dest`, one acknowledged frame per
/// max-payload chunk. Stops at the first chunk the link gives up on.
pub fn send_file(
    mac: &mut MacLayer,
    dest: StationId,
    path: &Path,
    progress: &ProgressManager,
) -> Result<TransferReport> {
    let data = fs::read(path)?;
    info!("Read {} bytes from {}", data.len(), path.display());

    let bar = format!("send-{}", dest);
    progress
        .create_bar(&bar, data.len() as u64, templates::SENDER, &dest.to_string())
        .unwrap_or_else(|err| debug!("Progress bar unavailable: {}", err));

    let mut report = TransferReport::default();
    for chunk in data.chunks(mac.config().mac.max_payload) {
        let sent = mac.send(dest, FILE_CHUNK_KIND, chunk)?;
        report.frames += 1;
        report.bytes += chunk.len();
        report.retransmissions += sent.retransmissions;
        let _ = progress.inc(&bar, chunk.len() as u64);
        if sent.retransmissions > 0 {
            let _ = progress.set_message(
                &bar,
                &format!("{} ({} retransmissions)", dest, report.retransmissions),
            );
        }
    }

    let _ = progress.finish(&bar, "done");
    info!(
        "Sent {} bytes in {} frames ({} retransmissions)",
        report.bytes, report.frames, report.retransmissions
    );
    Ok(report)
}

/// Appends file chunks delivered by `mac` to `path` until nothing arrives
/// for `idle` or `running` is cleared. Chunks from stations other than
/// `from` are skipped when `from` is given. Returns the bytes written.
pub fn receive_to_file(
    mac: &MacLayer,
    from: Option<StationId>,
    path: &Path,
    idle: Duration,
    running: &AtomicBool,
    progress: &ProgressManager,
) -> Result<usize> {
    let mut file = File::create(path)?;
    let deliveries = mac.deliveries();
    let bar = "receive";
    progress
        .create_bar(bar, 0, templates::RECEIVER, &path.display().to_string())
        .unwrap_or_else(|err| debug!("Progress bar unavailable: {}", err));

    let mut written = 0usize;
    let mut last_activity = Instant::now();
    while running.load(Ordering::SeqCst) && last_activity.elapsed() < idle {
        let delivery = match deliveries.recv_timeout(RECEIVE_POLL) {
            Ok(delivery) => delivery,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if from.is_some_and(|peer| peer != delivery.src) || delivery.kind != FILE_CHUNK_KIND {
            warn!(
                "Skipping {} bytes of type {} from {}",
                delivery.payload.len(),
                delivery.kind,
                delivery.src
            );
            continue;
        }

        file.write_all(&delivery.payload)?;
        file.flush()?;
        written += delivery.payload.len();
        last_activity = Instant::now();
        let _ = progress.inc(bar, delivery.payload.len() as u64);
    }

    let _ = progress.finish(bar, "done");
    info!("Wrote {} bytes to {}", written, path.display());
    Ok(written)
}
