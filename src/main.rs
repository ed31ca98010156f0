use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use chirplink::device::jack::JackTransport;
use chirplink::device::sim::duplex_pair;
use chirplink::device::AudioFormat;
use chirplink::mac::frame::{Frame, HEADER_LEN};
use chirplink::phy::{PhyReceiver, Transmitter};
use chirplink::transfer::{self, FILE_CHUNK_KIND};
use chirplink::ui::print_banner;
use chirplink::ui::progress::ProgressManager;
use chirplink::utils::logging::init_logging;
use chirplink::utils::wav::{read_wav, write_wav};
use chirplink::{LinkConfig, LinkError, MacLayer, Result, StationId};

#[derive(Parser)]
#[command(name = "chirplink", version, about = "Acoustic point-to-point data link")]
struct Cli {
    /// JSON link configuration; both peers must use the same values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// This station's id
    #[arg(long, global = true, default_value = "0.0.1")]
    station: StationId,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a file to a peer over the sound card
    Send {
        #[arg(long)]
        peer: StationId,
        #[arg(long, default_value = "INPUT.txt")]
        input: PathBuf,
    },
    /// Receive file chunks from the sound card into a file
    Receive {
        /// Only accept chunks from this station
        #[arg(long)]
        peer: Option<StationId>,
        #[arg(long, default_value = "OUTPUT.txt")]
        output: PathBuf,
        /// Stop after this many seconds without data
        #[arg(long, default_value_t = 60)]
        idle_secs: u64,
    },
    /// Write the waveform of one data frame to a WAV file
    Render {
        #[arg(long)]
        peer: StationId,
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "frame.wav")]
        output: PathBuf,
        #[arg(long, default_value_t = FILE_CHUNK_KIND)]
        kind: u8,
    },
    /// Decode every frame found in a WAV recording
    Decode {
        #[arg(long)]
        input: PathBuf,
    },
    /// Exchange a message between two in-process stations over a simulated link
    Loopback {
        #[arg(long, default_value = "0.0.2")]
        peer: StationId,
        #[arg(long, default_value = "hello over the air")]
        text: String,
    },
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    print_banner();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => LinkConfig::from_json_file(path)?,
        None => LinkConfig::default(),
    };
    let station = cli.station;

    match cli.command {
        Command::Send { peer, input } => {
            let transport = JackTransport::open(&config)?;
            let mut mac = MacLayer::start(config, station, &transport)?;
            let progress = ProgressManager::new();
            let report = transfer::send_file(&mut mac, peer, &input, &progress)?;
            info!(
                "{} bytes delivered to {} ({} frames)",
                report.bytes, peer, report.frames
            );
            mac.shutdown();
        }
        Command::Receive {
            peer,
            output,
            idle_secs,
        } => {
            let running = Arc::new(AtomicBool::new(true));
            let r = running.clone();
            ctrlc::set_handler(move || {
                r.store(false, Ordering::SeqCst);
            })
            .map_err(|e| LinkError::Transport(format!("installing Ctrl-C handler: {}", e)))?;

            let transport = JackTransport::open(&config)?;
            let mac = MacLayer::start(config, station, &transport)?;
            let progress = ProgressManager::new();
            transfer::receive_to_file(
                &mac,
                peer,
                &output,
                Duration::from_secs(idle_secs),
                &running,
                &progress,
            )?;
            mac.shutdown();
        }
        Command::Render {
            peer,
            text,
            output,
            kind,
        } => {
            let frame = Frame::new_data(peer, station, kind, 0, text.into_bytes())?;
            if frame.payload().len() > config.mac.max_payload {
                return Err(LinkError::PayloadTooLarge {
                    len: frame.payload().len(),
                    max: config.mac.max_payload,
                });
            }
            let samples = Transmitter::new(&config).render(&frame.encode());
            write_wav(&samples, config.sample_rate, &output)?;
            info!(
                "Wrote {} samples ({:.2} s) to {}",
                samples.len(),
                samples.len() as f64 / config.sample_rate as f64,
                output.display()
            );
        }
        Command::Decode { input } => {
            let (samples, rate) = read_wav(&input)?;
            if rate != config.sample_rate {
                let mut format = AudioFormat::for_link(&config);
                format.sample_rate = rate;
                return Err(LinkError::UnsupportedAudioFormat {
                    format,
                    reason: format!("link runs at {} Hz", config.sample_rate),
                });
            }
            let mut receiver = PhyReceiver::new(
                &config,
                HEADER_LEN,
                Frame::wire_len_from_header,
                Frame::max_wire_len(config.mac.max_payload),
            );
            let mut found = 0;
            for raw in receiver.push(&samples) {
                match Frame::decode(&raw) {
                    Ok(frame) => {
                        found += 1;
                        println!(
                            "{} -> {} type={} seq={} payload={:?}",
                            frame.src(),
                            frame.dest(),
                            frame.frame_type().to_u8(),
                            frame.seq(),
                            String::from_utf8_lossy(frame.payload())
                        );
                    }
                    Err(err) => warn!("Undecodable frame: {}", err),
                }
            }
            info!("{} frames decoded from {}", found, input.display());
        }
        Command::Loopback { peer, text } => {
            let (near, far) = duplex_pair(config.sample_rate);
            let mut sender = MacLayer::start(config.clone(), station, &near)?;
            let receiver = MacLayer::start(config, peer, &far)?;

            let report = sender.send(peer, FILE_CHUNK_KIND, text.as_bytes())?;
            info!(
                "Frame seq={} acknowledged, {} retransmissions, sender state {}",
                report.seq,
                report.retransmissions,
                sender.state()
            );
            match receiver.deliveries().try_recv() {
                Ok(delivery) => println!(
                    "{} received from {}: {}",
                    receiver.station(),
                    delivery.src,
                    String::from_utf8_lossy(&delivery.payload)
                ),
                Err(_) => warn!("Acknowledged frame was not delivered"),
            }
            sender.shutdown();
            receiver.shutdown();
        }
    }
    Ok(())
}
