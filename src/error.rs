use thiserror::Error;

use crate::device::AudioFormat;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Audio format not supported: {format} ({reason})")]
    UnsupportedAudioFormat { format: AudioFormat, reason: String },

    #[error("Audio transport failure: {0}")]
    Transport(String),

    #[error("Playback buffer overrun: offered {offered} samples, device accepted {accepted}")]
    BufferOverrun { offered: usize, accepted: usize },

    #[error("Corrupted frame: {0}")]
    CorruptedFrame(String),

    #[error("Link down after {retransmissions} retransmissions")]
    LinkDown { retransmissions: u32 },

    #[error("Payload of {len} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Frame type {0} cannot be sent as data")]
    InvalidFrameType(u8),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("MAC layer has shut down")]
    Shutdown,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
