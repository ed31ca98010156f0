/// 日志级别（可被 RUST_LOG 覆盖）
pub const LOG_LEVEL: &str = "info";

/// JACK 客户端名称
pub const JACK_CLIENT_NAME: &str = "chirplink";

/// 输入端口名称
pub const INPUT_PORT_NAME: &str = "cl_in";

/// 输出端口名称
pub const OUTPUT_PORT_NAME: &str = "cl_out";

// ============================================================================
// Physical Layer Parameters
// ============================================================================

/// Sample rate (Hz)
pub const SAMPLE_RATE: u32 = 44100;

/// PCM sample width, mono, signed
pub const BITS_PER_SAMPLE: u16 = 16;

// Preamble (linear chirp)
pub const PREAMBLE_START_FREQ: f64 = 1000.0;
pub const PREAMBLE_END_FREQ: f64 = 5000.0;
pub const PREAMBLE_DURATION_MS: u64 = 800;
/// Fraction of i16::MAX
pub const PREAMBLE_AMPLITUDE: f64 = 1.0;

// Preamble detection
pub const SLICE_DURATION_MS: u64 = 40;
/// Trimmed from both edges of every slice before the FFT
pub const SLICE_INNER_DURATION_MS: u64 = 10;
pub const SLICE_NUM: usize = 10;
/// Bigger tolerates weaker signals but misidentifies more often
pub const CUTOFF_VARIANCE: f64 = 0.5;

// Symbols
pub const SYMBOL_DURATION_MS: u64 = 40;
/// Share of a symbol window ignored at each edge when demodulating
pub const SYMBOL_EDGE_FRACTION: f64 = 0.25;

/// Silence written before each preamble
pub const GUARD_DURATION_MS: u64 = 300;

// ============================================================================
// MAC Parameters
// ============================================================================

pub const MAX_RETRANSMISSIONS: u32 = 3;

pub const ACK_TIMEOUT_MS: u64 = 5000;

/// Longest accepted ACK or capture timeout (one hour)
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// Maximum data payload per frame (bytes)
pub const MAX_FRAME_DATA_SIZE: usize = 1024;

/// Deliveries waiting for the upper layer before new frames go unacknowledged
pub const DELIVERY_QUEUE_LEN: usize = 64;

/// Most recent received bytes kept for `received_bytes` (0 keeps none)
pub const RECEPTION_BUFFER_BYTES: usize = 64 * 1024;

/// Playback buffer size reported by transports that have no native one
pub const DEFAULT_LINE_BUFFER_SAMPLES: usize = 8192;

/// Sleep between polls while waiting for the playback buffer to drain
pub const PACING_POLL_MS: u64 = 1;

/// How long a capture read may block before returning what it has
pub const CAPTURE_READ_TIMEOUT_MS: u64 = 20;
