// Physical layer: chirp preamble synchronisation and amplitude-level
// symbols over a PCM16 mono line.

pub mod preamble;
pub mod receiver;
pub mod ring_buffer;
pub mod spectrum;
pub mod symbol;
pub mod transmitter;

pub use preamble::{Detection, PreambleCodec};
pub use receiver::{LengthProbe, PhyReceiver};
pub use ring_buffer::RingBuffer;
pub use symbol::{Demodulator, Modulator};
pub use transmitter::Transmitter;
