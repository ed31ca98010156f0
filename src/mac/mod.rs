// Link layer: framing, stop-and-wait ARQ and the worker threads that drive
// the physical layer.

pub mod arq;
pub mod crc;
pub mod frame;
pub mod layer;

pub use arq::{Arq, ArqAction, ArqEvent, MacState};
pub use frame::{Frame, FrameType, StationId};
pub use layer::{Delivery, MacLayer, SendReport};
