//! Acoustic point-to-point data link: a chirp-synchronised, level-coded
//! physical layer with a stop-and-wait ARQ link layer on top, running over
//! any PCM16 mono audio transport.

pub mod config;
pub mod device;
pub mod error;
pub mod mac;
pub mod phy;
pub mod transfer;
pub mod ui;
pub mod utils;

pub use config::LinkConfig;
pub use error::{LinkError, Result};
pub use mac::{Delivery, MacLayer, MacState, SendReport, StationId};
