//! Stop-and-wait ARQ for the sending side.
//!
//! The machine is pure: it never sleeps or touches the line. The caller feeds
//! it events and carries out the returned actions, which keeps the timeout
//! race testable against a virtual clock.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacState {
    Idle,
    TxFrame,
    RxFrame,
    RxFrameAck,
    AckTimeout,
    LinkError,
}

impl fmt::Display for MacState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MacState::Idle => "IDLE",
            MacState::TxFrame => "TxFrame",
            MacState::RxFrame => "RxFrame",
            MacState::RxFrameAck => "RxFrameAck",
            MacState::AckTimeout => "ACKTimeout",
            MacState::LinkError => "LinkError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqEvent {
    Send,
    AckReceived,
    /// Expiry of the timer started with this generation.
    Timeout(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqAction {
    Transmit,
    StartTimer(u64),
    CancelTimer,
    Acknowledged { retransmissions: u32 },
    GiveUp { retransmissions: u32 },
}

pub struct Arq {
    state: MacState,
    max_retransmissions: u32,
    retransmissions: u32,
    timer: u64,
}

impl Arq {
    pub fn new(max_retransmissions: u32) -> Self {
        Self {
            state: MacState::Idle,
            max_retransmissions,
            retransmissions: 0,
            timer: 0,
        }
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn retransmissions(&self) -> u32 {
        self.retransmissions
    }

    /// Leaves `LinkError` (or abandons an exchange) and returns to idle.
    /// Any timer still running becomes stale.
    pub fn reset(&mut self) {
        self.state = MacState::Idle;
        self.retransmissions = 0;
        self.timer += 1;
    }

    fn arm(&mut self) -> [ArqAction; 2] {
        self.timer += 1;
        self.state = MacState::TxFrame;
        [ArqAction::Transmit, ArqAction::StartTimer(self.timer)]
    }

    pub fn on_event(&mut self, event: ArqEvent) -> Vec<ArqAction> {
        match (self.state, event) {
            (MacState::Idle, ArqEvent::Send) => {
                self.retransmissions = 0;
                self.arm().to_vec()
            }
            (MacState::LinkError, ArqEvent::Send) => vec![ArqAction::GiveUp {
                retransmissions: self.retransmissions,
            }],
            (MacState::TxFrame, ArqEvent::AckReceived) => {
                self.state = MacState::Idle;
                self.timer += 1;
                vec![
                    ArqAction::CancelTimer,
                    ArqAction::Acknowledged {
                        retransmissions: self.retransmissions,
                    },
                ]
            }
            (MacState::TxFrame, ArqEvent::Timeout(timer)) if timer == self.timer => {
                self.state = MacState::AckTimeout;
                if self.retransmissions < self.max_retransmissions {
                    self.retransmissions += 1;
                    self.arm().to_vec()
                } else {
                    self.state = MacState::LinkError;
                    vec![ArqAction::GiveUp {
                        retransmissions: self.retransmissions,
                    }]
                }
            }
            // Stale timers, late ACKs and sends while busy change nothing.
            _ => Vec::new(),
        }
    }
}
