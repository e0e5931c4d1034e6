// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serial pad I/O
//!
//! A byte-oriented, SPI-like transaction engine. Writing the TX data
//! register arms the acknowledge event `8 * (baudrate & !1)` cycles out;
//! when it fires the byte is clocked through the attached pad, the RX
//! latch fills, and a low ACK pulse raises the Controller interrupt on
//! its rising edge. The digital pad answers the identification sequence
//! 0x01 / 0x42 with id bytes 0x41, 0x5A followed by the two key-state
//! bytes (active low).

use crate::core::error::Result;
use crate::core::interrupt::{Interrupt, InterruptController};
use crate::core::scheduler::{EventMode, EventType, Scheduler, Ticks};

/// Status register bits
mod status {
    pub const TX_READY1: u32 = 1 << 0;
    pub const RX_HAS_DATA: u32 = 1 << 1;
    pub const TX_READY2: u32 = 1 << 2;
    pub const NACK: u32 = 1 << 7;
    pub const IRQ: u32 = 1 << 9;
}

/// Digital pad buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
    Cross,
    Circle,
    Triangle,
    Square,
    L1,
    R1,
    L2,
    R2,
}

impl Key {
    /// Bit position in the active-low key-state word
    fn bit(self) -> u16 {
        match self {
            Key::Select => 0,
            Key::Start => 3,
            Key::Up => 4,
            Key::Right => 5,
            Key::Down => 6,
            Key::Left => 7,
            Key::L2 => 8,
            Key::R2 => 9,
            Key::L1 => 10,
            Key::R1 => 11,
            Key::Triangle => 12,
            Key::Circle => 13,
            Key::Cross => 14,
            Key::Square => 15,
        }
    }
}

/// Pad transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PadState {
    Idle,
    IdLow,
    IdHigh,
    ReadLow,
    ReadHigh,
}

/// Digital controller
///
/// Identifier 0x41; key state transmits low-active.
#[derive(Debug)]
pub struct DigitalPad {
    keystate: u16,
    command: u8,
    state: PadState,
}

const CONTROLLER_ID: u8 = 0x41;

impl DigitalPad {
    pub fn new() -> Self {
        Self {
            keystate: 0xFFFF,
            command: 0,
            state: PadState::Idle,
        }
    }

    /// Host input: press or release a button
    pub fn set_key(&mut self, key: Key, pressed: bool) {
        if pressed {
            self.keystate &= !(1 << key.bit());
        } else {
            self.keystate |= 1 << key.bit();
        }
    }

    /// Clock one byte through the pad, returning (reply, ack-low)
    fn transmit(&mut self, value: u8) -> (u8, bool) {
        match self.state {
            PadState::Idle => {
                if value == 0x01 {
                    self.state = PadState::IdLow;
                    return (0xFF, true);
                }

                (0xFF, false)
            }
            PadState::IdLow => {
                self.command = value;
                self.state = PadState::IdHigh;

                (CONTROLLER_ID, true)
            }
            PadState::IdHigh => {
                match self.command {
                    0x42 => self.state = PadState::ReadLow,
                    0x43 => self.state = PadState::Idle,
                    cmd => {
                        log::warn!("unknown digital pad command 0x{:02x}", cmd);
                        self.state = PadState::Idle;
                    }
                }

                (0x5A, self.state != PadState::Idle)
            }
            PadState::ReadLow => {
                self.state = PadState::ReadHigh;

                (self.keystate as u8, true)
            }
            PadState::ReadHigh => {
                self.state = PadState::Idle;

                ((self.keystate >> 8) as u8, false)
            }
        }
    }
}

impl Default for DigitalPad {
    fn default() -> Self {
        Self::new()
    }
}

/// Serial port front-end
#[derive(Debug)]
pub struct Sio {
    status: u32,
    mode: u16,
    control: u16,
    baudrate: u16,

    rx_data: u8,
    tx_data: u8,
    tx_busy: bool,

    /// Attached controller
    pub pad: DigitalPad,
}

impl Sio {
    pub fn new() -> Self {
        Self {
            status: status::TX_READY1 | status::TX_READY2,
            mode: 0,
            control: 0,
            baudrate: 0,
            rx_data: 0xFF,
            tx_data: 0,
            tx_busy: false,
            pad: DigitalPad::new(),
        }
    }

    pub fn reset(&mut self) {
        self.status = status::TX_READY1 | status::TX_READY2;
        self.tx_busy = false;
    }

    /// Read and clear the RX latch
    pub fn read_rx(&mut self) -> u8 {
        self.status &= !status::RX_HAS_DATA;
        self.rx_data
    }

    /// Start a transfer; the reply arrives with the acknowledge event
    pub fn write_tx(&mut self, scheduler: &mut Scheduler, value: u8) -> Result<()> {
        debug_assert!(!self.tx_busy);

        self.tx_data = value;

        // ACK is pulled low a fixed interval after the transfer starts;
        // the exact post-transfer delay of real pads is not modelled
        let delay = 8 * (self.baudrate & !1) as Ticks;
        scheduler.add(EventType::IoAcknowledge, EventMode::Once, delay)?;

        self.status &= !(status::TX_READY1 | status::TX_READY2);
        self.tx_busy = true;

        Ok(())
    }

    /// Acknowledge event handler: clock the byte through the pad
    pub fn complete_transfer(&mut self, intc: &mut InterruptController) {
        let (reply, ack) = self.pad.transmit(self.tx_data);

        self.rx_data = reply;
        self.status |= status::TX_READY1 | status::TX_READY2 | status::RX_HAS_DATA;

        if ack {
            self.status &= !status::NACK;
        } else {
            self.status |= status::NACK;
        }

        if ack && self.status & status::IRQ == 0 {
            self.status |= status::IRQ;
            intc.assert_irq(Interrupt::Controller);
        }

        self.tx_busy = false;
    }

    pub fn read_status(&self) -> u16 {
        self.status as u16
    }

    pub fn write_mode(&mut self, value: u16) {
        self.mode = value & 0x13F;
    }

    pub fn read_control(&self) -> u16 {
        self.control
    }

    /// Control write; the acknowledge bit clears the IRQ latch
    pub fn write_control(&mut self, value: u16) {
        self.control = value & 0x3F7F;

        if self.control & (1 << 4) != 0 {
            self.status &= !status::IRQ;
        }
    }

    pub fn read_baudrate(&self) -> u16 {
        self.baudrate
    }

    pub fn write_baudrate(&mut self, value: u16) {
        self.baudrate = value;
    }
}

impl Default for Sio {
    fn default() -> Self {
        Self::new()
    }
}
