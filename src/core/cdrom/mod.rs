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

//! CD-ROM front-end
//!
//! The command/response state machine and the sector pipeline. Software
//! pushes parameter bytes, writes a command byte, and the scheduler arms
//! the command's execution latency; executing fills the response FIFO
//! and latches an interrupt code (0x3 for first responses, 0x2 for the
//! delayed second responses some commands produce, 0x1 for delivered
//! data sectors). During ReadN a self-re-arming sector event fires at
//! the drive's sector rate (75 sectors/second, doubled at 2x speed) and
//! pulls one raw sector off the disc into the sector buffer; the request
//! register moves it into the data FIFO for DMA draining.

pub mod disc;

use std::path::Path;

use crate::core::error::{EmulatorError, Result};
use crate::core::interrupt::{Interrupt, InterruptController};
use crate::core::scheduler::{EventMode, EventType, Scheduler, Ticks};
use disc::{Disc, SECTOR_SIZE};

/// CPU cycles per sector at single speed (75 sectors/second)
const SINGLE_SPEED_SECTOR: Ticks = 33_868_800 / 75;

/// Base command latency; Init takes longer, a running motor doubles it
const COMMAND_LATENCY: Ticks = 25_000;
const INIT_LATENCY: Ticks = 80_000;

const FIFO_SIZE: usize = 16;

/// Controller commands (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    GetStat,
    SetLoc,
    ReadN,
    Pause,
    Init,
    Demute,
    SetMode,
    GetTn,
    SeekL,
    Test,
    GetId,
}

impl Command {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Command::GetStat),
            0x02 => Ok(Command::SetLoc),
            0x06 => Ok(Command::ReadN),
            0x09 => Ok(Command::Pause),
            0x0A => Ok(Command::Init),
            0x0C => Ok(Command::Demute),
            0x0E => Ok(Command::SetMode),
            0x13 => Ok(Command::GetTn),
            0x15 => Ok(Command::SeekL),
            0x19 => Ok(Command::Test),
            0x1A => Ok(Command::GetId),
            opcode => Err(EmulatorError::UnknownCommand {
                unit: "cdrom",
                opcode,
            }),
        }
    }
}

/// Drive activity encoded in the status response bits [7:5]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveState {
    Idle,
    Reading,
    Seeking,
}

impl DriveState {
    fn bits(self) -> u8 {
        match self {
            DriveState::Idle => 0,
            DriveState::Reading => 1 << 5,
            DriveState::Seeking => 2 << 5,
        }
    }
}

/// Disc position as minute / second / sector
#[derive(Debug, Clone, Copy, Default)]
struct Timecode {
    minute: u8,
    second: u8,
    sector: u8,
}

impl Timecode {
    fn lba(self) -> usize {
        75 * (60 * self.minute as usize + self.second as usize) + self.sector as usize
    }
}

/// Host status register bits (0x1F801800 reads)
mod hsts {
    pub const PRMEMPT: u8 = 1 << 3;
    pub const PRMWRDY: u8 = 1 << 4;
    pub const RSLRRDY: u8 = 1 << 5;
    pub const DRQSTS: u8 = 1 << 6;
    pub const BUSYSTS: u8 = 1 << 7;
}

/// CD-ROM controller
pub struct Cdrom {
    /// Register bank select (bits [1:0] of the host status)
    index: u8,
    /// Host status flags
    hsts: u8,

    /// Motor / activity byte returned in responses
    motor_on: bool,
    drive_state: DriveState,

    /// Mode register (SetMode)
    mode: u8,

    setloc: Timecode,
    setloc_unprocessed: bool,
    position: Timecode,

    pending_command: Option<Command>,
    second_response: Option<Command>,

    parameter_fifo: [u8; FIFO_SIZE],
    parameter_len: usize,

    response_fifo: [u8; FIFO_SIZE],
    response_len: usize,

    /// Raw sector staging and the CPU-visible data FIFO window
    sector_buffer: [u8; SECTOR_SIZE],
    data_fifo: [u8; SECTOR_SIZE],
    data_len: usize,
    data_pos: usize,

    interrupt_enables: u8,
    interrupt_flags: u8,

    disc: Option<Box<dyn Disc>>,
}

impl Cdrom {
    pub fn new() -> Self {
        Self {
            index: 0,
            hsts: hsts::PRMEMPT | hsts::PRMWRDY,
            motor_on: false,
            drive_state: DriveState::Idle,
            mode: 0,
            setloc: Timecode::default(),
            setloc_unprocessed: true,
            position: Timecode::default(),
            pending_command: None,
            second_response: None,
            parameter_fifo: [0; FIFO_SIZE],
            parameter_len: 0,
            response_fifo: [0; FIFO_SIZE],
            response_len: 0,
            sector_buffer: [0; SECTOR_SIZE],
            data_fifo: [0; SECTOR_SIZE],
            data_len: 0,
            data_pos: 0,
            interrupt_enables: 0,
            interrupt_flags: 0,
            disc: None,
        }
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.hsts = hsts::PRMEMPT | hsts::PRMWRDY;
        self.motor_on = false;
        self.drive_state = DriveState::Idle;
        self.mode = 0;
        self.setloc_unprocessed = true;
        self.pending_command = None;
        self.second_response = None;
        self.parameter_len = 0;
        self.response_len = 0;
        self.data_len = 0;
        self.data_pos = 0;
        self.interrupt_enables = 0;
        self.interrupt_flags = 0;
    }

    /// Attach a disc image
    pub fn insert_disc(&mut self, path: &Path) -> Result<()> {
        self.disc = Some(disc::open_disc(path)?);
        Ok(())
    }

    /// Drive status byte used in command responses
    fn stat(&self) -> u8 {
        ((self.motor_on as u8) << 1) | self.drive_state.bits()
    }

    /// Cycles between delivered sectors at the current drive speed
    pub fn sector_interval(&self) -> Ticks {
        if self.mode & (1 << 7) != 0 {
            SINGLE_SPEED_SECTOR / 2
        } else {
            SINGLE_SPEED_SECTOR
        }
    }

    fn push_response(&mut self, bytes: &[u8]) {
        self.response_fifo[..bytes.len()].copy_from_slice(bytes);
        self.response_len = bytes.len();
        self.hsts |= hsts::RSLRRDY;
    }

    /// Latch an interrupt code and raise the CD-ROM line if enabled
    fn raise_interrupt(&mut self, code: u8, intc: &mut InterruptController) {
        self.interrupt_flags = code;

        if self.interrupt_flags & self.interrupt_enables & 0x1F != 0 {
            intc.assert_irq(Interrupt::Cdrom);
        }
    }

    /// Register read (0x1F801800 + 0..3, bank-selected)
    pub fn read8(&mut self, addr: u32) -> Result<u8> {
        if addr & 0x3 == 0 {
            return Ok(self.hsts | (self.index & 0x3));
        }

        let register = 4 * ((addr - 1) & 0x3) + self.index as u32;

        match register {
            // Response FIFO
            1 => {
                if self.response_len == 0 {
                    return Err(EmulatorError::FifoUnderflow { unit: "cdrom" });
                }

                let data = self.response_fifo[0];
                self.response_fifo.copy_within(1..self.response_len, 0);
                self.response_len -= 1;

                if self.response_len == 0 {
                    self.hsts &= !hsts::RSLRRDY;
                }

                Ok(data)
            }
            8 => Ok(0xE0 | self.interrupt_enables),
            9 => Ok(0xE0 | self.interrupt_flags),
            _ => Err(EmulatorError::UnknownRegister {
                unit: "cdrom",
                address: addr,
            }),
        }
    }

    /// Register write; a command write arms the execution latency
    pub fn write8(&mut self, scheduler: &mut Scheduler, addr: u32, data: u8) -> Result<()> {
        if addr & 0x3 == 0 {
            self.index = data & 0x3;
            return Ok(());
        }

        let register = 4 * ((addr - 1) & 0x3) + self.index as u32;

        match register {
            // Command register
            0 => {
                if self.hsts & hsts::BUSYSTS != 0 {
                    return Err(EmulatorError::Internal {
                        message: "cdrom command issued while busy".into(),
                    });
                }

                let command = Command::from_byte(data)?;

                let mut latency = if command == Command::Init {
                    INIT_LATENCY
                } else {
                    COMMAND_LATENCY
                };
                if self.motor_on && command != Command::Init {
                    latency *= 2;
                }

                self.pending_command = Some(command);
                scheduler.add(EventType::CdCommand, EventMode::Once, latency)?;

                self.hsts |= hsts::BUSYSTS;
                Ok(())
            }
            // Parameter FIFO
            4 => {
                if self.parameter_len >= FIFO_SIZE {
                    return Err(EmulatorError::FifoOverflow { unit: "cdrom" });
                }

                self.parameter_fifo[self.parameter_len] = data;
                self.parameter_len += 1;

                self.hsts &= !hsts::PRMEMPT;
                if self.parameter_len >= FIFO_SIZE {
                    self.hsts &= !hsts::PRMWRDY;
                }

                Ok(())
            }
            // Interrupt enable
            5 => {
                self.interrupt_enables = data & 0x1F;
                Ok(())
            }
            // Request register
            8 => {
                if data & (1 << 5) != 0 {
                    return Err(EmulatorError::Internal {
                        message: "cdrom smen request not supported".into(),
                    });
                }
                if data & (1 << 6) != 0 {
                    return Err(EmulatorError::Internal {
                        message: "cdrom bfwr request not supported".into(),
                    });
                }
                if data & (1 << 7) != 0 {
                    self.fill_data_fifo();
                }

                Ok(())
            }
            // Interrupt flag acknowledge (write 1 to clear)
            9 => {
                self.interrupt_flags &= !(data & 0x1F);

                if data & (1 << 6) != 0 {
                    self.parameter_len = 0;
                    self.hsts |= hsts::PRMEMPT | hsts::PRMWRDY;
                }

                Ok(())
            }
            3 | 6 | 7 | 10 => {
                log::warn!("cdrom volume register 0x{:08x} ignored", addr);
                Ok(())
            }
            11 => {
                log::warn!("cdrom apply-volume register ignored");
                Ok(())
            }
            _ => Err(EmulatorError::UnknownRegister {
                unit: "cdrom",
                address: addr,
            }),
        }
    }

    /// First-response handler (CdCommand event)
    pub fn execute_command(
        &mut self,
        scheduler: &mut Scheduler,
        intc: &mut InterruptController,
    ) -> Result<()> {
        let command = self.pending_command.take().ok_or(EmulatorError::Internal {
            message: "cdrom command event without a pending command".into(),
        })?;

        log::debug!("cdrom command {:?}", command);

        match command {
            Command::GetStat => self.push_response(&[self.stat()]),
            Command::SetLoc => {
                self.setloc = Timecode {
                    minute: bcd_to_decimal(self.parameter_fifo[0]),
                    second: bcd_to_decimal(self.parameter_fifo[1]),
                    sector: bcd_to_decimal(self.parameter_fifo[2]),
                };
                self.setloc_unprocessed = true;

                self.push_response(&[self.stat()]);
            }
            Command::ReadN => {
                self.drive_state = DriveState::Reading;

                scheduler.add(EventType::CdSector, EventMode::Manual, self.sector_interval())?;

                if self.setloc_unprocessed {
                    self.position = self.setloc;
                    self.setloc_unprocessed = false;
                }

                self.push_response(&[self.stat()]);
            }
            Command::Pause => {
                self.push_response(&[self.stat()]);

                let latency = if self.drive_state == DriveState::Idle {
                    7_500
                } else {
                    2_160_000 / if self.mode & (1 << 7) != 0 { 2 } else { 1 }
                };

                self.second_response = Some(command);
                scheduler.add(EventType::CdCommand2, EventMode::Once, latency)?;

                if self.drive_state == DriveState::Reading {
                    scheduler.remove(EventType::CdSector)?;
                }

                self.drive_state = DriveState::Idle;
            }
            Command::Init => {
                self.push_response(&[self.stat()]);

                self.second_response = Some(command);
                scheduler.add(EventType::CdCommand2, EventMode::Once, 20_000)?;

                self.motor_on = true;

                if self.drive_state == DriveState::Reading {
                    scheduler.remove(EventType::CdSector)?;
                }
                self.drive_state = DriveState::Idle;

                self.setloc_unprocessed = true;
                self.mode = 0;
            }
            Command::Demute => self.push_response(&[self.stat()]),
            Command::SetMode => {
                self.mode = self.parameter_fifo[0];
                self.push_response(&[self.stat()]);
            }
            Command::GetTn => {
                // Single-track discs only: first track 1, last track 2
                self.push_response(&[self.stat(), 0x01, 0x02]);
            }
            Command::SeekL => {
                self.motor_on = true;

                if self.drive_state == DriveState::Reading {
                    scheduler.remove(EventType::CdSector)?;
                }
                self.drive_state = DriveState::Seeking;

                self.push_response(&[self.stat()]);

                self.second_response = Some(command);
                scheduler.add(EventType::CdCommand2, EventMode::Once, 20_000)?;
            }
            Command::Test => self.execute_test_command()?,
            Command::GetId => {
                self.push_response(&[self.stat()]);

                self.second_response = Some(command);
                scheduler.add(EventType::CdCommand2, EventMode::Once, 20_000)?;
            }
        }

        self.raise_interrupt(0x3, intc);

        self.parameter_len = 0;
        self.hsts |= hsts::PRMEMPT | hsts::PRMWRDY;
        self.hsts &= !hsts::BUSYSTS;

        Ok(())
    }

    /// Second-response handler (CdCommand2 event)
    pub fn execute_second_response(
        &mut self,
        scheduler: &mut Scheduler,
        intc: &mut InterruptController,
    ) -> Result<()> {
        let command = self.second_response.take().ok_or(EmulatorError::Internal {
            message: "cdrom second-response event without a pending command".into(),
        })?;

        match command {
            Command::Pause | Command::Init => {
                self.push_response(&[self.stat()]);
            }
            Command::SeekL => {
                self.position = self.setloc;

                if self.drive_state == DriveState::Reading {
                    scheduler.remove(EventType::CdSector)?;
                }
                self.drive_state = DriveState::Idle;

                self.setloc_unprocessed = false;
                self.push_response(&[self.stat()]);
            }
            Command::GetId => {
                // Licensed disc, NTSC-U/C region signature
                self.push_response(&[0x02, 0x00, 0x20, 0x00, b'S', b'C', b'E', b'A']);
            }
            command => {
                return Err(EmulatorError::Internal {
                    message: format!("unexpected cdrom second response {:?}", command),
                })
            }
        }

        self.raise_interrupt(0x2, intc);
        Ok(())
    }

    /// Test sub-commands; only the version query is meaningful
    fn execute_test_command(&mut self) -> Result<()> {
        if self.parameter_len == 0 {
            return Err(EmulatorError::Internal {
                message: "cdrom test command without a sub-command".into(),
            });
        }

        match self.parameter_fifo[0] {
            // Controller BIOS version/date
            0x20 => {
                self.push_response(&[0x94, 0x09, 0x19, 0xC0]);
                Ok(())
            }
            opcode => Err(EmulatorError::UnknownCommand {
                unit: "cdrom-test",
                opcode,
            }),
        }
    }

    /// Sector event handler (CdSector): read one raw sector and advance
    pub fn deliver_sector(&mut self, intc: &mut InterruptController) -> Result<()> {
        let lba = self.position.lba();

        if lba >= 80 * 60 * 75 {
            return Err(EmulatorError::DiscError {
                message: "timecode past end of disc".into(),
            });
        }

        let disc = self.disc.as_mut().ok_or(EmulatorError::DiscError {
            message: "sector read without a disc".into(),
        })?;
        disc.read_sector(&mut self.sector_buffer, lba)?;

        self.position.sector += 1;
        if self.position.sector >= 75 {
            self.position.sector = 0;

            self.position.second += 1;
            if self.position.second >= 60 {
                self.position.second = 0;

                self.position.minute += 1;
                if self.position.minute >= 80 {
                    return Err(EmulatorError::DiscError {
                        message: "position moved past end of disc".into(),
                    });
                }
            }
        }

        self.push_response(&[self.stat()]);
        self.raise_interrupt(0x1, intc);

        Ok(())
    }

    /// Request-register bit 7: expose the staged sector to the data FIFO
    fn fill_data_fifo(&mut self) {
        let whole_sector = self.mode & (1 << 5) != 0;
        let (start, length) = if whole_sector { (12, 2340) } else { (24, 2048) };

        self.data_fifo[..length].copy_from_slice(&self.sector_buffer[start..start + length]);
        self.data_len = length;
        self.data_pos = 0;

        self.hsts |= hsts::DRQSTS;
    }

    /// DMA port: drain the data FIFO one word at a time
    pub fn read_dma(&mut self) -> Result<u32> {
        if self.data_len - self.data_pos < 4 {
            return Err(EmulatorError::FifoUnderflow { unit: "cdrom" });
        }

        let bytes = &self.data_fifo[self.data_pos..self.data_pos + 4];
        let data = u32::from_le_bytes(bytes.try_into().unwrap());
        self.data_pos += 4;

        if self.data_pos >= self.data_len {
            self.hsts &= !hsts::DRQSTS;
        }

        Ok(data)
    }
}

impl Default for Cdrom {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters arrive BCD-encoded from the CPU
#[inline]
fn bcd_to_decimal(value: u8) -> u8 {
    value - 6 * (value >> 4)
}
