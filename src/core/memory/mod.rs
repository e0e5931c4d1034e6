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

//! Memory bus
//!
//! The physical-address decoder: every CPU data access and DMA word goes
//! through here and is routed to RAM, BIOS, scratchpad or a device
//! register window. Each access charges its per-region latency to the
//! scheduler before returning, so device timing follows bus traffic
//! without any extra bookkeeping at the call sites.
//!
//! # Memory Map (physical)
//!
//! | Range                   | Region                        |
//! |-------------------------|-------------------------------|
//! | 0x00000000-0x001FFFFF   | RAM (2 MiB)                   |
//! | 0x1F000000-0x1F7FFFFF   | Expansion 1 (reads return 0)  |
//! | 0x1F800000-0x1F8003FF   | Scratchpad (1 KiB)            |
//! | 0x1F801040-0x1F80104E   | Serial pad I/O                |
//! | 0x1F801070/74           | Interrupt controller          |
//! | 0x1F801080-0x1F8010FF   | DMA channels + DPCR/DICR      |
//! | 0x1F801100-0x1F80112F   | Timers 0..2                   |
//! | 0x1F801800-0x1F801803   | CD-ROM                        |
//! | 0x1F801810/14           | GPU GP0/GP1, GPUREAD/GPUSTAT  |
//! | 0x1F801C00-0x1F801FFF   | SPU                           |
//! | 0x1FC00000-0x1FC7FFFF   | BIOS ROM (512 KiB)            |
//!
//! Reads from unmapped addresses are fatal; writes to the reserved
//! memory-control and expansion-2 ranges are accepted silently. Every
//! RAM write notifies the recompiler's block cache so translated code
//! covering the written page is invalidated before its next dispatch.
//!
//! # Example
//!
//! ```
//! use ember_core::core::memory::Bus;
//!
//! let mut bus = Bus::new();
//!
//! bus.write32(0x0000_1000, 0x1234_5678).unwrap();
//! assert_eq!(bus.read32(0x0000_1000).unwrap(), 0x1234_5678);
//!
//! // Reads charge their region latency to the scheduler
//! assert!(bus.scheduler.current_time() > 0);
//! ```

use std::cell::RefCell;
use std::fs::File;
use std::io::Read;
use std::rc::Rc;

use crate::core::cdrom::Cdrom;
use crate::core::cpu::recompiler::BlockCache;
use crate::core::dma::{self, Dma};
use crate::core::error::{EmulatorError, Result};
use crate::core::gpu::Gpu;
use crate::core::interrupt::InterruptController;
use crate::core::scheduler::{Scheduler, Ticks};
use crate::core::sio::Sio;
use crate::core::spu::Spu;
use crate::core::timer::Timers;

/// Per-region access latencies in CPU cycles
///
/// Widths that never reach a region on real software have no entry.
mod latency {
    use super::Ticks;

    pub const RAM: Ticks = 5;
    pub const RAM_BURST: Ticks = 20;
    pub const BIOS_BYTE: Ticks = 6;
    pub const BIOS_HALF: Ticks = 12;
    pub const BIOS_WORD: Ticks = 24;
    pub const BIOS_BURST: Ticks = 96;
    pub const EXPANSION_BYTE: Ticks = 6;
    pub const EXPANSION_WORD: Ticks = 24;
    pub const IO_REG: Ticks = 3;
    pub const CDROM_REG: Ticks = 6;
    pub const SPU_REG: Ticks = 18;
    pub const POST_REG: Ticks = 12;
}

const RAM_SIZE: usize = 2 * 1024 * 1024;
const RAM_END: u32 = RAM_SIZE as u32;

const BIOS_SIZE: usize = 512 * 1024;
const BIOS_START: u32 = 0x1FC0_0000;
const BIOS_END: u32 = BIOS_START + BIOS_SIZE as u32;

const SCRATCHPAD_SIZE: usize = 0x400;
const SCRATCHPAD_START: u32 = 0x1F80_0000;
const SCRATCHPAD_END: u32 = SCRATCHPAD_START + SCRATCHPAD_SIZE as u32;

/// Memory bus and device aggregate
///
/// Devices hang off the bus so register dispatch can split borrows
/// between a device, the scheduler and the interrupt controller without
/// retained cross-references.
pub struct Bus {
    ram: Vec<u8>,
    bios: Vec<u8>,
    scratchpad: [u8; SCRATCHPAD_SIZE],

    /// Global event scheduler (virtual time)
    pub scheduler: Scheduler,
    /// Interrupt aggregator
    pub intc: InterruptController,
    /// Graphics processor
    pub gpu: Gpu,
    /// Sound processor
    pub spu: Spu,
    /// CD-ROM front-end
    pub cdrom: Cdrom,
    /// DMA controller
    pub dma: Dma,
    /// Timer block
    pub timers: Timers,
    /// Serial pad I/O
    pub sio: Sio,

    /// Recompiler block table, invalidated on RAM writes
    block_cache: Rc<RefCell<BlockCache>>,

    /// Line-buffered TTY output (expansion-2 debug port)
    tty: String,
}

impl Bus {
    /// Create a bus with zeroed memory and reset devices
    pub fn new() -> Self {
        Self {
            ram: vec![0u8; RAM_SIZE],
            bios: vec![0u8; BIOS_SIZE],
            scratchpad: [0u8; SCRATCHPAD_SIZE],
            scheduler: Scheduler::new(),
            intc: InterruptController::new(),
            gpu: Gpu::new(),
            spu: Spu::new(),
            cdrom: Cdrom::new(),
            dma: Dma::new(),
            timers: Timers::new(),
            sio: Sio::new(),
            block_cache: Rc::new(RefCell::new(BlockCache::new())),
            tty: String::new(),
        }
    }

    /// Reset devices; RAM and scratchpad are cleared, BIOS persists
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.scratchpad.fill(0);
        self.intc.reset();
        self.gpu.reset();
        self.spu.reset();
        self.cdrom.reset();
        self.dma.reset();
        self.timers.reset();
        self.sio.reset();
        self.tty.clear();
    }

    /// Handle to the recompiler block table shared with the CPU side
    pub fn block_cache(&self) -> Rc<RefCell<BlockCache>> {
        self.block_cache.clone()
    }

    /// Load a 512 KiB BIOS image
    pub fn load_bios(&mut self, path: &str) -> Result<()> {
        let mut file = File::open(path).map_err(|e| EmulatorError::BiosError {
            message: format!("unable to open {}: {}", path, e),
        })?;

        let metadata = file.metadata()?;
        if metadata.len() != BIOS_SIZE as u64 {
            return Err(EmulatorError::InvalidBiosSize {
                expected: BIOS_SIZE,
                got: metadata.len() as usize,
            });
        }

        file.read_exact(&mut self.bios)?;
        Ok(())
    }

    /// Charge ticks to the scheduler
    #[inline]
    pub fn tick(&mut self, ticks: Ticks) {
        self.scheduler.tick(ticks);
    }

    /// Advance the timer block by executed CPU cycles
    pub fn advance_timers(&mut self, cycles: Ticks) {
        self.timers.advance(cycles, &mut self.intc);
    }

    pub(crate) fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub(crate) fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    #[cfg(test)]
    pub(crate) fn bios_mut(&mut self) -> &mut [u8] {
        &mut self.bios
    }

    #[inline]
    fn ram_read32(&self, addr: u32) -> u32 {
        let offset = (addr as usize) & (RAM_SIZE - 1) & !0x3;
        u32::from_le_bytes(self.ram[offset..offset + 4].try_into().unwrap())
    }

    /// Instruction fetch path
    pub fn read_code(&mut self, addr: u32) -> Result<u32> {
        if addr < RAM_END {
            self.tick(latency::RAM);
            return Ok(self.ram_read32(addr));
        }

        if (BIOS_START..BIOS_END).contains(&addr) {
            let offset = ((addr - BIOS_START) as usize) & !0x3;
            self.tick(latency::BIOS_WORD);
            return Ok(u32::from_le_bytes(
                self.bios[offset..offset + 4].try_into().unwrap(),
            ));
        }

        Err(EmulatorError::InvalidAddress { address: addr })
    }

    /// Cache line fill: four consecutive words in one access
    pub fn burst_fill(&mut self, addr: u32) -> Result<[u32; 4]> {
        let addr = addr & !0xF;

        if addr < RAM_END {
            self.tick(latency::RAM_BURST);
            return Ok([
                self.ram_read32(addr),
                self.ram_read32(addr + 4),
                self.ram_read32(addr + 8),
                self.ram_read32(addr + 12),
            ]);
        }

        if (BIOS_START..BIOS_END).contains(&addr) {
            self.tick(latency::BIOS_BURST);
            let offset = (addr - BIOS_START) as usize;
            let word = |o: usize| u32::from_le_bytes(self.bios[o..o + 4].try_into().unwrap());
            return Ok([
                word(offset),
                word(offset + 4),
                word(offset + 8),
                word(offset + 12),
            ]);
        }

        Err(EmulatorError::InvalidAddress { address: addr })
    }

    /// Read 8-bit value from a physical address
    pub fn read8(&mut self, addr: u32) -> Result<u8> {
        if addr < RAM_END {
            self.tick(latency::RAM);
            return Ok(self.ram[addr as usize]);
        }

        if (BIOS_START..BIOS_END).contains(&addr) {
            self.tick(latency::BIOS_BYTE);
            return Ok(self.bios[(addr - BIOS_START) as usize]);
        }

        if (SCRATCHPAD_START..SCRATCHPAD_END).contains(&addr) {
            return Ok(self.scratchpad[(addr - SCRATCHPAD_START) as usize]);
        }

        if (0x1F00_0000..0x1F80_0000).contains(&addr) {
            self.tick(latency::EXPANSION_BYTE);
            return Ok(0);
        }

        if addr == 0x1F80_1040 {
            self.tick(latency::IO_REG);
            return Ok(self.sio.read_rx());
        }

        if (0x1F80_1800..0x1F80_1804).contains(&addr) {
            self.tick(latency::CDROM_REG);
            return self.cdrom.read8(addr);
        }

        if addr == 0x1F80_2021 {
            self.tick(latency::POST_REG);
            return Ok(0x0C);
        }

        Err(EmulatorError::InvalidAddress { address: addr })
    }

    /// Read 16-bit value from a physical address
    pub fn read16(&mut self, addr: u32) -> Result<u16> {
        if addr < RAM_END {
            self.tick(latency::RAM);
            let offset = (addr as usize) & !0x1;
            return Ok(u16::from_le_bytes(
                self.ram[offset..offset + 2].try_into().unwrap(),
            ));
        }

        if (BIOS_START..BIOS_END).contains(&addr) {
            self.tick(latency::BIOS_HALF);
            let offset = ((addr - BIOS_START) as usize) & !0x1;
            return Ok(u16::from_le_bytes(
                self.bios[offset..offset + 2].try_into().unwrap(),
            ));
        }

        if (SCRATCHPAD_START..SCRATCHPAD_END).contains(&addr) {
            let offset = ((addr - SCRATCHPAD_START) as usize) & !0x1;
            return Ok(u16::from_le_bytes(
                self.scratchpad[offset..offset + 2].try_into().unwrap(),
            ));
        }

        match addr {
            0x1F80_1044 => {
                self.tick(latency::IO_REG);
                Ok(self.sio.read_status())
            }
            0x1F80_104A => {
                self.tick(latency::IO_REG);
                Ok(self.sio.read_control())
            }
            0x1F80_104E => {
                self.tick(latency::IO_REG);
                Ok(self.sio.read_baudrate())
            }
            0x1F80_1070 => {
                self.tick(latency::IO_REG);
                Ok(self.intc.read_status() as u16)
            }
            0x1F80_1074 => {
                self.tick(latency::IO_REG);
                Ok(self.intc.read_mask() as u16)
            }
            0x1F80_1100..=0x1F80_112F => {
                self.tick(latency::IO_REG);
                self.timers.read16(addr)
            }
            0x1F80_1C00..=0x1F80_1FFF => {
                self.tick(latency::SPU_REG);
                self.spu.read16(addr)
            }
            _ => Err(EmulatorError::InvalidAddress { address: addr }),
        }
    }

    /// Read 32-bit value from a physical address
    pub fn read32(&mut self, addr: u32) -> Result<u32> {
        if addr < RAM_END {
            self.tick(latency::RAM);
            return Ok(self.ram_read32(addr));
        }

        if (BIOS_START..BIOS_END).contains(&addr) {
            self.tick(latency::BIOS_WORD);
            let offset = ((addr - BIOS_START) as usize) & !0x3;
            return Ok(u32::from_le_bytes(
                self.bios[offset..offset + 4].try_into().unwrap(),
            ));
        }

        if (SCRATCHPAD_START..SCRATCHPAD_END).contains(&addr) {
            let offset = ((addr - SCRATCHPAD_START) as usize) & !0x3;
            return Ok(u32::from_le_bytes(
                self.scratchpad[offset..offset + 4].try_into().unwrap(),
            ));
        }

        if (0x1F00_0000..0x1F80_0000).contains(&addr) {
            self.tick(latency::EXPANSION_WORD);
            return Ok(0);
        }

        match addr {
            // SPU/expansion delay configuration reads back as zero
            0x1F80_1014 => Ok(0),
            // RAM size register
            0x1F80_1060 => Ok(0),
            0x1F80_1070 => {
                self.tick(latency::IO_REG);
                Ok(self.intc.read_status())
            }
            0x1F80_1074 => {
                self.tick(latency::IO_REG);
                Ok(self.intc.read_mask())
            }
            0x1F80_1080..=0x1F80_10FF => {
                self.tick(latency::IO_REG);
                self.dma.read32(addr)
            }
            0x1F80_1100..=0x1F80_112F => {
                self.tick(latency::IO_REG);
                Ok(self.timers.read16(addr)? as u32)
            }
            0x1F80_1810 => {
                self.tick(latency::IO_REG);
                Ok(self.gpu.gpu_read())
            }
            0x1F80_1814 => {
                self.tick(latency::IO_REG);
                Ok(self.gpu.gpustat())
            }
            0x1F80_1824 => {
                self.tick(latency::IO_REG);
                log::warn!("read from unimplemented mdec control register");
                Ok(0)
            }
            _ => Err(EmulatorError::InvalidAddress { address: addr }),
        }
    }

    /// Write 8-bit value to a physical address
    pub fn write8(&mut self, addr: u32, data: u8) -> Result<()> {
        if addr < RAM_END {
            self.ram[addr as usize] = data;
            self.block_cache.borrow_mut().invalidate_address(addr);
            return Ok(());
        }

        if (SCRATCHPAD_START..SCRATCHPAD_END).contains(&addr) {
            self.scratchpad[(addr - SCRATCHPAD_START) as usize] = data;
            return Ok(());
        }

        if addr == 0x1F80_1040 {
            let Self { sio, scheduler, .. } = self;
            return sio.write_tx(scheduler, data);
        }

        if (0x1F80_1800..0x1F80_1804).contains(&addr) {
            let Self {
                cdrom, scheduler, ..
            } = self;
            return cdrom.write8(scheduler, addr, data);
        }

        if addr == 0x1F80_2023 {
            self.write_tty(data);
            return Ok(());
        }

        // Expansion 2 (debug hardware): accepted, no effect
        if (0x1F80_2000..0x1F80_4000).contains(&addr) {
            return Ok(());
        }

        Err(EmulatorError::InvalidAddress { address: addr })
    }

    /// Write 16-bit value to a physical address
    pub fn write16(&mut self, addr: u32, data: u16) -> Result<()> {
        if addr < RAM_END {
            let offset = (addr as usize) & !0x1;
            self.ram[offset..offset + 2].copy_from_slice(&data.to_le_bytes());
            self.block_cache.borrow_mut().invalidate_address(addr);
            return Ok(());
        }

        if (SCRATCHPAD_START..SCRATCHPAD_END).contains(&addr) {
            let offset = ((addr - SCRATCHPAD_START) as usize) & !0x1;
            self.scratchpad[offset..offset + 2].copy_from_slice(&data.to_le_bytes());
            return Ok(());
        }

        match addr {
            0x1F80_1048 => {
                self.sio.write_mode(data);
                Ok(())
            }
            0x1F80_104A => {
                self.sio.write_control(data);
                Ok(())
            }
            0x1F80_104E => {
                self.sio.write_baudrate(data);
                Ok(())
            }
            0x1F80_1070 => {
                self.intc.write_status(data as u32);
                Ok(())
            }
            0x1F80_1074 => {
                self.intc.write_mask(data as u32);
                Ok(())
            }
            0x1F80_1100..=0x1F80_112F => self.timers.write16(addr, data),
            0x1F80_1C00..=0x1F80_1FFF => self.spu.write16(addr, data),
            _ => Err(EmulatorError::InvalidAddress { address: addr }),
        }
    }

    /// Write 32-bit value to a physical address
    pub fn write32(&mut self, addr: u32, data: u32) -> Result<()> {
        if addr < RAM_END {
            let offset = (addr as usize) & !0x3;
            self.ram[offset..offset + 4].copy_from_slice(&data.to_le_bytes());
            self.block_cache.borrow_mut().invalidate_address(addr);
            return Ok(());
        }

        if (SCRATCHPAD_START..SCRATCHPAD_END).contains(&addr) {
            let offset = ((addr - SCRATCHPAD_START) as usize) & !0x3;
            self.scratchpad[offset..offset + 4].copy_from_slice(&data.to_le_bytes());
            return Ok(());
        }

        match addr {
            // Memory control: expansion base/delay registers, accepted
            0x1F80_1000..=0x1F80_1023 => Ok(()),
            // RAM size register
            0x1F80_1060 => Ok(()),
            0x1F80_1070 => {
                self.intc.write_status(data);
                Ok(())
            }
            0x1F80_1074 => {
                self.intc.write_mask(data);
                Ok(())
            }
            0x1F80_1080..=0x1F80_10FF => {
                if let Some(channel) = self.dma.write32(addr, data)? {
                    dma::run_transfer(self, channel)?;
                    self.dma.complete_transfer(channel);
                }

                // A DICR write can raise the line with no transfer at all
                if self.dma.take_irq_edge() {
                    self.intc.assert_irq(crate::core::interrupt::Interrupt::Dma);
                }
                Ok(())
            }
            0x1F80_1100..=0x1F80_112F => self.timers.write16(addr, data as u16),
            0x1F80_1810 => self.gpu.gp0(data),
            0x1F80_1814 => self.gpu.gp1(data),
            0x1F80_1820 => {
                log::warn!("write to unimplemented mdec command register");
                Ok(())
            }
            0x1F80_1824 => {
                log::warn!("write to unimplemented mdec control register");
                Ok(())
            }
            // Cache control reaches the bus when isolate-cache is clear
            0xFFFE_0130 => Ok(()),
            _ => Err(EmulatorError::InvalidAddress { address: addr }),
        }
    }

    /// Collect expansion-2 TTY bytes and log complete lines
    fn write_tty(&mut self, data: u8) {
        match data {
            b'\r' => {}
            b'\n' => {
                if !self.tty.is_empty() {
                    log::debug!("tty: {}", self.tty);
                    self.tty.clear();
                }
            }
            _ => self.tty.push(data as char),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
