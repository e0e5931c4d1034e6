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

//! DMA controller
//!
//! Seven channels, each with a base address (MADR), block size/count
//! (BCR) and control register (CHCR). Writing CHCR with the enable bit
//! plus either the start bit or a non-manual sync mode kicks the
//! transfer, which runs synchronously with respect to the CPU; each
//! moved word charges its bus latency, which stands in for the lump-sum
//! timing model. Three sync modes exist: manual (one burst of BCR.size
//! words), block (size x count words) and linked-list (GPU only).
//!
//! DICR carries a force bit, per-channel enable and flag bits and a
//! master enable; the aggregated IRQ asserts the DMA interrupt on its
//! rising edge. The OTC channel has fixed behavior: it walks backward
//! from MADR writing linked-list terminators, closing with 0xFFFFFF.

use crate::core::error::{EmulatorError, Result};
use crate::core::memory::Bus;

/// DMA channels in register order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    MdecIn = 0,
    MdecOut = 1,
    Gpu = 2,
    Cdrom = 3,
    Spu = 4,
    Pio = 5,
    Otc = 6,
}

/// CHCR sync modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncMode {
    Manual,
    Block,
    LinkedList,
    Reserved,
}

/// One channel's register file (accessor pairs over raw words)
#[derive(Debug, Default, Clone, Copy)]
struct ChannelRegs {
    madr: u32,
    bcr: u32,
    chcr: u32,
}

impl ChannelRegs {
    #[inline]
    fn address(self) -> u32 {
        self.madr & 0x00FF_FFFF
    }

    #[inline]
    fn block_size(self) -> u32 {
        self.bcr & 0xFFFF
    }

    #[inline]
    fn block_count(self) -> u32 {
        self.bcr >> 16
    }

    #[inline]
    fn from_ram(self) -> bool {
        self.chcr & 0x1 != 0
    }

    #[inline]
    fn backward(self) -> bool {
        self.chcr & 0x2 != 0
    }

    #[inline]
    fn sync_mode(self) -> SyncMode {
        match (self.chcr >> 9) & 0x3 {
            0 => SyncMode::Manual,
            1 => SyncMode::Block,
            2 => SyncMode::LinkedList,
            _ => SyncMode::Reserved,
        }
    }

    #[inline]
    fn enabled(self) -> bool {
        self.chcr & (1 << 24) != 0
    }

    #[inline]
    fn started(self) -> bool {
        self.chcr & (1 << 28) != 0
    }
}

/// DMA controller register block
#[derive(Debug)]
pub struct Dma {
    channels: [ChannelRegs; 7],

    /// DPCR: channel priority/enable control
    dpcr: u32,

    /// DICR: interrupt control
    dicr: u32,

    /// Undelivered rising edge of the aggregated IRQ
    irq_edge: bool,
}

impl Dma {
    pub fn new() -> Self {
        Self {
            channels: [ChannelRegs::default(); 7],
            dpcr: 0x0765_4321,
            dicr: 0,
            irq_edge: false,
        }
    }

    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.chcr = 0;
        }
        self.dpcr = 0x0765_4321;
        self.dicr = 0;
        self.irq_edge = false;
    }

    fn channel_from_addr(addr: u32) -> Channel {
        match (addr >> 4) & 0x7 {
            0 => Channel::MdecIn,
            1 => Channel::MdecOut,
            2 => Channel::Gpu,
            3 => Channel::Cdrom,
            4 => Channel::Spu,
            5 => Channel::Pio,
            _ => Channel::Otc,
        }
    }

    /// Register read
    pub fn read32(&self, addr: u32) -> Result<u32> {
        match addr {
            0x1F80_10F0 => return Ok(self.dpcr),
            0x1F80_10F4 => return Ok(self.dicr),
            _ => {}
        }

        let channel = &self.channels[Self::channel_from_addr(addr) as usize];

        match addr & 0xF {
            0x0 => Ok(channel.madr),
            0x4 => Ok(channel.bcr),
            0x8 => Ok(channel.chcr),
            _ => Err(EmulatorError::UnknownRegister {
                unit: "dma",
                address: addr,
            }),
        }
    }

    /// Register write
    ///
    /// Returns the channel to run when the write activates a transfer;
    /// the bus performs it and then calls [`Dma::complete_transfer`].
    pub fn write32(&mut self, addr: u32, data: u32) -> Result<Option<Channel>> {
        match addr {
            0x1F80_10F0 => {
                self.dpcr = data;
                return Ok(None);
            }
            0x1F80_10F4 => {
                // Flag bits are write-1-to-clear; control bits latch.
                // The aggregated IRQ re-evaluates immediately: a force
                // or unmask write can raise it without any transfer
                self.dicr &= 0xFF00_0000;
                self.dicr &= !(data & 0x7F00_0000);
                self.dicr |= data & 0x00FF_803F;
                self.update_irq();
                return Ok(None);
            }
            _ => {}
        }

        let index = Self::channel_from_addr(addr);
        let channel = &mut self.channels[index as usize];

        match addr & 0xF {
            0x0 => {
                channel.madr = data & 0x00FF_FFFF;
                Ok(None)
            }
            0x4 => {
                channel.bcr = data;
                Ok(None)
            }
            0x8 => {
                if index == Channel::Otc {
                    // OTC ignores most control bits and always runs backward
                    channel.chcr = (data & 0x5100_0000) | 0x2;
                } else {
                    channel.chcr = data & 0x7177_0703;
                }

                let activate = channel.enabled()
                    && (channel.started() || channel.sync_mode() != SyncMode::Manual);

                Ok(activate.then_some(index))
            }
            _ => Err(EmulatorError::UnknownRegister {
                unit: "dma",
                address: addr,
            }),
        }
    }

    /// Post-transfer bookkeeping: latch the channel's interrupt flag,
    /// clear the enable/start bits and re-evaluate the master IRQ.
    ///
    /// Returns true on the rising edge of the aggregated interrupt.
    pub fn complete_transfer(&mut self, index: Channel) -> bool {
        let mut rising = false;

        if self.dicr & (1 << (16 + index as u32)) != 0 {
            self.dicr |= 1 << (24 + index as u32);
            rising = self.update_irq();
        }

        self.channels[index as usize].chcr &= !0x1100_0000;
        rising
    }

    /// Take the undelivered rising edge, if any
    ///
    /// The bus drains this after every DMA register write so a DICR
    /// write that raises the line reaches the interrupt controller.
    pub fn take_irq_edge(&mut self) -> bool {
        std::mem::take(&mut self.irq_edge)
    }

    /// Recompute DICR bit 31; returns true on a rising edge
    fn update_irq(&mut self) -> bool {
        let old = self.dicr & (1 << 31) != 0;

        let force = self.dicr & (1 << 15) != 0;
        let master = self.dicr & (1 << 23) != 0;
        let enable = (self.dicr >> 16) & 0x7F;
        let flags = (self.dicr >> 24) & 0x7F;

        let irq = force || (master && (enable & flags) != 0);
        if irq {
            self.dicr |= 1 << 31;
        } else {
            self.dicr &= !(1 << 31);
        }

        let rising = !old && irq;
        self.irq_edge |= rising;
        rising
    }
}

impl Default for Dma {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute an activated channel against the bus
///
/// Runs in one burst; the per-word bus charges provide the lump-sum
/// timing. Unsupported direction/mode combinations are fatal.
pub fn run_transfer(bus: &mut Bus, index: Channel) -> Result<()> {
    let channel = bus.dma.channels[index as usize];

    match index {
        Channel::Gpu => run_gpu(bus, channel),
        Channel::Cdrom => run_cdrom(bus, channel),
        Channel::Spu => run_spu(bus, channel),
        Channel::Otc => run_otc(bus, channel),
        Channel::MdecIn => {
            log::warn!("mdec-in dma transfer ignored");
            Ok(())
        }
        _ => Err(EmulatorError::Internal {
            message: format!("unsupported dma channel {:?}", index),
        }),
    }
}

fn run_gpu(bus: &mut Bus, channel: ChannelRegs) -> Result<()> {
    let mut addr = channel.address();

    if channel.sync_mode() == SyncMode::Block {
        let mut words = channel.block_size() * channel.block_count();
        let step = if channel.backward() { (-4i32) as u32 } else { 4 };

        while words != 0 {
            if channel.from_ram() {
                let data = bus.read32(addr & 0x1F_FFFC)?;
                bus.gpu.gp0(data)?;
            } else {
                let data = bus.gpu.gpu_read();
                bus.write32(addr & 0x1F_FFFC, data)?;
            }

            addr = addr.wrapping_add(step);
            words -= 1;
        }

        return Ok(());
    }

    if !channel.from_ram() {
        return Err(EmulatorError::Internal {
            message: "gpu linked-list dma towards ram".into(),
        });
    }

    if channel.sync_mode() != SyncMode::LinkedList {
        return Err(EmulatorError::Internal {
            message: "gpu dma in manual sync mode".into(),
        });
    }

    // Linked list: each node is a header with a word count in [31:24]
    // and the next node in [23:0]; bit 23 of the pointer ends the list
    loop {
        let header = bus.read32(addr & 0x1F_FFFC)?;
        let mut count = header >> 24;

        while count != 0 {
            addr = addr.wrapping_add(4);

            let data = bus.read32(addr & 0x1F_FFFC)?;
            bus.gpu.gp0(data)?;

            count -= 1;
        }

        if header & 0x80_0000 != 0 {
            break;
        }

        addr = header & 0xFF_FFFF;
    }

    Ok(())
}

fn run_cdrom(bus: &mut Bus, channel: ChannelRegs) -> Result<()> {
    if channel.from_ram() {
        return Err(EmulatorError::Internal {
            message: "cdrom dma from ram".into(),
        });
    }

    if channel.sync_mode() != SyncMode::Manual {
        return Err(EmulatorError::Internal {
            message: "cdrom dma in non-manual sync mode".into(),
        });
    }

    let mut addr = channel.address();
    let step = if channel.backward() { (-4i32) as u32 } else { 4 };
    let mut words = channel.block_size();

    while words != 0 {
        let data = bus.cdrom.read_dma()?;
        bus.write32(addr, data)?;

        addr = addr.wrapping_add(step) & 0xFF_FFFF;
        words -= 1;
    }

    Ok(())
}

fn run_spu(bus: &mut Bus, channel: ChannelRegs) -> Result<()> {
    if !channel.from_ram() {
        return Err(EmulatorError::Internal {
            message: "spu dma towards ram".into(),
        });
    }

    if channel.sync_mode() != SyncMode::Block {
        return Err(EmulatorError::Internal {
            message: "spu dma in non-block sync mode".into(),
        });
    }

    let mut addr = channel.address();
    let step = if channel.backward() { (-4i32) as u32 } else { 4 };
    let mut words = channel.block_size() * channel.block_count();

    while words != 0 {
        let data = bus.read32(addr & 0x1F_FFFC)?;
        bus.spu.write_dma(data);

        addr = addr.wrapping_add(step);
        words -= 1;
    }

    Ok(())
}

/// Ordering-table clear: build a backward-linked empty list
fn run_otc(bus: &mut Bus, channel: ChannelRegs) -> Result<()> {
    let mut addr = channel.address();
    let mut words = channel.block_size();

    while words != 0 {
        if words == 1 {
            bus.write32(addr, 0xFF_FFFF)?;
        } else {
            bus.write32(addr, addr.wrapping_sub(4) & 0xFF_FFFF)?;
            addr = addr.wrapping_sub(4) & 0xFF_FFFF;
        }

        words -= 1;
    }

    Ok(())
}
