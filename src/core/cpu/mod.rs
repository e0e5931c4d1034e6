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

//! CPU (MIPS R3000A) emulation
//!
//! Architectural state, the fetch pipeline with its branch-delay model,
//! exception entry, the instruction cache, and the two execution paths:
//! the interpreter ([`Cpu::step`]) and the block recompiler
//! ([`Cpu::run_block`]). Both produce identical architectural state for
//! the supported instruction set.
//!
//! # Specifications
//! - Architecture: MIPS I (32-bit)
//! - Clock frequency: 33.8688 MHz
//! - Registers: 32 GPRs (r0 hardwired to zero), HI/LO, PC chain
//!
//! # Example
//! ```
//! use ember_core::core::cpu::Cpu;
//!
//! let mut cpu = Cpu::new();
//! cpu.reset();
//! assert_eq!(cpu.reg(0), 0); // r0 is always 0
//! assert_eq!(cpu.pc(), 0xBFC0_0000);
//! ```

pub mod cop0;
pub mod decode;
pub mod disassembler;
pub mod icache;
pub mod instructions;
pub mod recompiler;

use crate::core::error::Result;
use crate::core::gte::Gte;
use crate::core::memory::Bus;
use cop0::{Cause, Status};
use icache::ICache;
use recompiler::Recompiler;

/// BIOS entry point after reset
const RESET_VECTOR: u32 = 0xBFC0_0000;

/// Hardware register holding the instruction-cache enable latch
const CACHE_CONTROL: u32 = 0xFFFE_0130;

/// Exception causes (COP0 Cause.ExcCode values)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// External interrupt
    Interrupt = 0,
    /// Misaligned or invalid load address
    AddressLoad = 4,
    /// Misaligned or invalid store address
    AddressStore = 5,
    /// SYSCALL instruction
    Syscall = 8,
    /// BREAK instruction
    Breakpoint = 9,
    /// Reserved (illegal) instruction
    ReservedInstruction = 10,
    /// Signed arithmetic overflow
    Overflow = 12,
}

/// CPU architectural state
pub struct Cpu {
    /// General purpose registers; writes keep r0 pinned to zero
    pub(crate) gpr: [u32; 32],

    /// Multiply/divide result registers
    pub(crate) hi: u32,
    pub(crate) lo: u32,

    /// Address of the instruction currently executing
    pub(crate) current_pc: u32,
    /// Address of the next instruction to fetch
    pub(crate) pc: u32,
    /// Address after that (branch targets land here)
    pub(crate) next_pc: u32,

    /// The executing instruction is a branch
    branch: bool,
    /// The executing instruction sits in a branch delay slot
    branch_delay: bool,

    /// COP0 Status (r12)
    pub(crate) status: Status,
    /// COP0 Cause (r13)
    pub(crate) cause: Cause,
    /// COP0 exception PC (r14)
    pub(crate) epc: u32,

    /// Geometry coprocessor
    pub(crate) gte: Gte,

    /// Instruction cache and its enable latch
    icache: ICache,
    cache_enabled: bool,
}

impl Cpu {
    /// Create a CPU in reset state
    pub fn new() -> Self {
        let mut status = Status(0);
        status.0 |= 1 << 22; // BEV: boot vectors in ROM

        Self {
            gpr: [0; 32],
            hi: 0,
            lo: 0,
            current_pc: RESET_VECTOR,
            pc: RESET_VECTOR,
            next_pc: RESET_VECTOR.wrapping_add(4),
            branch: false,
            branch_delay: false,
            status,
            cause: Cause(0),
            epc: 0,
            gte: Gte::new(),
            icache: ICache::new(),
            cache_enabled: false,
        }
    }

    /// Reset to the BIOS entry point
    ///
    /// GTE register contents persist across reset; its flag register and
    /// the instruction cache do not.
    pub fn reset(&mut self) {
        self.pc = RESET_VECTOR;
        self.next_pc = RESET_VECTOR.wrapping_add(4);
        self.current_pc = RESET_VECTOR;

        self.branch = false;
        self.branch_delay = false;

        self.status = Status(1 << 22);
        self.cause = Cause(0);
        self.epc = 0;

        self.gte.reset();

        self.cache_enabled = false;
        self.icache.reset();
    }

    /// Read a general purpose register
    #[inline(always)]
    pub fn reg(&self, index: usize) -> u32 {
        self.gpr[index]
    }

    /// Write a general purpose register (writes to r0 are discarded)
    #[inline(always)]
    pub fn set_reg(&mut self, index: usize, value: u32) {
        self.gpr[index] = value;
        self.gpr[0] = 0;
    }

    /// Current program counter
    #[inline]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Redirect execution (executable side-loading)
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
        self.next_pc = pc.wrapping_add(4);
    }

    /// Drive the external interrupt line into Cause.IP2
    #[inline]
    pub fn assert_interrupt(&mut self, state: bool) {
        self.cause.set_ip2(state);
    }

    /// Whether an unmasked interrupt is pending and interrupts are enabled
    #[inline]
    pub fn interrupt_pending(&self) -> bool {
        self.status.iec() && (self.status.im() & self.cause.ip()) != 0
    }

    /// Virtual to physical address translation
    ///
    /// KUSEG/KSEG0/KSEG1 mask down to 29 bits; KSEG2 is identity.
    #[inline(always)]
    pub fn translate_address(addr: u32) -> u32 {
        const MAP: [u32; 8] = [
            0xFFFF_FFFF,
            0xFFFF_FFFF,
            0xFFFF_FFFF,
            0xFFFF_FFFF,
            0x1FFF_FFFF,
            0x1FFF_FFFF,
            0xFFFF_FFFF,
            0xFFFF_FFFF,
        ];

        addr & MAP[(addr >> 29) as usize]
    }

    /// Execute one instruction on the interpreter path
    ///
    /// Returns the number of instructions retired (always 1); bus
    /// latencies are charged to the scheduler as a side effect.
    pub fn step(&mut self, bus: &mut Bus) -> Result<u32> {
        if self.pc & 0x3 != 0 {
            self.enter_exception(Exception::AddressLoad);
        }

        let i = self.fetch(bus)?;

        if self.interrupt_pending() {
            self.enter_exception(Exception::Interrupt);
            return Ok(1);
        }

        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "0x{:08x}: {}",
                self.current_pc,
                disassembler::disassemble(i, self.current_pc)
            );
        }

        self.execute(bus, i)?;

        self.branch_delay = self.branch;
        self.branch = false;

        Ok(1)
    }

    /// Execute one recompiled block
    ///
    /// Returns the number of guest instructions the block retires. The
    /// interrupt line is sampled once per block entry, so a pending
    /// interrupt redirects the fetch to the exception vector before the
    /// block lookup.
    pub fn run_block(&mut self, recompiler: &mut Recompiler, bus: &mut Bus) -> Result<u32> {
        if self.pc & 0x3 != 0 {
            self.enter_exception(Exception::AddressLoad);
        }

        self.current_pc = self.pc;

        if self.interrupt_pending() {
            self.enter_exception(Exception::Interrupt);
        }

        recompiler.run(self, bus, self.pc)
    }

    /// Fetch the next instruction, advancing the PC chain
    fn fetch(&mut self, bus: &mut Bus) -> Result<u32> {
        self.current_pc = self.pc;
        self.pc = self.next_pc;
        self.next_pc = self.next_pc.wrapping_add(4);

        bus.tick(1);

        if self.cache_enabled && self.current_pc < 0xA000_0000 {
            if !self.icache.hit(self.current_pc) {
                let base = (self.current_pc & 0x7FFF_FFFF) & !0xF;
                let words = bus.burst_fill(base)?;
                self.icache.fill(self.current_pc, words);
            }

            return Ok(self.icache.fetch(self.current_pc));
        }

        bus.read_code(Self::translate_address(self.current_pc))
    }

    /// Take an exception at the currently executing instruction
    pub(crate) fn enter_exception(&mut self, e: Exception) {
        self.enter_exception_at(e, self.current_pc, self.branch_delay);
    }

    /// Take an exception with an explicit EPC and delay-slot flag
    ///
    /// When the faulting instruction sits in a branch delay slot, EPC
    /// points at the branch and Cause.BD is set.
    pub(crate) fn enter_exception_at(&mut self, e: Exception, address: u32, in_delay_slot: bool) {
        self.epc = if in_delay_slot {
            address.wrapping_sub(4)
        } else {
            address
        };

        self.status.push_exception_stack();
        self.cause.set_exception(e as u32, in_delay_slot);

        self.pc = if self.status.bev() {
            0xBFC0_0180
        } else {
            0x8000_0080
        };
        self.next_pc = self.pc.wrapping_add(4);

        self.branch = false;
        self.branch_delay = false;
    }

    /// Record a taken branch; the target becomes live after the delay slot
    #[inline]
    pub(crate) fn branch_to(&mut self, target: u32) {
        self.next_pc = target;
        self.branch = true;
    }

    // Data accesses: isolate-cache stores divert to cache invalidation,
    // the cache-enable latch is intercepted, everything else goes to the
    // bus at its translated physical address.

    pub(crate) fn read_byte(&mut self, bus: &mut Bus, addr: u32) -> Result<u8> {
        if self.status.isc() {
            return Ok(0);
        }

        bus.read8(Self::translate_address(addr))
    }

    pub(crate) fn read_half(&mut self, bus: &mut Bus, addr: u32) -> Result<u16> {
        if self.status.isc() {
            return Ok(0);
        }

        bus.read16(Self::translate_address(addr))
    }

    pub(crate) fn read_word(&mut self, bus: &mut Bus, addr: u32) -> Result<u32> {
        if self.status.isc() {
            return Ok(0);
        }

        bus.read32(Self::translate_address(addr))
    }

    pub(crate) fn write_byte(&mut self, bus: &mut Bus, addr: u32, data: u8) -> Result<()> {
        if self.status.isc() {
            self.icache.invalidate(addr);
            return Ok(());
        }

        bus.write8(Self::translate_address(addr), data)
    }

    pub(crate) fn write_half(&mut self, bus: &mut Bus, addr: u32, data: u16) -> Result<()> {
        if self.status.isc() {
            self.icache.invalidate(addr);
            return Ok(());
        }

        bus.write16(Self::translate_address(addr), data)
    }

    pub(crate) fn write_word(&mut self, bus: &mut Bus, addr: u32, data: u32) -> Result<()> {
        if self.status.isc() {
            self.icache.invalidate(addr);
            return Ok(());
        }

        if addr == CACHE_CONTROL {
            self.cache_enabled = (data & 0x800) != 0;
            return Ok(());
        }

        bus.write32(Self::translate_address(addr), data)
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
