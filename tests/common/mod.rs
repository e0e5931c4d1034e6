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

//! Shared fixtures for the integration tests: a tiny MIPS assembler for
//! the handful of encodings the scenarios need, plus execution harnesses
//! for the interpreter and recompiler paths.

use ember_core::core::cpu::recompiler::Recompiler;
use ember_core::core::cpu::Cpu;
use ember_core::core::memory::Bus;

/// Hand assembler for the opcodes the test programs use
pub mod asm {
    pub fn lui(rt: u32, imm: u32) -> u32 {
        (0x0F << 26) | (rt << 16) | (imm & 0xFFFF)
    }

    pub fn addiu(rt: u32, rs: u32, imm: i32) -> u32 {
        (0x09 << 26) | (rs << 21) | (rt << 16) | (imm as u32 & 0xFFFF)
    }

    pub fn addi(rt: u32, rs: u32, imm: i32) -> u32 {
        (0x08 << 26) | (rs << 21) | (rt << 16) | (imm as u32 & 0xFFFF)
    }

    pub fn ori(rt: u32, rs: u32, imm: u32) -> u32 {
        (0x0D << 26) | (rs << 21) | (rt << 16) | (imm & 0xFFFF)
    }

    pub fn sll(rd: u32, rt: u32, sa: u32) -> u32 {
        (rt << 16) | (rd << 11) | (sa << 6)
    }

    pub fn add(rd: u32, rs: u32, rt: u32) -> u32 {
        (rs << 21) | (rt << 16) | (rd << 11) | 0x20
    }

    pub fn addu(rd: u32, rs: u32, rt: u32) -> u32 {
        (rs << 21) | (rt << 16) | (rd << 11) | 0x21
    }

    pub fn beq(rs: u32, rt: u32, offset: i32) -> u32 {
        (0x04 << 26) | (rs << 21) | (rt << 16) | (offset as u32 & 0xFFFF)
    }

    pub fn jr(rs: u32) -> u32 {
        (rs << 21) | 0x08
    }

    pub fn sw(rt: u32, rs: u32, imm: i32) -> u32 {
        (0x2B << 26) | (rs << 21) | (rt << 16) | (imm as u32 & 0xFFFF)
    }

    pub fn lw(rt: u32, rs: u32, imm: i32) -> u32 {
        (0x23 << 26) | (rs << 21) | (rt << 16) | (imm as u32 & 0xFFFF)
    }

    pub fn sb(rt: u32, rs: u32, imm: i32) -> u32 {
        (0x28 << 26) | (rs << 21) | (rt << 16) | (imm as u32 & 0xFFFF)
    }

    pub fn nop() -> u32 {
        0
    }
}

/// A CPU + bus + recompiler bundle with a program in RAM
pub struct Harness {
    pub cpu: Cpu,
    pub bus: Bus,
    pub recompiler: Recompiler,
}

impl Harness {
    /// Install `program` at physical `base` and point the CPU at it
    pub fn new(base: u32, program: &[u32]) -> Self {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        let recompiler = Recompiler::new(bus.block_cache());

        for (n, &word) in program.iter().enumerate() {
            bus.write32(base + n as u32 * 4, word).unwrap();
        }

        cpu.set_pc(0x8000_0000 | base);
        cpu.set_reg(31, 0x8000_8000);

        Self {
            cpu,
            bus,
            recompiler,
        }
    }

    /// Interpret until the CPU reaches `stop` (or the step budget ends)
    pub fn interpret_until(&mut self, stop: u32, budget: usize) {
        for _ in 0..budget {
            if self.cpu.pc() == stop {
                return;
            }
            self.cpu.step(&mut self.bus).unwrap();
        }
        panic!("interpreter never reached 0x{:08X}", stop);
    }

    /// Dispatch recompiled blocks until the CPU reaches `stop`
    pub fn recompile_until(&mut self, stop: u32, budget: usize) {
        for _ in 0..budget {
            if self.cpu.pc() == stop {
                return;
            }
            self.cpu
                .run_block(&mut self.recompiler, &mut self.bus)
                .unwrap();
        }
        panic!("recompiler never reached 0x{:08X}", stop);
    }
}
