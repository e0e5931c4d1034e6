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

//! Block recompiler
//!
//! Translates contiguous runs of guest instructions into pre-decoded
//! micro-ops held in a bump-allocated arena, memoized per guest address.
//! A block ends one instruction after the first branch so that control
//! leaves the block with the delay slot committed; exception-class
//! instructions (SYSCALL, BREAK, RFE, illegal encodings) end a block
//! without a delay slot.
//!
//! Two translated regions exist: the low 2 MiB of RAM (writable, so
//! invalidatable) and the BIOS window (read-only, so blocks over it are
//! eternally cacheable). Every RAM block registers itself in a per-4KiB
//! page list; any RAM write invalidates every block on the written page
//! before the next dispatch can reach it. Invalidated blocks stay in the
//! table with their `valid` bit clear and recompile on next dispatch; the
//! arena is never compacted, it is flushed wholesale (together with the
//! whole block table) when exhausted.
//!
//! Translation folds what the fetch address makes constant: branch
//! targets, fallthrough and link addresses, and writes to r0 are dropped
//! at emission. Memory accesses call back into the CPU's access helpers;
//! geometry-coprocessor instructions defer to the interpreter entry
//! points. Per-op guest addresses and delay-slot flags are carried so a
//! trapping op enters the exception path with the architectural EPC.

use std::cell::RefCell;
use std::rc::Rc;

use super::decode::{decode, imm, imm_se, rd, rs, rt, sa, target, OpClass, OpFlags};
use super::{Cpu, Exception};
use crate::core::error::{EmulatorError, Result};
use crate::core::memory::Bus;

const RAM_SIZE: u32 = 2 * 1024 * 1024;
const BIOS_SIZE: u32 = 512 * 1024;
const BIOS_START: u32 = 0x1FC0_0000;

const PAGE_SHIFT: u32 = 12;
const PAGE_COUNT: usize = (RAM_SIZE >> PAGE_SHIFT) as usize;

/// One entry per potential block start in RAM + BIOS
const BLOCK_TABLE_LEN: usize = ((RAM_SIZE + BIOS_SIZE) >> 2) as usize;

/// Arena capacity in micro-ops (the code-buffer analog)
const ARENA_CAPACITY: usize = 1 << 20;

/// Blocks are cut here even without a branch; a PC flush op keeps the
/// architectural state consistent at the seam
const MAX_BLOCK_INSTRUCTIONS: usize = 1024;

/// A translated block: an arena range plus its guest extent
#[derive(Debug, Clone, Copy, Default)]
struct Block {
    /// First micro-op in the arena
    entry: u32,
    /// Number of emitted micro-ops
    host_len: u32,
    /// Physical guest start address
    guest_address: u32,
    /// Guest instructions retired per execution
    guest_instructions: u32,
    valid: bool,
}

/// Pre-decoded micro-op kinds
///
/// Register numbers, immediates, branch targets and link values are
/// extracted or computed at translation time.
#[derive(Debug, Clone, Copy)]
enum OpKind {
    Sll { rt: u8, rd: u8, sa: u8 },
    Srl { rt: u8, rd: u8, sa: u8 },
    Sra { rt: u8, rd: u8, sa: u8 },
    Sllv { rs: u8, rt: u8, rd: u8 },
    Srlv { rs: u8, rt: u8, rd: u8 },
    Srav { rs: u8, rt: u8, rd: u8 },
    Jr { rs: u8 },
    Jalr { rs: u8, rd: u8, link: u32 },
    Syscall,
    Break,
    Illegal,
    Mfhi { rd: u8 },
    Mthi { rs: u8 },
    Mflo { rd: u8 },
    Mtlo { rs: u8 },
    Mult { rs: u8, rt: u8 },
    Multu { rs: u8, rt: u8 },
    Div { rs: u8, rt: u8 },
    Divu { rs: u8, rt: u8 },
    Add { rs: u8, rt: u8, rd: u8 },
    Addu { rs: u8, rt: u8, rd: u8 },
    Sub { rs: u8, rt: u8, rd: u8 },
    Subu { rs: u8, rt: u8, rd: u8 },
    And { rs: u8, rt: u8, rd: u8 },
    Or { rs: u8, rt: u8, rd: u8 },
    Xor { rs: u8, rt: u8, rd: u8 },
    Nor { rs: u8, rt: u8, rd: u8 },
    Slt { rs: u8, rt: u8, rd: u8 },
    Sltu { rs: u8, rt: u8, rd: u8 },
    Bcond { rs: u8, bgez: bool, link: bool, target: u32, fallthrough: u32 },
    Jump { target: u32 },
    JumpLink { target: u32, link: u32 },
    Beq { rs: u8, rt: u8, target: u32, fallthrough: u32 },
    Bne { rs: u8, rt: u8, target: u32, fallthrough: u32 },
    Blez { rs: u8, target: u32, fallthrough: u32 },
    Bgtz { rs: u8, target: u32, fallthrough: u32 },
    Addi { rs: u8, rt: u8, imm: u32 },
    Addiu { rs: u8, rt: u8, imm: u32 },
    Slti { rs: u8, rt: u8, imm: i32 },
    Sltiu { rs: u8, rt: u8, imm: u32 },
    Andi { rs: u8, rt: u8, imm: u32 },
    Ori { rs: u8, rt: u8, imm: u32 },
    Xori { rs: u8, rt: u8, imm: u32 },
    Lui { rt: u8, imm: u32 },
    Mfc0 { rt: u8, rd: u8 },
    Mtc0 { rt: u8, rd: u8 },
    Rfe,
    Lb { rs: u8, rt: u8, imm: u32 },
    Lbu { rs: u8, rt: u8, imm: u32 },
    Lh { rs: u8, rt: u8, imm: u32 },
    Lhu { rs: u8, rt: u8, imm: u32 },
    Lw { rs: u8, rt: u8, imm: u32 },
    Lwl { rs: u8, rt: u8, imm: u32 },
    Lwr { rs: u8, rt: u8, imm: u32 },
    Sb { rs: u8, rt: u8, imm: u32 },
    Sh { rs: u8, rt: u8, imm: u32 },
    Sw { rs: u8, rt: u8, imm: u32 },
    Swl { rs: u8, rt: u8, imm: u32 },
    Swr { rs: u8, rt: u8, imm: u32 },
    Mfc2 { raw: u32 },
    Cfc2 { raw: u32 },
    Mtc2 { raw: u32 },
    Ctc2 { raw: u32 },
    Cop2Cmd { raw: u32 },
    Lwc2 { raw: u32 },
    Swc2 { raw: u32 },
    /// Seam between force-split blocks: restore the architectural PC
    FlushPc { pc: u32 },
}

/// One arena entry: the op plus the guest context traps need
#[derive(Debug, Clone, Copy)]
struct BlockOp {
    kind: OpKind,
    address: u32,
    delay_slot: bool,
}

/// Block table and per-page back-references
///
/// Shared between the recompiler (which fills it) and the bus (which
/// invalidates through it on RAM writes).
pub struct BlockCache {
    blocks: Vec<Block>,
    pages: Vec<Vec<u32>>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::default(); BLOCK_TABLE_LEN],
            pages: vec![Vec::new(); PAGE_COUNT],
        }
    }

    /// Invalidate every block covering the written RAM address
    ///
    /// Called from the bus on each RAM store. Pages with no blocks are a
    /// single empty-check.
    pub fn invalidate_address(&mut self, addr: u32) {
        debug_assert!(addr < RAM_SIZE);

        let page = (addr >> PAGE_SHIFT) as usize;
        if self.pages[page].is_empty() {
            return;
        }

        let list = std::mem::take(&mut self.pages[page]);
        for index in list {
            self.invalidate_block(index);
        }
    }

    fn invalidate_block(&mut self, index: u32) {
        let block = &mut self.blocks[index as usize];
        block.valid = false;

        let start = block.guest_address >> PAGE_SHIFT;
        let end = (block.guest_address + block.guest_instructions * 4 - 1) >> PAGE_SHIFT;

        for page in start..=end {
            self.pages[page as usize].retain(|&b| b != index);
        }
    }

    fn add_block_range(&mut self, index: u32, addr: u32, bytes: u32) {
        debug_assert!(addr < RAM_SIZE);

        let start = addr >> PAGE_SHIFT;
        let end = (addr + bytes - 1) >> PAGE_SHIFT;

        for page in start..=end {
            self.pages[page as usize].push(index);
        }
    }

    /// Drop every translated block (arena flush companion)
    fn clear(&mut self) {
        self.blocks.fill(Block::default());
        for page in &mut self.pages {
            page.clear();
        }
    }

    #[cfg(test)]
    fn block_valid(&self, index: usize) -> bool {
        self.blocks[index].valid
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Guest-to-host block translator
pub struct Recompiler {
    /// Bump-allocated micro-op storage; never compacted, flushed whole
    arena: Vec<BlockOp>,

    /// Block table, shared with the bus for write invalidation
    cache: Rc<RefCell<BlockCache>>,

    /// Total block translations (diagnostics)
    compile_count: u64,
}

impl Recompiler {
    /// Create a recompiler over a shared block cache
    pub fn new(cache: Rc<RefCell<BlockCache>>) -> Self {
        Self {
            arena: Vec::with_capacity(ARENA_CAPACITY),
            cache,
            compile_count: 0,
        }
    }

    /// Number of blocks translated since construction
    pub fn compile_count(&self) -> u64 {
        self.compile_count
    }

    /// Dispatch the block at `address`, translating it first if needed
    ///
    /// Returns the number of guest instructions actually retired, for
    /// the caller to charge to the scheduler: the block's full guest
    /// length on a normal exit, or the trapping instruction's ordinal
    /// when a mid-block exception abandons the rest (overflow and
    /// misalignment are runtime conditions on ops that do not end a
    /// block at translation time). A non-`Ok` return is a fatal host
    /// error; blocks have no other bailout path.
    pub fn run(&mut self, cpu: &mut Cpu, bus: &mut Bus, address: u32) -> Result<u32> {
        let index = block_table_index(address)?;

        let mut block = self.cache.borrow().blocks[index];
        if !block.valid {
            block = self.compile_block(bus, index, address)?;
        }

        let start = block.entry as usize;
        let end = start + block.host_len as usize;

        let mut retired = block.guest_instructions;

        for slot in start..end {
            let op = self.arena[slot];
            if !execute_op(cpu, bus, op)? {
                // The trapping instruction itself still counts, exactly
                // as the interpreter charges it
                retired = (op.address.wrapping_sub(address) >> 2) + 1;
                break;
            }
        }

        Ok(retired)
    }

    /// Flush the arena and every translated block
    pub fn clear_cache(&mut self) {
        self.arena.clear();
        self.cache.borrow_mut().clear();
    }

    fn compile_block(&mut self, bus: &mut Bus, index: usize, address: u32) -> Result<Block> {
        // Guarantee room for a worst-case block; the arena is flushed
        // wholesale (with the block table) rather than compacted
        if self.arena.len() + MAX_BLOCK_INSTRUCTIONS + 2 > ARENA_CAPACITY {
            log::debug!("recompiler arena exhausted, flushing all blocks");
            self.clear_cache();
        }

        log::trace!("recompiling block at 0x{:08x}", address);
        self.compile_count += 1;

        let entry = self.arena.len() as u32;

        let mut addr = address;
        let mut instructions = 0u32;

        loop {
            let i = bus.read_code(Cpu::translate_address(addr))?;
            let class = decode(i);
            let flags = class.flags();

            self.emit(class, addr, i, false);
            instructions += 1;

            match flags {
                OpFlags::None => {
                    addr = addr.wrapping_add(4);

                    if instructions as usize >= MAX_BLOCK_INSTRUCTIONS {
                        self.arena.push(BlockOp {
                            kind: OpKind::FlushPc { pc: addr },
                            address: addr,
                            delay_slot: false,
                        });
                        break;
                    }
                }
                OpFlags::Branch => break,
                OpFlags::Delay => {
                    addr = addr.wrapping_add(4);

                    let slot_i = bus.read_code(Cpu::translate_address(addr))?;
                    let slot_class = decode(slot_i);

                    if slot_class.flags() != OpFlags::None {
                        log::warn!(
                            "branch in delay slot at 0x{:08x} ({})",
                            addr,
                            slot_class.name()
                        );
                    }

                    self.emit(slot_class, addr, slot_i, true);
                    instructions += 1;
                    break;
                }
            }
        }

        let phys = Cpu::translate_address(address);
        let block = Block {
            entry,
            host_len: self.arena.len() as u32 - entry,
            guest_address: phys,
            guest_instructions: instructions,
            valid: true,
        };

        let mut cache = self.cache.borrow_mut();
        cache.blocks[index] = block;
        if phys < RAM_SIZE {
            cache.add_block_range(index as u32, phys, instructions * 4);
        }

        Ok(block)
    }

    /// Translate one instruction into a micro-op
    ///
    /// Writes to r0 are dropped here; reads of r0 cost nothing at run
    /// time because the register file keeps r0 pinned to zero.
    fn emit(&mut self, class: OpClass, address: u32, i: u32, delay_slot: bool) {
        let r_s = rs(i) as u8;
        let r_t = rt(i) as u8;
        let r_d = rd(i) as u8;

        let kind = match class {
            OpClass::Nop => return,

            OpClass::Sll => drop_if_r0(r_d, OpKind::Sll { rt: r_t, rd: r_d, sa: sa(i) as u8 }),
            OpClass::Srl => drop_if_r0(r_d, OpKind::Srl { rt: r_t, rd: r_d, sa: sa(i) as u8 }),
            OpClass::Sra => drop_if_r0(r_d, OpKind::Sra { rt: r_t, rd: r_d, sa: sa(i) as u8 }),
            OpClass::Sllv => drop_if_r0(r_d, OpKind::Sllv { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Srlv => drop_if_r0(r_d, OpKind::Srlv { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Srav => drop_if_r0(r_d, OpKind::Srav { rs: r_s, rt: r_t, rd: r_d }),

            OpClass::Jr => Some(OpKind::Jr { rs: r_s }),
            OpClass::Jalr => Some(OpKind::Jalr {
                rs: r_s,
                rd: r_d,
                link: address.wrapping_add(8),
            }),
            OpClass::Syscall => Some(OpKind::Syscall),
            OpClass::Break => Some(OpKind::Break),

            OpClass::Mfhi => drop_if_r0(r_d, OpKind::Mfhi { rd: r_d }),
            OpClass::Mthi => Some(OpKind::Mthi { rs: r_s }),
            OpClass::Mflo => drop_if_r0(r_d, OpKind::Mflo { rd: r_d }),
            OpClass::Mtlo => Some(OpKind::Mtlo { rs: r_s }),
            OpClass::Mult => Some(OpKind::Mult { rs: r_s, rt: r_t }),
            OpClass::Multu => Some(OpKind::Multu { rs: r_s, rt: r_t }),
            OpClass::Div => Some(OpKind::Div { rs: r_s, rt: r_t }),
            OpClass::Divu => Some(OpKind::Divu { rs: r_s, rt: r_t }),

            // ADD/SUB keep their overflow traps even when the result is
            // discarded, so r0 destinations still emit
            OpClass::Add => Some(OpKind::Add { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Addu => drop_if_r0(r_d, OpKind::Addu { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Sub => Some(OpKind::Sub { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Subu => drop_if_r0(r_d, OpKind::Subu { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::And => drop_if_r0(r_d, OpKind::And { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Or => drop_if_r0(r_d, OpKind::Or { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Xor => drop_if_r0(r_d, OpKind::Xor { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Nor => drop_if_r0(r_d, OpKind::Nor { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Slt => drop_if_r0(r_d, OpKind::Slt { rs: r_s, rt: r_t, rd: r_d }),
            OpClass::Sltu => drop_if_r0(r_d, OpKind::Sltu { rs: r_s, rt: r_t, rd: r_d }),

            OpClass::Bcond => Some(OpKind::Bcond {
                rs: r_s,
                bgez: i & (1 << 16) != 0,
                link: (i >> 17) & 0xF == 0x8,
                target: branch_target(address, i),
                fallthrough: address.wrapping_add(8),
            }),
            OpClass::J => Some(OpKind::Jump {
                target: jump_target(address, i),
            }),
            OpClass::Jal => Some(OpKind::JumpLink {
                target: jump_target(address, i),
                link: address.wrapping_add(8),
            }),
            OpClass::Beq => Some(OpKind::Beq {
                rs: r_s,
                rt: r_t,
                target: branch_target(address, i),
                fallthrough: address.wrapping_add(8),
            }),
            OpClass::Bne => Some(OpKind::Bne {
                rs: r_s,
                rt: r_t,
                target: branch_target(address, i),
                fallthrough: address.wrapping_add(8),
            }),
            OpClass::Blez => Some(OpKind::Blez {
                rs: r_s,
                target: branch_target(address, i),
                fallthrough: address.wrapping_add(8),
            }),
            OpClass::Bgtz => Some(OpKind::Bgtz {
                rs: r_s,
                target: branch_target(address, i),
                fallthrough: address.wrapping_add(8),
            }),

            OpClass::Addi => Some(OpKind::Addi { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Addiu => drop_if_r0(r_t, OpKind::Addiu { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Slti => drop_if_r0(r_t, OpKind::Slti { rs: r_s, rt: r_t, imm: imm_se(i) as i32 }),
            OpClass::Sltiu => drop_if_r0(r_t, OpKind::Sltiu { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Andi => drop_if_r0(r_t, OpKind::Andi { rs: r_s, rt: r_t, imm: imm(i) }),
            OpClass::Ori => drop_if_r0(r_t, OpKind::Ori { rs: r_s, rt: r_t, imm: imm(i) }),
            OpClass::Xori => drop_if_r0(r_t, OpKind::Xori { rs: r_s, rt: r_t, imm: imm(i) }),
            OpClass::Lui => drop_if_r0(r_t, OpKind::Lui { rt: r_t, imm: imm(i) << 16 }),

            OpClass::Mfc0 => Some(OpKind::Mfc0 { rt: r_t, rd: r_d }),
            OpClass::Mtc0 => Some(OpKind::Mtc0 { rt: r_t, rd: r_d }),
            OpClass::Rfe => Some(OpKind::Rfe),

            OpClass::Lb => Some(OpKind::Lb { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Lbu => Some(OpKind::Lbu { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Lh => Some(OpKind::Lh { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Lhu => Some(OpKind::Lhu { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Lw => Some(OpKind::Lw { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Lwl => Some(OpKind::Lwl { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Lwr => Some(OpKind::Lwr { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Sb => Some(OpKind::Sb { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Sh => Some(OpKind::Sh { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Sw => Some(OpKind::Sw { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Swl => Some(OpKind::Swl { rs: r_s, rt: r_t, imm: imm_se(i) }),
            OpClass::Swr => Some(OpKind::Swr { rs: r_s, rt: r_t, imm: imm_se(i) }),

            OpClass::Mfc2 => Some(OpKind::Mfc2 { raw: i }),
            OpClass::Cfc2 => Some(OpKind::Cfc2 { raw: i }),
            OpClass::Mtc2 => Some(OpKind::Mtc2 { raw: i }),
            OpClass::Ctc2 => Some(OpKind::Ctc2 { raw: i }),
            OpClass::Cop2Cmd => Some(OpKind::Cop2Cmd { raw: i }),
            OpClass::Lwc2 => Some(OpKind::Lwc2 { raw: i }),
            OpClass::Swc2 => Some(OpKind::Swc2 { raw: i }),

            OpClass::Illegal => Some(OpKind::Illegal),
        };

        if let Some(kind) = kind {
            self.arena.push(BlockOp {
                kind,
                address,
                delay_slot,
            });
        }
    }
}

#[inline]
fn drop_if_r0(dest: u8, kind: OpKind) -> Option<OpKind> {
    if dest == 0 {
        None
    } else {
        Some(kind)
    }
}

#[inline]
fn branch_target(address: u32, i: u32) -> u32 {
    address.wrapping_add(4).wrapping_add(imm_se(i) << 2)
}

#[inline]
fn jump_target(address: u32, i: u32) -> u32 {
    (address & 0xF000_0000) | (target(i) << 2)
}

/// Map a guest fetch address onto the block table
fn block_table_index(address: u32) -> Result<usize> {
    let phys = Cpu::translate_address(address);

    if phys < RAM_SIZE {
        return Ok((phys >> 2) as usize);
    }

    if (BIOS_START..BIOS_START + BIOS_SIZE).contains(&phys) {
        return Ok(((RAM_SIZE + (phys - BIOS_START)) >> 2) as usize);
    }

    Err(EmulatorError::Internal {
        message: format!("code execution from unmapped address 0x{:08X}", address),
    })
}

/// Execute one micro-op
///
/// Returns `Ok(false)` when the op took a guest exception; the caller
/// abandons the rest of the block since control has moved to the vector.
fn execute_op(cpu: &mut Cpu, bus: &mut Bus, op: BlockOp) -> Result<bool> {
    let r = |cpu: &Cpu, index: u8| cpu.gpr[index as usize];

    match op.kind {
        OpKind::Sll { rt, rd, sa } => {
            let v = r(cpu, rt) << sa;
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Srl { rt, rd, sa } => {
            let v = r(cpu, rt) >> sa;
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Sra { rt, rd, sa } => {
            let v = ((r(cpu, rt) as i32) >> sa) as u32;
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Sllv { rs, rt, rd } => {
            let v = r(cpu, rt) << (r(cpu, rs) & 0x1F);
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Srlv { rs, rt, rd } => {
            let v = r(cpu, rt) >> (r(cpu, rs) & 0x1F);
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Srav { rs, rt, rd } => {
            let v = ((r(cpu, rt) as i32) >> (r(cpu, rs) & 0x1F)) as u32;
            cpu.set_reg(rd as usize, v);
        }

        OpKind::Jr { rs } => {
            let target = r(cpu, rs);
            cpu.pc = target;
            cpu.next_pc = target.wrapping_add(4);
        }
        OpKind::Jalr { rs, rd, link } => {
            let target = r(cpu, rs);
            if rd != 0 {
                cpu.set_reg(rd as usize, link);
            }
            cpu.pc = target;
            cpu.next_pc = target.wrapping_add(4);
        }

        OpKind::Syscall => {
            cpu.enter_exception_at(Exception::Syscall, op.address, op.delay_slot);
            return Ok(false);
        }
        OpKind::Break => {
            cpu.enter_exception_at(Exception::Breakpoint, op.address, op.delay_slot);
            return Ok(false);
        }
        OpKind::Illegal => {
            cpu.enter_exception_at(Exception::ReservedInstruction, op.address, op.delay_slot);
            return Ok(false);
        }

        OpKind::Mfhi { rd } => cpu.set_reg(rd as usize, cpu.hi),
        OpKind::Mthi { rs } => cpu.hi = r(cpu, rs),
        OpKind::Mflo { rd } => cpu.set_reg(rd as usize, cpu.lo),
        OpKind::Mtlo { rs } => cpu.lo = r(cpu, rs),

        OpKind::Mult { rs, rt } => {
            let result = (r(cpu, rs) as i32 as i64 * r(cpu, rt) as i32 as i64) as u64;
            cpu.hi = (result >> 32) as u32;
            cpu.lo = result as u32;
        }
        OpKind::Multu { rs, rt } => {
            let result = r(cpu, rs) as u64 * r(cpu, rt) as u64;
            cpu.hi = (result >> 32) as u32;
            cpu.lo = result as u32;
        }
        OpKind::Div { rs, rt } => {
            let n = r(cpu, rs) as i32;
            let d = r(cpu, rt) as i32;
            if d == 0 {
                cpu.hi = n as u32;
                cpu.lo = if n >= 0 { 0xFFFF_FFFF } else { 1 };
            } else if n == i32::MIN && d == -1 {
                cpu.hi = 0;
                cpu.lo = i32::MIN as u32;
            } else {
                cpu.hi = (n % d) as u32;
                cpu.lo = (n / d) as u32;
            }
        }
        OpKind::Divu { rs, rt } => {
            let n = r(cpu, rs);
            let d = r(cpu, rt);
            if d == 0 {
                cpu.hi = n;
                cpu.lo = 0xFFFF_FFFF;
            } else {
                cpu.hi = n % d;
                cpu.lo = n / d;
            }
        }

        OpKind::Add { rs, rt, rd } => {
            match (r(cpu, rs) as i32).checked_add(r(cpu, rt) as i32) {
                Some(v) => cpu.set_reg(rd as usize, v as u32),
                None => {
                    cpu.enter_exception_at(Exception::Overflow, op.address, op.delay_slot);
                    return Ok(false);
                }
            }
        }
        OpKind::Addu { rs, rt, rd } => {
            let v = r(cpu, rs).wrapping_add(r(cpu, rt));
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Sub { rs, rt, rd } => {
            match (r(cpu, rs) as i32).checked_sub(r(cpu, rt) as i32) {
                Some(v) => cpu.set_reg(rd as usize, v as u32),
                None => {
                    cpu.enter_exception_at(Exception::Overflow, op.address, op.delay_slot);
                    return Ok(false);
                }
            }
        }
        OpKind::Subu { rs, rt, rd } => {
            let v = r(cpu, rs).wrapping_sub(r(cpu, rt));
            cpu.set_reg(rd as usize, v);
        }

        OpKind::And { rs, rt, rd } => {
            let v = r(cpu, rs) & r(cpu, rt);
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Or { rs, rt, rd } => {
            let v = r(cpu, rs) | r(cpu, rt);
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Xor { rs, rt, rd } => {
            let v = r(cpu, rs) ^ r(cpu, rt);
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Nor { rs, rt, rd } => {
            let v = !(r(cpu, rs) | r(cpu, rt));
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Slt { rs, rt, rd } => {
            let v = ((r(cpu, rs) as i32) < (r(cpu, rt) as i32)) as u32;
            cpu.set_reg(rd as usize, v);
        }
        OpKind::Sltu { rs, rt, rd } => {
            let v = (r(cpu, rs) < r(cpu, rt)) as u32;
            cpu.set_reg(rd as usize, v);
        }

        OpKind::Bcond {
            rs,
            bgez,
            link,
            target,
            fallthrough,
        } => {
            let taken = bgez ^ ((r(cpu, rs) as i32) < 0);
            if link {
                cpu.set_reg(31, fallthrough);
            }
            let pc = if taken { target } else { fallthrough };
            cpu.pc = pc;
            cpu.next_pc = pc.wrapping_add(4);
        }
        OpKind::Jump { target } => {
            cpu.pc = target;
            cpu.next_pc = target.wrapping_add(4);
        }
        OpKind::JumpLink { target, link } => {
            cpu.set_reg(31, link);
            cpu.pc = target;
            cpu.next_pc = target.wrapping_add(4);
        }
        OpKind::Beq {
            rs,
            rt,
            target,
            fallthrough,
        } => {
            let pc = if r(cpu, rs) == r(cpu, rt) {
                target
            } else {
                fallthrough
            };
            cpu.pc = pc;
            cpu.next_pc = pc.wrapping_add(4);
        }
        OpKind::Bne {
            rs,
            rt,
            target,
            fallthrough,
        } => {
            let pc = if r(cpu, rs) != r(cpu, rt) {
                target
            } else {
                fallthrough
            };
            cpu.pc = pc;
            cpu.next_pc = pc.wrapping_add(4);
        }
        OpKind::Blez {
            rs,
            target,
            fallthrough,
        } => {
            let pc = if r(cpu, rs) as i32 <= 0 {
                target
            } else {
                fallthrough
            };
            cpu.pc = pc;
            cpu.next_pc = pc.wrapping_add(4);
        }
        OpKind::Bgtz {
            rs,
            target,
            fallthrough,
        } => {
            let pc = if r(cpu, rs) as i32 > 0 {
                target
            } else {
                fallthrough
            };
            cpu.pc = pc;
            cpu.next_pc = pc.wrapping_add(4);
        }

        OpKind::Addi { rs, rt, imm } => {
            match (r(cpu, rs) as i32).checked_add(imm as i32) {
                Some(v) => cpu.set_reg(rt as usize, v as u32),
                None => {
                    cpu.enter_exception_at(Exception::Overflow, op.address, op.delay_slot);
                    return Ok(false);
                }
            }
        }
        OpKind::Addiu { rs, rt, imm } => {
            let v = r(cpu, rs).wrapping_add(imm);
            cpu.set_reg(rt as usize, v);
        }
        OpKind::Slti { rs, rt, imm } => {
            let v = ((r(cpu, rs) as i32) < imm) as u32;
            cpu.set_reg(rt as usize, v);
        }
        OpKind::Sltiu { rs, rt, imm } => {
            let v = (r(cpu, rs) < imm) as u32;
            cpu.set_reg(rt as usize, v);
        }
        OpKind::Andi { rs, rt, imm } => {
            let v = r(cpu, rs) & imm;
            cpu.set_reg(rt as usize, v);
        }
        OpKind::Ori { rs, rt, imm } => {
            let v = r(cpu, rs) | imm;
            cpu.set_reg(rt as usize, v);
        }
        OpKind::Xori { rs, rt, imm } => {
            let v = r(cpu, rs) ^ imm;
            cpu.set_reg(rt as usize, v);
        }
        OpKind::Lui { rt, imm } => cpu.set_reg(rt as usize, imm),

        OpKind::Mfc0 { rt, rd } => {
            let value = match rd {
                12 => cpu.status.0,
                13 => cpu.cause.0,
                14 => cpu.epc,
                15 => 0x0000_0002,
                reg => {
                    log::warn!("mfc0 from unknown register cop0r{}", reg);
                    0
                }
            };
            cpu.set_reg(rt as usize, value);
        }
        OpKind::Mtc0 { rt, rd } => {
            let value = r(cpu, rt);
            match rd {
                3 | 5 | 6 | 7 | 9 | 11 => {}
                12 => cpu.status.0 = value & super::cop0::STATUS_WRITE_MASK,
                13 => {
                    cpu.cause.0 &= !super::cop0::CAUSE_WRITE_MASK;
                    cpu.cause.0 |= value & super::cop0::CAUSE_WRITE_MASK;
                }
                14 => cpu.epc = value,
                reg => {
                    return Err(EmulatorError::Internal {
                        message: format!("mtc0 to unknown register cop0r{}", reg),
                    })
                }
            }
        }
        OpKind::Rfe => cpu.status.pop_exception_stack(),

        OpKind::Lb { rs, rt, imm } => {
            let addr = r(cpu, rs).wrapping_add(imm);
            let data = cpu.read_byte(bus, addr)? as i8;
            cpu.set_reg(rt as usize, data as i32 as u32);
        }
        OpKind::Lbu { rs, rt, imm } => {
            let addr = r(cpu, rs).wrapping_add(imm);
            let data = cpu.read_byte(bus, addr)?;
            cpu.set_reg(rt as usize, data as u32);
        }
        OpKind::Lh { rs, rt, imm } => {
            let addr = r(cpu, rs).wrapping_add(imm);
            if addr & 0x1 != 0 {
                cpu.enter_exception_at(Exception::AddressLoad, op.address, op.delay_slot);
                return Ok(false);
            }
            let data = cpu.read_half(bus, addr)? as i16;
            cpu.set_reg(rt as usize, data as i32 as u32);
        }
        OpKind::Lhu { rs, rt, imm } => {
            let addr = r(cpu, rs).wrapping_add(imm);
            if addr & 0x1 != 0 {
                cpu.enter_exception_at(Exception::AddressLoad, op.address, op.delay_slot);
                return Ok(false);
            }
            let data = cpu.read_half(bus, addr)?;
            cpu.set_reg(rt as usize, data as u32);
        }
        OpKind::Lw { rs, rt, imm } => {
            let addr = r(cpu, rs).wrapping_add(imm);
            if addr & 0x3 != 0 {
                cpu.enter_exception_at(Exception::AddressLoad, op.address, op.delay_slot);
                return Ok(false);
            }
            let data = cpu.read_word(bus, addr)?;
            cpu.set_reg(rt as usize, data);
        }
        OpKind::Lwl { rs, rt, imm } => {
            let addr = r(cpu, rs).wrapping_add(imm);
            let data = cpu.read_word(bus, addr & !0x3)?;
            let offset = addr & 0x3;
            let v = (r(cpu, rt) & (0x00FF_FFFFu32 >> (8 * offset))) | (data << (8 * (3 - offset)));
            cpu.set_reg(rt as usize, v);
        }
        OpKind::Lwr { rs, rt, imm } => {
            const MASK: [u32; 4] = [0x0000_0000, 0xFF00_0000, 0xFFFF_0000, 0xFFFF_FF00];
            const SHIFT: [u32; 4] = [0, 8, 16, 24];

            let addr = r(cpu, rs).wrapping_add(imm);
            let data = cpu.read_word(bus, addr & !0x3)?;
            let offset = (addr & 0x3) as usize;
            let v = (r(cpu, rt) & MASK[offset]) | (data >> SHIFT[offset]);
            cpu.set_reg(rt as usize, v);
        }

        OpKind::Sb { rs, rt, imm } => {
            let addr = r(cpu, rs).wrapping_add(imm);
            let data = r(cpu, rt) as u8;
            cpu.write_byte(bus, addr, data)?;
        }
        OpKind::Sh { rs, rt, imm } => {
            let addr = r(cpu, rs).wrapping_add(imm);
            if addr & 0x1 != 0 {
                cpu.enter_exception_at(Exception::AddressStore, op.address, op.delay_slot);
                return Ok(false);
            }
            let data = r(cpu, rt) as u16;
            cpu.write_half(bus, addr, data)?;
        }
        OpKind::Sw { rs, rt, imm } => {
            let addr = r(cpu, rs).wrapping_add(imm);
            if addr & 0x3 != 0 {
                cpu.enter_exception_at(Exception::AddressStore, op.address, op.delay_slot);
                return Ok(false);
            }
            let data = r(cpu, rt);
            cpu.write_word(bus, addr, data)?;
        }
        OpKind::Swl { rs, rt, imm } => {
            const MASK: [u32; 4] = [0xFFFF_FF00, 0xFFFF_0000, 0xFF00_0000, 0x0000_0000];
            const SHIFT: [u32; 4] = [24, 16, 8, 0];

            let addr = r(cpu, rs).wrapping_add(imm);
            let data = cpu.read_word(bus, addr & !0x3)?;
            let offset = (addr & 0x3) as usize;
            let v = (data & MASK[offset]) | (r(cpu, rt) >> SHIFT[offset]);
            cpu.write_word(bus, addr & !0x3, v)?;
        }
        OpKind::Swr { rs, rt, imm } => {
            const MASK: [u32; 4] = [0x0000_0000, 0x0000_00FF, 0x0000_FFFF, 0x00FF_FFFF];
            const SHIFT: [u32; 4] = [0, 8, 16, 24];

            let addr = r(cpu, rs).wrapping_add(imm);
            let data = cpu.read_word(bus, addr & !0x3)?;
            let offset = (addr & 0x3) as usize;
            let v = (data & MASK[offset]) | (r(cpu, rt) << SHIFT[offset]);
            cpu.write_word(bus, addr & !0x3, v)?;
        }

        OpKind::Mfc2 { raw } => cpu.op_mfc2(raw),
        OpKind::Cfc2 { raw } => cpu.op_cfc2(raw),
        OpKind::Mtc2 { raw } => cpu.op_mtc2(raw),
        OpKind::Ctc2 { raw } => cpu.op_ctc2(raw),
        OpKind::Cop2Cmd { raw } => cpu.op_cop2_cmd(raw)?,
        OpKind::Lwc2 { raw } => {
            let addr = r(cpu, rs(raw) as u8).wrapping_add(imm_se(raw));
            if addr & 0x3 != 0 {
                cpu.enter_exception_at(Exception::AddressLoad, op.address, op.delay_slot);
                return Ok(false);
            }
            let data = cpu.read_word(bus, addr)?;
            cpu.gte.write_data(rt(raw), data);
        }
        OpKind::Swc2 { raw } => {
            let addr = r(cpu, rs(raw) as u8).wrapping_add(imm_se(raw));
            if addr & 0x3 != 0 {
                cpu.enter_exception_at(Exception::AddressStore, op.address, op.delay_slot);
                return Ok(false);
            }
            let data = cpu.gte.read_data(rt(raw));
            cpu.write_word(bus, addr, data)?;
        }

        OpKind::FlushPc { pc } => {
            cpu.pc = pc;
            cpu.next_pc = pc.wrapping_add(4);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests;
