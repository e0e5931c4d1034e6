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

//! Interpreter instruction semantics
//!
//! One method per [`OpClass`], dispatched from [`Cpu::execute`]. These
//! methods are also the reference semantics for the recompiler: the
//! emitted micro-ops must match them bit for bit.
//!
//! Load results commit eagerly (the ABI never reads a load-delay slot),
//! but exception PCs observe the architectural timing rules.

use super::decode::{decode, imm, imm_se, rd, rs, rt, sa, target, OpClass};
use super::{Cpu, Exception};
use crate::core::error::{EmulatorError, Result};
use crate::core::memory::Bus;

impl Cpu {
    /// Decode and execute one fetched instruction word
    pub(crate) fn execute(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        match decode(i) {
            OpClass::Nop => {}
            OpClass::Sll => self.op_sll(i),
            OpClass::Srl => self.op_srl(i),
            OpClass::Sra => self.op_sra(i),
            OpClass::Sllv => self.op_sllv(i),
            OpClass::Srlv => self.op_srlv(i),
            OpClass::Srav => self.op_srav(i),
            OpClass::Jr => self.op_jr(i),
            OpClass::Jalr => self.op_jalr(i),
            OpClass::Syscall => self.enter_exception(Exception::Syscall),
            OpClass::Break => self.enter_exception(Exception::Breakpoint),
            OpClass::Mfhi => self.op_mfhi(i),
            OpClass::Mthi => self.op_mthi(i),
            OpClass::Mflo => self.op_mflo(i),
            OpClass::Mtlo => self.op_mtlo(i),
            OpClass::Mult => self.op_mult(i),
            OpClass::Multu => self.op_multu(i),
            OpClass::Div => self.op_div(i),
            OpClass::Divu => self.op_divu(i),
            OpClass::Add => self.op_add(i),
            OpClass::Addu => self.op_addu(i),
            OpClass::Sub => self.op_sub(i),
            OpClass::Subu => self.op_subu(i),
            OpClass::And => self.op_and(i),
            OpClass::Or => self.op_or(i),
            OpClass::Xor => self.op_xor(i),
            OpClass::Nor => self.op_nor(i),
            OpClass::Slt => self.op_slt(i),
            OpClass::Sltu => self.op_sltu(i),
            OpClass::Bcond => self.op_bcond(i),
            OpClass::J => self.op_j(i),
            OpClass::Jal => self.op_jal(i),
            OpClass::Beq => self.op_beq(i),
            OpClass::Bne => self.op_bne(i),
            OpClass::Blez => self.op_blez(i),
            OpClass::Bgtz => self.op_bgtz(i),
            OpClass::Addi => self.op_addi(i),
            OpClass::Addiu => self.op_addiu(i),
            OpClass::Slti => self.op_slti(i),
            OpClass::Sltiu => self.op_sltiu(i),
            OpClass::Andi => self.op_andi(i),
            OpClass::Ori => self.op_ori(i),
            OpClass::Xori => self.op_xori(i),
            OpClass::Lui => self.op_lui(i),
            OpClass::Mfc0 => self.op_mfc0(i),
            OpClass::Mtc0 => self.op_mtc0(i)?,
            OpClass::Rfe => self.op_rfe(i),
            OpClass::Mfc2 => self.op_mfc2(i),
            OpClass::Cfc2 => self.op_cfc2(i),
            OpClass::Mtc2 => self.op_mtc2(i),
            OpClass::Ctc2 => self.op_ctc2(i),
            OpClass::Cop2Cmd => self.op_cop2_cmd(i)?,
            OpClass::Lb => self.op_lb(bus, i)?,
            OpClass::Lh => self.op_lh(bus, i)?,
            OpClass::Lwl => self.op_lwl(bus, i)?,
            OpClass::Lw => self.op_lw(bus, i)?,
            OpClass::Lbu => self.op_lbu(bus, i)?,
            OpClass::Lhu => self.op_lhu(bus, i)?,
            OpClass::Lwr => self.op_lwr(bus, i)?,
            OpClass::Sb => self.op_sb(bus, i)?,
            OpClass::Sh => self.op_sh(bus, i)?,
            OpClass::Swl => self.op_swl(bus, i)?,
            OpClass::Sw => self.op_sw(bus, i)?,
            OpClass::Swr => self.op_swr(bus, i)?,
            OpClass::Lwc2 => self.op_lwc2(bus, i)?,
            OpClass::Swc2 => self.op_swc2(bus, i)?,
            OpClass::Illegal => {
                log::warn!(
                    "illegal instruction 0x{:08X} at PC=0x{:08X}",
                    i,
                    self.current_pc
                );
                self.enter_exception(Exception::ReservedInstruction);
            }
        }

        Ok(())
    }

    // === Shifts ===

    fn op_sll(&mut self, i: u32) {
        self.set_reg(rd(i), self.reg(rt(i)) << sa(i));
    }

    fn op_srl(&mut self, i: u32) {
        self.set_reg(rd(i), self.reg(rt(i)) >> sa(i));
    }

    fn op_sra(&mut self, i: u32) {
        self.set_reg(rd(i), ((self.reg(rt(i)) as i32) >> sa(i)) as u32);
    }

    fn op_sllv(&mut self, i: u32) {
        self.set_reg(rd(i), self.reg(rt(i)) << (self.reg(rs(i)) & 0x1F));
    }

    fn op_srlv(&mut self, i: u32) {
        self.set_reg(rd(i), self.reg(rt(i)) >> (self.reg(rs(i)) & 0x1F));
    }

    fn op_srav(&mut self, i: u32) {
        let value = self.reg(rt(i)) as i32;
        self.set_reg(rd(i), (value >> (self.reg(rs(i)) & 0x1F)) as u32);
    }

    // === Jumps and branches ===
    //
    // Branch targets are relative to the delay slot; at this point `pc`
    // already holds the delay slot address, so `pc + (offset << 2)` is
    // the architectural target.

    fn op_jr(&mut self, i: u32) {
        self.branch_to(self.reg(rs(i)));
    }

    fn op_jalr(&mut self, i: u32) {
        let target = self.reg(rs(i));

        self.set_reg(rd(i), self.next_pc);
        self.branch_to(target);
    }

    /// BLTZ/BGEZ/BLTZAL/BGEZAL: rt bit 16 selects the >= sense; rt bits
    /// [20:17] == 0x8 requests the link, which happens whether or not
    /// the branch is taken
    fn op_bcond(&mut self, i: u32) {
        let value = self.reg(rs(i)) as i32;
        let offset = imm_se(i);

        let bgez = i & (1 << 16) != 0;
        let taken = bgez ^ (value < 0);
        let link = (i >> 17) & 0xF == 0x8;

        if link {
            self.set_reg(31, self.next_pc);
        }

        if taken {
            self.branch_to(self.pc.wrapping_add(offset << 2));
        }
    }

    fn op_j(&mut self, i: u32) {
        self.branch_to((self.pc & 0xF000_0000) | (target(i) << 2));
    }

    fn op_jal(&mut self, i: u32) {
        self.set_reg(31, self.next_pc);
        self.branch_to((self.pc & 0xF000_0000) | (target(i) << 2));
    }

    fn op_beq(&mut self, i: u32) {
        if self.reg(rs(i)) == self.reg(rt(i)) {
            self.branch_to(self.pc.wrapping_add(imm_se(i) << 2));
        }
    }

    fn op_bne(&mut self, i: u32) {
        if self.reg(rs(i)) != self.reg(rt(i)) {
            self.branch_to(self.pc.wrapping_add(imm_se(i) << 2));
        }
    }

    fn op_blez(&mut self, i: u32) {
        if self.reg(rs(i)) as i32 <= 0 {
            self.branch_to(self.pc.wrapping_add(imm_se(i) << 2));
        }
    }

    fn op_bgtz(&mut self, i: u32) {
        if self.reg(rs(i)) as i32 > 0 {
            self.branch_to(self.pc.wrapping_add(imm_se(i) << 2));
        }
    }

    // === HI/LO and multiply/divide ===

    fn op_mfhi(&mut self, i: u32) {
        self.set_reg(rd(i), self.hi);
    }

    fn op_mthi(&mut self, i: u32) {
        self.hi = self.reg(rs(i));
    }

    fn op_mflo(&mut self, i: u32) {
        self.set_reg(rd(i), self.lo);
    }

    fn op_mtlo(&mut self, i: u32) {
        self.lo = self.reg(rs(i));
    }

    fn op_mult(&mut self, i: u32) {
        let a = self.reg(rs(i)) as i32 as i64;
        let b = self.reg(rt(i)) as i32 as i64;
        let result = (a * b) as u64;

        self.hi = (result >> 32) as u32;
        self.lo = result as u32;
    }

    fn op_multu(&mut self, i: u32) {
        let a = self.reg(rs(i)) as u64;
        let b = self.reg(rt(i)) as u64;
        let result = a * b;

        self.hi = (result >> 32) as u32;
        self.lo = result as u32;
    }

    /// Signed division; hardware has no divide-by-zero trap, the result
    /// registers take documented garbage values instead
    fn op_div(&mut self, i: u32) {
        let n = self.reg(rs(i)) as i32;
        let d = self.reg(rt(i)) as i32;

        if d == 0 {
            self.hi = n as u32;
            self.lo = if n >= 0 { 0xFFFF_FFFF } else { 1 };
        } else if n == i32::MIN && d == -1 {
            self.hi = 0;
            self.lo = i32::MIN as u32;
        } else {
            self.hi = (n % d) as u32;
            self.lo = (n / d) as u32;
        }
    }

    fn op_divu(&mut self, i: u32) {
        let n = self.reg(rs(i));
        let d = self.reg(rt(i));

        if d == 0 {
            self.hi = n;
            self.lo = 0xFFFF_FFFF;
        } else {
            self.hi = n % d;
            self.lo = n / d;
        }
    }

    // === Arithmetic ===

    fn op_add(&mut self, i: u32) {
        let a = self.reg(rs(i)) as i32;
        let b = self.reg(rt(i)) as i32;

        match a.checked_add(b) {
            Some(result) => self.set_reg(rd(i), result as u32),
            None => self.enter_exception(Exception::Overflow),
        }
    }

    fn op_addu(&mut self, i: u32) {
        self.set_reg(rd(i), self.reg(rs(i)).wrapping_add(self.reg(rt(i))));
    }

    fn op_sub(&mut self, i: u32) {
        let a = self.reg(rs(i)) as i32;
        let b = self.reg(rt(i)) as i32;

        match a.checked_sub(b) {
            Some(result) => self.set_reg(rd(i), result as u32),
            None => self.enter_exception(Exception::Overflow),
        }
    }

    fn op_subu(&mut self, i: u32) {
        self.set_reg(rd(i), self.reg(rs(i)).wrapping_sub(self.reg(rt(i))));
    }

    fn op_addi(&mut self, i: u32) {
        let a = self.reg(rs(i)) as i32;
        let b = imm_se(i) as i32;

        match a.checked_add(b) {
            Some(result) => self.set_reg(rt(i), result as u32),
            None => self.enter_exception(Exception::Overflow),
        }
    }

    fn op_addiu(&mut self, i: u32) {
        self.set_reg(rt(i), self.reg(rs(i)).wrapping_add(imm_se(i)));
    }

    // === Comparisons and logic ===

    fn op_slt(&mut self, i: u32) {
        let result = (self.reg(rs(i)) as i32) < (self.reg(rt(i)) as i32);
        self.set_reg(rd(i), result as u32);
    }

    fn op_sltu(&mut self, i: u32) {
        let result = self.reg(rs(i)) < self.reg(rt(i));
        self.set_reg(rd(i), result as u32);
    }

    fn op_slti(&mut self, i: u32) {
        let result = (self.reg(rs(i)) as i32) < (imm_se(i) as i32);
        self.set_reg(rt(i), result as u32);
    }

    fn op_sltiu(&mut self, i: u32) {
        let result = self.reg(rs(i)) < imm_se(i);
        self.set_reg(rt(i), result as u32);
    }

    fn op_and(&mut self, i: u32) {
        self.set_reg(rd(i), self.reg(rs(i)) & self.reg(rt(i)));
    }

    fn op_or(&mut self, i: u32) {
        self.set_reg(rd(i), self.reg(rs(i)) | self.reg(rt(i)));
    }

    fn op_xor(&mut self, i: u32) {
        self.set_reg(rd(i), self.reg(rs(i)) ^ self.reg(rt(i)));
    }

    fn op_nor(&mut self, i: u32) {
        self.set_reg(rd(i), !(self.reg(rs(i)) | self.reg(rt(i))));
    }

    fn op_andi(&mut self, i: u32) {
        self.set_reg(rt(i), self.reg(rs(i)) & imm(i));
    }

    fn op_ori(&mut self, i: u32) {
        self.set_reg(rt(i), self.reg(rs(i)) | imm(i));
    }

    fn op_xori(&mut self, i: u32) {
        self.set_reg(rt(i), self.reg(rs(i)) ^ imm(i));
    }

    fn op_lui(&mut self, i: u32) {
        self.set_reg(rt(i), imm(i) << 16);
    }

    // === Loads ===

    fn op_lb(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));
        let data = self.read_byte(bus, addr)? as i8;

        self.set_reg(rt(i), data as i32 as u32);
        Ok(())
    }

    fn op_lbu(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));
        let data = self.read_byte(bus, addr)?;

        self.set_reg(rt(i), data as u32);
        Ok(())
    }

    fn op_lh(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));

        if addr & 0x1 != 0 {
            self.enter_exception(Exception::AddressLoad);
            return Ok(());
        }

        let data = self.read_half(bus, addr)? as i16;
        self.set_reg(rt(i), data as i32 as u32);
        Ok(())
    }

    fn op_lhu(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));

        if addr & 0x1 != 0 {
            self.enter_exception(Exception::AddressLoad);
            return Ok(());
        }

        let data = self.read_half(bus, addr)?;
        self.set_reg(rt(i), data as u32);
        Ok(())
    }

    fn op_lw(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));

        if addr & 0x3 != 0 {
            self.enter_exception(Exception::AddressLoad);
            return Ok(());
        }

        let data = self.read_word(bus, addr)?;
        self.set_reg(rt(i), data);
        Ok(())
    }

    /// LWL: merge the high-order bytes of an unaligned word into rt
    fn op_lwl(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));
        let data = self.read_word(bus, addr & !0x3)?;

        let current = self.reg(rt(i));
        let offset = addr & 0x3;

        let value = (current & (0x00FF_FFFFu32 >> (8 * offset))) | (data << (8 * (3 - offset)));
        self.set_reg(rt(i), value);
        Ok(())
    }

    /// LWR: merge the low-order bytes of an unaligned word into rt
    fn op_lwr(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        const MASK: [u32; 4] = [0x0000_0000, 0xFF00_0000, 0xFFFF_0000, 0xFFFF_FF00];
        const SHIFT: [u32; 4] = [0, 8, 16, 24];

        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));
        let data = self.read_word(bus, addr & !0x3)?;

        let current = self.reg(rt(i));
        let offset = (addr & 0x3) as usize;

        let value = (current & MASK[offset]) | (data >> SHIFT[offset]);
        self.set_reg(rt(i), value);
        Ok(())
    }

    // === Stores ===

    fn op_sb(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));
        self.write_byte(bus, addr, self.reg(rt(i)) as u8)
    }

    fn op_sh(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));

        if addr & 0x1 != 0 {
            self.enter_exception(Exception::AddressStore);
            return Ok(());
        }

        self.write_half(bus, addr, self.reg(rt(i)) as u16)
    }

    fn op_sw(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));

        if addr & 0x3 != 0 {
            self.enter_exception(Exception::AddressStore);
            return Ok(());
        }

        self.write_word(bus, addr, self.reg(rt(i)))
    }

    /// SWL: store the high-order bytes of rt into an unaligned word
    fn op_swl(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        const MASK: [u32; 4] = [0xFFFF_FF00, 0xFFFF_0000, 0xFF00_0000, 0x0000_0000];
        const SHIFT: [u32; 4] = [24, 16, 8, 0];

        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));
        let data = self.read_word(bus, addr & !0x3)?;

        let current = self.reg(rt(i));
        let offset = (addr & 0x3) as usize;

        let value = (data & MASK[offset]) | (current >> SHIFT[offset]);
        self.write_word(bus, addr & !0x3, value)
    }

    /// SWR: store the low-order bytes of rt into an unaligned word
    fn op_swr(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        const MASK: [u32; 4] = [0x0000_0000, 0x0000_00FF, 0x0000_FFFF, 0x00FF_FFFF];
        const SHIFT: [u32; 4] = [0, 8, 16, 24];

        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));
        let data = self.read_word(bus, addr & !0x3)?;

        let current = self.reg(rt(i));
        let offset = (addr & 0x3) as usize;

        let value = (data & MASK[offset]) | (current << SHIFT[offset]);
        self.write_word(bus, addr & !0x3, value)
    }

    // === System coprocessor ===

    fn op_mfc0(&mut self, i: u32) {
        let value = match rd(i) {
            12 => self.status.0,
            13 => self.cause.0,
            14 => self.epc,
            15 => 0x0000_0002, // PRId: CXD8606 revision
            reg => {
                log::warn!("mfc0 from unknown register cop0r{}", reg);
                0
            }
        };

        self.set_reg(rt(i), value);
    }

    fn op_mtc0(&mut self, i: u32) -> Result<()> {
        let value = self.reg(rt(i));

        match rd(i) {
            // Breakpoint registers: accepted, never read back
            3 | 5 | 6 | 7 | 9 | 11 => {}
            12 => self.status.0 = value & super::cop0::STATUS_WRITE_MASK,
            13 => {
                self.cause.0 &= !super::cop0::CAUSE_WRITE_MASK;
                self.cause.0 |= value & super::cop0::CAUSE_WRITE_MASK;
            }
            14 => self.epc = value,
            reg => {
                return Err(EmulatorError::Internal {
                    message: format!("mtc0 to unknown register cop0r{}", reg),
                })
            }
        }

        Ok(())
    }

    fn op_rfe(&mut self, _i: u32) {
        self.status.pop_exception_stack();
    }

    // === Geometry coprocessor ===
    //
    // The recompiler routes its COP2 micro-ops through these entry
    // points, so they are the single implementation of GTE access.

    pub(crate) fn op_mfc2(&mut self, i: u32) {
        self.set_reg(rt(i), self.gte.read_data(rd(i)));
    }

    pub(crate) fn op_cfc2(&mut self, i: u32) {
        self.set_reg(rt(i), self.gte.read_control(rd(i)));
    }

    pub(crate) fn op_mtc2(&mut self, i: u32) {
        self.gte.write_data(rd(i), self.reg(rt(i)));
    }

    pub(crate) fn op_ctc2(&mut self, i: u32) {
        self.gte.write_control(rd(i), self.reg(rt(i)));
    }

    pub(crate) fn op_cop2_cmd(&mut self, i: u32) -> Result<()> {
        self.gte.execute(i)
    }

    pub(crate) fn op_lwc2(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));

        if addr & 0x3 != 0 {
            self.enter_exception(Exception::AddressLoad);
            return Ok(());
        }

        let data = self.read_word(bus, addr)?;
        self.gte.write_data(rt(i), data);
        Ok(())
    }

    pub(crate) fn op_swc2(&mut self, bus: &mut Bus, i: u32) -> Result<()> {
        let addr = self.reg(rs(i)).wrapping_add(imm_se(i));

        if addr & 0x3 != 0 {
            self.enter_exception(Exception::AddressStore);
            return Ok(());
        }

        let data = self.gte.read_data(rt(i));
        self.write_word(bus, addr, data)
    }
}
