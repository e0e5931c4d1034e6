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

//! Instruction decoding
//!
//! The MIPS-I opcode set is decoded into a flat [`OpClass`] via the
//! primary-opcode switch, with a function-field sub-switch under primary
//! 0x00 and rs sub-switches under 0x10 (COP0) and 0x12 (COP2). Both the
//! interpreter and the recompiler dispatch on the same class.

/// Decoded instruction class (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Nop,
    Sll,
    Srl,
    Sra,
    Sllv,
    Srlv,
    Srav,
    Jr,
    Jalr,
    Syscall,
    Break,
    Mfhi,
    Mthi,
    Mflo,
    Mtlo,
    Mult,
    Multu,
    Div,
    Divu,
    Add,
    Addu,
    Sub,
    Subu,
    And,
    Or,
    Xor,
    Nor,
    Slt,
    Sltu,
    Bcond,
    J,
    Jal,
    Beq,
    Bne,
    Blez,
    Bgtz,
    Addi,
    Addiu,
    Slti,
    Sltiu,
    Andi,
    Ori,
    Xori,
    Lui,
    Mfc0,
    Mtc0,
    Rfe,
    Mfc2,
    Cfc2,
    Mtc2,
    Ctc2,
    Cop2Cmd,
    Lb,
    Lh,
    Lwl,
    Lw,
    Lbu,
    Lhu,
    Lwr,
    Sb,
    Sh,
    Swl,
    Sw,
    Swr,
    Lwc2,
    Swc2,
    Illegal,
}

/// Control-flow behavior of an instruction class
///
/// `Delay` ops branch and are followed by an architecturally executed
/// delay slot; `Branch` ops redirect control without one (exceptions and
/// RFE). Both end a recompiled block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpFlags {
    None,
    Branch,
    Delay,
}

impl OpClass {
    /// Control-flow flags for block formation and delay-slot tracking
    pub fn flags(self) -> OpFlags {
        match self {
            OpClass::Jr
            | OpClass::Jalr
            | OpClass::Bcond
            | OpClass::J
            | OpClass::Jal
            | OpClass::Beq
            | OpClass::Bne
            | OpClass::Blez
            | OpClass::Bgtz => OpFlags::Delay,
            OpClass::Syscall | OpClass::Break | OpClass::Rfe | OpClass::Illegal => OpFlags::Branch,
            _ => OpFlags::None,
        }
    }

    /// Mnemonic for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            OpClass::Nop => "nop",
            OpClass::Sll => "sll",
            OpClass::Srl => "srl",
            OpClass::Sra => "sra",
            OpClass::Sllv => "sllv",
            OpClass::Srlv => "srlv",
            OpClass::Srav => "srav",
            OpClass::Jr => "jr",
            OpClass::Jalr => "jalr",
            OpClass::Syscall => "syscall",
            OpClass::Break => "break",
            OpClass::Mfhi => "mfhi",
            OpClass::Mthi => "mthi",
            OpClass::Mflo => "mflo",
            OpClass::Mtlo => "mtlo",
            OpClass::Mult => "mult",
            OpClass::Multu => "multu",
            OpClass::Div => "div",
            OpClass::Divu => "divu",
            OpClass::Add => "add",
            OpClass::Addu => "addu",
            OpClass::Sub => "sub",
            OpClass::Subu => "subu",
            OpClass::And => "and",
            OpClass::Or => "or",
            OpClass::Xor => "xor",
            OpClass::Nor => "nor",
            OpClass::Slt => "slt",
            OpClass::Sltu => "sltu",
            OpClass::Bcond => "bcond",
            OpClass::J => "j",
            OpClass::Jal => "jal",
            OpClass::Beq => "beq",
            OpClass::Bne => "bne",
            OpClass::Blez => "blez",
            OpClass::Bgtz => "bgtz",
            OpClass::Addi => "addi",
            OpClass::Addiu => "addiu",
            OpClass::Slti => "slti",
            OpClass::Sltiu => "sltiu",
            OpClass::Andi => "andi",
            OpClass::Ori => "ori",
            OpClass::Xori => "xori",
            OpClass::Lui => "lui",
            OpClass::Mfc0 => "mfc0",
            OpClass::Mtc0 => "mtc0",
            OpClass::Rfe => "rfe",
            OpClass::Mfc2 => "mfc2",
            OpClass::Cfc2 => "cfc2",
            OpClass::Mtc2 => "mtc2",
            OpClass::Ctc2 => "ctc2",
            OpClass::Cop2Cmd => "cop2",
            OpClass::Lb => "lb",
            OpClass::Lh => "lh",
            OpClass::Lwl => "lwl",
            OpClass::Lw => "lw",
            OpClass::Lbu => "lbu",
            OpClass::Lhu => "lhu",
            OpClass::Lwr => "lwr",
            OpClass::Sb => "sb",
            OpClass::Sh => "sh",
            OpClass::Swl => "swl",
            OpClass::Sw => "sw",
            OpClass::Swr => "swr",
            OpClass::Lwc2 => "lwc2",
            OpClass::Swc2 => "swc2",
            OpClass::Illegal => "illegal",
        }
    }
}

/// Decode a raw instruction word
pub fn decode(i: u32) -> OpClass {
    if i == 0 {
        return OpClass::Nop;
    }

    match op(i) {
        0x00 => match fn_field(i) {
            0x00 => OpClass::Sll,
            0x02 => OpClass::Srl,
            0x03 => OpClass::Sra,
            0x04 => OpClass::Sllv,
            0x06 => OpClass::Srlv,
            0x07 => OpClass::Srav,
            0x08 => OpClass::Jr,
            0x09 => OpClass::Jalr,
            0x0C => OpClass::Syscall,
            0x0D => OpClass::Break,
            0x10 => OpClass::Mfhi,
            0x11 => OpClass::Mthi,
            0x12 => OpClass::Mflo,
            0x13 => OpClass::Mtlo,
            0x18 => OpClass::Mult,
            0x19 => OpClass::Multu,
            0x1A => OpClass::Div,
            0x1B => OpClass::Divu,
            0x20 => OpClass::Add,
            0x21 => OpClass::Addu,
            0x22 => OpClass::Sub,
            0x23 => OpClass::Subu,
            0x24 => OpClass::And,
            0x25 => OpClass::Or,
            0x26 => OpClass::Xor,
            0x27 => OpClass::Nor,
            0x2A => OpClass::Slt,
            0x2B => OpClass::Sltu,
            _ => OpClass::Illegal,
        },
        0x01 => OpClass::Bcond,
        0x02 => OpClass::J,
        0x03 => OpClass::Jal,
        0x04 => OpClass::Beq,
        0x05 => OpClass::Bne,
        0x06 => OpClass::Blez,
        0x07 => OpClass::Bgtz,
        0x08 => OpClass::Addi,
        0x09 => OpClass::Addiu,
        0x0A => OpClass::Slti,
        0x0B => OpClass::Sltiu,
        0x0C => OpClass::Andi,
        0x0D => OpClass::Ori,
        0x0E => OpClass::Xori,
        0x0F => OpClass::Lui,
        0x10 => match rs(i) {
            0x00 => OpClass::Mfc0,
            0x04 => OpClass::Mtc0,
            0x10..=0x1F => match fn_field(i) {
                0x10 => OpClass::Rfe,
                _ => OpClass::Illegal,
            },
            _ => OpClass::Illegal,
        },
        0x12 => match rs(i) {
            0x00 => OpClass::Mfc2,
            0x02 => OpClass::Cfc2,
            0x04 => OpClass::Mtc2,
            0x06 => OpClass::Ctc2,
            0x10..=0x1F => OpClass::Cop2Cmd,
            _ => OpClass::Illegal,
        },
        0x20 => OpClass::Lb,
        0x21 => OpClass::Lh,
        0x22 => OpClass::Lwl,
        0x23 => OpClass::Lw,
        0x24 => OpClass::Lbu,
        0x25 => OpClass::Lhu,
        0x26 => OpClass::Lwr,
        0x28 => OpClass::Sb,
        0x29 => OpClass::Sh,
        0x2A => OpClass::Swl,
        0x2B => OpClass::Sw,
        0x2E => OpClass::Swr,
        0x32 => OpClass::Lwc2,
        0x3A => OpClass::Swc2,
        _ => OpClass::Illegal,
    }
}

// Instruction field extractors

#[inline(always)]
pub fn op(i: u32) -> usize {
    (i >> 26) as usize
}

#[inline(always)]
pub fn rs(i: u32) -> usize {
    ((i >> 21) & 0x1F) as usize
}

#[inline(always)]
pub fn rt(i: u32) -> usize {
    ((i >> 16) & 0x1F) as usize
}

#[inline(always)]
pub fn rd(i: u32) -> usize {
    ((i >> 11) & 0x1F) as usize
}

#[inline(always)]
pub fn sa(i: u32) -> u32 {
    (i >> 6) & 0x1F
}

#[inline(always)]
pub fn fn_field(i: u32) -> usize {
    (i & 0x3F) as usize
}

#[inline(always)]
pub fn imm(i: u32) -> u32 {
    i & 0xFFFF
}

/// Sign-extended 16-bit immediate
#[inline(always)]
pub fn imm_se(i: u32) -> u32 {
    (i & 0xFFFF) as i16 as u32
}

#[inline(always)]
pub fn target(i: u32) -> u32 {
    i & 0x03FF_FFFF
}
