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

//! Instruction disassembly for trace logging

use super::decode::{decode, imm, imm_se, rd, rs, rt, sa, target, OpClass};

/// Render one instruction at `addr` as assembly text
pub fn disassemble(i: u32, addr: u32) -> String {
    let class = decode(i);
    let name = class.name();

    let branch_target = addr
        .wrapping_add(4)
        .wrapping_add(imm_se(i) << 2);

    match class {
        OpClass::Nop => "nop".into(),

        OpClass::Sll | OpClass::Srl | OpClass::Sra => {
            format!("{} r{}, r{}, {}", name, rd(i), rt(i), sa(i))
        }
        OpClass::Sllv | OpClass::Srlv | OpClass::Srav => {
            format!("{} r{}, r{}, r{}", name, rd(i), rt(i), rs(i))
        }

        OpClass::Jr => format!("jr r{}", rs(i)),
        OpClass::Jalr => format!("jalr r{}, r{}", rd(i), rs(i)),
        OpClass::Syscall | OpClass::Break | OpClass::Rfe => name.into(),

        OpClass::Mfhi | OpClass::Mflo => format!("{} r{}", name, rd(i)),
        OpClass::Mthi | OpClass::Mtlo => format!("{} r{}", name, rs(i)),

        OpClass::Mult | OpClass::Multu | OpClass::Div | OpClass::Divu => {
            format!("{} r{}, r{}", name, rs(i), rt(i))
        }

        OpClass::Add
        | OpClass::Addu
        | OpClass::Sub
        | OpClass::Subu
        | OpClass::And
        | OpClass::Or
        | OpClass::Xor
        | OpClass::Nor
        | OpClass::Slt
        | OpClass::Sltu => format!("{} r{}, r{}, r{}", name, rd(i), rs(i), rt(i)),

        OpClass::Bcond => {
            let op = match ((i >> 16) & 0x1, (i >> 17) & 0xF == 0x8) {
                (0, false) => "bltz",
                (1, false) => "bgez",
                (0, true) => "bltzal",
                _ => "bgezal",
            };
            format!("{} r{}, 0x{:08x}", op, rs(i), branch_target)
        }
        OpClass::J | OpClass::Jal => {
            format!("{} 0x{:08x}", name, (addr & 0xF000_0000) | (target(i) << 2))
        }
        OpClass::Beq | OpClass::Bne => {
            format!("{} r{}, r{}, 0x{:08x}", name, rs(i), rt(i), branch_target)
        }
        OpClass::Blez | OpClass::Bgtz => {
            format!("{} r{}, 0x{:08x}", name, rs(i), branch_target)
        }

        OpClass::Addi | OpClass::Addiu | OpClass::Slti => {
            format!("{} r{}, r{}, {}", name, rt(i), rs(i), imm_se(i) as i32)
        }
        OpClass::Sltiu | OpClass::Andi | OpClass::Ori | OpClass::Xori => {
            format!("{} r{}, r{}, 0x{:x}", name, rt(i), rs(i), imm(i))
        }
        OpClass::Lui => format!("lui r{}, 0x{:x}", rt(i), imm(i)),

        OpClass::Mfc0 | OpClass::Mtc0 => format!("{} r{}, cop0r{}", name, rt(i), rd(i)),
        OpClass::Mfc2 | OpClass::Mtc2 => format!("{} r{}, cop2r{}", name, rt(i), rd(i)),
        OpClass::Cfc2 | OpClass::Ctc2 => format!("{} r{}, cop2r{}", name, rt(i), rd(i) + 32),
        OpClass::Cop2Cmd => format!("cop2 0x{:07x}", i & 0x1FF_FFFF),

        OpClass::Lb
        | OpClass::Lbu
        | OpClass::Lh
        | OpClass::Lhu
        | OpClass::Lw
        | OpClass::Lwl
        | OpClass::Lwr
        | OpClass::Sb
        | OpClass::Sh
        | OpClass::Sw
        | OpClass::Swl
        | OpClass::Swr => format!("{} r{}, {}(r{})", name, rt(i), imm_se(i) as i32, rs(i)),
        OpClass::Lwc2 | OpClass::Swc2 => {
            format!("{} cop2r{}, {}(r{})", name, rt(i), imm_se(i) as i32, rs(i))
        }

        OpClass::Illegal => format!("illegal 0x{:08x}", i),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alu_formatting() {
        assert_eq!(disassemble(0x0022_1820, 0), "add r3, r1, r2");
        assert_eq!(disassemble(0x0001_1100, 0), "sll r2, r1, 4");
        assert_eq!(disassemble(0x0000_0000, 0), "nop");
    }

    #[test]
    fn test_branch_targets_are_absolute() {
        // beq r2, r2, +1 at 0x80000008 lands at 0x80000010
        assert_eq!(
            disassemble(0x1042_0001, 0x8000_0008),
            "beq r2, r2, 0x80000010"
        );
        assert_eq!(disassemble(0x0804_0000, 0x8000_0000), "j 0x80100000");
    }

    #[test]
    fn test_memory_operand_formatting() {
        assert_eq!(disassemble(0x8C2B_0100, 0), "lw r11, 256(r1)");
        assert_eq!(disassemble(0xAC22_FFFC, 0), "sw r2, -4(r1)");
    }

    #[test]
    fn test_immediates() {
        assert_eq!(disassemble(0x2442_FFFF, 0), "addiu r2, r2, -1");
        assert_eq!(disassemble(0x3C02_1234, 0), "lui r2, 0x1234");
    }
}
