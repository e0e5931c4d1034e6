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

use super::*;

fn fixture(program: &[u32]) -> (Cpu, Bus, Recompiler) {
    let mut cpu = Cpu::new();
    let mut bus = Bus::new();
    let recompiler = Recompiler::new(bus.block_cache());

    for (n, &word) in program.iter().enumerate() {
        bus.write32(n as u32 * 4, word).unwrap();
    }

    cpu.set_pc(0x8000_0000);
    (cpu, bus, recompiler)
}

/// A block's worth of guest instructions: body then `jr $31; nop`
fn block_with_tail(body: &[u32]) -> Vec<u32> {
    let mut program = body.to_vec();
    program.push(0x03E0_0008); // jr $31
    program.push(0x0000_0000); // delay slot
    program
}

#[test]
fn test_block_executes_and_reports_length() {
    // addiu $2, $0, 5; jr $31; nop
    let program = block_with_tail(&[0x2402_0005]);
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    cpu.set_reg(31, 0x8000_1000);
    let retired = cpu.run_block(&mut rec, &mut bus).unwrap();

    assert_eq!(retired, 3);
    assert_eq!(cpu.reg(2), 5);
    assert_eq!(cpu.pc(), 0x8000_1000, "jr target live after the block");
    assert_eq!(rec.compile_count(), 1);
}

#[test]
fn test_block_is_memoized() {
    let program = block_with_tail(&[0x2402_0005]);
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    for _ in 0..5 {
        cpu.set_pc(0x8000_0000);
        cpu.set_reg(31, 0x8000_1000);
        cpu.run_block(&mut rec, &mut bus).unwrap();
    }

    assert_eq!(rec.compile_count(), 1, "one translation serves every run");
}

#[test]
fn test_ram_write_invalidates_and_recompiles() {
    // The new byte's semantics must take effect after the write
    let program = block_with_tail(&[0x2402_0005]);
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    cpu.set_reg(31, 0x8000_1000);
    cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(cpu.reg(2), 5);

    // Patch the immediate: addiu $2, $0, 7
    bus.write32(0x0, 0x2402_0007).unwrap();

    cpu.set_pc(0x8000_0000);
    cpu.set_reg(31, 0x8000_1000);
    cpu.run_block(&mut rec, &mut bus).unwrap();

    assert_eq!(cpu.reg(2), 7);
    assert_eq!(rec.compile_count(), 2);
}

#[test]
fn test_byte_write_invalidates_block() {
    let program = block_with_tail(&[0x2402_0005]);
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    cpu.set_reg(31, 0x8000_1000);
    cpu.run_block(&mut rec, &mut bus).unwrap();

    // Low byte of the immediate
    bus.write8(0x0, 0x2A).unwrap();

    cpu.set_pc(0x8000_0000);
    cpu.set_reg(31, 0x8000_1000);
    cpu.run_block(&mut rec, &mut bus).unwrap();

    assert_eq!(cpu.reg(2), 0x2A);
}

#[test]
fn test_write_outside_block_keeps_it_valid() {
    let program = block_with_tail(&[0x2402_0005]);
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    cpu.set_reg(31, 0x8000_1000);
    cpu.run_block(&mut rec, &mut bus).unwrap();

    // A different page entirely
    bus.write32(0x0010_0000, 0x1234_5678).unwrap();

    cpu.set_pc(0x8000_0000);
    cpu.set_reg(31, 0x8000_1000);
    cpu.run_block(&mut rec, &mut bus).unwrap();

    assert_eq!(rec.compile_count(), 1);
}

#[test]
fn test_block_spanning_pages_registers_both() {
    // Block starts at 0xFFC and its delay slot lands on page 1
    let (mut cpu, mut bus, mut rec) = fixture(&[]);

    bus.write32(0xFFC, 0x2402_0005).unwrap(); // addiu $2, $0, 5
    bus.write32(0x1000, 0x03E0_0008).unwrap(); // jr $31
    bus.write32(0x1004, 0x0000_0000).unwrap(); // nop

    cpu.set_pc(0x8000_0FFC);
    cpu.set_reg(31, 0x8000_2000);
    cpu.run_block(&mut rec, &mut bus).unwrap();

    let index = block_table_index(0x8000_0FFC).unwrap();
    assert!(rec.cache.borrow().block_valid(index));

    // Writing the second page invalidates the whole block
    bus.write32(0x1004, 0x2402_0001).unwrap();
    assert!(!rec.cache.borrow().block_valid(index));
}

#[test]
fn test_branch_delay_scenario_matches_architecture() {
    // lui/addiu/beq/addiu/addiu: $2 must land on 3
    let program = [
        0x3C02_0000,
        0x2442_0001,
        0x1042_0001,
        0x2442_0001,
        0x2442_0001, // branch target
        0x03E0_0008, // jr $31
        0x0000_0000,
    ];
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    cpu.set_reg(31, 0x8000_1000);

    // First block ends after the beq's delay slot
    cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(cpu.reg(2), 2);
    assert_eq!(cpu.pc(), 0x8000_0010);

    // Second block carries the target instruction
    cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(cpu.reg(2), 3);
}

#[test]
fn test_interpreter_and_recompiler_agree() {
    // A mixed program: arithmetic, shifts, memory, branches
    let program = [
        0x3C01_0001, // lui   $1, 1
        0x2421_0234, // addiu $1, $1, 0x234
        0x0001_1040, // sll   $2, $1, 1
        0x0041_1821, // addu  $3, $2, $1
        0x0061_2023, // subu  $4, $3, $1
        0x0082_2824, // and   $5, $4, $2
        0x00A3_3025, // or    $6, $5, $3
        0x0043_0018, // mult  $2, $3
        0x0000_4810, // mfhi  $9
        0x0000_5012, // mflo  $10
        0xAC23_0100, // sw    $3, 0x100($1)
        0x8C2B_0100, // lw    $11, 0x100($1)
        0x1566_0002, // bne   $11, $6, +2
        0x240C_0001, // addiu $12, $0, 1
        0x240C_0002, // addiu $12, $0, 2 (fallthrough)
        0x03E0_0008, // jr    $31
        0x0000_0000,
    ];

    // Interpreter reference
    let (mut icpu, mut ibus, _) = fixture(&program);
    icpu.set_reg(31, 0x8000_2000);
    for _ in 0..program.len() {
        icpu.step(&mut ibus).unwrap();
        if icpu.pc() == 0x8000_2000 {
            break;
        }
    }

    // Recompiled execution
    let (mut rcpu, mut rbus, mut rec) = fixture(&program);
    rcpu.set_reg(31, 0x8000_2000);
    while rcpu.pc() != 0x8000_2000 {
        rcpu.run_block(&mut rec, &mut rbus).unwrap();
    }

    for reg in 0..32 {
        assert_eq!(
            icpu.reg(reg),
            rcpu.reg(reg),
            "architectural mismatch in r{}",
            reg
        );
    }
    assert_eq!(icpu.hi, rcpu.hi);
    assert_eq!(icpu.lo, rcpu.lo);
    assert_eq!(icpu.pc(), rcpu.pc());
}

#[test]
fn test_overflow_trap_aborts_block_with_precise_epc() {
    // addi overflow in the middle of a block
    let program = [
        0x3C01_7FFF, // lui  $1, 0x7FFF
        0x3421_FFFF, // ori  $1, $1, 0xFFFF
        0x2022_0001, // addi $2, $1, 1 (overflow)
        0x2403_0063, // addiu $3, $0, 99 (must not run)
        0x03E0_0008,
        0x0000_0000,
    ];
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    let retired = cpu.run_block(&mut rec, &mut bus).unwrap();

    assert_eq!(retired, 3, "count stops at the trapping instruction");
    assert_eq!(cpu.epc, 0x8000_0008);
    assert_eq!(cpu.reg(2), 0, "trapped add leaves rd alone");
    assert_eq!(cpu.reg(3), 0, "trailing ops abandoned");
    assert_eq!(cpu.pc(), 0xBFC0_0180);
}

#[test]
fn test_trap_charges_same_virtual_time_as_interpreter() {
    // A long straight-line block that faults early: the retired count
    // must match what the interpreter charges, or scheduled events
    // drift between the two paths
    let mut program = vec![0x2442_0001u32; 48]; // addiu $2, $2, 1 x48
    program[4] = 0x8C03_0001; // lw $3, 1($0): misaligned, traps
    program.push(0x03E0_0008);
    program.push(0x0000_0000);

    let (mut rcpu, mut rbus, mut rec) = fixture(&program);
    let retired = rcpu.run_block(&mut rec, &mut rbus).unwrap();
    assert_eq!(retired, 5, "four addiu plus the faulting load");

    let (mut icpu, mut ibus, _) = fixture(&program);
    let mut steps = 0;
    while icpu.pc() != 0xBFC0_0180 {
        steps += icpu.step(&mut ibus).unwrap();
    }
    assert_eq!(steps, retired);
    assert_eq!(icpu.reg(2), rcpu.reg(2));
}

#[test]
fn test_delay_slot_fault_reports_branch_address() {
    // beq taken; delay slot performs a misaligned load
    let program = [
        0x1000_0004, // beq $0, $0, +4
        0x8C01_0001, // lw $1, 1($0): misaligned
    ];
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    cpu.run_block(&mut rec, &mut bus).unwrap();

    assert_eq!(cpu.epc, 0x8000_0000, "EPC points at the branch");
    assert_ne!(cpu.cause.0 & (1 << 31), 0, "Cause.BD set");
}

#[test]
fn test_syscall_ends_block_without_delay_slot() {
    let program = [
        0x2402_0001, // addiu $2, $0, 1
        0x0000_000C, // syscall
        0x2402_0063, // addiu $2, $0, 99 (new block, not a delay slot)
    ];
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    let retired = cpu.run_block(&mut rec, &mut bus).unwrap();

    assert_eq!(retired, 2);
    assert_eq!(cpu.reg(2), 1);
    assert_eq!(cpu.epc, 0x8000_0004);
    assert_eq!(cpu.pc(), 0xBFC0_0180);
}

#[test]
fn test_conditional_branch_both_paths() {
    // bne $1, $0, +2: taken and not-taken runs of the same block
    let program = [
        0x1420_0002, // bne $1, $0, +2
        0x2402_0001, // delay: addiu $2, $0, 1
        0x2403_0001, // fallthrough: addiu $3, $0, 1
        0x2404_0001, // target: addiu $4, $0, 1
    ];

    let (mut cpu, mut bus, mut rec) = fixture(&program);

    // Not taken
    cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(cpu.pc(), 0x8000_0008);

    // Taken: same translated block, different outcome
    cpu.set_pc(0x8000_0000);
    cpu.set_reg(1, 1);
    cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(cpu.pc(), 0x8000_000C);
    assert_eq!(rec.compile_count(), 1);
}

#[test]
fn test_jal_links_return_address() {
    let program = [
        0x0C00_0080, // jal 0x200
        0x2402_0001, // delay
    ];
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    cpu.run_block(&mut rec, &mut bus).unwrap();

    assert_eq!(cpu.reg(31), 0x8000_0008);
    assert_eq!(cpu.reg(2), 1);
    assert_eq!(cpu.pc(), 0x8000_0200);
}

#[test]
fn test_long_block_splits_with_consistent_pc() {
    // More straight-line instructions than one block may hold
    let mut program = Vec::new();
    for _ in 0..MAX_BLOCK_INSTRUCTIONS + 32 {
        program.push(0x2442_0001); // addiu $2, $2, 1
    }
    program.push(0x03E0_0008);
    program.push(0x0000_0000);

    let (mut cpu, mut bus, mut rec) = fixture(&program);
    cpu.set_reg(31, 0x8000_9000);

    let first = cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(first as usize, MAX_BLOCK_INSTRUCTIONS);
    assert_eq!(
        cpu.pc() as usize,
        0x8000_0000 + 4 * MAX_BLOCK_INSTRUCTIONS,
        "seam restores the architectural pc"
    );

    cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(cpu.reg(2) as usize, MAX_BLOCK_INSTRUCTIONS + 32);
    assert_eq!(cpu.pc(), 0x8000_9000);
}

#[test]
fn test_bios_blocks_survive_ram_writes() {
    let (mut cpu, mut bus, mut rec) = fixture(&[]);

    // Plant a block in the BIOS image
    let bios = bus.bios_mut();
    bios[0..4].copy_from_slice(&0x2402_0005u32.to_le_bytes());
    bios[4..8].copy_from_slice(&0x03E0_0008u32.to_le_bytes());
    bios[8..12].copy_from_slice(&0u32.to_le_bytes());

    cpu.set_pc(0xBFC0_0000);
    cpu.set_reg(31, 0x8000_1000);
    cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(cpu.reg(2), 5);

    // RAM writes cannot touch BIOS-backed blocks
    for addr in (0..0x2000).step_by(4) {
        bus.write32(addr, 0xFFFF_FFFF).unwrap();
    }

    cpu.set_pc(0xBFC0_0000);
    cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(rec.compile_count(), 1);
}

#[test]
fn test_gte_ops_defer_to_interpreter_entry_points() {
    let program = [
        0x48C1_D000, // ctc2 $1, r26
        0x4842_D000, // cfc2 $2, r26
        0x03E0_0008,
        0x0000_0000,
    ];
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    cpu.set_reg(1, 0x789);
    cpu.set_reg(31, 0x8000_1000);
    cpu.run_block(&mut rec, &mut bus).unwrap();

    assert_eq!(cpu.reg(2), 0x789);
}

#[test]
fn test_clear_cache_forces_recompilation() {
    let program = block_with_tail(&[0x2402_0005]);
    let (mut cpu, mut bus, mut rec) = fixture(&program);

    cpu.set_reg(31, 0x8000_1000);
    cpu.run_block(&mut rec, &mut bus).unwrap();
    rec.clear_cache();

    cpu.set_pc(0x8000_0000);
    cpu.run_block(&mut rec, &mut bus).unwrap();
    assert_eq!(rec.compile_count(), 2);
}

#[test]
fn test_execution_from_unmapped_address_is_fatal() {
    let (mut cpu, mut bus, mut rec) = fixture(&[]);

    cpu.set_pc(0x1F80_0000); // scratchpad is not executable
    assert!(cpu.run_block(&mut rec, &mut bus).is_err());
}
