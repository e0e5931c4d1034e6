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

//! Cross-component scenarios: the same guest programs executed through
//! the interpreter and the recompiler, driving real bus devices.

mod common;

use common::asm::*;
use common::Harness;

/// The branch-delay contract: the delay slot commits exactly once
fn branch_delay_program() -> Vec<u32> {
    vec![
        lui(2, 0),
        addiu(2, 2, 1),
        beq(2, 2, 1),
        addiu(2, 2, 1), // delay slot
        addiu(2, 2, 1), // branch target
        jr(31),
        nop(),
    ]
}

#[test]
fn branch_delay_scenario_on_interpreter() {
    let mut h = Harness::new(0x1000, &branch_delay_program());
    h.interpret_until(0x8000_8000, 64);
    assert_eq!(h.cpu.reg(2), 3);
}

#[test]
fn branch_delay_scenario_on_recompiler() {
    let mut h = Harness::new(0x1000, &branch_delay_program());
    h.recompile_until(0x8000_8000, 64);
    assert_eq!(h.cpu.reg(2), 3);
}

#[test]
fn overflow_scenario_traps_on_both_paths() {
    let program = vec![
        addi(3, 0, 0x7FFF),
        sll(3, 3, 16),
        addi(4, 3, 0x7FFF),
        add(3, 3, 4),
    ];

    let mut interp = Harness::new(0x1000, &program);
    interp.interpret_until(0xBFC0_0180, 16);
    assert_eq!(interp.cpu.reg(3), 0x7FFF_0000);

    let mut recomp = Harness::new(0x1000, &program);
    recomp.recompile_until(0xBFC0_0180, 16);
    assert_eq!(recomp.cpu.reg(3), 0x7FFF_0000);
}

#[test]
fn store_program_drives_gpu_port() {
    // The guest writes GP0 commands through the bus: a texture page
    // bind whose bits come back out of GPUSTAT
    let program = vec![
        lui(1, 0x1F80),
        ori(1, 1, 0x1810),
        lui(2, 0xE100),
        ori(2, 2, 0x001D),
        sw(2, 1, 0),
        jr(31),
        nop(),
    ];

    let mut h = Harness::new(0x1000, &program);
    h.recompile_until(0x8000_8000, 16);

    assert_eq!(h.bus.gpu.gpustat() & 0x7FF, 0x1D);
}

#[test]
fn store_program_round_trips_ram() {
    let program = vec![
        lui(1, 0x0001),      // $1 = 0x10000
        lui(2, 0x1234),
        ori(2, 2, 0x5678),
        sw(2, 1, 0x40),
        lw(3, 1, 0x40),
        jr(31),
        nop(),
    ];

    let mut h = Harness::new(0x1000, &program);
    h.recompile_until(0x8000_8000, 16);

    assert_eq!(h.cpu.reg(3), 0x1234_5678);
    assert_eq!(h.bus.read32(0x0001_0040).unwrap(), 0x1234_5678);
}

#[test]
fn self_modifying_code_recompiles() {
    // The guest patches its own second instruction, jumps back, and the
    // recompiler must observe the new immediate
    let target = 0x2000u32;
    let program = vec![
        // Pass 1 result: $2 = 5
        addiu(2, 0, 5),
        jr(31),
        nop(),
    ];

    let mut h = Harness::new(target, &program);
    h.recompile_until(0x8000_8000, 8);
    assert_eq!(h.cpu.reg(2), 5);
    let before = h.recompiler.compile_count();

    // Guest-style patch via a store program at another address
    let patcher = vec![
        lui(1, 0),
        ori(1, 1, target),
        lui(2, (addiu(2, 0, 9) >> 16) & 0xFFFF),
        ori(2, 2, addiu(2, 0, 9) & 0xFFFF),
        sw(2, 1, 0),
        jr(31),
        nop(),
    ];
    for (n, word) in patcher.iter().enumerate() {
        h.bus.write32(0x3000 + n as u32 * 4, *word).unwrap();
    }

    h.cpu.set_pc(0x8000_3000);
    h.cpu.set_reg(31, 0x8000_8000);
    h.recompile_until(0x8000_8000, 8);

    h.cpu.set_pc(0x8000_0000 | target);
    h.cpu.set_reg(31, 0x8000_8000);
    h.recompile_until(0x8000_8000, 8);

    assert_eq!(h.cpu.reg(2), 9, "patched immediate takes effect");
    assert!(h.recompiler.compile_count() > before + 1);
}

#[test]
fn byte_store_invalidates_translated_code() {
    let target = 0x2000u32;
    let program = vec![addiu(2, 0, 5), jr(31), nop()];

    let mut h = Harness::new(target, &program);
    h.recompile_until(0x8000_8000, 8);

    // sb of the low immediate byte through a guest store program
    let patcher = vec![
        ori(1, 0, target),
        ori(2, 0, 0x5A),
        sb(2, 1, 0),
        jr(31),
        nop(),
    ];
    for (n, word) in patcher.iter().enumerate() {
        h.bus.write32(0x3000 + n as u32 * 4, *word).unwrap();
    }
    h.cpu.set_pc(0x8000_3000);
    h.cpu.set_reg(31, 0x8000_8000);
    h.recompile_until(0x8000_8000, 8);

    h.cpu.set_pc(0x8000_0000 | target);
    h.cpu.set_reg(31, 0x8000_8000);
    h.recompile_until(0x8000_8000, 8);

    assert_eq!(h.cpu.reg(2), 0x5A);
}

#[test]
fn interpreter_and_recompiler_agree_on_arithmetic_suite() {
    // A spread of register values through the ALU, compared lane by lane
    let mut program = Vec::new();
    for n in 1..8 {
        program.push(addiu(n, 0, (n as i32) * 1237 - 4000));
    }
    program.push(add(8, 1, 2));
    program.push(addu(9, 3, 4));
    program.push(sll(10, 5, 7));
    program.push(ori(11, 6, 0xFFF));
    program.push(jr(31));
    program.push(nop());

    let mut interp = Harness::new(0x1000, &program);
    interp.interpret_until(0x8000_8000, 64);

    let mut recomp = Harness::new(0x1000, &program);
    recomp.recompile_until(0x8000_8000, 64);

    for reg in 0..32 {
        assert_eq!(interp.cpu.reg(reg), recomp.cpu.reg(reg), "r{}", reg);
    }
}

#[test]
fn full_system_boots_an_idle_bios_loop() {
    use ember_core::core::system::{System, CYCLES_PER_FRAME};

    let mut system = System::new();

    // j 0xBFC00000; nop at the reset vector, via a temp BIOS image
    let mut bios = vec![0u8; 512 * 1024];
    bios[0..4].copy_from_slice(&0x0BF0_0000u32.to_le_bytes());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bios.bin");
    std::fs::write(&path, &bios).unwrap();

    system.load_bios(path.to_str().unwrap()).unwrap();
    system.run_frame().unwrap();

    assert!(system.cycles() >= CYCLES_PER_FRAME);

    // Vblank published a frame to the host swapchain
    system.swapchain().with_consumer(|frame| {
        assert_eq!(frame.len(), 1024 * 512);
    });
}
