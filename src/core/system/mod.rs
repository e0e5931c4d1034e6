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

//! System integration
//!
//! Ties the CPU, recompiler, bus-attached devices and the scheduler into
//! the frame loop: [`System::run_frame`] alternates between dispatching
//! recompiled blocks (whose bus traffic charges virtual time) and
//! draining expired scheduler events, which tick devices, raise
//! interrupts and, on vblank, publish the finished frame into the
//! swapchain. The interrupt line is re-sampled between blocks, so a
//! device interrupt redirects the next fetch into the exception vector.

#[cfg(feature = "audio")]
use crate::core::audio::AudioBackend;
use crate::core::audio::SampleRing;
use crate::core::cpu::recompiler::Recompiler;
use crate::core::cpu::Cpu;
use crate::core::error::{EmulatorError, Result};
use crate::core::interrupt::Interrupt;
use crate::core::loader;
use crate::core::memory::Bus;
use crate::core::scheduler::{EventMode, EventType, Ticks};
use crate::core::sio::Key;
use crate::core::video::Swapchain;
use std::path::Path;
use std::sync::Arc;

/// CPU clock: 768 cycles per 44.1 kHz audio sample
pub const CPU_FREQUENCY: Ticks = 44_100 * 768;

/// CPU cycles per 60 Hz frame
pub const CYCLES_PER_FRAME: Ticks = CPU_FREQUENCY / 60;

/// CPU cycles per SPU output sample
const SPU_TICK: Ticks = CPU_FREQUENCY / 44_100;

/// PlayStation system
///
/// # Example
/// ```no_run
/// use ember_core::core::system::System;
///
/// let mut system = System::new();
/// system.load_bios("SCPH1001.BIN").unwrap();
/// system.reset();
///
/// loop {
///     system.run_frame().unwrap();
///     system.swapchain().with_consumer(|frame| {
///         // present the 1024x512 ABGR1555 snapshot
///         let _ = frame;
///     });
/// }
/// ```
pub struct System {
    cpu: Cpu,
    recompiler: Recompiler,
    bus: Bus,

    swapchain: Arc<Swapchain>,

    #[cfg(feature = "audio")]
    audio: Option<AudioBackend>,

    frame_finished: bool,
}

impl System {
    /// Create a system with empty BIOS, no disc, devices reset
    pub fn new() -> Self {
        let bus = Bus::new();
        let recompiler = Recompiler::new(bus.block_cache());

        let mut system = Self {
            cpu: Cpu::new(),
            recompiler,
            bus,
            swapchain: Arc::new(Swapchain::new()),
            #[cfg(feature = "audio")]
            audio: None,
            frame_finished: false,
        };

        system.schedule_periodic_events();
        system
    }

    fn schedule_periodic_events(&mut self) {
        self.bus
            .scheduler
            .add(EventType::Vblank, EventMode::Periodic, CYCLES_PER_FRAME)
            .expect("vblank slot free at construction");
        self.bus
            .scheduler
            .add(EventType::Spu, EventMode::Periodic, SPU_TICK)
            .expect("spu slot free at construction");
    }

    /// Load the 512 KiB BIOS image
    pub fn load_bios(&mut self, path: &str) -> Result<()> {
        self.bus.load_bios(path)
    }

    /// Attach a disc image to the CD-ROM drive
    pub fn insert_disc(&mut self, path: &Path) -> Result<()> {
        self.bus.cdrom.insert_disc(path)
    }

    /// Side-load a PSX-EXE image: segments into RAM, registers set up
    ///
    /// Meant to be called once the BIOS has reached the shell; the
    /// interrupt mask is cleared the way the loader stub would.
    pub fn load_exe(&mut self, path: &Path) -> Result<()> {
        let data = loader::read_exe(path)?;
        let image = loader::parse_exe(&data)?;

        let ram = self.bus.ram_mut();
        let text = image.text_addr as usize;
        ram[text..text + image.text.len()].copy_from_slice(image.text);

        let bss = image.bss_addr as usize;
        ram[bss..bss + image.bss_size as usize].fill(0);

        // Side-loading bypasses the bus, so translated blocks over the
        // old contents must go
        self.recompiler.clear_cache();

        self.bus.intc.write_mask(0);

        self.cpu.set_pc(image.pc);
        self.cpu.set_reg(28, image.gp);
        self.cpu.set_reg(29, image.sp);
        self.cpu.set_reg(30, image.sp);

        log::info!(
            "loaded executable: pc=0x{:08X} text=0x{:08X}+{}",
            image.pc,
            image.text_addr,
            image.text.len()
        );

        Ok(())
    }

    /// Reset every component, as a power cycle would
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset();
        self.recompiler.clear_cache();
    }

    /// The frame handoff consumed by the host presenter
    pub fn swapchain(&self) -> Arc<Swapchain> {
        self.swapchain.clone()
    }

    /// The audio sample ring consumed by the host
    pub fn sample_ring(&self) -> Arc<SampleRing> {
        self.bus.spu.sample_ring()
    }

    /// Start host audio output over the sample ring
    #[cfg(feature = "audio")]
    pub fn enable_audio(&mut self) {
        match AudioBackend::new(self.sample_ring()) {
            Ok(backend) => self.audio = Some(backend),
            Err(e) => log::warn!("audio backend unavailable: {}", e),
        }
    }

    /// Host input: press or release a pad button
    pub fn set_key(&mut self, key: Key, pressed: bool) {
        self.bus.sio.pad.set_key(key, pressed);
    }

    /// Current program counter
    pub fn pc(&self) -> u32 {
        self.cpu.pc()
    }

    /// Total elapsed virtual time in CPU cycles
    pub fn cycles(&self) -> Ticks {
        self.bus.scheduler.current_time()
    }

    /// Blocks translated so far (diagnostics)
    pub fn recompiled_blocks(&self) -> u64 {
        self.recompiler.compile_count()
    }

    /// Execute a single instruction on the interpreter path
    ///
    /// Useful for tests and debugging; the frame loop itself dispatches
    /// recompiled blocks.
    pub fn step(&mut self) -> Result<u32> {
        self.cpu.assert_interrupt(self.bus.intc.pending());

        let retired = self.cpu.step(&mut self.bus)?;
        self.bus.scheduler.tick(retired as Ticks);
        self.bus.advance_timers(retired as Ticks);

        self.drain_events()?;
        Ok(retired)
    }

    /// Run recompiled blocks and scheduler events until vblank
    pub fn run_frame(&mut self) -> Result<()> {
        self.frame_finished = false;

        while !self.frame_finished {
            while self.bus.scheduler.next_event_target() > 0 {
                self.cpu.assert_interrupt(self.bus.intc.pending());

                let retired = self.cpu.run_block(&mut self.recompiler, &mut self.bus)?;
                self.bus.scheduler.tick(retired as Ticks);
                self.bus.advance_timers(retired as Ticks);
            }

            self.drain_events()?;
        }

        Ok(())
    }

    /// Pop and dispatch every expired scheduler event
    fn drain_events(&mut self) -> Result<()> {
        while let Some(event) = self.bus.scheduler.pop_expired() {
            match event {
                EventType::Idle => {
                    return Err(EmulatorError::Internal {
                        message: "idle event fired".into(),
                    })
                }
                EventType::Vblank => {
                    self.swapchain.publish(self.bus.gpu.vram());
                    self.bus.intc.assert_irq(Interrupt::Vblank);
                    self.frame_finished = true;
                }
                EventType::Spu => self.bus.spu.tick()?,
                EventType::CdCommand => {
                    let Bus {
                        cdrom,
                        scheduler,
                        intc,
                        ..
                    } = &mut self.bus;
                    cdrom.execute_command(scheduler, intc)?;
                }
                EventType::CdCommand2 => {
                    let Bus {
                        cdrom,
                        scheduler,
                        intc,
                        ..
                    } = &mut self.bus;
                    cdrom.execute_second_response(scheduler, intc)?;
                }
                EventType::CdSector => {
                    let interval = self.bus.cdrom.sector_interval();

                    let Bus { cdrom, intc, .. } = &mut self.bus;
                    cdrom.deliver_sector(intc)?;

                    self.bus
                        .scheduler
                        .reschedule(EventType::CdSector, interval)?;
                }
                EventType::IoAcknowledge => {
                    let Bus { sio, intc, .. } = &mut self.bus;
                    sio.complete_transfer(intc);
                }
            }
        }

        Ok(())
    }

    /// Direct bus access for integration tests and tooling
    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}
