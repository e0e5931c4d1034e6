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

//! Core emulation components
//!
//! This module contains all hardware emulation components:
//! - CPU (MIPS R3000A) with interpreter and block recompiler
//! - Geometry coprocessor (GTE)
//! - Memory bus
//! - GPU (Graphics Processing Unit)
//! - SPU (Sound Processing Unit)
//! - CD-ROM (Disc drive)
//! - DMA (Direct Memory Access)
//! - Serial pad I/O (Controller)
//! - Timer (3 timer/counter channels)
//! - Interrupt Controller (IRQ management)
//! - Scheduler (Global timing and event scheduling)
//! - System integration

pub mod audio;
pub mod cdrom;
pub mod cpu;
pub mod dma;
pub mod error;
pub mod gpu;
pub mod gte;
pub mod interrupt;
pub mod loader;
pub mod memory;
pub mod scheduler;
pub mod sio;
pub mod spu;
pub mod system;
pub mod timer;
pub mod video;

// Re-export commonly used types
pub use cdrom::Cdrom;
pub use cpu::Cpu;
pub use dma::Dma;
pub use error::{EmulatorError, Result};
pub use gpu::Gpu;
pub use gte::Gte;
pub use interrupt::InterruptController;
pub use memory::Bus;
pub use scheduler::Scheduler;
pub use sio::Sio;
pub use spu::Spu;
pub use system::System;
pub use timer::Timers;
