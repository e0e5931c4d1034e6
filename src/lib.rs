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

//! PlayStation 1 emulator core library
//!
//! This library provides the core emulation components for a PlayStation 1
//! emulator: CPU (MIPS R3000A) with a block recompiler, geometry coprocessor
//! (GTE), memory bus, GPU, SPU, DMA, CD-ROM, timers and pad I/O, all driven
//! by a typed-event scheduler.
//!
//! # Example
//!
//! ```no_run
//! use ember_core::core::system::System;
//!
//! let mut system = System::new();
//! system.load_bios("SCPH1001.BIN").unwrap();
//! system.reset();
//! system.run_frame().unwrap();
//! ```

pub mod core;
