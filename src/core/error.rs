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

//! Emulator error types
//!
//! Fatal errors unwind the core to the host entry point; there is no
//! partial-execution recovery. Guest-observable traps (alignment,
//! overflow, syscall, break, interrupts) never surface here - they go
//! through the CPU exception protocol instead.

use std::fmt;

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Emulator error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    /// Unaligned memory access error
    UnalignedAccess {
        /// The address that was accessed
        address: u32,
        /// The size of the access (2 for 16-bit, 4 for 32-bit)
        size: u32,
    },

    /// Invalid memory access (unmapped region)
    InvalidAddress {
        /// The address that was accessed
        address: u32,
    },

    /// Read from or write to a register a device does not implement
    UnknownRegister {
        /// Device name (e.g. "spu", "cdrom")
        unit: &'static str,
        /// The register address that was accessed
        address: u32,
    },

    /// Command byte a device does not recognize
    UnknownCommand {
        /// Device name (e.g. "gp0", "cdrom")
        unit: &'static str,
        /// The offending command byte
        opcode: u8,
    },

    /// A bounded FIFO was pushed while full
    FifoOverflow {
        /// Owning subsystem
        unit: &'static str,
    },

    /// A bounded FIFO was popped while empty
    FifoUnderflow {
        /// Owning subsystem
        unit: &'static str,
    },

    /// A scheduler slot was armed while already active, or removed while idle
    EventSlotMisuse {
        /// Event slot name
        event: &'static str,
        /// Whether the slot was active at the time of the misuse
        active: bool,
    },

    /// Invalid GTE operand selector (the reserved matrix/vector encodings)
    InvalidGteSelector {
        /// Which selector field was invalid
        selector: &'static str,
    },

    /// Internal inconsistency with no dedicated variant
    Internal {
        /// Diagnostic message identifying the subsystem and state
        message: String,
    },

    /// I/O error (file operations)
    IoError {
        /// Error message
        message: String,
    },

    /// BIOS file error
    BiosError {
        /// Error message
        message: String,
    },

    /// BIOS has an unexpected size
    InvalidBiosSize {
        /// Expected size in bytes
        expected: usize,
        /// Actual size in bytes
        got: usize,
    },

    /// Disc image error
    DiscError {
        /// Error message
        message: String,
    },

    /// Executable image error
    ExeError {
        /// Error message
        message: String,
    },
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorError::UnalignedAccess { address, size } => {
                write!(
                    f,
                    "Unaligned {}-bit access at address 0x{:08X}",
                    size * 8,
                    address
                )
            }
            EmulatorError::InvalidAddress { address } => {
                write!(f, "Invalid memory access at address 0x{:08X}", address)
            }
            EmulatorError::UnknownRegister { unit, address } => {
                write!(f, "Unknown {} register at 0x{:08X}", unit, address)
            }
            EmulatorError::UnknownCommand { unit, opcode } => {
                write!(f, "Unknown {} command 0x{:02X}", unit, opcode)
            }
            EmulatorError::FifoOverflow { unit } => {
                write!(f, "{} FIFO overflow", unit)
            }
            EmulatorError::FifoUnderflow { unit } => {
                write!(f, "{} FIFO underflow", unit)
            }
            EmulatorError::EventSlotMisuse { event, active } => {
                if *active {
                    write!(f, "Scheduler slot '{}' armed while active", event)
                } else {
                    write!(f, "Scheduler slot '{}' used while inactive", event)
                }
            }
            EmulatorError::InvalidGteSelector { selector } => {
                write!(f, "Invalid GTE {} selector", selector)
            }
            EmulatorError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
            EmulatorError::IoError { message } => {
                write!(f, "I/O error: {}", message)
            }
            EmulatorError::BiosError { message } => {
                write!(f, "BIOS error: {}", message)
            }
            EmulatorError::InvalidBiosSize { expected, got } => {
                write!(
                    f,
                    "Invalid BIOS size: expected {} bytes, got {} bytes",
                    expected, got
                )
            }
            EmulatorError::DiscError { message } => {
                write!(f, "Disc error: {}", message)
            }
            EmulatorError::ExeError { message } => {
                write!(f, "Executable error: {}", message)
            }
        }
    }
}

impl std::error::Error for EmulatorError {}

impl From<std::io::Error> for EmulatorError {
    fn from(err: std::io::Error) -> Self {
        EmulatorError::IoError {
            message: err.to_string(),
        }
    }
}
