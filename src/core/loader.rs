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

//! PSX-EXE side loading
//!
//! Parses the 2 KiB executable header ("PS-X EXE" magic, entry point,
//! segment addresses and sizes, initial GP/SP) and validates every
//! segment against the 2 MiB RAM window before anything is copied.

use std::fs;
use std::path::Path;

use crate::core::error::{EmulatorError, Result};

const HEADER_SIZE: usize = 2048;
const RAM_SIZE: u32 = 2 * 1024 * 1024;

/// Parsed PSX-EXE header
#[derive(Debug, Clone, Copy)]
pub struct ExeImage<'a> {
    /// Initial program counter
    pub pc: u32,
    /// Initial global pointer (r28)
    pub gp: u32,
    /// Initial stack pointer (r29/r30), base + offset applied
    pub sp: u32,

    /// Text segment physical destination and payload
    pub text_addr: u32,
    pub text: &'a [u8],

    /// BSS region to zero
    pub bss_addr: u32,
    pub bss_size: u32,
}

/// Parse and validate an executable image
pub fn parse_exe(data: &[u8]) -> Result<ExeImage<'_>> {
    if data.len() < HEADER_SIZE {
        return Err(EmulatorError::ExeError {
            message: format!("truncated header: {} bytes", data.len()),
        });
    }

    if &data[0..8] != b"PS-X EXE" {
        return Err(EmulatorError::ExeError {
            message: "missing PS-X EXE magic".into(),
        });
    }

    let word = |offset: usize| u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());

    let pc = word(0x10);
    let gp = word(0x14);
    let text_addr = word(0x18) & 0x1FFF_FFFF;
    let text_size = word(0x1C);
    let bss_addr = word(0x28) & 0x1FFF_FFFF;
    let bss_size = word(0x2C);
    let sp_base = word(0x30);
    let sp_offset = word(0x34);

    if text_addr.saturating_add(text_size) > RAM_SIZE {
        return Err(EmulatorError::ExeError {
            message: format!(
                "text out of range: addr=0x{:08X} size={}",
                text_addr, text_size
            ),
        });
    }

    if bss_size != 0 && bss_addr.saturating_add(bss_size) > RAM_SIZE {
        return Err(EmulatorError::ExeError {
            message: format!("bss out of range: addr=0x{:08X} size={}", bss_addr, bss_size),
        });
    }

    let available = data.len() - HEADER_SIZE;
    if text_size as usize > available {
        return Err(EmulatorError::ExeError {
            message: format!(
                "text segment larger than file: {} > {}",
                text_size, available
            ),
        });
    }

    Ok(ExeImage {
        pc,
        gp,
        sp: sp_base.wrapping_add(sp_offset),
        text_addr,
        text: &data[HEADER_SIZE..HEADER_SIZE + text_size as usize],
        bss_addr,
        bss_size,
    })
}

/// Read an executable from disk
pub fn read_exe(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| EmulatorError::ExeError {
        message: format!("unable to open {}: {}", path.display(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_exe(pc: u32, text_addr: u32, text: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..8].copy_from_slice(b"PS-X EXE");
        data[0x10..0x14].copy_from_slice(&pc.to_le_bytes());
        data[0x14..0x18].copy_from_slice(&0x8000_F000u32.to_le_bytes());
        data[0x18..0x1C].copy_from_slice(&text_addr.to_le_bytes());
        data[0x1C..0x20].copy_from_slice(&(text.len() as u32).to_le_bytes());
        data[0x30..0x34].copy_from_slice(&0x8010_0000u32.to_le_bytes());
        data.extend_from_slice(text);
        data
    }

    #[test]
    fn test_parse_valid_image() {
        let exe = build_exe(0x8001_0000, 0x8001_0000, &[1, 2, 3, 4]);
        let image = parse_exe(&exe).unwrap();

        assert_eq!(image.pc, 0x8001_0000);
        assert_eq!(image.gp, 0x8000_F000);
        assert_eq!(image.sp, 0x8010_0000);
        assert_eq!(image.text_addr, 0x0001_0000);
        assert_eq!(image.text, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_missing_magic() {
        let mut exe = build_exe(0, 0, &[]);
        exe[0] = b'X';
        assert!(parse_exe(&exe).is_err());
    }

    #[test]
    fn test_truncated_header() {
        assert!(parse_exe(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_text_out_of_ram() {
        let exe = build_exe(0, 0x001F_FFF0, &[0u8; 64]);
        assert!(parse_exe(&exe).is_err());
    }

    #[test]
    fn test_text_larger_than_file() {
        let mut exe = build_exe(0, 0, &[0u8; 16]);
        // Claim more text than the file carries
        exe[0x1C..0x20].copy_from_slice(&1024u32.to_le_bytes());
        assert!(parse_exe(&exe).is_err());
    }
}
