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

//! Disc image backends
//!
//! Discs deliver raw 2352-byte sectors. Sector indexing is absolute:
//! the first 150 sectors are the pre-gap and do not exist in `.bin`
//! images, so image offsets start at sector 150.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::core::error::{EmulatorError, Result};

/// Raw sector size in bytes
pub const SECTOR_SIZE: usize = 2352;

/// Sectors of lead-in pre-gap absent from image files
pub const PREGAP_SECTORS: usize = 150;

/// A raw-sector disc source
pub trait Disc {
    /// Read the absolute sector `sector` into `buffer`
    fn read_sector(&mut self, buffer: &mut [u8; SECTOR_SIZE], sector: usize) -> Result<()>;
}

/// Raw `.bin` track image
pub struct BinDisc {
    file: File,
}

impl BinDisc {
    /// Open a raw image; the file handle lives as long as the disc
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| EmulatorError::DiscError {
            message: format!("unable to open {}: {}", path.display(), e),
        })?;

        Ok(Self { file })
    }
}

impl Disc for BinDisc {
    fn read_sector(&mut self, buffer: &mut [u8; SECTOR_SIZE], sector: usize) -> Result<()> {
        if sector < PREGAP_SECTORS {
            return Err(EmulatorError::DiscError {
                message: format!("attempt to read pre-gap sector {}", sector),
            });
        }

        let offset = (SECTOR_SIZE * (sector - PREGAP_SECTORS)) as u64;

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buffer)?;

        Ok(())
    }
}

/// Open a disc image by file extension
pub fn open_disc(path: &Path) -> Result<Box<dyn Disc>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("bin") => Ok(Box::new(BinDisc::open(path)?)),
        other => Err(EmulatorError::DiscError {
            message: format!("unsupported disc format {:?}", other),
        }),
    }
}
