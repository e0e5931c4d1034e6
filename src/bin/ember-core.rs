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

//! Headless frontend: boots the core and runs frames on the recompiler,
//! reporting emulated speed. Presentation and input are left to richer
//! frontends; this binary exists for bring-up and profiling.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use ember_core::core::system::System;
use log::info;

#[derive(Parser)]
#[command(name = "ember-core")]
#[command(about = "PlayStation emulator core, headless runner")]
struct Args {
    /// Path to a 512 KiB BIOS image (e.g. SCPH1001.BIN)
    bios: PathBuf,

    /// Raw .bin disc image to mount
    #[arg(long)]
    disc: Option<PathBuf>,

    /// PSX-EXE image to side-load after boot
    #[arg(long)]
    exe: Option<PathBuf>,

    /// Number of frames to emulate
    #[arg(long, default_value_t = 600)]
    frames: u32,

    /// Frames to run before side-loading the executable
    #[arg(long, default_value_t = 60)]
    boot_frames: u32,

    /// Start host audio output
    #[cfg(feature = "audio")]
    #[arg(long)]
    audio: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();

    info!("ember-core v{}", env!("CARGO_PKG_VERSION"));

    let mut system = System::new();

    system
        .load_bios(args.bios.to_str().context("non-utf8 bios path")?)
        .context("loading BIOS")?;
    info!("BIOS loaded from {}", args.bios.display());

    if let Some(disc) = &args.disc {
        system.insert_disc(disc).context("mounting disc")?;
        info!("disc mounted from {}", disc.display());
    }

    #[cfg(feature = "audio")]
    if args.audio {
        system.enable_audio();
    }

    system.reset();

    let started = Instant::now();
    let mut loaded_exe = args.exe.is_none();

    for frame in 0..args.frames {
        if !loaded_exe && frame >= args.boot_frames {
            if let Some(exe) = &args.exe {
                system.load_exe(exe).context("side-loading executable")?;
            }
            loaded_exe = true;
        }

        system.run_frame().context("running frame")?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "{} frames in {:.2}s ({:.1} fps), {} blocks translated, pc=0x{:08X}",
        args.frames,
        elapsed,
        args.frames as f64 / elapsed,
        system.recompiled_blocks(),
        system.pc()
    );

    Ok(())
}
