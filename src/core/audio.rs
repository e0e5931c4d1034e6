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

//! Audio output path
//!
//! The SPU produces interleaved stereo i16 samples at 44.1 kHz into a
//! single-producer / single-consumer lock-free ring; the host consumer
//! (the optional cpal backend, or anything else draining the ring)
//! reads from the other end. Neither side blocks: enqueue and dequeue
//! clip to the space or data available and report the count actually
//! moved, so an underrun is observable as a short read, never a stall.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Ring capacity in samples (must stay a power of two)
pub const RING_CAPACITY: usize = 8192;

/// Lock-free single-producer / single-consumer sample ring
///
/// One slot is kept free to distinguish full from empty, so the usable
/// capacity is `RING_CAPACITY - 1` samples.
pub struct SampleRing {
    buffer: Box<[std::cell::UnsafeCell<i16>]>,
    read: AtomicUsize,
    write: AtomicUsize,
}

// The UnsafeCell slots are only written by the producer between the
// cursors it owns and only read by the consumer symmetrically; the
// atomic cursors publish them with acquire/release ordering.
unsafe impl Sync for SampleRing {}
unsafe impl Send for SampleRing {}

impl SampleRing {
    pub fn new() -> Arc<Self> {
        debug_assert!(RING_CAPACITY.is_power_of_two());

        let buffer = (0..RING_CAPACITY)
            .map(|_| std::cell::UnsafeCell::new(0))
            .collect();

        Arc::new(Self {
            buffer,
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        })
    }

    /// Samples currently queued
    pub fn len(&self) -> usize {
        self.write
            .load(Ordering::Acquire)
            .wrapping_sub(self.read.load(Ordering::Acquire))
            & (RING_CAPACITY - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free space in samples
    pub fn available(&self) -> usize {
        RING_CAPACITY - self.len() - 1
    }

    /// Producer side: store as many samples as fit, returning the count
    pub fn enqueue(&self, data: &[i16]) -> usize {
        let count = data.len().min(self.available());
        let write = self.write.load(Ordering::Relaxed);

        for (n, &sample) in data[..count].iter().enumerate() {
            let slot = (write + n) & (RING_CAPACITY - 1);
            unsafe { *self.buffer[slot].get() = sample };
        }

        self.write
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// Consumer side: fill as much of `data` as queued, returning the count
    pub fn dequeue(&self, data: &mut [i16]) -> usize {
        let count = data.len().min(self.len());
        let read = self.read.load(Ordering::Relaxed);

        for (n, slot) in data[..count].iter_mut().enumerate() {
            let index = (read + n) & (RING_CAPACITY - 1);
            *slot = unsafe { *self.buffer[index].get() };
        }

        self.read.store(read.wrapping_add(count), Ordering::Release);
        count
    }
}

/// Host audio output through cpal
///
/// Opens the default output device and drains the sample ring from the
/// stream callback; an empty ring plays silence.
#[cfg(feature = "audio")]
pub struct AudioBackend {
    #[allow(dead_code)]
    stream: cpal::Stream,
}

#[cfg(feature = "audio")]
impl AudioBackend {
    /// Start playback over the given ring
    pub fn new(ring: Arc<SampleRing>) -> Result<Self, Box<dyn std::error::Error>> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or("no audio output device available")?;

        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        if channels != 2 {
            return Err(format!(
                "audio backend requires stereo output, device has {} channels",
                channels
            )
            .into());
        }

        if sample_rate != 44_100 {
            log::warn!(
                "audio device runs at {} Hz (expected 44100); timing will drift",
                sample_rate
            );
        }

        log::info!(
            "audio: {} at {} Hz",
            device.name().unwrap_or_else(|_| "unknown".into()),
            sample_rate
        );

        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut staging = [0i16; 512];

                let mut cursor = 0;
                while cursor < data.len() {
                    let want = (data.len() - cursor).min(staging.len());
                    let got = ring.dequeue(&mut staging[..want]);

                    for n in 0..want {
                        // Underruns play out as silence
                        let sample = if n < got { staging[n] } else { 0 };
                        data[cursor + n] = sample as f32 / 32768.0;
                    }

                    cursor += want;
                }
            },
            |err| log::error!("audio stream error: {}", err),
            None,
        )?;

        stream.play()?;

        Ok(Self { stream })
    }
}
