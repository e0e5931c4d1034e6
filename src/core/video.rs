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

//! Frame swapchain
//!
//! Two VRAM-sized buffers presented alternately to the host. On each
//! vblank the core publishes a complete VRAM snapshot and flips the
//! buffer index under the mutex; the host reads the non-producer buffer
//! under the same mutex through [`Swapchain::with_consumer`], which
//! blocks publication for the duration of the callback. A slow consumer
//! therefore delays the producer instead of tearing the frame.

use std::sync::Mutex;

use crate::core::gpu::{VRAM_HEIGHT, VRAM_WIDTH};

/// Cells per published frame (1024 x 512, ABGR1555)
pub const FRAME_CELLS: usize = VRAM_WIDTH * VRAM_HEIGHT;

struct Buffers {
    frames: [Box<[u16]>; 2],
    /// Index of the producer-side buffer
    index: usize,
}

/// Double-buffered frame handoff between the core and the host
pub struct Swapchain {
    buffers: Mutex<Buffers>,
}

impl Swapchain {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Buffers {
                frames: [
                    vec![0u16; FRAME_CELLS].into_boxed_slice(),
                    vec![0u16; FRAME_CELLS].into_boxed_slice(),
                ],
                index: 0,
            }),
        }
    }

    /// Producer side: copy a finished frame in and flip the buffers
    pub fn publish(&self, frame: &[u16]) {
        let mut buffers = self.buffers.lock().unwrap();

        let index = buffers.index;
        buffers.frames[index].copy_from_slice(frame);
        buffers.index = 1 - index;
    }

    /// Consumer side: borrow the most recently published frame
    ///
    /// The producer cannot flip while the callback runs.
    pub fn with_consumer<R>(&self, f: impl FnOnce(&[u16]) -> R) -> R {
        let buffers = self.buffers.lock().unwrap();
        f(&buffers.frames[1 - buffers.index])
    }
}

impl Default for Swapchain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_consumer_sees_latest_published_frame() {
        let swapchain = Swapchain::new();

        let mut frame = vec![0u16; FRAME_CELLS];
        frame[0] = 0x1234;
        swapchain.publish(&frame);

        swapchain.with_consumer(|consumed| {
            assert_eq!(consumed[0], 0x1234);
        });

        frame[0] = 0x5678;
        swapchain.publish(&frame);

        swapchain.with_consumer(|consumed| {
            assert_eq!(consumed[0], 0x5678);
        });
    }

    #[test]
    fn test_unpublished_frame_stays_hidden() {
        let swapchain = Swapchain::new();

        let mut frame = vec![0u16; FRAME_CELLS];
        frame[100] = 0xAAAA;
        swapchain.publish(&frame);

        frame[100] = 0xBBBB;
        swapchain.publish(&frame);

        // Two publishes: the consumer sees the second, not a mix
        swapchain.with_consumer(|consumed| {
            assert_eq!(consumed[100], 0xBBBB);
        });
    }

    #[test]
    fn test_cross_thread_publication() {
        let swapchain = Arc::new(Swapchain::new());
        let producer_chain = swapchain.clone();

        let producer = std::thread::spawn(move || {
            let mut frame = vec![0u16; FRAME_CELLS];
            for n in 1..=32u16 {
                frame.fill(n);
                producer_chain.publish(&frame);
            }
        });

        // Frames are always internally consistent
        for _ in 0..100 {
            swapchain.with_consumer(|consumed| {
                let first = consumed[0];
                assert!(consumed.iter().all(|&cell| cell == first));
            });
        }

        producer.join().unwrap();
    }
}
