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

use super::*;

/// Open the full drawing area and zero the drawing offset
fn open_drawing_area(gpu: &mut Gpu) {
    gpu.gp0(0xE3 << 24).unwrap();
    gpu.gp0((0xE4 << 24) | 1023 | (511 << 10)).unwrap();
    gpu.gp0(0xE5 << 24).unwrap();
}

fn pixel(gpu: &Gpu, x: u32, y: u32) -> u16 {
    gpu.vram()[VRAM_WIDTH * y as usize + x as usize]
}

#[test]
fn test_gpustat_top_bit_toggles_on_read() {
    let mut gpu = Gpu::new();

    let first = gpu.gpustat();
    let second = gpu.gpustat();

    assert_ne!(first & 0x8000_0000, second & 0x8000_0000);
    assert_eq!(first & 0x8000_0000, gpu.gpustat() & 0x8000_0000);
}

#[test]
fn test_gpustat_ready_latches() {
    let mut gpu = Gpu::new();
    let stat = gpu.gpustat();

    // DMA request, command ready, VRAM read ready, DMA block ready
    assert_eq!(stat & 0x1E00_0000, 0x1E00_0000);
}

#[test]
fn test_gpustat_reflects_texpage() {
    let mut gpu = Gpu::new();

    // E1: texture page (5, 1), dithering on
    gpu.gp0((0xE1 << 24) | 0x215).unwrap();

    let stat = gpu.gpustat();
    assert_eq!(stat & 0x7FF, 0x215);
}

#[test]
fn test_state_registers_read_back_through_gpuread() {
    let mut gpu = Gpu::new();

    gpu.gp0((0xE2 << 24) | 0x12345).unwrap();
    gpu.gp1((0x10 << 24) | 0x2).unwrap();
    assert_eq!(gpu.gpu_read(), 0x12345);

    gpu.gp0((0xE5 << 24) | 0x1001).unwrap();
    gpu.gp1((0x10 << 24) | 0x5).unwrap();
    assert_eq!(gpu.gpu_read(), 0x1001);
}

#[test]
fn test_fill_rectangle() {
    let mut gpu = Gpu::new();
    open_drawing_area(&mut gpu);

    // Solid red 32x16 block at (32, 8)
    gpu.gp0((0x02 << 24) | 0x0000FF).unwrap();
    gpu.gp0(32 | (8 << 16)).unwrap();
    gpu.gp0(32 | (16 << 16)).unwrap();

    assert_eq!(pixel(&gpu, 32, 8), 0x001F);
    assert_eq!(pixel(&gpu, 63, 23), 0x001F);
    assert_eq!(pixel(&gpu, 64, 8), 0);
    assert_eq!(pixel(&gpu, 32, 24), 0);
}

#[test]
fn test_fill_rectangle_clips_on_origin() {
    let mut gpu = Gpu::new();

    // Drawing area restricted to x >= 64; a fill anchored left of it
    // is culled whole
    gpu.gp0((0xE3 << 24) | 64).unwrap();
    gpu.gp0((0xE4 << 24) | 1023 | (511 << 10)).unwrap();
    gpu.gp0(0xE5 << 24).unwrap();

    gpu.gp0((0x02 << 24) | 0x0000FF).unwrap();
    gpu.gp0(32 | (8 << 16)).unwrap();
    gpu.gp0(32 | (16 << 16)).unwrap();

    assert_eq!(pixel(&gpu, 32, 8), 0);
    assert_eq!(pixel(&gpu, 63, 8), 0);

    // Anchored inside the area, the fill lands
    gpu.gp0((0x02 << 24) | 0x0000FF).unwrap();
    gpu.gp0(64 | (8 << 16)).unwrap();
    gpu.gp0(16 | (1 << 16)).unwrap();

    assert_eq!(pixel(&gpu, 64, 8), 0x001F);
}

#[test]
fn test_vram_write_then_read_roundtrip() {
    let mut gpu = Gpu::new();

    // CPU->VRAM: 4x2 rectangle at (16, 16)
    gpu.gp0(0xA0 << 24).unwrap();
    gpu.gp0(16 | (16 << 16)).unwrap();
    gpu.gp0(4 | (2 << 16)).unwrap();

    let words = [0x2222_1111u32, 0x4444_3333, 0x6666_5555, 0x8888_7777];
    for word in words {
        gpu.gp0(word).unwrap();
    }

    assert_eq!(pixel(&gpu, 16, 16), 0x1111);
    assert_eq!(pixel(&gpu, 19, 16), 0x4444);
    assert_eq!(pixel(&gpu, 16, 17), 0x5555);
    assert_eq!(pixel(&gpu, 19, 17), 0x8888);

    // VRAM->CPU of the same rectangle returns the same pixels
    gpu.gp0(0xC0 << 24).unwrap();
    gpu.gp0(16 | (16 << 16)).unwrap();
    gpu.gp0(4 | (2 << 16)).unwrap();

    for word in words {
        assert_eq!(gpu.gpu_read(), word);
    }
}

#[test]
fn test_write_transfer_returns_to_fifo_mode() {
    let mut gpu = Gpu::new();

    gpu.gp0(0xA0 << 24).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp0(2 | (1 << 16)).unwrap();

    gpu.gp0(0xBBBB_AAAA).unwrap();

    // Transfer complete: the next word is a command again
    gpu.gp0((0xE6 << 24) | 0x3).unwrap();
    let stat = gpu.gpustat();
    assert_eq!((stat >> 11) & 0x3, 0x3);
}

#[test]
fn test_transfer_size_wraps_to_full_extent() {
    let mut gpu = Gpu::new();

    // Size 0 means the maximum 1024x512 extent
    gpu.gp0(0xA0 << 24).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp0(0).unwrap();

    assert_eq!(gpu.transfer.w, 1024);
    assert_eq!(gpu.transfer.h, 512);
    assert_eq!(gpu.transfer.mode, TransferMode::Write);
}

#[test]
fn test_overlapping_transfer_is_fatal() {
    let mut gpu = Gpu::new();

    gpu.gp0(0xC0 << 24).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp0(4 | (4 << 16)).unwrap();

    // A second transfer while the first is still draining
    gpu.gp0(0xC0 << 24).unwrap();
    gpu.gp0(0).unwrap();
    assert!(gpu.gp0(4 | (4 << 16)).is_err());
}

#[test]
fn test_vram_to_vram_copy() {
    let mut gpu = Gpu::new();

    gpu.gp0(0xA0 << 24).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp0(2 | (2 << 16)).unwrap();
    gpu.gp0(0x2222_1111).unwrap();
    gpu.gp0(0x4444_3333).unwrap();

    // Copy the 2x2 block from (0,0) to (100, 200)
    gpu.gp0(0x80 << 24).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp0(100 | (200 << 16)).unwrap();
    gpu.gp0(2 | (2 << 16)).unwrap();

    assert_eq!(pixel(&gpu, 100, 200), 0x1111);
    assert_eq!(pixel(&gpu, 101, 200), 0x2222);
    assert_eq!(pixel(&gpu, 100, 201), 0x3333);
    assert_eq!(pixel(&gpu, 101, 201), 0x4444);
}

#[test]
fn test_monochrome_triangle() {
    let mut gpu = Gpu::new();
    open_drawing_area(&mut gpu);

    // Red right triangle: (0,0), (10,0), (0,10)
    gpu.gp0((0x20 << 24) | 0x0000FF).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp0(10).unwrap();
    gpu.gp0(10 << 16).unwrap();

    assert_eq!(pixel(&gpu, 0, 0), 0x001F);
    assert_eq!(pixel(&gpu, 1, 1), 0x001F);
    assert_eq!(pixel(&gpu, 9, 1), 0x001F);
    assert_eq!(pixel(&gpu, 20, 20), 0);
}

#[test]
fn test_monochrome_quad_covers_rectangle() {
    let mut gpu = Gpu::new();
    open_drawing_area(&mut gpu);

    // Green 8x8 quad at (4,4): vertex order top-left, top-right,
    // bottom-left, bottom-right
    gpu.gp0((0x28 << 24) | 0x00FF00).unwrap();
    gpu.gp0(4 | (4 << 16)).unwrap();
    gpu.gp0(12 | (4 << 16)).unwrap();
    gpu.gp0(4 | (12 << 16)).unwrap();
    gpu.gp0(12 | (12 << 16)).unwrap();

    assert_eq!(pixel(&gpu, 5, 5), 0x03E0);
    assert_eq!(pixel(&gpu, 11, 11), 0x03E0);
    assert_eq!(pixel(&gpu, 8, 8), 0x03E0);
    assert_eq!(pixel(&gpu, 13, 5), 0);
}

#[test]
fn test_triangle_clipped_by_drawing_area() {
    let mut gpu = Gpu::new();

    // Drawing area restricted to x >= 8
    gpu.gp0((0xE3 << 24) | 8).unwrap();
    gpu.gp0((0xE4 << 24) | 1023 | (511 << 10)).unwrap();
    gpu.gp0(0xE5 << 24).unwrap();

    gpu.gp0((0x20 << 24) | 0x0000FF).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp0(16).unwrap();
    gpu.gp0(16 << 16).unwrap();

    assert_eq!(pixel(&gpu, 2, 1), 0);
    assert_eq!(pixel(&gpu, 9, 1), 0x001F);
}

#[test]
fn test_drawing_offset_applies_to_polygons() {
    let mut gpu = Gpu::new();
    open_drawing_area(&mut gpu);

    // Offset (100, 50)
    gpu.gp0((0xE5 << 24) | 100 | (50 << 11)).unwrap();

    gpu.gp0((0x20 << 24) | 0x0000FF).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp0(8).unwrap();
    gpu.gp0(8 << 16).unwrap();

    assert_eq!(pixel(&gpu, 0, 0), 0);
    assert_eq!(pixel(&gpu, 101, 51), 0x001F);
}

#[test]
fn test_monochrome_rectangle_command() {
    let mut gpu = Gpu::new();
    open_drawing_area(&mut gpu);

    // Blue 3x2 rectangle at (10, 20)
    gpu.gp0((0x60 << 24) | 0xFF0000).unwrap();
    gpu.gp0(10 | (20 << 16)).unwrap();
    gpu.gp0(3 | (2 << 16)).unwrap();

    assert_eq!(pixel(&gpu, 10, 20), 0x7C00);
    assert_eq!(pixel(&gpu, 12, 21), 0x7C00);
    assert_eq!(pixel(&gpu, 13, 20), 0);
}

#[test]
fn test_textured_rectangle_with_clut() {
    let mut gpu = Gpu::new();
    open_drawing_area(&mut gpu);

    // Palette at (0, 480): entry 1 = magenta
    gpu.gp0(0xA0 << 24).unwrap();
    gpu.gp0(480 << 16).unwrap();
    gpu.gp0(2 | (1 << 16)).unwrap();
    gpu.gp0(0x7C1F_0000).unwrap();

    // 4bpp texture data at page (0,0), texel row 0x1111 (all index 1)
    gpu.gp0(0xA0 << 24).unwrap();
    gpu.gp0(64 << 16).unwrap();
    gpu.gp0(2 | (1 << 16)).unwrap();
    gpu.gp0(0x1111_1111).unwrap();

    // Bind texture page 0 in 4bpp mode; v base 64 within the page
    gpu.gp0(0xE1 << 24).unwrap();

    gpu.gp0((0x64 << 24) | 0x808080).unwrap();
    gpu.gp0(200 | (100 << 16)).unwrap();
    gpu.gp0((64 << 8) | (480 << 22)).unwrap();
    gpu.gp0(4 | (1 << 16)).unwrap();

    assert_eq!(pixel(&gpu, 200, 100), 0x7C1F);
    assert_eq!(pixel(&gpu, 203, 100), 0x7C1F);
}

#[test]
fn test_shaded_triangle_interpolates() {
    let mut gpu = Gpu::new();
    open_drawing_area(&mut gpu);

    // Red at the left vertex, black at the others
    gpu.gp0((0x30 << 24) | 0x0000FF).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp0(0).unwrap(); // black
    gpu.gp0(64).unwrap();
    gpu.gp0(0).unwrap(); // black
    gpu.gp0(64 << 16).unwrap();

    let left = pixel(&gpu, 1, 1) & 0x1F;
    let right = pixel(&gpu, 40, 1) & 0x1F;
    assert!(left > right, "red fades towards the unlit vertices");
}

#[test]
fn test_gp1_reset_clears_pending_command() {
    let mut gpu = Gpu::new();

    // Half-sent triangle, then GP1 FIFO clear
    gpu.gp0((0x20 << 24) | 0x0000FF).unwrap();
    gpu.gp0(0).unwrap();
    gpu.gp1(0x01 << 24).unwrap();

    // The next word starts a fresh command instead of completing the old
    gpu.gp0((0xE6 << 24) | 0x1).unwrap();
    assert_eq!((gpu.gpustat() >> 11) & 0x3, 0x1);
}

#[test]
fn test_unknown_commands_are_fatal() {
    let mut gpu = Gpu::new();
    assert!(gpu.gp0(0x5B << 24).is_err());
    assert!(gpu.gp1(0x20 << 24).is_err());
}
