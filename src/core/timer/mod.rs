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

//! Timer block (3 timer/counter channels)
//!
//! Each timer has a 16-bit counter, a mode register and a target.
//! Writing the mode register resets the counter and prescaler and
//! re-arms the internal IRQ latch. Reaching the target (or wrapping
//! through zero) with the matching IRQ enable raises the timer's
//! interrupt in pulse or toggle mode, optionally resetting the counter
//! at the target.
//!
//! Timers 0 and 2 run from the system clock through a divide-by-8
//! prescaler; timer 1 counts every cycle unless its source selects the
//! hblank clock (sources 1 and 3), which is modelled as a divide-by-2100
//! prescaler.

use crate::core::error::{EmulatorError, Result};
use crate::core::interrupt::{Interrupt, InterruptController};
use crate::core::scheduler::Ticks;

/// Mode register bits
mod mode {
    pub const SYNC_ENABLE: u16 = 1 << 0;
    pub const TARGET_RESET: u16 = 1 << 3;
    pub const TARGET_IRQ_ENABLE: u16 = 1 << 4;
    pub const OVERFLOW_IRQ_ENABLE: u16 = 1 << 5;
    pub const TOGGLE: u16 = 1 << 7;
    pub const NIRQ: u16 = 1 << 10;
    pub const REACHED_TARGET: u16 = 1 << 11;
    pub const REACHED_OVERFLOW: u16 = 1 << 12;

    /// Sticky bits preserved across mode writes
    pub const STICKY: u16 = REACHED_TARGET | REACHED_OVERFLOW;
}

/// One hardware timer channel
#[derive(Debug, Default)]
struct Timer {
    counter: u16,
    prescaler: u32,
    mode: u16,
    target: u16,
}

impl Timer {
    fn reset(&mut self) {
        self.counter = 0;
        self.prescaler = 0;
        self.mode = mode::NIRQ;
        self.target = 0;
    }

    #[inline]
    fn source(&self) -> u16 {
        (self.mode >> 8) & 0x3
    }

    /// Advance one system-clock cycle
    fn tick(&mut self, index: usize, intc: &mut InterruptController) {
        // Timer 1 follows the hblank clock on sources 1/3; timers 0/2
        // approximate their dot/system sources with a divide-by-8
        self.prescaler += 1;
        if index == 1 {
            if self.source() == 1 || self.source() == 3 {
                if self.prescaler % 2100 != 0 {
                    return;
                }
            }
        } else if self.prescaler % 8 != 0 {
            return;
        }

        self.counter = self.counter.wrapping_add(1);

        let irq = [Interrupt::Timer0, Interrupt::Timer1, Interrupt::Timer2][index];

        if self.mode & mode::TARGET_IRQ_ENABLE != 0 && self.counter == self.target {
            self.mode |= mode::REACHED_TARGET;
            self.raise_irq(irq, intc);

            if self.mode & mode::TARGET_RESET != 0 {
                self.counter = 0;
            }
        } else if self.mode & mode::OVERFLOW_IRQ_ENABLE != 0 && self.counter == 0 {
            self.mode |= mode::REACHED_OVERFLOW;
            self.raise_irq(irq, intc);
        }
    }

    /// Pulse mode drops the nIRQ latch; toggle mode flips it and
    /// interrupts on the falling edge only
    fn raise_irq(&mut self, irq: Interrupt, intc: &mut InterruptController) {
        if self.mode & mode::TOGGLE != 0 {
            self.mode ^= mode::NIRQ;
            if self.mode & mode::NIRQ == 0 {
                intc.assert_irq(irq);
            }
        } else {
            self.mode &= !mode::NIRQ;
            intc.assert_irq(irq);
        }
    }
}

/// The three timers as one register block
#[derive(Debug)]
pub struct Timers {
    timers: [Timer; 3],
}

impl Timers {
    pub fn new() -> Self {
        let mut timers = Self {
            timers: [Timer::default(), Timer::default(), Timer::default()],
        };
        timers.reset();
        timers
    }

    pub fn reset(&mut self) {
        for timer in &mut self.timers {
            timer.reset();
        }
    }

    /// Advance all three timers by executed CPU cycles
    pub fn advance(&mut self, cycles: Ticks, intc: &mut InterruptController) {
        for _ in 0..cycles {
            for (index, timer) in self.timers.iter_mut().enumerate() {
                timer.tick(index, intc);
            }
        }
    }

    #[inline]
    fn decode(addr: u32) -> (usize, u32) {
        (((addr >> 4) & 0x3) as usize, addr & 0xF)
    }

    /// Register read: count at +0, mode at +4, target at +8
    pub fn read16(&self, addr: u32) -> Result<u16> {
        let (index, reg) = Self::decode(addr);

        match reg {
            0x0 => Ok(self.timers[index].counter),
            0x4 => Ok(self.timers[index].mode),
            0x8 => Ok(self.timers[index].target),
            _ => Err(EmulatorError::UnknownRegister {
                unit: "timer",
                address: addr,
            }),
        }
    }

    /// Register write; a mode write resets the counter and prescaler
    /// and re-arms the IRQ latch
    pub fn write16(&mut self, addr: u32, data: u16) -> Result<()> {
        let (index, reg) = Self::decode(addr);
        let timer = &mut self.timers[index];

        match reg {
            0x0 => timer.counter = data,
            0x4 => {
                timer.mode = (timer.mode & mode::STICKY) | (data & 0x3FF) | mode::NIRQ;

                if timer.mode & mode::SYNC_ENABLE != 0 {
                    log::warn!("timer{} sync mode enabled (not modelled)", index);
                }

                timer.counter = 0;
                timer.prescaler = 0;
            }
            0x8 => timer.target = data,
            _ => {
                return Err(EmulatorError::UnknownRegister {
                    unit: "timer",
                    address: addr,
                })
            }
        }

        Ok(())
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}
