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

//! Global event scheduler
//!
//! A single monotonically increasing 64-bit tick counter plus a fixed set
//! of typed event slots. Each slot is either inactive or armed with a mode
//! (one-shot, periodic, or manually re-armed), an absolute target tick and
//! a period. An ordered list of the active slots, sorted by target, backs
//! a cached "ticks until next event" countdown so the hot path is a single
//! subtraction.
//!
//! Device handlers do not live here: the system loop pops expired events
//! with [`Scheduler::pop_expired`] and dispatches on the event type, so a
//! handler is free to arm, remove or reschedule slots while the drain is
//! in progress.
//!
//! # Example
//!
//! ```
//! use ember_core::core::scheduler::{EventMode, EventType, Scheduler};
//!
//! let mut scheduler = Scheduler::new();
//! scheduler.add(EventType::Vblank, EventMode::Periodic, 1000).unwrap();
//!
//! scheduler.tick(1000);
//! assert_eq!(scheduler.pop_expired(), Some(EventType::Vblank));
//! assert_eq!(scheduler.pop_expired(), None);
//! ```

use crate::core::error::{EmulatorError, Result};

/// Virtual time in CPU cycles
pub type Ticks = i64;

/// Typed event slots (closed set)
///
/// One slot exists per type; arming an already-armed slot is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Sentinel guaranteeing the active list is never empty; never fires
    Idle,
    /// End-of-frame: frame publication and Vblank interrupt
    Vblank,
    /// One SPU output sample (44.1 kHz)
    Spu,
    /// CD-ROM first command response
    CdCommand,
    /// CD-ROM second command response
    CdCommand2,
    /// CD-ROM data sector delivery (self re-arming)
    CdSector,
    /// Serial I/O acknowledge pulse
    IoAcknowledge,
}

/// Number of event slots
pub const EVENT_COUNT: usize = 7;

impl EventType {
    #[inline]
    fn index(self) -> usize {
        match self {
            EventType::Idle => 0,
            EventType::Vblank => 1,
            EventType::Spu => 2,
            EventType::CdCommand => 3,
            EventType::CdCommand2 => 4,
            EventType::CdSector => 5,
            EventType::IoAcknowledge => 6,
        }
    }

    fn name(self) -> &'static str {
        match self {
            EventType::Idle => "idle",
            EventType::Vblank => "vblank",
            EventType::Spu => "spu",
            EventType::CdCommand => "cd-command",
            EventType::CdCommand2 => "cd-command-2",
            EventType::CdSector => "cd-sector",
            EventType::IoAcknowledge => "io-acknowledge",
        }
    }
}

/// Slot re-arming behavior after the event fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    /// Fire once, then the slot becomes inactive
    Once,
    /// Automatically rescheduled by its period after each firing
    Periodic,
    /// Left armed; the handler re-arms or removes the slot itself
    Manual,
}

#[derive(Debug, Clone, Copy)]
struct EventSlot {
    active: bool,
    mode: EventMode,
    target: Ticks,
    period: Ticks,
}

impl EventSlot {
    const fn inactive() -> Self {
        Self {
            active: false,
            mode: EventMode::Once,
            target: 0,
            period: 0,
        }
    }
}

/// Global event scheduler
///
/// Owns virtual time. The CPU and all bus accesses advance the clock by
/// charging tick counts via [`Scheduler::tick`]; the system loop runs the
/// CPU only while [`Scheduler::next_event_target`] is positive, then
/// drains expired events.
#[derive(Debug)]
pub struct Scheduler {
    /// Absolute virtual time in CPU cycles since reset
    current_time: Ticks,

    /// Cached ticks until the earliest active event
    next_event_target: Ticks,

    /// One slot per event type
    slots: [EventSlot; EVENT_COUNT],

    /// Active slots ordered by target; ties keep insertion order
    ordered: Vec<EventType>,
}

impl Scheduler {
    /// Create a new scheduler
    ///
    /// The `Idle` sentinel is armed at the far future so the ordered list
    /// is never empty and the countdown is always well-defined.
    pub fn new() -> Self {
        let mut scheduler = Self {
            current_time: 0,
            next_event_target: 0,
            slots: [EventSlot::inactive(); EVENT_COUNT],
            ordered: Vec::with_capacity(EVENT_COUNT),
        };

        scheduler
            .add(EventType::Idle, EventMode::Once, Ticks::MAX)
            .expect("fresh scheduler has an empty idle slot");

        scheduler
    }

    /// Current absolute virtual time
    #[inline]
    pub fn current_time(&self) -> Ticks {
        self.current_time
    }

    /// Ticks remaining until the earliest active event
    ///
    /// Zero or negative means at least one event has expired.
    #[inline]
    pub fn next_event_target(&self) -> Ticks {
        self.next_event_target
    }

    /// Advance virtual time
    ///
    /// Decrements the cached countdown; expired events are not run here,
    /// the caller pumps them with [`Scheduler::pop_expired`].
    #[inline]
    pub fn tick(&mut self, ticks: Ticks) {
        debug_assert!(ticks >= 0);

        self.current_time += ticks;
        self.next_event_target -= ticks;
    }

    /// Arm an event slot
    ///
    /// The slot fires `delta` ticks from now. For `Periodic` slots the
    /// delta also becomes the repeat period.
    ///
    /// # Errors
    ///
    /// `EventSlotMisuse` if the slot is already active.
    pub fn add(&mut self, ty: EventType, mode: EventMode, delta: Ticks) -> Result<()> {
        debug_assert!(delta >= 0);

        let slot = &mut self.slots[ty.index()];

        if slot.active {
            return Err(EmulatorError::EventSlotMisuse {
                event: ty.name(),
                active: true,
            });
        }

        slot.active = true;
        slot.mode = mode;
        slot.target = self.current_time.saturating_add(delta);
        slot.period = delta;

        self.ordered.push(ty);
        self.sort_events();
        self.recalc_next_event_target();

        Ok(())
    }

    /// Disarm an event slot
    ///
    /// # Errors
    ///
    /// `EventSlotMisuse` if the slot is not active.
    pub fn remove(&mut self, ty: EventType) -> Result<()> {
        let slot = &mut self.slots[ty.index()];

        if !slot.active {
            return Err(EmulatorError::EventSlotMisuse {
                event: ty.name(),
                active: false,
            });
        }

        slot.active = false;
        self.ordered.retain(|&e| e != ty);
        self.recalc_next_event_target();

        Ok(())
    }

    /// Push an active slot's target forward
    ///
    /// The delta is added to the current *target*, not to the current
    /// time: a `Manual` handler that re-arms itself this way keeps a
    /// drift-free cadence even when it fires late.
    ///
    /// # Errors
    ///
    /// `EventSlotMisuse` if the slot is not active.
    pub fn reschedule(&mut self, ty: EventType, delta: Ticks) -> Result<()> {
        debug_assert!(delta >= 0);

        let slot = &mut self.slots[ty.index()];

        if !slot.active {
            return Err(EmulatorError::EventSlotMisuse {
                event: ty.name(),
                active: false,
            });
        }

        slot.target = slot.target.saturating_add(delta);

        self.sort_events();
        self.recalc_next_event_target();

        Ok(())
    }

    /// Whether a slot is currently armed
    #[inline]
    pub fn is_active(&self, ty: EventType) -> bool {
        self.slots[ty.index()].active
    }

    /// Pop the earliest expired event, if any
    ///
    /// Returns `None` while no event has expired. A popped `Once` slot is
    /// disarmed, a `Periodic` slot is pushed forward by its period, and a
    /// `Manual` slot is left untouched for its handler to re-arm or
    /// remove. Events with equal targets pop in insertion order.
    pub fn pop_expired(&mut self) -> Option<EventType> {
        if self.next_event_target > 0 {
            return None;
        }

        let ty = self.ordered[0];
        let slot = &mut self.slots[ty.index()];

        log::trace!(
            "scheduler: '{}' fired at t={} (late {})",
            ty.name(),
            self.current_time,
            self.current_time - slot.target
        );

        match slot.mode {
            EventMode::Once => {
                slot.active = false;
                self.ordered.remove(0);
            }
            EventMode::Periodic => {
                slot.target += slot.period;
                self.sort_events();
            }
            EventMode::Manual => {}
        }

        self.recalc_next_event_target();

        Some(ty)
    }

    /// Re-sort the active list by target (stable, so ties keep order)
    fn sort_events(&mut self) {
        let slots = &self.slots;
        self.ordered.sort_by_key(|e| slots[e.index()].target);
    }

    #[inline]
    fn recalc_next_event_target(&mut self) {
        let front = self.ordered[0];
        self.next_event_target = self.slots[front.index()].target - self.current_time;
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_scheduler_is_idle() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.current_time(), 0);
        assert!(scheduler.next_event_target() > 0);
        assert!(scheduler.is_active(EventType::Idle));
    }

    #[test]
    fn test_single_event_fires() {
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::Vblank, EventMode::Once, 100)
            .unwrap();

        scheduler.tick(99);
        assert_eq!(scheduler.pop_expired(), None);

        scheduler.tick(1);
        assert_eq!(scheduler.pop_expired(), Some(EventType::Vblank));
        assert_eq!(scheduler.pop_expired(), None);
        assert!(!scheduler.is_active(EventType::Vblank));
    }

    #[test]
    fn test_events_fire_in_target_order() {
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::Vblank, EventMode::Once, 300)
            .unwrap();
        scheduler.add(EventType::Spu, EventMode::Once, 100).unwrap();
        scheduler
            .add(EventType::CdCommand, EventMode::Once, 200)
            .unwrap();

        scheduler.tick(300);

        assert_eq!(scheduler.pop_expired(), Some(EventType::Spu));
        assert_eq!(scheduler.pop_expired(), Some(EventType::CdCommand));
        assert_eq!(scheduler.pop_expired(), Some(EventType::Vblank));
        assert_eq!(scheduler.pop_expired(), None);
    }

    #[test]
    fn test_equal_targets_fire_in_insertion_order() {
        // A at +100, B at +50, C at +50: drain order must be B, C, A
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::Vblank, EventMode::Once, 100)
            .unwrap();
        scheduler.add(EventType::Spu, EventMode::Once, 50).unwrap();
        scheduler
            .add(EventType::CdCommand, EventMode::Once, 50)
            .unwrap();

        scheduler.tick(200);

        assert_eq!(scheduler.pop_expired(), Some(EventType::Spu));
        assert_eq!(scheduler.pop_expired(), Some(EventType::CdCommand));
        assert_eq!(scheduler.pop_expired(), Some(EventType::Vblank));
    }

    #[test]
    fn test_periodic_event_reschedules() {
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::Spu, EventMode::Periodic, 768)
            .unwrap();

        for n in 1..=3 {
            scheduler.tick(768);
            assert_eq!(scheduler.pop_expired(), Some(EventType::Spu));
            assert_eq!(scheduler.pop_expired(), None);
            assert_eq!(scheduler.current_time(), 768 * n);
        }

        assert!(scheduler.is_active(EventType::Spu));
    }

    #[test]
    fn test_periodic_event_keeps_phase_when_late() {
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::Spu, EventMode::Periodic, 100)
            .unwrap();

        // Fire 40 ticks late; the next target is still t=200
        scheduler.tick(140);
        assert_eq!(scheduler.pop_expired(), Some(EventType::Spu));
        assert_eq!(scheduler.next_event_target(), 60);
    }

    #[test]
    fn test_manual_event_left_for_handler() {
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::CdSector, EventMode::Manual, 100)
            .unwrap();

        scheduler.tick(100);
        assert_eq!(scheduler.pop_expired(), Some(EventType::CdSector));

        // Slot is still armed with the stale target; the handler must act
        assert!(scheduler.is_active(EventType::CdSector));
        scheduler.reschedule(EventType::CdSector, 100).unwrap();
        assert_eq!(scheduler.pop_expired(), None);
        assert_eq!(scheduler.next_event_target(), 100);
    }

    #[test]
    fn test_reschedule_is_relative_to_target() {
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::CdSector, EventMode::Manual, 100)
            .unwrap();

        scheduler.tick(130);
        assert_eq!(scheduler.pop_expired(), Some(EventType::CdSector));

        // Target was 100; +100 makes 200, which is 70 ticks from now
        scheduler.reschedule(EventType::CdSector, 100).unwrap();
        assert_eq!(scheduler.next_event_target(), 70);
    }

    #[test]
    fn test_double_add_fails() {
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::Vblank, EventMode::Once, 100)
            .unwrap();

        let err = scheduler
            .add(EventType::Vblank, EventMode::Once, 100)
            .unwrap_err();
        assert!(matches!(err, EmulatorError::EventSlotMisuse { .. }));
    }

    #[test]
    fn test_remove_inactive_fails() {
        let mut scheduler = Scheduler::new();
        let err = scheduler.remove(EventType::Vblank).unwrap_err();
        assert!(matches!(
            err,
            EmulatorError::EventSlotMisuse { active: false, .. }
        ));
    }

    #[test]
    fn test_remove_then_rearm() {
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::CdSector, EventMode::Manual, 500)
            .unwrap();
        scheduler.remove(EventType::CdSector).unwrap();
        scheduler
            .add(EventType::CdSector, EventMode::Manual, 250)
            .unwrap();

        scheduler.tick(250);
        assert_eq!(scheduler.pop_expired(), Some(EventType::CdSector));
    }

    #[test]
    fn test_countdown_tracks_earliest_event() {
        let mut scheduler = Scheduler::new();
        scheduler
            .add(EventType::Vblank, EventMode::Once, 400)
            .unwrap();
        assert_eq!(scheduler.next_event_target(), 400);

        scheduler.add(EventType::Spu, EventMode::Once, 150).unwrap();
        assert_eq!(scheduler.next_event_target(), 150);

        scheduler.tick(50);
        assert_eq!(scheduler.next_event_target(), 100);

        scheduler.remove(EventType::Spu).unwrap();
        assert_eq!(scheduler.next_event_target(), 350);
    }

    #[test]
    fn test_idle_sentinel_never_expires() {
        let mut scheduler = Scheduler::new();
        scheduler.tick(10_000_000);
        assert_eq!(scheduler.pop_expired(), None);
    }
}
