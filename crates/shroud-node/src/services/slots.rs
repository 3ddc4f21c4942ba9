// ============================================
// File: crates/shroud-node/src/services/slots.rs
// ============================================
//! # Connection Slots
//!
//! ## Creation Reason
//! Enforces the inbound and outbound connection limits. A slot is taken
//! before any handshake byte is exchanged, so a flood of half-open
//! connections cannot exceed the limit either.
//!
//! ## Main Functionality
//! - `ConnectionSlots`: Atomic inbound/outbound counters with limits
//! - `SlotReservation`: RAII guard, released on drop
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never hand out a slot without a `SlotReservation`; the drop is the
//!   only release path, so error paths free their slot automatically
//! - A refused reservation never touches existing connections
//!
//! ## Last Modified
//! v0.1.0 - Initial slot accounting

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use shroud_common::Direction;

use crate::error::{NodeError, Result};

// ============================================
// ConnectionSlots
// ============================================

/// Tracks connection slots and limits.
#[derive(Debug)]
pub struct ConnectionSlots {
    max_inbound: usize,
    max_outbound: usize,
    inbound: AtomicUsize,
    outbound: AtomicUsize,
}

impl ConnectionSlots {
    /// Creates a slot tracker with the given limits.
    #[must_use]
    pub fn new(max_inbound: usize, max_outbound: usize) -> Arc<Self> {
        Arc::new(Self {
            max_inbound,
            max_outbound,
            inbound: AtomicUsize::new(0),
            outbound: AtomicUsize::new(0),
        })
    }

    /// Takes one slot in `direction`.
    ///
    /// # Errors
    /// `Capacity` if the limit for that direction is reached.
    pub fn try_reserve(self: &Arc<Self>, direction: Direction) -> Result<SlotReservation> {
        let limit = self.limit(direction);
        self.counter(direction)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .map_err(|_| NodeError::Capacity { direction, limit })?;

        trace!(%direction, used = self.used(direction), limit, "Slot reserved");
        Ok(SlotReservation {
            slots: Arc::clone(self),
            direction,
        })
    }

    /// Slots currently held in `direction`.
    #[must_use]
    pub fn used(&self, direction: Direction) -> usize {
        self.counter(direction).load(Ordering::Acquire)
    }

    /// Free slots in `direction`.
    #[must_use]
    pub fn available(&self, direction: Direction) -> usize {
        self.limit(direction).saturating_sub(self.used(direction))
    }

    /// Configured limit for `direction`.
    #[must_use]
    pub const fn limit(&self, direction: Direction) -> usize {
        match direction {
            Direction::Inbound => self.max_inbound,
            Direction::Outbound => self.max_outbound,
        }
    }

    const fn counter(&self, direction: Direction) -> &AtomicUsize {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    fn release(&self, direction: Direction) {
        // Saturating: a release can never underflow the counter
        let _ = self
            .counter(direction)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(1))
            });
        trace!(%direction, used = self.used(direction), "Slot released");
    }
}

// ============================================
// SlotReservation
// ============================================

/// One held connection slot; dropping it frees the slot.
#[derive(Debug)]
pub struct SlotReservation {
    slots: Arc<ConnectionSlots>,
    direction: Direction,
}

impl SlotReservation {
    /// Direction this slot counts against.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.slots.release(self.direction);
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_up_to_limit() {
        let slots = ConnectionSlots::new(2, 1);
        let a = slots.try_reserve(Direction::Inbound).unwrap();
        let _b = slots.try_reserve(Direction::Inbound).unwrap();
        assert_eq!(slots.used(Direction::Inbound), 2);

        let err = slots.try_reserve(Direction::Inbound).unwrap_err();
        assert!(err.is_capacity_error());
        assert_eq!(slots.used(Direction::Inbound), 2);

        drop(a);
        assert_eq!(slots.available(Direction::Inbound), 1);
        assert!(slots.try_reserve(Direction::Inbound).is_ok());
    }

    #[test]
    fn test_directions_are_independent() {
        let slots = ConnectionSlots::new(1, 1);
        let _in = slots.try_reserve(Direction::Inbound).unwrap();
        let out = slots.try_reserve(Direction::Outbound).unwrap();
        assert_eq!(out.direction(), Direction::Outbound);
        assert!(slots.try_reserve(Direction::Outbound).is_err());
        assert_eq!(slots.used(Direction::Inbound), 1);
    }

    #[test]
    fn test_zero_limit_refuses() {
        let slots = ConnectionSlots::new(0, 0);
        assert!(matches!(
            slots.try_reserve(Direction::Inbound),
            Err(NodeError::Capacity { limit: 0, .. })
        ));
    }
}
