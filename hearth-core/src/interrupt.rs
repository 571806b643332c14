//! Interrupt Stack — pending higher-priority states for one character.
//!
//! A fixed-capacity ring buffer: pushing onto a full stack overwrites the
//! oldest entry, popping returns the newest.

use crate::types::StateTag;

/// Default number of pending interrupts kept per character.
pub const DEFAULT_CAPACITY: usize = 3;

/// Bounded LIFO of pending interrupt targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptStack {
    slots: Box<[Option<StateTag>]>,
    /// Index of the oldest entry.
    start: usize,
    len: usize,
}

impl InterruptStack {
    /// A stack holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    /// Push `tag`. Returns the entry that was overwritten, if the stack was full.
    pub fn push(&mut self, tag: StateTag) -> Option<StateTag> {
        let cap = self.slots.len();
        if self.len < cap {
            self.slots[(self.start + self.len) % cap] = Some(tag);
            self.len += 1;
            None
        } else {
            let dropped = self.slots[self.start].replace(tag);
            self.start = (self.start + 1) % cap;
            dropped
        }
    }

    /// Pop the newest entry.
    pub fn pop(&mut self) -> Option<StateTag> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        let idx = (self.start + self.len) % self.slots.len();
        self.slots[idx].take()
    }

    /// The newest entry, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<StateTag> {
        if self.len == 0 {
            return None;
        }
        self.slots[(self.start + self.len - 1) % self.slots.len()]
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pending entries, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<StateTag> {
        (0..self.len)
            .filter_map(|i| self.slots[(self.start + i) % self.slots.len()])
            .collect()
    }
}

impl Default for InterruptStack {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_newest_first() {
        let mut stack = InterruptStack::default();
        stack.push(StateTag::ReceiveChat);
        stack.push(StateTag::Sum);
        assert_eq!(stack.peek(), Some(StateTag::Sum));
        assert_eq!(stack.pop(), Some(StateTag::Sum));
        assert_eq!(stack.pop(), Some(StateTag::ReceiveChat));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn full_stack_drops_oldest() {
        let mut stack = InterruptStack::new(3);
        assert_eq!(stack.push(StateTag::Plan), None);
        stack.push(StateTag::Act);
        stack.push(StateTag::Move);
        assert_eq!(stack.push(StateTag::Sum), Some(StateTag::Plan));
        assert_eq!(stack.len(), 3);
        assert_eq!(
            stack.to_vec(),
            vec![StateTag::Act, StateTag::Move, StateTag::Sum]
        );
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut stack = InterruptStack::new(0);
        stack.push(StateTag::Idle);
        stack.push(StateTag::Persp);
        assert_eq!(stack.capacity(), 1);
        assert_eq!(stack.pop(), Some(StateTag::Persp));
        assert!(stack.is_empty());
    }
}
