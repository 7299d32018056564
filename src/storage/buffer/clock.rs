//! Clock (second-chance) eviction.
//!
//! Each frame slot is Empty (pinned or never used), Accessed (evictable, with
//! its reference bit set) or Unused (evictable, reference bit cleared). The
//! hand sweeps circularly: Accessed slots get a second chance and drop to
//! Unused, the first Unused slot is the victim.

use super::replacer::{FrameId, Replacer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    Unused,
    Accessed,
}

#[derive(Debug)]
pub struct ClockReplacer {
    slots: Vec<SlotState>,
    hand: usize,
    len: usize,
}

impl ClockReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            slots: vec![SlotState::Empty; max_size],
            hand: 0,
            len: 0,
        }
    }

    fn set_state(&mut self, frame_id: FrameId, state: SlotState) {
        let Some(slot) = self.slots.get_mut(frame_id as usize) else {
            return;
        };
        match (*slot == SlotState::Empty, state == SlotState::Empty) {
            (true, false) => self.len += 1,
            (false, true) => self.len -= 1,
            _ => {}
        }
        *slot = state;
    }
}

impl Replacer for ClockReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        if self.len == 0 {
            return None;
        }

        // Two full turns are always enough: the first clears every reference bit.
        let capacity = self.slots.len();
        for _ in 0..capacity * 2 {
            let idx = self.hand;
            self.hand = (self.hand + 1) % capacity;
            match self.slots[idx] {
                SlotState::Empty => {}
                SlotState::Accessed => self.slots[idx] = SlotState::Unused,
                SlotState::Unused => {
                    self.slots[idx] = SlotState::Empty;
                    self.len -= 1;
                    return Some(idx as FrameId);
                }
            }
        }
        None
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.set_state(frame_id, SlotState::Empty);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        // Unpinning an already evictable frame only refreshes its reference bit.
        self.set_state(frame_id, SlotState::Accessed);
    }

    fn size(&self) -> usize {
        self.len
    }
}
