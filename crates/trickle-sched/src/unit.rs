// SPDX-License-Identifier: Apache-2.0
//! Per-property scheduling units.
//!
//! A mesh property is a two-phase unit: its primitives' attribute queues,
//! then its animation groups (or the other way round under
//! `animations_first`). Within the active phase the unit rotates across
//! sub-queues one turn at a time, so a mesh with three primitives grows all
//! three on screen together. A camera property is a single one-shot queue.

use crate::queue::{QueueEntry, TransferQueue};

/// Which half of a mesh unit is being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Primitives,
    Animations,
}

/// One labelled sub-queue of a mesh unit.
#[derive(Debug, Clone)]
pub struct SubQueue {
    /// Diagnostic label (primitive index or animation group name).
    pub label: String,
    /// The rotating queue itself.
    pub queue: TransferQueue,
}

/// Outcome of a confirmed turn, consumed by the property-level scheduler.
#[derive(Debug, Clone, Copy)]
pub struct Advance {
    /// The unit has nothing left.
    pub done: bool,
    /// The rotation wrapped past the last sub-queue: one full pass served.
    pub cycle_complete: bool,
    /// The served entry holds its queue and property (index or skin data
    /// still in flight).
    pub hold_property: bool,
}

/// A mesh unit: primitive queues plus animation group queues.
#[derive(Debug, Clone)]
pub struct MeshUnit {
    primitives: Vec<SubQueue>,
    animations: Vec<SubQueue>,
    phase: Phase,
    cursor: usize,
}

impl MeshUnit {
    /// Unit over prepared sub-queues. `animations_first` flips phase order.
    pub fn new(primitives: Vec<SubQueue>, animations: Vec<SubQueue>, animations_first: bool) -> Self {
        let phase = if animations_first { Phase::Animations } else { Phase::Primitives };
        let mut unit = MeshUnit { primitives, animations, phase, cursor: 0 };
        unit.normalize();
        unit
    }

    fn queues(&self, phase: Phase) -> &[SubQueue] {
        match phase {
            Phase::Primitives => &self.primitives,
            Phase::Animations => &self.animations,
        }
    }

    fn queues_mut(&mut self, phase: Phase) -> &mut [SubQueue] {
        match phase {
            Phase::Primitives => &mut self.primitives,
            Phase::Animations => &mut self.animations,
        }
    }

    fn other(phase: Phase) -> Phase {
        match phase {
            Phase::Primitives => Phase::Animations,
            Phase::Animations => Phase::Primitives,
        }
    }

    /// Settle phase and cursor on the next non-empty sub-queue.
    fn normalize(&mut self) {
        if self.queues(self.phase).iter().all(|s| s.queue.is_empty()) {
            self.phase = Self::other(self.phase);
            self.cursor = 0;
        }
        let len = self.queues(self.phase).len();
        if len == 0 {
            return;
        }
        self.cursor %= len;
        for step in 0..len {
            let ix = (self.cursor + step) % len;
            if !self.queues(self.phase)[ix].queue.is_empty() {
                self.cursor = ix;
                return;
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.primitives.iter().all(|s| s.queue.is_empty())
            && self.animations.iter().all(|s| s.queue.is_empty())
    }

    fn peek(&self) -> Option<&QueueEntry> {
        self.queues(self.phase).get(self.cursor)?.queue.front()
    }

    fn pop_current(&mut self) {
        let phase = self.phase;
        let cursor = self.cursor;
        if let Some(sub) = self.queues_mut(phase).get_mut(cursor) {
            sub.queue.pop_front();
        }
        self.normalize();
    }

    fn after_turn(&mut self, completed: bool) -> Advance {
        let phase = self.phase;
        let cursor = self.cursor;
        let mut hold_property = false;
        if let Some(sub) = self.queues_mut(phase).get_mut(cursor) {
            if completed {
                sub.queue.pop_front();
            } else {
                hold_property = sub.queue.front_holds();
                sub.queue.rotate();
            }
        }
        let len = self.queues(self.phase).len();
        let mut cycle_complete = false;
        if len > 0 {
            self.cursor += 1;
            if self.cursor >= len {
                self.cursor = 0;
                cycle_complete = true;
            }
        }
        self.normalize();
        Advance {
            done: self.is_empty(),
            cycle_complete: cycle_complete && !hold_property,
            hold_property,
        }
    }
}

/// A top-level property's scheduling unit.
#[derive(Debug, Clone)]
pub enum PropertyUnit {
    /// A mesh with primitive and animation sub-queues.
    Mesh(MeshUnit),
    /// A one-queue property (cameras).
    Single(TransferQueue),
}

impl PropertyUnit {
    /// True when the unit has nothing left.
    pub fn is_empty(&self) -> bool {
        match self {
            PropertyUnit::Mesh(unit) => unit.is_empty(),
            PropertyUnit::Single(queue) => queue.is_empty(),
        }
    }

    /// Entry to serve this turn, if any.
    pub fn peek(&self) -> Option<&QueueEntry> {
        match self {
            PropertyUnit::Mesh(unit) => unit.peek(),
            PropertyUnit::Single(queue) => queue.front(),
        }
    }

    /// Drop the peeked entry without counting a turn (item already
    /// delivered elsewhere, or undeliverable).
    pub fn pop_current(&mut self) {
        match self {
            PropertyUnit::Mesh(unit) => unit.pop_current(),
            PropertyUnit::Single(queue) => {
                queue.pop_front();
            }
        }
    }

    /// Record a confirmed turn on the peeked entry.
    pub fn after_turn(&mut self, completed: bool) -> Advance {
        match self {
            PropertyUnit::Mesh(unit) => unit.after_turn(completed),
            PropertyUnit::Single(queue) => {
                let mut hold_property = false;
                if completed {
                    queue.pop_front();
                } else {
                    hold_property = queue.front_holds();
                    queue.rotate();
                }
                Advance {
                    done: queue.is_empty(),
                    cycle_complete: !hold_property,
                    hold_property,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trickle_proto::ContentId;

    fn id(n: u8) -> ContentId {
        ContentId([n; 32])
    }

    fn sub(label: &str, entries: &[(&str, u8)]) -> SubQueue {
        let mut queue = TransferQueue::new();
        for (entry_label, n) in entries {
            queue.push(*entry_label, id(*n));
        }
        queue.sort_by_rank();
        SubQueue { label: label.into(), queue }
    }

    #[test]
    fn rotation_interleaves_primitives() {
        let unit = MeshUnit::new(
            vec![
                sub("0", &[("POSITION", 1), ("NORMAL", 2)]),
                sub("1", &[("POSITION", 3)]),
            ],
            Vec::new(),
            false,
        );
        let mut unit = PropertyUnit::Mesh(unit);
        assert_eq!(unit.peek().expect("entry").item, id(1));
        let adv = unit.after_turn(true);
        assert!(!adv.done);
        assert!(!adv.cycle_complete);
        // second primitive gets the next turn
        assert_eq!(unit.peek().expect("entry").item, id(3));
        let adv = unit.after_turn(true);
        assert!(adv.cycle_complete);
        assert_eq!(unit.peek().expect("entry").item, id(2));
        let adv = unit.after_turn(true);
        assert!(adv.done);
    }

    #[test]
    fn three_incomplete_siblings_rotate_back_to_the_start() {
        let unit = MeshUnit::new(
            vec![sub("0", &[("POSITION", 1), ("NORMAL", 2), ("TEXCOORD_0", 3)])],
            Vec::new(),
            false,
        );
        let mut unit = PropertyUnit::Mesh(unit);
        let start = unit.peek().expect("entry").item;
        let mut served = Vec::new();
        for _ in 0..3 {
            served.push(unit.peek().expect("entry").item);
            let adv = unit.after_turn(false);
            assert!(!adv.done);
            assert!(!adv.hold_property);
        }
        assert_eq!(served, [id(1), id(2), id(3)]);
        assert_eq!(unit.peek().expect("entry").item, start);
    }

    #[test]
    fn phase_switches_to_animations_when_primitives_drain() {
        let unit = MeshUnit::new(
            vec![sub("0", &[("POSITION", 1)])],
            vec![sub("walk", &[("anim-param:TIME", 7)])],
            false,
        );
        let mut unit = PropertyUnit::Mesh(unit);
        assert_eq!(unit.peek().expect("entry").item, id(1));
        unit.after_turn(true);
        assert_eq!(unit.peek().expect("entry").item, id(7));
    }

    #[test]
    fn animations_first_flips_phase_order() {
        let unit = MeshUnit::new(
            vec![sub("0", &[("POSITION", 1)])],
            vec![sub("walk", &[("anim-param:TIME", 7)])],
            true,
        );
        assert_eq!(PropertyUnit::Mesh(unit).peek().expect("entry").item, id(7));
    }

    #[test]
    fn incomplete_index_entry_holds_the_property() {
        let unit = MeshUnit::new(
            vec![sub("0", &[("indices", 1), ("POSITION", 2)])],
            Vec::new(),
            false,
        );
        let mut unit = PropertyUnit::Mesh(unit);
        let adv = unit.after_turn(false);
        assert!(adv.hold_property);
        assert!(!adv.cycle_complete);
        assert_eq!(unit.peek().expect("entry").item, id(1));
    }

    #[test]
    fn single_unit_completes_in_one_turn() {
        let mut queue = TransferQueue::new();
        queue.push("camera", id(9));
        let mut unit = PropertyUnit::Single(queue);
        let adv = unit.after_turn(true);
        assert!(adv.done);
        assert!(adv.cycle_complete);
    }
}
