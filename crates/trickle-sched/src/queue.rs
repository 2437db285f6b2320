// SPDX-License-Identifier: Apache-2.0
//! Rotating transfer queues.
//!
//! A queue holds labelled references to items in the [`ItemStore`]. After
//! each confirmed turn the front entry rotates to the back so every
//! attribute of a primitive makes visible progress, except for entries
//! whose label must finish first (index buffers and skins, which the
//! consumer needs complete before dependent data is useful).
//!
//! [`ItemStore`]: crate::ItemStore

use std::collections::VecDeque;

use trickle_proto::ContentId;

/// Labels that hold the front of their queue until complete.
fn holds_front(label: &str) -> bool {
    matches!(label, "indices" | "skin")
}

/// Canonical emission rank of a queue label. Lower ranks send first.
fn rank(label: &str) -> u32 {
    match label {
        "indices" | "skin" => 0,
        "POSITION" => 1,
        "NORMAL" => 2,
        "TEXCOORD_0" => 3,
        "material" => 10,
        "material-params" => 11,
        "texture" => 12,
        "texture-path" => 13,
        "anim-channel" => 20,
        l if l == "anim-param:TIME" => 1,
        l if l.starts_with("anim-param:") => 2,
        // Remaining vertex attributes go after the canonical three.
        _ => 5,
    }
}

/// One queue entry: a label plus the item it references.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Emission label (attribute name or delivery kind).
    pub label: String,
    /// Referenced item.
    pub item: ContentId,
}

/// A rotating, deduplicated queue of item references.
#[derive(Debug, Clone, Default)]
pub struct TransferQueue {
    entries: VecDeque<QueueEntry>,
}

impl TransferQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry unless the same label already queues this item.
    /// The same content under a different label stays: each label must be
    /// announced, even when the transfer itself collapses to one.
    pub fn push(&mut self, label: impl Into<String>, item: ContentId) {
        let label = label.into();
        if self.entries.iter().any(|e| e.item == item && e.label == label) {
            return;
        }
        self.entries.push_back(QueueEntry { label, item });
    }

    /// Stable-sort entries by canonical rank. Called once after filling.
    pub fn sort_by_rank(&mut self) {
        let mut entries: Vec<_> = self.entries.drain(..).collect();
        entries.sort_by_key(|e| rank(&e.label));
        self.entries = entries.into();
    }

    /// Front entry, if any.
    pub fn front(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// Drop the front entry.
    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Rotate after a confirmed turn: the front entry moves to the back
    /// unless its label holds the front.
    pub fn rotate(&mut self) {
        let holds = self.entries.front().is_some_and(|e| holds_front(&e.label));
        if !holds && self.entries.len() > 1 {
            if let Some(front) = self.entries.pop_front() {
                self.entries.push_back(front);
            }
        }
    }

    /// True when the front entry refuses rotation until complete.
    pub fn front_holds(&self) -> bool {
        self.entries.front().is_some_and(|e| holds_front(&e.label))
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> ContentId {
        ContentId([n; 32])
    }

    #[test]
    fn rank_orders_indices_then_canonical_attributes() {
        let mut q = TransferQueue::new();
        q.push("TEXCOORD_0", id(3));
        q.push("WEIGHT", id(5));
        q.push("POSITION", id(1));
        q.push("material", id(4));
        q.push("indices", id(0));
        q.push("NORMAL", id(2));
        q.sort_by_rank();
        let labels: Vec<_> = (0..q.len())
            .map(|_| {
                let e = q.pop_front().expect("entry");
                e.label
            })
            .collect();
        assert_eq!(labels, ["indices", "POSITION", "NORMAL", "TEXCOORD_0", "WEIGHT", "material"]);
    }

    #[test]
    fn push_dedups_same_label_entries_only() {
        let mut q = TransferQueue::new();
        q.push("POSITION", id(1));
        q.push("POSITION", id(1));
        assert_eq!(q.len(), 1);
        // An attribute aliasing already-queued content is still announced.
        q.push("NORMAL", id(1));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn rotation_skips_holding_labels() {
        let mut q = TransferQueue::new();
        q.push("indices", id(0));
        q.push("POSITION", id(1));
        q.rotate();
        assert_eq!(q.front().expect("front").label, "indices");

        q.pop_front();
        q.push("NORMAL", id(2));
        q.rotate();
        assert_eq!(q.front().expect("front").label, "NORMAL");
    }

    #[test]
    fn skin_holds_the_front_like_indices() {
        let mut q = TransferQueue::new();
        q.push("skin", id(0));
        q.push("anim-param:TIME", id(1));
        q.rotate();
        assert_eq!(q.front().expect("front").label, "skin");
        assert!(q.front_holds());
    }

    #[test]
    fn anim_time_ranks_before_other_parameters_and_channels() {
        let mut q = TransferQueue::new();
        q.push("anim-channel", id(9));
        q.push("anim-param:rotation", id(2));
        q.push("anim-param:TIME", id(1));
        q.sort_by_rank();
        assert_eq!(q.front().expect("front").label, "anim-param:TIME");
    }
}
