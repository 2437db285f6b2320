// SPDX-License-Identifier: Apache-2.0
//! Transfer items: the unit of deduplicated delivery.
//!
//! Each item is keyed by its [`ContentId`], holds the prebuilt wire header
//! it is announced with, and (for binary natures) a read plan into the
//! backing store plus the transfer position. Items live in one [`ItemStore`]
//! per session; queue entries reference items by id, so content shared
//! between properties is transferred exactly once.

use std::collections::HashMap;

use trickle_asset::{Accessor, AssetError, RangeReader};
use trickle_graph::NodeIx;
use trickle_proto::{ContentId, Header};

/// Node sets a header's hierarchy records are built from, resolved lazily
/// the first time the item is staged so that back-references always point
/// at nodes already on the wire.
#[derive(Debug, Clone, Default)]
pub struct PendingHierarchy {
    /// Nodes consuming the item.
    pub nodes: Vec<NodeIx>,
    /// Joint nodes, for skin deliveries.
    pub joints: Vec<NodeIx>,
}

/// Read plan and transfer position of a chunked binary payload.
#[derive(Debug, Clone)]
pub struct BinarySource {
    /// Backing store key.
    pub store: String,
    /// Byte offset of the payload start.
    pub byte_offset: u64,
    /// Total payload bytes.
    pub total_bytes: u64,
    /// Bytes already confirmed on the wire.
    pub bytes_sent: u64,
    /// Per-item chunk cap, for temporal animation payloads.
    pub chunk_cap: Option<u64>,
    staged: Option<u64>,
}

impl BinarySource {
    /// Plan over a tightly packed (or element-stride) accessor.
    pub fn from_accessor(accessor: &Accessor) -> Self {
        BinarySource {
            store: accessor.store.clone(),
            byte_offset: accessor.byte_offset,
            total_bytes: accessor.total_bytes(),
            bytes_sent: 0,
            chunk_cap: None,
            staged: None,
        }
    }

    fn remaining(&self) -> u64 {
        self.total_bytes - self.bytes_sent
    }
}

/// Item body, by delivery shape.
#[derive(Debug, Clone)]
pub enum Body {
    /// Header-only delivery; complete after one confirmed send.
    Instant {
        /// Set once the announcing turn has been confirmed.
        done: bool,
    },
    /// Chunked binary delivery.
    Binary(BinarySource),
    /// The item cannot be delivered (unsupported component type or
    /// interleaved stride). Announced once as a warning, then dropped.
    NotSendable {
        /// Human-readable reason, surfaced to the receiver.
        reason: String,
        /// Set once the warning has been staged.
        warned: bool,
    },
}

/// One transferable item.
#[derive(Debug, Clone)]
pub struct TransferItem {
    /// Content id.
    pub id: ContentId,
    /// Wire header announcing the item; re-sent on every turn it occupies.
    pub header: Header,
    /// Delivery body.
    pub body: Body,
    /// Hierarchy still to be resolved into the header.
    pub pending_hierarchy: Option<PendingHierarchy>,
}

impl TransferItem {
    /// Header-only item.
    pub fn instant(id: ContentId, header: Header) -> Self {
        TransferItem {
            id,
            header,
            body: Body::Instant { done: false },
            pending_hierarchy: None,
        }
    }

    /// Chunked binary item.
    pub fn binary(id: ContentId, header: Header, source: BinarySource) -> Self {
        TransferItem {
            id,
            header,
            body: Body::Binary(source),
            pending_hierarchy: None,
        }
    }

    /// Undeliverable item, kept so duplicates are warned about only once.
    pub fn not_sendable(id: ContentId, header: Header, reason: String) -> Self {
        TransferItem {
            id,
            header,
            body: Body::NotSendable { reason, warned: false },
            pending_hierarchy: None,
        }
    }

    /// Whether the item has nothing left to send.
    pub fn is_complete(&self) -> bool {
        match &self.body {
            Body::Instant { done } => *done,
            Body::Binary(source) => source.bytes_sent >= source.total_bytes,
            Body::NotSendable { warned, .. } => *warned,
        }
    }

    /// Stage the next chunk without advancing the transfer position.
    ///
    /// Returns `None` for header-only items and for binary items with
    /// nothing left. The staged length is committed by [`commit`] or
    /// discarded by [`pause`]; pausing and resuming therefore replays the
    /// exact same range.
    ///
    /// [`commit`]: TransferItem::commit
    /// [`pause`]: TransferItem::pause
    ///
    /// # Errors
    ///
    /// Propagates backing-store read failures.
    pub fn stage_chunk(
        &mut self,
        reader: &mut dyn RangeReader,
        transport_cap: u64,
    ) -> Result<Option<Vec<u8>>, AssetError> {
        let Body::Binary(source) = &mut self.body else {
            return Ok(None);
        };
        if source.remaining() == 0 {
            return Ok(None);
        }
        let cap = source
            .chunk_cap
            .map_or(transport_cap, |c| c.min(transport_cap));
        let len = source.remaining().min(cap.max(1));
        let bytes = reader.read_range(&source.store, source.byte_offset + source.bytes_sent, len)?;
        source.staged = Some(len);
        Ok(Some(bytes))
    }

    /// Commit the staged send: advance the position, or complete an
    /// instant item.
    pub fn commit(&mut self) {
        match &mut self.body {
            Body::Instant { done } => *done = true,
            Body::Binary(source) => {
                if let Some(len) = source.staged.take() {
                    source.bytes_sent += len;
                }
            }
            Body::NotSendable { .. } => {}
        }
    }

    /// Discard the staged send without advancing.
    pub fn pause(&mut self) {
        if let Body::Binary(source) = &mut self.body {
            source.staged = None;
        }
    }
}

/// Session-local item store keyed by content id.
#[derive(Debug, Default)]
pub struct ItemStore {
    items: HashMap<ContentId, TransferItem>,
}

impl ItemStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `item` unless an item with the same id already exists.
    ///
    /// Returns the id either way; duplicate content collapses here.
    pub fn intern(&mut self, item: TransferItem) -> ContentId {
        let id = item.id;
        self.items.entry(id).or_insert(item);
        id
    }

    /// Look up an item.
    pub fn get(&self, id: &ContentId) -> Option<&TransferItem> {
        self.items.get(id)
    }

    /// Look up an item mutably.
    pub fn get_mut(&mut self, id: &ContentId) -> Option<&mut TransferItem> {
        self.items.get_mut(id)
    }

    /// Apply a new temporal chunk cap to every animation keyframe payload.
    pub fn set_animation_caps(&mut self, cap: Option<u64>) {
        for item in self.items.values_mut() {
            let is_anim = matches!(
                &item.header,
                Header::BufferItem(b) if b.animation.is_some()
            );
            if is_anim {
                if let Body::Binary(source) = &mut item.body {
                    source.chunk_cap = cap;
                }
            }
        }
    }
}
