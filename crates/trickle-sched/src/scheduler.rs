// SPDX-License-Identifier: Apache-2.0
//! The turn-based transfer scheduler.
//!
//! The scheduler is a synchronous state machine driven by its transport: the
//! caller asks for the next turn's frames, dispatches them, and confirms (or
//! pauses). A turn is one header plus at most one binary chunk, so receiver
//! feedback can take effect between any two chunks. Nothing advances until
//! the caller confirms, which is what makes pause, resume and mid-stream
//! re-sorting exact.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

use trickle_asset::{AssetTable, RangeReader};
use trickle_graph::NodeArena;
use trickle_proto::{ContentId, Header, Interleave, Policy, SortKey};

use crate::ingest::{ingest, PropertyEntry};
use crate::item::{Body, ItemStore, TransferItem};
use crate::StreamError;

/// One outbound frame: a text header or a raw binary chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum OutFrame {
    /// Text frame carrying a header.
    Header(Header),
    /// Binary frame carrying payload bytes for the preceding header.
    Chunk(Vec<u8>),
}

/// Stream state reported with each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No asset has been requested yet.
    Idle,
    /// Frames remain to be sent.
    Streaming,
    /// Everything queued has been confirmed on the wire.
    Complete,
}

/// Frames to dispatch this turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Frames in dispatch order.
    pub frames: Vec<OutFrame>,
    /// Stream state after these frames.
    pub status: Status,
}

/// Outcome of feeding a receiver header to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    /// Absorbed internally.
    Handled,
    /// The caller should resolve this asset reference and call
    /// [`Scheduler::launch`] with the table.
    RequestAsset(String),
}

/// What a confirmed turn commits.
#[derive(Debug, Clone, Copy)]
enum Effect {
    InfoSent,
    Item(ContentId),
    Complete,
}

/// Sender-side scheduler for one session.
pub struct Scheduler {
    policy: Policy,
    chunk_bytes: u64,
    store: ItemStore,
    arena: NodeArena,
    info: BTreeMap<String, serde_json::Value>,
    properties: VecDeque<PropertyEntry>,
    pending: VecDeque<Header>,
    launched: bool,
    info_sent: bool,
    complete_sent: bool,
    effect: Option<Effect>,
}

impl Scheduler {
    /// Idle scheduler with a transport chunk cap and an initial policy.
    pub fn new(chunk_bytes: u64, policy: Policy) -> Self {
        Scheduler {
            policy,
            chunk_bytes: chunk_bytes.max(1),
            store: ItemStore::new(),
            arena: NodeArena::new(),
            info: BTreeMap::new(),
            properties: VecDeque::new(),
            pending: VecDeque::new(),
            launched: false,
            info_sent: false,
            complete_sent: false,
            effect: None,
        }
    }

    /// Start streaming `table`. Ignored (with a warning to the receiver)
    /// while a stream is already in progress.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] when the node graph is inconsistent or item
    /// id derivation fails.
    pub fn launch(&mut self, table: &AssetTable) -> Result<(), StreamError> {
        if self.launched && !self.complete_sent {
            self.pending.push_back(Header::Warning {
                message: "asset request ignored: a stream is already in progress".into(),
            });
            return Ok(());
        }
        self.arena = table.build_arena()?;
        self.store = ItemStore::new();
        let ingested = ingest(table, &self.arena, &self.policy, &mut self.store)?;
        for warning in ingested.warnings {
            tracing::warn!(%warning, "ingest");
            self.pending.push_back(Header::Warning { message: warning });
        }
        self.properties = ingested.properties.into();
        self.sort_properties();
        self.info = table.info.clone();
        self.launched = true;
        self.info_sent = false;
        self.complete_sent = false;
        self.effect = None;
        tracing::info!(properties = self.properties.len(), "stream launched");
        Ok(())
    }

    /// Apply a header received from the peer.
    pub fn handle_feedback(&mut self, header: Header) -> Feedback {
        match header {
            Header::AssetRequest { reference } => {
                if self.launched && !self.complete_sent {
                    self.pending.push_back(Header::Warning {
                        message: "asset request ignored: a stream is already in progress".into(),
                    });
                    Feedback::Handled
                } else {
                    Feedback::RequestAsset(reference)
                }
            }
            Header::SortConfig { policy } => {
                self.reconfigure(policy);
                Feedback::Handled
            }
            Header::PriorityHint { .. } => {
                self.pending.push_back(Header::Warning {
                    message: "priority hints are not supported; hint acknowledged and ignored"
                        .into(),
                });
                Feedback::Handled
            }
            other => {
                self.pending.push_back(Header::Warning {
                    message: format!("unexpected header kind {}", other.kind_name()),
                });
                Feedback::Handled
            }
        }
    }

    /// Adopt a new policy. In-flight transfer positions survive; only the
    /// property order, interleave discipline, and temporal chunking change
    /// mid-stream. Queue composition flags (`send_indices`,
    /// `animations_first`) take effect at the next launch.
    fn reconfigure(&mut self, policy: Policy) {
        self.pause();
        self.policy = policy;
        if self.launched {
            let cap = self
                .policy
                .temporal_animation
                .then_some(self.policy.animation_chunk_bytes.max(1));
            self.store.set_animation_caps(cap);
            self.sort_properties();
        }
        tracing::debug!(?self.policy, "policy reconfigured");
    }

    fn sort_properties(&mut self) {
        let cameras_last = self.policy.cameras_last;
        let effective = |p: &PropertyEntry| -> f64 {
            if p.is_camera {
                if cameras_last { f64::NEG_INFINITY } else { f64::INFINITY }
            } else {
                p.score
            }
        };
        let mut entries: Vec<_> = self.properties.drain(..).collect();
        match self.policy.property_sort {
            SortKey::PriorityScore => {
                entries.sort_by(|a, b| {
                    effective(b).partial_cmp(&effective(a)).unwrap_or(Ordering::Equal)
                });
            }
            SortKey::SourceOrder => {
                if cameras_last {
                    entries.sort_by_key(|p| p.is_camera);
                }
            }
        }
        self.properties = entries.into();
    }

    /// Discard the unconfirmed turn, if any, without advancing.
    pub fn pause(&mut self) {
        if let Some(Effect::Item(id)) = self.effect.take() {
            if let Some(item) = self.store.get_mut(&id) {
                item.pause();
            }
        }
    }

    /// Stage the next turn's frames. Call [`confirm_dispatched`] once they
    /// are on the wire, or [`pause`] to discard them.
    ///
    /// [`confirm_dispatched`]: Scheduler::confirm_dispatched
    /// [`pause`]: Scheduler::pause
    ///
    /// # Errors
    ///
    /// Propagates backing-store read failures.
    pub fn next_turn(&mut self, reader: &mut dyn RangeReader) -> Result<Turn, StreamError> {
        self.pause();
        let mut frames: Vec<OutFrame> = self.pending.drain(..).map(OutFrame::Header).collect();
        if !self.launched {
            return Ok(Turn { frames, status: Status::Idle });
        }
        if self.complete_sent {
            return Ok(Turn { frames, status: Status::Complete });
        }
        if !self.info_sent {
            frames.push(OutFrame::Header(Header::AssetInfo { info: self.info.clone() }));
            self.effect = Some(Effect::InfoSent);
            return Ok(Turn { frames, status: Status::Streaming });
        }

        while let Some(prop) = self.properties.front_mut() {
            if prop.unit.is_empty() {
                self.properties.pop_front();
                continue;
            }
            let Some(entry) = prop.unit.peek() else {
                self.properties.pop_front();
                continue;
            };
            let id = entry.item;
            let Some(item) = self.store.get_mut(&id) else {
                tracing::error!(%id, "queued item missing from store");
                prop.unit.pop_current();
                continue;
            };
            if item.is_complete() {
                // Already delivered through another property's queue.
                prop.unit.pop_current();
                continue;
            }
            if let Body::NotSendable { reason, warned } = &mut item.body {
                frames.push(OutFrame::Header(Header::Warning {
                    message: format!("item {id} dropped: {reason}"),
                }));
                *warned = true;
                prop.unit.pop_current();
                continue;
            }
            resolve_hierarchy(item, &mut self.arena);
            match item.stage_chunk(reader, self.chunk_bytes) {
                Ok(chunk) => {
                    frames.push(OutFrame::Header(item.header.clone()));
                    if let Some(chunk) = chunk {
                        frames.push(OutFrame::Chunk(chunk));
                    }
                }
                Err(err) => {
                    // Backing store failure is fatal for the item, not the
                    // session.
                    tracing::error!(%id, %err, "backing store read failed");
                    frames.push(OutFrame::Header(Header::Error {
                        message: format!("item {id} unreadable: {err}"),
                    }));
                    item.body = Body::NotSendable { reason: err.to_string(), warned: true };
                    prop.unit.pop_current();
                    continue;
                }
            }
            self.effect = Some(Effect::Item(id));
            return Ok(Turn { frames, status: Status::Streaming });
        }

        frames.push(OutFrame::Header(Header::StreamComplete));
        self.effect = Some(Effect::Complete);
        Ok(Turn { frames, status: Status::Streaming })
    }

    /// Commit the staged turn: advance the item, rotate queues, and (under
    /// round-robin) move to the next property after a full pass.
    pub fn confirm_dispatched(&mut self) {
        match self.effect.take() {
            None => {}
            Some(Effect::InfoSent) => self.info_sent = true,
            Some(Effect::Complete) => {
                self.complete_sent = true;
                tracing::info!("stream complete");
            }
            Some(Effect::Item(id)) => {
                let completed = match self.store.get_mut(&id) {
                    Some(item) => {
                        item.commit();
                        item.is_complete()
                    }
                    None => true,
                };
                let Some(prop) = self.properties.front_mut() else { return };
                let advance = prop.unit.after_turn(completed);
                if advance.done {
                    self.properties.pop_front();
                } else if advance.cycle_complete
                    && self.policy.interleave == Interleave::RoundRobin
                    && self.properties.len() > 1
                {
                    if let Some(front) = self.properties.pop_front() {
                        self.properties.push_back(front);
                    }
                }
            }
        }
    }
}

/// Build the hierarchy records of a header the first time its item is
/// staged, so back-references only ever point at nodes already announced.
fn resolve_hierarchy(item: &mut TransferItem, arena: &mut NodeArena) {
    let Some(pending) = item.pending_hierarchy.take() else { return };
    let records: Vec<_> = pending.nodes.iter().map(|&ix| arena.traverse(ix)).collect();
    let joint_records: Vec<_> = pending.joints.iter().map(|&ix| arena.traverse(ix)).collect();
    match &mut item.header {
        Header::BufferItem(b) => b.hierarchy = records,
        Header::MaterialItem(m) => m.hierarchy = records,
        Header::CameraItem(c) => c.hierarchy = records,
        Header::AnimationChannelItem(a) => a.hierarchy = records,
        Header::SkinItem(s) => {
            s.hierarchy = records;
            s.joints = joint_records;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use trickle_asset::{
        Accessor, AssetTable, ComponentType, ElementType, MemoryRangeReader, MeshDef,
        PrimitiveDef, TRIANGLES,
    };
    use trickle_graph::NodeDesc;

    fn accessor(
        offset: u64,
        etype: ElementType,
        ctype: ComponentType,
        count: u64,
    ) -> Accessor {
        Accessor {
            element_type: etype,
            component_type: ctype,
            count,
            byte_offset: offset,
            byte_stride: 0,
            store: "data.bin".into(),
            min: None,
            max: None,
        }
    }

    fn mesh(indices_at: u64, positions_at: u64, vertex_count: u64) -> MeshDef {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "POSITION".to_owned(),
            accessor(positions_at, ElementType::Vec3, ComponentType::F32, vertex_count),
        );
        MeshDef {
            name: None,
            primitives: vec![PrimitiveDef {
                mode: TRIANGLES,
                attributes,
                indices: Some(accessor(indices_at, ElementType::Scalar, ComponentType::U16, 6)),
                material: None,
            }],
        }
    }

    fn holder(id: &str, mesh_key: &str) -> NodeDesc {
        let mut node = NodeDesc::bare(id);
        node.meshes = vec![mesh_key.to_owned()];
        node
    }

    fn one_mesh_table() -> AssetTable {
        let mut table = AssetTable::default();
        table.info.insert("version".into(), serde_json::json!("1.0"));
        table.meshes.insert("m0".into(), mesh(0, 16, 4));
        table.nodes = vec![NodeDesc::bare("root"), holder("n0", "m0")];
        table.children.insert("root".into(), vec!["n0".into()]);
        table
    }

    fn reader() -> MemoryRangeReader {
        let mut r = MemoryRangeReader::new();
        r.insert("data.bin", (0u8..=255).cycle().take(4096).collect());
        r
    }

    fn headers(turn: &Turn) -> Vec<&'static str> {
        turn.frames
            .iter()
            .filter_map(|f| match f {
                OutFrame::Header(h) => Some(h.kind_name()),
                OutFrame::Chunk(_) => None,
            })
            .collect()
    }

    fn drive(sched: &mut Scheduler, reader: &mut MemoryRangeReader) -> Vec<Turn> {
        let mut turns = Vec::new();
        loop {
            let turn = sched.next_turn(reader).expect("turn");
            let status = turn.status;
            let empty = turn.frames.is_empty();
            turns.push(turn);
            sched.confirm_dispatched();
            if status != Status::Streaming || empty {
                break;
            }
        }
        turns
    }

    #[test]
    fn streams_info_items_chunks_then_complete() {
        let mut sched = Scheduler::new(1024, Policy::default());
        sched.launch(&one_mesh_table()).expect("launch");
        let mut reader = reader();

        let turn = sched.next_turn(&mut reader).expect("turn");
        assert_eq!(headers(&turn), ["asset-info"]);
        sched.confirm_dispatched();

        // Indices rank first and hold the front until done.
        let turn = sched.next_turn(&mut reader).expect("turn");
        assert_eq!(headers(&turn), ["buffer-item"]);
        match (&turn.frames[0], &turn.frames[1]) {
            (OutFrame::Header(Header::BufferItem(b)), OutFrame::Chunk(chunk)) => {
                assert_eq!(b.attribute, "indices");
                assert_eq!(chunk.len(), 12);
                assert!(!b.hierarchy.is_empty());
            }
            other => panic!("unexpected frames: {other:?}"),
        }
        sched.confirm_dispatched();

        let turn = sched.next_turn(&mut reader).expect("turn");
        match (&turn.frames[0], &turn.frames[1]) {
            (OutFrame::Header(Header::BufferItem(b)), OutFrame::Chunk(chunk)) => {
                assert_eq!(b.attribute, "POSITION");
                assert_eq!(chunk.len(), 48);
            }
            other => panic!("unexpected frames: {other:?}"),
        }
        sched.confirm_dispatched();

        let turn = sched.next_turn(&mut reader).expect("turn");
        assert_eq!(headers(&turn), ["stream-complete"]);
        sched.confirm_dispatched();
        let turn = sched.next_turn(&mut reader).expect("turn");
        assert_eq!(turn.status, Status::Complete);
    }

    #[test]
    fn idle_until_launched() {
        let mut sched = Scheduler::new(64, Policy::default());
        let mut reader = reader();
        let turn = sched.next_turn(&mut reader).expect("turn");
        assert_eq!(turn.status, Status::Idle);
        assert!(turn.frames.is_empty());
    }

    #[test]
    fn header_resent_with_every_chunk_of_a_split_item() {
        let mut sched = Scheduler::new(16, Policy::default());
        sched.launch(&one_mesh_table()).expect("launch");
        let mut reader = reader();
        let turns = drive(&mut sched, &mut reader);
        let buffer_headers = turns
            .iter()
            .flat_map(|t| &t.frames)
            .filter(|f| matches!(f, OutFrame::Header(Header::BufferItem(_))))
            .count();
        let chunks = turns
            .iter()
            .flat_map(|t| &t.frames)
            .filter(|f| matches!(f, OutFrame::Chunk(_)))
            .count();
        // 12 index bytes -> 1 chunk; 48 position bytes -> 3 chunks of 16.
        assert_eq!(chunks, 4);
        assert_eq!(buffer_headers, 4);
    }

    #[test]
    fn round_robin_alternates_between_properties() {
        let policy = Policy { interleave: Interleave::RoundRobin, ..Policy::default() };
        let mut sched = Scheduler::new(24, policy);
        let mut table = AssetTable::default();
        let mut a = BTreeMap::new();
        a.insert("POSITION".to_owned(), accessor(0, ElementType::Vec3, ComponentType::F32, 4));
        let mut b = BTreeMap::new();
        b.insert("POSITION".to_owned(), accessor(128, ElementType::Vec3, ComponentType::F32, 4));
        table.meshes.insert(
            "a".into(),
            MeshDef {
                name: None,
                primitives: vec![PrimitiveDef { mode: TRIANGLES, attributes: a, indices: None, material: None }],
            },
        );
        table.meshes.insert(
            "b".into(),
            MeshDef {
                name: None,
                primitives: vec![PrimitiveDef { mode: TRIANGLES, attributes: b, indices: None, material: None }],
            },
        );
        table.nodes = vec![holder("na", "a"), holder("nb", "b")];
        sched.launch(&table).expect("launch");
        let mut reader = reader();

        sched.next_turn(&mut reader).expect("info");
        sched.confirm_dispatched();

        let mut served = Vec::new();
        for _ in 0..4 {
            let turn = sched.next_turn(&mut reader).expect("turn");
            if let OutFrame::Header(Header::BufferItem(b)) = &turn.frames[0] {
                served.push(b.property.clone());
            }
            sched.confirm_dispatched();
        }
        assert_eq!(served, ["a", "b", "a", "b"]);
    }

    #[test]
    fn resort_mid_stream_resumes_at_exact_position() {
        let mut sched = Scheduler::new(24, Policy::default());
        let mut table = one_mesh_table();
        // Give the mesh a measurable extent so priority sort is exercised.
        if let Some(mesh) = table.meshes.get_mut("m0") {
            if let Some(pos) = mesh.primitives[0].attributes.get_mut("POSITION") {
                pos.min = Some(vec![0.0, 0.0, 0.0]);
                pos.max = Some(vec![1.0, 1.0, 1.0]);
            }
        }
        sched.launch(&table).expect("launch");
        let mut reader = reader();

        sched.next_turn(&mut reader).expect("info");
        sched.confirm_dispatched();
        // indices (12 bytes) done in one turn
        sched.next_turn(&mut reader).expect("indices");
        sched.confirm_dispatched();
        // first 24 of 48 position bytes
        let turn = sched.next_turn(&mut reader).expect("pos");
        let OutFrame::Chunk(first) = &turn.frames[1] else { panic!("no chunk") };
        assert_eq!(first.len(), 24);
        sched.confirm_dispatched();

        let feedback = sched.handle_feedback(Header::SortConfig {
            policy: Policy { property_sort: SortKey::PriorityScore, ..Policy::default() },
        });
        assert_eq!(feedback, Feedback::Handled);

        let turn = sched.next_turn(&mut reader).expect("pos rest");
        let OutFrame::Chunk(rest) = &turn.frames[1] else { panic!("no chunk") };
        // Picks up exactly where the confirmed position left off.
        assert_eq!(rest.len(), 24);
        assert_eq!(rest[0], reader.read_range("data.bin", 16 + 24, 1).expect("byte")[0]);
        sched.confirm_dispatched();
    }

    #[test]
    fn shared_accessor_streams_once() {
        let mut sched = Scheduler::new(1024, Policy::default());
        let mut table = AssetTable::default();
        let shared = accessor(0, ElementType::Vec3, ComponentType::F32, 4);
        for key in ["a", "b"] {
            let mut attrs = BTreeMap::new();
            attrs.insert("POSITION".to_owned(), shared.clone());
            table.meshes.insert(
                key.into(),
                MeshDef {
                    name: None,
                    primitives: vec![PrimitiveDef {
                        mode: TRIANGLES,
                        attributes: attrs,
                        indices: None,
                        material: None,
                    }],
                },
            );
        }
        table.nodes = vec![holder("na", "a"), holder("nb", "b")];
        sched.launch(&table).expect("launch");
        let mut reader = reader();
        let turns = drive(&mut sched, &mut reader);
        let chunks = turns
            .iter()
            .flat_map(|t| &t.frames)
            .filter(|f| matches!(f, OutFrame::Chunk(_)))
            .count();
        assert_eq!(chunks, 1);
    }

    #[test]
    fn aliased_attributes_queue_separately_but_stream_once() {
        let mut sched = Scheduler::new(1024, Policy::default());
        let mut table = AssetTable::default();
        let shared = accessor(0, ElementType::Vec3, ComponentType::F32, 4);
        let mut attrs = BTreeMap::new();
        attrs.insert("POSITION".to_owned(), shared.clone());
        attrs.insert("NORMAL".to_owned(), shared);
        table.meshes.insert(
            "m0".into(),
            MeshDef {
                name: None,
                primitives: vec![PrimitiveDef {
                    mode: TRIANGLES,
                    attributes: attrs,
                    indices: None,
                    material: None,
                }],
            },
        );
        table.nodes = vec![holder("n0", "m0")];
        sched.launch(&table).expect("launch");
        let mut reader = reader();
        let turns = drive(&mut sched, &mut reader);
        let chunks = turns
            .iter()
            .flat_map(|t| &t.frames)
            .filter(|f| matches!(f, OutFrame::Chunk(_)))
            .count();
        // Two labels alias one accessor: both queue, the payload moves once.
        assert_eq!(chunks, 1);
    }

    #[test]
    fn unstreamable_attribute_becomes_a_warning() {
        let mut sched = Scheduler::new(1024, Policy::default());
        let mut table = AssetTable::default();
        let mut attrs = BTreeMap::new();
        attrs.insert("POSITION".to_owned(), accessor(0, ElementType::Vec3, ComponentType::U32, 4));
        table.meshes.insert(
            "m0".into(),
            MeshDef {
                name: None,
                primitives: vec![PrimitiveDef {
                    mode: TRIANGLES,
                    attributes: attrs,
                    indices: None,
                    material: None,
                }],
            },
        );
        table.nodes = vec![holder("n0", "m0")];
        sched.launch(&table).expect("launch");
        let mut reader = reader();
        let turns = drive(&mut sched, &mut reader);
        let kinds: Vec<_> = turns.iter().flat_map(headers).collect();
        assert!(kinds.contains(&"warning"));
        assert!(!kinds.contains(&"buffer-item"));
        assert!(kinds.contains(&"stream-complete"));
    }

    #[test]
    fn second_request_mid_stream_is_warned_and_ignored() {
        let mut sched = Scheduler::new(1024, Policy::default());
        sched.launch(&one_mesh_table()).expect("launch");
        let feedback = sched.handle_feedback(Header::AssetRequest { reference: "other".into() });
        assert_eq!(feedback, Feedback::Handled);
        let mut reader = reader();
        let turn = sched.next_turn(&mut reader).expect("turn");
        assert!(headers(&turn).contains(&"warning"));
    }

    #[test]
    fn priority_hint_is_acknowledged_as_unsupported() {
        let mut sched = Scheduler::new(1024, Policy::default());
        sched.launch(&one_mesh_table()).expect("launch");
        let feedback = sched.handle_feedback(Header::PriorityHint { position: [0.0, 1.0, 2.0] });
        assert_eq!(feedback, Feedback::Handled);
        let mut reader = reader();
        let turn = sched.next_turn(&mut reader).expect("turn");
        match &turn.frames[0] {
            OutFrame::Header(Header::Warning { message }) => {
                assert!(message.contains("not supported"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn pause_replays_unconfirmed_chunk() {
        let mut sched = Scheduler::new(16, Policy::default());
        sched.launch(&one_mesh_table()).expect("launch");
        let mut reader = reader();
        sched.next_turn(&mut reader).expect("info");
        sched.confirm_dispatched();

        let staged = sched.next_turn(&mut reader).expect("turn");
        sched.pause();
        let replay = sched.next_turn(&mut reader).expect("turn");
        assert_eq!(staged, replay);
    }
}
