// SPDX-License-Identifier: Apache-2.0
//! Scene-graph arena for trickle streams.
//!
//! The source document describes a directed acyclic graph: a node may be
//! referenced from several places (scene placement, skinning), so nodes live
//! in an arena addressed by stable id and parent/child relationships are
//! stored as index lists rather than ownership pointers. The arena also keeps
//! typed views (mesh, camera, skin, joint) so the sender can find every node
//! that anchors a given property without walking the whole graph.
//!
//! [`NodeArena::traverse`] walks upward from a leaf and produces the
//! [`TraversalRecord`] forest embedded in wire headers: the first time a node
//! is reached its full descriptor is emitted and the walk recurses into its
//! parents; any later visit emits an id-only back-reference and stops. The
//! `traversed` flag is monotonic for the life of a session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Stable node identifier from the source document.
pub type NodeId = String;

/// Arena index of a node. Valid only for the arena that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIx(usize);

/// Immutable node descriptor as it travels on the wire.
///
/// The local transform is either an explicit column-major matrix or any
/// subset of translation/rotation/scale; both forms are carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDesc {
    /// Stable identifier.
    pub id: NodeId,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Explicit 4x4 local transform (column-major).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<[f32; 16]>,
    /// Local translation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<[f32; 3]>,
    /// Local rotation quaternion (x, y, z, w).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f32; 4]>,
    /// Local scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<[f32; 3]>,
    /// Meshes anchored at this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meshes: Vec<String>,
    /// Camera anchored at this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    /// Skin bound to the meshes of this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin: Option<String>,
    /// Joint tag when this node doubles as a bone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_name: Option<String>,
}

impl NodeDesc {
    /// Descriptor with only an id set; useful in tests and defaults.
    pub fn bare(id: impl Into<NodeId>) -> Self {
        NodeDesc {
            id: id.into(),
            name: None,
            matrix: None,
            translation: None,
            rotation: None,
            scale: None,
            meshes: Vec::new(),
            camera: None,
            skin: None,
            joint_name: None,
        }
    }
}

/// One step of an upward DAG walk, as embedded in a header.
///
/// A `Ref` names a node whose full descriptor was already emitted this
/// session; the receiver resolves it by id and does not recurse. A `Node`
/// carries the full descriptor plus one record per parent edge; an empty
/// parent list marks a scene root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rec", rename_all = "kebab-case")]
pub enum TraversalRecord {
    /// Back-reference to an already-emitted node.
    Ref {
        /// Identifier of the previously emitted node.
        id: NodeId,
    },
    /// First emission of a node, with its parent walk.
    Node {
        /// Full node descriptor.
        desc: NodeDesc,
        /// One record per parent edge; empty means scene root.
        parents: Vec<TraversalRecord>,
    },
}

impl TraversalRecord {
    /// Identifier of the node this record describes or references.
    pub fn id(&self) -> &NodeId {
        match self {
            TraversalRecord::Ref { id } => id,
            TraversalRecord::Node { desc, .. } => &desc.id,
        }
    }
}

/// Errors raised while building the arena.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A node id was inserted twice.
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),
    /// An edge referenced a node that was never inserted.
    #[error("unknown node id: {0}")]
    MissingNode(NodeId),
}

#[derive(Debug)]
struct NodeSlot {
    desc: NodeDesc,
    parents: Vec<NodeIx>,
    children: Vec<NodeIx>,
    traversed: bool,
}

/// Arena of scene nodes with typed lookup views.
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<NodeSlot>,
    by_id: HashMap<NodeId, NodeIx>,
    mesh_view: HashMap<String, Vec<NodeIx>>,
    camera_view: HashMap<String, Vec<NodeIx>>,
    skin_view: HashMap<String, Vec<NodeIx>>,
    joint_view: HashMap<String, Vec<NodeIx>>,
}

impl NodeArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no nodes have been inserted.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert a node, registering it in every view its descriptor names.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] when the id is already present.
    pub fn insert(&mut self, desc: NodeDesc) -> Result<NodeIx, GraphError> {
        if self.by_id.contains_key(&desc.id) {
            return Err(GraphError::DuplicateNode(desc.id));
        }
        let ix = NodeIx(self.slots.len());
        self.by_id.insert(desc.id.clone(), ix);
        for mesh in &desc.meshes {
            self.mesh_view.entry(mesh.clone()).or_default().push(ix);
        }
        if let Some(camera) = &desc.camera {
            self.camera_view.entry(camera.clone()).or_default().push(ix);
        }
        if let Some(skin) = &desc.skin {
            self.skin_view.entry(skin.clone()).or_default().push(ix);
        }
        if let Some(joint) = &desc.joint_name {
            self.joint_view.entry(joint.clone()).or_default().push(ix);
        }
        self.slots.push(NodeSlot {
            desc,
            parents: Vec::new(),
            children: Vec::new(),
            traversed: false,
        });
        Ok(ix)
    }

    /// Record a parent→child edge between two inserted nodes.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MissingNode`] when either endpoint is unknown.
    pub fn link(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), GraphError> {
        let p = self.index_of(parent)?;
        let c = self.index_of(child)?;
        self.slots[p.0].children.push(c);
        self.slots[c.0].parents.push(p);
        Ok(())
    }

    /// Arena index for a node id.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MissingNode`] when the id is unknown.
    pub fn index_of(&self, id: &NodeId) -> Result<NodeIx, GraphError> {
        self.by_id
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::MissingNode(id.clone()))
    }

    /// Descriptor of the node at `ix`.
    pub fn desc(&self, ix: NodeIx) -> &NodeDesc {
        &self.slots[ix.0].desc
    }

    /// Whether `ix` was already emitted this session.
    pub fn is_traversed(&self, ix: NodeIx) -> bool {
        self.slots[ix.0].traversed
    }

    /// Nodes anchoring the given mesh property.
    pub fn nodes_for_mesh(&self, mesh: &str) -> &[NodeIx] {
        self.mesh_view.get(mesh).map_or(&[], Vec::as_slice)
    }

    /// Nodes anchoring the given camera property.
    pub fn nodes_for_camera(&self, camera: &str) -> &[NodeIx] {
        self.camera_view.get(camera).map_or(&[], Vec::as_slice)
    }

    /// Nodes bound to the given skin.
    pub fn nodes_for_skin(&self, skin: &str) -> &[NodeIx] {
        self.skin_view.get(skin).map_or(&[], Vec::as_slice)
    }

    /// Node carrying the given joint tag, if any.
    pub fn node_for_joint(&self, joint: &str) -> Option<NodeIx> {
        self.joint_view.get(joint).and_then(|v| v.first()).copied()
    }

    /// Walk upward from `ix`, producing the record to embed in a header.
    ///
    /// The first visit of a node marks it traversed (monotonic, set-once per
    /// session) and recurses into every parent; later visits of that node —
    /// from this walk or any other — produce an id-only back-reference.
    pub fn traverse(&mut self, ix: NodeIx) -> TraversalRecord {
        if self.slots[ix.0].traversed {
            return TraversalRecord::Ref {
                id: self.slots[ix.0].desc.id.clone(),
            };
        }
        self.slots[ix.0].traversed = true;
        let desc = self.slots[ix.0].desc.clone();
        let parents_ix = self.slots[ix.0].parents.clone();
        let parents = parents_ix.into_iter().map(|p| self.traverse(p)).collect();
        TraversalRecord::Node { desc, parents }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(ids: &[&str]) -> NodeArena {
        let mut arena = NodeArena::new();
        for id in ids {
            arena.insert(NodeDesc::bare(*id)).expect("insert");
        }
        arena
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut arena = arena_with(&["a"]);
        let err = arena.insert(NodeDesc::bare("a")).expect_err("dup");
        assert_eq!(err, GraphError::DuplicateNode("a".into()));
    }

    #[test]
    fn first_traversal_emits_full_chain_second_emits_ref() {
        // root -> mid -> leaf
        let mut arena = arena_with(&["root", "mid", "leaf"]);
        arena.link(&"root".into(), &"mid".into()).expect("edge");
        arena.link(&"mid".into(), &"leaf".into()).expect("edge");

        let leaf = arena.index_of(&"leaf".into()).expect("ix");
        let first = arena.traverse(leaf);
        match &first {
            TraversalRecord::Node { desc, parents } => {
                assert_eq!(desc.id, "leaf");
                assert_eq!(parents.len(), 1);
                match &parents[0] {
                    TraversalRecord::Node { desc, parents } => {
                        assert_eq!(desc.id, "mid");
                        // root has no parents: scene root
                        assert!(matches!(
                            &parents[0],
                            TraversalRecord::Node { desc, parents }
                                if desc.id == "root" && parents.is_empty()
                        ));
                    }
                    other => panic!("expected full mid record, got {other:?}"),
                }
            }
            other => panic!("expected full leaf record, got {other:?}"),
        }

        let second = arena.traverse(leaf);
        assert_eq!(
            second,
            TraversalRecord::Ref {
                id: "leaf".into()
            }
        );
    }

    #[test]
    fn shared_ancestor_is_emitted_once_across_walks() {
        // root -> a -> leaf_a ; root -> b -> leaf_b
        let mut arena = arena_with(&["root", "a", "b", "leaf_a", "leaf_b"]);
        for (p, c) in [("root", "a"), ("root", "b"), ("a", "leaf_a"), ("b", "leaf_b")] {
            arena.link(&p.into(), &c.into()).expect("edge");
        }

        let la = arena.index_of(&"leaf_a".into()).expect("ix");
        let lb = arena.index_of(&"leaf_b".into()).expect("ix");
        arena.traverse(la);
        let rec = arena.traverse(lb);
        // the walk from leaf_b reaches root, which was already emitted
        let TraversalRecord::Node { parents, .. } = rec else {
            panic!("expected full record");
        };
        let TraversalRecord::Node { parents: b_parents, .. } = &parents[0] else {
            panic!("expected full b record");
        };
        assert_eq!(b_parents[0], TraversalRecord::Ref { id: "root".into() });
    }

    #[test]
    fn multi_parent_node_emits_one_record_per_parent() {
        // a -> x, b -> x: true fan-in
        let mut arena = arena_with(&["a", "b", "x"]);
        arena.link(&"a".into(), &"x".into()).expect("edge");
        arena.link(&"b".into(), &"x".into()).expect("edge");

        let x = arena.index_of(&"x".into()).expect("ix");
        let TraversalRecord::Node { parents, .. } = arena.traverse(x) else {
            panic!("expected full record");
        };
        assert_eq!(parents.len(), 2);
        assert_eq!(parents[0].id(), "a");
        assert_eq!(parents[1].id(), "b");
    }

    #[test]
    fn views_index_anchoring_nodes() {
        let mut arena = NodeArena::new();
        let mut desc = NodeDesc::bare("n0");
        desc.meshes = vec!["mesh0".into()];
        desc.skin = Some("skin0".into());
        arena.insert(desc).expect("insert");
        let mut joint = NodeDesc::bare("n1");
        joint.joint_name = Some("hip".into());
        arena.insert(joint).expect("insert");

        assert_eq!(arena.nodes_for_mesh("mesh0").len(), 1);
        assert_eq!(arena.nodes_for_skin("skin0").len(), 1);
        assert!(arena.node_for_joint("hip").is_some());
        assert!(arena.nodes_for_mesh("absent").is_empty());
    }

    #[test]
    fn records_round_trip_through_serde() {
        let rec = TraversalRecord::Node {
            desc: NodeDesc::bare("n"),
            parents: vec![TraversalRecord::Ref { id: "p".into() }],
        };
        let text = serde_json::to_string(&rec).expect("encode");
        let back: TraversalRecord = serde_json::from_str(&text).expect("decode");
        assert_eq!(back, rec);
    }
}
