// SPDX-License-Identifier: Apache-2.0
//! Receiver-side hierarchy decoding.
//!
//! Headers carry upward DAG walks ([`TraversalRecord`] forests). Scene
//! graphs are trees, so a node with several parents is duplicated: one copy
//! per attachment path, cloned from the first copy. The decoder tracks every
//! copy by node id and how many attachment points it has already wired, so
//! re-sent records and later back-references are idempotent.

use std::collections::HashMap;

use trickle_graph::{NodeId, TraversalRecord};

use crate::port::ScenePort;

/// Rebuilds the scene tree from traversal records.
#[derive(Debug)]
pub struct GraphDecoder<H> {
    copies: HashMap<NodeId, Vec<H>>,
    wired: HashMap<NodeId, usize>,
}

impl<H: Clone> Default for GraphDecoder<H> {
    fn default() -> Self {
        GraphDecoder { copies: HashMap::new(), wired: HashMap::new() }
    }
}

impl<H: Clone> GraphDecoder<H> {
    /// Empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All scene copies of a node, in attachment order.
    pub fn copies_of(&self, id: &str) -> &[H] {
        self.copies.get(id).map_or(&[], Vec::as_slice)
    }

    /// Wire every record of a header's hierarchy into the scene.
    pub fn place<P: ScenePort<Handle = H>>(&mut self, port: &mut P, records: &[TraversalRecord]) {
        for record in records {
            self.resolve(port, record);
        }
    }

    /// Resolve one record to the scene copies of its node, materializing,
    /// cloning and attaching as needed.
    fn resolve<P: ScenePort<Handle = H>>(
        &mut self,
        port: &mut P,
        record: &TraversalRecord,
    ) -> Vec<H> {
        match record {
            TraversalRecord::Ref { id } => match self.copies.get(id) {
                Some(copies) => copies.clone(),
                None => {
                    tracing::warn!(%id, "back-reference to a node never announced; dropped");
                    Vec::new()
                }
            },
            TraversalRecord::Node { desc, parents } => {
                if !self.copies.contains_key(&desc.id) {
                    let handle = port.materialize(desc);
                    self.copies.insert(desc.id.clone(), vec![handle]);
                }
                // Attachment points: every scene copy of every parent.
                let points: Vec<H> = parents
                    .iter()
                    .flat_map(|parent| self.resolve(port, parent))
                    .collect();
                let wired = *self.wired.get(&desc.id).unwrap_or(&0);
                if parents.is_empty() {
                    if wired == 0 {
                        let root = self.copies[&desc.id][0].clone();
                        port.attach_root(&root);
                        self.wired.insert(desc.id.clone(), 1);
                    }
                } else if points.len() > wired {
                    let first = self.copies[&desc.id][0].clone();
                    for (index, point) in points.iter().enumerate().skip(wired) {
                        if index >= self.copies[&desc.id].len() {
                            let copy = port.clone_node(&first);
                            if let Some(copies) = self.copies.get_mut(&desc.id) {
                                copies.push(copy);
                            }
                        }
                        let handle = self.copies[&desc.id][index].clone();
                        port.attach(point, &handle);
                    }
                    self.wired.insert(desc.id.clone(), points.len());
                }
                self.copies[&desc.id].clone()
            }
        }
    }
}
