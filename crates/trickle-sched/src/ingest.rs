// SPDX-License-Identifier: Apache-2.0
//! Asset table → scheduling unit construction.
//!
//! Walks a normalized [`AssetTable`] and builds, per top-level property, the
//! queues the scheduler will serve: attribute and index buffers per
//! primitive, material and texture announcements, skins, animation keyframe
//! parameters and channels, cameras. All items are interned in the session's
//! [`ItemStore`], so content shared between properties collapses to one
//! transfer.

use std::collections::{BTreeMap, HashMap, HashSet};

use trickle_asset::{Accessor, AnimationDef, AssetTable, PrimitiveDef, TRIANGLES};
use trickle_graph::{NodeArena, NodeIx};
use trickle_proto::{
    content_id, AnimationChannelItem, BufferItem, CameraItem, ContentId, Header, MaterialItem,
    Policy, SkinItem, TextureItem,
};

use crate::item::{BinarySource, ItemStore, PendingHierarchy, TransferItem};
use crate::queue::TransferQueue;
use crate::unit::{MeshUnit, PropertyUnit, SubQueue};
use crate::StreamError;

/// One top-level property ready for scheduling.
#[derive(Debug, Clone)]
pub struct PropertyEntry {
    /// Property id.
    pub name: String,
    /// Scheduling unit.
    pub unit: PropertyUnit,
    /// Spatial-extent score (squared bounding-box diagonal).
    pub score: f64,
    /// Cameras sort by sentinel, not score.
    pub is_camera: bool,
}

/// Output of one ingest pass.
#[derive(Debug)]
pub struct Ingested {
    /// Properties in asset source order (meshes, then cameras).
    pub properties: Vec<PropertyEntry>,
    /// Structural warnings to surface before streaming starts.
    pub warnings: Vec<String>,
}

const GL_RGBA: u32 = 6408;
const GL_TEXTURE_2D: u32 = 3553;

/// Reason an accessor cannot be delivered, if any.
fn undeliverable(accessor: &Accessor) -> Option<String> {
    if !accessor.component_type.streamable() {
        return Some(format!(
            "32-bit integer attributes are not streamable (store {})",
            accessor.store
        ));
    }
    if accessor.is_interlaced() {
        return Some(format!(
            "interleaved stride {} differs from element size (store {})",
            accessor.byte_stride, accessor.store
        ));
    }
    None
}

/// Squared length of the bounding-box diagonal from accessor min/max.
fn extent_score(accessor: &Accessor) -> f64 {
    match (&accessor.min, &accessor.max) {
        (Some(min), Some(max)) => min
            .iter()
            .zip(max.iter())
            .map(|(lo, hi)| (hi - lo) * (hi - lo))
            .sum(),
        _ => 0.0,
    }
}

/// Channel indices per animation, keyed by target node id.
type ChannelsByTarget = HashMap<String, Vec<(String, usize)>>;

fn channels_by_target(table: &AssetTable) -> ChannelsByTarget {
    let mut by_target: ChannelsByTarget = HashMap::new();
    for (anim_name, anim) in &table.animations {
        for (chan_ix, chan) in anim.channels.iter().enumerate() {
            by_target
                .entry(chan.target_node.clone())
                .or_default()
                .push((anim_name.clone(), chan_ix));
        }
    }
    by_target
}

fn collect_channels(
    map: &mut BTreeMap<String, Vec<usize>>,
    by_target: &ChannelsByTarget,
    node_id: &str,
) {
    if let Some(hits) = by_target.get(node_id) {
        for (anim, chan_ix) in hits {
            let slot = map.entry(anim.clone()).or_default();
            if !slot.contains(chan_ix) {
                slot.push(*chan_ix);
            }
        }
    }
}

struct Ingestor<'a> {
    table: &'a AssetTable,
    arena: &'a NodeArena,
    policy: &'a Policy,
    store: &'a mut ItemStore,
    warnings: Vec<String>,
    by_target: ChannelsByTarget,
}

impl<'a> Ingestor<'a> {
    fn new(
        table: &'a AssetTable,
        arena: &'a NodeArena,
        policy: &'a Policy,
        store: &'a mut ItemStore,
    ) -> Self {
        let by_target = channels_by_target(table);
        Ingestor { table, arena, policy, store, warnings: Vec::new(), by_target }
    }

    fn buffer_item(
        &mut self,
        accessor: &Accessor,
        property: &str,
        property_name: Option<String>,
        primitive: Option<usize>,
        attribute: &str,
        animation: Option<String>,
        holders: &[NodeIx],
    ) -> Result<ContentId, StreamError> {
        let id = match &animation {
            Some(anim) => content_id("anim", &(anim, accessor))?,
            None => content_id("buffer", accessor)?,
        };
        let header = Header::BufferItem(BufferItem {
            id,
            property: property.to_owned(),
            property_name,
            primitive,
            attribute: attribute.to_owned(),
            element_type: accessor.element_type,
            component_type: accessor.component_type,
            count: accessor.count,
            animation: animation.clone(),
            hierarchy: Vec::new(),
        });
        let item = if let Some(reason) = undeliverable(accessor) {
            TransferItem::not_sendable(id, header, reason)
        } else {
            let mut source = BinarySource::from_accessor(accessor);
            if animation.is_some() && self.policy.temporal_animation {
                source.chunk_cap = Some(self.policy.animation_chunk_bytes.max(1));
            }
            let mut item = TransferItem::binary(id, header, source);
            item.pending_hierarchy = Some(PendingHierarchy {
                nodes: holders.to_vec(),
                joints: Vec::new(),
            });
            item
        };
        Ok(self.store.intern(item))
    }

    fn primitive_queue(
        &mut self,
        mesh_key: &str,
        mesh_name: Option<&str>,
        prim_ix: usize,
        prim: &PrimitiveDef,
        holders: &[NodeIx],
    ) -> Result<TransferQueue, StreamError> {
        let mut queue = TransferQueue::new();
        if prim.mode != TRIANGLES {
            self.warnings.push(format!(
                "mesh {mesh_key} primitive {prim_ix}: non-triangle mode {}, streaming anyway",
                prim.mode
            ));
        }
        if self.policy.send_indices {
            if let Some(indices) = &prim.indices {
                let id = self.buffer_item(
                    indices,
                    mesh_key,
                    mesh_name.map(str::to_owned),
                    Some(prim_ix),
                    "indices",
                    None,
                    holders,
                )?;
                queue.push("indices", id);
            }
        }
        for (attr, accessor) in &prim.attributes {
            let id = self.buffer_item(
                accessor,
                mesh_key,
                mesh_name.map(str::to_owned),
                Some(prim_ix),
                attr,
                None,
                holders,
            )?;
            queue.push(attr.clone(), id);
        }
        if let Some(material_key) = prim.material.clone() {
            self.push_material(&mut queue, &material_key, mesh_key, prim_ix, holders)?;
        }
        queue.sort_by_rank();
        Ok(queue)
    }

    fn push_material(
        &mut self,
        queue: &mut TransferQueue,
        material_key: &str,
        mesh_key: &str,
        prim_ix: usize,
        holders: &[NodeIx],
    ) -> Result<(), StreamError> {
        let Some(material) = self.table.materials.get(material_key) else {
            self.warnings.push(format!(
                "mesh {mesh_key} primitive {prim_ix}: unknown material {material_key}"
            ));
            return Ok(());
        };
        let binding_id = content_id("material-binding", &(mesh_key, prim_ix, material_key))?;
        let mut binding = TransferItem::instant(
            binding_id,
            Header::MaterialItem(MaterialItem {
                id: binding_id,
                key: material_key.to_owned(),
                property: mesh_key.to_owned(),
                primitive: prim_ix,
                hierarchy: Vec::new(),
            }),
        );
        binding.pending_hierarchy = Some(PendingHierarchy {
            nodes: holders.to_vec(),
            joints: Vec::new(),
        });
        queue.push("material", self.store.intern(binding));

        let params_id =
            content_id("material", &(material_key, &material.technique, &material.values))?;
        let params = TransferItem::instant(
            params_id,
            Header::MaterialParams {
                id: params_id,
                technique: material.technique.clone(),
                values: material.values.clone(),
            },
        );
        queue.push("material-params", self.store.intern(params));

        for value in material.values.values() {
            let Some(texture_key) = value.as_str() else { continue };
            let Some(texture) = self.table.textures.get(texture_key) else { continue };
            if texture.format.is_some_and(|f| f != GL_RGBA) {
                self.warnings.push(format!(
                    "texture {texture_key}: format {} is not RGBA, delivering anyway",
                    texture.format.unwrap_or_default()
                ));
            }
            if texture.target.is_some_and(|t| t != GL_TEXTURE_2D) {
                self.warnings.push(format!(
                    "texture {texture_key}: target {} is not TEXTURE_2D, delivering anyway",
                    texture.target.unwrap_or_default()
                ));
            }
            let texture_id = content_id("texture", &(texture_key, texture))?;
            let announce = TransferItem::instant(
                texture_id,
                Header::TextureItem(TextureItem {
                    id: texture_id,
                    key: texture_key.to_owned(),
                    format: texture.format,
                    internal_format: texture.internal_format,
                    target: texture.target,
                    sampler: texture.sampler,
                }),
            );
            queue.push("texture", self.store.intern(announce));

            let path_id = content_id("texture-path", &(texture_key, &texture.source))?;
            let path = TransferItem::instant(
                path_id,
                Header::TexturePath { id: texture_id, path: texture.source.clone() },
            );
            queue.push("texture-path", self.store.intern(path));
        }
        Ok(())
    }

    fn param_item(
        &mut self,
        anim_name: &str,
        anim: &AnimationDef,
        param: &str,
    ) -> Result<Option<ContentId>, StreamError> {
        let Some(accessor) = anim.parameters.get(param) else {
            self.warnings.push(format!(
                "animation {anim_name}: channel references unknown parameter {param}"
            ));
            return Ok(None);
        };
        let accessor = accessor.clone();
        let id = self.buffer_item(
            &accessor,
            anim_name,
            None,
            None,
            param,
            Some(anim_name.to_owned()),
            &[],
        )?;
        Ok(Some(id))
    }

    fn animation_group(
        &mut self,
        anim_name: &str,
        chan_ixs: &[usize],
    ) -> Result<Option<SubQueue>, StreamError> {
        let Some(anim) = self.table.animations.get(anim_name).cloned() else {
            return Ok(None);
        };
        let mut queue = TransferQueue::new();
        for &chan_ix in chan_ixs {
            let Some(chan) = anim.channels.get(chan_ix) else { continue };
            let Some(input) = self.param_item(anim_name, &anim, &chan.input)? else {
                continue;
            };
            let Some(output) = self.param_item(anim_name, &anim, &chan.output)? else {
                continue;
            };
            queue.push(format!("anim-param:{}", chan.input), input);
            queue.push(format!("anim-param:{}", chan.output), output);

            let Ok(target_ix) = self.arena.index_of(&chan.target_node) else {
                self.warnings.push(format!(
                    "animation {anim_name}: channel target {} not in node graph",
                    chan.target_node
                ));
                continue;
            };
            let chan_id = content_id("anim-channel", &(anim_name, chan_ix))?;
            let mut item = TransferItem::instant(
                chan_id,
                Header::AnimationChannelItem(AnimationChannelItem {
                    id: chan_id,
                    animation: anim_name.to_owned(),
                    target_node: chan.target_node.clone(),
                    target_path: chan.target_path.clone(),
                    interpolation: chan.interpolation.clone(),
                    input,
                    output,
                    hierarchy: Vec::new(),
                }),
            );
            item.pending_hierarchy = Some(PendingHierarchy {
                nodes: vec![target_ix],
                joints: Vec::new(),
            });
            queue.push("anim-channel", self.store.intern(item));
        }
        if queue.is_empty() {
            return Ok(None);
        }
        queue.sort_by_rank();
        Ok(Some(SubQueue { label: anim_name.to_owned(), queue }))
    }

    /// Animation groups bound to a mesh property: channels driving its
    /// holder nodes, plus (for skinned holders) the skin itself and the
    /// channels driving its joints.
    fn animation_groups(
        &mut self,
        mesh_key: &str,
        holders: &[NodeIx],
    ) -> Result<Vec<SubQueue>, StreamError> {
        let mut skin_groups: Vec<SubQueue> = Vec::new();
        let mut channels: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut seen_skins: HashSet<String> = HashSet::new();

        for &holder in holders {
            let desc = self.arena.desc(holder);
            collect_channels(&mut channels, &self.by_target, &desc.id);
            let Some(skin_key) = desc.skin.clone() else { continue };
            if !seen_skins.insert(skin_key.clone()) {
                continue;
            }
            let Some(skin) = self.table.skins.get(&skin_key).cloned() else {
                self.warnings.push(format!("mesh {mesh_key}: unknown skin {skin_key}"));
                continue;
            };
            let mut joints = Vec::new();
            for joint_name in &skin.joint_names {
                match self.arena.node_for_joint(joint_name) {
                    Some(ix) => {
                        let joint_id = self.arena.desc(ix).id.clone();
                        joints.push(ix);
                        collect_channels(&mut channels, &self.by_target, &joint_id);
                    }
                    None => self.warnings.push(format!(
                        "skin {skin_key}: joint {joint_name} not in node graph"
                    )),
                }
            }
            let skin_id = content_id("skin", &(&skin_key, mesh_key))?;
            let accessor = &skin.inverse_bind_matrices;
            let header = Header::SkinItem(SkinItem {
                id: skin_id,
                key: skin_key.clone(),
                property: mesh_key.to_owned(),
                joint_names: skin.joint_names.clone(),
                bind_shape_matrix: skin.bind_shape_matrix.clone(),
                element_type: accessor.element_type,
                component_type: accessor.component_type,
                count: accessor.count,
                joints: Vec::new(),
                hierarchy: Vec::new(),
            });
            let item = if let Some(reason) = undeliverable(accessor) {
                TransferItem::not_sendable(skin_id, header, reason)
            } else {
                let mut item =
                    TransferItem::binary(skin_id, header, BinarySource::from_accessor(accessor));
                item.pending_hierarchy = Some(PendingHierarchy {
                    nodes: holders.to_vec(),
                    joints,
                });
                item
            };
            let id = self.store.intern(item);
            let mut skin_queue = TransferQueue::new();
            skin_queue.push("skin", id);
            skin_groups.push(SubQueue { label: format!("skin:{skin_key}"), queue: skin_queue });
        }

        // Skins carry pose prerequisites, so their groups go first.
        for (anim_name, chan_ixs) in channels {
            if let Some(group) = self.animation_group(&anim_name, &chan_ixs)? {
                skin_groups.push(group);
            }
        }
        Ok(skin_groups)
    }

    fn mesh_property(&mut self, mesh_key: &str) -> Result<Option<PropertyEntry>, StreamError> {
        let Some(mesh) = self.table.meshes.get(mesh_key).cloned() else {
            return Ok(None);
        };
        let holders: Vec<NodeIx> = self.arena.nodes_for_mesh(mesh_key).to_vec();
        if holders.is_empty() {
            self.warnings.push(format!("mesh {mesh_key} is not referenced by any node"));
        }
        let mut primitives = Vec::new();
        let mut score = 0.0f64;
        for (prim_ix, prim) in mesh.primitives.iter().enumerate() {
            if let Some(position) = prim.attributes.get("POSITION") {
                score = score.max(extent_score(position));
            }
            let queue =
                self.primitive_queue(mesh_key, mesh.name.as_deref(), prim_ix, prim, &holders)?;
            primitives.push(SubQueue { label: prim_ix.to_string(), queue });
        }
        let animations = self.animation_groups(mesh_key, &holders)?;
        let unit = MeshUnit::new(primitives, animations, self.policy.animations_first);
        Ok(Some(PropertyEntry {
            name: mesh_key.to_owned(),
            unit: PropertyUnit::Mesh(unit),
            score,
            is_camera: false,
        }))
    }

    fn camera_property(&mut self, camera_key: &str) -> Result<Option<PropertyEntry>, StreamError> {
        let Some(camera) = self.table.cameras.get(camera_key) else {
            return Ok(None);
        };
        let holders: Vec<NodeIx> = self.arena.nodes_for_camera(camera_key).to_vec();
        if holders.is_empty() {
            self.warnings.push(format!("camera {camera_key} is not referenced by any node"));
        }
        let id = content_id("camera", &camera_key)?;
        let mut item = TransferItem::instant(
            id,
            Header::CameraItem(CameraItem {
                id,
                property: camera_key.to_owned(),
                name: camera.name.clone(),
                projection: camera.projection.clone(),
                hierarchy: Vec::new(),
            }),
        );
        item.pending_hierarchy = Some(PendingHierarchy { nodes: holders, joints: Vec::new() });
        let id = self.store.intern(item);
        let mut queue = TransferQueue::new();
        queue.push("camera", id);
        Ok(Some(PropertyEntry {
            name: camera_key.to_owned(),
            unit: PropertyUnit::Single(queue),
            score: 0.0,
            is_camera: true,
        }))
    }
}

/// Build scheduling units for every property of `table`.
///
/// # Errors
///
/// Returns [`StreamError`] on id-derivation failures; structural oddities
/// (unknown materials, missing joints) become warnings, not errors.
pub fn ingest(
    table: &AssetTable,
    arena: &NodeArena,
    policy: &Policy,
    store: &mut ItemStore,
) -> Result<Ingested, StreamError> {
    let mut ing = Ingestor::new(table, arena, policy, store);
    let mut properties = Vec::new();
    let mesh_keys: Vec<String> = table.meshes.keys().cloned().collect();
    for key in &mesh_keys {
        if let Some(entry) = ing.mesh_property(key)? {
            properties.push(entry);
        }
    }
    let camera_keys: Vec<String> = table.cameras.keys().cloned().collect();
    for key in &camera_keys {
        if let Some(entry) = ing.camera_property(key)? {
            properties.push(entry);
        }
    }
    Ok(Ingested { properties, warnings: ing.warnings })
}
