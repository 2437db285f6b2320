// SPDX-License-Identifier: Apache-2.0
//! The scene port: the seam between the stream client and a renderer.
//!
//! The client owns protocol state (hierarchy decoding, chunk reassembly,
//! progress tracking) and pushes everything scene-shaped through this trait.
//! A renderer implements it with real scene-graph handles; tests use the
//! recording mock.

use std::collections::BTreeMap;

use trickle_graph::NodeDesc;
use trickle_proto::{
    AnimationChannelItem, CameraItem, ContentId, MaterialItem, SkinItem, TextureItem,
};

/// Typed elements decoded from reassembled chunk bytes, as flat component
/// arrays (`elements × components` values, little-endian source order).
#[derive(Debug, Clone, PartialEq)]
pub enum ElementData {
    /// 32-bit float components.
    F32(Vec<f32>),
    /// Unsigned 16-bit components.
    U16(Vec<u16>),
    /// Signed 16-bit components.
    I16(Vec<i16>),
    /// Unsigned 8-bit components.
    U8(Vec<u8>),
    /// Signed 8-bit components.
    I8(Vec<i8>),
}

impl ElementData {
    /// Number of components held.
    pub fn component_len(&self) -> usize {
        match self {
            ElementData::F32(v) => v.len(),
            ElementData::U16(v) => v.len(),
            ElementData::I16(v) => v.len(),
            ElementData::U8(v) => v.len(),
            ElementData::I8(v) => v.len(),
        }
    }
}

/// Receiver-side scene integration point.
///
/// Handles are renderer-owned node references; the client never inspects
/// them, only stores and hands them back.
pub trait ScenePort {
    /// Renderer node handle.
    type Handle: Clone;

    /// Create a scene node from its wire descriptor, unattached.
    fn materialize(&mut self, desc: &NodeDesc) -> Self::Handle;

    /// Duplicate a node (and its accumulated payloads) for a second parent.
    fn clone_node(&mut self, node: &Self::Handle) -> Self::Handle;

    /// Attach `child` under `parent`.
    fn attach(&mut self, parent: &Self::Handle, child: &Self::Handle);

    /// Attach `child` at the scene root.
    fn attach_root(&mut self, child: &Self::Handle);

    /// Top-level asset metadata, first message of a stream.
    fn asset_info(&mut self, info: &BTreeMap<String, serde_json::Value>);

    /// Typed elements arrived for a binary item, starting at
    /// `element_offset` elements into the full payload.
    fn write_elements(
        &mut self,
        id: ContentId,
        attribute: &str,
        element_offset: u64,
        data: &ElementData,
    );

    /// A binary item's payload is fully delivered.
    fn item_complete(&mut self, id: ContentId);

    /// A texture and its sampler state were announced.
    fn announce_texture(&mut self, item: &TextureItem);

    /// The out-of-band image location for an announced texture.
    fn set_texture_source(&mut self, id: ContentId, path: &str);

    /// A material was bound to a primitive.
    fn apply_material(&mut self, item: &MaterialItem);

    /// Parameter values for a previously bound material.
    fn apply_material_params(
        &mut self,
        id: ContentId,
        technique: Option<&str>,
        values: &BTreeMap<String, serde_json::Value>,
    );

    /// A camera arrived, fully parameterized.
    fn apply_camera(&mut self, item: &CameraItem);

    /// A skin was announced; its matrices follow as a binary item.
    fn announce_skin(&mut self, item: &SkinItem);

    /// An animation channel was wired to its keyframe parameters.
    fn apply_channel(&mut self, item: &AnimationChannelItem);

    /// Playable keyframes for a channel: the minimum of the input and
    /// output elements delivered so far.
    fn channel_progress(&mut self, animation: &str, channel: ContentId, elements: u64);

    /// The stream finished; everything queued has arrived.
    fn stream_complete(&mut self);
}
