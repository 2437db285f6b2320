// SPDX-License-Identifier: Apache-2.0
//! Recording scene port for tests.

use std::collections::BTreeMap;

use trickle_graph::NodeDesc;
use trickle_proto::{
    AnimationChannelItem, CameraItem, ContentId, MaterialItem, SkinItem, TextureItem,
};

use crate::port::{ElementData, ScenePort};

/// In-memory [`ScenePort`] that records every call. Handles are sequence
/// numbers, so assertions can follow clone and attach order exactly.
#[derive(Debug, Default)]
pub struct MockScene {
    next: u32,
    /// Materialized nodes: handle and node id.
    pub nodes: Vec<(u32, String)>,
    /// Clone calls: source handle, new handle.
    pub clones: Vec<(u32, u32)>,
    /// Attach calls: parent handle, child handle.
    pub edges: Vec<(u32, u32)>,
    /// Root attachments.
    pub roots: Vec<u32>,
    /// Element writes: item, attribute, element offset, component count.
    pub writes: Vec<(ContentId, String, u64, usize)>,
    /// Items reported fully delivered.
    pub completed: Vec<ContentId>,
    /// Channel progress reports: animation, channel, playable elements.
    pub progress: Vec<(String, ContentId, u64)>,
    /// Texture paths received.
    pub texture_paths: Vec<(ContentId, String)>,
    /// Everything else, as coarse event tags.
    pub events: Vec<String>,
    /// Asset metadata received.
    pub info: BTreeMap<String, serde_json::Value>,
    /// Stream completion flag.
    pub complete: bool,
}

impl MockScene {
    /// Fresh recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh(&mut self) -> u32 {
        let handle = self.next;
        self.next += 1;
        handle
    }
}

impl ScenePort for MockScene {
    type Handle = u32;

    fn materialize(&mut self, desc: &NodeDesc) -> u32 {
        let handle = self.fresh();
        self.nodes.push((handle, desc.id.clone()));
        handle
    }

    fn clone_node(&mut self, node: &u32) -> u32 {
        let handle = self.fresh();
        self.clones.push((*node, handle));
        handle
    }

    fn attach(&mut self, parent: &u32, child: &u32) {
        self.edges.push((*parent, *child));
    }

    fn attach_root(&mut self, child: &u32) {
        self.roots.push(*child);
    }

    fn asset_info(&mut self, info: &BTreeMap<String, serde_json::Value>) {
        self.info = info.clone();
    }

    fn write_elements(
        &mut self,
        id: ContentId,
        attribute: &str,
        element_offset: u64,
        data: &ElementData,
    ) {
        self.writes
            .push((id, attribute.to_owned(), element_offset, data.component_len()));
    }

    fn item_complete(&mut self, id: ContentId) {
        self.completed.push(id);
    }

    fn announce_texture(&mut self, item: &TextureItem) {
        self.events.push(format!("texture:{}", item.key));
    }

    fn set_texture_source(&mut self, id: ContentId, path: &str) {
        self.texture_paths.push((id, path.to_owned()));
    }

    fn apply_material(&mut self, item: &MaterialItem) {
        self.events
            .push(format!("material:{}:{}:{}", item.property, item.primitive, item.key));
    }

    fn apply_material_params(
        &mut self,
        _id: ContentId,
        _technique: Option<&str>,
        values: &BTreeMap<String, serde_json::Value>,
    ) {
        self.events.push(format!("material-params:{}", values.len()));
    }

    fn apply_camera(&mut self, item: &CameraItem) {
        self.events.push(format!("camera:{}", item.property));
    }

    fn announce_skin(&mut self, item: &SkinItem) {
        self.events.push(format!("skin:{}:{}", item.key, item.joint_names.len()));
    }

    fn apply_channel(&mut self, item: &AnimationChannelItem) {
        self.events.push(format!(
            "channel:{}:{}:{}",
            item.animation, item.target_node, item.target_path
        ));
    }

    fn channel_progress(&mut self, animation: &str, channel: ContentId, elements: u64) {
        self.progress.push((animation.to_owned(), channel, elements));
    }

    fn stream_complete(&mut self) {
        self.complete = true;
    }
}
