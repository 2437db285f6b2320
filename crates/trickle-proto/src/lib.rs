// SPDX-License-Identifier: Apache-2.0
//! Wire headers, content identity, and scheduling policy for trickle streams.
//!
//! Every logical message in a trickle session is a [`Header`] — a small JSON
//! document carried on a text frame. Binary payload bytes travel on separate
//! binary frames and always belong to the most recent payload-bearing header,
//! so the frame type itself discriminates header from chunk and no length
//! prefix is needed.
//!
//! Items are keyed by [`ContentId`], a BLAKE3 hash over the item's nature and
//! its descriptor. Identical content shared between properties (two meshes
//! using one position buffer, say) collapses to one id, one transfer, and one
//! receiver-side resource.

mod wire;

pub use wire::{decode_header, encode_header};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trickle_asset::{ComponentType, ElementType, Projection, SamplerDef};
use trickle_graph::{NodeId, TraversalRecord};

/// Errors from header encoding, decoding, and id derivation.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// A header failed to serialize.
    #[error("header encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    /// An inbound text frame was not a valid header.
    #[error("header decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    /// An item descriptor failed to serialize during id derivation.
    #[error("content id derivation failed: {0}")]
    Derive(#[source] serde_json::Error),
}

/// A 32-byte BLAKE3 content hash identifying one transferable item.
///
/// Rendered as lowercase hex on the wire and in logs.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ContentId(pub [u8; 32]);

impl ContentId {
    /// View the id as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for ContentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes: [u8; 32] = hex::decode(&text)
            .map_err(serde::de::Error::custom)?
            .try_into()
            .map_err(|_| serde::de::Error::custom("content id must be 32 bytes"))?;
        Ok(ContentId(bytes))
    }
}

/// Derive the [`ContentId`] of an item from its nature tag and descriptor.
///
/// The nature tag keeps distinct natures with coincidentally equal
/// descriptors apart; within one nature, equal descriptors are the same item.
///
/// # Errors
///
/// Returns [`ProtoError::Derive`] if the descriptor fails to serialize.
pub fn content_id<T: Serialize>(nature: &str, descriptor: &T) -> Result<ContentId, ProtoError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(nature.as_bytes());
    hasher.update(&[0]);
    hasher.update(&serde_json::to_vec(descriptor).map_err(ProtoError::Derive)?);
    Ok(ContentId(*hasher.finalize().as_bytes()))
}

/// Ordering key for top-level properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    /// Keep properties in asset source order.
    #[default]
    SourceOrder,
    /// Largest spatial extent first; cameras pinned by their sentinel scores.
    PriorityScore,
}

/// How the scheduler shares turns between top-level properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interleave {
    /// Finish the current property before starting the next.
    #[default]
    Exhaustive,
    /// Rotate to the next property after each full pass over the current one.
    RoundRobin,
}

/// Scheduling policy. Sent by the receiver as a [`Header::SortConfig`];
/// reconfiguration mid-stream pauses, re-sorts, and resumes without losing
/// transfer positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Top-level property ordering.
    pub property_sort: SortKey,
    /// Turn-sharing discipline between properties.
    pub interleave: Interleave,
    /// Push camera properties to the end of the order.
    pub cameras_last: bool,
    /// Stream index buffers (disabling them suits point-cloud style display).
    pub send_indices: bool,
    /// Emit a mesh's animations before its primitives.
    pub animations_first: bool,
    /// Cap animation keyframe payloads to small chunks so playback can start
    /// before the full timeline arrives.
    pub temporal_animation: bool,
    /// Chunk cap applied when `temporal_animation` is set, in bytes.
    pub animation_chunk_bytes: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            property_sort: SortKey::SourceOrder,
            interleave: Interleave::Exhaustive,
            cameras_last: false,
            send_indices: true,
            animations_first: false,
            temporal_animation: false,
            animation_chunk_bytes: 32,
        }
    }
}

/// Announces a chunked binary attribute; its bytes follow on binary frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferItem {
    /// Content id the following binary frames belong to.
    pub id: ContentId,
    /// Property id this delivery is for.
    pub property: String,
    /// Display name of the property, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    /// Primitive index within the mesh, for vertex data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primitive: Option<usize>,
    /// Attribute label ("indices", "POSITION", or an animation parameter).
    pub attribute: String,
    /// Element arity of the payload.
    pub element_type: ElementType,
    /// Component type of the payload.
    pub component_type: ComponentType,
    /// Total element count of the payload.
    pub count: u64,
    /// Owning animation, for keyframe parameter payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<String>,
    /// Paths from the consuming node(s) up to the root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hierarchy: Vec<TraversalRecord>,
}

/// Announces a texture and its sampler state. The image travels out-of-band;
/// a later [`Header::TexturePath`] names where to fetch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureItem {
    /// Content id of the texture.
    pub id: ContentId,
    /// Texture key within the asset.
    pub key: String,
    /// Pixel format (GL enum).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<u32>,
    /// Internal format (GL enum).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_format: Option<u32>,
    /// Texture target (GL enum).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
    /// Sampler parameters.
    #[serde(default)]
    pub sampler: SamplerDef,
}

/// Binds a material to a primitive of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialItem {
    /// Content id of the material.
    pub id: ContentId,
    /// Material key within the asset.
    pub key: String,
    /// Property id the binding is for.
    pub property: String,
    /// Primitive index within the mesh.
    pub primitive: usize,
    /// Paths from the consuming node(s) up to the root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hierarchy: Vec<TraversalRecord>,
}

/// Delivers a camera's full parameter set in one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraItem {
    /// Content id of the camera.
    pub id: ContentId,
    /// Property id of the camera.
    pub property: String,
    /// Display name, when the camera has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Projection parameters.
    #[serde(flatten)]
    pub projection: Projection,
    /// Paths from the holding node(s) up to the root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hierarchy: Vec<TraversalRecord>,
}

/// Announces a skin; its inverse bind matrices follow on binary frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinItem {
    /// Content id the following binary frames belong to.
    pub id: ContentId,
    /// Skin key within the asset.
    pub key: String,
    /// Property id of the skinned mesh this delivery is for.
    pub property: String,
    /// Joint tags, in inverse-bind-matrix order.
    pub joint_names: Vec<String>,
    /// Optional bind shape matrix (column-major, 16 values).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_shape_matrix: Option<Vec<f64>>,
    /// Element arity of the matrix payload.
    pub element_type: ElementType,
    /// Component type of the matrix payload.
    pub component_type: ComponentType,
    /// Matrix count of the payload.
    pub count: u64,
    /// Paths from each joint node up to the root, so the full skeleton
    /// exists before matrices arrive.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joints: Vec<TraversalRecord>,
    /// Paths from the skinned node(s) up to the root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hierarchy: Vec<TraversalRecord>,
}

/// Wires one animation channel to its already-delivered keyframe parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationChannelItem {
    /// Content id of the channel.
    pub id: ContentId,
    /// Owning animation name.
    pub animation: String,
    /// Node the channel drives.
    pub target_node: NodeId,
    /// Transform path driven ("translation", "rotation", "scale").
    pub target_path: String,
    /// Interpolation mode.
    pub interpolation: String,
    /// Content id of the input (keyframe time) payload.
    pub input: ContentId,
    /// Content id of the output (keyframe value) payload.
    pub output: ContentId,
    /// Path from the target node up to the root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hierarchy: Vec<TraversalRecord>,
}

/// One logical message of a trickle session, carried on a text frame.
///
/// Sender → receiver: everything except `AssetRequest`, `SortConfig` and
/// `PriorityHint`, which flow receiver → sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Header {
    /// First message of a stream: top-level asset metadata.
    AssetInfo {
        /// Metadata forwarded verbatim from the asset table.
        info: BTreeMap<String, serde_json::Value>,
    },
    /// A chunked binary attribute delivery.
    BufferItem(BufferItem),
    /// A texture announcement.
    TextureItem(TextureItem),
    /// Out-of-band location of a previously announced texture image.
    TexturePath {
        /// Content id of the texture.
        id: ContentId,
        /// Fetch path, relative to the asset root.
        path: String,
    },
    /// A material-to-primitive binding.
    MaterialItem(MaterialItem),
    /// Parameter values of a previously bound material.
    MaterialParams {
        /// Content id of the material.
        id: ContentId,
        /// Shading technique key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        technique: Option<String>,
        /// Parameter values; strings name textures.
        values: BTreeMap<String, serde_json::Value>,
    },
    /// A camera delivery.
    CameraItem(CameraItem),
    /// A skin delivery; matrices follow on binary frames.
    SkinItem(SkinItem),
    /// An animation channel delivery.
    AnimationChannelItem(AnimationChannelItem),
    /// Fatal condition; the stream stops after this.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// Non-fatal condition; the stream continues.
    Warning {
        /// Human-readable description.
        message: String,
    },
    /// Receiver → sender: start streaming the named asset.
    AssetRequest {
        /// Asset reference to resolve and stream.
        reference: String,
    },
    /// Receiver → sender: adopt a new scheduling policy.
    SortConfig {
        /// Policy to adopt.
        policy: Policy,
    },
    /// Receiver → sender: viewpoint hint for future prioritization.
    PriorityHint {
        /// World-space view position.
        position: [f32; 3],
    },
    /// Final message of a stream: everything queued has been delivered.
    StreamComplete,
}

impl Header {
    /// Stable kind tag, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Header::AssetInfo { .. } => "asset-info",
            Header::BufferItem(_) => "buffer-item",
            Header::TextureItem(_) => "texture-item",
            Header::TexturePath { .. } => "texture-path",
            Header::MaterialItem(_) => "material-item",
            Header::MaterialParams { .. } => "material-params",
            Header::CameraItem(_) => "camera-item",
            Header::SkinItem(_) => "skin-item",
            Header::AnimationChannelItem(_) => "animation-channel-item",
            Header::Error { .. } => "error",
            Header::Warning { .. } => "warning",
            Header::AssetRequest { .. } => "asset-request",
            Header::SortConfig { .. } => "sort-config",
            Header::PriorityHint { .. } => "priority-hint",
            Header::StreamComplete => "stream-complete",
        }
    }

    /// True when binary frames may follow this header.
    pub fn carries_payload(&self) -> bool {
        matches!(self, Header::BufferItem(_) | Header::SkinItem(_))
    }
}
