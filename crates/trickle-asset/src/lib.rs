// SPDX-License-Identifier: Apache-2.0
//! Normalized asset tables for trickle streams.
//!
//! The sender does not parse source documents itself; an external collaborator
//! hands it an [`AssetTable`]: a flat, normalized view of one hierarchical 3D
//! asset (meshes, materials, textures, cameras, skins, animations and the
//! node graph), with every binary attribute described by an [`Accessor`] into
//! a backing store. This crate owns those table types, the [`AssetProvider`]
//! trait that produces them, a shared read-only [`AssetCache`], and the
//! [`RangeReader`] abstraction over the backing store.

mod store;

pub use store::{AssetCache, AssetProvider, FsAssetProvider, FsRangeReader, MemoryRangeReader, RangeReader};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trickle_graph::{NodeDesc, NodeId};

/// Element arity of an accessor (how many components form one element).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElementType {
    /// Single component.
    Scalar,
    /// Two components.
    Vec2,
    /// Three components.
    Vec3,
    /// Four components.
    Vec4,
    /// 2x2 matrix (4 components).
    Mat2,
    /// 3x3 matrix (9 components).
    Mat3,
    /// 4x4 matrix (16 components).
    Mat4,
}

impl ElementType {
    /// Components per element.
    pub fn components(self) -> u64 {
        match self {
            ElementType::Scalar => 1,
            ElementType::Vec2 => 2,
            ElementType::Vec3 => 3,
            ElementType::Vec4 => 4,
            ElementType::Mat2 => 4,
            ElementType::Mat3 => 9,
            ElementType::Mat4 => 16,
        }
    }
}

/// Scalar component type of an accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    /// Signed byte.
    I8,
    /// Unsigned byte.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer (carried in tables, not streamable).
    I32,
    /// Unsigned 32-bit integer (carried in tables, not streamable).
    U32,
    /// 32-bit IEEE float.
    F32,
}

impl ComponentType {
    /// Byte width of one component.
    pub fn byte_width(self) -> u64 {
        match self {
            ComponentType::I8 | ComponentType::U8 => 1,
            ComponentType::I16 | ComponentType::U16 => 2,
            ComponentType::I32 | ComponentType::U32 | ComponentType::F32 => 4,
        }
    }

    /// Whether chunked delivery and typed reassembly support this width.
    ///
    /// Mirrors the delivery pipeline: 32-bit integer attributes are accepted
    /// in tables but rejected as a configuration error when queued.
    pub fn streamable(self) -> bool {
        !matches!(self, ComponentType::I32 | ComponentType::U32)
    }
}

/// Typed, counted view into a backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accessor {
    /// Element arity.
    pub element_type: ElementType,
    /// Component type.
    pub component_type: ComponentType,
    /// Number of elements.
    pub count: u64,
    /// Absolute byte offset into the backing store.
    pub byte_offset: u64,
    /// Declared byte stride; zero means tightly packed.
    #[serde(default)]
    pub byte_stride: u64,
    /// Backing store key (path relative to the asset root).
    pub store: String,
    /// Per-component minima, when the source document provides them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Vec<f64>>,
    /// Per-component maxima, when the source document provides them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Vec<f64>>,
}

impl Accessor {
    /// Bytes occupied by one tightly packed element.
    pub fn element_bytes(&self) -> u64 {
        self.element_type.components() * self.component_type.byte_width()
    }

    /// Total payload bytes when tightly packed.
    pub fn total_bytes(&self) -> u64 {
        self.count * self.element_bytes()
    }

    /// True when the declared stride interleaves this attribute with others.
    pub fn is_interlaced(&self) -> bool {
        self.byte_stride != 0 && self.byte_stride != self.element_bytes()
    }
}

/// Topology mode of a primitive, as a raw GL enum (4 = TRIANGLES).
pub const TRIANGLES: u32 = 4;

/// One drawable primitive of a mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveDef {
    /// Topology mode (GL enum; 4 = TRIANGLES).
    #[serde(default = "default_mode")]
    pub mode: u32,
    /// Vertex attributes by canonical label (POSITION, NORMAL, ...).
    pub attributes: BTreeMap<String, Accessor>,
    /// Index accessor, when the primitive is indexed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<Accessor>,
    /// Material key in the asset table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
}

fn default_mode() -> u32 {
    TRIANGLES
}

/// A mesh: a named list of primitives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshDef {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Primitives in source order.
    pub primitives: Vec<PrimitiveDef>,
}

/// Material parameter table. String-valued entries reference textures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialDef {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Shading technique key, when the source document names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technique: Option<String>,
    /// Parameter values; strings name entries in [`AssetTable::textures`].
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

/// Sampler parameters for a texture, as raw GL enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SamplerDef {
    /// Magnification filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mag_filter: Option<u32>,
    /// Minification filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_filter: Option<u32>,
    /// Wrap mode along S.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_s: Option<u32>,
    /// Wrap mode along T.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_t: Option<u32>,
}

/// A texture reference: the image itself is fetched out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureDef {
    /// Image path relative to the asset root.
    pub source: String,
    /// Pixel format (GL enum; 6408 = RGBA).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<u32>,
    /// Internal format (GL enum).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_format: Option<u32>,
    /// Texture target (GL enum; 3553 = TEXTURE_2D).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<u32>,
    /// Sampler parameters.
    #[serde(default)]
    pub sampler: SamplerDef,
}

/// Camera projection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "projection", rename_all = "lowercase")]
pub enum Projection {
    /// Perspective projection.
    Perspective {
        /// Vertical field of view in radians.
        yfov: f64,
        /// Aspect ratio, when fixed by the asset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aspect_ratio: Option<f64>,
        /// Near clip plane.
        znear: f64,
        /// Far clip plane.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zfar: Option<f64>,
    },
    /// Orthographic projection.
    Orthographic {
        /// Horizontal magnification.
        xmag: f64,
        /// Vertical magnification.
        ymag: f64,
        /// Near clip plane.
        znear: f64,
        /// Far clip plane.
        zfar: f64,
    },
}

/// A camera property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDef {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Projection parameters.
    #[serde(flatten)]
    pub projection: Projection,
}

/// A skin: inverse bind matrices plus the joints they apply to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinDef {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Accessor over the inverse bind matrices (MAT4 float).
    pub inverse_bind_matrices: Accessor,
    /// Joint tags, in matrix order.
    pub joint_names: Vec<String>,
    /// Optional bind shape matrix (column-major, 16 floats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_shape_matrix: Option<Vec<f64>>,
}

/// One animation channel: a sampler wired to a node's transform path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDef {
    /// Node the channel drives.
    pub target_node: NodeId,
    /// Transform path driven ("translation", "rotation", "scale").
    pub target_path: String,
    /// Interpolation mode ("LINEAR", ...).
    #[serde(default = "default_interpolation")]
    pub interpolation: String,
    /// Input parameter name (keyframe times) in [`AnimationDef::parameters`].
    pub input: String,
    /// Output parameter name (keyframe values).
    pub output: String,
}

fn default_interpolation() -> String {
    "LINEAR".to_owned()
}

/// An animation: named keyframe parameters plus the channels sampling them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationDef {
    /// Keyframe parameter accessors by name (TIME, rotation, ...).
    #[serde(default)]
    pub parameters: BTreeMap<String, Accessor>,
    /// Channels in source order.
    #[serde(default)]
    pub channels: Vec<ChannelDef>,
}

/// The whole normalized asset, as produced by the parsing collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetTable {
    /// Top-level asset metadata, forwarded verbatim to the consumer.
    #[serde(default)]
    pub info: BTreeMap<String, serde_json::Value>,
    /// Meshes by property id.
    #[serde(default)]
    pub meshes: BTreeMap<String, MeshDef>,
    /// Materials by key.
    #[serde(default)]
    pub materials: BTreeMap<String, MaterialDef>,
    /// Textures by key.
    #[serde(default)]
    pub textures: BTreeMap<String, TextureDef>,
    /// Cameras by property id.
    #[serde(default)]
    pub cameras: BTreeMap<String, CameraDef>,
    /// Skins by key.
    #[serde(default)]
    pub skins: BTreeMap<String, SkinDef>,
    /// Animations by name.
    #[serde(default)]
    pub animations: BTreeMap<String, AnimationDef>,
    /// Scene nodes in source order.
    #[serde(default)]
    pub nodes: Vec<NodeDesc>,
    /// Parent → children edges of the node graph.
    #[serde(default)]
    pub children: BTreeMap<NodeId, Vec<NodeId>>,
}

impl AssetTable {
    /// Build the node arena (with typed views and edges) for one session.
    ///
    /// # Errors
    ///
    /// Returns [`trickle_graph::GraphError`] on duplicate node ids or edges
    /// naming unknown nodes.
    pub fn build_arena(&self) -> Result<trickle_graph::NodeArena, trickle_graph::GraphError> {
        let mut arena = trickle_graph::NodeArena::new();
        for node in &self.nodes {
            arena.insert(node.clone())?;
        }
        for (parent, children) in &self.children {
            for child in children {
                arena.link(parent, child)?;
            }
        }
        Ok(arena)
    }
}

/// Errors from asset providers and backing-store readers.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// The asset reference did not resolve to a table.
    #[error("asset not found: {0}")]
    NotFound(String),
    /// The table document failed to deserialize.
    #[error("malformed asset table {reference}: {source}")]
    Malformed {
        /// Asset reference being loaded.
        reference: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
    /// The backing store key is unknown to the reader.
    #[error("unknown backing store: {0}")]
    UnknownStore(String),
    /// The backing store ended before the requested range.
    #[error("short read from {store}: wanted {want} bytes at {offset}, got {got}")]
    ShortRead {
        /// Backing store key.
        store: String,
        /// Byte offset of the range.
        offset: u64,
        /// Bytes requested.
        want: u64,
        /// Bytes available.
        got: u64,
    },
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accessor(etype: ElementType, ctype: ComponentType, count: u64, stride: u64) -> Accessor {
        Accessor {
            element_type: etype,
            component_type: ctype,
            count,
            byte_offset: 0,
            byte_stride: stride,
            store: "data.bin".into(),
            min: None,
            max: None,
        }
    }

    #[test]
    fn element_and_total_bytes() {
        let a = accessor(ElementType::Vec3, ComponentType::F32, 7, 0);
        assert_eq!(a.element_bytes(), 12);
        assert_eq!(a.total_bytes(), 84);
    }

    #[test]
    fn stride_matching_element_size_is_not_interlaced() {
        let tight = accessor(ElementType::Vec2, ComponentType::U16, 3, 0);
        let explicit = accessor(ElementType::Vec2, ComponentType::U16, 3, 4);
        let interlaced = accessor(ElementType::Vec2, ComponentType::U16, 3, 12);
        assert!(!tight.is_interlaced());
        assert!(!explicit.is_interlaced());
        assert!(interlaced.is_interlaced());
    }

    #[test]
    fn wide_integer_components_are_not_streamable() {
        assert!(ComponentType::F32.streamable());
        assert!(ComponentType::U16.streamable());
        assert!(!ComponentType::U32.streamable());
        assert!(!ComponentType::I32.streamable());
    }

    #[test]
    fn table_round_trips_and_builds_arena() {
        let text = r#"{
            "info": {"version": "1.0"},
            "nodes": [
                {"id": "root"},
                {"id": "child", "meshes": ["m0"]}
            ],
            "children": {"root": ["child"]}
        }"#;
        let table: AssetTable = serde_json::from_str(text).expect("decode");
        let arena = table.build_arena().expect("arena");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.nodes_for_mesh("m0").len(), 1);
    }
}
