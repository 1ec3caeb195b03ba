use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::Matrix4;
use uuid::Uuid;
use vulkano::buffer::{IndexBuffer, Subbuffer};
use vulkano::format::Format;
use vulkano::image::sampler::Sampler;
use vulkano::image::view::ImageView;

pub type AssetId = Uuid;

/// Texture roles a material may carry, in the stable order the renderer
/// iterates them when assigning bindless indices.
pub const MATERIAL_TEXTURE_NAMES: [&str; 5] = [
    "base_color_texture",
    "metallic_roughness_texture",
    "normal_texture",
    "occlusion_texture",
    "emissive_texture",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Image,
    Sampler,
    Texture,
    Material,
    Mesh,
    Node,
}

/// Scene components are stored in one flat table per kind on [`Scene`];
/// cross references are indices into those tables.
pub trait Component {
    fn kind(&self) -> ComponentKind;
}

/// An uploaded, immutable GPU image.
pub struct ImageAsset {
    pub view: Arc<ImageView>,
}

impl Component for ImageAsset {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Image
    }
}

pub struct SamplerAsset {
    pub sampler: Arc<Sampler>,
}

impl Component for SamplerAsset {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Sampler
    }
}

/// A sampler/image pair referenced from materials.
pub struct Texture {
    pub sampler: usize,
    pub image: usize,
}

impl Component for Texture {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Texture
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AlphaMode {
    Opaque = 0,
    Mask = 1,
    Blend = 2,
}

pub struct Material {
    pub id: AssetId,
    /// Texture role name to index into the scene's texture table. A
    /// `BTreeMap` keeps iteration order stable across rebuilds.
    pub textures: BTreeMap<&'static str, usize>,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub emissive_factor: [f32; 3],
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

impl Component for Material {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Material
    }
}

impl Default for Material {
    fn default() -> Self {
        Material {
            id: AssetId::new_v4(),
            textures: BTreeMap::new(),
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            normal_scale: 1.0,
            occlusion_strength: 1.0,
            emissive_factor: [0.0, 0.0, 0.0],
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
        }
    }
}

/// One vertex attribute stream, already sliced to the accessor's range.
pub struct VertexAttribute {
    pub buffer: Subbuffer<[u8]>,
    pub format: Format,
    pub stride: u32,
    pub count: u32,
}

pub struct IndexAttribute {
    pub buffer: IndexBuffer,
    pub count: u32,
}

/// An immutable drawable: vertex attribute streams keyed by glTF semantic
/// name (POSITION, NORMAL, TEXCOORD_0, ...), an optional index attribute and
/// a material table index.
pub struct Primitive {
    pub vertex_attributes: BTreeMap<String, VertexAttribute>,
    pub index_attribute: Option<IndexAttribute>,
    pub material: usize,
    pub vertex_count: u32,
}

pub struct Mesh {
    pub primitives: Vec<Arc<Primitive>>,
}

impl Component for Mesh {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Mesh
    }
}

/// Scene graph node. Children are owning indices into the scene's flat node
/// table; the parent is a plain back index, never a reciprocal owner.
pub struct Node {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub local_transform: Matrix4<f32>,
    pub mesh: Option<usize>,
}

impl Component for Node {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Node
    }
}

/// Aggregate of all components loaded from one glTF document.
pub struct Scene {
    pub name: String,
    pub root_nodes: Vec<usize>,
    pub nodes: Vec<Node>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
    pub samplers: Vec<SamplerAsset>,
    pub images: Vec<ImageAsset>,
}

impl Scene {
    pub fn material(&self, index: usize) -> &Material {
        &self.materials[index]
    }

    pub fn texture(&self, index: usize) -> &Texture {
        &self.textures[index]
    }

    pub fn sampler(&self, index: usize) -> &SamplerAsset {
        &self.samplers[index]
    }

    pub fn image(&self, index: usize) -> &ImageAsset {
        &self.images[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_defaults_are_opaque_white() {
        let material = Material::default();
        assert_eq!(material.base_color_factor, [1.0; 4]);
        assert_eq!(material.alpha_mode, AlphaMode::Opaque);
        assert!(!material.double_sided);
        assert!(material.textures.is_empty());
    }

    #[test]
    fn component_kinds_match_tables() {
        let material = Material::default();
        assert_eq!(material.kind(), ComponentKind::Material);

        let node = Node {
            name: "n".into(),
            parent: None,
            children: vec![],
            local_transform: Matrix4::identity(),
            mesh: None,
        };
        assert_eq!(node.kind(), ComponentKind::Node);
    }
}
