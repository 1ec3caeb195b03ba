use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use gltf::texture::{MagFilter, MinFilter, WrappingMode};
use nalgebra::Matrix4;
use tracing::info;
use vulkano::buffer::{BufferUsage, IndexBuffer};
use vulkano::format::Format;
use vulkano::image::sampler::{
    Filter, SamplerAddressMode, SamplerCreateInfo, SamplerMipmapMode,
};

use gpu::Gpu;

use crate::error::AssetError;
use crate::scene_graph::{
    AlphaMode, AssetId, ImageAsset, IndexAttribute, Material, Mesh, Node, Primitive,
    SamplerAsset, Scene, Texture, VertexAttribute,
};

/// Loads one glTF document into an immutable [`Scene`], uploading vertex,
/// index and image data to the GPU.
pub fn load_gltf(gpu: &Gpu, path: &Path) -> Result<Scene, AssetError> {
    let (document, buffers, images) = gltf::import(path).map_err(|source| AssetError::Gltf {
        path: path.to_path_buf(),
        source,
    })?;

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let samplers = load_samplers(gpu, &document)?;
    let default_sampler_index = samplers.len() - 1;

    let image_assets = load_images(gpu, path, &images)?;

    let textures: Vec<Texture> = document
        .textures()
        .map(|texture| Texture {
            sampler: texture
                .sampler()
                .index()
                .unwrap_or(default_sampler_index),
            image: texture.source().index(),
        })
        .collect();

    let mut materials: Vec<Material> = document.materials().map(load_material).collect();
    // Primitives without a material fall back to this default entry.
    let default_material_index = materials.len();
    materials.push(Material::default());

    let mut meshes = Vec::new();
    for mesh in document.meshes() {
        let mut primitives = Vec::new();
        for primitive in mesh.primitives() {
            primitives.push(Arc::new(load_primitive(
                gpu,
                &primitive,
                &buffers,
                default_material_index,
            )?));
        }
        meshes.push(Mesh { primitives });
    }

    let mut nodes: Vec<Node> = document
        .nodes()
        .map(|node| Node {
            name: node.name().unwrap_or_default().to_string(),
            parent: None,
            children: node.children().map(|child| child.index()).collect(),
            local_transform: Matrix4::from(node.transform().matrix()),
            mesh: node.mesh().map(|mesh| mesh.index()),
        })
        .collect();

    for index in 0..nodes.len() {
        for child_index in nodes[index].children.clone() {
            nodes[child_index].parent = Some(index);
        }
    }

    let root_nodes = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .map(|scene| scene.nodes().map(|node| node.index()).collect())
        .unwrap_or_default();

    info!(
        "loaded scene {name}: {} nodes, {} meshes, {} materials, {} textures",
        nodes.len(),
        meshes.len(),
        materials.len(),
        textures.len(),
    );

    Ok(Scene {
        name,
        root_nodes,
        nodes,
        meshes,
        materials,
        textures,
        samplers,
        images: image_assets,
    })
}

fn load_samplers(gpu: &Gpu, document: &gltf::Document) -> Result<Vec<SamplerAsset>, AssetError> {
    let mut samplers = Vec::new();

    for sampler in document.samplers() {
        let mag_filter = match sampler.mag_filter() {
            Some(MagFilter::Nearest) => Filter::Nearest,
            _ => Filter::Linear,
        };
        let (min_filter, mipmap_mode) = match sampler.min_filter() {
            Some(MinFilter::Nearest | MinFilter::NearestMipmapNearest) => {
                (Filter::Nearest, SamplerMipmapMode::Nearest)
            }
            Some(MinFilter::NearestMipmapLinear) => (Filter::Nearest, SamplerMipmapMode::Linear),
            Some(MinFilter::LinearMipmapNearest) => (Filter::Linear, SamplerMipmapMode::Nearest),
            _ => (Filter::Linear, SamplerMipmapMode::Linear),
        };

        let address_mode_u = address_mode(sampler.wrap_s());
        let address_mode_v = address_mode(sampler.wrap_t());

        let sampler = gpu.create_sampler(
            SamplerCreateInfo {
                mag_filter,
                min_filter,
                mipmap_mode,
                address_mode: [address_mode_u, address_mode_v, SamplerAddressMode::Repeat],
                ..Default::default()
            },
            "scene_sampler",
        )?;

        samplers.push(SamplerAsset { sampler });
    }

    // Textures without a sampler use this trailing default.
    samplers.push(SamplerAsset {
        sampler: gpu.default_sampler(),
    });

    Ok(samplers)
}

fn address_mode(wrap: WrappingMode) -> SamplerAddressMode {
    match wrap {
        WrappingMode::ClampToEdge => SamplerAddressMode::ClampToEdge,
        WrappingMode::MirroredRepeat => SamplerAddressMode::MirroredRepeat,
        WrappingMode::Repeat => SamplerAddressMode::Repeat,
    }
}

fn load_images(
    gpu: &Gpu,
    path: &Path,
    images: &[gltf::image::Data],
) -> Result<Vec<ImageAsset>, AssetError> {
    images
        .iter()
        .map(|data| {
            let rgba = to_rgba8(path, data)?;
            let view = gpu.upload_image(
                rgba,
                Format::R8G8B8A8_UNORM,
                [data.width, data.height, 1],
                "scene_image",
            )?;
            Ok(ImageAsset { view })
        })
        .collect()
}

/// Expands the pixel data to RGBA8, the one layout every scene image is
/// uploaded in.
fn to_rgba8(path: &Path, data: &gltf::image::Data) -> Result<Vec<u8>, AssetError> {
    use gltf::image::Format as GltfFormat;

    let pixel_count = (data.width * data.height) as usize;
    let pixels = &data.pixels;

    let rgba = match data.format {
        GltfFormat::R8G8B8A8 => pixels.clone(),
        GltfFormat::R8G8B8 => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for rgb in pixels.chunks_exact(3) {
                out.extend_from_slice(rgb);
                out.push(u8::MAX);
            }
            out
        }
        GltfFormat::R8G8 => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for rg in pixels.chunks_exact(2) {
                out.extend_from_slice(rg);
                out.push(0);
                out.push(u8::MAX);
            }
            out
        }
        GltfFormat::R8 => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for &r in pixels {
                out.extend_from_slice(&[r, r, r, u8::MAX]);
            }
            out
        }
        format => {
            return Err(AssetError::UnsupportedImageFormat {
                path: path.to_path_buf(),
                format,
            })
        }
    };

    Ok(rgba)
}

fn load_material(material: gltf::Material) -> Material {
    let pbr = material.pbr_metallic_roughness();
    let emissive_strength = material.emissive_strength().unwrap_or(1.0);
    let emissive_factor = material.emissive_factor().map(|v| v * emissive_strength);

    let mut textures = BTreeMap::new();
    if let Some(info) = pbr.base_color_texture() {
        textures.insert("base_color_texture", info.texture().index());
    }
    if let Some(info) = pbr.metallic_roughness_texture() {
        textures.insert("metallic_roughness_texture", info.texture().index());
    }
    if let Some(normal) = material.normal_texture() {
        textures.insert("normal_texture", normal.texture().index());
    }
    if let Some(occlusion) = material.occlusion_texture() {
        textures.insert("occlusion_texture", occlusion.texture().index());
    }
    if let Some(info) = material.emissive_texture() {
        textures.insert("emissive_texture", info.texture().index());
    }

    Material {
        id: AssetId::new_v4(),
        textures,
        base_color_factor: pbr.base_color_factor(),
        metallic_factor: pbr.metallic_factor(),
        roughness_factor: pbr.roughness_factor(),
        normal_scale: material.normal_texture().map(|n| n.scale()).unwrap_or(1.0),
        occlusion_strength: material
            .occlusion_texture()
            .map(|o| o.strength())
            .unwrap_or(1.0),
        emissive_factor,
        alpha_mode: match material.alpha_mode() {
            gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
            gltf::material::AlphaMode::Mask => AlphaMode::Mask,
            gltf::material::AlphaMode::Blend => AlphaMode::Blend,
        },
        alpha_cutoff: material.alpha_cutoff().unwrap_or(0.5),
        double_sided: material.double_sided(),
    }
}

fn load_primitive(
    gpu: &Gpu,
    primitive: &gltf::Primitive,
    buffers: &[gltf::buffer::Data],
    default_material_index: usize,
) -> Result<Primitive, AssetError> {
    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

    let mut vertex_attributes = BTreeMap::new();
    let mut vertex_count = 0u32;

    let mut insert = |name: &str,
                      bytes: Vec<u8>,
                      format: Format,
                      stride: u32|
     -> Result<u32, AssetError> {
        let count = bytes.len() as u32 / stride;
        let buffer = gpu.create_buffer_from_iter(bytes, BufferUsage::VERTEX_BUFFER, name)?;
        vertex_attributes.insert(
            name.to_string(),
            VertexAttribute {
                buffer,
                format,
                stride,
                count,
            },
        );
        Ok(count)
    };

    if let Some(positions) = reader.read_positions() {
        let data: Vec<[f32; 3]> = positions.collect();
        vertex_count = insert(
            "POSITION",
            bytemuck::cast_slice(&data).to_vec(),
            Format::R32G32B32_SFLOAT,
            12,
        )?;
    }

    if let Some(normals) = reader.read_normals() {
        let data: Vec<[f32; 3]> = normals.collect();
        insert(
            "NORMAL",
            bytemuck::cast_slice(&data).to_vec(),
            Format::R32G32B32_SFLOAT,
            12,
        )?;
    }

    if let Some(tangents) = reader.read_tangents() {
        let data: Vec<[f32; 4]> = tangents.collect();
        insert(
            "TANGENT",
            bytemuck::cast_slice(&data).to_vec(),
            Format::R32G32B32A32_SFLOAT,
            16,
        )?;
    }

    if let Some(tex_coords) = reader.read_tex_coords(0) {
        let data: Vec<[f32; 2]> = tex_coords.into_f32().collect();
        insert(
            "TEXCOORD_0",
            bytemuck::cast_slice(&data).to_vec(),
            Format::R32G32_SFLOAT,
            8,
        )?;
    }

    if let Some(colors) = reader.read_colors(0) {
        let data: Vec<[f32; 4]> = colors.into_rgba_f32().collect();
        insert(
            "COLOR_0",
            bytemuck::cast_slice(&data).to_vec(),
            Format::R32G32B32A32_SFLOAT,
            16,
        )?;
    }

    let index_attribute = match reader.read_indices() {
        Some(indices) => {
            let data: Vec<u32> = indices.into_u32().collect();
            let count = data.len() as u32;
            let buffer =
                gpu.create_buffer_from_iter(data, BufferUsage::INDEX_BUFFER, "indices")?;
            Some(IndexAttribute {
                buffer: IndexBuffer::U32(buffer),
                count,
            })
        }
        None => None,
    };

    Ok(Primitive {
        vertex_attributes,
        index_attribute,
        material: primitive
            .material()
            .index()
            .unwrap_or(default_material_index),
        vertex_count,
    })
}
