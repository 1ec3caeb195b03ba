use tracing::info;

use gpu::Gpu;

use crate::config::Config;
use crate::error::AssetError;
use crate::frame_graph::FrameGraph;
use crate::light::LightAsset;
use crate::loader::load_gltf;
use crate::scene_graph::Scene;
use crate::shader::Shader;

/// Read-only store of everything the config references: scenes, lights,
/// shaders and frame graphs, accessed by index from the frame graph.
pub struct Assets {
    scenes: Vec<Scene>,
    lights: Vec<LightAsset>,
    shaders: Vec<Shader>,
    frame_graphs: Vec<FrameGraph>,
}

impl Assets {
    pub fn load(config: &Config, gpu: &Gpu) -> Result<Assets, AssetError> {
        let scenes = config
            .scenes
            .iter()
            .map(|path| load_gltf(gpu, &config.resolve(path)))
            .collect::<Result<Vec<_>, _>>()?;

        let lights = config
            .lights
            .iter()
            .map(|path| LightAsset::load(config.resolve(path)))
            .collect::<Result<Vec<_>, _>>()?;

        let shaders = config
            .shaders
            .iter()
            .map(|path| Shader::load(config.resolve(path)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(AssetError::from)?;

        let frame_graphs = config
            .frame_graphs
            .iter()
            .map(|path| FrameGraph::load(config.resolve(path)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(AssetError::from)?;

        info!(
            "assets loaded: {} scenes, {} lights, {} shaders, {} frame graphs",
            scenes.len(),
            lights.len(),
            shaders.len(),
            frame_graphs.len(),
        );

        Ok(Assets {
            scenes,
            lights,
            shaders,
            frame_graphs,
        })
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn from_parts(
        scenes: Vec<Scene>,
        lights: Vec<LightAsset>,
        shaders: Vec<Shader>,
        frame_graphs: Vec<FrameGraph>,
    ) -> Assets {
        Assets {
            scenes,
            lights,
            shaders,
            frame_graphs,
        }
    }

    pub fn scene(&self, index: u32) -> Result<&Scene, AssetError> {
        self.scenes
            .get(index as usize)
            .ok_or(AssetError::IndexOutOfRange { kind: "scene", index })
    }

    pub fn light(&self, index: u32) -> Result<&LightAsset, AssetError> {
        self.lights
            .get(index as usize)
            .ok_or(AssetError::IndexOutOfRange { kind: "light", index })
    }

    pub fn shader(&self, index: u32) -> Result<&Shader, AssetError> {
        self.shaders
            .get(index as usize)
            .ok_or(AssetError::IndexOutOfRange { kind: "shader", index })
    }

    pub fn frame_graph(&self, index: u32) -> Result<&FrameGraph, AssetError> {
        self.frame_graphs
            .get(index as usize)
            .ok_or(AssetError::IndexOutOfRange {
                kind: "frame graph",
                index,
            })
    }
}
