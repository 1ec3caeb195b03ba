use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AssetError;

/// Engine configuration: asset path lists plus the active frame graph.
/// Relative paths are resolved against the config file's directory.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub scenes: Vec<PathBuf>,
    #[serde(default)]
    pub lights: Vec<PathBuf>,
    #[serde(default)]
    pub shaders: Vec<PathBuf>,
    pub frame_graphs: Vec<PathBuf>,
    #[serde(default)]
    pub frame_graph_index: u32,

    #[serde(skip)]
    root: PathBuf,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, AssetError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config =
            serde_json::from_str(&text).map_err(|source| AssetError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        config.root = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

        Ok(config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_lists_and_graph_index() {
        let json = r#"{
            "scenes": ["scenes/helmet.gltf"],
            "lights": ["lights/default.json"],
            "shaders": ["shaders/geometry.vert", "shaders/geometry.frag"],
            "frame_graphs": ["frame_graphs/forward.json"],
            "frame_graph_index": 0
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.scenes.len(), 1);
        assert_eq!(config.shaders.len(), 2);
        assert_eq!(config.frame_graph_index, 0);
    }

    #[test]
    fn resolves_relative_to_root() {
        let mut config: Config = serde_json::from_str(r#"{"frame_graphs": []}"#).unwrap();
        config.root = PathBuf::from("/data");
        assert_eq!(
            config.resolve(Path::new("shaders/a.vert")),
            PathBuf::from("/data/shaders/a.vert")
        );
        assert_eq!(config.resolve(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
