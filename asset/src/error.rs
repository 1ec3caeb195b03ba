use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to import {path}: {source}")]
    Gltf {
        path: PathBuf,
        source: gltf::Error,
    },
    #[error("unsupported image format {format:?} in {path}")]
    UnsupportedImageFormat {
        path: PathBuf,
        format: gltf::image::Format,
    },
    #[error("{kind} index {index} is out of range")]
    IndexOutOfRange { kind: &'static str, index: u32 },
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    FrameGraph(#[from] FrameGraphError),
    #[error(transparent)]
    Gpu(#[from] gpu::GpuError),
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("failed to read shader {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported shader extension on {0}")]
    UnsupportedExtension(PathBuf),
    #[error("include depth limit exceeded in {0}")]
    IncludeDepth(PathBuf),
    #[error("failed to initialize the shader compiler")]
    CompilerInit,
    #[error("failed to compile {path}: {message}")]
    Compile { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum FrameGraphError {
    #[error("failed to read frame graph {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse frame graph {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unknown attachment format {0:?}")]
    UnknownFormat(String),
    #[error("subpass {subpass} of pass {pass} has {count} depth-stencil attachments, at most 1 is allowed")]
    TooManyDepthStencil {
        pass: String,
        subpass: String,
        count: usize,
    },
    #[error("graphics subpass {subpass} of pass {pass} is missing a {stage} shader")]
    MissingShaderStage {
        pass: String,
        subpass: String,
        stage: &'static str,
    },
    #[error("the ui subpass must be the last subpass of the last pass")]
    UiPassNotLast,
    #[error("subpass {subpass} of pass {pass} references attachment index {index} out of range")]
    AttachmentOutOfRange {
        pass: String,
        subpass: String,
        index: u32,
    },
}
