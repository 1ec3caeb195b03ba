use std::path::{Path, PathBuf};

use vulkano::shader::ShaderStages;
use xxhash_rust::xxh3::Xxh3;

use crate::error::ShaderError;

const INCLUDE_DEPTH_LIMIT: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStageKind {
    pub fn from_extension(path: &Path) -> Option<ShaderStageKind> {
        match path.extension()?.to_str()? {
            "vert" => Some(ShaderStageKind::Vertex),
            "frag" => Some(ShaderStageKind::Fragment),
            "comp" => Some(ShaderStageKind::Compute),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            ShaderStageKind::Vertex => "vertex",
            ShaderStageKind::Fragment => "fragment",
            ShaderStageKind::Compute => "compute",
        }
    }

    pub fn stages(&self) -> ShaderStages {
        match self {
            ShaderStageKind::Vertex => ShaderStages::VERTEX,
            ShaderStageKind::Fragment => ShaderStages::FRAGMENT,
            ShaderStageKind::Compute => ShaderStages::COMPUTE,
        }
    }

    fn shaderc_kind(&self) -> shaderc::ShaderKind {
        match self {
            ShaderStageKind::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStageKind::Fragment => shaderc::ShaderKind::Fragment,
            ShaderStageKind::Compute => shaderc::ShaderKind::Compute,
        }
    }
}

/// A GLSL shader source with `#include`s already flattened. Compilation takes
/// a list of preprocessor "processes" of the form `DNAME` or `DNAME value`;
/// the same list feeds the content hash so that every macro combination is a
/// distinct SPIR-V identity.
pub struct Shader {
    path: PathBuf,
    source_text: String,
    stage: ShaderStageKind,
}

impl Shader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Shader, ShaderError> {
        let path = path.as_ref().to_path_buf();

        let stage = ShaderStageKind::from_extension(&path)
            .ok_or_else(|| ShaderError::UnsupportedExtension(path.clone()))?;

        let text = read_text(&path)?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let source_text = resolve_includes(&path, text, parent)?;

        Ok(Shader {
            path,
            source_text,
            stage,
        })
    }

    pub fn from_source(path: PathBuf, source_text: String, stage: ShaderStageKind) -> Shader {
        Shader {
            path,
            source_text,
            stage,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stage(&self) -> ShaderStageKind {
        self.stage
    }

    pub fn hash_value(&self, processes: &[String]) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        hasher.update(self.source_text.as_bytes());
        for process in processes {
            hasher.update(process.as_bytes());
        }
        hasher.digest()
    }

    pub fn compile_to_spirv(&self, processes: &[String]) -> Result<Vec<u32>, ShaderError> {
        let compiler = shaderc::Compiler::new().ok_or(ShaderError::CompilerInit)?;
        let mut options = shaderc::CompileOptions::new().ok_or(ShaderError::CompilerInit)?;

        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_2 as u32,
        );

        for process in processes {
            // Processes carry the glslang-style `D` prefix; strip it before
            // handing the macro to shaderc.
            let define = process.strip_prefix('D').unwrap_or(process);
            match define.split_once(' ') {
                Some((name, value)) => options.add_macro_definition(name, Some(value)),
                None => options.add_macro_definition(define, None),
            }
        }

        let artifact = compiler
            .compile_into_spirv(
                &self.source_text,
                self.stage.shaderc_kind(),
                &self.path.to_string_lossy(),
                "main",
                Some(&options),
            )
            .map_err(|err| ShaderError::Compile {
                path: self.path.clone(),
                message: err.to_string(),
            })?;

        Ok(artifact.as_binary().to_vec())
    }
}

fn read_text(path: &Path) -> Result<String, ShaderError> {
    std::fs::read_to_string(path).map_err(|source| ShaderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Replaces `#include "file"` directives with the referenced file contents,
/// resolved against the including file's directory.
fn resolve_includes(
    origin: &Path,
    mut source: String,
    parent: &Path,
) -> Result<String, ShaderError> {
    let mut depth = 0;

    while let Some((start, end, filename)) = find_include(&source) {
        depth += 1;
        if depth > INCLUDE_DEPTH_LIMIT {
            return Err(ShaderError::IncludeDepth(origin.to_path_buf()));
        }

        let include_path = parent.join(&filename);
        let text = read_text(&include_path)?;
        source.replace_range(start..end, &text);
    }

    Ok(source)
}

fn find_include(source: &str) -> Option<(usize, usize, String)> {
    let start = source.find("#include")?;
    let rest = &source[start + "#include".len()..];
    let open = rest.find('"')?;
    let close = rest[open + 1..].find('"')?;
    let filename = rest[open + 1..open + 1 + close].to_string();
    let end = start + "#include".len() + open + close + 2;
    Some((start, end, filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("prism_shader_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn stage_from_extension() {
        assert_eq!(
            ShaderStageKind::from_extension(Path::new("a.vert")),
            Some(ShaderStageKind::Vertex)
        );
        assert_eq!(
            ShaderStageKind::from_extension(Path::new("a.frag")),
            Some(ShaderStageKind::Fragment)
        );
        assert_eq!(ShaderStageKind::from_extension(Path::new("a.glsl")), None);
    }

    #[test]
    fn resolves_nested_includes() {
        let dir = temp_dir("include");
        std::fs::write(dir.join("common.glsl"), "float pi() { return PI; }\n").unwrap();
        std::fs::write(
            dir.join("main.vert"),
            "#version 450\n#include \"common.glsl\"\nvoid main() {}\n",
        )
        .unwrap();

        let shader = Shader::load(dir.join("main.vert")).unwrap();
        assert!(shader.source_text.contains("float pi()"));
        assert!(!shader.source_text.contains("#include"));
    }

    #[test]
    fn hash_depends_on_processes() {
        let shader = Shader::from_source(
            PathBuf::from("x.frag"),
            "void main() {}".to_string(),
            ShaderStageKind::Fragment,
        );

        let base = shader.hash_value(&[]);
        let with_macro = shader.hash_value(&["DHAS_BASE_COLOR_TEXTURE".to_string()]);
        assert_ne!(base, with_macro);

        // Same inputs hash identically so disk cache files are reusable.
        assert_eq!(base, shader.hash_value(&[]));
    }

    #[test]
    fn find_include_extracts_filename() {
        let src = "a\n#include \"foo/bar.glsl\"\nb";
        let (start, end, name) = find_include(src).unwrap();
        assert_eq!(name, "foo/bar.glsl");
        assert_eq!(&src[start..end], "#include \"foo/bar.glsl\"");
    }
}
