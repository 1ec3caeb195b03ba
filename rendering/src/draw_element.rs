use std::sync::Arc;

use vulkano::buffer::{IndexBuffer, Subbuffer};
use vulkano::descriptor_set::DescriptorSet;
use vulkano::pipeline::{GraphicsPipeline, PipelineLayout};

use crate::uniform::DrawElementUniform;

/// One coalesced `bind_vertex_buffers` call: buffers for a contiguous run of
/// shader locations starting at `first_binding`.
pub struct DrawElementVertexInfo {
    pub first_binding: u32,
    pub buffers: Vec<Subbuffer<[u8]>>,
}

pub struct DrawIndex {
    pub buffer: IndexBuffer,
    pub count: u32,
}

/// The unit of recorded work: one scene primitive (or one full-screen
/// triangle) bound to its pipeline, layout and descriptor sets. All handles
/// are shared with the owning subpass's caches.
pub struct DrawElement {
    pub has_scene: bool,
    pub scene_index: u32,
    pub pipeline: Arc<GraphicsPipeline>,
    pub pipeline_layout: Arc<PipelineLayout>,
    /// Per in-flight frame, the draw-element descriptor sets in ascending
    /// set order. Empty when the shaders declare none.
    pub descriptor_sets: Vec<Vec<Arc<DescriptorSet>>>,
    /// Per in-flight frame uniform backing the `DrawElement` block.
    pub uniform_buffers: Vec<Subbuffer<DrawElementUniform>>,
    pub vertex_count: u32,
    pub vertex_infos: Vec<DrawElementVertexInfo>,
    pub index: Option<DrawIndex>,
}

impl DrawElement {
    pub fn has_descriptor_sets(&self) -> bool {
        self.descriptor_sets.iter().any(|sets| !sets.is_empty())
    }
}

/// Splits a sorted location list into contiguous runs, each of which becomes
/// one vertex-buffer bind.
pub fn split_contiguous(locations: &[u32]) -> Vec<Vec<u32>> {
    let mut runs: Vec<Vec<u32>> = Vec::new();

    for &location in locations {
        match runs.last_mut() {
            Some(run) if *run.last().unwrap() + 1 == location => run.push(location),
            _ => runs.push(vec![location]),
        }
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::split_contiguous;

    #[test]
    fn splits_locations_into_contiguous_runs() {
        assert_eq!(
            split_contiguous(&[0, 1, 2, 4, 5, 7]),
            vec![vec![0, 1, 2], vec![4, 5], vec![7]]
        );
    }

    #[test]
    fn single_run_stays_whole() {
        assert_eq!(split_contiguous(&[0, 1, 2]), vec![vec![0, 1, 2]]);
        assert!(split_contiguous(&[]).is_empty());
    }
}
