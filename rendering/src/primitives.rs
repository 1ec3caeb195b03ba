use std::collections::VecDeque;
use std::sync::Arc;

use nalgebra::Matrix4;

use asset::frame_graph::FrameGraph;
use asset::scene_graph::{Node, Primitive, Scene};
use asset::Assets;

use crate::error::RenderError;

/// A scene primitive flattened out of the node hierarchy with its world
/// transform, ready for draw-element creation.
pub struct ScenePrimitive {
    pub scene_index: u32,
    pub model: Matrix4<f32>,
    pub inverse_model: Matrix4<f32>,
    pub primitive: Arc<Primitive>,
}

/// Walks every enabled scene breadth-first and emits one entry per mesh
/// primitive that has an index buffer.
pub fn collect_scene_primitives(
    assets: &Assets,
    frame_graph: &FrameGraph,
) -> Result<Vec<ScenePrimitive>, RenderError> {
    let mut scene_primitives = Vec::new();

    for enabled_scene in &frame_graph.enabled_scenes {
        let scene: &Scene = assets.scene(enabled_scene.index)?;
        let enabled_model = Matrix4::from(enabled_scene.model);

        for (node_index, world) in flatten_world_transforms(&scene.nodes, &scene.root_nodes) {
            let node = &scene.nodes[node_index];
            let Some(mesh_index) = node.mesh else {
                continue;
            };

            let model = enabled_model * world;
            let inverse_model = model.try_inverse().unwrap_or_else(Matrix4::identity);

            for primitive in &scene.meshes[mesh_index].primitives {
                if primitive.index_attribute.is_none() {
                    continue;
                }

                scene_primitives.push(ScenePrimitive {
                    scene_index: enabled_scene.index,
                    model,
                    inverse_model,
                    primitive: primitive.clone(),
                });
            }
        }
    }

    Ok(scene_primitives)
}

/// Breadth-first traversal over the flat node table using an explicit queue
/// of (node index, parent world transform) pairs.
pub fn flatten_world_transforms(
    nodes: &[Node],
    root_nodes: &[usize],
) -> Vec<(usize, Matrix4<f32>)> {
    let mut queue: VecDeque<(usize, Matrix4<f32>)> = root_nodes
        .iter()
        .map(|&index| (index, Matrix4::identity()))
        .collect();

    let mut flattened = Vec::with_capacity(nodes.len());

    while let Some((node_index, parent_world)) = queue.pop_front() {
        let node = &nodes[node_index];
        let world = parent_world * node.local_transform;

        for &child in &node.children {
            queue.push_back((child, world));
        }

        flattened.push((node_index, world));
    }

    flattened
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn node(parent: Option<usize>, children: Vec<usize>, translation: [f32; 3]) -> Node {
        Node {
            name: String::new(),
            parent,
            children,
            local_transform: Matrix4::new_translation(&Vector3::from(translation)),
            mesh: None,
        }
    }

    #[test]
    fn composes_parent_world_with_local() {
        let nodes = vec![
            node(None, vec![1], [1.0, 0.0, 0.0]),
            node(Some(0), vec![2], [0.0, 2.0, 0.0]),
            node(Some(1), vec![], [0.0, 0.0, 3.0]),
        ];

        let flattened = flatten_world_transforms(&nodes, &[0]);
        assert_eq!(flattened.len(), 3);

        let (leaf_index, leaf_world) = flattened[2];
        assert_eq!(leaf_index, 2);
        let origin = leaf_world.transform_point(&nalgebra::Point3::origin());
        assert_eq!(origin, nalgebra::Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn traversal_is_breadth_first() {
        // root 0 with children 1 and 2; 1 has child 3.
        let nodes = vec![
            node(None, vec![1, 2], [0.0; 3]),
            node(Some(0), vec![3], [0.0; 3]),
            node(Some(0), vec![], [0.0; 3]),
            node(Some(1), vec![], [0.0; 3]),
        ];

        let order: Vec<usize> = flatten_world_transforms(&nodes, &[0])
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
