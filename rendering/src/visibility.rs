use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-scene visibility toggles. Written by the UI between frames, read by
/// recorder threads; readers tolerate any snapshot, so relaxed atomics are
/// enough.
#[derive(Default)]
pub struct SceneVisibility {
    scenes: HashMap<u32, AtomicBool>,
}

impl SceneVisibility {
    pub fn new(scene_indices: impl IntoIterator<Item = u32>) -> SceneVisibility {
        SceneVisibility {
            scenes: scene_indices
                .into_iter()
                .map(|index| (index, AtomicBool::new(true)))
                .collect(),
        }
    }

    pub fn is_visible(&self, scene_index: u32) -> bool {
        self.scenes
            .get(&scene_index)
            .map(|visible| visible.load(Ordering::Relaxed))
            .unwrap_or(true)
    }

    pub fn set_visible(&self, scene_index: u32, visible: bool) {
        if let Some(flag) = self.scenes.get(&scene_index) {
            flag.store(visible, Ordering::Relaxed);
        }
    }

    pub fn scene_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.scenes.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_a_known_scene() {
        let visibility = SceneVisibility::new([0, 3]);
        assert!(visibility.is_visible(0));

        visibility.set_visible(0, false);
        assert!(!visibility.is_visible(0));
        assert!(visibility.is_visible(3));
    }

    #[test]
    fn unknown_scenes_default_to_visible() {
        let visibility = SceneVisibility::new([]);
        assert!(visibility.is_visible(42));
    }
}
