use vulkano::device::QueueFlags;

/// Queue family indices for the four queues the renderer uses. Families may
/// coincide; a single all-capable family is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.compute, self.transfer, self.present];
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Picks queue families from the per-family capability flags and present
/// support. A family covering graphics, compute, transfer and present at once
/// wins; otherwise each capability takes the first family that supports it.
pub fn pick_queue_families(
    family_flags: &[QueueFlags],
    present_support: &[bool],
) -> Option<QueueFamilyIndices> {
    let all = QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER;

    if let Some(index) = family_flags
        .iter()
        .zip(present_support)
        .position(|(flags, present)| flags.contains(all) && *present)
    {
        let index = index as u32;
        return Some(QueueFamilyIndices {
            graphics: index,
            compute: index,
            transfer: index,
            present: index,
        });
    }

    let find = |wanted: QueueFlags| {
        family_flags
            .iter()
            .position(|flags| flags.contains(wanted))
            .map(|i| i as u32)
    };

    Some(QueueFamilyIndices {
        graphics: find(QueueFlags::GRAPHICS)?,
        compute: find(QueueFlags::COMPUTE)?,
        // Any graphics or compute family implicitly supports transfer, but an
        // explicit transfer family is preferred when one exists.
        transfer: find(QueueFlags::TRANSFER).or_else(|| find(QueueFlags::GRAPHICS))?,
        present: present_support
            .iter()
            .position(|supported| *supported)
            .map(|i| i as u32)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_single_all_capable_family() {
        let flags = [
            QueueFlags::GRAPHICS | QueueFlags::TRANSFER,
            QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
        ];
        let present = [true, true];

        let indices = pick_queue_families(&flags, &present).unwrap();
        assert_eq!(indices.graphics, 1);
        assert_eq!(indices.compute, 1);
        assert_eq!(indices.transfer, 1);
        assert_eq!(indices.present, 1);
        assert_eq!(indices.unique(), vec![1]);
    }

    #[test]
    fn falls_back_to_per_capability_families() {
        let flags = [
            QueueFlags::GRAPHICS | QueueFlags::TRANSFER,
            QueueFlags::COMPUTE,
        ];
        let present = [true, false];

        let indices = pick_queue_families(&flags, &present).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.compute, 1);
        assert_eq!(indices.transfer, 0);
        assert_eq!(indices.present, 0);
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn fails_without_compute() {
        let flags = [QueueFlags::GRAPHICS | QueueFlags::TRANSFER];
        let present = [true];

        assert!(pick_queue_families(&flags, &present).is_none());
    }
}
