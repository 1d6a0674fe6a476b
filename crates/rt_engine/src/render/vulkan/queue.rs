//! Queue family selection

use ash::vk;

/// Pick a queue family exposing `requested`
///
/// A compute request prefers a family without graphics support, a transfer
/// request prefers a family without graphics or compute support. Otherwise
/// the first family exposing every requested bit wins.
pub fn select_queue_family(families: &[vk::QueueFamilyProperties], requested: vk::QueueFlags) -> Option<u32> {
    let supports = |family: &vk::QueueFamilyProperties| family.queue_count > 0 && family.queue_flags.contains(requested);

    let dedicated = if requested.contains(vk::QueueFlags::COMPUTE) {
        families
            .iter()
            .position(|f| supports(f) && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
    } else if requested.contains(vk::QueueFlags::TRANSFER) {
        families.iter().position(|f| {
            supports(f) && !f.queue_flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
    } else {
        None
    };

    dedicated
        .or_else(|| families.iter().position(supports))
        .map(|index| index as u32)
}

/// Queue family indices used by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Graphics and ray tracing submissions
    pub graphics: u32,
    /// Presentation
    pub present: u32,
    /// Compute work, dedicated if the device has such a family
    pub compute: u32,
    /// Copies, dedicated if the device has such a family
    pub transfer: u32,
}

impl QueueFamilies {
    /// Distinct family indices, for device queue creation
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.present, self.compute, self.transfer];
        families.sort_unstable();
        families.dedup();
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn discrete_gpu() -> Vec<vk::QueueFamilyProperties> {
        vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ]
    }

    #[test]
    fn test_graphics_takes_first_family() {
        assert_eq!(select_queue_family(&discrete_gpu(), vk::QueueFlags::GRAPHICS), Some(0));
    }

    #[test]
    fn test_compute_prefers_family_without_graphics() {
        assert_eq!(select_queue_family(&discrete_gpu(), vk::QueueFlags::COMPUTE), Some(1));
    }

    #[test]
    fn test_transfer_prefers_transfer_only_family() {
        assert_eq!(select_queue_family(&discrete_gpu(), vk::QueueFlags::TRANSFER), Some(2));
    }

    #[test]
    fn test_falls_back_to_shared_family() {
        let integrated = vec![family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        assert_eq!(select_queue_family(&integrated, vk::QueueFlags::COMPUTE), Some(0));
        assert_eq!(select_queue_family(&integrated, vk::QueueFlags::TRANSFER), Some(0));
    }

    #[test]
    fn test_missing_capability_yields_none() {
        let transfer_only = vec![family(vk::QueueFlags::TRANSFER)];
        assert_eq!(select_queue_family(&transfer_only, vk::QueueFlags::GRAPHICS), None);
    }

    #[test]
    fn test_families_without_queues_are_skipped() {
        let mut families = discrete_gpu();
        families[1].queue_count = 0;
        assert_eq!(select_queue_family(&families, vk::QueueFlags::COMPUTE), Some(0));
    }

    #[test]
    fn test_unique_families_are_sorted_and_deduplicated() {
        let families = QueueFamilies {
            graphics: 0,
            present: 0,
            compute: 1,
            transfer: 2,
        };
        assert_eq!(families.unique(), vec![0, 1, 2]);
    }
}
