//! Memory type resolution

use ash::vk;

use super::{VulkanError, VulkanResult};

/// Find the first memory type allowed by `type_bits` whose flags contain `properties`
///
/// A miss is a configuration error: the device cannot back the resource
/// with the requested properties.
pub fn resolve_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&index| {
            type_bits & (1 << index) != 0
                && memory_properties.memory_types[index as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType {
            type_bits,
            properties,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    fn typical_device() -> vk::PhysicalDeviceMemoryProperties {
        properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ])
    }

    #[test]
    fn test_every_satisfiable_request_resolves_to_a_valid_superset() {
        let props = typical_device();
        let requests = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ];

        for type_bits in 1u32..16 {
            for &request in &requests {
                let satisfiable = (0..4).any(|i| {
                    type_bits & (1 << i) != 0 && props.memory_types[i].property_flags.contains(request)
                });
                match resolve_memory_type(&props, type_bits, request) {
                    Ok(index) => {
                        assert!(type_bits & (1 << index) != 0);
                        assert!(props.memory_types[index as usize].property_flags.contains(request));
                    }
                    Err(error) => {
                        assert!(!satisfiable, "bits {type_bits:#b} request {request:?} should resolve");
                        assert!(matches!(error, VulkanError::NoSuitableMemoryType { .. }));
                    }
                }
            }
        }
    }

    #[test]
    fn test_first_matching_index_wins() {
        let props = typical_device();
        let index = resolve_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_type_bits_exclude_otherwise_matching_types() {
        let props = typical_device();
        let index = resolve_memory_type(&props, 0b1000, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(index, 3);
    }

    #[test]
    fn test_unsatisfiable_request_fails() {
        let props = typical_device();
        let result = resolve_memory_type(&props, 0b0001, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert!(result.is_err());

        let result = resolve_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::LAZILY_ALLOCATED);
        assert!(result.is_err());
    }

    #[test]
    fn test_bits_beyond_type_count_are_ignored() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let result = resolve_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty());
        assert!(result.is_err());
    }
}
