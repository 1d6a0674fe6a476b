//! Vulkan error type shared by the whole render layer

use ash::vk;
use thiserror::Error;

/// Vulkan-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the requested properties
    #[error("No suitable memory type found (type bits {type_bits:#b}, properties {properties:?})")]
    NoSuitableMemoryType {
        /// Memory types the resource accepts
        type_bits: u32,
        /// Properties that were requested
        properties: vk::MemoryPropertyFlags,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Host access to a buffer that is not mapped
    #[error("Buffer is not mapped")]
    NotMapped,

    /// A blocking fence wait ran past its timeout
    #[error("Timed out waiting for a fence")]
    FenceTimeout,

    /// A required device or instance extension is missing
    #[error("Missing extension: {0}")]
    MissingExtension(String),
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT => Self::FenceTimeout,
            other => Self::Api(other),
        }
    }
}

impl VulkanError {
    /// Whether the device was lost and nothing on it can be used again
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Api(vk::Result::ERROR_DEVICE_LOST))
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
