//! Vulkan rendering backend
//!
//! Thin RAII wrappers over `ash`. Every wrapper holds an `Arc<Device>` and
//! destroys its handle on drop; the device in turn keeps the instance alive.

pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod instance;
pub mod memory;
pub mod pipeline_cache;
pub mod queue;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vertex_layout;
pub mod window;

pub use buffer::Buffer;
pub use commands::CommandPool;
pub use descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter};
pub use device::{Device, DeviceRequirements, PhysicalDeviceInfo, RayTracingProperties};
pub use error::{VulkanError, VulkanResult};
pub use framebuffer::{DepthBuffer, Framebuffer};
pub use instance::VulkanInstance;
pub use pipeline_cache::PipelineCache;
pub use render_pass::RenderPass;
pub use shader::{load_shader, GraphicsPipeline, ShaderStage};
pub use surface::Surface;
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
pub use sync::{Fence, FrameSync, Semaphore};
pub use texture::{StorageImage, Texture};
pub use window::{Window, WindowError};
