//! Frame-level GPU operations behind a capability seam
//!
//! The orchestrator drives a frame through [`FrameBackend`]; the Vulkan
//! implementation owns the swapchain, render pass, framebuffers, depth
//! buffer, command buffers and per-slot synchronization.

use std::sync::Arc;

use ash::vk;

use super::strategy::FrameTarget;
use crate::config::RendererConfig;
use crate::render::vulkan::commands::CommandPool;
use crate::render::vulkan::framebuffer::create_framebuffers;
use crate::render::vulkan::{
    AcquireOutcome, DepthBuffer, Device, Framebuffer, FrameSync, PipelineCache, PresentOutcome, RenderPass, Surface,
    Swapchain, VulkanError, VulkanResult,
};
use crate::render::RenderResult;

/// Color the render pass clears to when it clears at all
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// GPU operations a frame is built from
pub trait FrameBackend {
    /// Context strategies receive when creating and recording resources
    type Gpu;

    /// Current GPU context
    fn gpu(&self) -> &Self::Gpu;

    /// Number of frame slots recorded ahead of the GPU
    fn frames_in_flight(&self) -> usize;

    /// Swapchain extent
    fn extent(&self) -> vk::Extent2D;

    /// Create the render pass, depth buffer, framebuffers, pipeline cache and command buffers
    fn prepare(&mut self, color_load_op: vk::AttachmentLoadOp) -> RenderResult<()>;

    /// Block until the GPU has finished the slot's previous submission
    fn wait_for_frame(&mut self, frame_slot: usize) -> RenderResult<()>;

    /// Acquire the next swapchain image, signalling the slot's acquire semaphore
    fn acquire_image(&mut self, frame_slot: usize) -> RenderResult<AcquireOutcome>;

    /// Reset the slot's command buffer and begin recording
    ///
    /// The slot's fence stays signaled until [`FrameBackend::submit`], so a
    /// frame abandoned during recording never leaves the next wait hanging.
    fn begin_commands(&mut self, frame_slot: usize, image_index: u32) -> RenderResult<FrameTarget>;

    /// Begin the frame render pass on the target's framebuffer
    fn begin_render_pass(&mut self, target: &FrameTarget);

    /// End the render pass and finish recording
    fn end_render_pass(&mut self, target: &FrameTarget) -> RenderResult<()>;

    /// Reset the slot's fence, then submit the target's commands waiting on
    /// acquisition and signalling completion
    fn submit(&mut self, target: &FrameTarget) -> RenderResult<()>;

    /// Present once the slot's completion semaphore is signalled
    fn present(&mut self, frame_slot: usize, image_index: u32) -> RenderResult<PresentOutcome>;

    /// Rebuild the swapchain and everything sized to it
    ///
    /// `window_extent` is the new window size, or `None` to reuse the last one.
    fn recreate(&mut self, window_extent: Option<vk::Extent2D>) -> RenderResult<()>;

    /// Block until all submitted work has completed
    fn wait_idle(&mut self) -> RenderResult<()>;
}

/// Context handed to strategies by [`SwapchainFrameBackend`]
#[derive(Clone)]
pub struct GpuContext {
    /// Logical device
    pub device: Arc<Device>,
    /// Frame render pass; null until prepared
    pub render_pass: vk::RenderPass,
    /// Pipeline cache; null until prepared
    pub pipeline_cache: vk::PipelineCache,
    /// Swapchain image format
    pub color_format: vk::Format,
    /// Swapchain extent
    pub extent: vk::Extent2D,
    /// Number of frame slots
    pub frames_in_flight: usize,
}

/// Objects created by [`FrameBackend::prepare`]
struct Prepared {
    framebuffers: Vec<Framebuffer>,
    depth: DepthBuffer,
    render_pass: RenderPass,
    command_buffers: Vec<vk::CommandBuffer>,
    _command_pool: CommandPool,
    _pipeline_cache: PipelineCache,
}

/// [`FrameBackend`] presenting to a window surface
pub struct SwapchainFrameBackend {
    gpu: GpuContext,
    prepared: Option<Prepared>,
    frames: Vec<FrameSync>,
    swapchain: Swapchain,
    surface: Surface,
    window_extent: vk::Extent2D,
    prefer_low_latency: bool,
}

impl SwapchainFrameBackend {
    /// Create the swapchain and per-slot synchronization objects
    pub fn new(
        device: Arc<Device>,
        surface: Surface,
        window_extent: vk::Extent2D,
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        let swapchain = Swapchain::new(
            Arc::clone(&device),
            &surface,
            window_extent,
            config.prefer_low_latency_present,
            None,
        )?;
        let frames = (0..config.frames_in_flight)
            .map(|_| FrameSync::new(&device))
            .collect::<VulkanResult<Vec<_>>>()?;

        let gpu = GpuContext {
            device,
            render_pass: vk::RenderPass::null(),
            pipeline_cache: vk::PipelineCache::null(),
            color_format: swapchain.format().format,
            extent: swapchain.extent(),
            frames_in_flight: config.frames_in_flight,
        };
        Ok(Self {
            gpu,
            prepared: None,
            frames,
            swapchain,
            surface,
            window_extent,
            prefer_low_latency: config.prefer_low_latency_present,
        })
    }

    fn prepared(&self) -> VulkanResult<&Prepared> {
        self.prepared
            .as_ref()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "frame backend used before prepare".to_string(),
            })
    }

    fn frame(&self, frame_slot: usize) -> &FrameSync {
        &self.frames[frame_slot % self.frames.len()]
    }
}

impl FrameBackend for SwapchainFrameBackend {
    type Gpu = GpuContext;

    fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn prepare(&mut self, color_load_op: vk::AttachmentLoadOp) -> RenderResult<()> {
        if self.prepared.is_some() {
            return Ok(());
        }
        let device = Arc::clone(&self.gpu.device);

        let command_pool = CommandPool::new(Arc::clone(&device), device.physical().families.graphics)?;
        let command_buffers = command_pool.allocate(self.frames.len() as u32)?;
        let render_pass = RenderPass::new(
            Arc::clone(&device),
            self.swapchain.format().format,
            device.physical().depth_format,
            color_load_op,
        )?;
        let depth = DepthBuffer::new(&device, self.swapchain.extent())?;
        let framebuffers = create_framebuffers(
            &device,
            render_pass.handle(),
            self.swapchain.image_views(),
            &depth,
            self.swapchain.extent(),
        )?;
        let pipeline_cache = PipelineCache::new(Arc::clone(&device))?;

        self.gpu.render_pass = render_pass.handle();
        self.gpu.pipeline_cache = pipeline_cache.handle();
        log::info!(
            "Prepared frame resources: {} framebuffers, {} command buffers",
            framebuffers.len(),
            command_buffers.len()
        );
        self.prepared = Some(Prepared {
            framebuffers,
            depth,
            render_pass,
            command_buffers,
            _command_pool: command_pool,
            _pipeline_cache: pipeline_cache,
        });
        Ok(())
    }

    fn wait_for_frame(&mut self, frame_slot: usize) -> RenderResult<()> {
        let timeout = self.gpu.device.fence_timeout_ns();
        self.frame(frame_slot).in_flight.wait(timeout)?;
        Ok(())
    }

    fn acquire_image(&mut self, frame_slot: usize) -> RenderResult<AcquireOutcome> {
        let signal = self.frame(frame_slot).image_available.handle();
        Ok(self.swapchain.acquire_next_image(u64::MAX, signal)?)
    }

    fn begin_commands(&mut self, frame_slot: usize, image_index: u32) -> RenderResult<FrameTarget> {
        let frame = self.frame(frame_slot);
        if !frame.in_flight.is_signaled()? {
            log::trace!("Frame slot {frame_slot} still in flight, waiting before re-recording");
            frame.in_flight.wait(self.gpu.device.fence_timeout_ns())?;
        }

        let prepared = self.prepared()?;
        let command_buffer = prepared.command_buffers[frame_slot % prepared.command_buffers.len()];
        let raw = self.gpu.device.raw();
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            raw.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            raw.begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        Ok(FrameTarget {
            command_buffer,
            frame_slot,
            image_index,
            swapchain_image: self.swapchain.images()[image_index as usize],
            extent: self.swapchain.extent(),
        })
    }

    fn begin_render_pass(&mut self, target: &FrameTarget) {
        let Some(prepared) = self.prepared.as_ref() else {
            log::error!("Render pass requested before prepare");
            return;
        };
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: CLEAR_COLOR },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(prepared.render_pass.handle())
            .framebuffer(prepared.framebuffers[target.image_index as usize].handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.gpu
                .device
                .raw()
                .cmd_begin_render_pass(target.command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn end_render_pass(&mut self, target: &FrameTarget) -> RenderResult<()> {
        let raw = self.gpu.device.raw();
        unsafe {
            raw.cmd_end_render_pass(target.command_buffer);
            raw.end_command_buffer(target.command_buffer)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn submit(&mut self, target: &FrameTarget) -> RenderResult<()> {
        let frame = self.frame(target.frame_slot);
        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let signal_semaphores = [frame.render_finished.handle()];
        let command_buffers = [target.command_buffer];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        frame.in_flight.reset()?;
        self.gpu
            .device
            .queue_submit(self.gpu.device.queues().graphics, &[submit], frame.in_flight.handle())?;
        Ok(())
    }

    fn present(&mut self, frame_slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
        let wait = self.frame(frame_slot).render_finished.handle();
        Ok(self
            .swapchain
            .present(self.gpu.device.queues().present, image_index, wait)?)
    }

    fn recreate(&mut self, window_extent: Option<vk::Extent2D>) -> RenderResult<()> {
        if let Some(extent) = window_extent {
            self.window_extent = extent;
        }
        let device = Arc::clone(&self.gpu.device);
        device.wait_idle()?;

        let swapchain = Swapchain::new(
            Arc::clone(&device),
            &self.surface,
            self.window_extent,
            self.prefer_low_latency,
            Some(&self.swapchain),
        )?;
        let previous_format = self.swapchain.format().format;
        if let Some(prepared) = self.prepared.as_mut() {
            prepared.framebuffers.clear();
        }
        self.swapchain = swapchain;
        let extent = self.swapchain.extent();
        self.gpu.extent = extent;
        self.gpu.color_format = self.swapchain.format().format;

        if let Some(prepared) = self.prepared.as_mut() {
            if previous_format != self.gpu.color_format {
                log::warn!(
                    "Swapchain format changed from {previous_format:?} to {:?}, recreating render pass",
                    self.gpu.color_format
                );
                prepared.render_pass = RenderPass::new(
                    Arc::clone(&device),
                    self.gpu.color_format,
                    device.physical().depth_format,
                    if prepared.render_pass.clears_color() {
                        vk::AttachmentLoadOp::CLEAR
                    } else {
                        vk::AttachmentLoadOp::LOAD
                    },
                )?;
                self.gpu.render_pass = prepared.render_pass.handle();
            }
            prepared.depth = DepthBuffer::new(&device, extent)?;
            prepared.framebuffers = create_framebuffers(
                &device,
                prepared.render_pass.handle(),
                self.swapchain.image_views(),
                &prepared.depth,
                extent,
            )?;
        }
        log::info!("Recreated swapchain resources at {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.gpu.device.wait_idle()?;
        Ok(())
    }
}
