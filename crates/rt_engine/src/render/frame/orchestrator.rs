//! Prepare / render / cleanup state machine
//!
//! One frame: wait for the slot's fence, acquire an image, update the
//! strategy's uniforms, record the scene commands and then the render pass
//! with the overlay on top, submit and present. Out-of-date or suboptimal
//! swapchains are recreated and the strategy is told to follow.

use ash::vk;

use super::backend::FrameBackend;
use super::strategy::{FrameInputs, RenderStrategy};
use crate::render::overlay::UiOverlay;
use crate::render::vulkan::{AcquireOutcome, PresentOutcome};
use crate::render::{RenderError, RenderResult};
use crate::scene::{Camera, Light, Scene};

/// Where the renderer is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing created yet
    Uninitialized,
    /// Window open
    WindowReady,
    /// Device, swapchain and synchronization objects created
    GraphicsReady,
    /// Frame resources and strategy resources created; frames may be rendered
    Prepared,
    /// Everything released
    Terminated,
}

/// What happened to one `render_frame` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and queued for presentation
    Presented {
        /// Swapchain image the frame was drawn into
        image_index: u32,
    },
    /// The swapchain was out of date and has been rebuilt; nothing was presented
    Recreated,
    /// The window has no area; nothing was rendered
    Skipped,
}

/// Drives a [`RenderStrategy`] and a [`UiOverlay`] through a [`FrameBackend`]
pub struct FrameOrchestrator<B: FrameBackend> {
    strategy: Box<dyn RenderStrategy<B::Gpu>>,
    overlay: Box<dyn UiOverlay>,
    backend: B,
    state: LifecycleState,
    frame_slot: usize,
    frame_counter: u32,
    pending_resize: Option<vk::Extent2D>,
}

impl<B: FrameBackend> FrameOrchestrator<B> {
    /// Wrap a backend whose device and swapchain already exist
    pub fn new(backend: B, strategy: Box<dyn RenderStrategy<B::Gpu>>, overlay: Box<dyn UiOverlay>) -> Self {
        log::info!("Frame orchestrator using {} strategy", strategy.name());
        Self {
            strategy,
            overlay,
            backend,
            state: LifecycleState::GraphicsReady,
            frame_slot: 0,
            frame_counter: 0,
            pending_resize: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of frames presented so far
    pub fn frame_count(&self) -> u32 {
        self.frame_counter
    }

    fn require(&self, expected: LifecycleState, operation: &'static str) -> RenderResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RenderError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Create frame resources and let the strategy build its resources for `scene`
    ///
    /// Calling it again once prepared does nothing.
    pub fn prepare(&mut self, scene: &Scene) -> RenderResult<()> {
        if self.state == LifecycleState::Prepared {
            log::debug!("Renderer already prepared");
            return Ok(());
        }
        self.require(LifecycleState::GraphicsReady, "prepare")?;

        self.backend.prepare(self.strategy.color_load_op())?;
        self.strategy.on_prepare(self.backend.gpu(), scene)?;
        self.state = LifecycleState::Prepared;
        log::info!("Renderer prepared ({} strategy)", self.strategy.name());
        Ok(())
    }

    /// Record that the window changed size; applied before the next frame
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.pending_resize = Some(vk::Extent2D { width, height });
    }

    /// Render and present one frame
    pub fn render_frame(&mut self, camera: &Camera, lights: &[Light], delta_time: f32) -> RenderResult<FrameOutcome> {
        self.require(LifecycleState::Prepared, "render a frame")?;

        if let Some(extent) = self.pending_resize {
            if extent.width == 0 || extent.height == 0 {
                return Ok(FrameOutcome::Skipped);
            }
            self.pending_resize = None;
            self.recreate(Some(extent))?;
        }

        let slot = self.frame_slot;
        self.backend.wait_for_frame(slot)?;

        let (image_index, acquired_suboptimal) = match self.backend.acquire_image(slot)? {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::warn!("Swapchain out of date on acquire, recreating");
                self.recreate(None)?;
                return Ok(FrameOutcome::Recreated);
            }
        };

        self.overlay.update_ui(delta_time);
        self.overlay.update_buffers()?;

        let extent = self.backend.extent();
        let inputs = FrameInputs {
            camera,
            lights,
            aspect: extent.width as f32 / extent.height.max(1) as f32,
            frame: self.frame_counter,
        };
        self.strategy.update_uniforms(self.backend.gpu(), slot, &inputs)?;

        let target = self.backend.begin_commands(slot, image_index)?;
        self.strategy.record_scene_commands(self.backend.gpu(), &target)?;
        self.backend.begin_render_pass(&target);
        self.strategy.record_pass_commands(self.backend.gpu(), &target)?;
        self.overlay.draw_frame(target.command_buffer);
        self.backend.end_render_pass(&target)?;
        self.backend.submit(&target)?;

        let presented = self.backend.present(slot, image_index)?;
        self.frame_slot = (slot + 1) % self.backend.frames_in_flight().max(1);
        self.frame_counter = self.frame_counter.wrapping_add(1);
        log::trace!("Frame {} submitted on slot {slot} to image {image_index}", self.frame_counter);

        if presented.needs_recreation() || acquired_suboptimal {
            log::warn!("Swapchain {presented:?} after present, recreating");
            self.recreate(None)?;
        }
        match presented {
            PresentOutcome::OutOfDate => Ok(FrameOutcome::Recreated),
            PresentOutcome::Presented | PresentOutcome::Suboptimal => Ok(FrameOutcome::Presented { image_index }),
        }
    }

    fn recreate(&mut self, window_extent: Option<vk::Extent2D>) -> RenderResult<()> {
        self.backend.recreate(window_extent)?;
        self.strategy.on_surface_recreated(self.backend.gpu())
    }

    /// Rebuild the strategy's scene resources once the GPU is idle
    ///
    /// On error the previous scene keeps rendering.
    pub fn scene_changed(&mut self, scene: &Scene) -> RenderResult<()> {
        self.require(LifecycleState::Prepared, "change the scene")?;
        self.backend.wait_idle()?;
        self.strategy.on_scene_changed(self.backend.gpu(), scene)
    }

    /// Wait for the GPU and release the strategy's resources
    pub fn cleanup(&mut self) -> RenderResult<()> {
        if self.state == LifecycleState::Terminated {
            return Ok(());
        }
        self.backend.wait_idle()?;
        self.strategy.on_cleanup(self.backend.gpu());
        self.state = LifecycleState::Terminated;
        log::info!("Renderer cleaned up after {} frames", self.frame_counter);
        Ok(())
    }
}

impl<B: FrameBackend> Drop for FrameOrchestrator<B> {
    fn drop(&mut self) {
        if let Err(error) = self.cleanup() {
            log::error!("Renderer cleanup failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frame::FrameTarget;
    use crate::render::vulkan::VulkanError;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Prepare,
        Wait(usize),
        Acquire(usize),
        Begin(usize),
        BeginPass,
        EndPass,
        Submit(usize),
        Present(u32),
        Recreate,
        WaitIdle,
    }

    /// Stands in for the render pass the backend hands to strategies
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct MockGpu {
        render_pass: u64,
    }

    /// Host-side model of a frame fence
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FenceState {
        Signaled,
        Pending,
        Unsignaled,
    }

    struct MockBackend {
        gpu: MockGpu,
        events: Vec<Event>,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        in_flight: Vec<bool>,
        fences: Vec<FenceState>,
        hung_waits: usize,
        format_changes_on_recreate: bool,
        rerecorded_in_flight: usize,
        image_count: u32,
        next_image: u32,
        extent: vk::Extent2D,
    }

    impl MockBackend {
        fn new(frames: usize) -> Self {
            Self {
                gpu: MockGpu { render_pass: 1 },
                events: Vec::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                in_flight: vec![false; frames],
                fences: vec![FenceState::Signaled; frames],
                hung_waits: 0,
                format_changes_on_recreate: false,
                rerecorded_in_flight: 0,
                image_count: 3,
                next_image: 0,
                extent: vk::Extent2D { width: 800, height: 600 },
            }
        }

        fn count(&self, event: Event) -> usize {
            self.events.iter().filter(|&&e| e == event).count()
        }
    }

    impl FrameBackend for MockBackend {
        type Gpu = MockGpu;

        fn gpu(&self) -> &MockGpu {
            &self.gpu
        }

        fn frames_in_flight(&self) -> usize {
            self.in_flight.len()
        }

        fn extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn prepare(&mut self, _color_load_op: vk::AttachmentLoadOp) -> RenderResult<()> {
            self.events.push(Event::Prepare);
            Ok(())
        }

        fn wait_for_frame(&mut self, frame_slot: usize) -> RenderResult<()> {
            self.events.push(Event::Wait(frame_slot));
            self.in_flight[frame_slot] = false;
            match self.fences[frame_slot] {
                FenceState::Pending => self.fences[frame_slot] = FenceState::Signaled,
                FenceState::Unsignaled => self.hung_waits += 1,
                FenceState::Signaled => {}
            }
            Ok(())
        }

        fn acquire_image(&mut self, frame_slot: usize) -> RenderResult<AcquireOutcome> {
            self.events.push(Event::Acquire(frame_slot));
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired { index, suboptimal: false })
        }

        fn begin_commands(&mut self, frame_slot: usize, image_index: u32) -> RenderResult<FrameTarget> {
            self.events.push(Event::Begin(frame_slot));
            if self.in_flight[frame_slot] {
                self.rerecorded_in_flight += 1;
            }
            Ok(FrameTarget {
                command_buffer: vk::CommandBuffer::null(),
                frame_slot,
                image_index,
                swapchain_image: vk::Image::null(),
                extent: self.extent,
            })
        }

        fn begin_render_pass(&mut self, _target: &FrameTarget) {
            self.events.push(Event::BeginPass);
        }

        fn end_render_pass(&mut self, _target: &FrameTarget) -> RenderResult<()> {
            self.events.push(Event::EndPass);
            Ok(())
        }

        fn submit(&mut self, target: &FrameTarget) -> RenderResult<()> {
            self.events.push(Event::Submit(target.frame_slot));
            self.in_flight[target.frame_slot] = true;
            self.fences[target.frame_slot] = FenceState::Pending;
            Ok(())
        }

        fn present(&mut self, _frame_slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
            self.events.push(Event::Present(image_index));
            Ok(self.present_script.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn recreate(&mut self, window_extent: Option<vk::Extent2D>) -> RenderResult<()> {
            self.events.push(Event::Recreate);
            if let Some(extent) = window_extent {
                self.extent = extent;
            }
            if self.format_changes_on_recreate {
                self.gpu.render_pass += 1;
            }
            Ok(())
        }

        fn wait_idle(&mut self) -> RenderResult<()> {
            self.events.push(Event::WaitIdle);
            self.in_flight.iter_mut().for_each(|f| *f = false);
            for fence in &mut self.fences {
                if *fence == FenceState::Pending {
                    *fence = FenceState::Signaled;
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct StrategyLog {
        prepared: usize,
        surface_recreated: usize,
        scene_changes: usize,
        uniform_frames: Vec<u32>,
        scene_commands: usize,
        pass_commands: usize,
        cleaned_up: usize,
        last_aspect: f32,
        render_passes_seen: Vec<u64>,
        fail_scene_change: bool,
        fail_scene_commands: bool,
    }

    struct MockStrategy {
        log: Rc<RefCell<StrategyLog>>,
    }

    impl RenderStrategy<MockGpu> for MockStrategy {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn color_load_op(&self) -> vk::AttachmentLoadOp {
            vk::AttachmentLoadOp::LOAD
        }

        fn on_prepare(&mut self, gpu: &MockGpu, _scene: &Scene) -> RenderResult<()> {
            let mut log = self.log.borrow_mut();
            log.prepared += 1;
            log.render_passes_seen.push(gpu.render_pass);
            Ok(())
        }

        fn on_surface_recreated(&mut self, gpu: &MockGpu) -> RenderResult<()> {
            let mut log = self.log.borrow_mut();
            log.surface_recreated += 1;
            log.render_passes_seen.push(gpu.render_pass);
            Ok(())
        }

        fn on_scene_changed(&mut self, _gpu: &MockGpu, _scene: &Scene) -> RenderResult<()> {
            let mut log = self.log.borrow_mut();
            if log.fail_scene_change {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).into());
            }
            log.scene_changes += 1;
            Ok(())
        }

        fn update_uniforms(&mut self, _gpu: &MockGpu, _frame_slot: usize, inputs: &FrameInputs<'_>) -> RenderResult<()> {
            let mut log = self.log.borrow_mut();
            log.uniform_frames.push(inputs.frame);
            log.last_aspect = inputs.aspect;
            Ok(())
        }

        fn record_scene_commands(&mut self, _gpu: &MockGpu, _target: &FrameTarget) -> RenderResult<()> {
            let mut log = self.log.borrow_mut();
            if log.fail_scene_commands {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).into());
            }
            log.scene_commands += 1;
            Ok(())
        }

        fn record_pass_commands(&mut self, _gpu: &MockGpu, _target: &FrameTarget) -> RenderResult<()> {
            self.log.borrow_mut().pass_commands += 1;
            Ok(())
        }

        fn on_cleanup(&mut self, _gpu: &MockGpu) {
            self.log.borrow_mut().cleaned_up += 1;
        }
    }

    struct CountingOverlay {
        draws: Rc<RefCell<usize>>,
    }

    impl UiOverlay for CountingOverlay {
        fn update_ui(&mut self, _delta_time: f32) {}

        fn update_buffers(&mut self) -> RenderResult<()> {
            Ok(())
        }

        fn draw_frame(&mut self, _command_buffer: vk::CommandBuffer) {
            *self.draws.borrow_mut() += 1;
        }
    }

    fn orchestrator(frames: usize) -> (FrameOrchestrator<MockBackend>, Rc<RefCell<StrategyLog>>, Rc<RefCell<usize>>) {
        let log = Rc::new(RefCell::new(StrategyLog::default()));
        let draws = Rc::new(RefCell::new(0));
        let orchestrator = FrameOrchestrator::new(
            MockBackend::new(frames),
            Box::new(MockStrategy { log: Rc::clone(&log) }),
            Box::new(CountingOverlay {
                draws: Rc::clone(&draws),
            }),
        );
        (orchestrator, log, draws)
    }

    #[test]
    fn test_render_before_prepare_is_rejected() {
        let (mut orchestrator, _, _) = orchestrator(2);
        let result = orchestrator.render_frame(&Camera::default(), &[], 0.016);
        assert!(matches!(
            result,
            Err(RenderError::InvalidState {
                state: LifecycleState::GraphicsReady,
                ..
            })
        ));
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let (mut orchestrator, log, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();
        orchestrator.prepare(&Scene::new()).unwrap();
        assert_eq!(orchestrator.state(), LifecycleState::Prepared);
        assert_eq!(orchestrator.backend().count(Event::Prepare), 1);
        assert_eq!(log.borrow().prepared, 1);
    }

    #[test]
    fn test_empty_scene_renders_and_presents_one_frame() {
        let (mut orchestrator, log, draws) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();

        let outcome = orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
        assert_eq!(
            orchestrator.backend().events[1..],
            [
                Event::Wait(0),
                Event::Acquire(0),
                Event::Begin(0),
                Event::BeginPass,
                Event::EndPass,
                Event::Submit(0),
                Event::Present(0),
            ]
        );
        let log = log.borrow();
        assert_eq!(log.uniform_frames, [0]);
        assert_eq!(log.scene_commands, 1);
        assert_eq!(log.pass_commands, 1);
        assert_eq!(*draws.borrow(), 1);
        approx::assert_relative_eq!(log.last_aspect, 800.0 / 600.0);
    }

    #[test]
    fn test_command_buffers_are_never_rerecorded_in_flight() {
        let (mut orchestrator, _, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();
        for _ in 0..7 {
            orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        }

        let backend = orchestrator.backend();
        assert_eq!(backend.rerecorded_in_flight, 0);
        assert_eq!(backend.count(Event::Submit(0)), 4);
        assert_eq!(backend.count(Event::Submit(1)), 3);

        // Every Begin(slot) is preceded by a Wait(slot) since that slot's last submit
        for (position, event) in backend.events.iter().enumerate() {
            if let Event::Begin(slot) = *event {
                let history = &backend.events[..position];
                let last_wait = history.iter().rposition(|&e| e == Event::Wait(slot));
                let last_submit = history.iter().rposition(|&e| e == Event::Submit(slot));
                assert!(last_wait.is_some());
                assert!(last_submit < last_wait);
            }
        }
    }

    #[test]
    fn test_out_of_date_acquire_recreates_before_next_present() {
        let (mut orchestrator, log, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();
        orchestrator
            .backend
            .acquire_script
            .push_back(AcquireOutcome::OutOfDate);

        let first = orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        assert_eq!(first, FrameOutcome::Recreated);
        assert_eq!(log.borrow().surface_recreated, 1);
        assert_eq!(orchestrator.backend().count(Event::Submit(0)), 0);

        let second = orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        assert!(matches!(second, FrameOutcome::Presented { .. }));

        let events = &orchestrator.backend().events;
        let recreate = events.iter().position(|&e| e == Event::Recreate).unwrap();
        let present = events.iter().position(|e| matches!(e, Event::Present(_))).unwrap();
        assert!(recreate < present);
    }

    #[test]
    fn test_suboptimal_present_recreates_after_frame() {
        let (mut orchestrator, log, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();
        orchestrator
            .backend
            .present_script
            .push_back(PresentOutcome::Suboptimal);

        let outcome = orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
        assert_eq!(orchestrator.backend().count(Event::Recreate), 1);
        assert_eq!(log.borrow().surface_recreated, 1);
    }

    #[test]
    fn test_out_of_date_present_reports_recreated() {
        let (mut orchestrator, _, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();
        orchestrator
            .backend
            .present_script
            .push_back(PresentOutcome::OutOfDate);

        let outcome = orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        assert_eq!(outcome, FrameOutcome::Recreated);
        assert_eq!(orchestrator.backend().count(Event::Recreate), 1);
    }

    #[test]
    fn test_resize_applies_before_next_frame() {
        let (mut orchestrator, log, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();

        orchestrator.notify_resized(0, 0);
        let minimized = orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        assert_eq!(minimized, FrameOutcome::Skipped);
        assert_eq!(orchestrator.backend().count(Event::Recreate), 0);

        orchestrator.notify_resized(1024, 512);
        orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        assert_eq!(orchestrator.backend().count(Event::Recreate), 1);
        assert_eq!(orchestrator.backend().extent().width, 1024);
        approx::assert_relative_eq!(log.borrow().last_aspect, 2.0);
    }

    #[test]
    fn test_scene_change_waits_for_idle_gpu() {
        let (mut orchestrator, log, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();
        orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        orchestrator.scene_changed(&Scene::new()).unwrap();

        assert_eq!(orchestrator.backend().events.last(), Some(&Event::WaitIdle));
        assert_eq!(log.borrow().scene_changes, 1);
    }

    #[test]
    fn test_failed_scene_change_keeps_rendering() {
        let (mut orchestrator, log, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();
        log.borrow_mut().fail_scene_change = true;

        assert!(orchestrator.scene_changed(&Scene::new()).is_err());
        let outcome = orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    }

    #[test]
    fn test_cleanup_runs_once() {
        let (mut orchestrator, log, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();
        orchestrator.cleanup().unwrap();
        orchestrator.cleanup().unwrap();
        assert_eq!(orchestrator.state(), LifecycleState::Terminated);
        drop(orchestrator);
        assert_eq!(log.borrow().cleaned_up, 1);
    }

    #[test]
    fn test_abandoned_recording_leaves_slot_waitable() {
        let (mut orchestrator, log, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();

        log.borrow_mut().fail_scene_commands = true;
        assert!(orchestrator.render_frame(&Camera::default(), &[], 0.016).is_err());
        assert_eq!(orchestrator.backend().count(Event::Submit(0)), 0);

        log.borrow_mut().fail_scene_commands = false;
        for _ in 0..4 {
            orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        }
        assert_eq!(orchestrator.backend().hung_waits, 0);
        assert_eq!(orchestrator.backend().count(Event::Submit(0)), 2);
    }

    #[test]
    fn test_strategy_sees_render_pass_rebuilt_by_recreate() {
        let (mut orchestrator, log, _) = orchestrator(2);
        orchestrator.prepare(&Scene::new()).unwrap();
        orchestrator.backend.format_changes_on_recreate = true;
        orchestrator
            .backend
            .acquire_script
            .push_back(AcquireOutcome::OutOfDate);

        let outcome = orchestrator.render_frame(&Camera::default(), &[], 0.016).unwrap();
        assert_eq!(outcome, FrameOutcome::Recreated);
        assert_eq!(log.borrow().render_passes_seen, [1, 2]);
    }
}
