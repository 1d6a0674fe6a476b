//! Window management using GLFW
//!
//! The window hands the engine a surface and a polled stream of
//! [`InputEvent`]s.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use super::instance::VulkanInstance;
use super::surface::Surface;
use crate::config::WindowConfig;
use crate::input::{InputEvent, Key, MouseButton};

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not start
    #[error("GLFW initialization failed: {0}")]
    InitializationFailed(String),

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// GLFW reported an error
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW window wrapper
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Create a window without a client API, ready for Vulkan
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|e| WindowError::InitializationFailed(format!("{e:?}")))?;
        if !glfw.vulkan_supported() {
            return Err(WindowError::InitializationFailed("Vulkan is not supported by GLFW".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_cursor_pos_polling(true);
        window.set_mouse_button_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Created window '{}' ({}x{})", config.title, config.width, config.height);
        Ok(Self { glfw, window, events })
    }

    /// Instance extensions GLFW needs for surface creation
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    /// Create a surface for this window
    pub fn create_surface(&mut self, instance: &Arc<VulkanInstance>) -> WindowResult<Surface> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance.raw().handle(), std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(Surface::from_raw(Arc::clone(instance), surface))
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {result:?}")))
        }
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request the window to close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Block until an event arrives (used while minimized)
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Pump the OS queue and translate the pending events
    pub fn poll_events(&mut self) -> Vec<InputEvent> {
        self.glfw.poll_events();
        glfw::flush_messages(&self.events)
            .filter_map(|(_, event)| translate_event(event))
            .collect()
    }
}

fn translate_key(key: glfw::Key) -> Key {
    match key {
        glfw::Key::Escape => Key::Escape,
        glfw::Key::Space => Key::Space,
        glfw::Key::W => Key::W,
        glfw::Key::A => Key::A,
        glfw::Key::S => Key::S,
        glfw::Key::D => Key::D,
        glfw::Key::Q => Key::Q,
        glfw::Key::E => Key::E,
        glfw::Key::R => Key::R,
        other => Key::Other(other as i32),
    }
}

fn translate_event(event: glfw::WindowEvent) -> Option<InputEvent> {
    match event {
        glfw::WindowEvent::Close => Some(InputEvent::Quit),
        glfw::WindowEvent::Key(key, _, glfw::Action::Press, _) => Some(InputEvent::KeyDown(translate_key(key))),
        glfw::WindowEvent::Key(key, _, glfw::Action::Release, _) => Some(InputEvent::KeyUp(translate_key(key))),
        glfw::WindowEvent::CursorPos(x, y) => Some(InputEvent::MouseMotion { x, y }),
        glfw::WindowEvent::MouseButton(button, action, _) => {
            let button = match button {
                glfw::MouseButton::Button1 => MouseButton::Left,
                glfw::MouseButton::Button2 => MouseButton::Right,
                glfw::MouseButton::Button3 => MouseButton::Middle,
                _ => return None,
            };
            Some(InputEvent::MouseButton {
                button,
                pressed: action != glfw::Action::Release,
            })
        }
        glfw::WindowEvent::FramebufferSize(width, height) => Some(InputEvent::Resized {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
        }),
        _ => None,
    }
}
