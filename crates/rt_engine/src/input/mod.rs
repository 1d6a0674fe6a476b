//! Input events delivered by the window once per frame

/// Keys the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Escape
    Escape,
    /// Space bar
    Space,
    /// W
    W,
    /// A
    A,
    /// S
    S,
    /// D
    D,
    /// Q
    Q,
    /// E
    E,
    /// R
    R,
    /// Any other key, by platform key code
    Other(i32),
}

/// Mouse buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Primary button
    Left,
    /// Secondary button
    Right,
    /// Wheel button
    Middle,
}

/// A polled window event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// The user asked to close the window
    Quit,
    /// A key was pressed
    KeyDown(Key),
    /// A key was released
    KeyUp(Key),
    /// The cursor moved to a new position in window coordinates
    MouseMotion {
        /// Cursor x
        x: f64,
        /// Cursor y
        y: f64,
    },
    /// A mouse button changed state
    MouseButton {
        /// Which button
        button: MouseButton,
        /// Whether it is now held
        pressed: bool,
    },
    /// The framebuffer was resized to the given size in pixels
    Resized {
        /// New width
        width: u32,
        /// New height
        height: u32,
    },
}

/// Mouse-look state derived from the event stream
#[derive(Debug, Default, Clone)]
pub struct MouseLook {
    dragging: bool,
    last: Option<(f64, f64)>,
}

impl MouseLook {
    /// Feed one event; returns a cursor delta while the right button is held
    pub fn handle(&mut self, event: &InputEvent) -> Option<(f32, f32)> {
        match *event {
            InputEvent::MouseButton {
                button: MouseButton::Right,
                pressed,
            } => {
                self.dragging = pressed;
                self.last = None;
                None
            }
            InputEvent::MouseMotion { x, y } if self.dragging => {
                let delta = self.last.map(|(lx, ly)| ((x - lx) as f32, (y - ly) as f32));
                self.last = Some((x, y));
                delta
            }
            _ => None,
        }
    }
}
