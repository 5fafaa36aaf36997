pub mod texture_decode_3d;

use crate::core::gpu_2d::{DISPLAY_HEIGHT, DISPLAY_WIDTH};
use crate::utils::HeapMemU32;

/// What the 2D compositor needs from the 3D renderer: one finished line of
/// 32-bit color (alpha in the high byte, 0 = transparent) and a small control
/// surface for the accelerated capture path.
pub trait Renderer3D {
    fn is_accelerated(&self) -> bool;
    fn line(&self, line: u32) -> &[u32; DISPLAY_WIDTH];
    fn render_x_pos(&self) -> u32;
    fn prepare_capture_frame(&mut self) {}
}

/// Software line source holding a full frame of 3D output. Doubles as the
/// "no 3D" renderer when left cleared.
pub struct Software3D {
    frame: HeapMemU32<{ DISPLAY_WIDTH * DISPLAY_HEIGHT }>,
    pub x_pos: u32,
}

impl Software3D {
    pub fn new() -> Self {
        Software3D {
            frame: HeapMemU32::new(),
            x_pos: 0,
        }
    }

    pub fn line_mut(&mut self, line: u32) -> &mut [u32] {
        let start = line as usize * DISPLAY_WIDTH;
        &mut self.frame[start..start + DISPLAY_WIDTH]
    }
}

impl Default for Software3D {
    fn default() -> Self {
        Software3D::new()
    }
}

impl Renderer3D for Software3D {
    fn is_accelerated(&self) -> bool {
        false
    }

    fn line(&self, line: u32) -> &[u32; DISPLAY_WIDTH] {
        let start = line as usize * DISPLAY_WIDTH;
        debug_assert!(start + DISPLAY_WIDTH <= self.frame.len());
        unsafe { &*(self.frame.as_ptr().add(start) as *const [u32; DISPLAY_WIDTH]) }
    }

    fn render_x_pos(&self) -> u32 {
        self.x_pos
    }
}
