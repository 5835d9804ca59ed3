// ABOUTME: Process-wide tunables for a filter instance
// ABOUTME: builder shape mirrors a keep-alive-style config: sensible defaults, narrow with_* overrides

use crate::buffer::{DEFAULT_ALIGN_SHIFT, DEFAULT_MAX_CAPACITY};

/// Tunables for one filter instance.
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    /// preview target frames per second; 0 is treated as 10.
    fps: u32,
    /// whether the scheduler ever arms at all.
    preview_enabled: bool,
    /// maximum buffered frames before the scheduler suspends itself.
    buffer_count: usize,
    /// maximum ring buffer size in bytes.
    max_buffer_bytes: usize,
    /// frame boundary alignment, as a power-of-two shift.
    align_shift: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            fps: 10,
            preview_enabled: true,
            buffer_count: 3,
            max_buffer_bytes: DEFAULT_MAX_CAPACITY,
            align_shift: DEFAULT_ALIGN_SHIFT,
        }
    }
}

impl FilterConfig {
    pub fn new(fps: u32) -> Self {
        FilterConfig {
            fps: if fps == 0 { 10 } else { fps },
            ..Default::default()
        }
    }

    /// A filter that never schedules preview ticks; client transactions
    /// still pass through the parser/state machine normally.
    pub fn disabled_preview() -> Self {
        FilterConfig {
            preview_enabled: false,
            buffer_count: 0,
            ..Default::default()
        }
    }

    pub fn preview_enabled(&self) -> bool {
        self.preview_enabled
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    pub fn with_max_buffer_bytes(mut self, max_buffer_bytes: usize) -> Self {
        self.max_buffer_bytes = max_buffer_bytes;
        self
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    pub fn max_buffer_bytes(&self) -> usize {
        self.max_buffer_bytes
    }

    pub fn align_shift(&self) -> u32 {
        self.align_shift
    }
}
