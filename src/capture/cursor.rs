//! Pointer position and shape tracking across frames

use tracing::trace;

use crate::capture::frame::Point;
use crate::capture::platform::{PointerShapeSource, RawFrameInfo};
use crate::error::{CaptureError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PointerShapeKind {
    #[default]
    Monochrome,
    Color,
    MaskedColor,
    Unknown(u32),
}

impl From<u32> for PointerShapeKind {
    fn from(raw: u32) -> Self {
        match raw {
            1 => Self::Monochrome,
            2 => Self::Color,
            4 => Self::MaskedColor,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerShapeInfo {
    pub kind: PointerShapeKind,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub hot_spot: Point,
}

/// Cursor state owned by one capture session
///
/// Position updates follow a multi-output policy: an output never hides a cursor that
/// another output last showed, and a stale visible report from another output does not
/// override a newer one.
#[derive(Debug, Default)]
pub struct CursorState {
    position: Point,
    visible: bool,
    last_updater: Option<u32>,
    last_timestamp: i64,
    shape_buffer: Vec<u8>,
    shape_len: usize,
    shape_info: Option<PointerShapeInfo>,
}

impl CursorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn last_updater(&self) -> Option<u32> {
        self.last_updater
    }

    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    /// Shape bytes from the last shape fetch
    pub fn shape(&self) -> &[u8] {
        &self.shape_buffer[..self.shape_len]
    }

    pub fn shape_info(&self) -> Option<&PointerShapeInfo> {
        self.shape_info.as_ref()
    }

    /// Allocated shape buffer size; never shrinks
    pub fn shape_capacity(&self) -> usize {
        self.shape_buffer.len()
    }

    /// Whether a position report from `output` should replace the stored state
    pub fn accepts(&self, output: u32, visible: bool, timestamp: i64) -> bool {
        let other_output = self.last_updater != Some(output);

        if !visible && other_output {
            return false;
        }
        if visible && self.visible && other_output && self.last_timestamp > timestamp {
            return false;
        }
        true
    }

    /// Apply a position report; returns whether it was accepted
    pub fn update_position(
        &mut self,
        output: u32,
        position: Point,
        visible: bool,
        timestamp: i64,
    ) -> bool {
        if !self.accepts(output, visible, timestamp) {
            trace!(output, visible, timestamp, "cursor update rejected");
            return false;
        }
        self.position = position;
        self.last_updater = Some(output);
        self.last_timestamp = timestamp;
        self.visible = visible;
        true
    }

    /// Apply a frame's pointer metadata, fetching the shape when it changed
    pub fn update_from_frame<S>(
        &mut self,
        output: u32,
        info: &RawFrameInfo,
        source: &mut S,
    ) -> Result<()>
    where
        S: PointerShapeSource + ?Sized,
    {
        if info.last_mouse_update_time == 0 {
            return Ok(());
        }

        self.update_position(
            output,
            info.pointer_position.position,
            info.pointer_position.visible,
            info.last_mouse_update_time,
        );

        if info.pointer_shape_buffer_size == 0 {
            return Ok(());
        }
        self.fetch_shape(info.pointer_shape_buffer_size as usize, source)
    }

    fn fetch_shape<S>(&mut self, size: usize, source: &mut S) -> Result<()>
    where
        S: PointerShapeSource + ?Sized,
    {
        if size > self.shape_buffer.len() {
            self.shape_buffer.resize(size, 0);
        }

        let (written, info) = source
            .frame_pointer_shape(&mut self.shape_buffer[..size])
            .map_err(|e| CaptureError::from_platform("GetFramePointerShape", e))?;

        self.shape_len = (written as usize).min(size);
        self.shape_info = Some(info);
        Ok(())
    }
}
