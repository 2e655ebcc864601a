//! Platform capture seam
//!
//! A [`Platform`] enumerates adapters and outputs and opens a [`Duplication`] for one
//! output. The duplication hands out frames one at a time: acquire, query metadata,
//! copy into a [`StagingSurface`], release.

use crate::capture::cursor::PointerShapeInfo;
use crate::capture::frame::{CaptureTarget, MoveRect, OutputDesc, Point, RawRect};
use crate::error::PlatformError;

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerPosition {
    pub position: Point,
    pub visible: bool,
}

/// Frame information returned by a successful acquire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawFrameInfo {
    pub last_present_time: i64,
    /// Zero when the pointer did not change since the last frame
    pub last_mouse_update_time: i64,
    pub accumulated_frames: u32,
    pub rects_coalesced: bool,
    pub protected_content_masked_out: bool,
    pub pointer_position: PointerPosition,
    /// Bytes of move plus dirty records; zero means no metadata
    pub total_metadata_buffer_size: u32,
    /// Zero when the pointer shape did not change
    pub pointer_shape_buffer_size: u32,
}

/// Moved/dirty rectangle queries for the currently acquired frame
///
/// Both return the number of bytes written into `buffer`.
pub trait FrameMetadataSource {
    fn frame_move_rects(&mut self, buffer: &mut [MoveRect]) -> PlatformResult<u32>;
    fn frame_dirty_rects(&mut self, buffer: &mut [RawRect]) -> PlatformResult<u32>;
}

/// Pointer shape query for the currently acquired frame
pub trait PointerShapeSource {
    /// Fill `buffer` with shape bytes, returning the number of bytes written
    fn frame_pointer_shape(&mut self, buffer: &mut [u8]) -> PlatformResult<(u32, PointerShapeInfo)>;
}

/// CPU-readable copy target, allocated once per session
pub trait StagingSurface {
    /// Map for reading; returns the row pitch in bytes
    fn map(&mut self) -> PlatformResult<usize>;
    /// Mapped bytes, `None` while unmapped
    fn mapped(&self) -> Option<&[u8]>;
    fn unmap(&mut self);
}

/// A duplication handle bound to one output
pub trait Duplication: FrameMetadataSource + PointerShapeSource {
    type Surface: StagingSurface;

    /// Allocate a BGRA8 staging surface of the given size
    fn create_surface(&mut self, width: u32, height: u32) -> PlatformResult<Self::Surface>;

    /// Wait up to `timeout_ms` for a new frame; `Ok(None)` on timeout
    fn acquire_next_frame(&mut self, timeout_ms: u32) -> PlatformResult<Option<RawFrameInfo>>;

    /// Copy the acquired desktop image into `surface`
    fn copy_frame_to(&mut self, surface: &mut Self::Surface) -> PlatformResult<()>;

    fn release_frame(&mut self) -> PlatformResult<()>;
}

/// Display enumeration
pub trait Platform {
    type Duplication: Duplication;

    /// Errors carry [`crate::error::PlatformErrorKind::AdapterNotFound`],
    /// `OutputNotFound` or `NotCurrentlyAvailable` where they apply.
    fn open_output(&self, target: CaptureTarget)
        -> PlatformResult<(OutputDesc, Self::Duplication)>;
}
