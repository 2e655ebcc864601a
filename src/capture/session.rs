//! Capture session: output binding plus the acquire / lock / release protocol

use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::capture::cursor::CursorState;
use crate::capture::frame::{
    CaptureTarget, FrameInfo, FrameView, MovedRegion, OutputDesc, Point, Rect,
};
use crate::capture::metadata::MetadataExtractor;
use crate::capture::platform::{Duplication, Platform, RawFrameInfo, StagingSurface};
use crate::error::{CaptureError, PlatformError, PlatformErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Locked,
}

/// Outcome of [`CaptureSession::acquire_frame`]
pub enum Acquired<'s, D: Duplication> {
    Frame(Frame<'s, D>),
    /// No new frame within the timeout
    Timeout,
}

/// A duplication session bound to one output
///
/// The staging surface is allocated at open and reused for every frame. Closing is
/// done by [`CaptureSession::close`] or by dropping the session.
pub struct CaptureSession<D: Duplication> {
    target: CaptureTarget,
    desc: OutputDesc,
    duplication: D,
    surface: D::Surface,
    metadata: MetadataExtractor,
    cursor: CursorState,
    state: SessionState,
    /// Release failure from a dropped frame, reported by the next acquire
    deferred_error: Option<CaptureError>,
    frames: u64,
}

impl<D: Duplication> CaptureSession<D> {
    #[instrument(skip(platform))]
    pub fn open<P>(platform: &P, target: CaptureTarget) -> Result<Self>
    where
        P: Platform<Duplication = D>,
    {
        let (desc, mut duplication) = platform
            .open_output(target)
            .map_err(|e| open_error(target, e))?;

        let surface = duplication
            .create_surface(desc.width, desc.height)
            .map_err(|e| CaptureError::from_platform("CreateTexture2D", e))?;

        info!(
            output = %desc.name,
            width = desc.width,
            height = desc.height,
            "capture session opened"
        );

        Ok(Self {
            target,
            desc,
            duplication,
            surface,
            metadata: MetadataExtractor::new(),
            cursor: CursorState::new(),
            state: SessionState::Idle,
            deferred_error: None,
            frames: 0,
        })
    }

    pub fn target(&self) -> CaptureTarget {
        self.target
    }

    pub fn output(&self) -> &OutputDesc {
        &self.desc
    }

    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }

    /// Frames acquired so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_locked(&self) -> bool {
        self.state == SessionState::Locked
    }

    /// Wait up to `timeout` for the next desktop frame
    ///
    /// The returned [`Frame`] keeps the session locked until it is released or dropped.
    ///
    /// # Panics
    ///
    /// If a previous frame was leaked without being released.
    pub fn acquire_frame(&mut self, timeout: Duration) -> Result<Acquired<'_, D>> {
        assert_eq!(
            self.state,
            SessionState::Idle,
            "acquire_frame called while a frame is still locked"
        );
        if let Some(err) = self.deferred_error.take() {
            return Err(err);
        }

        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let raw = match self.duplication.acquire_next_frame(timeout_ms) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(Acquired::Timeout),
            Err(e) => return Err(CaptureError::from_platform("AcquireNextFrame", e)),
        };

        let info = match self.prepare(&raw) {
            Ok(info) => info,
            Err(err) => {
                if let Err(e) = self.duplication.release_frame() {
                    warn!(error = %e, "release after failed acquire also failed");
                }
                return Err(err);
            }
        };

        self.frames += 1;
        self.state = SessionState::Locked;
        debug!(
            frame = self.frames,
            accumulated = info.accumulated_frames,
            moved = info.moved_regions.len(),
            dirty = info.updated_regions.len(),
            "frame acquired"
        );

        Ok(Acquired::Frame(Frame {
            session: self,
            info,
            released: false,
        }))
    }

    /// Copy, gather metadata and map; the platform frame is held on entry
    fn prepare(&mut self, raw: &RawFrameInfo) -> Result<FrameInfo> {
        self.duplication
            .copy_frame_to(&mut self.surface)
            .map_err(|e| CaptureError::from_platform("CopyResource", e))?;

        let regions = self
            .metadata
            .extract(&mut self.duplication, raw.total_metadata_buffer_size)?;

        self.cursor
            .update_from_frame(self.target.output, raw, &mut self.duplication)?;

        let row_stride = self
            .surface
            .map()
            .map_err(|e| CaptureError::from_platform("Map", e))?;

        Ok(FrameInfo {
            width: self.desc.width,
            height: self.desc.height,
            row_stride,
            accumulated_frames: raw.accumulated_frames,
            last_present_time: raw.last_present_time,
            moved_regions: regions.moved,
            updated_regions: regions.updated,
            cursor_position: self.cursor.position(),
            cursor_visible: self.cursor.visible(),
            protected_content_masked_out: raw.protected_content_masked_out,
            rects_coalesced: raw.rects_coalesced,
        })
    }

    /// Release the duplication, device and staging surface
    pub fn close(self) {
        info!(
            adapter = self.target.adapter,
            output = self.target.output,
            frames = self.frames,
            "capture session closed"
        );
    }
}

fn open_error(target: CaptureTarget, e: PlatformError) -> CaptureError {
    match e.kind {
        PlatformErrorKind::AdapterNotFound => CaptureError::AdapterNotFound {
            adapter: target.adapter,
        },
        PlatformErrorKind::OutputNotFound => CaptureError::OutputNotFound {
            adapter: target.adapter,
            output: target.output,
        },
        PlatformErrorKind::NotCurrentlyAvailable => CaptureError::DuplicationUnavailable,
        PlatformErrorKind::Unsupported => CaptureError::Configuration(e.message),
        _ => CaptureError::from_platform("DuplicateOutput", e),
    }
}

/// A locked desktop frame
///
/// Pixel access is only possible through a `Frame`, and the session cannot acquire again
/// while one exists. Dropping an unreleased frame releases it; a failure there is logged
/// and returned by the session's next acquire.
pub struct Frame<'s, D: Duplication> {
    session: &'s mut CaptureSession<D>,
    info: FrameInfo,
    released: bool,
}

impl<'s, D: Duplication> Frame<'s, D> {
    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn row_stride(&self) -> usize {
        self.info.row_stride
    }

    pub fn accumulated_frames(&self) -> u32 {
        self.info.accumulated_frames
    }

    pub fn moved_regions(&self) -> &[MovedRegion] {
        &self.info.moved_regions
    }

    pub fn updated_regions(&self) -> &[Rect] {
        &self.info.updated_regions
    }

    pub fn cursor_position(&self) -> Point {
        self.info.cursor_position
    }

    pub fn cursor_visible(&self) -> bool {
        self.info.cursor_visible
    }

    pub fn protected_content_masked_out(&self) -> bool {
        self.info.protected_content_masked_out
    }

    pub fn rects_coalesced(&self) -> bool {
        self.info.rects_coalesced
    }

    /// Platform timestamp of the last desktop present, 0 if only the pointer changed
    pub fn last_present_time(&self) -> i64 {
        self.info.last_present_time
    }

    pub fn cursor(&self) -> &CursorState {
        &self.session.cursor
    }

    /// Bounds-checked view of the mapped staging surface
    pub fn view(&self) -> Result<FrameView<'_>> {
        let bytes = self
            .session
            .surface
            .mapped()
            .ok_or_else(|| CaptureError::InvalidView("staging surface is not mapped".into()))?;
        FrameView::new(bytes, self.info.width, self.info.height, self.info.row_stride)
    }

    /// Unmap the surface and hand the frame back to the platform
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        self.session.surface.unmap();
        self.session.state = SessionState::Idle;
        self.session
            .duplication
            .release_frame()
            .map_err(|e| CaptureError::from_platform("ReleaseFrame", e))
    }
}

impl<'s, D: Duplication> Drop for Frame<'s, D> {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            error!(error = %err, "failed to release dropped frame");
            self.session.deferred_error = Some(err);
        }
    }
}
