//! Deterministic in-memory platform
//!
//! Outputs replay a script of frames, timeouts and injected failures. Used by tests and
//! by the demo binary on hosts without a desktop duplication API.

use std::mem::size_of;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::capture::cursor::{PointerShapeInfo, PointerShapeKind};
use crate::capture::frame::{
    CaptureTarget, MoveRect, OutputDesc, Point, RawRect, Rect, BYTES_PER_PIXEL,
};
use crate::capture::platform::{
    Duplication, FrameMetadataSource, Platform, PlatformResult, PointerPosition, PointerShapeSource,
    RawFrameInfo, StagingSurface,
};
use crate::color::pixel::{HsvColor, PixelColor};
use crate::error::{PlatformError, PlatformErrorKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticPointer {
    pub position: Point,
    pub visible: bool,
    /// Must be non-zero for the update to be reported
    pub timestamp: i64,
    pub shape: Option<Vec<u8>>,
}

/// One scripted desktop update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntheticFrame {
    /// Repaint the whole desktop
    pub fill: Option<PixelColor>,
    /// Repaint rectangles, applied after `fill`
    pub paint: Vec<(Rect, PixelColor)>,
    pub moves: Vec<MoveRect>,
    /// Reported in addition to the painted areas
    pub dirty: Vec<RawRect>,
    pub pointer: Option<SyntheticPointer>,
    pub accumulated_frames: u32,
    /// Platform call to fail while this frame is held
    pub fault: Option<SyntheticFault>,
}

/// Failure injected into one step of a held frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticFault {
    Copy,
    /// Report this many dirty-rect bytes instead of the real count
    DirtyRectBytes(u32),
    PointerShape,
    Map,
    /// The frame is handed back but the call reports failure
    Release,
}

impl SyntheticFrame {
    pub fn filled(color: PixelColor) -> Self {
        Self {
            fill: Some(color),
            accumulated_frames: 1,
            ..Default::default()
        }
    }

    pub fn with_fault(mut self, fault: SyntheticFault) -> Self {
        self.fault = Some(fault);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticEvent {
    Frame(SyntheticFrame),
    Timeout,
    /// Fail the acquire with this kind
    Fail(PlatformErrorKind),
}

/// One simulated display
#[derive(Debug, Clone)]
pub struct SyntheticOutput {
    name: String,
    width: u32,
    height: u32,
    row_padding: usize,
    initial: PixelColor,
    script: Vec<SyntheticEvent>,
    looping: bool,
}

impl SyntheticOutput {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            row_padding: 0,
            initial: PixelColor::BLACK,
            script: Vec::new(),
            looping: false,
        }
    }

    /// Desktop color before the first scripted frame
    pub fn initial(mut self, color: PixelColor) -> Self {
        self.initial = color;
        self
    }

    /// Extra bytes at the end of every staging surface row
    pub fn row_padding(mut self, bytes: usize) -> Self {
        self.row_padding = bytes;
        self
    }

    pub fn event(mut self, event: SyntheticEvent) -> Self {
        self.script.push(event);
        self
    }

    pub fn frame(self, frame: SyntheticFrame) -> Self {
        self.event(SyntheticEvent::Frame(frame))
    }

    /// Restart the script when it runs out instead of timing out forever
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

/// Acquire/release counters shared by all duplications of a platform
#[derive(Debug, Default)]
pub struct SyntheticStats {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl SyntheticStats {
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Release calls for held frames, failed ones included
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticPlatform {
    adapters: Vec<Vec<SyntheticOutput>>,
    max_duplications: usize,
    /// Fail the opens whose ordinal falls in the range
    open_failures: Option<(PlatformErrorKind, Range<usize>)>,
    opens: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    stats: Arc<SyntheticStats>,
}

impl Default for SyntheticPlatform {
    fn default() -> Self {
        Self {
            adapters: Vec::new(),
            max_duplications: usize::MAX,
            open_failures: None,
            opens: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(SyntheticStats::default()),
        }
    }
}

impl SyntheticPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// A platform with one adapter holding one output
    pub fn single(output: SyntheticOutput) -> Self {
        Self::new().adapter(vec![output])
    }

    pub fn adapter(mut self, outputs: Vec<SyntheticOutput>) -> Self {
        self.adapters.push(outputs);
        self
    }

    /// Limit concurrently open duplications
    pub fn max_duplications(mut self, max: usize) -> Self {
        self.max_duplications = max;
        self
    }

    /// Fail open attempts `attempts` (0-based, counted across clones) with `kind`
    pub fn fail_opens(mut self, kind: PlatformErrorKind, attempts: Range<usize>) -> Self {
        self.open_failures = Some((kind, attempts));
        self
    }

    /// Open attempts so far, failed ones included
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    pub fn active_duplications(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Arc<SyntheticStats> {
        Arc::clone(&self.stats)
    }

    /// Looping hue sweep with a wandering visible pointer
    pub fn demo(width: u32, height: u32, steps: u16) -> Self {
        let steps = steps.max(1);
        let mut output = SyntheticOutput::new("SYNTHETIC1", width, height).looping(true);
        for i in 0..steps {
            let hue = f32::from(i) * 360.0 / f32::from(steps);
            let mut frame = SyntheticFrame::filled(HsvColor::new(hue, 200, 220).to_rgb());
            let x = (u32::from(i) * width / u32::from(steps)) as i32;
            frame.paint.push((
                Rect::new(0, 0, (width / 4) as i32, (height / 4) as i32),
                PixelColor::WHITE,
            ));
            frame.pointer = Some(SyntheticPointer {
                position: Point::new(x, (height / 2) as i32),
                visible: true,
                timestamp: i64::from(i) + 1,
                shape: (i == 0).then(|| vec![0xFF; 32 * 32 * 4]),
            });
            output = output.frame(frame);
        }
        Self::single(output)
    }
}

impl Platform for SyntheticPlatform {
    type Duplication = SyntheticDuplication;

    fn open_output(
        &self,
        target: CaptureTarget,
    ) -> PlatformResult<(OutputDesc, SyntheticDuplication)> {
        let attempt = self.opens.fetch_add(1, Ordering::AcqRel);
        if let Some((kind, attempts)) = &self.open_failures {
            if attempts.contains(&attempt) {
                return Err(PlatformError::new(*kind, "injected open failure"));
            }
        }

        let outputs = self
            .adapters
            .get(target.adapter as usize)
            .ok_or_else(|| {
                PlatformError::new(PlatformErrorKind::AdapterNotFound, "no such adapter")
            })?;
        let output = outputs.get(target.output as usize).ok_or_else(|| {
            PlatformError::new(PlatformErrorKind::OutputNotFound, "no such output")
        })?;

        let claimed = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_duplications).then_some(n + 1)
            });
        if claimed.is_err() {
            return Err(PlatformError::new(
                PlatformErrorKind::NotCurrentlyAvailable,
                "duplication limit reached",
            ));
        }

        let desc = OutputDesc {
            name: output.name.clone(),
            width: output.width,
            height: output.height,
        };
        let desktop = output
            .initial
            .to_bgra()
            .repeat(output.width as usize * output.height as usize);

        Ok((
            desc,
            SyntheticDuplication {
                output: output.clone(),
                desktop,
                cursor: 0,
                current: None,
                present_time: 0,
                active: Arc::clone(&self.active),
                stats: Arc::clone(&self.stats),
            },
        ))
    }
}

pub struct SyntheticDuplication {
    output: SyntheticOutput,
    /// Tightly packed BGRA desktop image
    desktop: Vec<u8>,
    cursor: usize,
    current: Option<SyntheticFrame>,
    present_time: i64,
    active: Arc<AtomicUsize>,
    stats: Arc<SyntheticStats>,
}

impl SyntheticDuplication {
    fn next_event(&mut self) -> Option<SyntheticEvent> {
        if self.cursor >= self.output.script.len() {
            if !self.output.looping || self.output.script.is_empty() {
                return None;
            }
            self.cursor = 0;
        }
        let event = self.output.script[self.cursor].clone();
        self.cursor += 1;
        Some(event)
    }

    fn paint(&mut self, rect: Rect, color: PixelColor) {
        let (w, h) = (self.output.width as i32, self.output.height as i32);
        let x0 = rect.x.clamp(0, w);
        let x1 = (rect.x + rect.width).clamp(0, w);
        let y0 = rect.y.clamp(0, h);
        let y1 = (rect.y + rect.height).clamp(0, h);
        let px = color.to_bgra();
        for y in y0..y1 {
            for x in x0..x1 {
                let at = (y as usize * w as usize + x as usize) * BYTES_PER_PIXEL;
                self.desktop[at..at + BYTES_PER_PIXEL].copy_from_slice(&px);
            }
        }
    }

    fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.output.width as i32, self.output.height as i32)
    }

    fn current(&self, operation: &str) -> PlatformResult<&SyntheticFrame> {
        self.current
            .as_ref()
            .ok_or_else(|| PlatformError::other(format!("{operation} without an acquired frame")))
    }

    fn injected(&self, fault: SyntheticFault, operation: &str) -> PlatformResult<()> {
        match self.current.as_ref().and_then(|f| f.fault) {
            Some(f) if f == fault => Err(PlatformError::other(format!(
                "injected {operation} failure"
            ))),
            _ => Ok(()),
        }
    }
}

impl Drop for SyntheticDuplication {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Duplication for SyntheticDuplication {
    type Surface = SyntheticSurface;

    fn create_surface(&mut self, width: u32, height: u32) -> PlatformResult<SyntheticSurface> {
        let row_pitch = width as usize * BYTES_PER_PIXEL + self.output.row_padding;
        Ok(SyntheticSurface {
            bytes: vec![0; row_pitch * height as usize],
            width,
            height,
            row_pitch,
            mapped: false,
            fail_map: false,
        })
    }

    fn acquire_next_frame(&mut self, _timeout_ms: u32) -> PlatformResult<Option<RawFrameInfo>> {
        if self.current.is_some() {
            return Err(PlatformError::other("previous frame was not released"));
        }

        let mut frame = match self.next_event() {
            None | Some(SyntheticEvent::Timeout) => return Ok(None),
            Some(SyntheticEvent::Fail(kind)) => {
                return Err(PlatformError::new(kind, "injected failure"))
            }
            Some(SyntheticEvent::Frame(frame)) => frame,
        };

        if let Some(color) = frame.fill {
            let full = self.full_rect();
            self.paint(full, color);
            frame.dirty.push(full.into());
        }
        for (rect, color) in frame.paint.clone() {
            self.paint(rect, color);
            frame.dirty.push(rect.into());
        }

        self.present_time += 1;
        let (last_mouse_update_time, pointer_position, pointer_shape_buffer_size) =
            match &frame.pointer {
                Some(p) => (
                    p.timestamp,
                    PointerPosition {
                        position: p.position,
                        visible: p.visible,
                    },
                    p.shape.as_ref().map_or(0, Vec::len) as u32,
                ),
                None => (0, PointerPosition::default(), 0),
            };

        let info = RawFrameInfo {
            last_present_time: self.present_time,
            last_mouse_update_time,
            accumulated_frames: frame.accumulated_frames,
            rects_coalesced: false,
            protected_content_masked_out: false,
            pointer_position,
            total_metadata_buffer_size: (frame.moves.len() * size_of::<MoveRect>()
                + frame.dirty.len() * size_of::<RawRect>())
                as u32,
            pointer_shape_buffer_size,
        };

        self.current = Some(frame);
        self.stats.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(Some(info))
    }

    fn copy_frame_to(&mut self, surface: &mut SyntheticSurface) -> PlatformResult<()> {
        self.current("CopyResource")?;
        self.injected(SyntheticFault::Copy, "CopyResource")?;
        surface.fail_map = self.injected(SyntheticFault::Map, "Map").is_err();
        if surface.mapped {
            return Err(PlatformError::other("copy into a mapped surface"));
        }
        if (surface.width, surface.height) != (self.output.width, self.output.height) {
            return Err(PlatformError::other("surface size does not match the output"));
        }

        let row = self.output.width as usize * BYTES_PER_PIXEL;
        if row == 0 {
            return Ok(());
        }
        for (y, src) in self.desktop.chunks_exact(row).enumerate() {
            let at = y * surface.row_pitch;
            surface.bytes[at..at + row].copy_from_slice(src);
        }
        Ok(())
    }

    fn release_frame(&mut self) -> PlatformResult<()> {
        let frame = self
            .current
            .take()
            .ok_or_else(|| PlatformError::other("release without an acquired frame"))?;
        self.stats.released.fetch_add(1, Ordering::Relaxed);
        match frame.fault {
            Some(SyntheticFault::Release) => {
                Err(PlatformError::other("injected ReleaseFrame failure"))
            }
            _ => Ok(()),
        }
    }
}

impl FrameMetadataSource for SyntheticDuplication {
    fn frame_move_rects(&mut self, buffer: &mut [MoveRect]) -> PlatformResult<u32> {
        let moves = &self.current("GetFrameMoveRects")?.moves;
        let dst = buffer
            .get_mut(..moves.len())
            .ok_or_else(|| PlatformError::other("move rect buffer too small"))?;
        dst.copy_from_slice(moves);
        Ok((moves.len() * size_of::<MoveRect>()) as u32)
    }

    fn frame_dirty_rects(&mut self, buffer: &mut [RawRect]) -> PlatformResult<u32> {
        let frame = self.current("GetFrameDirtyRects")?;
        let dirty = &frame.dirty;
        let dst = buffer
            .get_mut(..dirty.len())
            .ok_or_else(|| PlatformError::other("dirty rect buffer too small"))?;
        dst.copy_from_slice(dirty);
        match frame.fault {
            Some(SyntheticFault::DirtyRectBytes(bytes)) => Ok(bytes),
            _ => Ok((dirty.len() * size_of::<RawRect>()) as u32),
        }
    }
}

impl PointerShapeSource for SyntheticDuplication {
    fn frame_pointer_shape(
        &mut self,
        buffer: &mut [u8],
    ) -> PlatformResult<(u32, PointerShapeInfo)> {
        self.injected(SyntheticFault::PointerShape, "GetFramePointerShape")?;
        let shape = self
            .current("GetFramePointerShape")?
            .pointer
            .as_ref()
            .and_then(|p| p.shape.as_deref())
            .ok_or_else(|| PlatformError::other("no pointer shape for this frame"))?;
        let dst = buffer
            .get_mut(..shape.len())
            .ok_or_else(|| PlatformError::other("pointer shape buffer too small"))?;
        dst.copy_from_slice(shape);

        // square BGRA shape
        let side = ((shape.len() / BYTES_PER_PIXEL) as f64).sqrt() as u32;
        let info = PointerShapeInfo {
            kind: PointerShapeKind::Color,
            width: side,
            height: side,
            pitch: side * BYTES_PER_PIXEL as u32,
            hot_spot: Point::default(),
        };
        Ok((shape.len() as u32, info))
    }
}

/// Heap-backed staging surface
#[derive(Debug)]
pub struct SyntheticSurface {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    row_pitch: usize,
    mapped: bool,
    /// Set by a copy whose frame carries [`SyntheticFault::Map`]
    fail_map: bool,
}

impl StagingSurface for SyntheticSurface {
    fn map(&mut self) -> PlatformResult<usize> {
        if std::mem::take(&mut self.fail_map) {
            return Err(PlatformError::other("injected Map failure"));
        }
        if self.mapped {
            return Err(PlatformError::other("surface is already mapped"));
        }
        self.mapped = true;
        Ok(self.row_pitch)
    }

    fn mapped(&self) -> Option<&[u8]> {
        self.mapped.then_some(self.bytes.as_slice())
    }

    fn unmap(&mut self) {
        self.mapped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_checks_indices_and_limit() {
        let platform =
            SyntheticPlatform::single(SyntheticOutput::new("A", 4, 4)).max_duplications(1);

        let err = platform.open_output(CaptureTarget::new(1, 0)).err().unwrap();
        assert_eq!(err.kind, PlatformErrorKind::AdapterNotFound);
        let err = platform.open_output(CaptureTarget::new(0, 3)).err().unwrap();
        assert_eq!(err.kind, PlatformErrorKind::OutputNotFound);

        let first = platform.open_output(CaptureTarget::new(0, 0)).unwrap();
        let err = platform.open_output(CaptureTarget::new(0, 0)).err().unwrap();
        assert_eq!(err.kind, PlatformErrorKind::NotCurrentlyAvailable);

        drop(first);
        assert_eq!(platform.active_duplications(), 0);
        assert!(platform.open_output(CaptureTarget::new(0, 0)).is_ok());
    }

    #[test]
    fn script_replays_and_loops() {
        let output = SyntheticOutput::new("A", 2, 2)
            .event(SyntheticEvent::Timeout)
            .frame(SyntheticFrame::filled(PixelColor::WHITE))
            .looping(true);
        let (_, mut dupl) = SyntheticPlatform::single(output)
            .open_output(CaptureTarget::default())
            .unwrap();

        assert_eq!(dupl.acquire_next_frame(0).unwrap(), None);
        let info = dupl.acquire_next_frame(0).unwrap().unwrap();
        assert_eq!(info.total_metadata_buffer_size, 16);
        assert!(dupl.acquire_next_frame(0).is_err());
        dupl.release_frame().unwrap();
        assert_eq!(dupl.acquire_next_frame(0).unwrap(), None);
        assert!(dupl.acquire_next_frame(0).unwrap().is_some());
    }

    #[test]
    fn copy_respects_row_padding() {
        let output = SyntheticOutput::new("A", 2, 2)
            .row_padding(8)
            .frame(SyntheticFrame::filled(PixelColor::new(1, 2, 3)));
        let (_, mut dupl) = SyntheticPlatform::single(output)
            .open_output(CaptureTarget::default())
            .unwrap();
        let mut surface = dupl.create_surface(2, 2).unwrap();

        dupl.acquire_next_frame(0).unwrap().unwrap();
        dupl.copy_frame_to(&mut surface).unwrap();
        assert_eq!(surface.map().unwrap(), 16);
        let bytes = surface.mapped().unwrap();
        assert_eq!(&bytes[16..20], &[3, 2, 1, 255]);
        assert_eq!(&bytes[8..16], &[0; 8]);
        surface.unmap();
        assert!(surface.mapped().is_none());
    }
}
