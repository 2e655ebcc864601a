use crate::color::pixel::PixelColor;
use crate::error::{CaptureError, Result};

/// Bytes per BGRA8 pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Adapter and output indices identifying one display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CaptureTarget {
    pub adapter: u32,
    pub output: u32,
}

impl CaptureTarget {
    pub fn new(adapter: u32, output: u32) -> Self {
        Self { adapter, output }
    }
}

/// Output description reported by the platform at open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Platform rectangle record (edges)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Platform moved-rectangle record
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveRect {
    pub source: Point,
    pub destination: RawRect,
}

/// Rectangle as origin plus size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl From<RawRect> for Rect {
    fn from(r: RawRect) -> Self {
        Self::new(r.left, r.top, r.right - r.left, r.bottom - r.top)
    }
}

impl From<Rect> for RawRect {
    fn from(r: Rect) -> Self {
        Self {
            left: r.x,
            top: r.y,
            right: r.x + r.width,
            bottom: r.y + r.height,
        }
    }
}

/// A region the platform copied instead of redrawing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovedRegion {
    /// Top-left corner of the region before the move
    pub source: Point,
    pub destination: Rect,
}

impl From<MoveRect> for MovedRegion {
    fn from(m: MoveRect) -> Self {
        Self {
            source: m.source,
            destination: m.destination.into(),
        }
    }
}

/// Per-frame information gathered while acquiring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
    /// Frames coalesced by the platform since the last acquire
    pub accumulated_frames: u32,
    pub last_present_time: i64,
    pub moved_regions: Vec<MovedRegion>,
    pub updated_regions: Vec<Rect>,
    pub cursor_position: Point,
    pub cursor_visible: bool,
    pub protected_content_masked_out: bool,
    pub rects_coalesced: bool,
}

/// Bounds-checked view over a mapped BGRA8 surface
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    bytes: &'a [u8],
    width: u32,
    height: u32,
    row_stride: usize,
}

impl<'a> FrameView<'a> {
    /// Fails if `row_stride` is narrower than a row or `bytes` cannot hold the last row
    pub fn new(bytes: &'a [u8], width: u32, height: u32, row_stride: usize) -> Result<Self> {
        let row_bytes = width as usize * BYTES_PER_PIXEL;
        if height > 0 && row_stride < row_bytes {
            return Err(CaptureError::InvalidView(format!(
                "row stride {row_stride} is narrower than {width} pixels"
            )));
        }

        let required = match height {
            0 => 0,
            h => row_stride * (h as usize - 1) + row_bytes,
        };
        if bytes.len() < required {
            return Err(CaptureError::InvalidView(format!(
                "{} bytes cannot hold {width}x{height} with stride {row_stride}",
                bytes.len()
            )));
        }

        Ok(Self {
            bytes,
            width,
            height,
            row_stride,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    /// Pixel at (x, y), `None` outside the frame
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Option<PixelColor> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = y as usize * self.row_stride + x as usize * BYTES_PER_PIXEL;
        let px = self.bytes.get(at..at + BYTES_PER_PIXEL)?;
        Some(PixelColor::from_bgra([px[0], px[1], px[2], px[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_match_platform_layout() {
        assert_eq!(std::mem::size_of::<RawRect>(), 16);
        assert_eq!(std::mem::size_of::<MoveRect>(), 24);
    }

    #[test]
    fn raw_rect_to_rect() {
        let r: Rect = RawRect {
            left: 10,
            top: 20,
            right: 110,
            bottom: 70,
        }
        .into();
        assert_eq!(r, Rect::new(10, 20, 100, 50));
        assert_eq!(RawRect::from(r).right, 110);
    }

    #[test]
    fn view_rejects_short_buffers() {
        let bytes = [0u8; 31];
        assert!(FrameView::new(&bytes, 4, 2, 16).is_err());
        assert!(FrameView::new(&bytes, 4, 2, 8).is_err());
        // last row needs no padding
        let bytes = [0u8; 40];
        assert!(FrameView::new(&bytes, 4, 2, 24).is_ok());
    }

    #[test]
    fn pixel_access_is_bounds_checked() {
        let mut bytes = vec![0u8; 2 * 12];
        bytes[12 + 4..12 + 8].copy_from_slice(&[1, 2, 3, 255]);
        let view = FrameView::new(&bytes, 2, 2, 12).unwrap();

        assert_eq!(view.pixel(1, 1), Some(PixelColor::new(3, 2, 1)));
        assert_eq!(view.pixel(2, 0), None);
        assert_eq!(view.pixel(0, 2), None);
    }
}
