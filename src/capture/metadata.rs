//! Moved and dirty rectangle extraction

use std::mem::size_of;

use tracing::trace;

use crate::capture::frame::{MoveRect, MovedRegion, RawRect, Rect};
use crate::capture::platform::FrameMetadataSource;
use crate::error::{CaptureError, PlatformError, Result};

/// Regions reported for one frame; always present, possibly empty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameRegions {
    pub moved: Vec<MovedRegion>,
    pub updated: Vec<Rect>,
}

/// Queries frame metadata, reusing its record buffers across frames
#[derive(Debug, Default)]
pub struct MetadataExtractor {
    move_scratch: Vec<MoveRect>,
    dirty_scratch: Vec<RawRect>,
}

impl MetadataExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract<S>(&mut self, source: &mut S, total_metadata_size: u32) -> Result<FrameRegions>
    where
        S: FrameMetadataSource + ?Sized,
    {
        if total_metadata_size == 0 {
            return Ok(FrameRegions::default());
        }
        let total = total_metadata_size as usize;

        grow(&mut self.move_scratch, total.div_ceil(size_of::<MoveRect>()));
        let written = source
            .frame_move_rects(&mut self.move_scratch)
            .map_err(|e| CaptureError::from_platform("GetFrameMoveRects", e))?;
        let moves =
            record_count::<MoveRect>("GetFrameMoveRects", written, self.move_scratch.len())?;
        let moved = self.move_scratch[..moves]
            .iter()
            .map(|&m| MovedRegion::from(m))
            .collect();

        grow(&mut self.dirty_scratch, total.div_ceil(size_of::<RawRect>()));
        let written = source
            .frame_dirty_rects(&mut self.dirty_scratch)
            .map_err(|e| CaptureError::from_platform("GetFrameDirtyRects", e))?;
        let dirty =
            record_count::<RawRect>("GetFrameDirtyRects", written, self.dirty_scratch.len())?;
        let updated = self.dirty_scratch[..dirty]
            .iter()
            .map(|&r| Rect::from(r))
            .collect();

        trace!(moves, dirty, "frame metadata");
        Ok(FrameRegions { moved, updated })
    }
}

fn grow<T: Default + Clone>(buf: &mut Vec<T>, len: usize) {
    if buf.len() < len {
        buf.resize(len, T::default());
    }
}

/// Record count for `bytes` written; must divide exactly and fit the buffer
fn record_count<T>(operation: &'static str, bytes: u32, capacity: usize) -> Result<usize> {
    let bytes = bytes as usize;
    let size = size_of::<T>();
    if bytes % size != 0 {
        return Err(CaptureError::DuplicationFailure {
            operation,
            source: PlatformError::contract(format!(
                "{bytes} bytes is not a whole number of {size}-byte records"
            )),
        });
    }
    let count = bytes / size;
    if count > capacity {
        return Err(CaptureError::DuplicationFailure {
            operation,
            source: PlatformError::contract(format!(
                "{count} records reported for a buffer of {capacity}"
            )),
        });
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::Point;
    use crate::capture::platform::PlatformResult;
    use crate::error::PlatformErrorKind;

    #[derive(Default)]
    struct Fake {
        moves: Vec<MoveRect>,
        dirty: Vec<RawRect>,
        /// Added to the reported dirty byte count
        dirty_skew: i64,
        fail_moves: bool,
        calls: usize,
    }

    impl FrameMetadataSource for Fake {
        fn frame_move_rects(&mut self, buffer: &mut [MoveRect]) -> PlatformResult<u32> {
            self.calls += 1;
            if self.fail_moves {
                return Err(PlatformError::new(PlatformErrorKind::AccessLost, "lost"));
            }
            buffer[..self.moves.len()].copy_from_slice(&self.moves);
            Ok((self.moves.len() * size_of::<MoveRect>()) as u32)
        }

        fn frame_dirty_rects(&mut self, buffer: &mut [RawRect]) -> PlatformResult<u32> {
            self.calls += 1;
            buffer[..self.dirty.len()].copy_from_slice(&self.dirty);
            let bytes = (self.dirty.len() * size_of::<RawRect>()) as i64 + self.dirty_skew;
            Ok(bytes as u32)
        }
    }

    impl Fake {
        fn total(&self) -> u32 {
            (self.moves.len() * size_of::<MoveRect>() + self.dirty.len() * size_of::<RawRect>())
                as u32
        }
    }

    #[test]
    fn zero_size_yields_empty_regions() {
        let mut fake = Fake::default();
        let regions = MetadataExtractor::new().extract(&mut fake, 0).unwrap();
        assert!(regions.moved.is_empty());
        assert!(regions.updated.is_empty());
        assert_eq!(fake.calls, 0);
    }

    #[test]
    fn extracts_moves_and_dirty_rects() {
        let mut fake = Fake {
            moves: vec![MoveRect {
                source: Point::new(5, 6),
                destination: RawRect {
                    left: 100,
                    top: 100,
                    right: 150,
                    bottom: 120,
                },
            }],
            dirty: vec![
                RawRect {
                    left: 0,
                    top: 0,
                    right: 10,
                    bottom: 10,
                },
                RawRect {
                    left: 20,
                    top: 30,
                    right: 25,
                    bottom: 40,
                },
            ],
            ..Default::default()
        };
        let total = fake.total();
        let regions = MetadataExtractor::new().extract(&mut fake, total).unwrap();

        assert_eq!(regions.moved.len(), 1);
        assert_eq!(regions.moved[0].source, Point::new(5, 6));
        assert_eq!(regions.moved[0].destination, Rect::new(100, 100, 50, 20));
        assert_eq!(
            regions.updated,
            vec![Rect::new(0, 0, 10, 10), Rect::new(20, 30, 5, 10)]
        );
    }

    #[test]
    fn inexact_byte_count_is_fatal() {
        let mut fake = Fake {
            dirty: vec![RawRect::default()],
            dirty_skew: -3,
            ..Default::default()
        };
        let total = fake.total();
        let err = MetadataExtractor::new().extract(&mut fake, total).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::DuplicationFailure {
                operation: "GetFrameDirtyRects",
                ..
            }
        ));
    }

    #[test]
    fn query_failure_propagates() {
        let mut fake = Fake {
            fail_moves: true,
            dirty: vec![RawRect::default()],
            ..Default::default()
        };
        let total = fake.total();
        let err = MetadataExtractor::new().extract(&mut fake, total).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn scratch_is_reused() {
        let mut extractor = MetadataExtractor::new();
        let mut fake = Fake {
            dirty: vec![RawRect::default(); 4],
            ..Default::default()
        };
        let total = fake.total();
        extractor.extract(&mut fake, total).unwrap();
        let cap = extractor.dirty_scratch.len();

        fake.dirty.truncate(1);
        let total = fake.total();
        let regions = extractor.extract(&mut fake, total).unwrap();
        assert_eq!(regions.updated.len(), 1);
        assert_eq!(extractor.dirty_scratch.len(), cap);
    }
}
