//! Grid sampling with root-mean-square channel averaging

use std::num::NonZeroU32;

use crate::capture::frame::FrameView;
use crate::color::pixel::PixelColor;

/// Average color of one sampling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSample {
    pub color: PixelColor,
    pub samples: u64,
}

/// Running sum of squared channel values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RmsAccumulator {
    r: u64,
    g: u64,
    b: u64,
    count: u64,
}

impl RmsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, px: PixelColor) {
        self.r += u64::from(px.r) * u64::from(px.r);
        self.g += u64::from(px.g) * u64::from(px.g);
        self.b += u64::from(px.b) * u64::from(px.b);
        self.count += 1;
    }

    /// `round(sqrt(sum_sq / count))` per channel, `None` if nothing was added
    pub fn finish(&self) -> Option<ColorSample> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let rms = |sum: u64| ((sum as f64 / n).sqrt().round()).min(255.0) as u8;
        Some(ColorSample {
            color: PixelColor::new(rms(self.r), rms(self.g), rms(self.b)),
            samples: self.count,
        })
    }
}

impl Extend<PixelColor> for RmsAccumulator {
    fn extend<I: IntoIterator<Item = PixelColor>>(&mut self, iter: I) {
        for px in iter {
            self.add(px);
        }
    }
}

/// Samples every `stride`-th pixel in both axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSampler {
    stride: NonZeroU32,
}

impl ColorSampler {
    pub fn new(stride: NonZeroU32) -> Self {
        Self { stride }
    }

    pub fn stride(&self) -> NonZeroU32 {
        self.stride
    }

    /// Grid dimensions (columns, rows) for a frame of the given size
    pub fn grid_size(&self, width: u32, height: u32) -> (u32, u32) {
        let k = self.stride.get();
        (width.div_ceil(k), height.div_ceil(k))
    }

    /// RMS average over the sampling grid; `None` when no pixel falls on the grid
    pub fn sample(&self, view: &FrameView<'_>) -> Option<ColorSample> {
        let mut acc = RmsAccumulator::new();
        acc.extend(self.grid_iter(*view));
        acc.finish()
    }

    /// Write the grid pixels row-major into `out`, replacing its contents
    pub fn grid(&self, view: &FrameView<'_>, out: &mut Vec<PixelColor>) {
        out.clear();
        out.extend(self.grid_iter(*view));
    }

    fn grid_iter<'a>(&self, view: FrameView<'a>) -> impl Iterator<Item = PixelColor> + 'a {
        let k = self.stride.get() as usize;
        let (w, h) = (view.width(), view.height());
        (0..h).step_by(k).flat_map(move |y| {
            (0..w)
                .step_by(k)
                .filter_map(move |x| view.pixel(x, y))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: PixelColor) -> Vec<u8> {
        color.to_bgra().repeat((width * height) as usize)
    }

    fn stride(k: u32) -> NonZeroU32 {
        NonZeroU32::new(k).unwrap()
    }

    #[test]
    fn constant_input_is_exact() {
        for v in 0..=255u8 {
            let mut acc = RmsAccumulator::new();
            for _ in 0..7 {
                acc.add(PixelColor::new(v, v, v));
            }
            let out = acc.finish().unwrap();
            assert_eq!(out.color, PixelColor::new(v, v, v));
            assert_eq!(out.samples, 7);
        }
    }

    #[test]
    fn rms_is_not_the_mean() {
        let mut acc = RmsAccumulator::new();
        for _ in 0..50 {
            acc.add(PixelColor::new(0, 0, 0));
            acc.add(PixelColor::new(255, 255, 255));
        }
        let out = acc.finish().unwrap();
        // sqrt((0^2 + 255^2) / 2) = 180.3
        assert_eq!(out.color, PixelColor::new(180, 180, 180));
    }

    #[test]
    fn empty_accumulator_has_no_sample() {
        assert_eq!(RmsAccumulator::new().finish(), None);
    }

    #[test]
    fn zero_sized_view_has_no_sample() {
        let sampler = ColorSampler::new(stride(4));
        let view = FrameView::new(&[], 0, 0, 0).unwrap();
        assert_eq!(sampler.sample(&view), None);

        let bytes = solid(3, 1, PixelColor::WHITE);
        let view = FrameView::new(&bytes, 3, 0, 12).unwrap();
        assert_eq!(sampler.sample(&view), None);
    }

    #[test]
    fn stride_larger_than_frame_takes_origin() {
        let mut bytes = solid(4, 4, PixelColor::BLACK);
        bytes[..4].copy_from_slice(&PixelColor::new(9, 8, 7).to_bgra());
        let view = FrameView::new(&bytes, 4, 4, 16).unwrap();

        let out = ColorSampler::new(stride(100)).sample(&view).unwrap();
        assert_eq!(out.samples, 1);
        assert_eq!(out.color, PixelColor::new(9, 8, 7));
    }

    #[test]
    fn stride_skips_pixels() {
        // 4x4 frame, only even coordinates are red
        let mut bytes = Vec::new();
        for y in 0..4u32 {
            for x in 0..4u32 {
                let c = if x % 2 == 0 && y % 2 == 0 {
                    PixelColor::new(255, 0, 0)
                } else {
                    PixelColor::new(0, 0, 255)
                };
                bytes.extend_from_slice(&c.to_bgra());
            }
        }
        let view = FrameView::new(&bytes, 4, 4, 16).unwrap();

        let sampler = ColorSampler::new(stride(2));
        let out = sampler.sample(&view).unwrap();
        assert_eq!(out.samples, 4);
        assert_eq!(out.color, PixelColor::new(255, 0, 0));
        assert_eq!(sampler.grid_size(4, 4), (2, 2));

        let all = ColorSampler::new(stride(1)).sample(&view).unwrap();
        assert_eq!(all.samples, 16);
    }

    #[test]
    fn padded_rows_are_ignored() {
        // 2x2 frame with 8 bytes of garbage padding per row
        let mut bytes = Vec::new();
        for _ in 0..2 {
            bytes.extend_from_slice(&PixelColor::new(10, 20, 30).to_bgra());
            bytes.extend_from_slice(&PixelColor::new(10, 20, 30).to_bgra());
            bytes.extend_from_slice(&[0xff; 8]);
        }
        let view = FrameView::new(&bytes, 2, 2, 16).unwrap();
        let out = ColorSampler::new(stride(1)).sample(&view).unwrap();
        assert_eq!(out.color, PixelColor::new(10, 20, 30));
        assert_eq!(out.samples, 4);
    }

    #[test]
    fn grid_collects_row_major() {
        let mut bytes = Vec::new();
        for i in 0..9u8 {
            bytes.extend_from_slice(&PixelColor::new(i, 0, 0).to_bgra());
        }
        let view = FrameView::new(&bytes, 3, 3, 12).unwrap();
        let mut out = vec![PixelColor::WHITE; 32];
        ColorSampler::new(stride(2)).grid(&view, &mut out);
        let reds: Vec<u8> = out.iter().map(|c| c.r).collect();
        assert_eq!(reds, vec![0, 2, 6, 8]);
    }
}
