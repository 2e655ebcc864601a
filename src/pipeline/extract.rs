//! Sampler -> contrast -> palette chain applied to each locked frame

use crate::capture::frame::FrameView;
use crate::color::adjust::ContrastAdjuster;
use crate::color::palette::{Palette, PaletteContext};
use crate::color::pixel::PixelColor;
use crate::color::sampler::ColorSampler;
use crate::error::Result;
use crate::{ColorConfig, SamplingConfig};

/// Result of analysing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorReport {
    /// RMS average before adjustment
    pub average: PixelColor,
    /// After contrast
    pub adjusted: PixelColor,
    pub palette_index: Option<usize>,
    /// Color handed to the sinks
    pub output: PixelColor,
    pub samples: u64,
}

#[derive(Debug, Clone)]
pub struct ColorPipeline {
    sampler: ColorSampler,
    contrast: Option<ContrastAdjuster>,
    palette: Option<PaletteContext>,
}

impl ColorPipeline {
    pub fn new(
        sampler: ColorSampler,
        contrast: Option<ContrastAdjuster>,
        palette: Option<PaletteContext>,
    ) -> Self {
        Self {
            sampler,
            contrast: contrast.filter(|c| !c.is_identity()),
            palette,
        }
    }

    pub fn from_config(sampling: &SamplingConfig, color: &ColorConfig) -> Result<Self> {
        let palette = if color.quantize {
            Some(PaletteContext::new(Palette::generate(&color.palette)?))
        } else {
            None
        };
        Ok(Self::new(
            ColorSampler::new(sampling.stride),
            Some(ContrastAdjuster::new(color.contrast)),
            palette,
        ))
    }

    pub fn sampler(&self) -> &ColorSampler {
        &self.sampler
    }

    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref().map(PaletteContext::palette)
    }

    /// `None` when the frame yields no samples
    pub fn process(&mut self, view: &FrameView<'_>) -> Option<ColorReport> {
        let sample = self.sampler.sample(view)?;
        Some(self.transform(sample.color, sample.samples))
    }

    fn transform(&mut self, average: PixelColor, samples: u64) -> ColorReport {
        let adjusted = match &self.contrast {
            Some(c) => c.apply(average),
            None => average,
        };
        let (palette_index, output) = match &mut self.palette {
            Some(ctx) => ctx.quantize(adjusted),
            None => (None, adjusted),
        };
        ColorReport {
            average,
            adjusted,
            palette_index,
            output,
            samples,
        }
    }
}

/// Grid of sampled pixels from one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub sequence: u64,
    pub columns: u32,
    pub rows: u32,
    pub pixels: Vec<PixelColor>,
}

impl FrameSnapshot {
    /// Refill in place, reusing the pixel allocation
    pub fn capture(&mut self, sequence: u64, sampler: &ColorSampler, view: &FrameView<'_>) {
        let (columns, rows) = sampler.grid_size(view.width(), view.height());
        sampler.grid(view, &mut self.pixels);
        self.sequence = sequence;
        self.columns = columns;
        self.rows = rows;
    }

    pub fn pixel(&self, column: u32, row: u32) -> Option<PixelColor> {
        if column >= self.columns || row >= self.rows {
            return None;
        }
        self.pixels
            .get(row as usize * self.columns as usize + column as usize)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;
    use crate::color::palette::PaletteSpec;

    fn view_bytes(colors: &[PixelColor]) -> Vec<u8> {
        colors.iter().flat_map(|c| c.to_bgra()).collect()
    }

    #[test]
    fn plain_pipeline_reports_average() {
        let bytes = view_bytes(&[PixelColor::new(0, 0, 0), PixelColor::new(255, 255, 255)]);
        let view = FrameView::new(&bytes, 2, 1, 8).unwrap();
        let mut pipeline = ColorPipeline::new(ColorSampler::new(NonZeroU32::MIN), None, None);

        let report = pipeline.process(&view).unwrap();
        assert_eq!(report.average, PixelColor::new(180, 180, 180));
        assert_eq!(report.output, report.average);
        assert_eq!(report.palette_index, None);
        assert_eq!(report.samples, 2);
    }

    #[test]
    fn identity_contrast_is_skipped() {
        let pipeline = ColorPipeline::new(
            ColorSampler::new(NonZeroU32::MIN),
            Some(ContrastAdjuster::new(0.0)),
            None,
        );
        assert!(pipeline.contrast.is_none());
    }

    #[test]
    fn contrast_then_palette() {
        let bytes = view_bytes(&[PixelColor::new(200, 60, 60); 4]);
        let view = FrameView::new(&bytes, 2, 2, 8).unwrap();
        let sampling = SamplingConfig {
            stride: NonZeroU32::MIN,
        };
        let color = ColorConfig {
            contrast: 64.0,
            quantize: true,
            palette: PaletteSpec::default(),
        };
        let mut pipeline = ColorPipeline::from_config(&sampling, &color).unwrap();

        let report = pipeline.process(&view).unwrap();
        assert_eq!(report.average, PixelColor::new(200, 60, 60));
        assert!(report.adjusted.r > 200 && report.adjusted.g < 60);
        let idx = report.palette_index.unwrap();
        assert_eq!(pipeline.palette().unwrap().get(idx), Some(report.output));
    }

    #[test]
    fn empty_view_has_no_report() {
        let view = FrameView::new(&[], 0, 0, 0).unwrap();
        let mut pipeline = ColorPipeline::new(ColorSampler::new(NonZeroU32::MIN), None, None);
        assert_eq!(pipeline.process(&view), None);
    }

    #[test]
    fn snapshot_reuses_allocation() {
        let bytes = view_bytes(&[PixelColor::new(1, 1, 1); 9]);
        let view = FrameView::new(&bytes, 3, 3, 12).unwrap();
        let sampler = ColorSampler::new(NonZeroU32::new(2).unwrap());

        let mut snap = FrameSnapshot {
            pixels: Vec::with_capacity(100),
            ..Default::default()
        };
        snap.capture(7, &sampler, &view);
        assert_eq!((snap.columns, snap.rows, snap.sequence), (2, 2, 7));
        assert_eq!(snap.pixels.len(), 4);
        assert!(snap.pixels.capacity() >= 100);
        assert_eq!(snap.pixel(1, 1), Some(PixelColor::new(1, 1, 1)));
        assert_eq!(snap.pixel(2, 0), None);
    }
}
