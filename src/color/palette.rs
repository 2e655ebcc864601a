//! Discretized HSV palette and nearest-color matching
//!
//! Matching is done in HSV with a normalized distance:
//! - hue: circular distance `min(|dh|, 360 - |dh|) / 180`
//! - saturation: `|ds| / 255`
//! - value: `|dv| / 255`
//!
//! combined as the Euclidean norm of the three terms.

use serde::{Deserialize, Serialize};

use crate::color::pixel::{HsvColor, PixelColor};
use crate::error::{CaptureError, Result};

/// Palette density parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteSpec {
    /// Number of evenly spaced hues across 360 degrees
    pub hue_steps: u16,
    /// Saturation levels per hue, excluding zero saturation
    pub saturation_levels: u8,
    /// Value levels per saturation, excluding zero value
    pub value_levels: u8,
    /// Prepend pure black and pure white
    pub include_black_white: bool,
}

impl Default for PaletteSpec {
    fn default() -> Self {
        Self {
            hue_steps: 36,
            saturation_levels: 3,
            value_levels: 3,
            include_black_white: true,
        }
    }
}

impl PaletteSpec {
    pub fn validate(&self) -> Result<()> {
        if self.hue_steps == 0 || self.saturation_levels == 0 || self.value_levels == 0 {
            return Err(CaptureError::Configuration(format!(
                "palette steps must be non-zero (hue {}, saturation {}, value {})",
                self.hue_steps, self.saturation_levels, self.value_levels
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        let anchors = if self.include_black_white { 2 } else { 0 };
        anchors
            + usize::from(self.hue_steps)
                * usize::from(self.saturation_levels)
                * usize::from(self.value_levels)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An immutable, ordered set of colors
///
/// Entry order is the tie-break priority for [`Palette::closest`].
#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<PixelColor>,
    hsv: Vec<HsvColor>,
}

impl Palette {
    /// Generate the discretized palette described by `spec`
    ///
    /// Order is black, white (if requested), then hue-major, saturation, value.
    pub fn generate(spec: &PaletteSpec) -> Result<Self> {
        spec.validate()?;

        let mut colors = Vec::with_capacity(spec.len());
        if spec.include_black_white {
            colors.push(PixelColor::BLACK);
            colors.push(PixelColor::WHITE);
        }

        for hi in 0..spec.hue_steps {
            let hue = f32::from(hi) * 360.0 / f32::from(spec.hue_steps);
            for si in 1..=spec.saturation_levels {
                let sat = level(si, spec.saturation_levels);
                for vi in 1..=spec.value_levels {
                    let val = level(vi, spec.value_levels);
                    colors.push(HsvColor::new(hue, sat, val).to_rgb());
                }
            }
        }

        Ok(Self::from_colors(colors))
    }

    pub fn from_colors(colors: Vec<PixelColor>) -> Self {
        let hsv = colors.iter().map(|c| c.to_hsv()).collect();
        Self { colors, hsv }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<PixelColor> {
        self.colors.get(index).copied()
    }

    pub fn colors(&self) -> &[PixelColor] {
        &self.colors
    }

    /// Index of the entry nearest to `sample`, first entry wins ties
    pub fn closest(&self, sample: PixelColor) -> Option<usize> {
        let target = sample.to_hsv();
        let mut best: Option<(usize, f64)> = None;

        for (i, entry) in self.hsv.iter().enumerate() {
            let d = hsv_distance(*entry, target);
            match best {
                Some((_, min)) if d >= min => {}
                _ => best = Some((i, d)),
            }
        }

        best.map(|(i, _)| i)
    }
}

/// A palette plus reusable scratch space for repeated matching
///
/// Owned by the caller; there is no shared palette state.
#[derive(Debug, Clone)]
pub struct PaletteContext {
    palette: Palette,
    distances: Vec<f64>,
}

impl PaletteContext {
    pub fn new(palette: Palette) -> Self {
        let distances = vec![0.0; palette.len()];
        Self { palette, distances }
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Distances computed by the last [`PaletteContext::closest`] call, in palette order
    pub fn distances(&self) -> &[f64] {
        &self.distances
    }

    pub fn closest(&mut self, sample: PixelColor) -> Option<usize> {
        let target = sample.to_hsv();
        for (slot, entry) in self.distances.iter_mut().zip(&self.palette.hsv) {
            *slot = hsv_distance(*entry, target);
        }

        let mut idx = None;
        let mut min = f64::INFINITY;
        for (i, &d) in self.distances.iter().enumerate() {
            if idx.is_none() || d < min {
                idx = Some(i);
                min = d;
            }
        }
        idx
    }

    /// Nearest palette color, or `sample` itself when the palette is empty
    pub fn quantize(&mut self, sample: PixelColor) -> (Option<usize>, PixelColor) {
        match self.closest(sample) {
            Some(i) => (Some(i), self.palette.colors[i]),
            None => (None, sample),
        }
    }
}

/// Perceptual distance between two RGB colors
pub fn distance(a: PixelColor, b: PixelColor) -> f64 {
    hsv_distance(a.to_hsv(), b.to_hsv())
}

pub fn hsv_distance(a: HsvColor, b: HsvColor) -> f64 {
    let dh = (f64::from(a.h) - f64::from(b.h)).abs();
    let hue = dh.min(360.0 - dh) / 180.0;
    let sat = f64::from(a.s.abs_diff(b.s)) / 255.0;
    let val = f64::from(a.v.abs_diff(b.v)) / 255.0;

    (hue * hue + sat * sat + val * val).sqrt()
}

fn level(step: u8, levels: u8) -> u8 {
    (255.0 * f32::from(step) / f32::from(levels)).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_palette_layout() {
        let spec = PaletteSpec::default();
        let palette = Palette::generate(&spec).unwrap();

        assert_eq!(palette.len(), 36 * 3 * 3 + 2);
        assert_eq!(palette.get(0), Some(PixelColor::BLACK));
        assert_eq!(palette.get(1), Some(PixelColor::WHITE));
        // hue 0, lowest saturation, lowest value
        let first = palette.get(2).unwrap().to_hsv();
        assert_eq!(first.v, 85);
        // last entry is the brightest, most saturated step of the last hue
        assert_eq!(palette.get(palette.len() - 1).unwrap().to_hsv().v, 255);
    }

    #[test]
    fn generation_is_deterministic() {
        let spec = PaletteSpec {
            hue_steps: 12,
            saturation_levels: 2,
            value_levels: 4,
            include_black_white: false,
        };
        let a = Palette::generate(&spec).unwrap();
        let b = Palette::generate(&spec).unwrap();
        assert_eq!(a.colors(), b.colors());
        assert_eq!(a.len(), spec.len());
    }

    #[test]
    fn zero_steps_rejected() {
        let spec = PaletteSpec {
            value_levels: 0,
            ..PaletteSpec::default()
        };
        assert!(matches!(
            Palette::generate(&spec),
            Err(CaptureError::Configuration(_))
        ));
    }

    #[test]
    fn distance_is_symmetric() {
        let samples = [
            PixelColor::new(0, 0, 0),
            PixelColor::new(255, 255, 255),
            PixelColor::new(255, 0, 0),
            PixelColor::new(255, 0, 10),
            PixelColor::new(10, 200, 30),
            PixelColor::new(90, 45, 230),
            PixelColor::new(128, 128, 127),
        ];
        for &a in &samples {
            for &b in &samples {
                assert_eq!(distance(a, b), distance(b, a), "{a:?} vs {b:?}");
            }
            assert_eq!(distance(a, a), 0.0);
        }
    }

    #[test]
    fn hue_distance_wraps_around() {
        let reference = HsvColor::new(0.0, 0, 0);
        let near_low = hsv_distance(HsvColor::new(1.0, 0, 0), reference);
        let near_high = hsv_distance(HsvColor::new(359.0, 0, 0), reference);

        assert!(near_low < 0.01);
        assert!(near_high < 0.01);
        assert!((near_low - near_high).abs() < 1e-6);

        let opposite = hsv_distance(HsvColor::new(180.0, 0, 0), reference);
        assert!((opposite - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tie_goes_to_first_entry() {
        // green and blue are both 120 degrees from red
        let palette = Palette::from_colors(vec![
            PixelColor::new(0, 255, 0),
            PixelColor::new(0, 0, 255),
        ]);
        let red = PixelColor::new(255, 0, 0);
        assert_eq!(palette.closest(red), Some(0));

        let mut ctx = PaletteContext::new(palette);
        assert_eq!(ctx.closest(red), Some(0));
        assert_eq!(ctx.distances()[0], ctx.distances()[1]);
    }

    #[test]
    fn identical_entries_tie_to_first() {
        let c = PixelColor::new(10, 10, 10);
        let palette = Palette::from_colors(vec![c, c, c]);
        assert_eq!(palette.closest(PixelColor::new(0, 0, 0)), Some(0));
    }

    #[test]
    fn closest_picks_nearest_hue() {
        let palette = Palette::generate(&PaletteSpec::default()).unwrap();
        let mut ctx = PaletteContext::new(palette);

        let (idx, color) = ctx.quantize(PixelColor::new(250, 5, 5));
        assert!(idx.is_some());
        let hsv = color.to_hsv();
        assert!(hsv.h < 10.0 || hsv.h > 350.0, "got hue {}", hsv.h);
        assert_eq!(hsv.v, 255);

        let (_, black) = ctx.quantize(PixelColor::new(2, 2, 2));
        assert_eq!(black, PixelColor::BLACK);
    }

    #[test]
    fn context_agrees_with_palette() {
        let palette = Palette::generate(&PaletteSpec::default()).unwrap();
        let mut ctx = PaletteContext::new(palette.clone());
        for c in [
            PixelColor::new(17, 99, 200),
            PixelColor::new(200, 180, 20),
            PixelColor::new(128, 128, 128),
        ] {
            assert_eq!(ctx.closest(c), palette.closest(c));
        }
    }

    #[test]
    fn empty_palette_has_no_match() {
        let mut ctx = PaletteContext::new(Palette::from_colors(Vec::new()));
        let sample = PixelColor::new(1, 2, 3);
        assert_eq!(ctx.closest(sample), None);
        assert_eq!(ctx.quantize(sample), (None, sample));
    }
}
