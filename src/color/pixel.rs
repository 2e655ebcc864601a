//! Color value types and explicit RGB <-> HSV conversion

/// An 8-bit-per-channel RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// HSV color used for palette matching
///
/// - `h`: hue in degrees, always in `[0, 360)`
/// - `s`: saturation scaled to `0..=255`
/// - `v`: value (brightest channel) in `0..=255`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HsvColor {
    pub h: f32,
    pub s: u8,
    pub v: u8,
}

impl PixelColor {
    pub const BLACK: PixelColor = PixelColor::new(0, 0, 0);
    pub const WHITE: PixelColor = PixelColor::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build from a BGRA8 pixel, ignoring alpha
    #[inline]
    pub fn from_bgra(px: [u8; 4]) -> Self {
        Self::new(px[2], px[1], px[0])
    }

    pub fn to_bgra(self) -> [u8; 4] {
        [self.b, self.g, self.r, 255]
    }

    pub fn to_hsv(self) -> HsvColor {
        let r = f32::from(self.r);
        let g = f32::from(self.g);
        let b = f32::from(self.b);

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let s = if max == 0.0 {
            0
        } else {
            (255.0 * delta / max).round() as u8
        };

        let h = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * ((g - b) / delta)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };

        HsvColor {
            h: normalize_hue(h),
            s,
            v: self.r.max(self.g).max(self.b),
        }
    }
}

impl HsvColor {
    /// Hue is wrapped into `[0, 360)`
    pub fn new(h: f32, s: u8, v: u8) -> Self {
        Self {
            h: normalize_hue(h),
            s,
            v,
        }
    }

    pub fn to_rgb(self) -> PixelColor {
        let s = f32::from(self.s) / 255.0;
        let v = f32::from(self.v) / 255.0;

        let c = v * s;
        let h6 = self.h / 60.0;
        let sector = (h6.floor() as i32).rem_euclid(6);
        let x = c * (1.0 - ((h6 % 2.0) - 1.0).abs());
        let m = v - c;

        let (r1, g1, b1) = match sector {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        PixelColor::new(to_channel(r1 + m), to_channel(g1 + m), to_channel(b1 + m))
    }
}

impl From<PixelColor> for HsvColor {
    fn from(value: PixelColor) -> Self {
        value.to_hsv()
    }
}

impl From<HsvColor> for PixelColor {
    fn from(value: HsvColor) -> Self {
        value.to_rgb()
    }
}

#[inline]
fn to_channel(unit: f32) -> u8 {
    (unit * 255.0).round().clamp(0.0, 255.0) as u8
}

fn normalize_hue(h: f32) -> f32 {
    let h = h.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if h >= 360.0 {
        0.0
    } else {
        h
    }
}
