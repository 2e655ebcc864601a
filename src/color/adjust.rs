//! Per-channel contrast adjustment
//!
//! `factor = 259 * (amount + 255) / (255 * (259 - amount))`
//! `output = trunc(factor * (input - 128) + 128)`
//!
//! `amount` is clamped to `[-255, 255]` before the factor is computed, which keeps the
//! factor finite (about 129.5 at the upper bound). The truncated output is then clamped
//! to `0..=255`.

use crate::color::pixel::PixelColor;

pub const MIN_CONTRAST: f32 = -255.0;
pub const MAX_CONTRAST: f32 = 255.0;

/// Contrast factor for a (clamped) amount
#[inline]
pub fn contrast_factor(amount: f32) -> f32 {
    let amount = clamp_amount(amount);
    (259.0 * (amount + 255.0)) / (255.0 * (259.0 - amount))
}

#[inline]
pub fn contrast_channel(value: u8, amount: f32) -> u8 {
    apply_factor(value, contrast_factor(amount))
}

#[inline]
fn apply_factor(value: u8, factor: f32) -> u8 {
    let out = (factor * (f32::from(value) - 128.0) + 128.0).trunc();
    out.clamp(0.0, 255.0) as u8
}

fn clamp_amount(amount: f32) -> f32 {
    if amount.is_nan() {
        0.0
    } else {
        amount.clamp(MIN_CONTRAST, MAX_CONTRAST)
    }
}

/// Contrast transform with a precomputed factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastAdjuster {
    amount: f32,
    factor: f32,
}

impl ContrastAdjuster {
    pub fn new(amount: f32) -> Self {
        let amount = clamp_amount(amount);
        Self {
            amount,
            factor: contrast_factor(amount),
        }
    }

    /// The effective (clamped) amount
    pub fn amount(&self) -> f32 {
        self.amount
    }

    pub fn is_identity(&self) -> bool {
        self.amount == 0.0
    }

    pub fn apply(&self, color: PixelColor) -> PixelColor {
        PixelColor::new(
            apply_factor(color.r, self.factor),
            apply_factor(color.g, self.factor),
            apply_factor(color.b, self.factor),
        )
    }
}
