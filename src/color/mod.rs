pub mod adjust;
pub mod palette;
pub mod pixel;
pub mod sampler;

pub use adjust::ContrastAdjuster;
pub use palette::{Palette, PaletteContext, PaletteSpec};
pub use pixel::{HsvColor, PixelColor};
pub use sampler::{ColorSample, ColorSampler};
