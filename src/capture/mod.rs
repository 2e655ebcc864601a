pub mod cursor;
pub mod frame;
pub mod metadata;
pub mod platform;
pub mod session;
pub mod synthetic;

#[cfg(windows)]
pub mod dxgi;

pub use frame::{CaptureTarget, FrameView, MovedRegion, Rect};
pub use platform::{Duplication, Platform};
pub use session::{Acquired, CaptureSession, Frame};
pub use synthetic::{SyntheticOutput, SyntheticPlatform};

#[cfg(windows)]
pub use dxgi::DxgiPlatform;
