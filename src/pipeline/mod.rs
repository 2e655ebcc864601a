pub mod capture_loop;
pub mod double_buffer;
pub mod extract;

pub use capture_loop::{stop_channel, CaptureHandle, CaptureLoop, LoopStats, StopHandle, StopSignal};
pub use double_buffer::DoubleBuffer;
pub use extract::{ColorPipeline, ColorReport, FrameSnapshot};
