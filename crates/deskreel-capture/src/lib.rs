pub mod frame;
pub mod screen;
pub mod sink;

pub use frame::{FrameSource, FrameWriter, RawFrame};
pub use screen::ScreenSource;
pub use sink::{frame_file_name, frame_pattern, FrameSink};
