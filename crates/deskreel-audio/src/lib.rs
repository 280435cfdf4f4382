pub mod capture;
pub mod wav;

pub use capture::{MicCaptureThread, MicCommand, MicStats, StreamFormat};
pub use wav::WavSink;
