use deskreel_foundation::VideoError;
use std::path::PathBuf;

/// One captured still of the display, RGBA8, row-major.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }
}

/// Produces one frame per call. The production implementation reads the
/// primary display; tests substitute synthetic sources.
pub trait FrameSource {
    fn capture_frame(&mut self) -> Result<RawFrame, VideoError>;

    /// Sources backed by a streaming capturer stop their stream here so
    /// frames do not queue up while the session is paused.
    fn on_pause(&mut self) {}

    fn on_resume(&mut self) {}
}

/// Persists a frame under its sequence number and returns the path
/// written. Failures are fatal to the session.
pub trait FrameWriter: Send {
    fn save_frame(&mut self, frame: &RawFrame, seq: u64) -> Result<PathBuf, VideoError>;
}

pub(crate) fn bgra_to_rgba(mut data: Vec<u8>) -> Vec<u8> {
    for px in data.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    data
}

pub(crate) fn rgb_to_rgba(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 3 * 4);
    for px in data.chunks_exact(3) {
        out.extend_from_slice(px);
        out.push(0xff);
    }
    out
}

/// RGBx carries a padding byte where alpha would be; force it opaque.
pub(crate) fn rgbx_to_rgba(mut data: Vec<u8>) -> Vec<u8> {
    for px in data.chunks_exact_mut(4) {
        px[3] = 0xff;
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_swaps_red_and_blue() {
        let bgra = vec![1u8, 2, 3, 4, 10, 20, 30, 40];
        assert_eq!(bgra_to_rgba(bgra), vec![3, 2, 1, 4, 30, 20, 10, 40]);
    }

    #[test]
    fn rgb_gains_opaque_alpha() {
        let rgb = vec![7u8, 8, 9, 70, 80, 90];
        assert_eq!(rgb_to_rgba(&rgb), vec![7, 8, 9, 255, 70, 80, 90, 255]);
    }

    #[test]
    fn rgbx_padding_becomes_opaque() {
        let rgbx = vec![7u8, 8, 9, 0, 70, 80, 90, 3];
        assert_eq!(rgbx_to_rgba(rgbx), vec![7, 8, 9, 255, 70, 80, 90, 255]);
    }

    #[test]
    fn expected_len_counts_rgba_bytes() {
        assert_eq!(RawFrame::expected_len(1920, 1080), 1920 * 1080 * 4);
    }
}
