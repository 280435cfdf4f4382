use crate::frame::{FrameWriter, RawFrame};
use deskreel_foundation::VideoError;
use std::fs;
use std::path::{Path, PathBuf};

pub const FRAME_PREFIX: &str = "screen_capture_";
pub const FRAME_EXTENSION: &str = "png";

/// Zero-padding width of the sequence number. Keeps lexicographic and
/// numeric order identical below 1000 frames; beyond that the printf
/// pattern still enumerates files contiguously because both sides pad
/// to a minimum width.
const SEQ_WIDTH: usize = 3;

/// Filename for a given sequence number, e.g. `screen_capture_007.png`.
pub fn frame_file_name(seq: u64) -> String {
    format!("{FRAME_PREFIX}{seq:0width$}.{FRAME_EXTENSION}", width = SEQ_WIDTH)
}

/// printf-style pattern the external encoder uses to enumerate the
/// sequence, e.g. `screen_capture_%03d.png`. Must agree with
/// [`frame_file_name`]; the test below keeps them from drifting.
pub fn frame_pattern() -> String {
    format!("{FRAME_PREFIX}%0{SEQ_WIDTH}d.{FRAME_EXTENSION}")
}

/// Writes frames as lossless PNG into one directory per session.
pub struct FrameSink {
    dir: PathBuf,
}

impl FrameSink {
    /// Creates the frames directory, clearing any previous contents so
    /// stale frames from an earlier session cannot leak into the mux.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, VideoError> {
        let dir = dir.into();
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| VideoError::StorageWrite {
                path: dir.clone(),
                reason: format!("failed to clear frames directory: {e}"),
            })?;
        }
        fs::create_dir_all(&dir).map_err(|e| VideoError::StorageWrite {
            path: dir.clone(),
            reason: format!("failed to create frames directory: {e}"),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameWriter for FrameSink {
    fn save_frame(&mut self, frame: &RawFrame, seq: u64) -> Result<PathBuf, VideoError> {
        let path = self.dir.join(frame_file_name(seq));
        image::save_buffer(
            &path,
            &frame.data,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| VideoError::StorageWrite {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tracing::trace!(seq, path = %path.display(), "frame persisted");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn solid_frame(width: u32, height: u32, rgba: [u8; 4]) -> RawFrame {
        let mut data = Vec::with_capacity(RawFrame::expected_len(width, height));
        for _ in 0..(width * height) {
            data.extend_from_slice(&rgba);
        }
        RawFrame {
            width,
            height,
            data,
        }
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(frame_file_name(0), "screen_capture_000.png");
        assert_eq!(frame_file_name(7), "screen_capture_007.png");
        assert_eq!(frame_file_name(42), "screen_capture_042.png");
        assert_eq!(frame_file_name(1234), "screen_capture_1234.png");
    }

    #[test]
    fn lexicographic_and_numeric_order_coincide() {
        let names: Vec<String> = (0..200).map(frame_file_name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn pattern_agrees_with_file_names() {
        // Expand the printf pattern by hand for a few sequence numbers
        // and check it lands on the exact filenames the sink writes.
        let pattern = frame_pattern();
        for seq in [0u64, 9, 99, 100, 999] {
            let expanded = pattern.replace("%03d", &format!("{seq:03}"));
            assert_eq!(expanded, frame_file_name(seq));
        }
    }

    #[test]
    fn saved_frame_reads_back() {
        let dir = tempdir().unwrap();
        let mut sink = FrameSink::create(dir.path().join("frames")).unwrap();
        let frame = solid_frame(4, 2, [10, 20, 30, 255]);

        let path = sink.save_frame(&frame, 0).unwrap();
        assert_eq!(path.file_name().unwrap(), "screen_capture_000.png");

        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (4, 2));
        assert_eq!(img.get_pixel(3, 1).0, [10, 20, 30, 255]);
    }

    #[test]
    fn create_clears_previous_session() {
        let dir = tempdir().unwrap();
        let frames_dir = dir.path().join("frames");
        {
            let mut sink = FrameSink::create(&frames_dir).unwrap();
            sink.save_frame(&solid_frame(2, 2, [0, 0, 0, 255]), 0).unwrap();
            sink.save_frame(&solid_frame(2, 2, [0, 0, 0, 255]), 1).unwrap();
        }
        let sink = FrameSink::create(&frames_dir).unwrap();
        assert_eq!(fs::read_dir(sink.dir()).unwrap().count(), 0);
    }

    #[test]
    fn bad_buffer_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let mut sink = FrameSink::create(dir.path().join("frames")).unwrap();
        // Buffer shorter than width * height * 4.
        let frame = RawFrame {
            width: 8,
            height: 8,
            data: vec![0u8; 16],
        };
        let err = sink.save_frame(&frame, 0).unwrap_err();
        assert!(matches!(err, VideoError::StorageWrite { .. }));
    }
}
