use crate::frame::{bgra_to_rgba, rgb_to_rgba, rgbx_to_rgba, FrameSource, RawFrame};
use deskreel_foundation::VideoError;
use scap::capturer::{Capturer, Options, Resolution};
use scap::frame::{Frame, FrameType};

/// Frame source backed by a scap capturer on the primary display.
///
/// The capturer streams at the session frame rate and `capture_frame`
/// pulls one frame per call, so the scheduler's cadence and the
/// capturer's stay in step. Must be created on the thread that will
/// call it; capturer handles are not assumed to travel across threads.
pub struct ScreenSource {
    capturer: Capturer,
    capturing: bool,
}

impl ScreenSource {
    /// Opens the primary display for capture at `fps`.
    pub fn open(fps: u32) -> Result<Self, VideoError> {
        if !scap::is_supported() {
            return Err(VideoError::CaptureUnavailable {
                reason: "screen capture not supported on this platform".into(),
            });
        }
        if !scap::has_permission() && !scap::request_permission() {
            return Err(VideoError::CaptureUnavailable {
                reason: "screen recording permission not granted".into(),
            });
        }

        let options = Options {
            fps,
            target: None, // primary display
            show_cursor: true,
            show_highlight: false,
            excluded_targets: None,
            output_type: FrameType::BGRAFrame,
            output_resolution: Resolution::Captured,
            ..Default::default()
        };

        let mut capturer = Capturer::build(options).map_err(|e| VideoError::CaptureUnavailable {
            reason: format!("failed to build capturer: {e:?}"),
        })?;
        capturer.start_capture();

        Ok(Self {
            capturer,
            capturing: true,
        })
    }
}

impl FrameSource for ScreenSource {
    fn capture_frame(&mut self) -> Result<RawFrame, VideoError> {
        let frame = self
            .capturer
            .get_next_frame()
            .map_err(|e| VideoError::CaptureUnavailable {
                reason: format!("no frame from capturer: {e:?}"),
            })?;

        let (width, height, data) = match frame {
            Frame::BGRA(f) => (f.width, f.height, bgra_to_rgba(f.data)),
            Frame::BGRx(f) => (f.width, f.height, rgbx_to_rgba(bgra_to_rgba(f.data))),
            Frame::BGR0(f) => (f.width, f.height, rgbx_to_rgba(bgra_to_rgba(f.data))),
            Frame::RGB(f) => (f.width, f.height, rgb_to_rgba(&f.data)),
            Frame::RGBx(f) => (f.width, f.height, rgbx_to_rgba(f.data)),
            _ => {
                return Err(VideoError::CaptureUnavailable {
                    reason: "unexpected frame type from capturer".into(),
                });
            }
        };

        let (width, height) = (width as u32, height as u32);
        // scap occasionally delivers empty or short frames right after
        // start; treat them as a skipped tick, not a session fault.
        if data.len() != RawFrame::expected_len(width, height) || data.is_empty() {
            return Err(VideoError::CaptureUnavailable {
                reason: format!(
                    "frame size mismatch: got {} bytes for {}x{}",
                    data.len(),
                    width,
                    height
                ),
            });
        }

        Ok(RawFrame {
            width,
            height,
            data,
        })
    }

    fn on_pause(&mut self) {
        if self.capturing {
            self.capturer.stop_capture();
            self.capturing = false;
        }
    }

    fn on_resume(&mut self) {
        if !self.capturing {
            self.capturer.start_capture();
            self.capturing = true;
        }
    }
}

impl Drop for ScreenSource {
    fn drop(&mut self) {
        if self.capturing {
            self.capturer.stop_capture();
        }
    }
}
