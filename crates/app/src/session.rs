use deskreel_foundation::SessionError;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_FRAME_RATE: u32 = 30;

pub const FRAMES_DIR_NAME: &str = "frames";
pub const AUDIO_FILE_NAME: &str = "audio.wav";
pub const MANIFEST_FILE_NAME: &str = "session.json";

/// Fixed parameters of one recording session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capture cadence in frames per second. Fixed at session creation.
    pub frame_rate: u32,
    /// Directory holding the intermediate artifacts: the frame
    /// sequence, the audio file and the manifest.
    pub work_dir: PathBuf,
    /// Input device name; the default input device when `None`.
    pub device: Option<String>,
}

impl SessionConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            work_dir: work_dir.into(),
            device: None,
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.frame_rate == 0 || self.frame_rate > 240 {
            return Err(SessionError::Fatal(format!(
                "frame rate out of range: {}",
                self.frame_rate
            )));
        }
        Ok(())
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.work_dir.join(FRAMES_DIR_NAME)
    }

    pub fn audio_path(&self) -> PathBuf {
        self.work_dir.join(AUDIO_FILE_NAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.work_dir.join(MANIFEST_FILE_NAME)
    }

    /// Fixed tick interval, `1000 / frame_rate` milliseconds.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(u64::from((1000 / self.frame_rate).max(1)))
    }
}

/// Live state shared between the control surface, the capture-tick
/// thread and the audio callback. This is the original design's
/// scattered `isRecording` / `isPaused` / `frameCount` globals
/// consolidated into one owned value.
#[derive(Debug, Default)]
pub struct SessionFlags {
    pub recording: AtomicBool,
    pub paused: AtomicBool,
    /// Frames persisted so far; the next frame takes this value as its
    /// sequence number. Written only by the capture-tick thread.
    pub frames: AtomicU64,
    /// First fatal fault observed by either stream.
    pub failure: Mutex<Option<SessionError>>,
}

impl SessionFlags {
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}
