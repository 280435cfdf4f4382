use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("video subsystem error: {0}")]
    Video(#[from] VideoError),

    #[error("audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum VideoError {
    /// The display could not be read for this tick. Transient: the
    /// scheduler skips the tick and tries again on the next one.
    #[error("display capture unavailable: {reason}")]
    CaptureUnavailable { reason: String },

    /// A frame could not be persisted. Fatal: a gap in the sequence
    /// would desynchronize audio and video at mux time.
    #[error("frame storage write failed at {path}: {reason}")]
    StorageWrite { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("input device unavailable: {name:?}")]
    DeviceUnavailable { name: Option<String> },

    #[error("format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("audio file write failed at {path}: {reason}")]
    FileWrite { path: PathBuf, reason: String },

    #[error("CPAL error: {0}")]
    Stream(#[from] cpal::StreamError),

    #[error("build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("pause stream error: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[error("default stream config error: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("supported stream configs error: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("device enumeration error: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("encoder binary not usable: {program}: {reason}")]
    MissingEncoder { program: String, reason: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with {status}: {stderr}")]
    ProcessFailed { status: ExitStatus, stderr: String },
}

/// How a failure affects the session as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Absorbed locally; the session keeps recording.
    Transient,
    /// Propagates to the terminal `Failed` state.
    Fatal,
}

impl SessionError {
    pub fn severity(&self) -> Severity {
        match self {
            SessionError::Video(VideoError::CaptureUnavailable { .. }) => Severity::Transient,
            _ => Severity::Fatal,
        }
    }
}
