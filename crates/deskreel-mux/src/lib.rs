//! Combines the ordered frame sequence and the audio track into one
//! video file by invoking an external encoder (ffmpeg) as a blocking
//! child process.

use deskreel_foundation::EncodeError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Environment variable overriding the encoder binary location.
pub const ENCODER_ENV: &str = "DESKREEL_FFMPEG";

const DEFAULT_PROGRAM: &str = "ffmpeg";

/// One encoder invocation request. Immutable once built; executed
/// exactly once, no retries.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub frames_dir: PathBuf,
    /// printf-style frame name pattern, e.g. `screen_capture_%03d.png`.
    pub frame_pattern: String,
    pub frame_rate: u32,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
}

impl EncodeJob {
    /// Deterministic argument vector: frame glob at the session rate,
    /// audio track, constant-quality H.264, fixed-bitrate AAC,
    /// overwrite enabled.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        args.push("-framerate".into());
        args.push(self.frame_rate.to_string().into());
        args.push("-i".into());
        args.push(self.frames_dir.join(&self.frame_pattern).into());
        args.push("-i".into());
        args.push(self.audio_path.clone().into());
        args.push("-c:v".into());
        args.push("libx264".into());
        args.push("-preset".into());
        args.push("veryfast".into());
        args.push("-crf".into());
        args.push("23".into());
        args.push("-pix_fmt".into());
        args.push("yuv420p".into());
        args.push("-r".into());
        args.push(self.frame_rate.to_string().into());
        args.push("-c:a".into());
        args.push("aac".into());
        args.push("-b:a".into());
        args.push("192k".into());
        args.push("-y".into());
        args.push(self.output_path.clone().into());
        args
    }
}

/// Invokes the external encoder. Performs no validation of the
/// intermediate artifacts; a frame count that disagrees with the audio
/// duration is the encoder's concern.
pub struct Muxer {
    program: PathBuf,
}

impl Muxer {
    /// Resolves the encoder binary from [`ENCODER_ENV`] or `$PATH` and
    /// probes it with `-version`.
    pub fn locate() -> Result<Self, EncodeError> {
        let program = match std::env::var_os(ENCODER_ENV) {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_PROGRAM),
        };
        let muxer = Self::with_program(program);
        muxer.probe()?;
        Ok(muxer)
    }

    /// Uses `program` as the encoder without probing it. Callers that
    /// bundle their own binary resolve it themselves.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn probe(&self) -> Result<(), EncodeError> {
        let status = Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| EncodeError::MissingEncoder {
                program: self.program.display().to_string(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(EncodeError::MissingEncoder {
                program: self.program.display().to_string(),
                reason: format!("-version probe exited with {status}"),
            });
        }
        tracing::debug!(program = %self.program.display(), "encoder probe passed");
        Ok(())
    }

    /// Runs the encode synchronously; the calling thread blocks for the
    /// whole duration. No timeout is applied; an encoder hang is a
    /// user-visible stall, not something handled here.
    pub fn encode(&self, job: &EncodeJob) -> Result<(), EncodeError> {
        let args = job.to_args();
        tracing::info!(
            program = %self.program.display(),
            output = %job.output_path.display(),
            frame_rate = job.frame_rate,
            "starting encode"
        );
        tracing::debug!(?args, "encoder arguments");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| EncodeError::Spawn {
                program: self.program.display().to_string(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EncodeError::ProcessFailed {
                status: output.status,
                stderr: tail(&stderr, 2048).to_string(),
            });
        }

        tracing::info!(output = %job.output_path.display(), "encode finished");
        Ok(())
    }
}

/// Last `max` bytes of the encoder's stderr; the head is boilerplate.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
