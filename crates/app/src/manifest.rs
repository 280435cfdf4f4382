use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// JSON sidecar describing one session's artifacts. Written at stop
/// and rewritten after a successful encode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    /// RFC 3339 timestamps.
    pub started_at: String,
    pub ended_at: String,
    pub frame_rate: u32,
    pub frames_captured: u64,
    /// Negotiated capture rate; `None` if audio never started.
    pub audio_sample_rate: Option<u32>,
    pub audio_samples: u64,
    pub frames_dir: PathBuf,
    pub audio_path: PathBuf,
    /// Set only once the encode succeeded.
    pub output_path: Option<PathBuf>,
    pub app_version: String,
}

impl SessionManifest {
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
