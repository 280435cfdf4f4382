use deskreel_foundation::AudioError;
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BITS_PER_SAMPLE: u16 = 16;
pub const CHANNELS: u16 = 1;

/// Append-only mono 16-bit WAV file for one session.
///
/// The header's length fields are only written by [`WavSink::finalize`];
/// until then the file is structurally invalid and must not be handed
/// to the muxer.
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
    sample_rate: u32,
    samples_written: u64,
}

impl std::fmt::Debug for WavSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSink")
            .field("path", &self.path)
            .field("sample_rate", &self.sample_rate)
            .field("samples_written", &self.samples_written)
            .finish_non_exhaustive()
    }
}

impl WavSink {
    pub fn create(path: impl Into<PathBuf>, sample_rate: u32) -> Result<Self, AudioError> {
        let path = path.into();
        let spec = WavSpec {
            channels: CHANNELS,
            sample_rate,
            bits_per_sample: BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec).map_err(|e| AudioError::FileWrite {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            writer,
            path,
            sample_rate,
            samples_written: 0,
        })
    }

    pub fn append(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        for &sample in samples {
            self.writer
                .write_sample(sample)
                .map_err(|e| AudioError::FileWrite {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    /// Flushes and writes the header length fields. Returns the total
    /// number of samples written.
    pub fn finalize(self) -> Result<u64, AudioError> {
        let WavSink {
            writer,
            path,
            samples_written,
            ..
        } = self;
        writer.finalize().map_err(|e| AudioError::FileWrite {
            path,
            reason: e.to_string(),
        })?;
        Ok(samples_written)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples_written as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn samples_round_trip_through_the_container() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audio.wav");

        let mut sink = WavSink::create(&path, 44_100).unwrap();
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN, 1234, -1234];
        sink.append(&samples[..4]).unwrap();
        sink.append(&samples[4..]).unwrap();
        assert_eq!(sink.samples_written(), samples.len() as u64);
        let written = sink.finalize().unwrap();
        assert_eq!(written, samples.len() as u64);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let dir = tempdir().unwrap();
        let mut sink = WavSink::create(dir.path().join("audio.wav"), 8_000).unwrap();
        sink.append(&vec![0i16; 8_000]).unwrap();
        assert_eq!(sink.duration(), Duration::from_secs(1));
    }

    #[test]
    fn unwritable_path_is_a_file_write_error() {
        let err = WavSink::create("/nonexistent-dir/audio.wav", 44_100).unwrap_err();
        assert!(matches!(err, AudioError::FileWrite { .. }));
    }
}
