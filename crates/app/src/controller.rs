use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use deskreel_audio::{MicCaptureThread, WavSink};
use deskreel_capture::{frame_pattern, FrameSink, FrameSource, ScreenSource};
use deskreel_foundation::{real_clock, SessionError, SessionState, SharedClock, StateMachine};
use deskreel_mux::{EncodeJob, Muxer};

use crate::manifest::SessionManifest;
use crate::scheduler::{CaptureScheduler, SourceFactory};
use crate::session::{SessionConfig, SessionFlags};

/// Top-level orchestrator for one recording session. Owns every
/// component lifetime from `start` to the end of `finalize`.
///
/// Control actions are serialized by `&mut self`; the capture-tick
/// thread and the audio callback only share the session flags.
pub struct SessionController {
    config: SessionConfig,
    state: Arc<StateMachine>,
    flags: Arc<SessionFlags>,
    clock: SharedClock,
    scheduler: Option<CaptureScheduler>,
    mic: Option<MicCaptureThread>,
    wav: Arc<Mutex<Option<WavSink>>>,
    audio_rate: Option<u32>,
    audio_samples: u64,
    progress_tx: Sender<u64>,
    progress_rx: Receiver<u64>,
    started_at: Option<DateTime<Local>>,
}

impl SessionController {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let (progress_tx, progress_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            config,
            state: Arc::new(StateMachine::new()),
            flags: Arc::new(SessionFlags::default()),
            clock: real_clock(),
            scheduler: None,
            mic: None,
            wav: Arc::new(Mutex::new(None)),
            audio_rate: None,
            audio_samples: 0,
            progress_tx,
            progress_rx,
            started_at: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn frames_captured(&self) -> u64 {
        self.flags.frames_captured()
    }

    /// Tick counts, one per executed capture tick.
    pub fn progress(&self) -> Receiver<u64> {
        self.progress_rx.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state.current() != SessionState::Idle {
            return Err(SessionError::Fatal(format!(
                "start is only valid from Idle, session is {:?}",
                self.state.current()
            )));
        }
        match self.start_streams() {
            Ok(()) => Ok(()),
            Err(e) => {
                // The session object is spent; callers retry with a
                // fresh controller.
                self.flags.recording.store(false, Ordering::SeqCst);
                self.flags.paused.store(false, Ordering::SeqCst);
                self.teardown_streams();
                let _ = self.state.transition(SessionState::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn start_streams(&mut self) -> Result<(), SessionError> {
        std::fs::create_dir_all(&self.config.work_dir).map_err(|e| {
            SessionError::Fatal(format!(
                "failed to create work dir {}: {e}",
                self.config.work_dir.display()
            ))
        })?;
        let frame_sink = FrameSink::create(self.config.frames_dir())?;

        // Mic first: device negotiation decides the audio sink's rate.
        // The stream is quiescent until the Resume below, so no sample
        // arrives before the sink is seated.
        let wav_slot = Arc::clone(&self.wav);
        let (mic, format) =
            MicCaptureThread::spawn(self.config.device.clone(), move |samples: &[i16]| {
                if let Some(wav) = wav_slot.lock().as_mut() {
                    if let Err(e) = wav.append(samples) {
                        tracing::error!("audio append failed: {e}");
                    }
                }
            })?;
        let wav = WavSink::create(self.config.audio_path(), format.sample_rate)?;
        self.audio_rate = Some(format.sample_rate);
        *self.wav.lock() = Some(wav);
        let mic_ctrl = mic.commander();
        self.mic = Some(mic);

        self.flags.frames.store(0, Ordering::SeqCst);
        self.flags.paused.store(false, Ordering::SeqCst);
        self.flags.recording.store(true, Ordering::SeqCst);
        self.state.transition(SessionState::Recording)?;
        self.started_at = Some(Local::now());

        // Audio flows from here; the scheduler spawns immediately
        // after, so start skew is one command hop.
        if let Some(mic) = &self.mic {
            mic.resume();
        }

        let frame_rate = self.config.frame_rate;
        let factory: SourceFactory = Box::new(move || {
            ScreenSource::open(frame_rate).map(|s| Box::new(s) as Box<dyn FrameSource>)
        });
        let scheduler = CaptureScheduler::spawn(
            self.config.tick_interval(),
            factory,
            Box::new(frame_sink),
            Arc::clone(&self.flags),
            Arc::clone(&self.state),
            mic_ctrl,
            self.progress_tx.clone(),
            Arc::clone(&self.clock),
        )?;
        self.scheduler = Some(scheduler);

        tracing::info!(
            frame_rate,
            work_dir = %self.config.work_dir.display(),
            "recording started"
        );
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        if self.state.current() != SessionState::Recording {
            return Err(SessionError::Fatal(format!(
                "pause is only valid while Recording, session is {:?}",
                self.state.current()
            )));
        }
        self.state.transition(SessionState::Paused)?;
        self.flags.paused.store(true, Ordering::SeqCst);
        if let Some(mic) = &self.mic {
            mic.pause();
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.state.current() != SessionState::Paused {
            return Err(SessionError::Fatal(format!(
                "resume is only valid while Paused, session is {:?}",
                self.state.current()
            )));
        }
        self.state.transition(SessionState::Recording)?;
        // Frame numbering continues from its last value.
        if let Some(mic) = &self.mic {
            mic.resume();
        }
        self.flags.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// The original single pause/resume control.
    pub fn toggle_pause(&mut self) -> Result<(), SessionError> {
        match self.state.current() {
            SessionState::Recording => self.pause(),
            SessionState::Paused => self.resume(),
            other => Err(SessionError::Fatal(format!(
                "pause toggle is only valid while active, session is {other:?}"
            ))),
        }
    }

    /// Halts both capture streams and closes the audio sink.
    ///
    /// Idempotent: stopping a session that is not active is a no-op
    /// `Ok(())`, unless the session failed mid-recording, in which
    /// case the recorded failure is surfaced exactly once.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let was_active = self.state.current().is_active();
        self.flags.recording.store(false, Ordering::SeqCst);
        self.flags.paused.store(false, Ordering::SeqCst);
        self.teardown_streams();

        if let Some(failure) = self.flags.failure.lock().take() {
            // The scheduler already transitioned to Failed.
            self.write_manifest(None);
            return Err(failure);
        }
        if !was_active {
            return Ok(());
        }
        self.state.transition(SessionState::Stopped)?;
        self.write_manifest(None);
        tracing::info!(frames = self.frames_captured(), "recording stopped");
        Ok(())
    }

    /// Joins the capture thread, stops and joins the mic thread, and
    /// only then finalizes the audio sink: the device is confirmed
    /// stopped, so no write can land after close.
    fn teardown_streams(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.join();
        }
        if let Some(mic) = self.mic.take() {
            mic.stop();
        }
        if let Some(wav) = self.wav.lock().take() {
            self.audio_samples = wav.samples_written();
            if let Err(e) = wav.finalize() {
                tracing::error!("failed to finalize audio file: {e}");
                let mut failure = self.flags.failure.lock();
                if failure.is_none() {
                    *failure = Some(e.into());
                }
            }
        }
    }

    /// Invokes the external encoder on the session's artifacts. Blocks
    /// the calling thread for the whole encode; callers needing
    /// responsiveness issue this off their control path.
    pub fn finalize(&mut self, output: impl Into<PathBuf>) -> Result<PathBuf, SessionError> {
        let muxer = match Muxer::locate() {
            Ok(m) => m,
            Err(e) => {
                if self.state.current() == SessionState::Stopped {
                    let _ = self.state.transition(SessionState::Finalizing);
                    let _ = self.state.transition(SessionState::Failed {
                        reason: e.to_string(),
                    });
                }
                return Err(e.into());
            }
        };
        self.finalize_with(&muxer, output)
    }

    /// Like [`finalize`](Self::finalize) but with a caller-resolved
    /// encoder binary.
    pub fn finalize_with(
        &mut self,
        muxer: &Muxer,
        output: impl Into<PathBuf>,
    ) -> Result<PathBuf, SessionError> {
        let output = output.into();
        if self.state.current() != SessionState::Stopped {
            return Err(SessionError::Fatal(format!(
                "finalize is only valid from Stopped, session is {:?}",
                self.state.current()
            )));
        }
        self.state.transition(SessionState::Finalizing)?;

        let job = EncodeJob {
            frames_dir: self.config.frames_dir(),
            frame_pattern: frame_pattern(),
            frame_rate: self.config.frame_rate,
            audio_path: self.config.audio_path(),
            output_path: output.clone(),
        };
        match muxer.encode(&job) {
            Ok(()) => {
                self.state.transition(SessionState::Done)?;
                self.write_manifest(Some(&output));
                Ok(output)
            }
            Err(e) => {
                // Intermediate artifacts stay on disk for inspection.
                let _ = self.state.transition(SessionState::Failed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    fn write_manifest(&self, output: Option<&Path>) {
        let Some(started_at) = self.started_at else {
            return;
        };
        let manifest = SessionManifest {
            started_at: started_at.to_rfc3339(),
            ended_at: Local::now().to_rfc3339(),
            frame_rate: self.config.frame_rate,
            frames_captured: self.flags.frames_captured(),
            audio_sample_rate: self.audio_rate,
            audio_samples: self.audio_samples,
            frames_dir: self.config.frames_dir(),
            audio_path: self.config.audio_path(),
            output_path: output.map(Path::to_path_buf),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        if let Err(e) = manifest.save(self.config.manifest_path()) {
            tracing::warn!("failed to write session manifest: {e}");
        }
    }
}
