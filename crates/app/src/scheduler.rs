use crossbeam_channel::Sender;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use deskreel_audio::MicCommand;
use deskreel_capture::{FrameSource, FrameWriter};
use deskreel_foundation::{SessionError, SessionState, SharedClock, StateMachine, VideoError};

use crate::session::SessionFlags;

/// Builds the frame source on the capture thread itself. Capturer
/// handles are not assumed to travel across threads.
pub type SourceFactory = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>, VideoError> + Send>;

/// Drives frame acquisition at a fixed cadence on a dedicated thread.
///
/// Each tick captures one frame and persists it under the next
/// sequence number. Ticks never overlap; a tick that overruns the
/// interval makes the next one start late; there is no queueing and
/// no catch-up.
/// Transient capture faults skip the tick; a storage fault fails the
/// session and stops both streams.
pub struct CaptureScheduler {
    handle: JoinHandle<()>,
}

impl CaptureScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        interval: Duration,
        source_factory: SourceFactory,
        mut writer: Box<dyn FrameWriter>,
        flags: Arc<SessionFlags>,
        state: Arc<StateMachine>,
        audio_ctrl: Sender<MicCommand>,
        progress_tx: Sender<u64>,
        clock: SharedClock,
    ) -> Result<Self, SessionError> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name("capture-tick".to_string())
            .spawn(move || {
                let mut source = match source_factory() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_loop(
                    interval,
                    source.as_mut(),
                    writer.as_mut(),
                    &flags,
                    &state,
                    &audio_ctrl,
                    &progress_tx,
                    &clock,
                );
            })
            .map_err(|e| SessionError::Fatal(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = handle.join();
                Err(SessionError::Fatal(
                    "capture thread exited before reporting readiness".into(),
                ))
            }
        }
    }

    /// Waits for the tick loop to exit. Callers clear the recording
    /// flag first.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    interval: Duration,
    source: &mut dyn FrameSource,
    writer: &mut dyn FrameWriter,
    flags: &SessionFlags,
    state: &StateMachine,
    audio_ctrl: &Sender<MicCommand>,
    progress_tx: &Sender<u64>,
    clock: &SharedClock,
) {
    tracing::info!(interval_ms = interval.as_millis() as u64, "capture tick loop started");

    let mut ticks: u64 = 0;
    let mut was_paused = false;

    while flags.recording.load(Ordering::SeqCst) {
        if flags.paused.load(Ordering::SeqCst) {
            if !was_paused {
                source.on_pause();
                was_paused = true;
            }
            clock.sleep(interval);
            continue;
        }
        if was_paused {
            source.on_resume();
            was_paused = false;
        }

        let tick_start = clock.now();
        match source.capture_frame() {
            Ok(frame) => {
                let seq = flags.frames.load(Ordering::Relaxed);
                match writer.save_frame(&frame, seq) {
                    Ok(_) => {
                        flags.frames.store(seq + 1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        // Fatal: a gap in the sequence would desync the
                        // mux. Fail the session and stop both streams.
                        let reason = e.to_string();
                        tracing::error!("frame {seq} could not be persisted: {reason}");
                        *flags.failure.lock() = Some(e.into());
                        flags.recording.store(false, Ordering::SeqCst);
                        flags.paused.store(false, Ordering::SeqCst);
                        let _ = audio_ctrl.send(MicCommand::Stop);
                        let _ = state.transition(SessionState::Failed { reason });
                        break;
                    }
                }
            }
            Err(e) => {
                // Transient: this tick produced no frame.
                tracing::warn!("capture tick skipped: {e}");
            }
        }

        ticks += 1;
        let _ = progress_tx.send(ticks);

        let elapsed = clock.now().saturating_duration_since(tick_start);
        if elapsed < interval {
            clock.sleep(interval - elapsed);
        }
    }

    tracing::info!(ticks, frames = flags.frames_captured(), "capture tick loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskreel_capture::RawFrame;
    use deskreel_foundation::{real_clock, ManualClock};
    use parking_lot::Mutex;
    use std::path::PathBuf;

    struct FakeSource {
        calls: u32,
        fail_every_other: bool,
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                calls: 0,
                fail_every_other: false,
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl FrameSource for FakeSource {
        fn capture_frame(&mut self) -> Result<RawFrame, VideoError> {
            self.calls += 1;
            if self.fail_every_other && self.calls % 2 == 1 {
                return Err(VideoError::CaptureUnavailable {
                    reason: "display busy".into(),
                });
            }
            Ok(RawFrame {
                width: 2,
                height: 2,
                data: vec![0u8; 16],
            })
        }

        fn on_pause(&mut self) {
            self.events.lock().push("pause");
        }

        fn on_resume(&mut self) {
            self.events.lock().push("resume");
        }
    }

    /// Records saved sequence numbers and drives the loop via hooks:
    /// optionally stops recording after N frames or fails at a fixed
    /// sequence number.
    struct HookedWriter {
        seqs: Arc<Mutex<Vec<u64>>>,
        flags: Arc<SessionFlags>,
        stop_after: Option<u64>,
        fail_at: Option<u64>,
    }

    impl FrameWriter for HookedWriter {
        fn save_frame(&mut self, _frame: &RawFrame, seq: u64) -> Result<PathBuf, VideoError> {
            if self.fail_at == Some(seq) {
                return Err(VideoError::StorageWrite {
                    path: PathBuf::from(format!("frame-{seq}")),
                    reason: "disk full".into(),
                });
            }
            self.seqs.lock().push(seq);
            if let Some(n) = self.stop_after {
                if seq + 1 >= n {
                    self.flags.recording.store(false, Ordering::SeqCst);
                }
            }
            Ok(PathBuf::from(format!("frame-{seq}")))
        }
    }

    struct Harness {
        flags: Arc<SessionFlags>,
        state: Arc<StateMachine>,
        seqs: Arc<Mutex<Vec<u64>>>,
        audio_tx: Sender<MicCommand>,
        audio_rx: crossbeam_channel::Receiver<MicCommand>,
        progress_tx: Sender<u64>,
        progress_rx: crossbeam_channel::Receiver<u64>,
    }

    impl Harness {
        fn recording() -> Self {
            let flags = Arc::new(SessionFlags::default());
            flags.recording.store(true, Ordering::SeqCst);
            let state = Arc::new(StateMachine::new());
            state.transition(SessionState::Recording).unwrap();
            let (audio_tx, audio_rx) = crossbeam_channel::unbounded();
            let (progress_tx, progress_rx) = crossbeam_channel::unbounded();
            Self {
                flags,
                state,
                seqs: Arc::new(Mutex::new(Vec::new())),
                audio_tx,
                audio_rx,
                progress_tx,
                progress_rx,
            }
        }

        fn writer(&self, stop_after: Option<u64>, fail_at: Option<u64>) -> HookedWriter {
            HookedWriter {
                seqs: Arc::clone(&self.seqs),
                flags: Arc::clone(&self.flags),
                stop_after,
                fail_at,
            }
        }
    }

    fn run_direct(
        h: &Harness,
        source: &mut dyn FrameSource,
        writer: &mut dyn FrameWriter,
        clock: &SharedClock,
        interval: Duration,
    ) {
        run_loop(
            interval,
            source,
            writer,
            &h.flags,
            &h.state,
            &h.audio_tx,
            &h.progress_tx,
            clock,
        );
    }

    #[test]
    fn frames_are_contiguous_from_zero() {
        let h = Harness::recording();
        let mut source = FakeSource::new();
        let mut writer = h.writer(Some(5), None);
        let clock: SharedClock = Arc::new(ManualClock::new());

        run_direct(&h, &mut source, &mut writer, &clock, Duration::from_millis(33));

        assert_eq!(*h.seqs.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(h.flags.frames_captured(), 5);
    }

    #[test]
    fn cadence_sleeps_one_interval_per_tick() {
        let h = Harness::recording();
        let mut source = FakeSource::new();
        let mut writer = h.writer(Some(5), None);
        let manual = Arc::new(ManualClock::new());
        let start = manual.now();
        let clock: SharedClock = manual.clone();

        run_direct(&h, &mut source, &mut writer, &clock, Duration::from_millis(33));

        // Capture takes zero virtual time, so each of the five ticks
        // sleeps out its full interval.
        assert_eq!(manual.now() - start, Duration::from_millis(5 * 33));
    }

    #[test]
    fn transient_capture_faults_skip_the_tick() {
        let h = Harness::recording();
        let mut source = FakeSource::new();
        source.fail_every_other = true;
        let mut writer = h.writer(Some(3), None);
        let clock: SharedClock = Arc::new(ManualClock::new());

        run_direct(&h, &mut source, &mut writer, &clock, Duration::from_millis(33));

        // Every other tick produced no frame, yet numbering has no gaps.
        assert_eq!(*h.seqs.lock(), vec![0, 1, 2]);
        let ticks: Vec<u64> = h.progress_rx.try_iter().collect();
        assert_eq!(ticks.len(), 6);
        assert_eq!(ticks.last(), Some(&6));
        assert_eq!(h.state.current(), SessionState::Recording);
    }

    #[test]
    fn storage_fault_fails_the_session_and_stops_audio() {
        let h = Harness::recording();
        let mut source = FakeSource::new();
        let mut writer = h.writer(None, Some(2));
        let clock: SharedClock = Arc::new(ManualClock::new());

        run_direct(&h, &mut source, &mut writer, &clock, Duration::from_millis(33));

        // Frames 0 and 1 exist; tick for frame 2 failed and no further
        // tick ran.
        assert_eq!(*h.seqs.lock(), vec![0, 1]);
        assert!(!h.flags.is_recording());
        assert!(matches!(
            h.state.current(),
            SessionState::Failed { .. }
        ));
        assert_eq!(h.audio_rx.try_recv().unwrap(), MicCommand::Stop);
        let failure = h.flags.failure.lock().take().unwrap();
        assert!(matches!(
            failure,
            SessionError::Video(VideoError::StorageWrite { .. })
        ));
    }

    #[test]
    fn pause_and_resume_preserve_contiguity() {
        let h = Harness::recording();
        let events;
        {
            let source = FakeSource::new();
            events = Arc::clone(&source.events);
            let writer = h.writer(None, None);
            let factory: SourceFactory = Box::new(move || Ok(Box::new(source) as Box<dyn FrameSource>));

            let scheduler = CaptureScheduler::spawn(
                Duration::from_millis(1),
                factory,
                Box::new(writer),
                Arc::clone(&h.flags),
                Arc::clone(&h.state),
                h.audio_tx.clone(),
                h.progress_tx.clone(),
                real_clock(),
            )
            .unwrap();

            // Let at least five frames land.
            while h.flags.frames_captured() < 5 {
                std::thread::sleep(Duration::from_millis(2));
            }

            h.flags.paused.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            let at_pause = h.flags.frames_captured();
            std::thread::sleep(Duration::from_millis(20));
            // A paused interval contributes zero frames.
            assert_eq!(h.flags.frames_captured(), at_pause);

            h.flags.paused.store(false, Ordering::SeqCst);
            while h.flags.frames_captured() < at_pause + 3 {
                std::thread::sleep(Duration::from_millis(2));
            }

            h.flags.recording.store(false, Ordering::SeqCst);
            scheduler.join();
        }

        // Numbering continued across the pause with no restart.
        let seqs = h.seqs.lock();
        let expected: Vec<u64> = (0..seqs.len() as u64).collect();
        assert_eq!(*seqs, expected);
        // The source was told to idle and to come back.
        let events = events.lock();
        assert!(events.contains(&"pause"));
        assert!(events.contains(&"resume"));
    }

    #[test]
    fn factory_failure_surfaces_from_spawn() {
        let h = Harness::recording();
        let factory: SourceFactory = Box::new(|| {
            Err(VideoError::CaptureUnavailable {
                reason: "no display".into(),
            })
        });
        let writer = h.writer(None, None);

        let err = CaptureScheduler::spawn(
            Duration::from_millis(33),
            factory,
            Box::new(writer),
            Arc::clone(&h.flags),
            Arc::clone(&h.state),
            h.audio_tx.clone(),
            h.progress_tx.clone(),
            real_clock(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Video(VideoError::CaptureUnavailable { .. })
        ));
    }
}
