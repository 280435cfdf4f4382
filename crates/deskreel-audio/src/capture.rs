use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use deskreel_foundation::AudioError;

/// Fixed session target. Devices that cannot do 44.1 kHz mono fall
/// back to their default config; the delivered samples are always mono
/// i16 and the negotiated rate is reported in [`StreamFormat`].
pub const TARGET_SAMPLE_RATE_HZ: u32 = 44_100;
pub const TARGET_CHANNELS: u16 = 1;

/// Format of the samples handed to the data callback.
#[derive(Debug, Clone, Copy)]
pub struct StreamFormat {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicCommand {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Default)]
pub struct MicStats {
    pub buffers_delivered: AtomicU64,
    pub samples_delivered: AtomicU64,
}

/// Handle to the dedicated microphone thread.
///
/// The cpal stream lives entirely on that thread (streams are not
/// `Send` on every backend). The stream is built quiescent: delivery
/// starts on the first `Resume`, so the caller can seat the sink
/// before samples flow. Dropping the handle without `stop()` leaves
/// the thread running; stopping is only possible on a started capture,
/// which the ownership here enforces.
pub struct MicCaptureThread {
    handle: JoinHandle<()>,
    ctrl_tx: Sender<MicCommand>,
    stats: Arc<MicStats>,
}

impl MicCaptureThread {
    pub fn spawn<F>(
        device_name: Option<String>,
        on_data: F,
    ) -> Result<(Self, StreamFormat), AudioError>
    where
        F: FnMut(&[i16]) + Send + 'static,
    {
        let (ctrl_tx, ctrl_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let stats = Arc::new(MicStats::default());
        let stats_thread = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                run_capture(
                    device_name,
                    Box::new(on_data),
                    ctrl_rx,
                    ready_tx,
                    stats_thread,
                );
            })
            .map_err(|e| AudioError::Fatal(format!("failed to spawn mic thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(format)) => Ok((
                Self {
                    handle,
                    ctrl_tx,
                    stats,
                },
                format,
            )),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Fatal(
                    "mic thread exited before reporting a stream format".into(),
                ))
            }
        }
    }

    /// Pauses the device stream; callbacks cease until `resume`.
    pub fn pause(&self) {
        let _ = self.ctrl_tx.send(MicCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.ctrl_tx.send(MicCommand::Resume);
    }

    /// Returns a sender that can command this capture from another
    /// thread (the scheduler uses it to stop audio on a fatal fault).
    pub fn commander(&self) -> Sender<MicCommand> {
        self.ctrl_tx.clone()
    }

    pub fn stats(&self) -> Arc<MicStats> {
        Arc::clone(&self.stats)
    }

    /// Stops the device and joins the thread. When this returns the
    /// stream has been dropped and no further callback can land, so it
    /// is safe to finalize the sink.
    pub fn stop(self) {
        let _ = self.ctrl_tx.send(MicCommand::Stop);
        let _ = self.handle.join();
    }
}

fn run_capture(
    device_name: Option<String>,
    on_data: Box<dyn FnMut(&[i16]) + Send>,
    ctrl_rx: Receiver<MicCommand>,
    ready_tx: Sender<Result<StreamFormat, AudioError>>,
    stats: Arc<MicStats>,
) {
    let delivering = Arc::new(AtomicBool::new(false));

    let built = (|| -> Result<(cpal::Stream, StreamFormat), AudioError> {
        let device = open_device(device_name.as_deref())?;
        if let Ok(name) = device.name() {
            tracing::info!("Selected input device: {name}");
        }
        let (config, sample_format) = negotiate_config(&device)?;
        tracing::info!(
            "Mic stream config: {} Hz, {} ch, {sample_format:?}",
            config.sample_rate.0,
            config.channels
        );
        let stream = build_stream(
            &device,
            &config,
            sample_format,
            on_data,
            Arc::clone(&delivering),
            stats,
        )?;
        let format = StreamFormat {
            sample_rate: config.sample_rate.0,
        };
        Ok((stream, format))
    })();

    let (stream, format) = match built {
        Ok(v) => v,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if ready_tx.send(Ok(format)).is_err() {
        return;
    }

    for cmd in ctrl_rx.iter() {
        match cmd {
            MicCommand::Resume => {
                delivering.store(true, Ordering::SeqCst);
                if let Err(e) = stream.play() {
                    tracing::error!("failed to start mic stream: {e}");
                    break;
                }
            }
            MicCommand::Pause => {
                // The delivery gate mutes callbacks even on backends
                // whose pause is a no-op.
                delivering.store(false, Ordering::SeqCst);
                if let Err(e) = stream.pause() {
                    tracing::warn!("mic stream pause not honored: {e}");
                }
            }
            MicCommand::Stop => break,
        }
    }

    delivering.store(false, Ordering::SeqCst);
    drop(stream);
    tracing::info!("Mic capture thread shutting down");
}

fn open_device(device_name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match device_name {
        Some(requested) => {
            for device in host.input_devices()? {
                if device.name().map(|n| n == requested).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(AudioError::DeviceUnavailable {
                name: Some(requested.to_string()),
            })
        }
        None => host
            .default_input_device()
            .ok_or(AudioError::DeviceUnavailable { name: None }),
    }
}

fn negotiate_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat), AudioError> {
    // Prefer the fixed session target.
    if let Ok(configs) = device.supported_input_configs() {
        for range in configs {
            if range.channels() == TARGET_CHANNELS
                && range.min_sample_rate().0 <= TARGET_SAMPLE_RATE_HZ
                && range.max_sample_rate().0 >= TARGET_SAMPLE_RATE_HZ
            {
                let config = StreamConfig {
                    channels: TARGET_CHANNELS,
                    sample_rate: SampleRate(TARGET_SAMPLE_RATE_HZ),
                    buffer_size: cpal::BufferSize::Default,
                };
                return Ok((config, range.sample_format()));
            }
        }
    }

    // Whatever the device does by default; channels are downmixed in
    // the callback and the sink header records the actual rate.
    let default = device.default_input_config()?;
    Ok((
        StreamConfig {
            channels: default.channels(),
            sample_rate: default.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        },
        default.sample_format(),
    ))
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mut on_data: Box<dyn FnMut(&[i16]) + Send>,
    delivering: Arc<AtomicBool>,
    stats: Arc<MicStats>,
) -> Result<cpal::Stream, AudioError> {
    let channels = config.channels;
    let mut mono: Vec<i16> = Vec::new();
    let mut deliver = move |samples: &[i16]| {
        if !delivering.load(Ordering::SeqCst) {
            return;
        }
        let out: &[i16] = if channels == 1 {
            samples
        } else {
            downmix_to_mono(samples, channels, &mut mono);
            &mono
        };
        stats.buffers_delivered.fetch_add(1, Ordering::Relaxed);
        stats
            .samples_delivered
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        on_data(out);
    };

    let err_fn = |err: cpal::StreamError| {
        tracing::error!("mic stream error: {err}");
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &_| deliver(data),
            err_fn,
            None,
        )?,
        SampleFormat::F32 => {
            let mut scratch: Vec<i16> = Vec::new();
            device.build_input_stream(
                config,
                move |data: &[f32], _: &_| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| f32_to_i16(s)));
                    deliver(&scratch);
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::U16 => {
            let mut scratch: Vec<i16> = Vec::new();
            device.build_input_stream(
                config,
                move |data: &[u16], _: &_| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| u16_to_i16(s)));
                    deliver(&scratch);
                },
                err_fn,
                None,
            )?
        }
        other => {
            return Err(AudioError::FormatNotSupported {
                format: format!("{other:?}"),
            });
        }
    };

    Ok(stream)
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

fn u16_to_i16(sample: u16) -> i16 {
    (sample as i32 - 32768) as i16
}

fn downmix_to_mono(samples: &[i16], channels: u16, out: &mut Vec<i16>) {
    let channels = channels as usize;
    out.clear();
    out.extend(samples.chunks_exact(channels).map(|chunk| {
        let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
        (sum / channels as i32) as i16
    }));
}
