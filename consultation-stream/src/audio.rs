use crate::config::AudioConfig;
use crate::error::{StreamError, StreamResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate};
use rubato::{FftFixedIn, Resampler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// An immutable buffer of PCM16 mono samples
///
/// Produced by a capturer, consumed exactly once by the transport. Cloning
/// shares the underlying buffer.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Little-endian byte encoding for the wire (linear16)
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in self.samples.iter() {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// Trait for audio frame producers
///
/// `start` acquires the underlying source and begins a lazy, infinite frame
/// sequence on the returned channel; `stop` releases the source
/// deterministically — no frames are produced after it returns. The seam
/// exists so non-microphone sources (a server-side capture agent, a test
/// script) satisfy the same contract as the cpal capturer.
pub trait AudioCapturer: Send {
    fn start(&mut self) -> StreamResult<mpsc::Receiver<AudioFrame>>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Converts raw device input into fixed-size PCM16 frames at the target rate
///
/// Folds channels to mono, resamples when the device rate differs from the
/// target, and chunks the result into frames of exactly `frame_samples`.
struct FrameAssembler {
    frame_samples: usize,
    target_rate: u32,
    resampler: Option<FftFixedIn<f32>>,
    resample_chunk: usize,
    input: Vec<f32>,
    output: Vec<i16>,
}

impl FrameAssembler {
    fn new(device_rate: u32, target_rate: u32, frame_samples: usize) -> StreamResult<Self> {
        let (resampler, resample_chunk) = if device_rate == target_rate {
            (None, 0)
        } else {
            // 100 ms input chunks keep resampler latency well under a frame
            let chunk = (device_rate as usize / 10).max(64);
            debug!(device_rate, target_rate, chunk, "Initializing resampler");
            let resampler =
                FftFixedIn::<f32>::new(device_rate as usize, target_rate as usize, chunk, 2, 1)
                    .map_err(|e| StreamError::DeviceUnavailable(format!("resampler: {e}")))?;
            (Some(resampler), chunk)
        };

        Ok(Self {
            frame_samples,
            target_rate,
            resampler,
            resample_chunk,
            input: Vec::new(),
            output: Vec::new(),
        })
    }

    fn push(&mut self, mono: &[f32], emit: &mut dyn FnMut(AudioFrame)) {
        match self.resampler {
            None => self.output.extend(mono.iter().map(|s| to_i16(*s))),
            Some(ref mut resampler) => {
                self.input.extend_from_slice(mono);
                while self.input.len() >= self.resample_chunk {
                    let chunk: Vec<f32> = self.input.drain(..self.resample_chunk).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(mut resampled) => {
                            if let Some(channel) = resampled.pop() {
                                self.output.extend(channel.iter().map(|s| to_i16(*s)));
                            }
                        }
                        Err(e) => warn!(error = %e, "Resampling failed, dropping chunk"),
                    }
                }
            }
        }

        while self.output.len() >= self.frame_samples {
            let samples: Vec<i16> = self.output.drain(..self.frame_samples).collect();
            emit(AudioFrame::new(samples, self.target_rate));
        }
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn fold_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

struct CaptureWorker {
    stop_tx: std::sync::mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

/// Microphone capturer backed by cpal
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// for the capture's lifetime. The thread owns the device exclusively; a
/// second `start` before `stop` is rejected.
pub struct MicrophoneCapturer {
    config: AudioConfig,
    worker: Option<CaptureWorker>,
}

impl MicrophoneCapturer {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            worker: None,
        }
    }
}

impl AudioCapturer for MicrophoneCapturer {
    fn start(&mut self) -> StreamResult<mpsc::Receiver<AudioFrame>> {
        if self.worker.is_some() {
            return Err(StreamError::AlreadyStarted);
        }

        // Frames are real-time: a small buffer plus drop-on-full beats an
        // unbounded backlog of stale audio
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();

        let config = self.config.clone();
        let handle = std::thread::spawn(move || capture_thread(config, frame_tx, ready_tx, stop_rx));

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { stop_tx, handle });
                info!("Audio capture started");
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(StreamError::DeviceUnavailable(
                    "capture thread exited during startup".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
            info!("Audio capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for MicrophoneCapturer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    config: AudioConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: std::sync::mpsc::Sender<StreamResult<()>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    match open_stream(&config, frame_tx) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            // Park until stop is requested (or the capturer is dropped)
            let _ = stop_rx.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

fn open_stream(config: &AudioConfig, frame_tx: mpsc::Sender<AudioFrame>) -> StreamResult<cpal::Stream> {
    let host = cpal::default_host();

    let device = match config.device {
        Some(ref name) => find_device_by_name(&host, name)?,
        None => host.default_input_device().ok_or_else(|| {
            StreamError::DeviceUnavailable("no default input device".to_string())
        })?,
    };

    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let input_config = device
        .default_input_config()
        .map_err(|e| StreamError::DeviceUnavailable(e.to_string()))?;

    let device_rate = input_config.sample_rate().0;
    let channels = input_config.channels() as usize;
    let sample_format = input_config.sample_format();

    info!(
        device = %device_name,
        device_rate,
        channels,
        target_rate = config.sample_rate,
        "Opening audio input"
    );

    let mut assembler = FrameAssembler::new(device_rate, config.sample_rate, config.frame_samples)?;

    let stream_config = cpal::StreamConfig {
        channels: input_config.channels(),
        sample_rate: SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut emit = move |frame: AudioFrame| {
        if frame_tx.try_send(frame).is_err() {
            trace!("Audio frame buffer full, dropping frame");
        }
    };

    let err_fn = |err| warn!(error = %err, "Audio stream error");

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = fold_to_mono(data, channels);
                    assembler.push(&mono, &mut emit);
                },
                err_fn,
                None,
            )
            .map_err(|e| StreamError::DeviceUnavailable(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let as_f32: Vec<f32> =
                        data.iter().map(|s| *s as f32 / i16::MAX as f32).collect();
                    let mono = fold_to_mono(&as_f32, channels);
                    assembler.push(&mono, &mut emit);
                },
                err_fn,
                None,
            )
            .map_err(|e| StreamError::DeviceUnavailable(e.to_string()))?,
        SampleFormat::U16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let as_f32: Vec<f32> = data
                        .iter()
                        .map(|s| (*s as f32 - 32_768.0) / 32_768.0)
                        .collect();
                    let mono = fold_to_mono(&as_f32, channels);
                    assembler.push(&mono, &mut emit);
                },
                err_fn,
                None,
            )
            .map_err(|e| StreamError::DeviceUnavailable(e.to_string()))?,
        other => {
            return Err(StreamError::DeviceUnavailable(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };

    stream
        .play()
        .map_err(|e| StreamError::DeviceUnavailable(e.to_string()))?;

    Ok(stream)
}

fn find_device_by_name(host: &cpal::Host, name: &str) -> StreamResult<Device> {
    let devices = host
        .input_devices()
        .map_err(|e| StreamError::DeviceUnavailable(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name.contains(name) {
                return Ok(device);
            }
        }
    }

    Err(StreamError::DeviceUnavailable(format!(
        "no input device matching '{name}'"
    )))
}
