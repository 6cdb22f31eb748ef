//! Output devices behind the [`AudioOutput`] seam.
//!
//! * [`CpalOutput`] plays through the system default output device.
//! * [`NullOutput`] consumes audio at real-time pace without a device, for
//!   headless runs.
//!
//! `cpal::Stream` is not `Send` on every platform, so [`CpalOutput`] builds
//! and owns the stream on a dedicated thread and hands back a handle whose
//! drop stops that thread.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::sink::{FaultReporter, SampleFeeder};
use crate::audio::AudioFormat;

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Errors raised while opening or running an output device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query supported output configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("output device does not support {0}")]
    UnsupportedFormat(String),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("output stream failed: {0}")]
    Stream(String),

    #[error("audio output thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Opens a playback stream that pulls samples from `feeder`.
///
/// `open` may block while the device initialises; callers run it on the
/// blocking pool.
pub trait AudioOutput: Send + Sync {
    fn open(
        &self,
        format: AudioFormat,
        feeder: SampleFeeder,
        faults: FaultReporter,
    ) -> Result<Box<dyn OutputHandle>, DeviceError>;
}

/// Keeps an opened stream alive; dropping it closes the device.
pub trait OutputHandle: Send + Sync {
    fn device_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Default system output device via `cpal`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl AudioOutput for CpalOutput {
    fn open(
        &self,
        format: AudioFormat,
        feeder: SampleFeeder,
        faults: FaultReporter,
    ) -> Result<Box<dyn OutputHandle>, DeviceError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String, DeviceError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || match build_stream(format, feeder, faults) {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    // Blocks until the handle drops its sender.
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| DeviceError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(name)) => Ok(Box::new(ThreadHandle {
                name,
                stop: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::Thread(
                    "audio thread exited during setup".into(),
                ))
            }
        }
    }
}

struct ThreadHandle {
    name: String,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputHandle for ThreadHandle {
    fn device_name(&self) -> &str {
        &self.name
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("playback: audio output thread panicked");
            }
        }
    }
}

fn build_stream(
    format: AudioFormat,
    feeder: SampleFeeder,
    faults: FaultReporter,
) -> Result<(cpal::Stream, String), DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(DeviceError::NoDevice)?;
    let name = device.name().unwrap_or_else(|_| "unknown device".into());

    let supported = pick_config(&device, format)?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match sample_format {
        cpal::SampleFormat::I16 => build_typed::<i16>(&device, &config, feeder, faults)?,
        cpal::SampleFormat::F32 => build_typed::<f32>(&device, &config, feeder, faults)?,
        cpal::SampleFormat::U16 => build_typed::<u16>(&device, &config, feeder, faults)?,
        other => {
            return Err(DeviceError::UnsupportedFormat(format!(
                "sample format {other:?}"
            )))
        }
    };
    stream.play()?;
    Ok((stream, name))
}

/// Pick a config with the requested channel count and rate, preferring
/// native 16-bit output.
fn pick_config(
    device: &cpal::Device,
    format: AudioFormat,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let rate = cpal::SampleRate(format.sample_rate);
    let rank = |f: cpal::SampleFormat| match f {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::U16 => 2,
        _ => 3,
    };

    let mut candidates: Vec<_> = device
        .supported_output_configs()?
        .filter(|c| {
            c.channels() == format.channels
                && c.min_sample_rate() <= rate
                && rate <= c.max_sample_rate()
        })
        .collect();
    candidates.sort_by_key(|c| rank(c.sample_format()));

    candidates
        .into_iter()
        .next()
        .map(|c| c.with_sample_rate(rate))
        .ok_or_else(|| DeviceError::UnsupportedFormat(format.to_string()))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut feeder: SampleFeeder,
    faults: FaultReporter,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            feeder.fill(data);
        },
        move |err: cpal::StreamError| {
            faults.report(err.to_string());
        },
        None,
    )?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// NullOutput
// ---------------------------------------------------------------------------

/// Discards audio at real-time pace.
///
/// Drains the queue in 20 ms blocks so queue depth, drops and underruns
/// behave as they would with a device attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

const NULL_PERIOD: Duration = Duration::from_millis(20);

impl AudioOutput for NullOutput {
    fn open(
        &self,
        format: AudioFormat,
        mut feeder: SampleFeeder,
        _faults: FaultReporter,
    ) -> Result<Box<dyn OutputHandle>, DeviceError> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let mut buffer = vec![0i16; format.samples_for(NULL_PERIOD).max(1)];

        let thread = std::thread::Builder::new()
            .name("audio-null".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(NULL_PERIOD) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        feeder.fill(&mut buffer);
                    }
                    _ => break,
                }
            })
            .map_err(|e| DeviceError::Thread(e.to_string()))?;

        Ok(Box::new(ThreadHandle {
            name: "null output".into(),
            stop: Some(stop_tx),
            thread: Some(thread),
        }))
    }
}

// ---------------------------------------------------------------------------
// RecordingOutput (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use recording::RecordingOutput;

#[cfg(test)]
mod recording {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use cpal::{FromSample, Sample};

    use super::*;

    #[derive(Default)]
    struct Inner {
        feeder: Mutex<Option<SampleFeeder>>,
        faults: Mutex<Option<FaultReporter>>,
        opens: AtomicUsize,
        closes: AtomicUsize,
        fail_next: AtomicBool,
    }

    /// In-memory device: the test drives the callback by calling `pull`.
    #[derive(Default, Clone)]
    pub struct RecordingOutput {
        inner: Arc<Inner>,
    }

    impl RecordingOutput {
        /// Simulate one device callback.  Returns 0 when no stream is open.
        pub fn pull<T: Sample + FromSample<i16>>(&self, out: &mut [T]) -> usize {
            match self.inner.feeder.lock().unwrap().as_mut() {
                Some(feeder) => feeder.fill(out),
                None => 0,
            }
        }

        pub fn opens(&self) -> usize {
            self.inner.opens.load(Ordering::SeqCst)
        }

        pub fn closes(&self) -> usize {
            self.inner.closes.load(Ordering::SeqCst)
        }

        pub fn is_open(&self) -> bool {
            self.inner.feeder.lock().unwrap().is_some()
        }

        /// Make the next `open` fail with [`DeviceError::NoDevice`].
        pub fn fail_next_open(&self) {
            self.inner.fail_next.store(true, Ordering::SeqCst);
        }

        pub fn raise_fault(&self, message: &str) {
            if let Some(faults) = self.inner.faults.lock().unwrap().as_ref() {
                faults.report(message);
            }
        }
    }

    impl AudioOutput for RecordingOutput {
        fn open(
            &self,
            _format: AudioFormat,
            feeder: SampleFeeder,
            faults: FaultReporter,
        ) -> Result<Box<dyn OutputHandle>, DeviceError> {
            if self.inner.fail_next.swap(false, Ordering::SeqCst) {
                return Err(DeviceError::NoDevice);
            }
            self.inner.opens.fetch_add(1, Ordering::SeqCst);
            *self.inner.feeder.lock().unwrap() = Some(feeder);
            *self.inner.faults.lock().unwrap() = Some(faults);
            Ok(Box::new(RecordingHandle {
                inner: Arc::clone(&self.inner),
            }))
        }
    }

    struct RecordingHandle {
        inner: Arc<Inner>,
    }

    impl OutputHandle for RecordingHandle {
        fn device_name(&self) -> &str {
            "recording output"
        }
    }

    impl Drop for RecordingHandle {
        fn drop(&mut self) {
            self.inner.closes.fetch_add(1, Ordering::SeqCst);
            *self.inner.feeder.lock().unwrap() = None;
            *self.inner.faults.lock().unwrap() = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audio::{AudioChunk, PlaybackSink};
    use crate::config::PlaybackConfig;

    #[test]
    fn handles_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ThreadHandle>();
        assert_send_sync::<PlaybackSink>();
        assert_send_sync::<DeviceError>();
    }

    #[tokio::test]
    async fn null_output_drains_queue_in_real_time() {
        let mut sink = PlaybackSink::new(Arc::new(NullOutput), &PlaybackConfig::default());
        sink.start(AudioFormat::STUDIO).await.unwrap();

        // 10 ms of audio; one 20 ms period drains it.
        let samples = AudioFormat::STUDIO.samples_for(Duration::from_millis(10));
        sink.enqueue(AudioChunk::new(vec![1; samples], AudioFormat::STUDIO))
            .unwrap();

        let mut drained = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if sink.stats().queued == 0 && sink.stats().played_samples > 0 {
                drained = true;
                break;
            }
        }
        assert!(drained);
        sink.stop();
    }
}
