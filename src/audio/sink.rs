//! Local playback: bounded queue in front of an output device.
//!
//! ```text
//! receive loop ──enqueue──▶ ChunkQueue ──SampleFeeder::fill──▶ device callback
//!                                ▲
//!                        flush / stop clear it
//! ```
//!
//! [`PlaybackSink::enqueue`] never blocks: a full queue loses one chunk and
//! the loss is counted.  The device callback pulls samples through a
//! [`SampleFeeder`], pads with silence when the queue runs dry and counts an
//! underrun, but only once playback has actually begun.  Device faults raised
//! from the audio thread surface through [`PlaybackSink::fault`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use cpal::{FromSample, Sample};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::audio::output::{AudioOutput, DeviceError, OutputHandle};
use crate::audio::{AudioChunk, AudioFormat, ChunkQueue};
use crate::config::PlaybackConfig;

/// Queue shared between the sink and the device callback.
pub type SharedChunkQueue = Arc<Mutex<ChunkQueue<AudioChunk>>>;

fn lock_queue(queue: &SharedChunkQueue) -> MutexGuard<'_, ChunkQueue<AudioChunk>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Lock-free counters written from both the async side and the audio thread.
#[derive(Debug, Default)]
pub struct SinkCounters {
    dropped: AtomicU64,
    underruns: AtomicU64,
    played_samples: AtomicU64,
}

/// Point-in-time view of the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Chunks waiting to be played.
    pub queued: usize,
    /// Chunks lost to a full queue over the sink's lifetime.
    pub dropped: u64,
    /// Times playback ran dry after it had started.
    pub underruns: u64,
    /// Interleaved samples handed to the device.
    pub played_samples: u64,
}

// ---------------------------------------------------------------------------
// SampleFeeder
// ---------------------------------------------------------------------------

/// Pull side of the queue, owned by the device callback.
///
/// Keeps a cursor into the chunk currently being played so device buffers of
/// any size can be served from chunks of any size.
pub struct SampleFeeder {
    queue: SharedChunkQueue,
    counters: Arc<SinkCounters>,
    current: Option<AudioChunk>,
    cursor: usize,
    epoch: u64,
    /// Audio has been played since the last flush or underrun.
    primed: bool,
}

impl SampleFeeder {
    fn new(queue: SharedChunkQueue, counters: Arc<SinkCounters>) -> Self {
        let epoch = lock_queue(&queue).epoch();
        Self {
            queue,
            counters,
            current: None,
            cursor: 0,
            epoch,
            primed: false,
        }
    }

    /// Fill `out` with queued samples, padding the tail with silence.
    ///
    /// Returns the number of samples taken from the queue.  Never blocks: if
    /// the queue is momentarily locked by the producer the whole buffer is
    /// silence.
    pub fn fill<T>(&mut self, out: &mut [T]) -> usize
    where
        T: Sample + FromSample<i16>,
    {
        let mut queue = match self.queue.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(T::EQUILIBRIUM);
                return 0;
            }
        };

        if queue.epoch() != self.epoch {
            self.epoch = queue.epoch();
            self.current = None;
            self.cursor = 0;
            self.primed = false;
        }

        let mut written = 0;
        while written < out.len() {
            if self.current.is_none() {
                match queue.pop() {
                    Some(chunk) => {
                        self.current = Some(chunk);
                        self.cursor = 0;
                        self.primed = true;
                    }
                    None => break,
                }
            }
            let Some(chunk) = &self.current else { break };

            let remaining = &chunk.samples[self.cursor..];
            let n = remaining.len().min(out.len() - written);
            for (dst, &src) in out[written..written + n].iter_mut().zip(remaining) {
                *dst = T::from_sample(src);
            }
            written += n;
            self.cursor += n;

            if self.cursor >= chunk.samples.len() {
                self.current = None;
                self.cursor = 0;
            }
        }
        drop(queue);

        if written < out.len() {
            out[written..].fill(T::EQUILIBRIUM);
            if self.primed {
                self.counters.underruns.fetch_add(1, Ordering::Relaxed);
                self.primed = false;
            }
        }
        self.counters
            .played_samples
            .fetch_add(written as u64, Ordering::Relaxed);
        written
    }
}

// ---------------------------------------------------------------------------
// FaultReporter
// ---------------------------------------------------------------------------

/// Handed to the output so the audio thread can report a fatal stream error.
#[derive(Clone)]
pub struct FaultReporter {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl FaultReporter {
    /// Record a fault.  The first report wins until the sink is restarted.
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(message);
            true
        });
    }
}

// ---------------------------------------------------------------------------
// EnqueueError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("playback queue full; chunk dropped")]
    Full,

    #[error("chunk format {got} does not match device format {expected}")]
    FormatMismatch {
        expected: AudioFormat,
        got: AudioFormat,
    },

    #[error("playback sink is not started")]
    Stopped,
}

// ---------------------------------------------------------------------------
// PlaybackSink
// ---------------------------------------------------------------------------

/// Owns the output device for one orchestrator session.
///
/// Start/stop can be repeated; `stop` is idempotent and also runs on drop.
/// Counters cover the sink's whole lifetime and survive a reopen.
pub struct PlaybackSink {
    output: Arc<dyn AudioOutput>,
    queue: SharedChunkQueue,
    counters: Arc<SinkCounters>,
    handle: Option<Box<dyn OutputHandle>>,
    format: Option<AudioFormat>,
    faults_tx: Arc<watch::Sender<Option<String>>>,
    faults_rx: watch::Receiver<Option<String>>,
}

impl PlaybackSink {
    pub fn new(output: Arc<dyn AudioOutput>, config: &PlaybackConfig) -> Self {
        let (faults_tx, faults_rx) = watch::channel(None);
        Self {
            output,
            queue: Arc::new(Mutex::new(ChunkQueue::new(
                config.queue_capacity.max(1),
                config.overflow,
            ))),
            counters: Arc::new(SinkCounters::default()),
            handle: None,
            format: None,
            faults_tx: Arc::new(faults_tx),
            faults_rx,
        }
    }

    /// Open the device for `format` and begin pulling from an empty queue.
    ///
    /// Starting again with the same format is a no-op; a different format
    /// closes the current device first.
    pub async fn start(&mut self, format: AudioFormat) -> Result<(), DeviceError> {
        if self.handle.is_some() {
            if self.format == Some(format) {
                return Ok(());
            }
            log::info!("playback: format changed to {format}; reopening device");
            self.stop();
        }

        self.faults_tx.send_replace(None);
        lock_queue(&self.queue).clear();

        let output = Arc::clone(&self.output);
        let feeder = SampleFeeder::new(Arc::clone(&self.queue), Arc::clone(&self.counters));
        let reporter = FaultReporter {
            tx: Arc::clone(&self.faults_tx),
        };
        let handle = tokio::task::spawn_blocking(move || output.open(format, feeder, reporter))
            .await
            .map_err(|e| DeviceError::Thread(e.to_string()))??;

        log::info!("playback: opened {} at {format}", handle.device_name());
        self.handle = Some(handle);
        self.format = Some(format);
        Ok(())
    }

    /// Hand a chunk to the device without blocking.
    pub fn enqueue(&self, chunk: AudioChunk) -> Result<(), EnqueueError> {
        let Some(expected) = self.format.filter(|_| self.handle.is_some()) else {
            return Err(EnqueueError::Stopped);
        };
        if chunk.format != expected {
            return Err(EnqueueError::FormatMismatch {
                expected,
                got: chunk.format,
            });
        }

        let mut queue = lock_queue(&self.queue);
        if queue.is_full() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push(chunk).map_err(|_| EnqueueError::Full)
    }

    /// Discard queued audio, including the chunk the device is mid-way
    /// through.
    pub fn flush(&self) {
        lock_queue(&self.queue).clear();
    }

    /// Close the device and discard queued audio.  Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.flush();
        if let Some(handle) = self.handle.take() {
            log::info!("playback: closing {}", handle.device_name());
            drop(handle);
        }
        self.format = None;
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// Resolves once the device reports a fatal error.  Pending forever
    /// while no fault has been raised.
    pub async fn fault(&self) -> DeviceError {
        let mut rx = self.faults_rx.clone();
        // The `watch::Ref` guard must be gone before the next await.
        let fault = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| (*value).clone());
        match fault {
            Some(message) => DeviceError::Stream(message),
            None => std::future::pending().await,
        }
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            queued: lock_queue(&self.queue).len(),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            underruns: self.counters.underruns.load(Ordering::Relaxed),
            played_samples: self.counters.played_samples.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PlaybackSink {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::RecordingOutput;
    use crate::config::OverflowPolicy;

    fn chunk(value: i16, len: usize) -> AudioChunk {
        AudioChunk::new(vec![value; len], AudioFormat::STUDIO)
    }

    fn sink_with(capacity: usize, overflow: OverflowPolicy) -> (PlaybackSink, Arc<RecordingOutput>) {
        let output = Arc::new(RecordingOutput::default());
        let config = PlaybackConfig {
            enabled: true,
            queue_capacity: capacity,
            overflow,
        };
        (PlaybackSink::new(output.clone(), &config), output)
    }

    #[tokio::test]
    async fn enqueue_before_start_is_rejected() {
        let (sink, _) = sink_with(4, OverflowPolicy::DropNewest);
        assert_eq!(sink.enqueue(chunk(1, 4)), Err(EnqueueError::Stopped));
    }

    #[tokio::test]
    async fn samples_flow_in_order_and_pad_with_silence() {
        let (mut sink, output) = sink_with(4, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();
        sink.enqueue(chunk(1, 4)).unwrap();
        sink.enqueue(chunk(2, 4)).unwrap();

        let mut buf = [0i16; 6];
        assert_eq!(output.pull(&mut buf), 6);
        assert_eq!(buf, [1, 1, 1, 1, 2, 2]);

        assert_eq!(output.pull(&mut buf), 2);
        assert_eq!(buf, [2, 2, 0, 0, 0, 0]);
        assert_eq!(sink.stats().underruns, 1);
        assert_eq!(sink.stats().played_samples, 8);
    }

    #[tokio::test]
    async fn silence_before_first_chunk_is_not_an_underrun() {
        let (mut sink, output) = sink_with(4, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();

        let mut buf = [7i16; 8];
        for _ in 0..5 {
            output.pull(&mut buf);
        }
        assert_eq!(buf, [0; 8]);
        assert_eq!(sink.stats().underruns, 0);
    }

    #[tokio::test]
    async fn float_devices_receive_converted_samples() {
        let (mut sink, output) = sink_with(4, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();
        sink.enqueue(chunk(i16::MIN, 2)).unwrap();

        let mut buf = [1.0f32; 4];
        output.pull(&mut buf);
        assert_eq!(buf, [-1.0, -1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn overflow_drop_newest_counts_and_rejects() {
        let (mut sink, _) = sink_with(2, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();

        sink.enqueue(chunk(1, 2)).unwrap();
        sink.enqueue(chunk(2, 2)).unwrap();
        assert_eq!(sink.enqueue(chunk(3, 2)), Err(EnqueueError::Full));

        let stats = sink.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn overflow_drop_oldest_keeps_fresh_audio() {
        let (mut sink, output) = sink_with(2, OverflowPolicy::DropOldest);
        sink.start(AudioFormat::STUDIO).await.unwrap();

        for v in 1..=3 {
            sink.enqueue(chunk(v, 2)).unwrap();
        }
        assert_eq!(sink.stats().dropped, 1);

        let mut buf = [0i16; 4];
        output.pull(&mut buf);
        assert_eq!(buf, [2, 2, 3, 3]);
    }

    #[tokio::test]
    async fn format_mismatch_is_rejected() {
        let (mut sink, _) = sink_with(2, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();

        let mono = AudioFormat {
            channels: 1,
            ..AudioFormat::STUDIO
        };
        let err = sink.enqueue(AudioChunk::new(vec![0; 4], mono)).unwrap_err();
        assert!(matches!(err, EnqueueError::FormatMismatch { .. }));
    }

    #[tokio::test]
    async fn flush_discards_partially_played_chunk() {
        let (mut sink, output) = sink_with(4, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();
        sink.enqueue(chunk(5, 8)).unwrap();

        let mut buf = [0i16; 2];
        output.pull(&mut buf);
        sink.flush();

        let mut after = [9i16; 4];
        assert_eq!(output.pull(&mut after), 0);
        assert_eq!(after, [0; 4]);
        assert_eq!(sink.stats().underruns, 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_device() {
        let (mut sink, output) = sink_with(4, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();
        sink.enqueue(chunk(1, 2)).unwrap();

        sink.stop();
        sink.stop();

        assert!(!sink.is_started());
        assert_eq!(sink.stats().queued, 0);
        assert_eq!(output.opens(), 1);
        assert_eq!(output.closes(), 1);
    }

    #[tokio::test]
    async fn restart_with_same_format_keeps_device() {
        let (mut sink, output) = sink_with(4, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();
        sink.start(AudioFormat::STUDIO).await.unwrap();
        assert_eq!(output.opens(), 1);

        let mono = AudioFormat {
            channels: 1,
            ..AudioFormat::STUDIO
        };
        sink.start(mono).await.unwrap();
        assert_eq!(output.opens(), 2);
        assert_eq!(output.closes(), 1);
        assert_eq!(sink.format(), Some(mono));
    }

    #[tokio::test]
    async fn open_failure_leaves_sink_stopped() {
        let (mut sink, output) = sink_with(4, OverflowPolicy::DropNewest);
        output.fail_next_open();

        assert!(matches!(
            sink.start(AudioFormat::STUDIO).await,
            Err(DeviceError::NoDevice)
        ));
        assert!(!sink.is_started());
        assert_eq!(sink.enqueue(chunk(1, 2)), Err(EnqueueError::Stopped));
    }

    #[tokio::test]
    async fn reported_fault_resolves_fault_future() {
        let (mut sink, output) = sink_with(4, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();

        output.raise_fault("device unplugged");
        let err = sink.fault().await;
        assert!(matches!(err, DeviceError::Stream(msg) if msg == "device unplugged"));

        // Restarting clears the fault.
        sink.stop();
        sink.start(AudioFormat::STUDIO).await.unwrap();
        let pending = tokio::time::timeout(std::time::Duration::from_millis(10), sink.fault()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn fault_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let (sink, _) = sink_with(4, OverflowPolicy::DropNewest);
        let fault = sink.fault();
        assert_send(&fault);
    }

    #[tokio::test]
    async fn reopen_for_new_format_keeps_counters() {
        let (mut sink, output) = sink_with(1, OverflowPolicy::DropNewest);
        sink.start(AudioFormat::STUDIO).await.unwrap();
        sink.enqueue(chunk(1, 2)).unwrap();
        assert_eq!(sink.enqueue(chunk(2, 2)), Err(EnqueueError::Full));

        let mut buf = [0i16; 4];
        output.pull(&mut buf);
        assert_eq!(sink.stats().underruns, 1);

        let mono = AudioFormat {
            channels: 1,
            ..AudioFormat::STUDIO
        };
        sink.start(mono).await.unwrap();
        let stats = sink.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.underruns, 1);
        assert_eq!(stats.played_samples, 2);
    }
}
