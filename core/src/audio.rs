//! Audio buffering between the emulation thread and the audio device thread
//!
//! The emulation thread writes interleaved `f32` samples into a lock-free ring
//! ([`AudioWriter`]); the platform audio callback drains it ([`AudioReader`]). Both sides report
//! starvation and overflow to a shared [`AudioBackpressure`], which grows the number of queued
//! buffers on underrun.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use tracing::{debug, info, trace, warn};

use crate::config::AudioConfig;

/// Fewest buffers the sink may be configured with
pub const MIN_SOUND_BUFFERS: u32 = 2;

/// Largest buffer count a user may configure
pub const MAX_SOUND_BUFFERS: u32 = 8;

/// Output sample rates the sink may be configured for
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [22_050, 32_000, 44_100, 48_000];

/// Snapshot of the audio counters for display
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioStats {
    pub underruns: u64,
    pub overruns: u64,
    pub callbacks: u64,
    /// Mean device frames requested per callback
    pub avg_callback_frames: f64,
    /// Frames accepted from the emulation thread
    pub frames: u64,
}

/// Underrun/overrun bookkeeping and the buffer-count ratchet
///
/// Shared by the emulation thread, the audio device thread and the controller. The buffer
/// count only grows on its own; shrinking it is a configuration change via
/// [`set_buffer_count`](Self::set_buffer_count).
#[derive(Debug)]
pub struct AudioBackpressure {
    buffers: AtomicU32,
    max_buffers: u32,
    auto_increase: AtomicBool,
    underruns: AtomicU64,
    overruns: AtomicU64,
    callbacks: AtomicU64,
    callback_frames: AtomicU64,
    frames_written: AtomicU64,
}

impl AudioBackpressure {
    pub fn new(initial_buffers: u32, max_buffers: u32, auto_increase: bool) -> Self {
        let max_buffers = max_buffers.max(MIN_SOUND_BUFFERS);
        Self {
            buffers: AtomicU32::new(initial_buffers.clamp(MIN_SOUND_BUFFERS, max_buffers)),
            max_buffers,
            auto_increase: AtomicBool::new(auto_increase),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            callbacks: AtomicU64::new(0),
            callback_frames: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            config.sound_buffers,
            config.max_sound_buffers,
            config.add_buffers_on_underrun,
        )
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffers.load(Ordering::Acquire)
    }

    pub fn max_buffer_count(&self) -> u32 {
        self.max_buffers
    }

    /// User-driven change of the buffer count, clamped to the configured range
    pub fn set_buffer_count(&self, count: u32) -> u32 {
        let count = count.clamp(MIN_SOUND_BUFFERS, self.max_buffers);
        self.buffers.store(count, Ordering::Release);
        info!("Sound buffers set to {}", count);
        count
    }

    pub fn auto_increase(&self) -> bool {
        self.auto_increase.load(Ordering::Acquire)
    }

    pub fn set_auto_increase(&self, enabled: bool) {
        self.auto_increase.store(enabled, Ordering::Release);
    }

    /// Record a starved device callback; returns the buffer count afterwards
    pub fn report_underrun(&self) -> u32 {
        self.underruns.fetch_add(1, Ordering::Relaxed);
        if !self.auto_increase() {
            return self.buffer_count();
        }
        let max = self.max_buffers;
        match self
            .buffers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            }) {
            Ok(previous) => {
                debug!("Audio underrun: sound buffers {} -> {}", previous, previous + 1);
                previous + 1
            }
            Err(current) => {
                trace!("Audio underrun with sound buffers at ceiling {}", current);
                current
            }
        }
    }

    pub fn report_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback(&self, frames: usize) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        self.callback_frames
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn record_frames_written(&self, frames: usize) {
        self.frames_written
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> AudioStats {
        let callbacks = self.callbacks.load(Ordering::Relaxed);
        let callback_frames = self.callback_frames.load(Ordering::Relaxed);
        AudioStats {
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            callbacks,
            avg_callback_frames: if callbacks == 0 {
                0.0
            } else {
                callback_frames as f64 / callbacks as f64
            },
            frames: self.frames_written.load(Ordering::Relaxed),
        }
    }

    pub fn clear_stats(&self) {
        self.underruns.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.callbacks.store(0, Ordering::Relaxed);
        self.callback_frames.store(0, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
    }
}

/// Sample rate the device cannot be driven at
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SampleRateError {
    #[error("unsupported sample rate {0} Hz")]
    Unsupported(u32),
    #[error("sample rate {requested} Hz exceeds device rate {native} Hz")]
    AboveNative { requested: u32, native: u32 },
}

/// Interleaved output format of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Check `sample_rate` against the supported set and the device's native rate
    pub fn negotiate(
        sample_rate: u32,
        channels: u16,
        native_rate: u32,
    ) -> Result<Self, SampleRateError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(SampleRateError::Unsupported(sample_rate));
        }
        if sample_rate > native_rate {
            return Err(SampleRateError::AboveNative {
                requested: sample_rate,
                native: native_rate,
            });
        }
        Ok(Self {
            sample_rate,
            channels: channels.max(1),
        })
    }

    /// Negotiate with a device, falling back to the best rate it can take
    ///
    /// An unsupported request falls back to the default rate; a rate above the device's
    /// falls back to the highest supported rate the device can play.
    pub fn for_device(sample_rate: u32, channels: u16, native_rate: u32) -> Self {
        match Self::negotiate(sample_rate, channels, native_rate) {
            Ok(format) => format,
            Err(e) => {
                let fallback = SUPPORTED_SAMPLE_RATES
                    .iter()
                    .rev()
                    .copied()
                    .find(|&rate| rate <= native_rate && rate <= Self::default().sample_rate)
                    .unwrap_or(SUPPORTED_SAMPLE_RATES[0]);
                warn!("{}; using {} Hz", e, fallback);
                Self {
                    sample_rate: fallback,
                    channels: channels.max(1),
                }
            }
        }
    }

    /// Device frames covering one emulated frame at `frame_rate`
    pub fn frames_per_buffer(&self, frame_rate: f64) -> usize {
        let rate = if frame_rate.is_finite() && frame_rate > 0.0 {
            frame_rate
        } else {
            crate::pacing::DEFAULT_FRAME_RATE
        };
        (self.sample_rate as f64 / rate).ceil() as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

/// Create the ring between the emulation thread and the audio device thread
///
/// The ring is sized for the configured ceiling; how much of it the writer may fill is
/// governed by the live buffer count.
pub fn audio_stream(
    format: AudioFormat,
    frames_per_buffer: usize,
    backpressure: Arc<AudioBackpressure>,
    enabled: bool,
    sound_during_fast_forward: bool,
) -> (AudioWriter, AudioReader) {
    let frames_per_buffer = frames_per_buffer.max(1);
    let channels = format.channels.max(1) as usize;
    let capacity = backpressure.max_buffer_count() as usize * frames_per_buffer * channels;
    let ring = HeapRb::<f32>::new(capacity);
    let (producer, consumer) = ring.split();
    let active = Arc::new(AtomicBool::new(false));

    debug!(
        "Audio stream {} Hz x{}: {} frames per buffer, ring of {} samples",
        format.sample_rate, channels, frames_per_buffer, capacity
    );

    (
        AudioWriter {
            producer,
            format,
            frames_per_buffer,
            backpressure: backpressure.clone(),
            active: active.clone(),
            enabled,
            sound_during_fast_forward,
        },
        AudioReader {
            consumer,
            format,
            backpressure,
            active,
            primed: false,
        },
    )
}

/// Emulation-thread end of the audio stream
pub struct AudioWriter {
    producer: HeapProd<f32>,
    format: AudioFormat,
    frames_per_buffer: usize,
    backpressure: Arc<AudioBackpressure>,
    active: Arc<AtomicBool>,
    enabled: bool,
    sound_during_fast_forward: bool,
}

impl AudioWriter {
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn frames_per_buffer(&self) -> usize {
        self.frames_per_buffer
    }

    /// Samples currently queued for the device
    pub fn queued_samples(&self) -> usize {
        self.producer.occupied_len()
    }

    /// Mark the stream as playing or stopped
    ///
    /// While inactive (paused) the reader pads with silence without counting underruns.
    pub fn set_active(&self, active: bool) {
        let was = self.active.swap(active, Ordering::AcqRel);
        if was != active {
            debug!("Audio stream {}", if active { "resumed" } else { "stopped" });
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Queue interleaved samples; returns how many were accepted
    ///
    /// Samples are dropped when audio is disabled or fast-forward is on without sound. Anything
    /// that does not fit within the current buffer count is dropped and counted as an overrun.
    pub fn write(&mut self, samples: &[f32], fast_forward: bool) -> usize {
        if !self.enabled || (fast_forward && !self.sound_during_fast_forward) {
            return 0;
        }
        let channels = self.format.channels.max(1) as usize;
        let limit = self.backpressure.buffer_count() as usize * self.frames_per_buffer * channels;
        let room = limit.saturating_sub(self.producer.occupied_len());
        // Whole frames only, so channels never swap
        let take = room.min(samples.len()) / channels * channels;
        let pushed = self.producer.push_slice(&samples[..take]);
        if pushed < samples.len() {
            trace!(
                "Audio overrun: dropped {} samples",
                samples.len() - pushed
            );
            self.backpressure.report_overrun();
        }
        self.backpressure.record_frames_written(pushed / channels);
        pushed
    }
}

/// Audio-device end of the audio stream
pub struct AudioReader {
    consumer: HeapCons<f32>,
    format: AudioFormat,
    backpressure: Arc<AudioBackpressure>,
    active: Arc<AtomicBool>,
    primed: bool,
}

impl AudioReader {
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn backpressure(&self) -> &Arc<AudioBackpressure> {
        &self.backpressure
    }

    /// Fill one device buffer, padding with silence
    ///
    /// Returns how many samples came from the stream. A short read counts as an underrun once
    /// the stream has delivered any samples while active, so start-up silence is not reported.
    /// The device buffer may be larger than everything the writer is allowed to queue.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        let popped = self.consumer.pop_slice(out);
        out[popped..].fill(0.0);
        self.backpressure
            .record_callback(out.len() / self.format.channels.max(1) as usize);

        if !self.active.load(Ordering::Acquire) {
            self.primed = false;
            return popped;
        }
        if popped > 0 {
            self.primed = true;
        }
        if popped < out.len() && self.primed {
            self.backpressure.report_underrun();
        }
        popped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(buffers: u32, max: u32, fpb: usize) -> (AudioWriter, AudioReader) {
        let bp = Arc::new(AudioBackpressure::new(buffers, max, true));
        let format = AudioFormat {
            sample_rate: 44_100,
            channels: 2,
        };
        audio_stream(format, fpb, bp, true, false)
    }

    #[test]
    fn test_underrun_ratchets_to_ceiling() {
        let bp = AudioBackpressure::new(3, 8, true);
        for _ in 0..10_000 {
            bp.report_underrun();
        }
        assert_eq!(bp.buffer_count(), 8);
        assert_eq!(bp.stats().underruns, 10_000);
    }

    #[test]
    fn test_underrun_without_auto_increase() {
        let bp = AudioBackpressure::new(3, 8, false);
        assert_eq!(bp.report_underrun(), 3);
        assert_eq!(bp.buffer_count(), 3);
        assert_eq!(bp.stats().underruns, 1);
    }

    #[test]
    fn test_user_buffer_count_is_clamped() {
        let bp = AudioBackpressure::new(3, 6, true);
        assert_eq!(bp.set_buffer_count(1), MIN_SOUND_BUFFERS);
        assert_eq!(bp.set_buffer_count(100), 6);
        assert_eq!(AudioBackpressure::new(0, 8, true).buffer_count(), MIN_SOUND_BUFFERS);
    }

    #[test]
    fn test_negotiate_sample_rate() {
        assert!(AudioFormat::negotiate(44_100, 2, 48_000).is_ok());
        assert_eq!(
            AudioFormat::negotiate(11_025, 2, 48_000),
            Err(SampleRateError::Unsupported(11_025))
        );
        assert_eq!(
            AudioFormat::negotiate(48_000, 2, 44_100),
            Err(SampleRateError::AboveNative {
                requested: 48_000,
                native: 44_100
            })
        );
    }

    #[test]
    fn test_format_for_device_falls_back() {
        assert_eq!(AudioFormat::for_device(32_000, 1, 48_000).sample_rate, 32_000);
        assert_eq!(AudioFormat::for_device(48_000, 2, 32_000).sample_rate, 32_000);
        assert_eq!(AudioFormat::for_device(96_000, 2, 48_000).sample_rate, 44_100);
        assert_eq!(AudioFormat::for_device(44_100, 0, 8_000).sample_rate, 22_050);
        assert_eq!(AudioFormat::for_device(44_100, 0, 8_000).channels, 1);
    }

    #[test]
    fn test_auto_increase_toggle_and_stats_reset() {
        let bp = AudioBackpressure::new(3, 8, true);
        bp.set_auto_increase(false);
        assert!(!bp.auto_increase());
        assert_eq!(bp.report_underrun(), 3);

        bp.set_auto_increase(true);
        assert_eq!(bp.report_underrun(), 4);
        bp.report_overrun();
        bp.record_callback(512);

        bp.clear_stats();
        assert_eq!(bp.stats(), AudioStats::default());
        // Clearing statistics leaves the buffer count alone
        assert_eq!(bp.buffer_count(), 4);
    }

    #[test]
    fn test_frames_per_buffer() {
        let format = AudioFormat::default();
        assert_eq!(format.frames_per_buffer(60.0), 735);
        assert_eq!(format.frames_per_buffer(0.0), 735);
    }

    #[test]
    fn test_writer_limited_by_buffer_count() {
        let (mut writer, _reader) = stream(2, 8, 10);
        // 2 buffers * 10 frames * 2 channels
        assert_eq!(writer.write(&[0.5; 64], false), 40);
        assert_eq!(writer.queued_samples(), 40);
        let stats = writer.backpressure.stats();
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.frames, 20);
    }

    #[test]
    fn test_fast_forward_drops_audio() {
        let (mut writer, _reader) = stream(2, 8, 10);
        assert_eq!(writer.write(&[0.5; 8], true), 0);
        assert_eq!(writer.queued_samples(), 0);
    }

    #[test]
    fn test_reader_pads_and_reports_underrun_after_priming() {
        let (mut writer, mut reader) = stream(2, 8, 4);
        writer.set_active(true);

        // Unprimed short read is start-up silence, not an underrun
        let mut out = [1.0f32; 8];
        assert_eq!(reader.fill(&mut out), 0);
        assert_eq!(out, [0.0; 8]);
        assert_eq!(reader.backpressure().stats().underruns, 0);

        writer.write(&[0.25; 8], false);
        assert_eq!(reader.fill(&mut out), 8);

        writer.write(&[0.25; 2], false);
        assert_eq!(reader.fill(&mut out), 2);
        assert_eq!(&out[2..], &[0.0; 6]);
        let bp = reader.backpressure();
        assert_eq!(bp.stats().underruns, 1);
        assert_eq!(bp.buffer_count(), 3);
        assert_eq!(bp.stats().callbacks, 3);
    }

    #[test]
    fn test_device_buffer_larger_than_queue_limit_underruns() {
        // 2 buffers * 4 frames * 2 channels = 16 queued samples at most
        let (mut writer, mut reader) = stream(2, 8, 4);
        writer.set_active(true);

        let mut out = [0.0f32; 40];
        for _ in 0..100 {
            writer.write(&[0.25; 16], false);
            assert!(reader.fill(&mut out) < out.len());
        }
        let bp = reader.backpressure();
        assert_eq!(bp.stats().underruns, 100);
        assert_eq!(bp.buffer_count(), 8);
    }

    #[test]
    fn test_inactive_stream_does_not_underrun() {
        let (mut writer, mut reader) = stream(2, 8, 4);
        writer.set_active(true);
        writer.write(&[0.25; 8], false);
        let mut out = [0.0f32; 8];
        reader.fill(&mut out);

        writer.set_active(false);
        reader.fill(&mut out);
        assert_eq!(reader.backpressure().stats().underruns, 0);
    }
}
