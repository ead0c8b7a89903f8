//! Simulated audio device
//!
//! A thread that pulls one device buffer at a time from the session's audio stream at the
//! real-time rate a sound card would, so the backpressure logic sees genuine underruns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use framestep_core::AudioReader;
use tracing::{debug, warn};

pub struct SimulatedAudioDevice {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedAudioDevice {
    /// Start pulling `buffer_frames` frames per callback from `reader`
    pub fn spawn(mut reader: AudioReader, buffer_frames: usize) -> Result<Self> {
        let format = reader.format();
        let channels = usize::from(format.channels.max(1));
        let period =
            Duration::from_secs_f64(buffer_frames as f64 / f64::from(format.sample_rate.max(1)));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("audio-device".into())
                .spawn(move || {
                    debug!("Audio device started: {} frames every {:?}", buffer_frames, period);
                    let mut buffer = vec![0.0f32; buffer_frames * channels];
                    let mut next = Instant::now();
                    while !stop.load(Ordering::Acquire) {
                        reader.fill(&mut buffer);
                        next += period;
                        let now = Instant::now();
                        if next > now {
                            thread::sleep(next - now);
                        } else {
                            next = now;
                        }
                    }
                    debug!("Audio device stopped");
                })
                .context("Failed to spawn audio device thread")?
        };

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Audio device thread panicked");
            }
        }
    }
}

impl Drop for SimulatedAudioDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}
