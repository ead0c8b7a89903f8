//! Framestep Player - headless session driver
//!
//! Runs the demo machine through an `EmuSession` at display rate, with a simulated audio
//! device pulling samples in real time.
//!
//! # Usage
//!
//! ```bash
//! framestep-player --frames 600
//! framestep-player --frames 300 --fast-forward
//! framestep-player --display-rate 50 --resize-at 120 --screenshot-every 100
//! framestep-player --device-rate 32000 --fixed-buffers
//! RUST_LOG=framestep_core=debug framestep-player
//! ```

mod audio_device;
mod demo;

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use framestep_core::pacing::frame_duration;
use framestep_core::{Config, EmuSession, SessionEvent, VideoFrame, config};

use audio_device::SimulatedAudioDevice;
use demo::{DemoSystem, INITIAL_DESC};

/// Frames per simulated device callback
const DEVICE_BUFFER_FRAMES: usize = 512;

#[derive(Parser)]
#[command(name = "framestep-player")]
#[command(author, version, about = "Headless frame scheduler demo")]
struct Args {
    /// Number of frames to run
    #[arg(long, short = 'n', default_value = "600")]
    frames: u64,

    /// Display refresh rate driving the frame clock, in Hz
    #[arg(long, default_value = "60")]
    display_rate: f64,

    /// Run faster than real time (audio muted unless configured otherwise)
    #[arg(long)]
    fast_forward: bool,

    /// Config file to use instead of the platform config
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Take a screenshot every N frames
    #[arg(long, value_name = "N")]
    screenshot_every: Option<u64>,

    /// Directory for screenshots (overrides the config)
    #[arg(long, value_name = "DIR")]
    screenshot_dir: Option<PathBuf>,

    /// Frame at which the demo machine switches video mode
    #[arg(long, value_name = "N", default_value = "120")]
    resize_at: u64,

    /// Native sample rate of the simulated audio device, in Hz
    #[arg(long, value_name = "HZ", default_value = "48000")]
    device_rate: u32,

    /// Keep the configured sound buffer count instead of growing it on underrun
    #[arg(long)]
    fixed_buffers: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    run(args)
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => config::load(),
    };
    if let Some(dir) = &args.screenshot_dir {
        config.capture.directory = Some(dir.clone());
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let resize_at = (args.resize_at > 0).then_some(args.resize_at);
    let mut session = EmuSession::with_device_rate(
        config,
        DemoSystem::new(resize_at),
        INITIAL_DESC,
        args.device_rate,
    );
    if args.fixed_buffers {
        session.set_auto_increase_buffers(false);
    }

    let reader = session
        .take_audio_reader()
        .context("Audio reader already taken")?;
    let device = session
        .config()
        .audio
        .enabled
        .then(|| SimulatedAudioDevice::spawn(reader, DEVICE_BUFFER_FRAMES))
        .transpose()?;

    session.start().context("Failed to start emulation")?;
    session.set_fast_forward_active(args.fast_forward);

    let display_period = frame_duration(args.display_rate);
    let started = Instant::now();
    let mut next_refresh = started;
    let mut checksum = 0;

    for frame in 0..args.frames {
        if let Some(every) = args.screenshot_every {
            if every > 0 && frame > 0 && frame % every == 0 {
                session.request_screenshot();
            }
        }

        session.run_frame_now()?;
        session.wait_for_finished_frame();
        for event in session.process_replies() {
            log_event(event);
        }
        checksum = session.video().with_frame(frame_checksum);

        // Display clock; fast-forward presents as fast as frames arrive
        if !args.fast_forward {
            next_refresh += display_period;
            let now = Instant::now();
            if next_refresh > now {
                thread::sleep(next_refresh - now);
            } else {
                next_refresh = now;
            }
        }
    }

    let emulated = session.with_paused_system(|system| system.frames())?;
    for event in session.process_replies() {
        log_event(event);
    }
    session.stop().context("Emulation thread did not stop cleanly")?;
    if let Some(device) = device {
        device.stop();
    }

    let elapsed = started.elapsed();
    let stats = session.audio_stats();
    info!(
        "Ran {} frames in {:.2?} ({:.1} fps), final video {}",
        emulated,
        elapsed,
        emulated as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        session.video().desc()
    );
    info!(
        "Audio: {} frames, {} callbacks (avg {:.0} frames), {} underruns, {} overruns, {} buffers",
        stats.frames,
        stats.callbacks,
        stats.avg_callback_frames,
        stats.underruns,
        stats.overruns,
        session.audio_backpressure().buffer_count()
    );
    info!("Final frame checksum: {:016x}", checksum);
    Ok(())
}

fn log_event(event: SessionEvent) {
    match event {
        SessionEvent::VideoFormatChanged(desc) => info!("Video mode changed to {}", desc),
        SessionEvent::ScreenshotTaken { num, success: true } => info!("Saved screenshot {}", num),
        SessionEvent::ScreenshotTaken {
            num,
            success: false,
        } => warn!("Screenshot {} failed", num),
        SessionEvent::FrameNotified(timestamp) => info!("Frame notified at {:?}", timestamp),
    }
}

/// FNV-1a over the frame's pixels
fn frame_checksum(frame: &VideoFrame) -> u64 {
    frame
        .pixels()
        .iter()
        .fold(0xcbf2_9ce4_8422_2325, |hash, &byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use framestep_core::{PixelFormat, PixmapDesc};

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["framestep-player"]);
        assert_eq!(args.frames, 600);
        assert_eq!(args.display_rate, 60.0);
        assert!(!args.fast_forward);
        assert_eq!(args.resize_at, 120);
        assert!(args.screenshot_every.is_none());
        assert_eq!(args.device_rate, 48_000);
        assert!(!args.fixed_buffers);
    }

    #[test]
    fn test_checksum_tracks_pixels() {
        let mut frame = VideoFrame::new(PixmapDesc::new(2, 2, PixelFormat::Rgb565));
        let blank = frame_checksum(&frame);
        frame.pixels_mut()[3] = 1;
        assert_ne!(frame_checksum(&frame), blank);
    }

    #[test]
    fn test_short_fast_forward_run() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("shots");
        let args = Args::parse_from([
            "framestep-player",
            "--frames",
            "30",
            "--fast-forward",
            "--resize-at",
            "10",
            "--screenshot-every",
            "20",
            "--screenshot-dir",
            dir.to_str().unwrap(),
            "--device-rate",
            "22050",
            "--fixed-buffers",
        ]);
        run(args).unwrap();
        assert!(dir.join("screenshot.000.png").exists());
    }
}
