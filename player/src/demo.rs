//! Demo machine: a scrolling test pattern and a square wave
//!
//! Stands in for a real emulated core. It switches resolution once, mid-run, the way a machine
//! changing video modes would.

use framestep_core::{EmuSystem, FrameContext, PixelFormat, PixmapDesc};

/// Boot-time video mode
pub const INITIAL_DESC: PixmapDesc = PixmapDesc::new(256, 224, PixelFormat::Rgb565);

/// Mode switched to at `resize_at`
pub const WIDE_DESC: PixmapDesc = PixmapDesc::new(320, 240, PixelFormat::Bgra8888);

const TONE_HZ: f32 = 440.0;
const AMPLITUDE: f32 = 0.2;

pub struct DemoSystem {
    frames: u64,
    scroll: u32,
    resize_at: Option<u64>,
    phase: f32,
    samples: Vec<f32>,
}

impl DemoSystem {
    pub fn new(resize_at: Option<u64>) -> Self {
        Self {
            frames: 0,
            scroll: 0,
            resize_at,
            phase: 0.0,
            samples: Vec::new(),
        }
    }

    /// Frames emulated so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn render_audio(&mut self, frame: &mut FrameContext<'_>) {
        let format = frame.audio_format();
        let channels = usize::from(format.channels.max(1));
        let count = (frame.frame_duration().as_secs_f64() * f64::from(format.sample_rate)).round()
            as usize;
        let step = TONE_HZ / format.sample_rate as f32;

        self.samples.clear();
        for _ in 0..count {
            let value = if self.phase < 0.5 { AMPLITUDE } else { -AMPLITUDE };
            self.samples.extend(std::iter::repeat_n(value, channels));
            self.phase = (self.phase + step).fract();
        }
        frame.write_audio(&self.samples);
    }
}

impl EmuSystem for DemoSystem {
    fn run_frame(&mut self, frame: &mut FrameContext<'_>) {
        self.frames += 1;
        // Catch up on frames the display clock skipped
        self.scroll = self.scroll.wrapping_add(frame.elapsed_frames());

        if self.resize_at == Some(self.frames) {
            frame.video().set_format(WIDE_DESC);
        }

        let scroll = self.scroll;
        if let Some(mut writer) = frame.video().start_frame() {
            let desc = writer.desc();
            let bpp = desc.format.bytes_per_pixel();
            for y in 0..desc.height {
                let row = writer.row_mut(y);
                for (x, pixel) in row.chunks_exact_mut(bpp).enumerate() {
                    let x = x as u32;
                    let color = [
                        (x.wrapping_add(scroll) ^ y) as u8,
                        (y.wrapping_add(scroll)) as u8,
                        (x ^ y.wrapping_mul(3)) as u8,
                    ];
                    desc.format.write_rgb8(color, pixel);
                }
            }
        }

        self.render_audio(frame);
    }
}
