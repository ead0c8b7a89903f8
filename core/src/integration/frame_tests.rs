//! Frame accounting, ordering and format-change tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::message::Reply;
use crate::task::EmuSystemTask;
use crate::test_utils::{
    CounterSystem, TEST_TIMEOUT, frame_ts, test_backpressure, test_resources, wait_until,
};
use crate::video::{PixelFormat, PixmapDesc};

fn run_frames(fast_forward_pattern: impl Fn(u64) -> bool, frames: u64) -> (u64, Vec<u8>) {
    let (resources, video, _reader) = test_resources(test_backpressure());
    let mut task = EmuSystemTask::new(CounterSystem::new());
    task.start(resources).unwrap();

    for n in 0..frames {
        task.set_fast_forward_active(fast_forward_pattern(n));
        task.run_frame(frame_ts(n)).unwrap();
    }
    let state = task.with_paused_system(|system| system.state).unwrap();
    let pixels = video.with_frame(|frame| frame.pixels().to_vec());
    (state, pixels)
}

#[test]
fn test_completions_match_run_frames() {
    let (resources, _video, _reader) = test_resources(test_backpressure());
    let mut task = EmuSystemTask::new(CounterSystem::new().skipping_video_every(3));
    task.start(resources).unwrap();

    let mut waited = 0;
    for n in 0..50 {
        task.run_frame(frame_ts(n)).unwrap();
        if n % 7 == 0 {
            task.wait_for_finished_frame();
            waited += 1;
        }
    }
    task.pause().unwrap();
    assert!(waited > 0);
    assert_eq!(task.frames_completed(), 50);
}

#[test]
fn test_presentation_never_sees_torn_frame() {
    let (resources, video, _reader) = test_resources(test_backpressure());
    let mut task = EmuSystemTask::new(
        CounterSystem::new().with_frame_delay(Duration::from_micros(200)),
    );
    task.start(resources).unwrap();

    for n in 0..40 {
        task.run_frame(frame_ts(n)).unwrap();
        task.wait_for_finished_frame();
        if task.frames_completed() > 0 {
            // Every pixel of a finished frame comes from the same step
            let consistent = video.with_frame(|frame| {
                let base = frame.pixels()[0];
                frame
                    .pixels()
                    .iter()
                    .enumerate()
                    .all(|(i, &p)| p == base.wrapping_add(i as u8))
            });
            assert!(consistent, "torn frame after RunFrame {n}");
        }
    }
}

#[test]
fn test_in_progress_flag_covers_one_frame_at_a_time() {
    let (resources, _video, _reader) = test_resources(test_backpressure());
    let mut task = EmuSystemTask::new(
        CounterSystem::new().with_frame_delay(Duration::from_millis(2)),
    );
    task.start(resources).unwrap();
    for n in 0..10 {
        task.run_frame(frame_ts(n)).unwrap();
    }

    // Watch the flag from a third thread: a rising edge may only be one frame ahead of the
    // completion count
    let tracker = task.frame_tracker();
    let stop = AtomicBool::new(false);
    let max_gap = thread::scope(|scope| {
        let watcher = scope.spawn(|| {
            let mut was = false;
            let mut edges = 0u64;
            let mut max_gap = 0u64;
            while !stop.load(Ordering::Acquire) {
                let now = tracker.video_frame_is_in_progress();
                if now && !was {
                    edges += 1;
                    max_gap = max_gap.max(edges.saturating_sub(tracker.frames_completed()));
                }
                was = now;
            }
            max_gap
        });
        assert!(wait_until(TEST_TIMEOUT, || tracker.frames_completed() == 10));
        stop.store(true, Ordering::Release);
        watcher.join().unwrap()
    });
    assert!(max_gap <= 1, "two frames in progress at once");
    assert!(!task.video_frame_is_in_progress());
}

#[test]
fn test_run_frame_then_pause_ordering() {
    let system = CounterSystem::new();
    let log = system.log();
    let (resources, _video, _reader) = test_resources(test_backpressure());
    let mut task = EmuSystemTask::new(system);
    task.start(resources).unwrap();

    task.run_frame(frame_ts(1)).unwrap();
    task.pause().unwrap();

    // Frame t1's effects are visible as soon as the pause completes
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].timestamp, frame_ts(1));
}

#[test]
fn test_fast_forward_does_not_change_state() {
    let reference = run_frames(|_| false, 60);
    let toggled = run_frames(|n| (n / 5) % 2 == 0, 60);
    let always = run_frames(|_| true, 60);
    assert_eq!(reference, toggled);
    assert_eq!(reference, always);
}

#[test]
fn test_format_change_blocks_next_frame_until_acknowledged() {
    let desc = PixmapDesc::new(32, 16, PixelFormat::Bgra8888);
    let (resources, video, _reader) = test_resources(test_backpressure());
    let mut task = EmuSystemTask::new(CounterSystem::new().resizing_at(2, desc));
    task.start(resources).unwrap();

    task.run_frame(frame_ts(0)).unwrap();
    task.run_frame(frame_ts(1)).unwrap();
    task.run_frame(frame_ts(2)).unwrap();

    let ack = match task.wait_reply(TEST_TIMEOUT) {
        Some(Reply::VideoFormatChanged {
            desc: changed,
            ack: Some(ack),
            ..
        }) => {
            assert_eq!(changed, desc);
            ack
        }
        other => panic!("expected format change, got {other:?}"),
    };

    // Worker is parked inside frame 2 until the acknowledgement
    thread::sleep(Duration::from_millis(50));
    assert_eq!(task.frames_completed(), 1);

    video.set_format(desc);
    ack.signal();
    assert!(wait_until(TEST_TIMEOUT, || task.frames_completed() == 3));
    assert_eq!(video.desc(), desc);
}
