//! Audio stream and backpressure tests across threads

use std::sync::Arc;
use std::thread;

use crate::audio::AudioBackpressure;
use crate::task::EmuSystemTask;
use crate::test_utils::{CounterSystem, frame_ts, test_backpressure, test_resources};

#[test]
fn test_underruns_from_many_threads_stop_at_ceiling() {
    let backpressure = Arc::new(AudioBackpressure::new(2, 8, true));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let backpressure = backpressure.clone();
            thread::spawn(move || {
                for _ in 0..2_500 {
                    let count = backpressure.report_underrun();
                    assert!(count <= 8);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(backpressure.buffer_count(), 8);
    assert_eq!(backpressure.stats().underruns, 10_000);
}

#[test]
fn test_audio_flows_from_worker_to_reader() {
    let backpressure = test_backpressure();
    let (resources, _video, mut reader) = test_resources(backpressure.clone());
    let mut task = EmuSystemTask::new(CounterSystem::new());
    task.start(resources).unwrap();

    for n in 0..3 {
        task.run_frame(frame_ts(n)).unwrap();
    }
    task.pause().unwrap();

    // 16 samples per frame
    assert_eq!(backpressure.stats().frames, 24);
    let mut out = [0.0f32; 32];
    assert_eq!(reader.fill(&mut out), 32);
}

#[test]
fn test_fast_forward_mutes_worker_audio() {
    let backpressure = test_backpressure();
    let (resources, _video, mut reader) = test_resources(backpressure.clone());
    let mut task = EmuSystemTask::new(CounterSystem::new());
    task.start(resources).unwrap();

    task.set_fast_forward_active(true);
    for n in 0..5 {
        task.run_frame(frame_ts(n)).unwrap();
    }
    task.pause().unwrap();

    assert_eq!(backpressure.stats().frames, 0);
    let mut out = [1.0f32; 8];
    assert_eq!(reader.fill(&mut out), 0);
    assert_eq!(out, [0.0; 8]);
}

#[test]
fn test_paused_stream_reports_no_underruns() {
    let backpressure = test_backpressure();
    let (resources, _video, mut reader) = test_resources(backpressure.clone());
    let mut task = EmuSystemTask::new(CounterSystem::new());
    task.start(resources).unwrap();

    task.run_frame(frame_ts(0)).unwrap();
    task.pause().unwrap();

    let mut out = [0.0f32; 64];
    for _ in 0..10 {
        reader.fill(&mut out);
    }
    assert_eq!(backpressure.stats().underruns, 0);
    assert_eq!(backpressure.buffer_count(), 3);
}
