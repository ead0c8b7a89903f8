//! Integration tests for the frame scheduler
//!
//! Cross-component protocol properties: frame accounting, command ordering, fast-forward
//! determinism, audio backpressure and shutdown from every lifecycle state.

mod audio_tests;
mod frame_tests;
