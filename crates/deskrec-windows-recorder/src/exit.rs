//! Exit conditions polled once per loop iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use deskrec_capture_windows::ExitKey;

/// Non-blocking "should the loop stop now?" check.
pub trait ExitCondition {
    fn should_exit(&mut self) -> bool;
}

impl ExitCondition for ExitKey {
    fn should_exit(&mut self) -> bool {
        self.is_pressed()
    }
}

/// Cancellation flag shareable with other threads.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl ExitCondition for StopFlag {
    fn should_exit(&mut self) -> bool {
        self.is_stopped()
    }
}

/// Exits after a fixed number of polls, i.e. after `frames` iterations.
#[derive(Debug, Clone)]
pub struct FrameLimit {
    remaining: u64,
}

impl FrameLimit {
    pub fn new(frames: u64) -> Self {
        Self { remaining: frames }
    }
}

impl ExitCondition for FrameLimit {
    fn should_exit(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }
}
