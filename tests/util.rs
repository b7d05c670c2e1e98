#![allow(dead_code)]
use hyphae::{CancelToken, JobHandle, Scheduler};
use std::{
    thread,
    time::{Duration, Instant},
};

pub const TIMEOUT: Duration = Duration::from_secs(30);

pub fn trace_init() {
    use tracing_subscriber::{filter::LevelFilter, EnvFilter};
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::DEBUG.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}

/// Waits for every job in `jobs` to finish running on the background workers.
#[track_caller]
pub fn wait_for(jobs: &[JobHandle]) {
    let deadline = Instant::now() + TIMEOUT;
    while !jobs.iter().all(JobHandle::is_complete) {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for jobs: {jobs:#?}"
        );
        thread::yield_now();
    }
}

/// Drives the main-thread worker until every job in `jobs` has finished.
#[track_caller]
pub fn drive_main_until(scheduler: &Scheduler, jobs: &[JobHandle]) {
    let deadline = Instant::now() + TIMEOUT;
    let cancel = CancelToken::new();
    while !jobs.iter().all(JobHandle::is_complete) {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for jobs: {jobs:#?}"
        );
        scheduler
            .run_main_thread(&cancel)
            .expect("main-thread worker should not be busy");
        thread::yield_now();
    }
}
