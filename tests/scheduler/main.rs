#![cfg(not(loom))]
use hyphae::{CancelToken, JobHandle, JobStatus, Scheduler};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

#[path = "../util.rs"]
mod util;

mod dependencies;
mod lifecycle;

#[test]
fn every_job_runs_exactly_once() {
    const JOBS: usize = 1000;
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(4).build();
    scheduler.start_background().unwrap();

    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..JOBS).map(|_| AtomicUsize::new(0)).collect());
    let jobs: Vec<_> = (0..JOBS)
        .map(|i| {
            let runs = runs.clone();
            scheduler.spawn(move || {
                runs[i].fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    util::wait_for(&jobs);
    scheduler.stop_background().unwrap();

    for (i, runs) in runs.iter().enumerate() {
        assert_eq!(runs.load(Ordering::SeqCst), 1, "job {i}");
    }
    assert_eq!(scheduler.pending_jobs(), 0);
}

#[test]
fn main_thread_jobs_run_on_the_calling_thread() {
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(2).build();
    scheduler.start_background().unwrap();

    let main_thread = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let jobs: Vec<_> = (0..20)
        .map(|_| {
            let seen = seen.clone();
            // depend on a background job, so that some of these are released
            // from a background thread.
            let dep = scheduler.spawn(|| {});
            scheduler
                .build_job()
                .main_thread(true)
                .after(&dep)
                .schedule(move || seen.lock().unwrap().push(thread::current().id()))
        })
        .collect();

    util::drive_main_until(&scheduler, &jobs);
    scheduler.stop_background().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 20);
    assert!(seen.iter().all(|&id| id == main_thread));
}

#[test]
fn main_thread_jobs_wait_for_run_main_thread() {
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(2).build();
    scheduler.start_background().unwrap();

    let job = scheduler.schedule(|| {}, true, &[]);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(job.status(), JobStatus::Queued);

    let tick = scheduler.run_main_thread(&CancelToken::new()).unwrap();
    assert_eq!(tick.executed, 1);
    assert!(job.is_complete());
    scheduler.stop_background().unwrap();
}

#[test]
fn run_main_thread_without_work_returns_promptly() {
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(2).build();
    scheduler.start_background().unwrap();

    let started = Instant::now();
    let tick = scheduler.run_main_thread(&CancelToken::new()).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(tick.executed, 0);
    assert!(!tick.has_remaining);
    scheduler.stop_background().unwrap();
}

#[test]
fn concurrent_run_main_thread_is_rejected() {
    util::trace_init();

    let scheduler = Arc::new(Scheduler::builder().background_workers(0).build());
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    scheduler.spawn(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    });

    let driver = thread::spawn({
        let scheduler = scheduler.clone();
        move || scheduler.run_main_thread(&CancelToken::new())
    });

    started_rx.recv().unwrap();
    assert!(matches!(
        scheduler.run_main_thread(&CancelToken::new()),
        Err(hyphae::Error::MainWorkerBusy)
    ));
    release_tx.send(()).unwrap();

    let tick = driver.join().unwrap().unwrap();
    assert_eq!(tick.executed, 1);
}

#[test]
fn jobs_can_schedule_jobs() {
    util::trace_init();

    let scheduler = Arc::new(Scheduler::builder().background_workers(3).build());
    scheduler.start_background().unwrap();

    let children = Arc::new(Mutex::new(Vec::<JobHandle>::new()));
    let count = Arc::new(AtomicUsize::new(0));
    let parents: Vec<_> = (0..10)
        .map(|_| {
            let scheduler2 = scheduler.clone();
            let children = children.clone();
            let count = count.clone();
            scheduler.spawn(move || {
                for _ in 0..10 {
                    let count = count.clone();
                    let child = scheduler2.spawn(move || {
                        count.fetch_add(1, Ordering::SeqCst);
                    });
                    children.lock().unwrap().push(child);
                }
            })
        })
        .collect();

    util::wait_for(&parents);
    let children = children.lock().unwrap().clone();
    util::wait_for(&children);
    scheduler.stop_background().unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 100);
}

#[test]
fn named_jobs() {
    let scheduler = Scheduler::builder().background_workers(0).build();
    let job = scheduler.build_job().name("upload-textures").schedule(|| {});
    assert_eq!(job.name(), Some("upload-textures"));
    assert!(!job.requires_main_thread());
    assert_eq!(scheduler.job(job.id()), Some(job.clone()));

    scheduler.run_main_thread(&CancelToken::new()).unwrap();
    assert_eq!(job.status(), JobStatus::Complete);
    assert_eq!(scheduler.job(job.id()), None);
}
