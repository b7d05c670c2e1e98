use super::*;
use hyphae::{Error, PanicPolicy};

#[test]
fn start_twice_is_an_error() {
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(2).build();
    assert!(!scheduler.is_running());
    scheduler.start_background().unwrap();
    assert!(scheduler.is_running());
    assert!(matches!(
        scheduler.start_background(),
        Err(Error::AlreadyRunning)
    ));

    scheduler.stop_background().unwrap();
    assert!(!scheduler.is_running());
    // stopping again does nothing.
    scheduler.stop_background().unwrap();
}

#[test]
fn queued_work_survives_a_restart() {
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(2).build();
    scheduler.start_background().unwrap();
    scheduler.stop_background().unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let jobs: Vec<_> = (0..10)
        .map(|_| {
            let count = count.clone();
            scheduler.spawn(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.queued_jobs(), 10);

    scheduler.start_background().unwrap();
    util::wait_for(&jobs);
    scheduler.stop_background().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 10);
    assert_eq!(scheduler.queued_jobs(), 0);
}

#[test]
fn dropping_the_scheduler_stops_its_threads() {
    util::trace_init();

    let scheduler = Scheduler::builder()
        .background_workers(3)
        .thread_name("drop-test")
        .build();
    scheduler.start_background().unwrap();
    let job = scheduler.spawn(|| {});
    util::wait_for(&[job.clone()]);
    drop(scheduler);

    // handles outlive the scheduler.
    assert!(job.is_complete());
}

#[test]
fn background_threads_are_named() {
    util::trace_init();

    let scheduler = Scheduler::builder()
        .background_workers(1)
        .thread_name("named")
        .build();
    scheduler.start_background().unwrap();

    let name = Arc::new(Mutex::new(None));
    let job = {
        let name = name.clone();
        scheduler.spawn(move || {
            *name.lock().unwrap() = thread::current().name().map(String::from);
        })
    };
    util::wait_for(&[job]);
    scheduler.stop_background().unwrap();

    assert_eq!(name.lock().unwrap().as_deref(), Some("named-0"));
}

#[test]
fn background_panic_is_reported_on_stop() {
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(1).build();
    scheduler.start_background().unwrap();

    let bad = scheduler.spawn(|| panic!("job exploded"));
    let after = scheduler.schedule(|| {}, false, &[bad.clone()]);

    let deadline = Instant::now() + util::TIMEOUT;
    while bad.status() != JobStatus::Running {
        assert!(Instant::now() < deadline, "job never started");
        thread::yield_now();
    }

    match scheduler.stop_background() {
        Err(Error::WorkerPanicked { workers }) => assert_eq!(workers, vec![0]),
        res => panic!("expected a panicked worker, got {res:?}"),
    }
    assert_eq!(after.status(), JobStatus::Waiting);

    // the worker's deque survives the panic, and it runs new work after a
    // restart.
    scheduler.start_background().unwrap();
    let ok = scheduler.spawn(|| {});
    util::wait_for(&[ok]);
    scheduler.stop_background().unwrap();
    assert_eq!(after.status(), JobStatus::Waiting);
}

#[test]
fn isolated_panics_keep_workers_alive() {
    util::trace_init();

    let scheduler = Scheduler::builder()
        .background_workers(2)
        .panic_policy(PanicPolicy::Isolate)
        .build();
    scheduler.start_background().unwrap();

    let bad: Vec<_> = (0..4)
        .map(|i| scheduler.spawn(move || panic!("job {i} exploded")))
        .collect();
    let after = {
        let deps = bad.clone();
        scheduler.schedule(
            move || assert!(deps.iter().all(|job| job.status() == JobStatus::Panicked)),
            false,
            &bad,
        )
    };

    util::wait_for(&[after.clone()]);
    scheduler.stop_background().unwrap();
    assert_eq!(after.status(), JobStatus::Complete);
}
