use super::*;

#[test]
fn chain_runs_in_order() {
    const LEN: usize = 200;
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(4).build();
    scheduler.start_background().unwrap();

    let next = Arc::new(AtomicUsize::new(0));
    let mut prev: Option<JobHandle> = None;
    for i in 0..LEN {
        let next = next.clone();
        let job = move || {
            let seen = next.fetch_add(1, Ordering::SeqCst);
            assert_eq!(seen, i, "job {i} ran out of order");
        };
        let deps: Vec<_> = prev.iter().cloned().collect();
        prev = Some(scheduler.schedule(job, false, &deps));
    }

    let last = prev.unwrap();
    util::wait_for(&[last.clone()]);
    scheduler.stop_background().unwrap();

    assert_eq!(next.load(Ordering::SeqCst), LEN);
    assert_eq!(last.status(), JobStatus::Complete);
}

#[test]
fn dependent_starts_after_dependency_returns() {
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(4).build();
    scheduler.start_background().unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    let mut checks = Vec::new();
    for _ in 0..50 {
        let a = {
            let finished = finished.clone();
            scheduler.spawn(move || {
                thread::sleep(Duration::from_micros(100));
                finished.fetch_add(1, Ordering::SeqCst);
            })
        };
        let b = {
            let deps = [a.clone()];
            let a = a.clone();
            scheduler.schedule(
                move || assert!(a.is_complete(), "dependency {a:?} had not completed"),
                false,
                &deps,
            )
        };
        checks.push(b);
    }

    util::wait_for(&checks);
    scheduler.stop_background().unwrap();

    assert_eq!(finished.load(Ordering::SeqCst), 50);
    assert!(checks.iter().all(|b| b.status() == JobStatus::Complete));
}

#[test]
fn diamond() {
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(3).build();
    scheduler.start_background().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let log = log.clone();
        move || log.lock().unwrap().push(name)
    };

    let top = scheduler.spawn(record("top"));
    let left = scheduler.schedule(record("left"), false, &[top.clone()]);
    let right = scheduler.schedule(record("right"), false, &[top.clone()]);
    let bottom = scheduler
        .build_job()
        .main_thread(true)
        .depends_on(&[left, right])
        .schedule(record("bottom"));

    util::drive_main_until(&scheduler, &[bottom]);
    scheduler.stop_background().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0], "top");
    assert_eq!(log[3], "bottom");
}

#[test]
fn wide_fan_out() {
    const WIDTH: usize = 256;
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(4).build();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let root = scheduler.spawn(move || release_rx.recv().unwrap());

    let count = Arc::new(AtomicUsize::new(0));
    let leaves: Vec<_> = (0..WIDTH)
        .map(|_| {
            let count = count.clone();
            scheduler.schedule(
                move || {
                    count.fetch_add(1, Ordering::SeqCst);
                },
                false,
                &[root.clone()],
            )
        })
        .collect();
    assert!(leaves.iter().all(|leaf| leaf.status() == JobStatus::Waiting));

    scheduler.start_background().unwrap();
    release_tx.send(()).unwrap();
    util::wait_for(&leaves);
    scheduler.stop_background().unwrap();

    assert_eq!(count.load(Ordering::SeqCst), WIDTH);
}

#[test]
fn dependency_completed_before_scheduling() {
    util::trace_init();

    let scheduler = Scheduler::builder().background_workers(2).build();
    scheduler.start_background().unwrap();

    let done = scheduler.spawn(|| {});
    util::wait_for(&[done.clone()]);

    let ran = Arc::new(AtomicUsize::new(0));
    let after = {
        let ran = ran.clone();
        scheduler.schedule(
            move || {
                ran.fetch_add(1, Ordering::SeqCst);
            },
            false,
            &[done],
        )
    };
    util::wait_for(&[after]);
    scheduler.stop_background().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

/// Each job depends on a random subset of the jobs scheduled before it.
///
/// Every entry in `edges` is a (dependent, dependency) pair of raw indices,
/// reduced modulo the job count so that dependencies always precede their
/// dependents.
fn run_random_dag(jobs: usize, edges: &[(usize, usize)], background_workers: usize) {
    let scheduler = Scheduler::builder()
        .background_workers(background_workers)
        .build();
    scheduler.start_background().unwrap();

    let mut deps = vec![Vec::new(); jobs];
    for &(a, b) in edges {
        let (a, b) = (a % jobs, b % jobs);
        if a != b {
            deps[a.max(b)].push(a.min(b));
        }
    }

    let order = Arc::new(Mutex::new(Vec::with_capacity(jobs)));
    let mut handles: Vec<JobHandle> = Vec::with_capacity(jobs);
    for (i, deps) in deps.iter().enumerate() {
        let order = order.clone();
        let dep_handles: Vec<_> = deps.iter().map(|&d| handles[d].clone()).collect();
        let main_thread = i % 3 == 0;
        let handle = scheduler
            .build_job()
            .main_thread(main_thread)
            .depends_on(&dep_handles)
            .schedule(move || order.lock().unwrap().push(i));
        handles.push(handle);
    }

    util::drive_main_until(&scheduler, &handles);
    scheduler.stop_background().unwrap();

    let order = order.lock().unwrap();
    assert_eq!(order.len(), jobs);
    let mut position = vec![usize::MAX; jobs];
    for (pos, &job) in order.iter().enumerate() {
        assert_eq!(position[job], usize::MAX, "job {job} ran twice");
        position[job] = pos;
    }
    for (job, deps) in deps.iter().enumerate() {
        for &dep in deps {
            assert!(
                position[dep] < position[job],
                "job {job} ran before its dependency {dep}"
            );
        }
    }
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(64))]

    #[test]
    fn random_dags_respect_dependencies(
        jobs in 1usize..40,
        edges in proptest::collection::vec((0usize..40, 0usize..40), 0..120),
        background_workers in 0usize..4,
    ) {
        util::trace_init();
        run_random_dag(jobs, &edges, background_workers);
    }
}
