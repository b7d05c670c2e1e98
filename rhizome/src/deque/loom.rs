use super::*;
use crate::loom::{self, alloc::Track, thread};

fn item(value: usize) -> Track<usize> {
    Track::new(value)
}

fn steal_one(stealer: Stealer<Track<usize>>) -> impl FnOnce() -> Option<usize> {
    move || loop {
        match stealer.try_steal() {
            Ok(item) => return Some(item.into_inner()),
            Err(TryStealError::Empty) => return None,
            Err(TryStealError::Contended) => thread::yield_now(),
        }
    }
}

#[test]
fn pop_and_steal_race_for_last_element() {
    loom::model(|| {
        let (owner, stealer) = WorkStealingDeque::with_capacity(2);
        owner.push_bottom(item(1));

        let thief = thread::spawn(steal_one(stealer));
        let popped = owner.try_pop_bottom().map(Track::into_inner);
        let stolen = thief.join().unwrap();

        tracing::info!(?popped, ?stolen);
        match (popped, stolen) {
            (Some(1), None) | (None, Some(1)) => {}
            (popped, stolen) => panic!(
                "the last element must be taken exactly once; popped={popped:?}, stolen={stolen:?}"
            ),
        }
        assert!(owner.is_empty());
    })
}

#[test]
fn steal_during_growth() {
    loom::model(|| {
        let (owner, stealer) = WorkStealingDeque::with_capacity(2);
        owner.push_bottom(item(0));
        owner.push_bottom(item(1));

        let thief = thread::spawn(steal_one(stealer));

        // the buffer is full, so this push grows it while the thief may be
        // reading through the old buffer.
        owner.push_bottom(item(2));

        let mut popped = Vec::new();
        while let Some(item) = owner.try_pop_bottom() {
            popped.push(item.into_inner());
        }
        let stolen = thief.join().unwrap();

        tracing::info!(?popped, ?stolen);
        if let Some(stolen) = stolen {
            // a thief only ever takes from the top.
            assert_eq!(stolen, 0);
            assert!(!popped.contains(&stolen));
            assert_eq!(popped, vec![2, 1]);
        } else {
            assert_eq!(popped, vec![2, 1, 0]);
        }
    })
}

#[test]
fn two_thieves_and_owner() {
    loom::model(|| {
        let (owner, stealer) = WorkStealingDeque::with_capacity(2);
        owner.push_bottom(item(0));
        owner.push_bottom(item(1));

        let thief1 = thread::spawn(steal_one(stealer.clone()));
        let thief2 = thread::spawn(steal_one(stealer));

        let popped = owner.try_pop_bottom().map(Track::into_inner);
        let mut taken: Vec<usize> = popped.into_iter().collect();
        taken.extend(thief1.join().unwrap());
        taken.extend(thief2.join().unwrap());
        while let Some(item) = owner.try_pop_bottom() {
            taken.push(item.into_inner());
        }

        tracing::info!(?taken);
        taken.sort_unstable();
        assert_eq!(taken, vec![0, 1]);
    })
}

#[test]
fn dropping_the_deque_does_not_leak() {
    loom::model(|| {
        let (owner, stealer) = WorkStealingDeque::with_capacity(2);
        for i in 0..3 {
            owner.push_bottom(item(i));
        }

        let thief = thread::spawn(steal_one(stealer));
        drop(owner);
        let stolen = thief.join().unwrap();
        tracing::info!(?stolen);
        // whatever was not stolen is dropped with the deque; loom checks that
        // every `Track` was released.
    })
}
