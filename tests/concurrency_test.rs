use anchored::config::AnchorConfig;
use anchored::{AccessError, AnchorTable, Obj, SharedRef, Worker};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn small_table() -> Arc<AnchorTable> {
    Arc::new(AnchorTable::with_config(&AnchorConfig { segment_capacity: 2 }).unwrap())
}

#[test]
fn test_k_way_dispose_on_workers() -> anyhow::Result<()> {
    const K: usize = 8;
    let table = small_table();
    let shared = SharedRef::create_in(&table, Obj::new(String::from("target")));

    let workers = (0..K).map(|_| Worker::start()).collect::<Result<Vec<_>, _>>()?;
    let futures: Vec<_> = workers
        .iter()
        .map(|worker| worker.execute(shared.clone(), |shared| shared.dispose()))
        .collect();
    for future in futures {
        future.result()?;
    }

    assert!(shared.is_disposed());
    assert_eq!(table.stats().disposed, 1);
    for worker in &workers {
        let outcome = worker.execute(shared.clone(), |shared| shared.get().map(|_| ())).result()?;
        assert_eq!(outcome, Err(AccessError::Disposed));
    }
    assert_eq!(shared.get().unwrap_err(), AccessError::Disposed);
    Ok(())
}

#[test]
fn test_parallel_dispose_single_transition() {
    let table = small_table();
    let handles: Vec<_> = (0..64)
        .map(|i| SharedRef::create_in(&table, Obj::new(i)))
        .collect();

    handles.par_iter().for_each(|shared| {
        (0..16).into_par_iter().for_each(|_| shared.dispose());
    });

    let stats = table.stats();
    assert_eq!(stats.created, 64);
    assert_eq!(stats.disposed, 64);
    assert_eq!(stats.released, 64);
    assert!(handles.iter().all(SharedRef::is_disposed));
}

#[test]
fn test_dispose_get_race_yields_value_or_disposed() {
    const READERS: usize = 4;

    for round in 0..100 {
        let table = small_table();
        let obj = Obj::new_frozen(round);
        let shared = SharedRef::create_in(&table, obj.clone());
        let barrier = Arc::new(Barrier::new(READERS + 1));
        let disposed_seen = Arc::new(AtomicUsize::new(0));

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let shared = shared.clone();
                let obj = obj.clone();
                let barrier = Arc::clone(&barrier);
                let disposed_seen = Arc::clone(&disposed_seen);
                thread::spawn(move || {
                    barrier.wait();
                    let mut disposed = false;
                    for _ in 0..100 {
                        match shared.get() {
                            Ok(got) => {
                                assert!(!disposed, "value observed after disposal");
                                assert!(Obj::ptr_eq(&got, &obj));
                                assert_eq!(*got.get().unwrap(), round);
                            }
                            Err(AccessError::Disposed) => disposed = true,
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                    if disposed {
                        disposed_seen.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        barrier.wait();
        shared.dispose();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(shared.get().unwrap_err(), AccessError::Disposed);
        let stats = table.stats();
        assert_eq!(stats.disposed, 1);
        assert_eq!(stats.released, 1);
        assert!(disposed_seen.load(Ordering::Relaxed) <= READERS);
    }
}

#[test]
fn test_churn_recycles_slots() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 500;
    let table = small_table();

    thread::scope(|s| {
        for t in 0..THREADS {
            let table = &table;
            s.spawn(move || {
                let mut stale = Vec::new();
                for i in 0..ROUNDS {
                    let shared = SharedRef::create_in(table, Obj::new((t, i)));
                    assert_eq!(*shared.get().unwrap().get().unwrap(), (t, i));
                    stale.push(shared.handle());
                    drop(shared);
                }
                // Every earlier handle stays dead, even when its slot was reused.
                for handle in stale {
                    assert!(table.is_disposed(handle));
                    assert!(!table.dispose(handle));
                }
            });
        }
    });

    let stats = table.stats();
    assert_eq!(stats.created, (THREADS * ROUNDS) as u64);
    assert_eq!(stats.disposed, stats.created);
    assert_eq!(stats.released, stats.created);
}

#[test]
fn test_foreign_units_always_refused_while_live() {
    let table = small_table();
    let shared = SharedRef::create_in(&table, Obj::new(vec![0u8; 8]));
    let owner = shared.get().unwrap().owner();

    let refused: usize = (0..4)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(move || {
                let caller = anchored::UnitId::current();
                (0..100)
                    .filter(|_| shared.get().map(|_| ()) == Err(AccessError::CrossThread { owner, caller }))
                    .count()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .sum();

    assert_eq!(refused, 400);
    assert!(shared.get().is_ok());
}
