use anchored::{AccessError, AnchorTable, Obj, SharedRef, Worker, WorkerError};
use std::sync::Arc;

#[test]
fn test_round_trip_between_units() -> anyhow::Result<()> {
    let x = Worker::start()?;
    let y = Worker::start()?;

    let shared = x
        .execute((), |()| SharedRef::new(String::from("made on x")))
        .result()?;

    // On y the value is confined to x.
    let (shared, outcome) = y
        .execute(shared, |shared| {
            let outcome = shared.get().map(|_| ());
            (shared, outcome)
        })
        .result()?;
    assert_eq!(
        outcome,
        Err(AccessError::CrossThread {
            owner: x.id(),
            caller: y.id(),
        })
    );

    // Back on x the original value is unchanged.
    let value = x
        .execute(shared, |shared| shared.get().map(|obj| obj.get().cloned()))
        .result()?;
    assert_eq!(value, Ok(Ok(String::from("made on x"))));
    Ok(())
}

#[test]
fn test_same_identity_after_transfer() -> anyhow::Result<()> {
    let worker = Worker::start()?;
    let obj = Obj::new(vec![3u8, 2, 1]);
    let shared = SharedRef::create(obj.clone());

    let returned = worker.execute(shared, |shared| shared).result()?;
    assert!(Obj::ptr_eq(&returned.get()?, &obj));
    Ok(())
}

#[test]
fn test_dispose_on_one_unit_visible_after_handoff() -> anyhow::Result<()> {
    let x = Worker::start()?;
    let y = Worker::start()?;
    let shared = x.execute((), |()| SharedRef::new(10u32)).result()?;

    let shared = y
        .execute(shared, |shared| {
            shared.dispose();
            shared
        })
        .result()?;

    let outcome = x.execute(shared, |shared| shared.get().map(|_| ())).result()?;
    assert_eq!(outcome, Err(AccessError::Disposed));
    Ok(())
}

#[test]
fn test_frozen_value_shared_by_many_units() -> anyhow::Result<()> {
    let obj = Obj::new(String::from("everyone"));
    obj.freeze()?;
    let shared = SharedRef::create(obj);

    let workers = (0..4).map(|_| Worker::start()).collect::<Result<Vec<_>, _>>()?;
    let futures: Vec<_> = workers
        .iter()
        .map(|worker| {
            worker.execute(shared.clone(), |shared| {
                shared.get().map(|obj| obj.get().map(String::len))
            })
        })
        .collect();

    for future in futures {
        assert_eq!(future.result()?, Ok(Ok(8)));
    }
    Ok(())
}

#[test]
fn test_value_created_on_worker_is_owned_by_it() -> anyhow::Result<()> {
    let worker = Worker::start()?;
    let obj = worker.execute((), |()| Obj::new(1u8)).result()?;
    assert_eq!(obj.owner(), worker.id());
    assert!(obj.get().unwrap_err().is_cross_thread());

    // Only the owner can freeze it.
    assert!(obj.freeze().is_err());
    let frozen = worker
        .execute(obj.clone(), |obj| obj.freeze().map(|()| obj))
        .result()??;
    assert_eq!(*frozen.get()?, 1);
    Ok(())
}

#[test]
fn test_payload_dropped_after_termination_is_finalized() -> anyhow::Result<()> {
    let table = Arc::new(AnchorTable::new());
    let obj = Obj::new(String::from("late"));
    let weak = obj.downgrade();
    let shared = SharedRef::create_in(&table, obj);

    let worker = Worker::start()?;
    worker.request_termination().result()?;
    assert!(worker.is_terminated());

    let outcome = worker.execute(shared, |shared| shared.is_disposed()).result();
    assert!(matches!(outcome, Err(WorkerError::Terminated)));

    // The rejected payload carried the last handle.
    assert!(weak.upgrade().is_none());
    assert_eq!(table.stats().disposed, 1);
    Ok(())
}
