//! Moves a shared reference between two workers and shows each check firing.
//!
//! Run with `cargo run --example cross_unit`. Set `ANCHORED_CONFIG` to a JSON
//! file to override the defaults.

use anchored::{AccessError, RuntimeConfig, SharedRef, Worker};
use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env().context("loading configuration")?;
    anchored::init(&config).context("initializing the anchor table")?;

    let producer = Worker::start_with(&config.workers)?;
    let consumer = Worker::start_with(&config.workers)?;
    println!("producer is {}, consumer is {}", producer.id(), consumer.id());

    let shared = producer
        .execute((), |()| SharedRef::new(vec![1u32, 2, 3]))
        .result()?;

    let (shared, refused) = consumer
        .execute(shared, |shared| {
            let outcome = shared.get().map(|_| ());
            (shared, outcome)
        })
        .result()?;
    match refused {
        Err(err @ AccessError::CrossThread { .. }) => println!("consumer: {err}"),
        other => anyhow::bail!("expected a cross-thread refusal, got {other:?}"),
    }

    let sum = producer
        .execute(shared.clone(), |shared| -> Result<u32, AccessError> {
            let obj = shared.get()?;
            Ok(obj.get()?.iter().sum())
        })
        .result()??;
    println!("producer: sum is {sum}");

    consumer.execute(shared.clone(), |shared| shared.dispose()).result()?;
    let after = producer
        .execute(shared, |shared| shared.get().map(|_| ()))
        .result()?;
    println!("producer after dispose: {after:?}");

    let stats = anchored::AnchorTable::global().stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
