use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use moveref::jobs::{JobQueueConfig, QueuedJobDispatcher};
use moveref::{
    Actor, ChangeEvent, EventOrigin, InMemoryRepository, MoveEventProcessor, PathPrefixConfigResolver,
    PropertyConfigResolver, ResourceConfiguration, CONFIG_PROPERTY,
};

const FOLDERS: usize = 64;

fn seeded_repo() -> (Arc<InMemoryRepository>, Vec<ChangeEvent>) {
    let repo = Arc::new(InMemoryRepository::default());
    repo.batch(Actor::Anonymous, |b| {
        b.add_node("/content", "sling:Folder")?;
        b.add_node("/content/dam", "sling:OrderedFolder")?;
        for i in 0..FOLDERS {
            let path = format!("/content/dam/folder-{i}");
            b.add_node(&path, "sling:OrderedFolder")?;
            // Every other folder opts in, so half the batch dispatches.
            b.set_property(
                &path,
                CONFIG_PROPERTY,
                json!({"moveSettings": {"updateReferencesOnMove": i % 2 == 0}}),
            )?;
        }
        Ok(())
    })
    .unwrap();
    repo.flush().unwrap();

    let events = (0..FOLDERS)
        .map(|i| {
            ChangeEvent::moved(
                format!("/content/old/folder-{i}"),
                format!("/content/dam/folder-{i}"),
                "sling:OrderedFolder",
                EventOrigin::SameInstance,
            )
        })
        .collect();
    (repo, events)
}

fn bench_property_config_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_batch");
    group.throughput(Throughput::Elements(FOLDERS as u64));

    group.bench_function("property_config", |b| {
        b.iter_custom(|iters| {
            let (repo, events) = seeded_repo();
            let (jobs, queue) = QueuedJobDispatcher::new(JobQueueConfig::default());
            let processor = MoveEventProcessor::new(repo, Arc::new(PropertyConfigResolver), Arc::new(jobs));

            let start = Instant::now();
            for _ in 0..iters {
                processor.handle_batch(&events);
                queue.drain();
            }
            start.elapsed()
        })
    });

    group.bench_function("prefix_config", |b| {
        b.iter_custom(|iters| {
            let (repo, events) = seeded_repo();
            let configs = PathPrefixConfigResolver::new()
                .with("/content", ResourceConfiguration::with_update(false))
                .with("/content/dam", ResourceConfiguration::with_update(true));
            let (jobs, queue) = QueuedJobDispatcher::new(JobQueueConfig::default());
            let processor = MoveEventProcessor::new(repo, Arc::new(configs), Arc::new(jobs));

            let start = Instant::now();
            for _ in 0..iters {
                processor.handle_batch(&events);
                queue.drain();
            }
            start.elapsed()
        })
    });

    group.finish();
}

fn bench_aborted_batch(c: &mut Criterion) {
    c.bench_function("handle_batch/resolution_miss", |b| {
        b.iter_custom(|iters| {
            let (repo, _) = seeded_repo();
            let (jobs, _queue) = QueuedJobDispatcher::new(JobQueueConfig::default());
            let processor = MoveEventProcessor::new(repo, Arc::new(PropertyConfigResolver), Arc::new(jobs));
            let events = vec![ChangeEvent::moved(
                "/content/a",
                "/content/missing",
                "nt:folder",
                EventOrigin::SameInstance,
            )];

            let start = Instant::now();
            for _ in 0..iters {
                processor.handle_batch(&events);
            }
            start.elapsed()
        })
    });
}

criterion_group!(batch, bench_property_config_batch, bench_aborted_batch);
criterion_main!(batch);
