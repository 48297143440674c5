//! Performance benchmarks for branch-lane
//!
//! Run with: cargo bench

use branch_lane::{
    AccountStore, BranchBuilder, BranchConfig, FixedEntropy, Priority, QueuedTransaction,
    Transaction, TransactionKind, TransactionQueue,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn accounts(count: u32) -> AccountStore {
    let mut store = AccountStore::new(1000);
    for id in 0..count {
        store.open(id, 10_000, false, false);
    }
    store
}

fn bench_claim_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("claim_throughput");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let queue = TransactionQueue::new(size);
                for id in 0..size as u64 {
                    let priority = Priority::ALL[(id % 4) as usize];
                    let txn = Transaction::new(id, 0, 100, priority, TransactionKind::Deposit);
                    queue
                        .enqueue(priority, QueuedTransaction::new(txn))
                        .await
                        .unwrap();
                }
                while queue.claim_next().await.is_some() {}
            });
        });
    }

    group.finish();
}

fn bench_escalation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("promote_medium_withdrawals", |b| {
        b.to_async(&rt).iter(|| async {
            let queue = TransactionQueue::new(500);
            for id in 0..500u64 {
                let kind = if id % 2 == 0 {
                    TransactionKind::Withdraw
                } else {
                    TransactionKind::Deposit
                };
                let txn = Transaction::new(id, 0, 100, Priority::Medium, kind);
                queue
                    .enqueue(Priority::Medium, QueuedTransaction::new(txn))
                    .await
                    .unwrap();
            }
            queue
                .promote(Priority::Medium, Priority::Critical, |txn| {
                    txn.kind == TransactionKind::Withdraw
                })
                .await
        });
    });
}

fn bench_admission_and_processing(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("admission_and_processing");

    for size in [10, 100].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let config = BranchConfig::deterministic()
                    .with_pools(8, 8, 8)
                    .with_capacity(size as i64, size as i64)
                    .with_lane_capacity(size);
                let branch = BranchBuilder::new(config)
                    .with_accounts(accounts(4))
                    .with_entropy(Arc::new(FixedEntropy { hit: false }))
                    .build()
                    .unwrap();
                branch.start().await.unwrap();

                for id in 0..size as u64 {
                    let priority = Priority::ALL[(id % 4) as usize];
                    let txn = Transaction::new(
                        id,
                        (id % 4) as u32,
                        100,
                        priority,
                        TransactionKind::Deposit,
                    );
                    // rejections when stations run out are part of the workload
                    let _ = branch.submit(txn).await;
                }

                branch
                    .drain(std::time::Duration::from_secs(10))
                    .await
                    .unwrap();
                branch.shutdown().await;
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_claim_throughput,
    bench_escalation,
    bench_admission_and_processing
);
criterion_main!(benches);
