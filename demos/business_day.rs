//! Business Day Example
//!
//! Runs one business day at a simulated branch:
//! 1. Opens five random accounts and starts the scheduler and background jobs
//! 2. Watches finished transactions through a filtered event stream
//! 3. Submits ten random transactions, speeding up during peak time
//! 4. Waits for business hours to end and shuts the branch down
//! 5. Prints every account history and the security log
//!
//! Run with: cargo run --example business_day

use branch_lane::event::events;
use branch_lane::{
    BranchBuilder, BranchConfig, BranchError, Priority, Transaction, TransactionKind,
};
use rand::Rng;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    #[cfg(feature = "telemetry")]
    branch_lane::telemetry::init_branch_metrics();

    let config = BranchConfig::default();
    let branch = BranchBuilder::new(config.clone()).build()?;

    let mut finished = branch.events().subscribe_filtered(|event| {
        event.key == events::TRANSACTION_COMPLETED || event.key == events::TRANSACTION_FAILED
    });
    let watcher = tokio::spawn(async move {
        while let Some(event) = finished.recv().await {
            let field = |name: &str| event.field(name).cloned().unwrap_or_default();
            println!(
                "  [event] transaction {} finished: {}",
                field("transaction_id"),
                field("outcome")
            );
        }
    });

    branch.start().await?;

    println!("=== Branch open for {:?} ===\n", config.business_hours);

    for id in 0..10u64 {
        let (account, amount, level, kind) = {
            let mut rng = rand::thread_rng();
            let kind = match rng.gen_range(0..3) {
                0 => TransactionKind::Withdraw,
                1 => TransactionKind::Deposit,
                _ => TransactionKind::Inquiry,
            };
            (
                rng.gen_range(0..config.customers),
                rng.gen_range(50..550),
                rng.gen_range(0..4u8),
                kind,
            )
        };
        let txn = Transaction::new(id, account, amount, Priority::from_level(level)?, kind);

        match branch.submit(txn).await {
            Ok(admitted) => println!(
                "Transaction {} admitted: account {} {} {} -> {:?} lane ({} #{})",
                id, account, kind, amount, admitted.priority, admitted.station, admitted.station_index
            ),
            Err(BranchError::Rejected(reason)) => {
                println!("Transaction {} rejected: {}", id, reason)
            }
            Err(e) => return Err(e.into()),
        }

        if id % 4 == 0 && id >= 4 {
            println!("Peak time: High volume!");
            tokio::time::sleep(Duration::from_millis(50)).await;
        } else {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    branch.wait_for_close().await;
    branch.shutdown().await;
    watcher.abort();

    let stats = branch.stats().await;
    println!("\n=== Business closed ===");
    println!("Dispatched: {}", stats.dispatched);
    println!("Available funds: {}", stats.pools.available_funds);

    for account in branch.histories().await {
        if account.history.is_empty() {
            continue;
        }
        println!("\nAccount {} History (balance {}):", account.id, account.balance);
        for record in &account.history {
            println!("  {}", record);
        }
    }

    println!("\nSecurity Log:");
    for entry in branch.security_log().await {
        println!("  {}", entry);
    }

    Ok(())
}
