//! jobq demo - drive a queue through its paces
//!
//! Pushes a batch of sample jobs with mixed priorities (one of them
//! failing), prints every event the queue emits, and exits once the queue
//! reports drain.

use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::Result;
use rand::Rng;
use serde_json::json;
use tracing::info;

use jobq::{EventKind, JobQueue, QueueConfig, QueueEvent};

#[derive(Parser)]
#[command(name = "jobq", about = "In-process priority job queue demo")]
struct Cli {
    /// Maximum simultaneous running jobs
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// Stats event period in milliseconds
    #[arg(long, default_value_t = 2000)]
    stats_interval: u64,

    /// Number of sample jobs to push
    #[arg(long, default_value_t = 8)]
    jobs: usize,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// The failing job and the awaited urgent job pushed after the batch
const SHOWCASE_JOBS: usize = 2;

/// The queue caps pending + running at the concurrency limit, so the sample
/// batch must leave room for the showcase jobs or the pushes get rejected
fn sample_batch_size(jobs: usize, limit: usize) -> usize {
    jobs.min(limit.saturating_sub(SHOWCASE_JOBS))
}

fn setup_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let queue = JobQueue::new(QueueConfig {
        concurrency_limit: cli.concurrency,
        stats_interval_ms: cli.stats_interval,
    });

    // Drain fires once the queue goes fully idle; that's our exit signal
    let (drain_tx, mut drain_rx) = tokio::sync::mpsc::unbounded_channel();

    queue.on(EventKind::Done, |event| {
        if let QueueEvent::Done { id, result } = event {
            println!("{} job {} -> {}", "done ".green(), id, result);
        }
    });
    queue.on(EventKind::Error, |event| {
        if let QueueEvent::Error { id, error } = event {
            println!("{} job {} -> {}", "error".red(), id, error);
        }
    });
    queue.on(EventKind::Stats, |event| {
        if let QueueEvent::Stats { jobs_per_second } = event {
            println!("{} {:.1} jobs/s", "stats".blue(), jobs_per_second);
        }
    });
    queue.on(EventKind::Drain, move |_| {
        println!("{}", "drain: no more jobs to do".yellow());
        let _ = drain_tx.send(());
    });

    // A batch of sleepy jobs with mixed priorities, sized to fit capacity
    let batch = sample_batch_size(cli.jobs, queue.concurrency_limit());
    if batch < cli.jobs {
        println!(
            "{} capacity {} fits {} sample jobs alongside the showcase jobs",
            "note ".yellow(),
            queue.concurrency_limit(),
            batch
        );
    }

    for n in 0..batch {
        let priority = rand::rng().random_range(1..=10);
        let latency = Duration::from_millis(rand::rng().random_range(50..250));

        queue
            .push(
                async move {
                    tokio::time::sleep(latency).await;
                    Ok(json!({ "job": n, "slept_ms": latency.as_millis() as u64 }))
                },
                Some(priority),
            )
            .await?;
    }

    // One job that fails, to show containment
    let failing = match queue
        .push(async { Err(eyre::eyre!("simulated failure")) }, Some(4))
        .await
    {
        Ok(id) => Some(id),
        Err(err) => {
            println!("{} {}", "push ".red(), err);
            None
        }
    };

    // And one urgent job we explicitly wait on
    let urgent = match queue
        .push(
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(json!("urgent finished"))
            },
            Some(1),
        )
        .await
    {
        Ok(id) => Some(id),
        Err(err) => {
            println!("{} {}", "push ".red(), err);
            None
        }
    };

    info!(pending = queue.queue_len().await, "starting dispatch");
    queue.start().await?;

    if let Some(urgent) = urgent {
        match queue.wait_for(urgent).await {
            Ok(result) => println!("{} job {} -> {}", "await".cyan(), urgent, result),
            Err(err) => println!("{} job {} -> {}", "await".cyan(), urgent, err),
        }
    }
    if let Some(failing) = failing
        && let Err(err) = queue.wait_for(failing).await
    {
        println!("{} job {} -> {}", "await".cyan(), failing, err);
    }

    drain_rx.recv().await;
    queue.pause().await;

    let snapshot = queue.snapshot().await;
    println!(
        "processed {} jobs (pending {}, running {})",
        snapshot.processed, snapshot.pending, snapshot.running
    );

    Ok(())
}
