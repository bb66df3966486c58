//! CLI subcommands

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use futures::future::join_all;
use kvpool::shutdown::{install_signal_handlers, wait_for_termination};
use kvpool::{ConnectionPool, PoolStats};
use kvpool_redis::{RedisClient, redis_pool};

use crate::settings::Settings;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send PING through the pool and report latency
    Ping {
        /// Total number of PINGs
        #[arg(long, short = 'n', default_value_t = 10)]
        count: usize,
        /// Concurrent callers sharing the pool
        #[arg(long, short = 'c', default_value_t = 4)]
        concurrency: usize,
    },
    /// Open the pool and print its statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ping and print statistics periodically until interrupted
    Watch {
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

pub async fn run(command: Command, settings: Settings) -> Result<()> {
    let pool = redis_pool(settings.pool, &settings.redis, settings.reconnect)
        .context("building connection pool")?;
    tracing::info!(
        endpoint = %settings.redis.redacted_url(),
        max_connections = pool.config().max_connections(),
        min_connections = pool.config().min_connections(),
        "starting connection pool"
    );

    let signals = install_signal_handlers(&pool);

    let result = match pool.initialize().await {
        Ok(()) => match command {
            Command::Ping { count, concurrency } => ping(&pool, count, concurrency).await,
            Command::Stats { json } => print_stats(&pool.stats(), json),
            Command::Watch { interval_ms } => watch(&pool, interval_ms).await,
        },
        Err(e) => Err(e).context("opening initial connections"),
    };

    signals.abort();
    pool.shutdown().await;
    result
}

async fn ping(pool: &ConnectionPool<RedisClient>, count: usize, concurrency: usize) -> Result<()> {
    let concurrency = concurrency.clamp(1, count.max(1));
    let started = Instant::now();

    let workers = (0..concurrency).map(|worker| {
        let pool = pool.clone();
        let share = count / concurrency + usize::from(worker < count % concurrency);
        async move {
            let mut latencies = Vec::with_capacity(share);
            let mut attempted = 0;
            for _ in 0..share {
                if pool.is_shutting_down() {
                    break;
                }
                attempted += 1;
                let sent = Instant::now();
                let reply = pool
                    .execute(|client: Arc<RedisClient>| async move { client.ping().await })
                    .await;
                if reply.is_some() {
                    latencies.push(sent.elapsed());
                }
            }
            (attempted, latencies)
        }
    });

    let mut attempted = 0;
    let mut latencies = Vec::with_capacity(count);
    for (tried, worker_latencies) in join_all(workers).await {
        attempted += tried;
        latencies.extend(worker_latencies);
    }

    println!(
        "{}/{} PINGs succeeded in {:?} ({} callers)",
        latencies.len(),
        attempted,
        started.elapsed(),
        concurrency
    );
    if let Some(summary) = LatencySummary::from_samples(&latencies) {
        println!("latency {}", summary);
    }
    println!("{}", format_stats(&pool.stats()));

    if count > 0 && latencies.is_empty() {
        bail!("no PING succeeded");
    }
    Ok(())
}

fn print_stats(stats: &PoolStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
    } else {
        println!("{}", format_stats(stats));
    }
    Ok(())
}

async fn watch(pool: &ConnectionPool<RedisClient>, interval_ms: u64) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let terminated = wait_for_termination();
    tokio::pin!(terminated);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut terminated => break,
        }
        if pool.is_shutting_down() {
            break;
        }

        let sent = Instant::now();
        let reply = pool
            .execute(|client: Arc<RedisClient>| async move { client.ping().await })
            .await;
        let outcome = match reply {
            Some(()) => format!("ping={:?}", sent.elapsed()),
            None => "ping=failed".to_string(),
        };
        println!("{} {}", format_stats(&pool.stats()), outcome);
    }

    Ok(())
}

fn format_stats(stats: &PoolStats) -> String {
    format!(
        "total={} available={} busy={} waiting={} max={} utilization={:.1}%",
        stats.total(),
        stats.available(),
        stats.busy(),
        stats.waiting(),
        stats.max_connections(),
        stats.utilization() * 100.0
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LatencySummary {
    min: Duration,
    avg: Duration,
    max: Duration,
}

impl LatencySummary {
    fn from_samples(samples: &[Duration]) -> Option<Self> {
        let min = samples.iter().min().copied()?;
        let max = samples.iter().max().copied()?;
        let total: Duration = samples.iter().sum();
        let avg = total / u32::try_from(samples.len()).unwrap_or(u32::MAX);
        Some(Self { min, avg, max })
    }
}

impl std::fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "min={:?} avg={:?} max={:?}", self.min, self.avg, self.max)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_format_stats() {
        let stats = PoolStats::new(1, 1, 4, 0);
        assert_eq!(
            format_stats(&stats),
            "total=2 available=1 busy=1 waiting=0 max=4 utilization=25.0%"
        );
    }

    #[test]
    fn test_latency_summary() {
        let samples = [
            Duration::from_millis(2),
            Duration::from_millis(6),
            Duration::from_millis(4),
        ];
        assert_eq!(
            LatencySummary::from_samples(&samples),
            Some(LatencySummary {
                min: Duration::from_millis(2),
                avg: Duration::from_millis(4),
                max: Duration::from_millis(6),
            })
        );
        assert_eq!(LatencySummary::from_samples(&[]), None);
    }
}
