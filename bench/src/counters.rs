//! Completed-operation counters shared by every client and the report built from them.

use crate::{
    client::KeyType,
    config::{Config, Operation},
};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Completed operations per key type.
///
/// Only successful iterations are counted.
#[derive(Default, Debug)]
pub struct Counters {
    ecdsa: AtomicU64,
    ed25519: AtomicU64,
}

impl Counters {
    fn counter(&self, key_type: KeyType) -> &AtomicU64 {
        match key_type {
            KeyType::Ecdsa => &self.ecdsa,
            KeyType::Ed25519 => &self.ed25519,
        }
    }

    /// Record one completed operation, returning the new total.
    pub fn increment(&self, key_type: KeyType) -> u64 {
        self.counter(key_type).fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Completed operations so far.
    pub fn get(&self, key_type: KeyType) -> u64 {
        self.counter(key_type).load(Ordering::Relaxed)
    }
}

fn rate(count: f64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds == 0.0 {
        return 0.0;
    }
    count / seconds
}

/// Throughput achieved by the clients of one key type.
#[derive(Clone, Debug, PartialEq)]
pub struct Throughput {
    pub key_type: KeyType,
    pub clients: usize,
    pub operations: u64,
    /// Operations per second over the configured duration.
    pub steady: f64,
    /// Operations per second over the measured wall time.
    pub end_to_end: f64,
    /// Presignatures per second (steady, end-to-end), only for presignature generation.
    pub presignatures: Option<(f64, f64)>,
}

/// Summary of a finished run.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub throughput: Vec<Throughput>,
}

impl Report {
    /// Build the report for every key type with at least one client.
    pub fn new(config: &Config, counters: &Counters, elapsed: Duration) -> Self {
        let throughput = config
            .key_types()
            .map(|key_type| {
                let operations = counters.get(key_type);
                let count = operations as f64;
                let presignatures = (config.operation == Operation::PresigGen).then(|| {
                    let produced = count * config.presig_batch_size as f64;
                    (rate(produced, config.duration), rate(produced, elapsed))
                });
                Throughput {
                    key_type,
                    clients: config.clients(key_type),
                    operations,
                    steady: rate(count, config.duration),
                    end_to_end: rate(count, elapsed),
                    presignatures,
                }
            })
            .collect();
        Self { throughput }
    }

    /// Throughput of `key_type`, if it had any clients.
    pub fn get(&self, key_type: KeyType) -> Option<&Throughput> {
        self.throughput.iter().find(|t| t.key_type == key_type)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.throughput {
            writeln!(
                f,
                "{} operations with {} clients: {} ({:.2} ops/sec ; {:.2} ops/sec [e2e])",
                t.key_type, t.clients, t.operations, t.steady, t.end_to_end
            )?;
            if let Some((steady, end_to_end)) = t.presignatures {
                writeln!(f, " - {steady:.2} presigs/s")?;
                writeln!(f, " - {end_to_end:.2} presigs/s [e2e]")?;
            }
        }
        Ok(())
    }
}
