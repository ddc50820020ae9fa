//! Measure the throughput of a threshold signing service under concurrent load.
//!
//! A run connects one [client::Client] to every node of the service, optionally generates fresh
//! keys, and then starts one task per configured client. Every task repeats a single operation
//! until the configured duration has elapsed:
//!
//! * `sign`: sign with a uniformly random subset of signers (see [pool::Pool::subset]).
//! * `presigGen`: generate batches of presignatures with every node and store them on disk
//!   (see [presignature]).
//! * `onlineSign`: sign with the presignatures stored by a previous `presigGen` run.
//! * `getpub`: derive public keys from every node.
//!
//! Completed operations are counted per key type and summarized in a [counters::Report].
//!
//! # Example
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//! use threshold_bench::{config::{Config, Operation}, driver, endpoint::Endpoint, mocks, pool::Pool};
//! use threshold_random::Sampler;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let nodes: Vec<Endpoint> = (0..3)
//!     .map(|i| format!("http://node{i}:8500").parse().unwrap())
//!     .collect();
//! let mut config = Config::new(Operation::Sign, nodes);
//! config.ecdsa_clients = 2;
//! config.duration = Duration::from_secs(1);
//! let config = Arc::new(config.validate().unwrap());
//!
//! let cluster = mocks::Cluster::new(mocks::Config::default());
//! let pool = Pool::connect(&config.nodes, |player, _| Ok(cluster.client(player))).unwrap();
//! let report = driver::run(config, Arc::new(pool), Arc::new(Sampler::new())).await.unwrap();
//! println!("{report}");
//! # }
//! ```

pub mod client;
pub mod config;
pub mod counters;
pub mod driver;
pub mod endpoint;
mod error;
pub mod mocks;
pub mod pool;
pub mod presignature;

pub use error::Error;

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
