//! Timed workloads run by every client.
//!
//! Each driver starts one task per client and key type. A task loops until the deadline
//! (or, for presignatures, until its own work is done), counting every iteration that
//! completes. Failed iterations are logged and retried; they never stop the task. Setup
//! failures (key generation, creating the presignature directory) abort the run before any
//! task starts, and a failure to read or write a presignature file ends only the task that
//! owns it, surfacing once every task has finished.

use crate::{
    client::{Client, KeyType},
    config::{Config, Operation},
    counters::{Counters, Report},
    pool::Pool,
    Error,
};
use futures::future::join_all;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use threshold_random::Sampler;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{error, info};

/// Log at `info` when progress reporting is enabled, at `debug` otherwise.
macro_rules! progress {
    ($config:expr, $($arg:tt)+) => {
        if $config.show_progress {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

mod online;
mod presign;
mod public_key;
mod sign;

/// Message signed by every signing workload.
pub const MESSAGE: &[u8] = b"This is the message that will be signed!";

/// Length of generated key identifiers.
pub const KEY_ID_LENGTH: usize = 20;

/// Bytes signed with keys of `key_type`.
///
/// ECDSA signs the SHA-256 digest of [MESSAGE], Ed25519 signs [MESSAGE] itself.
pub fn message(key_type: KeyType) -> Vec<u8> {
    match key_type {
        KeyType::Ecdsa => Sha256::digest(MESSAGE).to_vec(),
        KeyType::Ed25519 => MESSAGE.to_vec(),
    }
}

/// A BIP32-style derivation path whose last index moves on every iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivationPath([u32; 5]);

impl Default for DerivationPath {
    fn default() -> Self {
        Self([1, 2, 3, 4, 5])
    }
}

impl DerivationPath {
    /// Move to the next path and return it.
    pub fn advance(&mut self) -> &[u32] {
        self.0[4] = self.0[4].wrapping_add(1);
        &self.0
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

/// State shared by every task of a run.
pub struct Context<C: Client, R> {
    pub config: Arc<Config>,
    pub pool: Arc<Pool<C>>,
    pub sampler: Arc<Sampler<R>>,
    pub counters: Arc<Counters>,
}

impl<C: Client, R> Clone for Context<C, R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            pool: self.pool.clone(),
            sampler: self.sampler.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<C: Client, R: RngCore + CryptoRng> Context<C, R> {
    /// Sleep for a uniformly random fraction of the configured delay.
    async fn pause(&self) -> Result<(), Error> {
        let wait = jitter(&self.sampler, self.config.delay)?;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

/// Draw a duration uniformly from `[0, delay)` (zero when `delay` is zero).
pub fn jitter<R: RngCore + CryptoRng>(
    sampler: &Sampler<R>,
    delay: Duration,
) -> Result<Duration, Error> {
    if delay.is_zero() {
        return Ok(Duration::ZERO);
    }
    let bound = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
    Ok(Duration::from_nanos(sampler.uniform_int(bound)?))
}

/// Run the configured workload to completion.
///
/// Elapsed time in the returned [Report] covers key generation and every client task.
pub async fn run<C, R>(
    config: Arc<Config>,
    pool: Arc<Pool<C>>,
    sampler: Arc<Sampler<R>>,
) -> Result<Report, Error>
where
    C: Client,
    R: RngCore + CryptoRng + Send + 'static,
{
    let start = Instant::now();
    let context = Context {
        config: config.clone(),
        pool,
        sampler,
        counters: Arc::new(Counters::default()),
    };
    let keys = if config.operation.generates_keys() {
        generate_keys(&context).await?
    } else {
        BTreeMap::new()
    };
    match config.operation {
        Operation::Sign => sign::run(&context, keys).await?,
        Operation::PresigGen => presign::run(&context, keys).await?,
        Operation::OnlineSign => online::run(&context).await?,
        Operation::GetPub => public_key::run(&context, keys).await?,
    }
    Ok(Report::new(&config, &context.counters, start.elapsed()))
}

/// Generate one key over every player for each key type with clients.
async fn generate_keys<C, R>(context: &Context<C, R>) -> Result<BTreeMap<KeyType, String>, Error>
where
    C: Client,
    R: RngCore + CryptoRng,
{
    let mut keys = BTreeMap::new();
    for key_type in context.config.key_types() {
        let key_id = context.sampler.string(KEY_ID_LENGTH)?;
        let session = context.pool.session(&context.sampler)?;
        let threshold = context.config.threshold;
        context
            .pool
            .run(|_, client| {
                let session = session.clone();
                let key_id = key_id.clone();
                async move {
                    client
                        .generate_key(key_type, &session, threshold, &key_id)
                        .await
                }
            })
            .await
            .map_err(|e| Error::KeyGeneration {
                key_type,
                source: Box::new(e),
            })?;
        info!(%key_type, key_id = %key_id, "generated key");
        keys.insert(key_type, key_id);
    }
    Ok(keys)
}

/// Return the output shared by every player, or [Error::Inconsistent] if any differ.
fn agree<T: PartialEq>(outputs: BTreeMap<u32, T>, what: &str) -> Result<Option<T>, Error> {
    let mut outputs = outputs.into_iter();
    let Some((first, expected)) = outputs.next() else {
        return Ok(None);
    };
    for (player, output) in outputs {
        if output != expected {
            return Err(Error::Inconsistent(format!(
                "player {player} returned a different {what} than player {first}"
            )));
        }
    }
    Ok(Some(expected))
}

/// Wait for every task, returning the first failure.
async fn join(handles: Vec<JoinHandle<Result<(), Error>>>) -> Result<(), Error> {
    let mut failure = None;
    for result in join_all(handles).await {
        let result = match result {
            Ok(result) => result,
            Err(e) => Err(Error::Task(e)),
        };
        if let Err(e) = result {
            error!(error = %e, "client failed");
            failure.get_or_insert(e);
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{endpoint::Endpoint, mocks, presignature::tests::scratch_dir};
    use rand::{rngs::StdRng, SeedableRng};

    /// Seeded source that stops producing bytes after a fixed number of reads.
    struct Exhausting {
        inner: StdRng,
        remaining: usize,
    }

    impl RngCore for Exhausting {
        fn next_u32(&mut self) -> u32 {
            self.inner.next_u32()
        }

        fn next_u64(&mut self) -> u64 {
            self.inner.next_u64()
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            self.inner.fill_bytes(dest)
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            if self.remaining == 0 {
                return Err(rand::Error::new("source exhausted"));
            }
            self.remaining -= 1;
            self.inner.try_fill_bytes(dest)
        }
    }

    impl CryptoRng for Exhausting {}

    /// One ECDSA client running for a second against `nodes` simulated players.
    pub(crate) fn config(operation: Operation, nodes: usize) -> Config {
        let endpoints = (0..nodes)
            .map(|i| Endpoint::parse(&format!("http://node{i}")).unwrap())
            .collect();
        let mut config = Config::new(operation, endpoints);
        config.ecdsa_clients = 1;
        config.duration = Duration::from_secs(1);
        config
    }

    /// Run `config` against `cluster`.
    pub(crate) async fn execute(
        config: Config,
        cluster: &mocks::Cluster,
    ) -> Result<Report, Error> {
        let config = Arc::new(config.validate()?);
        let pool = Pool::connect(&config.nodes, |player, _| Ok(cluster.client(player)))?;
        run(config, Arc::new(pool), Arc::new(Sampler::new())).await
    }

    #[test]
    fn test_message() {
        assert_eq!(message(KeyType::Ed25519), MESSAGE);
        let digest = message(KeyType::Ecdsa);
        assert_eq!(digest.len(), 32);
        assert_eq!(digest, Sha256::digest(MESSAGE).to_vec());
    }

    #[test]
    fn test_derivation_path() {
        let mut path = DerivationPath::default();
        assert_eq!(path.as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(path.advance(), &[1, 2, 3, 4, 6]);
        assert_eq!(path.advance(), &[1, 2, 3, 4, 7]);

        let mut path = DerivationPath([1, 2, 3, 4, u32::MAX]);
        assert_eq!(path.advance(), &[1, 2, 3, 4, 0]);
    }

    #[test]
    fn test_jitter() {
        let sampler = Sampler::new();

        // Test case 0: no delay
        assert_eq!(jitter(&sampler, Duration::ZERO).unwrap(), Duration::ZERO);

        // Test case 1: always below the delay
        let delay = Duration::from_millis(3);
        for _ in 0..1_000 {
            assert!(jitter(&sampler, delay).unwrap() < delay);
        }
    }

    #[test]
    fn test_agree() {
        // Test case 0: matching outputs
        let outputs = BTreeMap::from([(0, "a"), (1, "a"), (2, "a")]);
        assert_eq!(agree(outputs, "batch").unwrap(), Some("a"));

        // Test case 1: no outputs
        assert_eq!(agree(BTreeMap::<u32, u8>::new(), "batch").unwrap(), None);

        // Test case 2: disagreement
        let outputs = BTreeMap::from([(0, "a"), (1, "a"), (2, "b")]);
        let error = agree(outputs, "batch").unwrap_err();
        assert!(error.is_recoverable());
        assert_eq!(
            error.to_string(),
            "participants disagree: player 2 returned a different batch than player 0"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_reports_first_failure() {
        let handles = vec![
            tokio::spawn(async { Ok(()) }),
            tokio::spawn(async { Err(Error::InvalidConfig("first".into())) }),
            tokio::spawn(async { Err(Error::InvalidConfig("second".into())) }),
        ];
        let error = join(handles).await.unwrap_err();
        assert_eq!(error.to_string(), "invalid configuration: first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keygen_failure_is_fatal() {
        let cluster = mocks::Cluster::new(mocks::Config {
            reject_keygen: true,
            ..mocks::Config::default()
        });
        for operation in [Operation::Sign, Operation::PresigGen, Operation::GetPub] {
            let result = execute(config(operation, 3), &cluster).await;
            assert!(matches!(
                result,
                Err(Error::KeyGeneration {
                    key_type: KeyType::Ecdsa,
                    ..
                })
            ));
        }
        assert_eq!(cluster.completed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_sign_skips_keygen() {
        let cluster = mocks::Cluster::new(mocks::Config {
            reject_keygen: true,
            ..mocks::Config::default()
        });
        let mut config = config(Operation::OnlineSign, 3);
        config.presig_dir = scratch_dir("skips-keygen").join("missing");

        // The stored presignatures are read without creating any key first
        let result = execute(config, &cluster).await;
        assert!(matches!(result, Err(Error::Persistence { .. })));
        assert_eq!(cluster.completed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entropy_failure_is_fatal() {
        for (operation, reads) in [
            (Operation::Sign, 0),
            (Operation::Sign, 40),
            (Operation::GetPub, 40),
            (Operation::PresigGen, 40),
        ] {
            let cluster = mocks::Cluster::new(mocks::Config::default());
            let mut config = config(operation, 3);
            config.delay = Duration::from_millis(5);
            config.presig_count = 1_000;
            config.presig_dir = scratch_dir("entropy");
            let config = Arc::new(config.validate().unwrap());
            let pool =
                Pool::connect(&config.nodes, |player, _| Ok(cluster.client(player))).unwrap();
            let sampler = Sampler::from_source(Exhausting {
                inner: StdRng::seed_from_u64(reads as u64),
                remaining: reads,
            });

            // The failure ends the run instead of being retried until the deadline
            let result = run(config, Arc::new(pool), Arc::new(sampler)).await;
            assert!(
                matches!(result, Err(Error::Entropy(_))),
                "{operation} after {reads} reads: {result:?}"
            );
        }
    }
}
