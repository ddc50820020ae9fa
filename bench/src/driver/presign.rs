//! Offline presignature generation over every player, persisted per client.

use super::{agree, join, Context};
use crate::{
    client::{Client, KeyType},
    presignature::{self, Record},
    Error,
};
use rand::{CryptoRng, RngCore};
use std::{collections::BTreeMap, fs};
use tokio::time::Instant;
use tracing::{info, warn};

pub(super) async fn run<C, R>(
    context: &Context<C, R>,
    keys: BTreeMap<KeyType, String>,
) -> Result<(), Error>
where
    C: Client,
    R: RngCore + CryptoRng + Send + 'static,
{
    let dir = &context.config.presig_dir;
    fs::create_dir_all(dir).map_err(|source| Error::Persistence {
        path: dir.clone(),
        source,
    })?;

    let deadline = Instant::now() + context.config.duration;
    let mut handles = Vec::new();
    for (key_type, key_id) in keys {
        for client in 0..context.config.clients(key_type) {
            let record = Record::new(key_type, key_id.clone());
            handles.push(tokio::spawn(producer(
                context.clone(),
                record,
                client,
                deadline,
            )));
        }
    }
    join(handles).await
}

/// Fill `record` batch by batch, then write it to the client's file.
///
/// The target count is only checked between batches, so the file may hold up to one batch
/// more than requested.
async fn producer<C, R>(
    context: Context<C, R>,
    mut record: Record,
    client: usize,
    deadline: Instant,
) -> Result<(), Error>
where
    C: Client,
    R: RngCore + CryptoRng,
{
    let key_type = record.key_type();
    let target = context.config.presig_count;
    let mut iteration = 0u64;
    while Instant::now() < deadline && record.len() < target {
        iteration += 1;
        let result = batch(&context, key_type, record.key_id()).await;
        match result {
            Ok(ids) => record.extend(ids),
            Err(e) if e.is_recoverable() => {
                warn!(
                    %key_type,
                    client,
                    iteration,
                    error = %e,
                    "presignature generation failed"
                );
                continue;
            }
            Err(e) => return Err(e),
        }

        let operations = context.counters.increment(key_type);
        let generated = record.len();
        let percentage = generated as f64 / target as f64 * 100.0;
        progress!(
            context.config,
            %key_type,
            operations,
            client,
            generated,
            "{percentage:.2}% of presignatures generated"
        );
        context.pause().await?;
    }
    progress!(context.config, %key_type, client, "presignature generator stopped");

    let path = presignature::path(&context.config.presig_dir, key_type, client);
    record.store(&path)?;
    info!(
        %key_type,
        client,
        presignatures = record.len(),
        path = %path.display(),
        "stored presignatures"
    );
    Ok(())
}

/// Generate one batch with every player and return the identifiers they agree on.
async fn batch<C, R>(
    context: &Context<C, R>,
    key_type: KeyType,
    key_id: &str,
) -> Result<Vec<String>, Error>
where
    C: Client,
    R: RngCore + CryptoRng,
{
    let session = context.pool.session(&context.sampler)?;
    let count = context.config.presig_batch_size;
    let batches = context
        .pool
        .run(|_, participant| {
            let session = session.clone();
            let key_id = key_id.to_string();
            async move {
                participant
                    .generate_presignatures(key_type, &session, &key_id, count)
                    .await
            }
        })
        .await?;
    Ok(agree(batches, "presignature batch")?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::super::tests::{config, execute};
    use crate::{
        client::KeyType,
        config::Operation,
        mocks,
        presignature::{self, tests::scratch_dir, Record},
        Error,
    };
    use std::{collections::BTreeSet, fs, time::Duration};

    #[tokio::test(start_paused = true)]
    async fn test_target_count_reached() {
        let dir = scratch_dir("presign-target");
        let cluster = mocks::Cluster::new(mocks::Config::default());
        let mut config = config(Operation::PresigGen, 3);
        config.duration = Duration::from_secs(30);
        config.presig_count = 10;
        config.presig_batch_size = 5;
        config.presig_dir = dir.clone();

        let report = execute(config, &cluster).await.unwrap();
        let ecdsa = report.get(KeyType::Ecdsa).unwrap();
        assert_eq!(ecdsa.operations, 2);
        assert!(ecdsa.presignatures.is_some());

        let path = presignature::path(&dir, KeyType::Ecdsa, 0);
        let mut record = Record::load(&path, KeyType::Ecdsa).unwrap();
        assert!(record.len() >= 10);
        assert_eq!(cluster.outstanding(), record.len());

        // Identifiers are distinct
        let mut seen = BTreeSet::new();
        while let Some(id) = record.consume() {
            assert!(seen.insert(id));
        }
        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_overshoots_by_at_most_one_batch() {
        let dir = scratch_dir("presign-overshoot");
        let cluster = mocks::Cluster::new(mocks::Config::default());
        let mut config = config(Operation::PresigGen, 2);
        config.duration = Duration::from_secs(30);
        config.ed25519_clients = 2;
        config.presig_count = 7;
        config.presig_batch_size = 3;
        config.presig_dir = dir.clone();

        execute(config, &cluster).await.unwrap();
        for (key_type, clients) in [(KeyType::Ecdsa, 1), (KeyType::Ed25519, 2)] {
            for client in 0..clients {
                let path = presignature::path(&dir, key_type, client);
                assert_eq!(Record::load(&path, key_type).unwrap().len(), 9);
            }
        }
        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_generation() {
        let dir = scratch_dir("presign-deadline");
        let cluster = mocks::Cluster::new(mocks::Config {
            latency: Duration::from_millis(400),
            ..mocks::Config::default()
        });
        let mut config = config(Operation::PresigGen, 3);
        config.presig_count = 1_000;
        config.presig_dir = dir.clone();

        let report = execute(config, &cluster).await.unwrap();
        let operations = report.get(KeyType::Ecdsa).unwrap().operations;
        assert!(operations >= 1);

        let path = presignature::path(&dir, KeyType::Ecdsa, 0);
        let record = Record::load(&path, KeyType::Ecdsa).unwrap();
        assert_eq!(record.len() as u64, operations * 5);
        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batches_are_retried() {
        let dir = scratch_dir("presign-retry");
        let cluster = mocks::Cluster::new(mocks::Config::default());
        cluster.fail(3);
        let mut config = config(Operation::PresigGen, 3);
        config.presig_count = 10;
        config.presig_dir = dir.clone();

        let report = execute(config, &cluster).await.unwrap();
        assert_eq!(report.get(KeyType::Ecdsa).unwrap().operations, 2);
        let path = presignature::path(&dir, KeyType::Ecdsa, 0);
        assert_eq!(Record::load(&path, KeyType::Ecdsa).unwrap().len(), 10);
        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwritable_directory() {
        let dir = scratch_dir("presign-unwritable");
        let blocker = dir.join("file");
        fs::write(&blocker, b"").unwrap();
        let cluster = mocks::Cluster::new(mocks::Config::default());
        let mut config = config(Operation::PresigGen, 3);
        config.presig_dir = blocker.join("presigs");

        assert!(matches!(
            execute(config, &cluster).await,
            Err(Error::Persistence { .. })
        ));
        fs::remove_dir_all(dir).unwrap();
    }
}
