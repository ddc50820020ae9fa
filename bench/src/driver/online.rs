//! Online signing that consumes presignatures stored by a previous generation run.

use super::{join, message, Context, DerivationPath};
use crate::{
    client::{Client, KeyType},
    presignature::{self, Record},
    Error,
};
use rand::{CryptoRng, RngCore};
use tokio::time::Instant;
use tracing::{info, warn};

pub(super) async fn run<C, R>(context: &Context<C, R>) -> Result<(), Error>
where
    C: Client,
    R: RngCore + CryptoRng + Send + 'static,
{
    let deadline = Instant::now() + context.config.duration;
    let mut handles = Vec::new();
    for key_type in context.config.key_types() {
        for client in 0..context.config.clients(key_type) {
            handles.push(tokio::spawn(consumer(
                context.clone(),
                key_type,
                client,
                deadline,
            )));
        }
    }
    join(handles).await
}

/// Sign once per stored presignature until the deadline or the record runs out.
async fn consumer<C, R>(
    context: Context<C, R>,
    key_type: KeyType,
    client: usize,
    deadline: Instant,
) -> Result<(), Error>
where
    C: Client,
    R: RngCore + CryptoRng,
{
    let file = presignature::path(&context.config.presig_dir, key_type, client);
    let mut record = Record::load(&file, key_type)?;
    info!(
        %key_type,
        client,
        presignatures = record.len(),
        path = %file.display(),
        "loaded presignatures"
    );

    let message = message(key_type);
    let key_id = record.key_id().to_string();
    let mut derivation = DerivationPath::default();
    let mut iteration = 0u64;
    while Instant::now() < deadline {
        // A presignature is spent as soon as it is handed out, even if signing fails
        let Some(presignature_id) = record.consume() else {
            break;
        };
        iteration += 1;
        let path = derivation.advance().to_vec();
        let result = context
            .pool
            .run(|_, participant| {
                let key_id = key_id.clone();
                let presignature_id = presignature_id.clone();
                let path = path.clone();
                let message = message.clone();
                async move {
                    participant
                        .sign_with_presignature(
                            key_type,
                            &key_id,
                            &presignature_id,
                            &path,
                            &message,
                        )
                        .await
                }
            })
            .await;
        match result {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                warn!(
                    %key_type,
                    client,
                    iteration,
                    presignature_id = %presignature_id,
                    error = %e,
                    "online signing failed"
                );
                continue;
            }
            Err(e) => return Err(e),
        }

        let operations = context.counters.increment(key_type);
        progress!(
            context.config,
            %key_type,
            operations,
            client,
            remaining = record.len(),
            "signed with presignature"
        );
        context.pause().await?;
    }
    progress!(context.config, %key_type, client, "online signer stopped");
    Ok(())
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
    use std::{fs, time::Duration};

    #[tokio::test(start_paused = true)]
    async fn test_consumes_generated_presignatures() {
        let dir = scratch_dir("online-consume");
        let cluster = mocks::Cluster::new(mocks::Config::default());

        // Produce exactly 10 presignatures
        let mut offline = config(Operation::PresigGen, 3);
        offline.duration = Duration::from_secs(30);
        offline.presig_count = 10;
        offline.presig_dir = dir.clone();
        execute(offline.clone(), &cluster).await.unwrap();
        assert_eq!(cluster.outstanding(), 10);

        // Consume every one of them, once
        let mut online = offline;
        online.operation = Operation::OnlineSign;
        let report = execute(online, &cluster).await.unwrap();
        assert_eq!(report.get(KeyType::Ecdsa).unwrap().operations, 10);
        assert_eq!(cluster.outstanding(), 0);
        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_presignatures_are_not_reused() {
        let dir = scratch_dir("online-failures");
        let cluster = mocks::Cluster::new(mocks::Config::default());
        let mut offline = config(Operation::PresigGen, 3);
        offline.presig_count = 10;
        offline.presig_dir = dir.clone();
        execute(offline.clone(), &cluster).await.unwrap();

        cluster.fail(4);
        let mut online = offline;
        online.operation = Operation::OnlineSign;
        let report = execute(online, &cluster).await.unwrap();
        assert_eq!(report.get(KeyType::Ecdsa).unwrap().operations, 6);
        assert_eq!(cluster.outstanding(), 0);
        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_file() {
        let dir = scratch_dir("online-empty");
        Record::new(KeyType::Ecdsa, "key".into())
            .store(&presignature::path(&dir, KeyType::Ecdsa, 0))
            .unwrap();

        let cluster = mocks::Cluster::new(mocks::Config::default());
        let mut config = config(Operation::OnlineSign, 3);
        config.presig_dir = dir.clone();
        let report = execute(config, &cluster).await.unwrap();
        assert_eq!(report.get(KeyType::Ecdsa).unwrap().operations, 0);

        // No key generation, no signing
        assert_eq!(cluster.completed(), 0);
        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file() {
        let dir = scratch_dir("online-missing");
        let cluster = mocks::Cluster::new(mocks::Config::default());
        let mut config = config(Operation::OnlineSign, 3);
        config.presig_dir = dir.clone();
        assert!(matches!(
            execute(config, &cluster).await,
            Err(Error::Persistence { .. })
        ));
        fs::remove_dir_all(dir).unwrap();
    }
}
