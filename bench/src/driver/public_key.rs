//! Public key derivation queried from every player.

use super::{agree, join, Context, DerivationPath};
use crate::{
    client::{Client, KeyType},
    Error,
};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::warn;

pub(super) async fn run<C, R>(
    context: &Context<C, R>,
    keys: BTreeMap<KeyType, String>,
) -> Result<(), Error>
where
    C: Client,
    R: RngCore + CryptoRng + Send + 'static,
{
    let deadline = Instant::now() + context.config.duration;
    let mut handles = Vec::new();
    for (key_type, key_id) in keys {
        for client in 0..context.config.clients(key_type) {
            handles.push(tokio::spawn(reader(
                context.clone(),
                key_type,
                key_id.clone(),
                client,
                deadline,
            )));
        }
    }
    join(handles).await
}

async fn reader<C, R>(
    context: Context<C, R>,
    key_type: KeyType,
    key_id: String,
    client: usize,
    deadline: Instant,
) -> Result<(), Error>
where
    C: Client,
    R: RngCore + CryptoRng,
{
    let mut derivation = DerivationPath::default();
    let mut iteration = 0u64;
    while Instant::now() < deadline {
        iteration += 1;
        let path = derivation.advance().to_vec();
        let result = context
            .pool
            .run(|_, participant| {
                let key_id = key_id.clone();
                let path = path.clone();
                async move { participant.public_key(key_type, &key_id, &path).await }
            })
            .await
            .and_then(|keys| agree(keys, "public key"));
        match result {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                warn!(%key_type, client, iteration, error = %e, "public key query failed");
                continue;
            }
            Err(e) => return Err(e),
        }

        let operations = context.counters.increment(key_type);
        progress!(context.config, %key_type, operations, client, "derived public key");
        context.pause().await?;
    }
    progress!(context.config, %key_type, client, "public key reader stopped");
    Ok(())
}
