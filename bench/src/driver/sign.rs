//! Interactive signing with a fresh random subset of signers on every iteration.

use super::{join, message, Context, DerivationPath};
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
            handles.push(tokio::spawn(signer(
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

async fn signer<C, R>(
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
    let message = message(key_type);
    let mut derivation = DerivationPath::default();
    let mut iteration = 0u64;
    while Instant::now() < deadline {
        iteration += 1;
        let path = derivation.advance().to_vec();
        let subset = context
            .pool
            .subset(&context.sampler, context.config.signers)?;
        let session = subset.session().clone();
        progress!(context.config, %key_type, client, players = ?session.players(), "signing");

        let result = subset
            .run(|_, participant| {
                let session = session.clone();
                let key_id = key_id.clone();
                let path = path.clone();
                let message = message.clone();
                async move {
                    participant
                        .sign(key_type, &session, &key_id, &path, &message)
                        .await
                }
            })
            .await;
        match result {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                warn!(%key_type, client, iteration, error = %e, "signing failed");
                continue;
            }
            Err(e) => return Err(e),
        }

        let signatures = context.counters.increment(key_type);
        progress!(context.config, %key_type, signatures, "signed");
        context.pause().await?;
    }
    progress!(context.config, %key_type, client, "signer stopped");
    Ok(())
}
