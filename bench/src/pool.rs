//! Participants of a run and random subsets of them.
//!
//! A [Pool] is built once before any client starts and never changes afterwards, so it can be
//! shared by every task (and every [Pool::subset] call) without synchronization.

use crate::{
    client::{self, Client, Session},
    endpoint::Endpoint,
    Error,
};
use futures::future::join_all;
use rand::{CryptoRng, RngCore};
use std::{collections::BTreeMap, future::Future};
use threshold_random::Sampler;

/// Length of generated session identifiers.
pub const SESSION_ID_LENGTH: usize = 32;

/// Minimum number of participants required by a threshold protocol.
pub const MIN_PLAYERS: usize = 2;

/// Immutable mapping from player index to client.
pub struct Pool<C: Client> {
    clients: BTreeMap<u32, C>,
}

impl<C: Client> Pool<C> {
    /// Create a pool from already constructed clients.
    pub fn new(clients: BTreeMap<u32, C>) -> Result<Self, Error> {
        if clients.len() < MIN_PLAYERS {
            return Err(Error::InvalidConfig(format!(
                "at least {MIN_PLAYERS} players are required, got {}",
                clients.len()
            )));
        }
        Ok(Self { clients })
    }

    /// Construct one client per endpoint, indexing players by position.
    ///
    /// Stops at the first endpoint that cannot be connected.
    pub fn connect<F>(endpoints: &[Endpoint], mut connector: F) -> Result<Self, Error>
    where
        F: FnMut(u32, &Endpoint) -> Result<C, client::Error>,
    {
        let mut clients = BTreeMap::new();
        for (player, endpoint) in (0u32..).zip(endpoints) {
            let client =
                connector(player, endpoint).map_err(|source| Error::Connect { player, source })?;
            clients.insert(player, client);
        }
        Self::new(clients)
    }

    /// Number of players.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if the pool holds no players.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Player indices in ascending order.
    pub fn players(&self) -> impl Iterator<Item = u32> + '_ {
        self.clients.keys().copied()
    }

    /// Create a fresh session spanning every player.
    pub fn session<R: RngCore + CryptoRng>(
        &self,
        sampler: &Sampler<R>,
    ) -> Result<Session, Error> {
        let id = sampler.string(SESSION_ID_LENGTH)?;
        Ok(Session::new(id, self.players().collect()))
    }

    /// Pick `size` players uniformly at random and create a fresh session for them.
    pub fn subset<R: RngCore + CryptoRng>(
        &self,
        sampler: &Sampler<R>,
        size: usize,
    ) -> Result<Subset<C>, Error> {
        if size == 0 || size > self.len() {
            return Err(Error::InvalidConfig(format!(
                "subset size must be in [1, {}], got {size}",
                self.len()
            )));
        }
        let mut players: Vec<u32> = self.players().collect();
        sampler.shuffle(&mut players)?;
        players.truncate(size);
        players.sort_unstable();

        let clients = players
            .iter()
            .map(|player| (*player, self.clients[player].clone()))
            .collect();
        let id = sampler.string(SESSION_ID_LENGTH)?;
        Ok(Subset {
            session: Session::new(id, players),
            clients,
        })
    }

    /// Invoke `f` once per player concurrently and wait for all of them.
    pub async fn run<T, F, Fut>(&self, f: F) -> Result<BTreeMap<u32, T>, Error>
    where
        F: Fn(u32, C) -> Fut,
        Fut: Future<Output = Result<T, client::Error>>,
    {
        run_clients(&self.clients, f).await
    }
}

/// Players chosen for a single collective operation.
pub struct Subset<C: Client> {
    session: Session,
    clients: BTreeMap<u32, C>,
}

impl<C: Client> Subset<C> {
    /// Session shared by every chosen player.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Invoke `f` once per chosen player concurrently and wait for all of them.
    pub async fn run<T, F, Fut>(&self, f: F) -> Result<BTreeMap<u32, T>, Error>
    where
        F: Fn(u32, C) -> Fut,
        Fut: Future<Output = Result<T, client::Error>>,
    {
        run_clients(&self.clients, f).await
    }
}

/// Run `f` against every client, returning each player's output or the failure of the
/// lowest-indexed player that failed.
///
/// All calls are awaited even if one fails early: a collective operation only resolves once
/// every participant has been invoked.
async fn run_clients<C, T, F, Fut>(
    clients: &BTreeMap<u32, C>,
    f: F,
) -> Result<BTreeMap<u32, T>, Error>
where
    C: Client,
    F: Fn(u32, C) -> Fut,
    Fut: Future<Output = Result<T, client::Error>>,
{
    let calls = clients
        .iter()
        .map(|(player, client)| f(*player, client.clone()));
    let results = join_all(calls).await;

    let mut outputs = BTreeMap::new();
    for (player, result) in clients.keys().zip(results) {
        match result {
            Ok(output) => {
                outputs.insert(*player, output);
            }
            Err(source) => {
                return Err(Error::Operation {
                    player: *player,
                    source,
                })
            }
        }
    }
    Ok(outputs)
}
