//! An in-process signer set that behaves like a threshold signing service.
//!
//! Collective operations rendezvous on their session: each participant's call blocks until
//! every participant named in the session has arrived with the same request, after which all
//! of them observe the same outcome. Presignatures are single-use, operations can be forced to
//! fail, and every call costs a configurable latency (measured on the tokio clock, so tests
//! running with paused time advance instantly).

use crate::client::{self, KeyType, Session};
use futures::channel::oneshot;
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Behavior of a [Cluster].
#[derive(Clone, Debug)]
pub struct Config {
    /// Time spent by each participant before its request reaches the cluster.
    pub latency: Duration,
    /// Number of upcoming operations (anything but key generation) to fail.
    pub failures: u64,
    /// Reject every key generation.
    pub reject_keygen: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            failures: 0,
            reject_keygen: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Request {
    GenerateKey {
        key_type: KeyType,
        threshold: u32,
        key_id: String,
    },
    Sign {
        key_type: KeyType,
        key_id: String,
        path: Vec<u32>,
        message: Vec<u8>,
    },
    GeneratePresignatures {
        key_type: KeyType,
        key_id: String,
        count: u64,
    },
    SignWithPresignature {
        key_type: KeyType,
        key_id: String,
        presignature_id: String,
        path: Vec<u32>,
        message: Vec<u8>,
    },
}

#[derive(Clone, Debug)]
enum Output {
    Unit,
    Bytes(Vec<u8>),
    Presignatures(Vec<String>),
}

type Outcome = Result<Output, String>;

struct Pending {
    players: Vec<u32>,
    request: Request,
    arrived: BTreeMap<u32, oneshot::Sender<Outcome>>,
}

struct Key {
    threshold: u32,
    players: Vec<u32>,
    secret: [u8; 32],
}

struct Presignature {
    key_type: KeyType,
    key_id: String,
    spent: bool,
}

struct State {
    failures: u64,
    reject_keygen: bool,
    keys: HashMap<(KeyType, String), Key>,
    presignatures: HashMap<String, Presignature>,
    pending: HashMap<String, Pending>,
    next_presignature: u64,
    completed: u64,
}

impl State {
    fn key(&self, key_type: KeyType, key_id: &str) -> Result<&Key, String> {
        self.keys
            .get(&(key_type, key_id.to_string()))
            .ok_or_else(|| format!("unknown {key_type} key {key_id}"))
    }

    fn inject_failure(&mut self) -> Result<(), String> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err("injected failure".into());
        }
        Ok(())
    }

    /// Register `player` at `rendezvous`, running the request once everyone has arrived.
    fn join(
        &mut self,
        player: u32,
        rendezvous: String,
        players: Vec<u32>,
        request: Request,
    ) -> Result<oneshot::Receiver<Outcome>, String> {
        if !players.contains(&player) {
            return Err(format!("player {player} is not a participant"));
        }
        let pending = self
            .pending
            .entry(rendezvous.clone())
            .or_insert_with(|| Pending {
                players: players.clone(),
                request: request.clone(),
                arrived: BTreeMap::new(),
            });
        if pending.players != players || pending.request != request {
            // Everyone waiting on a conflicting rendezvous fails with the caller
            if let Some(pending) = self.pending.remove(&rendezvous) {
                for (_, sender) in pending.arrived {
                    let _ = sender.send(Err("conflicting session descriptor".into()));
                }
            }
            return Err("conflicting session descriptor".into());
        }
        if pending.arrived.contains_key(&player) {
            return Err(format!("player {player} joined twice"));
        }
        let (sender, receiver) = oneshot::channel();
        pending.arrived.insert(player, sender);
        if pending.arrived.len() < pending.players.len() {
            return Ok(receiver);
        }

        let Some(pending) = self.pending.remove(&rendezvous) else {
            return Ok(receiver);
        };
        let outcome = self.execute(&pending.players, pending.request);
        if outcome.is_ok() {
            self.completed += 1;
        }
        for (_, sender) in pending.arrived {
            let _ = sender.send(outcome.clone());
        }
        Ok(receiver)
    }

    fn execute(&mut self, players: &[u32], request: Request) -> Outcome {
        match request {
            Request::GenerateKey {
                key_type,
                threshold,
                key_id,
            } => {
                if self.reject_keygen {
                    return Err("key generation disabled".into());
                }
                if threshold == 0 || threshold as usize >= players.len() {
                    return Err(format!("invalid threshold {threshold}"));
                }
                let index = (key_type, key_id);
                if self.keys.contains_key(&index) {
                    return Err(format!("{key_type} key {} already exists", index.1));
                }
                let secret = Sha256::new()
                    .chain_update(key_type.name())
                    .chain_update(&index.1)
                    .finalize()
                    .into();
                self.keys.insert(
                    index,
                    Key {
                        threshold,
                        players: players.to_vec(),
                        secret,
                    },
                );
                Ok(Output::Unit)
            }
            Request::Sign {
                key_type,
                key_id,
                path,
                message,
            } => {
                let key = self.key(key_type, &key_id)?;
                if players.len() <= key.threshold as usize {
                    return Err(format!("{} signers cannot meet the threshold", players.len()));
                }
                if !players.iter().all(|p| key.players.contains(p)) {
                    return Err("signer does not hold a share".into());
                }
                let signature = sign(&key.secret, &path, &message);
                self.inject_failure()?;
                Ok(Output::Bytes(signature))
            }
            Request::GeneratePresignatures {
                key_type,
                key_id,
                count,
            } => {
                if self.key(key_type, &key_id)?.players != players {
                    return Err("presignatures require every key holder".into());
                }
                self.inject_failure()?;
                let ids = (0..count)
                    .map(|_| {
                        self.next_presignature += 1;
                        let id = format!("presig-{}", self.next_presignature);
                        self.presignatures.insert(
                            id.clone(),
                            Presignature {
                                key_type,
                                key_id: key_id.clone(),
                                spent: false,
                            },
                        );
                        id
                    })
                    .collect();
                Ok(Output::Presignatures(ids))
            }
            Request::SignWithPresignature {
                key_type,
                key_id,
                presignature_id,
                path,
                message,
            } => {
                let secret = self.key(key_type, &key_id)?.secret;
                let presignature = self
                    .presignatures
                    .get_mut(&presignature_id)
                    .ok_or_else(|| format!("unknown presignature {presignature_id}"))?;
                if presignature.key_type != key_type || presignature.key_id != key_id {
                    return Err(format!("presignature {presignature_id} belongs to another key"));
                }
                if presignature.spent {
                    return Err(format!("presignature {presignature_id} already used"));
                }
                presignature.spent = true;
                self.inject_failure()?;
                Ok(Output::Bytes(sign(&secret, &path, &message)))
            }
        }
    }
}

fn derive(secret: &[u8; 32], path: &[u32]) -> Sha256 {
    let mut hasher = Sha256::new().chain_update(secret);
    for index in path {
        hasher.update(index.to_be_bytes());
    }
    hasher
}

fn sign(secret: &[u8; 32], path: &[u32], message: &[u8]) -> Vec<u8> {
    derive(secret, path).chain_update(message).finalize().to_vec()
}

/// A simulated signer set shared by all of its [Client]s.
#[derive(Clone)]
pub struct Cluster {
    latency: Duration,
    state: Arc<Mutex<State>>,
}

impl Cluster {
    pub fn new(config: Config) -> Self {
        Self {
            latency: config.latency,
            state: Arc::new(Mutex::new(State {
                failures: config.failures,
                reject_keygen: config.reject_keygen,
                keys: HashMap::new(),
                presignatures: HashMap::new(),
                pending: HashMap::new(),
                next_presignature: 0,
                completed: 0,
            })),
        }
    }

    /// Handle for `player`.
    pub fn client(&self, player: u32) -> Client {
        Client {
            player,
            cluster: self.clone(),
        }
    }

    /// Number of operations that completed successfully.
    pub fn completed(&self) -> u64 {
        self.state.lock().unwrap().completed
    }

    /// Number of presignatures generated but not yet used.
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.presignatures.values().filter(|p| !p.spent).count()
    }

    /// Fail the next `failures` operations other than key generation.
    pub fn fail(&self, failures: u64) {
        self.state.lock().unwrap().failures = failures;
    }
}

/// One participant of a [Cluster].
#[derive(Clone)]
pub struct Client {
    player: u32,
    cluster: Cluster,
}

impl Client {
    async fn collective(
        &self,
        rendezvous: String,
        players: Vec<u32>,
        request: Request,
    ) -> Result<Output, client::Error> {
        tokio::time::sleep(self.cluster.latency).await;
        let receiver = {
            let mut state = self.cluster.state.lock().unwrap();
            state
                .join(self.player, rendezvous, players, request)
                .map_err(client::Error::Rejected)?
        };
        receiver
            .await
            .map_err(|_| client::Error::Rejected("rendezvous abandoned".into()))?
            .map_err(client::Error::Rejected)
    }

    async fn session(&self, session: &Session, request: Request) -> Result<Output, client::Error> {
        self.collective(session.id().to_string(), session.players().to_vec(), request)
            .await
    }
}

fn unexpected(output: Output) -> client::Error {
    client::Error::Rejected(format!("unexpected output: {output:?}"))
}

impl client::Client for Client {
    async fn generate_key(
        &self,
        key_type: KeyType,
        session: &Session,
        threshold: u32,
        key_id: &str,
    ) -> Result<(), client::Error> {
        let request = Request::GenerateKey {
            key_type,
            threshold,
            key_id: key_id.to_string(),
        };
        match self.session(session, request).await? {
            Output::Unit => Ok(()),
            output => Err(unexpected(output)),
        }
    }

    async fn sign(
        &self,
        key_type: KeyType,
        session: &Session,
        key_id: &str,
        path: &[u32],
        message: &[u8],
    ) -> Result<Vec<u8>, client::Error> {
        let request = Request::Sign {
            key_type,
            key_id: key_id.to_string(),
            path: path.to_vec(),
            message: message.to_vec(),
        };
        match self.session(session, request).await? {
            Output::Bytes(signature) => Ok(signature),
            output => Err(unexpected(output)),
        }
    }

    async fn generate_presignatures(
        &self,
        key_type: KeyType,
        session: &Session,
        key_id: &str,
        count: u64,
    ) -> Result<Vec<String>, client::Error> {
        let request = Request::GeneratePresignatures {
            key_type,
            key_id: key_id.to_string(),
            count,
        };
        match self.session(session, request).await? {
            Output::Presignatures(ids) => Ok(ids),
            output => Err(unexpected(output)),
        }
    }

    async fn sign_with_presignature(
        &self,
        key_type: KeyType,
        key_id: &str,
        presignature_id: &str,
        path: &[u32],
        message: &[u8],
    ) -> Result<Vec<u8>, client::Error> {
        // Presignature signing has no session: holders of the key meet on the presignature
        let players = {
            let state = self.cluster.state.lock().unwrap();
            state
                .key(key_type, key_id)
                .map_err(client::Error::Rejected)?
                .players
                .clone()
        };
        let request = Request::SignWithPresignature {
            key_type,
            key_id: key_id.to_string(),
            presignature_id: presignature_id.to_string(),
            path: path.to_vec(),
            message: message.to_vec(),
        };
        let rendezvous = format!("presig:{presignature_id}");
        match self.collective(rendezvous, players, request).await? {
            Output::Bytes(signature) => Ok(signature),
            output => Err(unexpected(output)),
        }
    }

    async fn public_key(
        &self,
        key_type: KeyType,
        key_id: &str,
        path: &[u32],
    ) -> Result<Vec<u8>, client::Error> {
        tokio::time::sleep(self.cluster.latency).await;
        let mut state = self.cluster.state.lock().unwrap();
        let key = state.key(key_type, key_id).map_err(client::Error::Rejected)?;
        if !key.players.contains(&self.player) {
            return Err(client::Error::Rejected(format!(
                "player {} holds no share of {key_id}",
                self.player
            )));
        }
        let public = derive(&key.secret, path).finalize().to_vec();
        state.inject_failure().map_err(client::Error::Rejected)?;
        state.completed += 1;
        Ok(public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client as _;
    use futures::future::join_all;

    fn cluster() -> (Cluster, Vec<Client>) {
        let cluster = Cluster::new(Config::default());
        let clients = (0..3).map(|i| cluster.client(i)).collect();
        (cluster, clients)
    }

    async fn keygen(clients: &[Client], key_id: &str) {
        let session = Session::new("keygen".into(), vec![0, 1, 2]);
        let results = join_all(
            clients
                .iter()
                .map(|c| c.generate_key(KeyType::Ecdsa, &session, 1, key_id)),
        )
        .await;
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collective_sign() {
        let (cluster, clients) = cluster();
        keygen(&clients, "key").await;

        // Test case 0: every participant receives the same signature
        let session = Session::new("s1".into(), vec![0, 2]);
        let signatures = join_all(
            [&clients[0], &clients[2]]
                .iter()
                .map(|c| c.sign(KeyType::Ecdsa, &session, "key", &[1, 2], b"msg")),
        )
        .await;
        let first = signatures[0].as_ref().unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(signatures[1].as_ref().unwrap(), first);
        assert_eq!(cluster.completed(), 2);

        // Test case 1: unknown key
        let session = Session::new("s2".into(), vec![0, 1]);
        let results = join_all(
            clients[..2]
                .iter()
                .map(|c| c.sign(KeyType::Ed25519, &session, "key", &[], b"msg")),
        )
        .await;
        assert!(results.iter().all(|r| r.is_err()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicting_descriptor() {
        let (_, clients) = cluster();
        keygen(&clients, "key").await;
        let a = Session::new("s".into(), vec![0, 1]);
        let b = Session::new("s".into(), vec![0, 2]);
        let (first, second) = futures::join!(
            clients[0].sign(KeyType::Ecdsa, &a, "key", &[], b"msg"),
            clients[2].sign(KeyType::Ecdsa, &b, "key", &[], b"msg"),
        );
        assert!(first.is_err());
        assert!(second.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presignatures_single_use() {
        let (cluster, clients) = cluster();
        keygen(&clients, "key").await;

        let session = Session::new("p".into(), vec![0, 1, 2]);
        let batches = join_all(
            clients
                .iter()
                .map(|c| c.generate_presignatures(KeyType::Ecdsa, &session, "key", 3)),
        )
        .await;
        let ids = batches[0].as_ref().unwrap().clone();
        assert_eq!(ids.len(), 3);
        assert!(batches.iter().all(|b| b.as_ref().unwrap() == &ids));
        assert_eq!(cluster.outstanding(), 3);

        // Test case 0: first use succeeds
        let used = join_all(
            clients
                .iter()
                .map(|c| c.sign_with_presignature(KeyType::Ecdsa, "key", &ids[0], &[], b"m")),
        )
        .await;
        assert!(used.iter().all(|r| r.is_ok()));
        assert_eq!(cluster.outstanding(), 2);

        // Test case 1: reuse is rejected
        let reused = join_all(
            clients
                .iter()
                .map(|c| c.sign_with_presignature(KeyType::Ecdsa, "key", &ids[0], &[], b"m")),
        )
        .await;
        assert!(reused.iter().all(|r| r.is_err()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_failures() {
        let (cluster, clients) = cluster();
        keygen(&clients, "key").await;
        cluster.fail(1);

        // Test case 0: the next operation fails for everyone
        assert!(clients[1]
            .public_key(KeyType::Ecdsa, "key", &[1])
            .await
            .is_err());

        // Test case 1: later operations succeed and derive per path
        let a = clients[1].public_key(KeyType::Ecdsa, "key", &[1]).await.unwrap();
        let b = clients[2].public_key(KeyType::Ecdsa, "key", &[1]).await.unwrap();
        let c = clients[2].public_key(KeyType::Ecdsa, "key", &[2]).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_keygen() {
        let cluster = Cluster::new(Config {
            reject_keygen: true,
            ..Config::default()
        });
        let session = Session::new("k".into(), vec![0, 1]);
        let results = join_all(
            (0..2).map(|i| {
                let client = cluster.client(i);
                let session = session.clone();
                async move { client.generate_key(KeyType::Ecdsa, &session, 1, "key").await }
            }),
        )
        .await;
        assert!(results.iter().all(|r| r.is_err()));
    }
}
