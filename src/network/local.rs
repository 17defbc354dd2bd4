//! In-process network of storage peers
//!
//! Every exchange is serialized to JSON and back, so the peers see exactly
//! what a remote peer would. Faults can be injected per peer to exercise
//! retry and partial-store paths.

use super::peer_store::PeerStore;
use super::protocol::{ErrorCode, PeerRequest, PeerResponse, WirePayload};
use super::{DirectoryError, PeerDirectory, PeerId, Transport, TransportError};
use crate::block::{Block, BlockId, Metadata};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a misbehaving peer mangles the payloads it serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFault {
    /// Payload is not valid base64
    Garbled,

    /// Payload decodes but the bytes differ from what was stored
    Tampered,
}

#[derive(Debug, Clone, Copy, Default)]
struct PeerFaults {
    offline: bool,
    refuse_stripes: bool,
    payload: Option<PayloadFault>,
    delay: Option<Duration>,
}

struct LocalPeer {
    id: PeerId,
    store: Arc<PeerStore>,
    faults: PeerFaults,
}

/// A set of in-memory peers acting as both directory and transport
pub struct LocalNetwork {
    /// Known peers, in discovery order
    peers: RwLock<Vec<LocalPeer>>,

    /// File name -> root block id of published files
    names: DashMap<String, BlockId>,

    /// Root block id -> published metadata
    files: DashMap<BlockId, Metadata>,

    /// Every stripe call received, in arrival order
    stripe_log: Mutex<Vec<(PeerId, Vec<BlockId>)>>,

    directory_online: AtomicBool,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            names: DashMap::new(),
            files: DashMap::new(),
            stripe_log: Mutex::new(Vec::new()),
            directory_online: AtomicBool::new(true),
        }
    }

    /// Network of peers with the same capacity each
    pub fn with_peers<I, S>(ids: I, capacity_bytes: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let network = Self::new();
        for id in ids {
            network.add_peer(PeerId::new(id), capacity_bytes);
        }
        network
    }

    /// Add or replace a peer
    pub fn add_peer(&self, id: PeerId, capacity_bytes: u64) {
        let mut peers = self.peers.write();
        let peer = LocalPeer {
            id: id.clone(),
            store: Arc::new(PeerStore::new(capacity_bytes)),
            faults: PeerFaults::default(),
        };

        match peers.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = peer,
            None => peers.push(peer),
        }
        tracing::debug!("Peer {} joined with {} bytes offered", id, capacity_bytes);
    }

    pub fn remove_peer(&self, id: &PeerId) {
        self.peers.write().retain(|p| &p.id != id);
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.read().iter().map(|p| p.id.clone()).collect()
    }

    /// Direct access to a peer's store
    pub fn store_of(&self, id: &PeerId) -> Option<Arc<PeerStore>> {
        self.peers
            .read()
            .iter()
            .find(|p| &p.id == id)
            .map(|p| Arc::clone(&p.store))
    }

    /// Stripe calls received so far
    pub fn stripe_calls(&self) -> Vec<(PeerId, Vec<BlockId>)> {
        self.stripe_log.lock().clone()
    }

    pub fn set_offline(&self, id: &PeerId, offline: bool) {
        self.update_faults(id, |f| f.offline = offline);
    }

    pub fn refuse_stripes(&self, id: &PeerId, refuse: bool) {
        self.update_faults(id, |f| f.refuse_stripes = refuse);
    }

    pub fn corrupt_payloads(&self, id: &PeerId, fault: Option<PayloadFault>) {
        self.update_faults(id, |f| f.payload = fault);
    }

    /// Delay every request to a peer
    pub fn set_delay(&self, id: &PeerId, delay: Option<Duration>) {
        self.update_faults(id, |f| f.delay = delay);
    }

    /// Take the whole directory up or down
    pub fn set_directory_online(&self, online: bool) {
        self.directory_online.store(online, Ordering::SeqCst);
    }

    fn update_faults(&self, id: &PeerId, update: impl FnOnce(&mut PeerFaults)) {
        if let Some(peer) = self.peers.write().iter_mut().find(|p| &p.id == id) {
            update(&mut peer.faults);
        }
    }

    fn check_directory(&self) -> Result<(), DirectoryError> {
        if self.directory_online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DirectoryError::Unavailable("local directory is offline".into()))
        }
    }

    /// Look up a peer and wait out its injected delay
    async fn connect(&self, id: &PeerId) -> Result<(Arc<PeerStore>, PeerFaults), TransportError> {
        let (store, faults) = self
            .peers
            .read()
            .iter()
            .find(|p| &p.id == id)
            .map(|p| (Arc::clone(&p.store), p.faults))
            .ok_or_else(|| TransportError::Unreachable(id.clone()))?;

        if let Some(delay) = faults.delay {
            tokio::time::sleep(delay).await;
        }
        if faults.offline {
            return Err(TransportError::Unreachable(id.clone()));
        }

        Ok((store, faults))
    }

    /// Send a request through the wire encoding and back
    fn exchange(store: &PeerStore, request: &PeerRequest) -> Result<PeerResponse, TransportError> {
        let wire = serde_json::to_vec(request)
            .map_err(|e| TransportError::Protocol(format!("encode request: {}", e)))?;
        let received: PeerRequest = serde_json::from_slice(&wire)
            .map_err(|e| TransportError::Protocol(format!("decode request: {}", e)))?;

        let response = store.handle(received);

        let wire = serde_json::to_vec(&response)
            .map_err(|e| TransportError::Protocol(format!("encode response: {}", e)))?;
        serde_json::from_slice(&wire)
            .map_err(|e| TransportError::Protocol(format!("decode response: {}", e)))
    }
}

impl Default for LocalNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerDirectory for LocalNetwork {
    async fn peers_available_to_host(
        &self,
        metadata: &Metadata,
    ) -> Result<Vec<PeerId>, DirectoryError> {
        self.check_directory()?;

        Ok(self
            .peers
            .read()
            .iter()
            .filter(|p| !p.faults.offline && p.store.has_space(metadata.size))
            .map(|p| p.id.clone())
            .collect())
    }

    async fn hosting_peers(&self, block: &BlockId) -> Result<Vec<PeerId>, DirectoryError> {
        self.check_directory()?;

        // Liveness is not tracked here: a host that went offline is still
        // listed and fails on retrieval.
        Ok(self
            .peers
            .read()
            .iter()
            .filter(|p| p.store.contains(block))
            .map(|p| p.id.clone())
            .collect())
    }

    async fn resolve_filename(&self, name: &str) -> Result<Option<BlockId>, DirectoryError> {
        self.check_directory()?;
        Ok(self.names.get(name).map(|entry| *entry.value()))
    }

    async fn publish_file(&self, metadata: &Metadata) -> Result<(), DirectoryError> {
        self.check_directory()?;

        self.names.insert(metadata.name.clone(), metadata.root);
        self.files.insert(metadata.root, metadata.clone());
        tracing::debug!("Published {} as {}", metadata.name, metadata.root);
        Ok(())
    }

    async fn file_metadata(&self, root: &BlockId) -> Result<Option<Metadata>, DirectoryError> {
        self.check_directory()?;
        Ok(self.files.get(root).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn stripe(&self, peer: &PeerId, blocks: &[Block]) -> Result<(), TransportError> {
        self.stripe_log
            .lock()
            .push((peer.clone(), blocks.iter().map(|b| *b.id()).collect()));

        let (store, faults) = self.connect(peer).await?;
        if faults.refuse_stripes {
            return Err(TransportError::Rejected {
                peer: peer.clone(),
                reason: "peer refuses new blocks".into(),
            });
        }

        let request = PeerRequest::Stripe {
            blocks: blocks.iter().map(WirePayload::encode).collect(),
        };

        match Self::exchange(&store, &request)? {
            PeerResponse::Stored { block_ids } => {
                tracing::debug!("Peer {} stored {} blocks", peer, block_ids.len());
                Ok(())
            }
            PeerResponse::Error { message, .. } => Err(TransportError::Rejected {
                peer: peer.clone(),
                reason: message,
            }),
            other => Err(TransportError::Protocol(format!(
                "unexpected response to stripe: {:?}",
                other
            ))),
        }
    }

    async fn retrieve(
        &self,
        peer: &PeerId,
        block: &BlockId,
    ) -> Result<WirePayload, TransportError> {
        let (store, faults) = self.connect(peer).await?;

        let request = PeerRequest::Retrieve {
            block_id: block.to_string(),
        };

        let mut payload = match Self::exchange(&store, &request)? {
            PeerResponse::Block(payload) => payload,
            PeerResponse::Error {
                code: ErrorCode::NotFound,
                ..
            } => {
                return Err(TransportError::NotFound {
                    peer: peer.clone(),
                    block: *block,
                })
            }
            PeerResponse::Error { message, .. } => {
                return Err(TransportError::Rejected {
                    peer: peer.clone(),
                    reason: message,
                })
            }
            other => {
                return Err(TransportError::Protocol(format!(
                    "unexpected response to retrieve: {:?}",
                    other
                )))
            }
        };

        match faults.payload {
            Some(PayloadFault::Garbled) => {
                payload.data = format!("!{}!", payload.data);
            }
            Some(PayloadFault::Tampered) => {
                let mut bytes = payload
                    .decode()
                    .map_err(|e| TransportError::Protocol(e.to_string()))?;
                for byte in bytes.iter_mut() {
                    *byte ^= 0xff;
                }
                payload = WirePayload::from_parts(block, &bytes);
            }
            None => {}
        }

        Ok(payload)
    }
}
