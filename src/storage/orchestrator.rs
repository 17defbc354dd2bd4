//! Storage Orchestrator - the `store` / `get` entry points
//!
//! Store: producer -> directory -> scheme (redundancy, allocation) ->
//! concurrent stripes -> publish. Get: name lookup -> hosting peers -> one
//! peer at a time until the scheme has enough verified blocks -> reassemble
//! -> file sink.

use super::{FileData, FileSink, StorageError};
use crate::block::{Block, BlockId, BlockProducer, ContentHash, ContentProducer, Metadata};
use crate::network::{
    DirectoryError, PeerDirectory, PeerId, PeerSelector, RandomSelector, Transport,
    TransportError,
};
use crate::scheme::RedundancyStrategy;
use crate::JewelConfig;

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Tunables fixed for the lifetime of an orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Fewest stored blocks a partially failed store may end with
    pub min_viable_copies: usize,

    /// Deadline for each directory and transport call
    pub peer_timeout: Duration,

    /// Upper bound on stripes in flight at once
    pub max_concurrent_stripes: usize,

    /// Check retrieved content against its content-derived id
    pub verify_checksum: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            min_viable_copies: 1,
            peer_timeout: Duration::from_secs(10),
            max_concurrent_stripes: 8,
            verify_checksum: true,
        }
    }
}

/// Result of striping to one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerOutcome {
    pub peer: PeerId,

    /// Number of blocks sent to this peer
    pub blocks: usize,

    pub error: Option<TransportError>,
}

impl PeerOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a successful store
#[derive(Debug, Clone)]
pub struct StoreReport {
    pub metadata: Metadata,

    /// Peer -> block ids, in allocation order
    pub placements: Vec<(PeerId, Vec<BlockId>)>,

    /// One entry per peer, in completion order
    pub outcomes: Vec<PeerOutcome>,

    /// Peers whose stripe failed; non-empty means the store succeeded with a warning
    pub failed_peers: Vec<PeerId>,

    /// Blocks that reached a peer
    pub blocks_stored: usize,
}

impl StoreReport {
    /// True when every peer accepted its blocks
    pub fn is_complete(&self) -> bool {
        self.failed_peers.is_empty()
    }

    /// Blocks placed on a peer
    pub fn blocks_on(&self, peer: &PeerId) -> Option<&[BlockId]> {
        self.placements
            .iter()
            .find(|(p, _)| p == peer)
            .map(|(_, ids)| ids.as_slice())
    }
}

/// Stores and retrieves files with one redundancy scheme
pub struct StorageOrchestrator {
    strategy: Arc<dyn RedundancyStrategy>,
    producer: Arc<dyn BlockProducer>,
    directory: Arc<dyn PeerDirectory>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn FileSink>,
    selector: Arc<dyn PeerSelector>,
    options: OrchestratorOptions,
}

impl StorageOrchestrator {
    /// Create an orchestrator with BLAKE3 blocks, random peer selection and
    /// default options
    pub fn new(
        strategy: Arc<dyn RedundancyStrategy>,
        directory: Arc<dyn PeerDirectory>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn FileSink>,
    ) -> Self {
        Self {
            strategy,
            producer: Arc::new(ContentProducer),
            directory,
            transport,
            sink,
            selector: Arc::new(RandomSelector::from_entropy()),
            options: OrchestratorOptions::default(),
        }
    }

    /// Build the scheme, selector and options described by `config`
    pub fn from_config(
        config: &JewelConfig,
        directory: Arc<dyn PeerDirectory>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn FileSink>,
    ) -> crate::Result<Self> {
        config.validate()?;

        let strategy = config.scheme.build()?;
        let selector = match config.selection_seed {
            Some(seed) => RandomSelector::seeded(seed),
            None => RandomSelector::from_entropy(),
        };

        Ok(Self::new(strategy, directory, transport, sink)
            .with_selector(Arc::new(selector))
            .with_options(config.orchestrator_options()))
    }

    /// Set block producer
    pub fn with_producer(mut self, producer: Arc<dyn BlockProducer>) -> Self {
        self.producer = producer;
        self
    }

    /// Set peer selection policy
    pub fn with_selector(mut self, selector: Arc<dyn PeerSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Set options
    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn strategy(&self) -> &dyn RedundancyStrategy {
        self.strategy.as_ref()
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Store a file on the peers the directory offers
    pub async fn store(&self, file: FileData) -> Result<StoreReport, StorageError> {
        tracing::info!(
            "Storing {} ({} bytes) with {}",
            file.name,
            file.data.len(),
            self.strategy.name()
        );

        let block = self.producer.make_block(&file.data)?;
        let mut metadata = self.producer.make_metadata(&block, &file.name)?;

        let peers = self
            .directory_call(self.directory.peers_available_to_host(&metadata))
            .await?;

        let blocks = self
            .strategy
            .introduce_redundancy(std::slice::from_ref(&block))?;
        metadata.record_blocks(&blocks);
        let allocation = self.strategy.allocate(blocks, &peers)?;
        let placements = allocation.placements();

        tracing::debug!(
            "Allocated {} blocks of {} over {} peers (at most {} per peer)",
            allocation.block_count(),
            metadata.root,
            allocation.len(),
            allocation.max_blocks_per_peer()
        );

        let outcomes: Vec<PeerOutcome> = stream::iter(allocation)
            .map(|(peer, blocks)| self.stripe_to(peer, blocks))
            .buffer_unordered(self.options.max_concurrent_stripes.max(1))
            .collect()
            .await;

        let failed_peers: Vec<PeerId> = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.peer.clone())
            .collect();
        let blocks_stored: usize = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.blocks)
            .sum();

        if !failed_peers.is_empty() {
            let required = self.viability_floor();
            if blocks_stored < required {
                tracing::warn!(
                    "Store of {} incomplete: {} of {} required blocks stored",
                    file.name,
                    blocks_stored,
                    required
                );
                return Err(StorageError::StoreIncomplete {
                    failed_peers,
                    surviving: blocks_stored,
                    required,
                });
            }

            tracing::warn!(
                "Stored {} with reduced redundancy: {} peers failed ({:?})",
                file.name,
                failed_peers.len(),
                failed_peers
            );
        }

        self.directory_call(self.directory.publish_file(&metadata))
            .await?;

        tracing::info!(
            "Stored {} as {} ({} blocks on {} peers)",
            metadata.name,
            metadata.root,
            blocks_stored,
            outcomes.len() - failed_peers.len()
        );

        Ok(StoreReport {
            metadata,
            placements,
            outcomes,
            failed_peers,
            blocks_stored,
        })
    }

    /// Retrieve a file by name, persist it through the sink and return its bytes
    pub async fn get(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        tracing::info!("Retrieving {}", filename);

        let root = self
            .directory_call(self.directory.resolve_filename(filename))
            .await?
            .ok_or_else(|| StorageError::NoHostsFound(filename.to_string()))?;
        let metadata = self
            .directory_call(self.directory.file_metadata(&root))
            .await?;

        let plan = self.strategy.retrieval_plan(&root);
        let required = self.strategy.blocks_required();
        let mut progress = PlanProgress::new(plan.len());

        self.fetch_plan(&plan, metadata.as_ref(), required, &mut progress)
            .await?;

        if progress.held() < required {
            tracing::warn!(
                "Retrieval of {} failed: {} of {} blocks",
                filename,
                progress.held(),
                required
            );
            return Err(if progress.any_hosts {
                StorageError::RetrievalFailed {
                    block: root,
                    attempts: progress.attempts,
                }
            } else {
                StorageError::NoHostsFound(filename.to_string())
            });
        }

        let data = match self.rebuild(&root, &progress.slots, None) {
            Ok(data) => data,
            Err(err @ StorageError::ChecksumMismatch(_)) if self.options.verify_checksum => {
                tracing::warn!(
                    "{} did not rebuild from {} blocks, fetching the rest of its plan",
                    filename,
                    progress.held()
                );
                self.fetch_plan(&plan, metadata.as_ref(), plan.len(), &mut progress)
                    .await?;
                self.rebuild_without_one(&root, &plan, &progress.slots)
                    .ok_or(err)?
            }
            Err(err) => return Err(err),
        };

        self.sink.write_file(filename, &data).await?;

        tracing::info!("Retrieved {} ({} bytes)", filename, data.len());
        Ok(data)
    }

    /// Walk the plan from where the last pass stopped until `target` blocks are held
    async fn fetch_plan(
        &self,
        plan: &[BlockId],
        metadata: Option<&Metadata>,
        target: usize,
        progress: &mut PlanProgress,
    ) -> Result<(), StorageError> {
        while progress.next < plan.len() && progress.held() < target {
            let slot = progress.next;
            progress.next += 1;

            let id = &plan[slot];
            match self.fetch_block(id, expected_checksum(id, metadata)).await {
                Ok(fetched) => {
                    progress.slots[slot] = Some(fetched);
                    progress.any_hosts = true;
                }
                Err(StorageError::NoHostsFound(_)) => {
                    tracing::debug!("No hosts for {}", id);
                }
                Err(StorageError::RetrievalFailed { attempts, .. }) => {
                    progress.any_hosts = true;
                    progress.attempts += attempts;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reassemble held blocks, optionally leaving one slot out
    fn rebuild(
        &self,
        root: &BlockId,
        slots: &[Option<(PeerId, Vec<u8>)>],
        skip: Option<usize>,
    ) -> Result<Vec<u8>, StorageError> {
        let blocks = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                Some((_, data)) if skip != Some(index) => Some(data.clone()),
                _ => None,
            })
            .collect();

        let data = self.strategy.reassemble(root, blocks)?;

        if self.options.verify_checksum && !root.root.verify(&data) {
            return Err(StorageError::ChecksumMismatch(*root));
        }
        Ok(data)
    }

    /// Leave out one held block at a time; the one whose absence lets the file
    /// verify came from a corrupt peer
    fn rebuild_without_one(
        &self,
        root: &BlockId,
        plan: &[BlockId],
        slots: &[Option<(PeerId, Vec<u8>)>],
    ) -> Option<Vec<u8>> {
        if slots.iter().flatten().count() <= self.strategy.blocks_required() {
            return None;
        }

        slots.iter().enumerate().find_map(|(index, slot)| {
            let (peer, _) = slot.as_ref()?;
            let data = self.rebuild(root, slots, Some(index)).ok()?;
            tracing::warn!(
                "Excluding {} for {}: content does not match the file",
                peer,
                plan[index]
            );
            Some(data)
        })
    }

    /// Blocks that must survive a store in which some peer failed
    fn viability_floor(&self) -> usize {
        self.options
            .min_viable_copies
            .max(self.strategy.blocks_required())
    }

    async fn directory_call<T, F>(&self, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        match tokio::time::timeout(self.options.peer_timeout, call).await {
            Ok(result) => result.map_err(StorageError::DirectoryUnavailable),
            Err(_) => Err(StorageError::DirectoryUnavailable(DirectoryError::Timeout)),
        }
    }

    async fn stripe_to(&self, peer: PeerId, blocks: Vec<Block>) -> PeerOutcome {
        tracing::debug!("Striping {} blocks to {}", blocks.len(), peer);

        let result = match tokio::time::timeout(
            self.options.peer_timeout,
            self.transport.stripe(&peer, &blocks),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(peer.clone())),
        };

        if let Err(e) = &result {
            tracing::warn!("Stripe to {} failed: {}", peer, e);
        }

        PeerOutcome {
            peer,
            blocks: blocks.len(),
            error: result.err(),
        }
    }

    /// Fetch one block, excluding each peer that fails until none are left
    async fn fetch_block(
        &self,
        id: &BlockId,
        expected: Option<ContentHash>,
    ) -> Result<(PeerId, Vec<u8>), StorageError> {
        let mut candidates = self
            .directory_call(self.directory.hosting_peers(id))
            .await?;

        if candidates.is_empty() {
            return Err(StorageError::NoHostsFound(id.to_string()));
        }

        let mut attempts = 0;
        while let Some(index) = self.selector.select(&candidates) {
            if index >= candidates.len() {
                return Err(StorageError::InvariantViolation(format!(
                    "selector chose candidate {} of {}",
                    index,
                    candidates.len()
                )));
            }

            let peer = candidates.remove(index);
            attempts += 1;

            match self.fetch_from(&peer, id, expected).await {
                Ok(data) => return Ok((peer, data)),
                Err(e) => tracing::warn!("Excluding {} for {}: {}", peer, id, e),
            }
        }

        Err(StorageError::RetrievalFailed {
            block: *id,
            attempts,
        })
    }

    async fn fetch_from(
        &self,
        peer: &PeerId,
        id: &BlockId,
        expected: Option<ContentHash>,
    ) -> Result<Vec<u8>, StorageError> {
        let payload = match tokio::time::timeout(
            self.options.peer_timeout,
            self.transport.retrieve(peer, id),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(peer.clone()).into()),
        };

        let corrupt = |reason: String| StorageError::CorruptPayload {
            peer: peer.clone(),
            reason,
        };

        if payload.block_id != id.to_string() {
            return Err(corrupt(format!("answered with block {}", payload.block_id)));
        }

        let data = payload.decode().map_err(|e| corrupt(e.to_string()))?;

        if let Some(expected) = expected.filter(|_| self.options.verify_checksum) {
            if !expected.verify(&data) {
                return Err(corrupt("content does not match its checksum".into()));
            }
        }

        Ok(data)
    }
}

/// Blocks gathered while walking a retrieval plan
struct PlanProgress {
    /// Plan entry -> serving peer and bytes
    slots: Vec<Option<(PeerId, Vec<u8>)>>,

    /// Next plan entry to try
    next: usize,

    attempts: usize,
    any_hosts: bool,
}

impl PlanProgress {
    fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            next: 0,
            attempts: 0,
            any_hosts: false,
        }
    }

    fn held(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

/// Digest a fetched block must match: whole-file blocks are addressed by
/// their content, fragments by the digests published with the file
fn expected_checksum(id: &BlockId, metadata: Option<&Metadata>) -> Option<ContentHash> {
    match id.fragment {
        None => Some(id.root),
        Some(_) => metadata.and_then(|m| m.block_checksum(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{InOrderSelector, LocalNetwork, PayloadFault};
    use crate::scheme::{Duplication, ParityFragmentation};
    use crate::storage::MemorySink;

    struct Harness {
        network: Arc<LocalNetwork>,
        sink: Arc<MemorySink>,
        orchestrator: StorageOrchestrator,
    }

    fn harness(strategy: Arc<dyn RedundancyStrategy>, peers: &[&str]) -> Harness {
        let network = Arc::new(LocalNetwork::with_peers(peers.iter().copied(), 1_000_000));
        let sink = Arc::new(MemorySink::new());
        let orchestrator = StorageOrchestrator::new(
            strategy,
            network.clone(),
            network.clone(),
            sink.clone(),
        )
        .with_selector(Arc::new(InOrderSelector))
        .with_options(OrchestratorOptions {
            peer_timeout: Duration::from_millis(200),
            ..OrchestratorOptions::default()
        });

        Harness {
            network,
            sink,
            orchestrator,
        }
    }

    fn duplication(factor: usize) -> Arc<dyn RedundancyStrategy> {
        Arc::new(Duplication::new(factor).unwrap())
    }

    fn peer(id: &str) -> PeerId {
        PeerId::new(id)
    }

    #[tokio::test]
    async fn test_store_three_copies_on_three_peers() {
        let h = harness(duplication(3), &["p1", "p2", "p3"]);

        let report = h
            .orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.blocks_stored, 3);
        for id in ["p1", "p2", "p3"] {
            assert_eq!(report.blocks_on(&peer(id)).unwrap(), &[report.metadata.root]);
        }

        let mut striped: Vec<PeerId> = h.network.stripe_calls().into_iter().map(|(p, _)| p).collect();
        striped.sort();
        assert_eq!(striped, vec![peer("p1"), peer("p2"), peer("p3")]);
    }

    #[tokio::test]
    async fn test_store_three_copies_on_two_peers() {
        let h = harness(duplication(3), &["p1", "p2"]);

        let report = h
            .orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.blocks_stored, 3);

        let mut counts: Vec<usize> = report.placements.iter().map(|(_, ids)| ids.len()).collect();
        counts.sort();
        assert_eq!(counts, vec![1, 2]);

        let root = report.metadata.root;
        let copies: Vec<u32> = ["p1", "p2"]
            .iter()
            .map(|id| h.network.store_of(&peer(id)).unwrap().stored_block(&root).unwrap().copies)
            .collect();
        assert_eq!(copies.iter().sum::<u32>(), 3);
    }

    #[tokio::test]
    async fn test_store_rejects_empty_file() {
        let h = harness(duplication(3), &["p1"]);

        let err = h
            .orchestrator
            .store(FileData::new("a.txt", Vec::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::InvalidInput(_)));
        assert!(h.network.stripe_calls().is_empty());
    }

    #[tokio::test]
    async fn test_store_without_peers() {
        let h = harness(duplication(3), &[]);

        let err = h
            .orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::NoPeersAvailable));
    }

    #[tokio::test]
    async fn test_store_with_directory_down() {
        let h = harness(duplication(3), &["p1"]);
        h.network.set_directory_online(false);

        let err = h
            .orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::DirectoryUnavailable(_)));
    }

    #[tokio::test]
    async fn test_store_succeeds_with_warning_when_one_peer_fails() {
        let h = harness(duplication(3), &["p1", "p2", "p3"]);
        h.network.refuse_stripes(&peer("p2"), true);

        let report = h
            .orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failed_peers, vec![peer("p2")]);
        assert_eq!(report.blocks_stored, 2);
        // every peer was still attempted
        assert_eq!(h.network.stripe_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_store_incomplete_when_all_peers_fail() {
        let h = harness(duplication(2), &["p1", "p2"]);
        h.network.refuse_stripes(&peer("p1"), true);
        h.network.refuse_stripes(&peer("p2"), true);

        let err = h
            .orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap_err();

        match err {
            StorageError::StoreIncomplete {
                mut failed_peers,
                surviving,
                required,
            } => {
                failed_peers.sort();
                assert_eq!(failed_peers, vec![peer("p1"), peer("p2")]);
                assert_eq!(surviving, 0);
                assert_eq!(required, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_peer_times_out_without_blocking_others() {
        let h = harness(duplication(2), &["p1", "p2"]);
        h.network.set_delay(&peer("p1"), Some(Duration::from_secs(5)));

        let report = h
            .orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();

        assert_eq!(report.failed_peers, vec![peer("p1")]);
        let slow = report.outcomes.iter().find(|o| o.peer == peer("p1")).unwrap();
        assert_eq!(slow.error, Some(TransportError::Timeout(peer("p1"))));
    }

    #[tokio::test]
    async fn test_get_round_trip() {
        let h = harness(duplication(3), &["p1", "p2", "p3"]);
        h.orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();

        let data = h.orchestrator.get("a.txt").await.unwrap();

        assert_eq!(data, b"hello");
        assert_eq!(h.sink.get("a.txt").unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_get_retries_next_host_on_transport_error() {
        let h = harness(duplication(2), &["p1", "p2", "p3"]);
        h.network.set_offline(&peer("p1"), true);
        h.orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();
        h.network.set_offline(&peer("p1"), false);

        let root = BlockId::for_content(b"hello");
        assert_eq!(
            h.network.hosting_peers(&root).await.unwrap(),
            vec![peer("p2"), peer("p3")]
        );

        h.network.set_offline(&peer("p2"), true);
        let data = h.orchestrator.get("a.txt").await.unwrap();

        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_get_excludes_corrupt_peers() {
        let h = harness(duplication(3), &["p1", "p2", "p3"]);
        h.orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();

        h.network.corrupt_payloads(&peer("p1"), Some(PayloadFault::Garbled));
        h.network.corrupt_payloads(&peer("p2"), Some(PayloadFault::Tampered));

        let data = h.orchestrator.get("a.txt").await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_tampered_payload_accepted_without_verification() {
        let h = harness(duplication(1), &["p1"]);
        let orchestrator = StorageOrchestrator::new(
            duplication(1),
            h.network.clone(),
            h.network.clone(),
            h.sink.clone(),
        )
        .with_options(OrchestratorOptions {
            verify_checksum: false,
            ..OrchestratorOptions::default()
        });

        orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();
        h.network.corrupt_payloads(&peer("p1"), Some(PayloadFault::Tampered));

        let data = orchestrator.get("a.txt").await.unwrap();
        assert_ne!(data, b"hello");
    }

    #[tokio::test]
    async fn test_get_fails_when_all_hosts_fail() {
        let h = harness(duplication(2), &["p1", "p2"]);
        h.orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();

        h.network.set_offline(&peer("p1"), true);
        h.network.corrupt_payloads(&peer("p2"), Some(PayloadFault::Garbled));

        let err = h.orchestrator.get("a.txt").await.unwrap_err();

        assert!(matches!(err, StorageError::RetrievalFailed { attempts: 2, .. }));
        assert!(!h.sink.contains("a.txt"));
    }

    #[tokio::test]
    async fn test_get_unknown_file() {
        let h = harness(duplication(2), &["p1"]);

        let err = h.orchestrator.get("missing.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::NoHostsFound(_)));
    }

    #[tokio::test]
    async fn test_get_when_hosts_are_gone() {
        let h = harness(duplication(2), &["p1", "p2"]);
        h.orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();

        h.network.remove_peer(&peer("p1"));
        h.network.remove_peer(&peer("p2"));

        let err = h.orchestrator.get("a.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::NoHostsFound(_)));
        assert!(h.sink.is_empty());
    }

    #[tokio::test]
    async fn test_get_twice_is_identical() {
        let h = harness(duplication(3), &["p1", "p2", "p3"]);
        let orchestrator = StorageOrchestrator::new(
            duplication(3),
            h.network.clone(),
            h.network.clone(),
            h.sink.clone(),
        )
        .with_selector(Arc::new(RandomSelector::seeded(9)));

        orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();

        let first = orchestrator.get("a.txt").await.unwrap();
        let second = orchestrator.get("a.txt").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, b"hello");
    }

    #[tokio::test]
    async fn test_parity_store_and_get_with_lost_peers() {
        let strategy: Arc<dyn RedundancyStrategy> =
            Arc::new(ParityFragmentation::new(4, 2).unwrap());
        let h = harness(strategy, &["p1", "p2", "p3", "p4", "p5", "p6"]);
        let original: Vec<u8> = (0..5_000).map(|i| (i % 239) as u8).collect();

        let report = h
            .orchestrator
            .store(FileData::new("data.bin", original.clone()))
            .await
            .unwrap();

        assert_eq!(report.blocks_stored, 6);
        assert!(report.placements.iter().all(|(_, ids)| ids.len() == 1));

        h.network.set_offline(&peer("p1"), true);
        h.network.set_offline(&peer("p4"), true);

        let data = h.orchestrator.get("data.bin").await.unwrap();
        assert_eq!(data, original);
    }

    fn parity(data_fragments: usize, parity_fragments: usize) -> Arc<dyn RedundancyStrategy> {
        Arc::new(ParityFragmentation::new(data_fragments, parity_fragments).unwrap())
    }

    /// Resolves names but publishes no per-fragment digests
    struct NamesOnly(Arc<LocalNetwork>);

    #[async_trait::async_trait]
    impl PeerDirectory for NamesOnly {
        async fn peers_available_to_host(
            &self,
            metadata: &Metadata,
        ) -> Result<Vec<PeerId>, DirectoryError> {
            self.0.peers_available_to_host(metadata).await
        }

        async fn hosting_peers(&self, block: &BlockId) -> Result<Vec<PeerId>, DirectoryError> {
            self.0.hosting_peers(block).await
        }

        async fn resolve_filename(&self, name: &str) -> Result<Option<BlockId>, DirectoryError> {
            self.0.resolve_filename(name).await
        }

        async fn publish_file(&self, metadata: &Metadata) -> Result<(), DirectoryError> {
            self.0.publish_file(metadata).await
        }
    }

    #[tokio::test]
    async fn test_store_publishes_fragment_checksums() {
        let h = harness(parity(4, 2), &["p1", "p2", "p3", "p4", "p5", "p6"]);

        let report = h
            .orchestrator
            .store(FileData::new("data.bin", vec![3u8; 2_000]))
            .await
            .unwrap();

        assert_eq!(report.metadata.fragment_checksums.len(), 6);
        assert_eq!(
            h.network.file_metadata(&report.metadata.root).await.unwrap(),
            Some(report.metadata.clone())
        );
    }

    #[tokio::test]
    async fn test_parity_get_skips_tampered_fragment() {
        let h = harness(parity(4, 2), &["p1", "p2", "p3", "p4", "p5", "p6"]);
        let original: Vec<u8> = (0..5_000).map(|i| (i % 239) as u8).collect();

        h.orchestrator
            .store(FileData::new("data.bin", original.clone()))
            .await
            .unwrap();
        h.network.corrupt_payloads(&peer("p1"), Some(PayloadFault::Tampered));

        let data = h.orchestrator.get("data.bin").await.unwrap();

        assert_eq!(data, original);
        assert_eq!(h.sink.get("data.bin").unwrap(), original);
    }

    #[tokio::test]
    async fn test_parity_get_excludes_every_corrupt_peer_within_tolerance() {
        let h = harness(parity(4, 2), &["p1", "p2", "p3", "p4", "p5", "p6"]);
        let original: Vec<u8> = (0..5_000).map(|i| (i % 241) as u8).collect();

        h.orchestrator
            .store(FileData::new("data.bin", original.clone()))
            .await
            .unwrap();
        h.network.corrupt_payloads(&peer("p1"), Some(PayloadFault::Tampered));
        h.network.corrupt_payloads(&peer("p3"), Some(PayloadFault::Garbled));

        assert_eq!(h.orchestrator.get("data.bin").await.unwrap(), original);

        h.network.corrupt_payloads(&peer("p5"), Some(PayloadFault::Tampered));
        let err = h.orchestrator.get("data.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::RetrievalFailed { .. }));
    }

    #[tokio::test]
    async fn test_parity_rebuilds_around_tampered_fragment_without_digests() {
        let network = Arc::new(LocalNetwork::with_peers(
            ["p1", "p2", "p3", "p4", "p5", "p6"],
            1_000_000,
        ));
        let sink = Arc::new(MemorySink::new());
        let orchestrator = StorageOrchestrator::new(
            parity(4, 2),
            Arc::new(NamesOnly(network.clone())),
            network.clone(),
            sink.clone(),
        )
        .with_selector(Arc::new(InOrderSelector));
        let original: Vec<u8> = (0..5_000).map(|i| (i % 233) as u8).collect();

        orchestrator
            .store(FileData::new("data.bin", original.clone()))
            .await
            .unwrap();
        network.corrupt_payloads(&peer("p1"), Some(PayloadFault::Tampered));

        let data = orchestrator.get("data.bin").await.unwrap();

        assert_eq!(data, original);
        assert_eq!(sink.get("data.bin").unwrap(), original);
    }

    #[tokio::test]
    async fn test_failed_store_is_not_resolvable() {
        let h = harness(duplication(2), &["p1", "p2"]);
        h.network.refuse_stripes(&peer("p1"), true);
        h.network.refuse_stripes(&peer("p2"), true);

        let err = h
            .orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::StoreIncomplete { .. }));

        assert_eq!(h.network.resolve_filename("a.txt").await.unwrap(), None);
        assert!(matches!(
            h.orchestrator.get("a.txt").await.unwrap_err(),
            StorageError::NoHostsFound(name) if name == "a.txt"
        ));
    }

    #[tokio::test]
    async fn test_parity_get_fails_past_tolerance() {
        let strategy: Arc<dyn RedundancyStrategy> =
            Arc::new(ParityFragmentation::new(4, 2).unwrap());
        let h = harness(strategy, &["p1", "p2", "p3", "p4", "p5", "p6"]);

        h.orchestrator
            .store(FileData::new("data.bin", vec![7u8; 1_000]))
            .await
            .unwrap();

        for id in ["p1", "p2", "p3"] {
            h.network.set_offline(&peer(id), true);
        }

        let err = h.orchestrator.get("data.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::RetrievalFailed { .. }));
        assert!(!h.sink.contains("data.bin"));
    }

    #[tokio::test]
    async fn test_parity_store_incomplete_below_data_fragments() {
        let strategy: Arc<dyn RedundancyStrategy> =
            Arc::new(ParityFragmentation::new(2, 1).unwrap());
        let h = harness(strategy, &["p1", "p2", "p3"]);
        h.network.refuse_stripes(&peer("p1"), true);
        h.network.refuse_stripes(&peer("p2"), true);

        let err = h
            .orchestrator
            .store(FileData::new("data.bin", "fragmented"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::StoreIncomplete {
                surviving: 1,
                required: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_from_config() {
        let network = Arc::new(LocalNetwork::with_peers(["p1", "p2"], 1_000_000));
        let config: JewelConfig = serde_json::from_str(
            r#"{"scheme":{"kind":"duplication","factor":2},"selection_seed":3,"peer_timeout_ms":500}"#,
        )
        .unwrap();

        let orchestrator = StorageOrchestrator::from_config(
            &config,
            network.clone(),
            network.clone(),
            Arc::new(MemorySink::new()),
        )
        .unwrap();

        assert_eq!(orchestrator.strategy().name(), "duplication");
        assert_eq!(orchestrator.options().peer_timeout, Duration::from_millis(500));

        let report = orchestrator
            .store(FileData::new("a.txt", "hello"))
            .await
            .unwrap();
        assert_eq!(report.blocks_stored, 2);
    }
}
