use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use ferrum_config::FerrumConfig;
use ferrum_consensus::Mempool;
use ferrum_core::{
    Account, AccountId, Block, BlockData, BlockStore, BlockTx, CancelToken, Database, Error,
    Genesis, PowArgs, SignedTx,
};
use ferrum_network::{NodeStatus, Peer, PeerClient, PeerSet};
use ferrum_rpc::{NameResolver, NodeApi, NoopNameResolver};
use ferrum_storage::DiskStore;
use ferrum_wallet::WalletStore;

/// The serialization point for every chain mutation (spec §4.9): the
/// account database, mempool, and peer set, plus a lock around the
/// validate/write/apply critical section so `mine_block` and
/// `process_block` are mutually exclusive. Holds a back-reference to its
/// [`Worker`], attached once after both are constructed — see
/// [`State::attach_worker`].
pub struct State {
    database: Database,
    mempool: Mempool,
    peers: PeerSet,
    peer_client: PeerClient,
    genesis: Genesis,
    beneficiary: AccountId,
    local_host: String,
    worker: OnceCell<Arc<Worker>>,
    apply_lock: Mutex<()>,
}

impl State {
    pub fn new(
        genesis: Genesis,
        store: Box<dyn BlockStore>,
        local_host: String,
        beneficiary: AccountId,
    ) -> Result<Arc<Self>, Error> {
        let database = Database::new(&genesis, store)?;
        Ok(Arc::new(Self {
            database,
            mempool: Mempool::new(),
            peers: PeerSet::new(local_host.clone()),
            peer_client: PeerClient::new(),
            genesis,
            beneficiary,
            local_host,
            worker: OnceCell::new(),
            apply_lock: Mutex::new(()),
        }))
    }

    /// Registers the [`Worker`] this state signals on tx/block activity.
    /// Called once, immediately after both are constructed — see the
    /// back-reference note in spec §9.
    pub fn attach_worker(&self, worker: Arc<Worker>) {
        let _ = self.worker.set(worker);
    }

    fn worker(&self) -> &Arc<Worker> {
        self.worker.get().expect("worker attached before first use")
    }

    pub fn add_peer_raw(&self, peer: Peer) {
        self.peers.add(peer);
    }

    pub fn delete_peer(&self, peer: Peer) {
        self.peers.delete(&peer);
    }

    pub fn external_peers(&self) -> Vec<Peer> {
        self.peers.external()
    }

    pub fn local_host(&self) -> String {
        self.local_host.clone()
    }

    pub fn peer_client(&self) -> PeerClient {
        self.peer_client.clone()
    }

    pub fn mempool_size(&self) -> usize {
        self.mempool.size()
    }

    pub fn latest_height(&self) -> u64 {
        self.database.last_block().height()
    }

    /// Wraps a wallet-submitted `SignedTx` into a `BlockTx`, verifies it,
    /// inserts it into the mempool, shares it with peers, and kicks off
    /// mining.
    pub fn upsert_wallet_tx(&self, signed: SignedTx) -> Result<(), Error> {
        signed.verify(self.genesis.chain_id)?;
        let tx = BlockTx::new(signed, self.genesis.gas_price, 1);
        self.mempool.upsert(tx.clone());
        self.worker().share_tx(tx);
        self.worker().start_mining();
        Ok(())
    }

    /// Verifies and inserts a tx received from a peer. Does not
    /// re-broadcast, to avoid gossip amplification.
    pub fn upsert_node_tx(&self, tx: BlockTx) -> Result<(), Error> {
        tx.verify(self.genesis.chain_id)?;
        self.mempool.upsert(tx);
        self.worker().start_mining();
        Ok(())
    }

    /// Runs a proof-of-work search on a snapshot of the mempool, then
    /// applies the winning block under `apply_lock`. `cancel` lets the
    /// worker abort a round early (`StopMining`, shutdown, or a
    /// concurrently received block).
    pub async fn mine_block(&self, cancel: CancelToken) -> Result<Block, Error> {
        let txs = self.mempool.select_all();
        let prev_block = self.database.last_block();
        let prev_state_root = self.database.state_root();

        let args = PowArgs {
            beneficiary: self.beneficiary.clone(),
            difficulty: self.genesis.difficulty,
            reward: self.genesis.mining_reward,
            state_root: prev_state_root,
            txs,
        };

        let block = tokio::task::spawn_blocking(move || ferrum_core::solve(&prev_block, args, &cancel))
            .await
            .map_err(|e| Error::StorageIo(e.to_string()))??;

        let _guard = self.apply_lock.lock();
        let prev_block = self.database.last_block();
        let prev_state_root = self.database.state_root();
        block.validate(&prev_block, &prev_state_root)?;

        self.database.write_block(&block)?;
        self.database.update_last_block(block.clone());
        self.database.apply_mining_reward(&block)?;
        for tx in block.txs() {
            self.mempool.remove(&tx);
            let _ = self.database.apply_transaction(&tx, &block.header.beneficiary);
        }

        Ok(block)
    }

    /// Validates and applies a block received from a peer (or submitted
    /// over the private API), under the same lock `mine_block` uses so
    /// the two are mutually exclusive.
    pub fn process_block(&self, data: BlockData) -> Result<(), Error> {
        let block = data.to_block();

        let _guard = self.apply_lock.lock();
        let prev_block = self.database.last_block();
        let prev_state_root = self.database.state_root();
        block.validate(&prev_block, &prev_state_root)?;

        self.database.write_block(&block)?;
        self.database.update_last_block(block.clone());
        self.database.apply_mining_reward(&block)?;
        for tx in block.txs() {
            self.mempool.remove(&tx);
            let _ = self.database.apply_transaction(&tx, &block.header.beneficiary);
        }

        Ok(())
    }

    pub fn close(&self) -> Result<(), Error> {
        self.database.close()
    }
}

impl NodeApi for State {
    fn node_status(&self) -> NodeStatus {
        let last = self.database.last_block();
        NodeStatus {
            last_block_hash: last.hash(),
            last_block_height: last.height(),
            known_peers: self.peers.all(),
        }
    }

    fn uncommitted_txs(&self, account: Option<&AccountId>) -> Vec<BlockTx> {
        match account {
            Some(id) => self.mempool.select_by_account(id),
            None => self.mempool.select_all(),
        }
    }

    fn blocks_by_height(&self, from: u64, to: u64) -> Result<Vec<BlockData>, Error> {
        if from == 0 || to < from {
            return Err(Error::StorageIo(format!("invalid height range {from}..={to}")));
        }
        (from..=to)
            .map(|h| self.database.read_block(h).map(|b| b.to_block_data()))
            .collect()
    }

    fn latest_height(&self) -> u64 {
        State::latest_height(self)
    }

    fn submit_node_block(&self, data: BlockData) -> Result<(), Error> {
        self.process_block(data)?;
        self.worker().stop_mining();
        Ok(())
    }

    fn submit_node_tx(&self, tx: BlockTx) -> Result<(), Error> {
        self.upsert_node_tx(tx)
    }

    fn add_peer(&self, host: String) {
        self.peers.add(Peer::new(host));
    }

    fn genesis(&self) -> Genesis {
        self.genesis.clone()
    }

    fn accounts(&self) -> Vec<Account> {
        self.database.accounts().into_values().collect()
    }

    fn account(&self, id: &AccountId) -> Result<Account, Error> {
        self.database.account(id)
    }

    fn submit_wallet_tx(&self, tx: SignedTx) -> Result<(), Error> {
        self.upsert_wallet_tx(tx)
    }
}

const PEER_SYNC_PERIOD: Duration = Duration::from_secs(90);

struct WorkerReceivers {
    start_mining_rx: mpsc::Receiver<()>,
    stop_mining_rx: mpsc::Receiver<()>,
    share_tx_rx: mpsc::Receiver<BlockTx>,
}

/// Background driver for mining, transaction broadcast, and peer
/// synchronization (spec §4.10). Owns four channels — `shutdown`,
/// `start_mining`, `stop_mining`, `share_tx` — plus a 90s peer-sync
/// ticker. `start_mining`/`stop_mining`/`share_tx` are non-blocking:
/// sends never wait, so a full channel just drops the signal (it's
/// already coalesced with a pending one).
pub struct Worker {
    state: Arc<State>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    start_mining_tx: mpsc::Sender<()>,
    stop_mining_tx: mpsc::Sender<()>,
    share_tx_tx: mpsc::Sender<BlockTx>,
    receivers: Mutex<Option<WorkerReceivers>>,
    handles: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Worker {
    pub fn new(state: Arc<State>) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (start_mining_tx, start_mining_rx) = mpsc::channel(1);
        let (stop_mining_tx, stop_mining_rx) = mpsc::channel(1);
        let (share_tx_tx, share_tx_rx) = mpsc::channel(10);

        Arc::new(Self {
            state,
            shutdown_tx,
            shutdown_rx,
            start_mining_tx,
            stop_mining_tx,
            share_tx_tx,
            receivers: Mutex::new(Some(WorkerReceivers { start_mining_rx, stop_mining_rx, share_tx_rx })),
            handles: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn start_mining(&self) {
        let _ = self.start_mining_tx.try_send(());
    }

    pub fn stop_mining(&self) {
        let _ = self.stop_mining_tx.try_send(());
    }

    pub fn share_tx(&self, tx: BlockTx) {
        let _ = self.share_tx_tx.try_send(tx);
    }

    /// Runs the initial catch-up synchronously, then launches the three
    /// long-running tasks and blocks until all of them are executing.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.sync_with_peers(true).await;

        let mut receivers = self
            .receivers
            .lock()
            .take()
            .expect("Worker::start called more than once");

        let barrier = Arc::new(tokio::sync::Barrier::new(4));

        let mining_listener = {
            let worker = self.clone();
            let mut shutdown_rx = self.shutdown_rx.clone();
            let mut start_mining_rx = receivers.start_mining_rx;
            let mut stop_mining_rx = receivers.stop_mining_rx;
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        signal = start_mining_rx.recv() => {
                            match signal {
                                Some(()) if !*shutdown_rx.borrow() => worker.run_mining(&mut stop_mining_rx).await,
                                Some(()) => {}
                                None => break,
                            }
                        }
                    }
                }
            })
        };

        let peer_syncer = {
            let worker = self.clone();
            let mut shutdown_rx = self.shutdown_rx.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                worker.sync_with_peers(false).await;
                let mut ticker = tokio::time::interval(PEER_SYNC_PERIOD);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = ticker.tick() => {
                            worker.sync_with_peers(false).await;
                        }
                    }
                }
            })
        };

        let tx_syncer = {
            let worker = self.clone();
            let mut shutdown_rx = self.shutdown_rx.clone();
            let mut share_tx_rx = receivers.share_tx_rx;
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        tx = share_tx_rx.recv() => {
                            match tx {
                                Some(tx) => {
                                    let peers = worker.state.external_peers();
                                    worker.state.peer_client().send_tx_to_peers(&peers, &tx).await;
                                }
                                None => break,
                            }
                        }
                    }
                }
            })
        };

        barrier.wait().await;
        *self.handles.lock().await = vec![mining_listener, peer_syncer, tx_syncer];
        Ok(())
    }

    /// One mining round: bails immediately if the mempool is empty.
    /// Races a watcher (cancels on `stop_mining` or the miner finishing)
    /// against the miner itself, so neither outlives the other.
    async fn run_mining(self: &Arc<Self>, stop_mining_rx: &mut mpsc::Receiver<()>) {
        if self.state.mempool_size() == 0 {
            return;
        }
        while stop_mining_rx.try_recv().is_ok() {}

        let cancel = CancelToken::new();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let watcher = {
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = stop_mining_rx.recv() => {}
                    _ = done_rx => {}
                }
                cancel.cancel();
            }
        };

        let state = self.state.clone();
        let miner = async move {
            let result = state.mine_block(cancel).await;
            let _ = done_tx.send(());
            match result {
                Ok(block) => {
                    let data = block.to_block_data();
                    let peers = state.external_peers();
                    state.peer_client().send_block_to_peers(&peers, &data).await;
                }
                Err(Error::Cancelled) => {}
                Err(err) => warn!(%err, "mining round failed"),
            }
        };

        tokio::join!(watcher, miner);

        if self.state.mempool_size() > 0 {
            self.start_mining();
        }
    }

    /// Fetches status, mempool, and missing blocks from every external
    /// peer; drops peers whose status request fails. `announce` gates
    /// the final `SendNodeReady` broadcast (only the startup catch-up
    /// does this; periodic ticks just resync).
    async fn sync_with_peers(&self, announce: bool) {
        for peer in self.state.external_peers() {
            match self.state.peer_client().request_status(&peer).await {
                Ok(status) => {
                    for known in status.known_peers {
                        self.state.add_peer_raw(known);
                    }

                    match self.state.peer_client().request_mempool(&peer).await {
                        Ok(txs) => {
                            for tx in txs {
                                let _ = self.state.upsert_node_tx(tx);
                            }
                        }
                        Err(err) => warn!(host = %peer.host, %err, "mempool fetch failed"),
                    }

                    let height = self.state.latest_height();
                    let from = if height == 0 { 1 } else { height };
                    match self.state.peer_client().request_blocks(&peer, from, "latest").await {
                        Ok(blocks) => {
                            for block in blocks {
                                let _ = self.state.process_block(block);
                            }
                        }
                        Err(err) => warn!(host = %peer.host, %err, "block fetch failed"),
                    }
                }
                Err(err) => {
                    warn!(host = %peer.host, %err, "peer unreachable, dropping");
                    self.state.delete_peer(peer);
                }
            }
        }

        if announce {
            let local_host = self.state.local_host();
            for peer in self.state.external_peers() {
                let _ = self.state.peer_client().send_node_ready(&peer, &local_host).await;
            }
        }
    }

    /// Signals `stop_mining`, closes `shutdown`, and waits for every task
    /// to exit.
    pub async fn shutdown(&self) {
        let _ = self.stop_mining_tx.try_send(());
        let _ = self.shutdown_tx.send(true);

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(%err, "worker task panicked during shutdown");
            }
        }
    }
}

/// Loads configuration and genesis, constructs the `State`/`Worker` pair,
/// starts both HTTP servers, and runs until one of them exits. Tears down
/// in the order spec §9 requires: worker, then state, then storage.
pub async fn run(config: FerrumConfig, genesis_path: PathBuf) -> Result<()> {
    let genesis = Genesis::load(&genesis_path)?;

    let wallet_store = WalletStore::new(&config.state.accounts_path)?;
    let beneficiary_wallet = match wallet_store.load(&config.state.beneficiary) {
        Ok(wallet) => wallet,
        Err(_) => {
            info!(name = %config.state.beneficiary, "beneficiary key file not found, generating one");
            wallet_store.create(&config.state.beneficiary)?
        }
    };

    let store: Box<dyn BlockStore> = Box::new(DiskStore::new(&config.state.data_path)?);
    let state = State::new(genesis, store, config.node.private_host.clone(), beneficiary_wallet.account_id)?;

    for host in config.state.origin_peers() {
        state.add_peer_raw(Peer::new(host));
    }

    let worker = Worker::new(state.clone());
    state.attach_worker(worker.clone());
    worker.start().await?;

    let public_addr: SocketAddr = config.node.public_host.parse()?;
    let private_addr: SocketAddr = config.node.private_host.parse()?;
    let api: Arc<dyn NodeApi> = state.clone();
    let resolver: Arc<dyn NameResolver> = Arc::new(NoopNameResolver);

    info!(%public_addr, %private_addr, "ferrum node starting");
    let result = ferrum_rpc::start_servers(private_addr, public_addr, api, resolver).await;

    worker.shutdown().await;
    if let Err(err) = state.close() {
        warn!(%err, "error closing storage during shutdown");
    }

    result
}
