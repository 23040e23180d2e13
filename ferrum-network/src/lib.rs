use std::collections::HashSet;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use ferrum_core::{BlockData, BlockTx};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(8);

/// A peer address, e.g. `"0.0.0.0:4000"`. Hashed/ordered on the host string
/// alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
}

impl Peer {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

/// The set of peer addresses this node knows about. The local node's own
/// private host is always a member so it can be filtered out of broadcasts
/// without a special case at every call site.
pub struct PeerSet {
    local_host: Peer,
    set: RwLock<HashSet<Peer>>,
}

impl PeerSet {
    pub fn new(local_host: impl Into<String>) -> Self {
        let local_host = Peer::new(local_host);
        let mut set = HashSet::new();
        set.insert(local_host.clone());
        Self { local_host, set: RwLock::new(set) }
    }

    pub fn add(&self, peer: Peer) -> bool {
        self.set.write().insert(peer)
    }

    pub fn delete(&self, peer: &Peer) {
        self.set.write().remove(peer);
    }

    /// All known peers, including the local host.
    pub fn all(&self) -> Vec<Peer> {
        self.set.read().iter().cloned().collect()
    }

    /// All known peers except the local host — the broadcast set.
    pub fn external(&self) -> Vec<Peer> {
        self.set
            .read()
            .iter()
            .filter(|p| **p != self.local_host)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    pub last_block_hash: String,
    pub last_block_height: u64,
    pub known_peers: Vec<Peer>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct AddPeerRequest<'a> {
    host: &'a str,
}

/// HTTP client for the inter-node RPC surface (spec §6's private API). Every
/// send is fire-and-forget from the caller's perspective: failures are
/// returned so the caller can decide whether to swallow them (the worker
/// does, per-peer) rather than baking that policy in here.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self { http }
    }

    fn url(peer: &Peer, path: &str) -> String {
        format!("http://{}{}", peer.host, path)
    }

    pub async fn request_status(&self, peer: &Peer) -> Result<NodeStatus, reqwest::Error> {
        self.http
            .get(Self::url(peer, "/v1/node/status"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn request_mempool(&self, peer: &Peer) -> Result<Vec<BlockTx>, reqwest::Error> {
        self.http
            .get(Self::url(peer, "/v1/node/tx/uncommitted"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn request_blocks(
        &self,
        peer: &Peer,
        from: u64,
        to: &str,
    ) -> Result<Vec<BlockData>, reqwest::Error> {
        self.http
            .get(Self::url(peer, &format!("/v1/node/blocks/{from}/{to}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn send_block(&self, peer: &Peer, block: &BlockData) -> Result<(), reqwest::Error> {
        self.http
            .post(Self::url(peer, "/v1/node/block"))
            .json(block)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn send_tx(&self, peer: &Peer, tx: &BlockTx) -> Result<(), reqwest::Error> {
        self.http
            .post(Self::url(peer, "/v1/node/tx"))
            .json(tx)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn send_node_ready(&self, peer: &Peer, local_host: &str) -> Result<(), reqwest::Error> {
        self.http
            .post(Self::url(peer, "/v1/node/peer"))
            .json(&AddPeerRequest { host: local_host })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Broadcasts `block` to every peer in `peers`, logging and swallowing
    /// per-peer failures — a single unreachable peer never blocks the rest
    /// of the mesh from hearing about a new block.
    pub async fn send_block_to_peers(&self, peers: &[Peer], block: &BlockData) {
        for peer in peers {
            if let Err(err) = self.send_block(peer, block).await {
                warn!(host = %peer.host, %err, "failed to send block to peer");
            }
        }
    }

    pub async fn send_tx_to_peers(&self, peers: &[Peer], tx: &BlockTx) {
        for peer in peers {
            if let Err(err) = self.send_tx(peer, tx).await {
                warn!(host = %peer.host, %err, "failed to send tx to peer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_host_is_always_a_member_but_excluded_from_external() {
        let peers = PeerSet::new("0.0.0.0:4000");
        assert_eq!(peers.all().len(), 1);
        assert!(peers.external().is_empty());

        peers.add(Peer::new("0.0.0.0:4001"));
        assert_eq!(peers.all().len(), 2);
        assert_eq!(peers.external(), vec![Peer::new("0.0.0.0:4001")]);
    }

    #[test]
    fn delete_removes_a_peer() {
        let peers = PeerSet::new("0.0.0.0:4000");
        let other = Peer::new("0.0.0.0:4001");
        peers.add(other.clone());
        peers.delete(&other);
        assert!(peers.external().is_empty());
    }
}
