//! Full-mesh peer networking.
//!
//! Every peer runs a TCP listener and also dials out to every other peer.
//! Each link owns a send queue drained by its own task plus a receive loop;
//! everything received from any direction lands on one shared incoming
//! queue tagged with the sender's identity. Links are keyed by
//! [`PeerIdentity`] so a peer reachable both inbound and outbound still
//! counts as a single participant.

mod link;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context as _, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::identity::PeerIdentity;
use crate::protocol::PeerMessage;

/// A received message tagged with the sender's identity.
pub type Inbound = (PeerIdentity, PeerMessage);

pub struct PeerMesh {
    inner: Arc<MeshInner>,
    accept_task: JoinHandle<()>,
}

struct MeshInner {
    listen_addr: String,
    identity: PeerIdentity,
    player_name: String,
    links: Mutex<HashMap<PeerIdentity, LinkHandle>>,
    incoming_tx: mpsc::UnboundedSender<Inbound>,
    next_token: AtomicU64,
    closed: AtomicBool,
}

/// Send side of one established link. The token ties a map entry to the
/// connection that registered it, so a dead connection only evicts itself.
struct LinkHandle {
    token: u64,
    tx: mpsc::UnboundedSender<PeerMessage>,
}

impl PeerMesh {
    /// Bind a listener on `listen_addr` and dial every address in
    /// `peer_addrs` that is neither ourselves nor already connected.
    /// Returns the mesh and the shared incoming queue.
    pub async fn connect(
        listen_addr: &str,
        peer_addrs: &[String],
        player_name: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Inbound>)> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("binding mesh listener on {listen_addr}"))?;
        // Resolve the bound address so a port-0 bind still reports a
        // dialable endpoint in handshakes.
        let listen_addr = listener
            .local_addr()
            .context("reading bound mesh address")?
            .to_string();
        info!("mesh listening on {listen_addr}");

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(MeshInner {
            identity: PeerIdentity::normalize(&listen_addr),
            listen_addr,
            player_name: player_name.to_string(),
            links: Mutex::new(HashMap::new()),
            incoming_tx,
            next_token: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let accept_inner = inner.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("inbound mesh connection from {addr}");
                        tokio::spawn(link::run_inbound(accept_inner.clone(), stream, addr));
                    }
                    Err(e) => warn!("accept error: {e}"),
                }
            }
        });

        let mesh = Self { inner, accept_task };
        mesh.ensure_links(peer_addrs);
        Ok((mesh, incoming_rx))
    }

    /// Dial any listed peer we are not already connected to. Self-dials and
    /// duplicates are skipped, so repeating the same list is a no-op.
    pub fn ensure_links(&self, peer_addrs: &[String]) {
        for addr in peer_addrs {
            let identity = PeerIdentity::normalize(addr);
            if identity == self.inner.identity {
                debug!("skipping dial to self at {addr}");
                continue;
            }
            if self.inner.links().contains_key(&identity) {
                debug!("already linked to {identity}, skipping {addr}");
                continue;
            }
            link::spawn_dial(self.inner.clone(), addr.clone(), 0);
        }
    }

    /// Enqueue a message on every known link.
    pub fn broadcast(&self, msg: &PeerMessage) {
        let txs: Vec<_> = self.inner.links().values().map(|l| l.tx.clone()).collect();
        for tx in txs {
            let _ = tx.send(msg.clone());
        }
    }

    /// Unicast to one peer; a no-op when no link currently exists.
    pub fn send(&self, peer_addr: &str, msg: &PeerMessage) {
        let identity = PeerIdentity::normalize(peer_addr);
        let tx = self.inner.links().get(&identity).map(|l| l.tx.clone());
        match tx {
            Some(tx) => {
                let _ = tx.send(msg.clone());
            }
            None => debug!("no link to {identity}, dropping unicast"),
        }
    }

    /// The address this mesh reports about itself in handshakes.
    pub fn listen_addr(&self) -> &str {
        &self.inner.listen_addr
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.inner.identity
    }

    pub fn player_name(&self) -> &str {
        &self.inner.player_name
    }

    pub fn link_count(&self) -> usize {
        self.inner.links().len()
    }

    /// Identities of the currently established links.
    pub fn linked_peers(&self) -> Vec<PeerIdentity> {
        self.inner.links().keys().cloned().collect()
    }

    /// A handle for injecting messages into the shared incoming queue, used
    /// by the lobby to route its own READY/LOSE through the same consumer
    /// that handles remote ones.
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<Inbound> {
        self.inner.incoming_tx.clone()
    }

    /// Stop accepting and reconnecting. Established link tasks finish when
    /// their streams close.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.accept_task.abort();
        self.inner.links().clear();
    }
}

impl Drop for PeerMesh {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl MeshInner {
    fn links(&self) -> MutexGuard<'_, HashMap<PeerIdentity, LinkHandle>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Claim the send slot for `identity`. Fails when another connection
    /// already holds it, in which case the caller keeps receiving but must
    /// not register a writer.
    fn register_link(&self, identity: &PeerIdentity, handle: LinkHandle) -> bool {
        let mut links = self.links();
        if links.contains_key(identity) {
            false
        } else {
            links.insert(identity.clone(), handle);
            true
        }
    }

    /// Drop the link entry, but only if it still belongs to this connection.
    fn remove_link(&self, identity: &PeerIdentity, token: u64) {
        let mut links = self.links();
        if links.get(identity).is_some_and(|l| l.token == token) {
            links.remove(identity);
        }
    }

    fn forward(&self, identity: &PeerIdentity, msg: PeerMessage) {
        let _ = self.incoming_tx.send((identity.clone(), msg));
    }
}
