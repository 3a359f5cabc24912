use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use anyhow::anyhow;
use rustc_hash::FxHashMap;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, error, info};
use crate::config::LinkConfig;
use crate::end_point::EndPointCore;
use crate::message_queue::Message;
use crate::peer::Peer;
use crate::send_pipeline::UdpSendSocket;
use crate::updater::TickSource;

/// The server's peers by address. Peers are added when the first datagram arrives from an
///  address (or by hole punching), and they are only removed explicitly - there is no timeout.
struct PeerRegistry {
    max_datagram_size: usize,
    next_id: AtomicU64,
    peers: RwLock<FxHashMap<SocketAddr, Arc<Peer>>>,
}

impl PeerRegistry {
    fn new(max_datagram_size: usize) -> PeerRegistry {
        PeerRegistry {
            max_datagram_size,
            next_id: AtomicU64::new(0),
            peers: Default::default(),
        }
    }

    fn get(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers.read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .cloned()
    }

    fn get_or_add(&self, addr: SocketAddr) -> Arc<Peer> {
        if let Some(peer) = self.get(&addr) {
            return peer;
        }

        match self.peers.write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(addr)
        {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let peer = Arc::new(Peer::new(self.next_id.fetch_add(1, Ordering::AcqRel), addr, self.max_datagram_size));
                debug!("registering new client {:?}", peer);
                e.insert(peer).clone()
            }
        }
    }

    /// removes the peer if it is still the one registered for its address
    fn remove(&self, peer: &Peer) -> bool {
        let mut peers = self.peers.write()
            .unwrap_or_else(PoisonError::into_inner);
        match peers.get(&peer.socket_addr()) {
            Some(registered) if registered.id() == peer.id() => {
                peers.remove(&peer.socket_addr());
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.peers.read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Listens on a UDP port and exchanges messages with any number of clients, each of which has
///  its own reliable ordering.
pub struct NetworkServer {
    core: Arc<EndPointCore>,
    peers: Arc<PeerRegistry>,
    local_addr: SocketAddr,
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        self.core.close(None);
    }
}

impl NetworkServer {
    pub async fn serve(tick_source: &dyn TickSource, port: u16) -> anyhow::Result<NetworkServer> {
        Self::serve_with_config(tick_source, port, Arc::new(LinkConfig::default())).await
    }

    /// Binds the port (`0` for an ephemeral port), registers for retries with the tick source and
    ///  spawns the receive loop. Returns as soon as the socket is bound.
    pub async fn serve_with_config(tick_source: &dyn TickSource, port: u16, config: Arc<LinkConfig>) -> anyhow::Result<NetworkServer> {
        config.validate()?;

        let socket = match UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port))).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                error!("failed to bind the UDP server to port {}: {}", port, e);
                return Err(e.into());
            }
        };
        let local_addr = socket.local_addr()?;
        info!("UDP server started listening on {:?}", local_addr);

        let core = EndPointCore::new(config.clone(), Arc::new(UdpSendSocket::listening(socket.clone())));
        let peers = Arc::new(PeerRegistry::new(config.max_datagram_size));

        core.register_with(tick_source);

        let resolver_peers = peers.clone();
        tokio::spawn(core.clone().recv_loop(socket, move |from| {
            let peer = resolver_peers.get_or_add(from);
            Some((peer.clone(), Some(peer)))
        }));

        Ok(NetworkServer {
            core,
            peers,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_live(&self) -> bool {
        self.core.is_live()
    }

    pub async fn send_message_unreliable(&self, message: &[u8], client: &Arc<Peer>) -> anyhow::Result<()> {
        self.core.send_unreliable(message, client).await
    }

    pub async fn send_message_reliable(&self, message: &[u8], client: &Arc<Peer>) -> anyhow::Result<()> {
        self.core.send_reliable(message, client).await
    }

    /// all messages received since the previous call, each tagged with the client it came from
    pub fn flush(&self) -> Vec<Message> {
        self.core.flush()
    }

    pub fn client(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers.get(addr)
    }

    /// returns the record for `addr`, creating it with the next sequential id if needed
    pub fn add_client(&self, addr: SocketAddr) -> Arc<Peer> {
        self.peers.get_or_add(addr)
    }

    pub fn client_count(&self) -> usize {
        self.peers.len()
    }

    /// Forgets a client, including its unacknowledged packets. Reliable sends to the removed
    ///  record fail with [crate::error::LinkError::RemovedPeer]. If the client sends again, it is
    ///  registered as a new client with a new id and fresh ordering.
    pub async fn remove_client(&self, client: &Peer) {
        if self.peers.remove(client) {
            client.mark_removed();
            let dropped = self.core.registry.remove_peer(client.id()).await;
            debug!("removed client {:?}, dropping {} unacknowledged packet(s)", client, dropped);
        }
    }

    /// Creates the record for a client that has not contacted this server yet, so that sending
    ///  to it can open a path through its NAT.
    pub async fn hole_punch_client(&self, address: &str, port: u16) -> anyhow::Result<Arc<Peer>> {
        let addr = match lookup_host((address, port)).await {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                error!("failed to resolve the client address {}:{} for a hole punch: {}", address, port, e);
                return Err(e.into());
            }
        };
        let addr = addr.ok_or_else(|| {
            error!("client address {}:{} for a hole punch did not resolve to anything", address, port);
            anyhow!("{}:{} did not resolve to a socket address", address, port)
        })?;

        Ok(self.add_client(addr))
    }

    pub async fn pending_reliable_count(&self) -> usize {
        self.core.registry.len().await
    }

    pub fn close(&self, tick_source: &dyn TickSource) {
        self.core.close(Some(tick_source));
    }
}
