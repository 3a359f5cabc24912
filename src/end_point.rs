use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::message_queue::{Message, MessageQueue};
use crate::packet::Packet;
use crate::peer::Peer;
use crate::retry_registry::RetryRegistry;
use crate::send_pipeline::SendSocket;
use crate::updater::{TickSource, Updatable, UpdateId};

/// The machinery shared by server and client: sending, the receive loop's packet dispatch,
///  re-sending unacknowledged packets, and shutdown.
///
/// Two things run concurrently against this: the receive loop (a spawned task) and the sweep
///  (called from the host's tick), plus any number of application tasks sending. They share
///  state only through the retry registry's lock and the peers' locks.
pub(crate) struct EndPointCore {
    config: Arc<LinkConfig>,
    /// `None` after close, so the socket is released as soon as the receive loop exits
    socket: RwLock<Option<Arc<dyn SendSocket>>>,
    pub(crate) registry: RetryRegistry,
    inbox: MessageQueue<Message>,
    live: AtomicBool,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    update_id: Mutex<Option<UpdateId>>,
}

impl EndPointCore {
    pub fn new(config: Arc<LinkConfig>, socket: Arc<dyn SendSocket>) -> Arc<EndPointCore> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(EndPointCore {
            registry: RetryRegistry::new(&config),
            config,
            socket: RwLock::new(Some(socket)),
            inbox: MessageQueue::new(),
            live: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            shutdown,
            update_id: Mutex::new(None),
        })
    }

    pub fn register_with(self: &Arc<Self>, tick_source: &dyn TickSource) {
        let id = tick_source.add_update(Arc::new(SweepHandle(Arc::downgrade(self))));
        *self.update_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    /// `true` until the endpoint is closed or its receive loop terminates
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops the receive loop promptly, releases the socket and deregisters from the tick source.
    ///  Sends fail with [LinkError::Closed] afterwards. Closing more than once is a no-op.
    pub fn close(&self, tick_source: Option<&dyn TickSource>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("closing endpoint");
        self.live.store(false, Ordering::Release);
        self.shutdown.send_replace(true);
        self.socket.write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let update_id = self.update_id.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match (tick_source, update_id) {
            (Some(tick_source), Some(id)) => tick_source.remove_update(id),
            (None, Some(_)) => debug!("endpoint closed without its tick source - the registration expires on the next tick"),
            _ => {}
        }
    }

    pub fn flush(&self) -> Vec<Message> {
        self.inbox.flush()
    }

    /// encodes into the peer's write buffer and transmits, holding the peer's write lock throughout
    pub async fn send_packet(&self, packet: &Packet, peer: &Peer) -> anyhow::Result<()> {
        let socket = self.socket.read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(LinkError::Closed)?;

        let mut write_buffer = peer.lock_write_buffer().await;
        let len = packet.encode(&mut write_buffer)?;

        if let Err(e) = socket.do_send_packet(peer.socket_addr(), &write_buffer[..len]).await {
            error!("failed to send packet to {:?}: {}", peer, e);
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn send_unreliable(&self, message: &[u8], peer: &Peer) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(LinkError::Closed.into());
        }
        let packet = self.registry.create_unreliable(message)?;
        self.send_packet(&packet, peer).await
    }

    /// NB: If the initial transmission fails, the error is returned but the packet remains
    ///      registered and is retried by the sweep like any unacknowledged packet
    pub async fn send_reliable(&self, message: &[u8], peer: &Arc<Peer>) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(LinkError::Closed.into());
        }
        let packet = self.registry.create_reliable(message, peer).await?;
        self.send_packet(&packet, peer).await
    }

    /// re-sends all packets whose retry deadline has passed
    pub async fn sweep(&self) {
        if self.is_closed() {
            return;
        }

        for (packet, peer) in self.registry.take_due(Instant::now()).await {
            trace!("re-sending packet #{} to {:?}", packet.order, peer);
            if let Err(e) = self.send_packet(&packet, &peer).await {
                debug!("re-sending packet #{} to {:?} failed, will retry: {}", packet.order, peer, e);
            }
        }
    }

    /// Handles a single received packet from `peer`. Delivered messages are tagged with
    ///  `origin`, which is `None` on the client side.
    pub async fn on_packet(&self, packet: Packet, peer: &Arc<Peer>, origin: &Option<Arc<Peer>>) {
        if packet.is_ack() {
            match <[u8; 8]>::try_from(packet.payload.as_ref()) {
                Ok(raw) => {
                    self.registry.remove_pending(peer.id(), i64::from_le_bytes(raw)).await;
                }
                Err(_) => {
                    warn!("received ack with a payload of {} bytes from {:?} - dropping", packet.payload.len(), peer);
                }
            }
        }
        else if packet.is_reliable() {
            // every copy is acked, including duplicates: the previous ack may have been lost
            let ack = self.registry.create_ack(packet.timestamp);
            if let Err(e) = self.send_packet(&ack, peer).await {
                debug!("failed to ack packet #{} from {:?}: {}", packet.order, peer, e);
            }

            for payload in peer.flush_pending(packet.order, packet.payload) {
                self.inbox.enqueue(Message::new(payload, origin.clone()));
            }
        }
        else {
            self.inbox.enqueue(Message::new(packet.payload, origin.clone()));
        }
    }

    /// Reads datagrams until the endpoint is closed or the socket fails. `resolve_peer` maps a
    ///  sender address to the peer record and the origin that messages are tagged with; datagrams
    ///  it returns `None` for are dropped. It is only called for well-formed packets, so junk
    ///  never creates a peer record.
    pub async fn recv_loop<F>(self: Arc<Self>, socket: Arc<UdpSocket>, resolve_peer: F)
    where F: Fn(SocketAddr) -> Option<(Arc<Peer>, Option<Arc<Peer>>)> + Send + 'static
    {
        info!("starting receive loop on {:?}", socket.local_addr().ok());

        let mut shutdown = self.shutdown.subscribe();
        let mut buf = vec![0u8; self.config.max_datagram_size];
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let (num_read, from) = select! {
                _ = shutdown.changed() => break,
                recv_result = socket.recv_from(&mut buf) => match recv_result {
                    Ok(x) => x,
                    Err(e) if is_transient(&e) => {
                        debug!("transient socket error, continuing: {}", e);
                        continue;
                    }
                    Err(e) => {
                        error!("socket error, stopping the receive loop: {}", e);
                        break;
                    }
                },
            };

            trace!("received {} bytes from {:?}", num_read, from);

            let packet = match Packet::decode(&buf[..num_read]) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("received malformed datagram from {:?} - dropping: {}", from, e);
                    continue;
                }
            };

            match resolve_peer(from) {
                Some((peer, origin)) => self.on_packet(packet, &peer, &origin).await,
                None => debug!("received datagram from unexpected address {:?} - dropping", from),
            }
        }

        self.live.store(false, Ordering::Release);
        info!("stopped receiving messages");
    }
}

/// ICMP feedback about an unreachable peer shows up as a receive error on connected sockets (and
///  on all sockets on Windows). It concerns a previously sent datagram, not the socket.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset)
}

/// The tick source's handle on an endpoint. It does not keep the endpoint alive, and it expires
///  once the endpoint is closed or dropped.
struct SweepHandle(Weak<EndPointCore>);

#[async_trait]
impl Updatable for SweepHandle {
    async fn update(&self) {
        if let Some(core) = self.0.upgrade() {
            core.sweep().await
        }
    }

    fn is_expired(&self) -> bool {
        self.0.upgrade()
            .map_or(true, |core| core.is_closed())
    }
}
