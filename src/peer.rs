use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::PoisonError;
use bytes::Bytes;
use tokio::sync::{Mutex, MutexGuard};
use crate::receive_sequencer::ReceiveSequencer;

/// Everything the endpoint keeps per remote address. A server has one of these per client, a
///  client has exactly one for the server.
///
/// Reliable ordering is tracked separately per direction: `next_send_order` stamps packets sent
///  to the peer, the sequencer tracks packets received from it.
pub struct Peer {
    id: u64,
    addr: SocketAddr,
    /// Encoding happens into this buffer, and the lock is held until the datagram is handed to
    ///  the socket. This serializes all sends to a single peer, while sends to different peers
    ///  proceed in parallel.
    write_buffer: Mutex<Vec<u8>>,
    next_send_order: AtomicU64,
    removed: AtomicBool,
    /// NB: only the endpoint's receive loop touches this, so the lock is never contended
    sequencer: std::sync::Mutex<ReceiveSequencer>,
}

impl Debug for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}#{}]", self.addr, self.id)
    }
}

impl Peer {
    pub(crate) fn new(id: u64, addr: SocketAddr, max_datagram_size: usize) -> Peer {
        Peer {
            id,
            addr,
            write_buffer: Mutex::new(vec![0u8; max_datagram_size]),
            next_send_order: AtomicU64::new(0),
            removed: AtomicBool::new(false),
            sequencer: Default::default(),
        }
    }

    /// opaque id, assigned sequentially by the server when it first learns about a peer
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ip:port`, with IP V6 addresses in brackets
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn portless_address(&self) -> String {
        self.addr.ip().to_string()
    }

    /// the order that the next reliable packet to this peer will carry
    pub fn next_send_order(&self) -> u64 {
        self.next_send_order.load(Ordering::Acquire)
    }

    /// `true` once the server has forgotten this peer. Reliable sends to it are rejected.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub(crate) fn take_send_order(&self) -> u64 {
        self.next_send_order.fetch_add(1, Ordering::AcqRel)
    }

    pub(crate) async fn lock_write_buffer(&self) -> MutexGuard<'_, Vec<u8>> {
        self.write_buffer.lock().await
    }

    pub(crate) fn flush_pending(&self, order: u64, payload: Bytes) -> Vec<Bytes> {
        self.sequencer.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush_pending(order, payload)
    }

    /// the order of the next reliable packet that will be delivered from this peer
    pub fn expected_receive_order(&self) -> u64 {
        self.sequencer.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .expected_order()
    }

    pub fn buffered_receive_len(&self) -> usize {
        self.sequencer.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .buffered_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::v4(SocketAddr::from(([10, 1, 2, 3], 4567)), "10.1.2.3:4567", "10.1.2.3")]
    #[case::v6(SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 1], 80)), "[::1]:80", "::1")]
    fn test_addresses(#[case] addr: SocketAddr, #[case] expected_address: &str, #[case] expected_portless: &str) {
        let peer = Peer::new(3, addr, 1024);
        assert_eq!(peer.id(), 3);
        assert_eq!(peer.socket_addr(), addr);
        assert_eq!(peer.address(), expected_address);
        assert_eq!(peer.portless_address(), expected_portless);
    }

    #[test]
    fn test_send_and_receive_orders_are_independent() {
        let peer = Peer::new(0, SocketAddr::from(([127, 0, 0, 1], 1)), 1024);

        assert_eq!(peer.take_send_order(), 0);
        assert_eq!(peer.take_send_order(), 1);
        assert_eq!(peer.next_send_order(), 2);

        assert_eq!(peer.expected_receive_order(), 0);
        assert_eq!(peer.flush_pending(1, Bytes::from_static(b"b")), Vec::<Bytes>::new());
        assert_eq!(peer.buffered_receive_len(), 1);
        assert_eq!(peer.flush_pending(0, Bytes::from_static(b"a")), vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(peer.expected_receive_order(), 2);
        assert_eq!(peer.next_send_order(), 2);
    }

    #[tokio::test]
    async fn test_write_buffer_has_datagram_size() {
        let peer = Peer::new(0, SocketAddr::from(([127, 0, 0, 1], 1)), 512);
        assert_eq!(peer.lock_write_buffer().await.len(), 512);
    }
}
