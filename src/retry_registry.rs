use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::packet::{Packet, PacketFlags};
use crate::peer::Peer;
use crate::timestamp::TimestampClock;

/// A reliable packet that was sent but not acknowledged yet
pub struct PendingPacket {
    pub packet: Packet,
    pub target: Arc<Peer>,
    pub next_retry: Instant,
}

/// Pending packets are identified by the target's peer id and the packet's timestamp. The
///  timestamp is what an ack refers to, and the peer id keeps acks from one peer from matching
///  packets sent to another.
type PendingKey = (u64, i64);

/// Creates packets for an endpoint, and keeps track of reliable packets until they are
///  acknowledged. There is no upper bound on the number of retries: a packet is re-sent until
///  its ack arrives or its peer is removed.
pub struct RetryRegistry {
    retry_delay: Duration,
    max_payload_len: usize,
    clock: TimestampClock,
    pending: RwLock<FxHashMap<PendingKey, PendingPacket>>,
}

impl RetryRegistry {
    pub fn new(config: &LinkConfig) -> RetryRegistry {
        RetryRegistry {
            retry_delay: config.retry_delay,
            max_payload_len: config.max_payload_len(),
            clock: TimestampClock::new(),
            pending: Default::default(),
        }
    }

    fn check_payload_len(&self, payload: &[u8]) -> Result<(), LinkError> {
        if payload.len() > self.max_payload_len {
            debug!("payload of {} bytes exceeds the maximum of {} - not sending", payload.len(), self.max_payload_len);
            return Err(LinkError::PayloadTooLarge { len: payload.len(), max: self.max_payload_len });
        }
        Ok(())
    }

    pub fn create_unreliable(&self, payload: &[u8]) -> Result<Packet, LinkError> {
        self.check_payload_len(payload)?;
        Ok(Packet {
            timestamp: self.clock.next_stamp(),
            order: 0,
            payload: Bytes::copy_from_slice(payload),
            flags: PacketFlags::empty(),
        })
    }

    /// Stamps the packet with the target's next send order and registers it for retries. The
    ///  caller is responsible for the initial transmission.
    ///
    /// NB: An oversized payload is rejected *before* an order is taken, since a skipped order
    ///      would stall the receiver forever
    ///
    /// A removed target is checked under the write lock that [RetryRegistry::remove_peer] takes
    ///  as well, so no packet for a removed peer can outlive its removal.
    pub async fn create_reliable(&self, payload: &[u8], target: &Arc<Peer>) -> Result<Packet, LinkError> {
        self.check_payload_len(payload)?;

        let mut pending = self.pending.write().await;
        if target.is_removed() {
            debug!("not registering a reliable packet for removed peer {:?}", target);
            return Err(LinkError::RemovedPeer(target.id()));
        }

        let packet = Packet {
            timestamp: self.clock.next_stamp(),
            order: target.take_send_order(),
            payload: Bytes::copy_from_slice(payload),
            flags: PacketFlags::RELIABLE,
        };

        trace!("registering reliable packet #{} for {:?} with timestamp {}", packet.order, target, packet.timestamp);
        pending.insert((target.id(), packet.timestamp), PendingPacket {
            packet: packet.clone(),
            target: target.clone(),
            next_retry: Instant::now() + self.retry_delay,
        });
        Ok(packet)
    }

    /// an ack's payload is the timestamp of the packet it acknowledges
    pub fn create_ack(&self, acked_timestamp: i64) -> Packet {
        Packet {
            timestamp: self.clock.next_stamp(),
            order: 0,
            payload: Bytes::copy_from_slice(&acked_timestamp.to_le_bytes()),
            flags: PacketFlags::ACK,
        }
    }

    /// Returns `true` if there was a matching pending packet. Duplicate acks are expected and
    ///  harmless.
    pub async fn remove_pending(&self, peer_id: u64, timestamp: i64) -> bool {
        let removed = self.pending.write().await
            .remove(&(peer_id, timestamp));
        match &removed {
            Some(p) => trace!("packet #{} to {:?} was acknowledged", p.packet.order, p.target),
            None => trace!("ack for unknown or already acknowledged packet {} from peer #{}", timestamp, peer_id),
        }
        removed.is_some()
    }

    /// Drops all pending packets for a peer, returning the number of dropped packets. Callers mark
    ///  the peer as removed first, so that no new packets are registered for it afterwards.
    pub async fn remove_peer(&self, peer_id: u64) -> usize {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|(id, _), _| *id != peer_id);
        before - pending.len()
    }

    /// Collects all packets whose retry deadline has passed, rescheduling them for
    ///  `now + retry_delay`. Transmission is left to the caller, so no lock is held during I/O.
    pub async fn take_due(&self, now: Instant) -> Vec<(Packet, Arc<Peer>)> {
        let mut pending = self.pending.write().await;

        let mut result = Vec::new();
        for p in pending.values_mut() {
            if p.next_retry <= now {
                p.next_retry = now + self.retry_delay;
                result.push((p.packet.clone(), p.target.clone()));
            }
        }
        result
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn registry() -> RetryRegistry {
        RetryRegistry::new(&LinkConfig::default())
    }

    fn peer(id: u64) -> Arc<Peer> {
        Arc::new(Peer::new(id, SocketAddr::from(([127, 0, 0, 1], 1000 + id as u16)), 1024))
    }

    #[test]
    fn test_create_unreliable() {
        let packet = registry().create_unreliable(b"abc").unwrap();
        assert_eq!(packet.order, 0);
        assert_eq!(packet.flags, PacketFlags::empty());
        assert_eq!(packet.payload.as_ref(), b"abc");
        assert!(packet.timestamp > 0);
    }

    #[test]
    fn test_create_ack() {
        let packet = registry().create_ack(0x0102_0304_0506_0708);
        assert_eq!(packet.flags, PacketFlags::ACK);
        assert_eq!(packet.payload.as_ref(), &[8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_create_reliable_assigns_orders_per_peer() {
        let registry = registry();
        let a = peer(1);
        let b = peer(2);

        let a0 = registry.create_reliable(b"x", &a).await.unwrap();
        let a1 = registry.create_reliable(b"y", &a).await.unwrap();
        let b0 = registry.create_reliable(b"z", &b).await.unwrap();

        assert_eq!((a0.order, a1.order, b0.order), (0, 1, 0));
        assert!(a0.is_reliable());
        assert!(a1.timestamp > a0.timestamp);
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_neither_registered_nor_ordered() {
        let registry = registry();
        let a = peer(1);

        let result = registry.create_reliable(&[0u8; 1003], &a).await;
        assert_eq!(result, Err(LinkError::PayloadTooLarge { len: 1003, max: 1002 }));
        assert!(registry.is_empty().await);
        assert_eq!(a.next_send_order(), 0);

        assert!(registry.create_reliable(&[0u8; 1002], &a).await.is_ok());
        assert!(registry.create_unreliable(&[0u8; 1003]).is_err());
    }

    #[tokio::test]
    async fn test_remove_pending() {
        let registry = registry();
        let a = peer(1);
        let b = peer(2);
        let packet = registry.create_reliable(b"x", &a).await.unwrap();

        assert!(!registry.remove_pending(b.id(), packet.timestamp).await);
        assert!(!registry.remove_pending(a.id(), packet.timestamp + 1).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove_pending(a.id(), packet.timestamp).await);
        assert!(registry.is_empty().await);

        assert!(!registry.remove_pending(a.id(), packet.timestamp).await);
    }

    #[tokio::test]
    async fn test_remove_peer() {
        let registry = registry();
        let a = peer(1);
        let b = peer(2);
        registry.create_reliable(b"1", &a).await.unwrap();
        registry.create_reliable(b"2", &a).await.unwrap();
        registry.create_reliable(b"3", &b).await.unwrap();

        assert_eq!(registry.remove_peer(a.id()).await, 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_removed_peer_is_not_registered() {
        let registry = registry();
        let a = peer(1);
        registry.create_reliable(b"1", &a).await.unwrap();

        a.mark_removed();
        assert_eq!(registry.remove_peer(a.id()).await, 1);

        let result = registry.create_reliable(b"2", &a).await;
        assert_eq!(result, Err(LinkError::RemovedPeer(1)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_due() {
        let registry = registry();
        let a = peer(1);
        let packet = registry.create_reliable(b"x", &a).await.unwrap();

        assert!(registry.take_due(Instant::now()).await.is_empty());

        tokio::time::advance(Duration::from_millis(15)).await;
        let due = registry.take_due(Instant::now()).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, packet);
        assert_eq!(due[0].1.id(), a.id());

        // rescheduled
        assert!(registry.take_due(Instant::now()).await.is_empty());
        tokio::time::advance(Duration::from_millis(14)).await;
        assert!(registry.take_due(Instant::now()).await.is_empty());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(registry.take_due(Instant::now()).await.len(), 1);

        registry.remove_pending(a.id(), packet.timestamp).await;
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(registry.take_due(Instant::now()).await.is_empty());
    }
}
