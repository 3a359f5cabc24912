//! A lightweight connectionless transport on top of UDP, connecting a single server with many
//!  clients. It offers two kinds of delivery, multiplexed over one UDP socket per endpoint:
//!
//! * *unreliable*: a datagram is sent once and delivered to the application if and when it
//!    arrives, without ordering or de-duplication
//! * *reliable*: packets are acknowledged and re-sent until the acknowledgement arrives, and the
//!    receiver delivers them exactly once and in the order they were sent
//!
//! ## Design goals
//!
//! * Asymmetric: a [server::NetworkServer] listens on a port and learns about clients from the
//!    datagrams they send, a [client::NetworkClient] talks to exactly one server through a
//!    connected socket
//! * No handshake and no connection state beyond a per-peer record - a peer record is created
//!    with the first datagram from an address and lives until the application removes it
//! * The abstraction is sending / receiving *messages* that fit into a single datagram. There is
//!    no fragmentation.
//! * There is exactly one reliable ordering stream per peer and direction
//! * Retries are driven by the host application's periodic tick (see [updater::TickSource]),
//!    typically its frame loop, rather than by a timer of their own
//! * explicitly *not* in scope: congestion control, encryption, NAT traversal beyond creating a
//!    peer record for a known address ("hole punching"), multiplexed streams
//!
//! ## Packet format
//!
//! All numbers are little endian:
//!
//! ```ascii
//! 0:  timestamp (i64) - microseconds since epoch at the time the packet was created. This is
//!      unique per sending endpoint and serves as the id that an ack refers to
//! 8:  order (u64) - for reliable packets, the per-peer sequence number. 0 otherwise
//! 16: message length (u16)
//! 18: payload
//! *:  flags (u32):
//!     * bit 0: reliable
//!     * bit 1: ack
//!     * all other bits must be 0, and a packet is never both reliable and ack
//! ```
//!
//! The header has a fixed size of 22 bytes. With the default maximum datagram size of 1024 bytes,
//!  this leaves 1002 bytes of payload per packet.
//!
//! ## Reliable delivery
//!
//! The sender stamps every reliable packet with the next `order` for its peer and keeps it in a
//!  retry registry, re-sending it whenever the retry delay (15 millis by default, no backoff) has
//!  passed at the time of a tick.
//!
//! The receiver answers *every* reliable packet with an ack, duplicates included (since the
//!  previous ack may have been lost). The ack's payload is the acknowledged packet's timestamp
//!  (i64, 8 bytes). Acks are neither acknowledged nor retried.
//!
//! The receiver then releases packets strictly in order: packets ahead of the next expected
//!  order are buffered, packets below it are duplicates and are dropped.
//!
//! NB: There is no limit on retries. A packet whose peer is gone is re-sent until the peer is
//!      removed from the endpoint.

pub mod client;
pub mod config;
mod end_point;
pub mod error;
pub mod message_queue;
pub mod packet;
pub mod peer;
pub mod receive_sequencer;
pub mod retry_registry;
pub mod send_pipeline;
pub mod server;
pub mod timestamp;
pub mod updater;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            // .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
