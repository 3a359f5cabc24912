use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, PoisonError};
use bytes::Bytes;
use crate::peer::Peer;

/// A payload delivered to the application
#[derive(Clone)]
pub struct Message {
    payload: Bytes,
    peer: Option<Arc<Peer>>,
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message{{from:{:?}, len:{}}}", self.peer, self.payload.len())
    }
}

impl Message {
    pub(crate) fn new(payload: Bytes, peer: Option<Arc<Peer>>) -> Message {
        Message { payload, peer }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The client a server received this message from. `None` for messages received by a
    ///  client, which always come from its server.
    pub fn peer(&self) -> Option<&Arc<Peer>> {
        self.peer.as_ref()
    }

    pub fn is_from_server(&self) -> bool {
        self.peer.is_none()
    }
}

/// Hand-over point between the receive loop and the application: the receive loop enqueues,
///  the application periodically takes everything that accumulated.
pub struct MessageQueue<T> {
    messages: Mutex<Vec<T>>,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        MessageQueue {
            messages: Mutex::new(Vec::new()),
        }
    }
}

impl<T> MessageQueue<T> {
    pub fn new() -> MessageQueue<T> {
        Default::default()
    }

    pub fn enqueue(&self, message: T) {
        self.messages.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// removes and returns all queued messages in the order they were enqueued
    pub fn flush(&self) -> Vec<T> {
        std::mem::take(
            &mut *self.messages.lock()
                .unwrap_or_else(PoisonError::into_inner)
        )
    }

    pub fn len(&self) -> usize {
        self.messages.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_flush_takes_all_in_order() {
        let queue = MessageQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.flush(), vec![1, 2, 3]);
        assert!(queue.is_empty());
        assert!(queue.flush().is_empty());
    }

    #[test]
    fn test_message_origin() {
        let from_server = Message::new(Bytes::from_static(b"abc"), None);
        assert!(from_server.is_from_server());
        assert_eq!(from_server.payload(), b"abc");

        let peer = Arc::new(Peer::new(7, SocketAddr::from(([127, 0, 0, 1], 9)), 64));
        let from_client = Message::new(Bytes::from_static(b"xyz"), Some(peer));
        assert!(!from_client.is_from_server());
        assert_eq!(from_client.peer().unwrap().id(), 7);
        assert_eq!(from_client.into_payload(), Bytes::from_static(b"xyz"));
    }
}
