use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use bytes::Bytes;
use tracing::trace;

/// Per-peer reordering of reliable packets: payloads are released exactly once and in ascending
///  order, starting at 0, regardless of the order (and multiplicity) in which they arrive.
#[derive(Default, Debug)]
pub struct ReceiveSequencer {
    /// the order of the next payload to be released - everything below was released already
    expected_order: u64,
    /// packets that arrived ahead of `expected_order`, i.e. all keys are > `expected_order`
    buffer: BTreeMap<u64, Bytes>,
}

impl ReceiveSequencer {
    pub fn new() -> ReceiveSequencer {
        Default::default()
    }

    pub fn expected_order(&self) -> u64 {
        self.expected_order
    }

    /// number of packets held back waiting for a gap to be filled
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Accepts a reliable packet's payload and returns all payloads that became deliverable,
    ///  in delivery order. Duplicates (of released or of buffered packets) are dropped.
    pub fn flush_pending(&mut self, order: u64, payload: Bytes) -> Vec<Bytes> {
        match order.cmp(&self.expected_order) {
            Ordering::Less => {
                trace!("dropping duplicate of released packet #{}", order);
                Vec::new()
            }
            Ordering::Equal => {
                let mut deliverable = vec![payload];
                self.expected_order += 1;
                while let Some(next) = self.buffer.remove(&self.expected_order) {
                    deliverable.push(next);
                    self.expected_order += 1;
                }
                trace!("releasing {} packet(s), next expected is #{}", deliverable.len(), self.expected_order);
                deliverable
            }
            Ordering::Greater => {
                match self.buffer.entry(order) {
                    Entry::Vacant(e) => {
                        trace!("buffering packet #{} while waiting for #{}", order, self.expected_order);
                        e.insert(payload);
                    }
                    Entry::Occupied(_) => {
                        trace!("dropping duplicate of buffered packet #{}", order);
                    }
                }
                Vec::new()
            }
        }
    }
}
