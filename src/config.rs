use std::time::Duration;
use anyhow::bail;
use crate::packet::{max_payload_len, HEADER_LEN, MAX_DATAGRAM_SIZE};

/// Largest UDP payload over IPV4
const UDP_PAYLOAD_LIMIT: usize = 65507;

pub struct LinkConfig {
    /// This is the size of a complete encoded packet, i.e. header plus payload, and it is the size
    ///  of every per-peer write buffer and of the receive buffer. Datagrams are never fragmented
    ///  by this protocol, so this must be supported end-to-end by the network.
    ///
    /// Peers with different settings interoperate as long as neither side sends more than the
    ///  other side's receive buffer holds - excess bytes are cut off by the socket, and the
    ///  truncated datagram is dropped as malformed.
    pub max_datagram_size: usize,

    /// Reliable packets that are not acknowledged are re-sent after this delay. The retry policy
    ///  is a fixed interval, there is no backoff.
    ///
    /// NB: The delay is checked on every tick of the driving [crate::updater::TickSource], so
    ///      effective retry latency is this delay rounded up to the tick cadence.
    pub retry_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            max_datagram_size: MAX_DATAGRAM_SIZE,
            retry_delay: Duration::from_millis(15),
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        // an ack carries an 8 byte timestamp, so anything below that could not even acknowledge
        if self.max_datagram_size < HEADER_LEN + std::mem::size_of::<i64>() {
            bail!("max datagram size of {} is too small to hold a packet header and an ack", self.max_datagram_size);
        }
        if self.max_datagram_size > UDP_PAYLOAD_LIMIT {
            bail!("max datagram size of {} exceeds the UDP payload limit of {}", self.max_datagram_size, UDP_PAYLOAD_LIMIT);
        }
        if self.retry_delay.is_zero() {
            bail!("retry delay must not be zero");
        }
        Ok(())
    }

    /// payload capacity of a single packet with this configuration, 0 for an invalid datagram size
    pub fn max_payload_len(&self) -> usize {
        max_payload_len(self.max_datagram_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default() {
        let config = LinkConfig::default();
        assert_eq!(config.max_datagram_size, 1024);
        assert_eq!(config.retry_delay, Duration::from_millis(15));
        assert_eq!(config.max_payload_len(), 1002);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::minimal(30, 1, true)]
    #[case::too_small_for_ack(29, 1, false)]
    #[case::udp_limit(65507, 1, true)]
    #[case::beyond_udp_limit(65508, 1, false)]
    #[case::zero_delay(1024, 0, false)]
    fn test_validate(#[case] max_datagram_size: usize, #[case] retry_millis: u64, #[case] expected_valid: bool) {
        let config = LinkConfig {
            max_datagram_size,
            retry_delay: Duration::from_millis(retry_millis),
        };
        assert_eq!(config.validate().is_ok(), expected_valid);
    }

    #[test]
    fn test_max_payload_len_of_invalid_config() {
        let config = LinkConfig {
            max_datagram_size: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.max_payload_len(), 0);
    }
}
